use std::{error::Error, fmt::Display, io};

use gt_registers::error::DecodeError;

use crate::{lane::LaneSet, resolver::ParamField};

/// A single problem found while resolving the lane configuration.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigProblem {
    /// `lane` is `None` for the global configuration.
    InvalidValue {
        lane: Option<u8>,
        field: ParamField,
        value: String,
        allowed: String,
    },
    UnknownLane {
        lane: u8,
        available: LaneSet,
    },
    NoLaneEnabled,
}

impl Display for ConfigProblem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigProblem::InvalidValue {
                lane,
                field,
                value,
                allowed,
            } => {
                match lane {
                    Some(lane) => write!(f, "lane {}: ", lane)?,
                    None => write!(f, "global: ")?,
                }
                write!(f, "invalid {} {}, allowed: {}", field, value, allowed)
            }
            ConfigProblem::UnknownLane { lane, available } => {
                write!(f, "lane {} does not exist, available lanes are {}", lane, available)
            }
            ConfigProblem::NoLaneEnabled => write!(f, "no lane is enabled"),
        }
    }
}

/// All problems found while resolving the lane configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigError {
    pub problems: Vec<ConfigProblem>,
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Invalid lane configuration")?;
        for problem in &self.problems {
            write!(f, "\n  - {}", problem)?;
        }
        Ok(())
    }
}

impl Error for ConfigError {}

/// An invalid test sequence entry. `index` is 1-based.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SequenceError {
    Empty,
    DurationOutOfRange {
        index: usize,
        duration: u32,
        min: u32,
        max: u32,
    },
    UnknownMode {
        index: usize,
        mode: String,
        supported: Vec<String>,
    },
    LaneOutOfRange {
        index: usize,
        lane: u8,
        available: LaneSet,
    },
}

impl Display for SequenceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SequenceError::Empty => write!(f, "Test sequence is empty"),
            SequenceError::DurationOutOfRange {
                index,
                duration,
                min,
                max,
            } => write!(
                f,
                "Step {}: duration {} out of range [{}, {}]",
                index, duration, min, max
            ),
            SequenceError::UnknownMode {
                index,
                mode,
                supported,
            } => write!(
                f,
                "Step {}: unsupported mode '{}', supported modes are {}",
                index,
                mode,
                supported.join(", ")
            ),
            SequenceError::LaneOutOfRange {
                index,
                lane,
                available,
            } => write!(
                f,
                "Step {}: lane {} does not exist, available lanes are {}",
                index, lane, available
            ),
        }
    }
}

impl Error for SequenceError {}

/// The handshake check that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Check {
    PowerGood,
    PllLock,
    ResetOver,
    ResetStable,
}

impl Display for Check {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Check::PowerGood => "power good",
            Check::PllLock => "PLL lock",
            Check::ResetOver => "reset over",
            Check::ResetStable => "reset stable",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeFailure {
    pub check: Check,
    pub lanes: LaneSet,
    /// Whether the live bit was low, as opposed to only an edge being seen.
    pub live_lost: bool,
    /// Watchdog attempts made before giving up.
    pub attempts: Option<u32>,
}

impl Display for HandshakeFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} check failed on lanes {}", self.check, self.lanes)?;
        if let Some(attempts) = self.attempts {
            write!(f, " after {} attempts", attempts)?;
        }
        if !self.live_lost {
            write!(f, " (unexpected edge)")?;
        }
        Ok(())
    }
}

impl Error for HandshakeFailure {}

/// Errors that may occur while a step is executed.
#[derive(Debug)]
pub enum EngineError {
    Io(io::Error),
    Decode(DecodeError),
    Handshake(HandshakeFailure),
    /// The core has no register for the requested operation.
    Unsupported(&'static str),
    Aborted,
}

impl From<io::Error> for EngineError {
    fn from(value: io::Error) -> Self {
        EngineError::Io(value)
    }
}

impl From<DecodeError> for EngineError {
    fn from(value: DecodeError) -> Self {
        EngineError::Decode(value)
    }
}

impl From<HandshakeFailure> for EngineError {
    fn from(value: HandshakeFailure) -> Self {
        EngineError::Handshake(value)
    }
}

impl Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Io(error) => write!(f, "Register access failed: {}", error),
            EngineError::Decode(error) => write!(f, "{}", error),
            EngineError::Handshake(failure) => write!(f, "{}", failure),
            EngineError::Unsupported(operation) => {
                write!(f, "Operation not supported by this core: {}", operation)
            }
            EngineError::Aborted => write!(f, "Aborted"),
        }
    }
}

impl Error for EngineError {}

/// Errors reported by `pre_setup`.
#[derive(Debug)]
pub enum SetupError {
    Config(ConfigError),
    Sequence(Vec<SequenceError>),
}

impl From<ConfigError> for SetupError {
    fn from(value: ConfigError) -> Self {
        SetupError::Config(value)
    }
}

impl From<Vec<SequenceError>> for SetupError {
    fn from(value: Vec<SequenceError>) -> Self {
        SetupError::Sequence(value)
    }
}

impl Display for SetupError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SetupError::Config(error) => write!(f, "{}", error),
            SetupError::Sequence(errors) => {
                write!(f, "Invalid test sequence ({} errors)", errors.len())?;
                for error in errors {
                    write!(f, "\n  - {}", error)?;
                }
                Ok(())
            }
        }
    }
}

impl Error for SetupError {}
