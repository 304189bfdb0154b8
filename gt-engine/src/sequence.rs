//! Test sequence compiler.
//!
//! A test sequence is an ordered list of `(duration, mode)` entries. Compilation checks every
//! entry against the modes and duration range of the transceiver kind and produces typed
//! [`TestStep`]s.
use std::fmt::Display;

use crate::{error::SequenceError, kind::TransceiverKind, lane::LaneSet};

/// Shortest accepted step duration in seconds.
pub const MIN_DURATION: u32 = 1;

const INSERT_ERROR_PREFIX: &str = "insert_error_lane_";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Run,
    ConfigureLink,
    TxRxReset,
    TxReset,
    RxReset,
    TxDatapathReset,
    RxDatapathReset,
    ClearStatus,
    CheckStatus,
    InsertError(u8),
}

impl Command {
    pub fn is_reset(self) -> bool {
        matches!(
            self,
            Command::TxRxReset
                | Command::TxReset
                | Command::RxReset
                | Command::TxDatapathReset
                | Command::RxDatapathReset
        )
    }
}

impl Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::InsertError(lane) => write!(f, "InsertError(lane {})", lane),
            other => write!(f, "{:?}", other),
        }
    }
}

/// Test sequence entry as provided by the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawStep {
    pub duration: u32,
    pub mode: String,
}

impl RawStep {
    pub fn new(duration: u32, mode: impl Into<String>) -> RawStep {
        RawStep {
            duration,
            mode: mode.into(),
        }
    }
}

/// A validated step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestStep {
    pub duration: u32,
    pub command: Command,
    provided: String,
    extrapolated: String,
}

impl TestStep {
    /// The entry as the user wrote it.
    pub fn provided(&self) -> &str {
        &self.provided
    }

    /// The entry as the engine understood it.
    pub fn extrapolated(&self) -> &str {
        &self.extrapolated
    }
}

/// Mode names accepted by `kind`, excluding the per-lane error injection modes.
pub fn mode_table(kind: TransceiverKind) -> &'static [(&'static str, Command)] {
    match kind {
        TransceiverKind::GtPrbs => &[
            ("run", Command::Run),
            ("conf_25gbe", Command::ConfigureLink),
            ("tx_rx_rst", Command::TxRxReset),
            ("check_status", Command::CheckStatus),
            ("clear_status", Command::ClearStatus),
        ],
        TransceiverKind::GtLpbk => &[
            ("run", Command::Run),
            ("conf_25gbe_no_fec", Command::ConfigureLink),
            ("tx_rx_rst", Command::TxRxReset),
        ],
        TransceiverKind::Gtf | TransceiverKind::Gtm | TransceiverKind::Gtyp => &[
            ("run", Command::Run),
            ("conf_gt", Command::ConfigureLink),
            ("tx_rx_rst", Command::TxRxReset),
            ("tx_rst", Command::TxReset),
            ("rx_rst", Command::RxReset),
            ("tx_datapath_rst", Command::TxDatapathReset),
            ("rx_datapath_rst", Command::RxDatapathReset),
            ("check_status", Command::CheckStatus),
            ("clear_status", Command::ClearStatus),
        ],
    }
}

fn supports_error_injection(kind: TransceiverKind) -> bool {
    kind != TransceiverKind::GtLpbk
}

fn supported_modes(kind: TransceiverKind, available: LaneSet) -> Vec<String> {
    let mut modes: Vec<String> = mode_table(kind)
        .iter()
        .map(|(name, _)| name.to_string())
        .collect();
    if supports_error_injection(kind) {
        modes.extend(
            available
                .iter()
                .map(|lane| format!("{}{}", INSERT_ERROR_PREFIX, lane)),
        );
    }
    modes
}

fn parse_mode(
    kind: TransceiverKind,
    available: LaneSet,
    index: usize,
    mode: &str,
) -> Result<Command, SequenceError> {
    let lower = mode.trim().to_ascii_lowercase();
    if let Some((_, command)) = mode_table(kind).iter().find(|(name, _)| *name == lower) {
        return Ok(*command);
    }
    let unknown = || SequenceError::UnknownMode {
        index,
        mode: mode.to_string(),
        supported: supported_modes(kind, available),
    };
    let lane = lower
        .strip_prefix(INSERT_ERROR_PREFIX)
        .filter(|_| supports_error_injection(kind))
        .ok_or_else(unknown)?
        .parse::<u8>()
        .map_err(|_| unknown())?;
    if !available.contains(lane) {
        return Err(SequenceError::LaneOutOfRange {
            index,
            lane,
            available,
        });
    }
    Ok(Command::InsertError(lane))
}

/// Compile `steps` for a core of the given kind.
///
/// Errors are accumulated. Compilation stops once more than `max_errors` errors were found.
pub fn compile(
    kind: TransceiverKind,
    available: LaneSet,
    steps: &[RawStep],
    max_errors: usize,
) -> Result<Vec<TestStep>, Vec<SequenceError>> {
    if steps.is_empty() {
        return Err(vec![SequenceError::Empty]);
    }

    let max_duration = kind.max_duration();
    let mut compiled = Vec::with_capacity(steps.len());
    let mut errors = Vec::new();

    for (i, raw) in steps.iter().enumerate() {
        let index = i + 1;
        let mut valid = true;

        if raw.duration < MIN_DURATION || raw.duration > max_duration {
            errors.push(SequenceError::DurationOutOfRange {
                index,
                duration: raw.duration,
                min: MIN_DURATION,
                max: max_duration,
            });
            valid = false;
        }

        match parse_mode(kind, available, index, &raw.mode) {
            Ok(command) if valid => {
                let provided = format!("\"duration\": {}, \"mode\": \"{}\"", raw.duration, raw.mode);
                let extrapolated = format!(
                    "\"duration\": {}, \"mode\": \"{}\" ({})",
                    raw.duration,
                    raw.mode.trim().to_ascii_lowercase(),
                    command
                );
                compiled.push(TestStep {
                    duration: raw.duration,
                    command,
                    provided,
                    extrapolated,
                });
            }
            Ok(_) => {}
            Err(error) => errors.push(error),
        }

        if errors.len() > max_errors {
            log::error!(
                "Too many errors in test sequence, stopped after step {} of {}",
                index,
                steps.len()
            );
            break;
        }
    }

    if errors.is_empty() {
        log::debug!("Compiled {} test steps for {}", compiled.len(), kind);
        Ok(compiled)
    } else {
        Err(errors)
    }
}

/// Sequence used when none is given.
pub fn default_sequence(kind: TransceiverKind) -> Vec<RawStep> {
    match kind {
        TransceiverKind::GtLpbk => vec![
            RawStep::new(1, "conf_25gbe_no_fec"),
            RawStep::new(1, "tx_rx_rst"),
            RawStep::new(60, "run"),
        ],
        TransceiverKind::GtPrbs => vec![
            RawStep::new(1, "conf_25gbe"),
            RawStep::new(1, "tx_rx_rst"),
            RawStep::new(1, "clear_status"),
            RawStep::new(60, "run"),
            RawStep::new(1, "check_status"),
        ],
        TransceiverKind::Gtf | TransceiverKind::Gtm | TransceiverKind::Gtyp => vec![
            RawStep::new(1, "conf_gt"),
            RawStep::new(1, "tx_rx_rst"),
            RawStep::new(1, "clear_status"),
            RawStep::new(60, "run"),
            RawStep::new(1, "check_status"),
        ],
    }
}
