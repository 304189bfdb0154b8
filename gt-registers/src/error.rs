use std::{error::Error, fmt::Display};

/// Errors that may occur when decoding a block of registers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    TooFewWords { expected: usize, got: usize },
}

impl Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeError::TooFewWords { expected, got } => {
                write!(f, "Register block too small! Expected {} words, but got {}", expected, got)
            }
        }
    }
}

impl Error for DecodeError {}
