//! Error types shared by the tape, the engine and the config loader.

use std::fmt;
use std::path::PathBuf;

use crate::tape::Direction;

/// Errors raised by [`Tape`](crate::Tape) operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TapeError {
    /// `value_at` was asked for a cell outside `[0, capacity)`.
    #[error("Cell index {index} out of range (capacity {capacity})")]
    IndexOutOfRange { index: usize, capacity: usize },

    /// The pointer tried to leave the tape under the strict pointer policy.
    #[error("Pointer out of bounds moving {direction} from {pointer}")]
    PointerOutOfBounds { pointer: usize, direction: Direction },

    /// A blocking wait was interrupted by the cancel handle.
    #[error("Cancelled while waiting")]
    Cancelled,
}

/// Errors that abort [`Engine::step`](crate::Engine::step) or [`Engine::run`](crate::Engine::run).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    /// The data pointer attempted to move left of cell 0 or beyond the last cell.
    #[error("Pointer out of bounds at instruction {ip} (ptr={ptr}, op='{op}')")]
    PointerOutOfBounds { ip: usize, ptr: usize, op: char },

    /// A bracket scan found no partner (strict bracket mode only).
    #[error("Unmatched bracket {kind} at instruction {ip}")]
    UnmatchedBracket { ip: usize, kind: UnmatchedBracketKind },

    /// Execution aborted due to step limit.
    #[error("Execution aborted: step limit exceeded ({limit})")]
    StepLimitExceeded { limit: usize },

    /// Execution aborted by the cancel handle, either between steps, while
    /// blocked on input, or during the step delay.
    #[error("Execution aborted: cancelled at instruction {ip}")]
    Cancelled { ip: usize },
}

impl EngineError {
    /// Instruction index the error refers to, if any.
    pub fn ip(&self) -> Option<usize> {
        match self {
            EngineError::PointerOutOfBounds { ip, .. }
            | EngineError::UnmatchedBracket { ip, .. }
            | EngineError::Cancelled { ip } => Some(*ip),
            EngineError::StepLimitExceeded { .. } => None,
        }
    }
}

/// Which side of the loop was unmatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnmatchedBracketKind {
    Open,
    Close,
}

impl fmt::Display for UnmatchedBracketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnmatchedBracketKind::Open => write!(f, "'['"),
            UnmatchedBracketKind::Close => write!(f, "']'"),
        }
    }
}

/// Errors produced while loading [`Config`](crate::Config).
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid value for {key}: '{value}'")]
    InvalidValue { key: String, value: String },
}
