use crate::session::SessionState;

/// Errors raised by the buffer exchange and the session state machine.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Operation attempted in the wrong lifecycle phase
    #[error("invalid state: {op} not allowed in {state:?}")]
    InvalidState { op: &'static str, state: SessionState },

    /// Buffer handoff contract violated
    #[error("invalid slot {index}: {reason}")]
    InvalidSlot { index: usize, reason: &'static str },

    /// No buffer became available within the timeout
    #[error("timed out waiting for a buffer")]
    Timeout,

    /// Unrecoverable device-level error
    #[error("device failure: {0}")]
    DeviceFailure(String),

    /// A pending call was unblocked by cancellation
    #[error("cancelled")]
    Cancelled,
}

impl CodecError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, CodecError::Timeout)
    }

    /// Whether the error came from the underlying device rather than the caller.
    pub fn is_fatal(&self) -> bool {
        matches!(self, CodecError::DeviceFailure(_))
    }
}

pub type Result<T> = std::result::Result<T, CodecError>;
