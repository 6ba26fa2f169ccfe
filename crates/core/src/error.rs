use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("index {index} out of range for length {len}")]
    OutOfRange { index: usize, len: usize },

    #[error("malformed batch: {0}")]
    MalformedBatch(String),

    #[error("operation cancelled")]
    Cancelled,
}

impl EngineError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        EngineError::InvalidInput(message.into())
    }

    pub(crate) fn malformed(message: impl Into<String>) -> Self {
        EngineError::MalformedBatch(message.into())
    }

    /// Structural errors abort a whole batch call instead of being reported per cloud.
    pub fn is_structural(&self) -> bool {
        matches!(self, EngineError::MalformedBatch(_))
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

pub(crate) fn check_index(index: usize, len: usize) -> Result<usize> {
    if index < len {
        Ok(index)
    } else {
        Err(EngineError::OutOfRange { index, len })
    }
}
