use thiserror::Error;

#[derive(Debug, Error)]
pub enum PracticeError {
    #[error("Invalid input: {0}")]
    Validation(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Invalid state: {0}")]
    State(String),
    #[error("Storage error: {0}")]
    Persistence(#[from] rusqlite::Error),
}

impl PracticeError {
    pub fn validation(msg: impl Into<String>) -> Self {
        PracticeError::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        PracticeError::NotFound(msg.into())
    }

    pub fn state(msg: impl Into<String>) -> Self {
        PracticeError::State(msg.into())
    }

    // Stable label for JSON output
    pub fn kind(&self) -> &'static str {
        match self {
            PracticeError::Validation(_) => "validation",
            PracticeError::NotFound(_) => "not_found",
            PracticeError::State(_) => "state",
            PracticeError::Persistence(_) => "persistence",
        }
    }
}

pub type Result<T> = std::result::Result<T, PracticeError>;
