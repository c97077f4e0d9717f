use thiserror::Error;

/// Errors produced by model constructors and validation routines.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("invalid task type: {0}")]
    InvalidTaskType(String),

    #[error("invalid task payload: {0}")]
    InvalidPayload(String),

    #[error("invalid priority: {0}")]
    InvalidPriority(String),

    #[error("invalid storage strategy: {0}")]
    InvalidStrategy(String),

    #[error("cell ({row},{col}) is outside the {rows}x{cols} grid")]
    OutOfGrid {
        row: u8,
        col: u8,
        rows: u8,
        cols: u8,
    },
}

pub type Result<T> = std::result::Result<T, ModelError>;
