use thiserror::Error;

pub type Result<T> = std::result::Result<T, GenaiError>;

#[derive(Error, Debug)]
pub enum GenaiError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unable to detect input format: {0}")]
    FormatDetection(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Model service error: {0}")]
    Service(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("No such column: {0}")]
    MissingColumn(String),

    #[error("Column '{column}': expected {expected}, got {actual}")]
    TypeMismatch {
        column: String,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("Data integrity error: {0}")]
    Integrity(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

pub mod commands;
pub mod config;
pub mod gemini;
pub mod pipeline;
pub mod search;
pub mod store;
pub mod table;
pub mod vector;
