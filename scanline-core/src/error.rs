use scanline_model::ModelError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid scan configuration: {0}")]
    InvalidConfig(#[from] ModelError),

    /// The scanner executable could not be located or spawned.
    #[error("Failed to launch scanner: {0}")]
    ProcessLaunch(String),

    #[error("process exited with code {0}")]
    ProcessExit(i32),

    #[error("Scan not found: {0}")]
    NotFound(String),

    #[error("Unsupported export format: {0}")]
    UnsupportedExportFormat(String),

    #[error("Invalid workflow pattern `{name}`: {source}")]
    InvalidPattern {
        name: &'static str,
        #[source]
        source: regex::Error,
    },
}

impl ScanError {
    pub fn launch(reason: impl Into<String>) -> Self {
        ScanError::ProcessLaunch(reason.into())
    }

    pub fn not_found(id: impl std::fmt::Display) -> Self {
        ScanError::NotFound(id.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ScanError>;
