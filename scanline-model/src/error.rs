use std::fmt::{self, Display};

/// Errors produced by model constructors and validation routines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    InvalidConfig { field: &'static str, reason: String },
    UnknownNodeKind(String),
    UnknownEdgeKind(String),
}

impl ModelError {
    pub fn invalid_config(field: &'static str, reason: impl Into<String>) -> Self {
        ModelError::InvalidConfig {
            field,
            reason: reason.into(),
        }
    }
}

impl Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelError::InvalidConfig { field, reason } => {
                write!(f, "invalid scan config `{field}`: {reason}")
            }
            ModelError::UnknownNodeKind(kind) => {
                write!(f, "unknown workflow node type: {kind}")
            }
            ModelError::UnknownEdgeKind(kind) => {
                write!(f, "unknown workflow edge type: {kind}")
            }
        }
    }
}

impl std::error::Error for ModelError {}

pub type Result<T> = std::result::Result<T, ModelError>;
