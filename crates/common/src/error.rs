//! Error types shared across mdim crates.

/// Top-level error type for export operations.
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    /// Settings were rejected before a run could start.
    #[error("Invalid export settings: {message}")]
    Validation { message: String },

    /// The codec/container combination is not encodable on this runtime.
    #[error("Unsupported codec: {message}")]
    UnsupportedCodec { message: String },

    #[error("Render error: {message}")]
    Render { message: String },

    #[error("Encode error: {message}")]
    Encode { message: String },

    /// The user cancelled the run. Not surfaced as a failure.
    #[error("Export aborted by user")]
    Aborted,

    #[error("An export is already running")]
    Busy,

    #[error("Invalid export status transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias using ExportError.
pub type ExportResult<T> = Result<T, ExportError>;

impl ExportError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    pub fn unsupported_codec(msg: impl Into<String>) -> Self {
        Self::UnsupportedCodec {
            message: msg.into(),
        }
    }

    pub fn render(msg: impl Into<String>) -> Self {
        Self::Render {
            message: msg.into(),
        }
    }

    pub fn encode(msg: impl Into<String>) -> Self {
        Self::Encode {
            message: msg.into(),
        }
    }

    pub fn invalid_transition(from: impl ToString, to: impl ToString) -> Self {
        Self::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sources_convert_transparently() {
        let err = ExportError::from(std::io::Error::other("disk full"));
        assert!(matches!(err, ExportError::Io(_)));
        assert_eq!(err.to_string(), "disk full");

        let err: ExportError = serde_json::from_str::<u32>("nope").unwrap_err().into();
        assert!(matches!(err, ExportError::Json(_)));
    }

    #[test]
    fn test_messages_carry_raw_cause() {
        let err = ExportError::render("context lost");
        assert_eq!(err.to_string(), "Render error: context lost");

        let err = ExportError::invalid_transition("Encoding", "Rendering");
        assert_eq!(
            err.to_string(),
            "Invalid export status transition: Encoding -> Rendering"
        );
    }
}
