// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use reqwest::StatusCode;

/// Destination name could not be normalized.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NameError {
    #[error("Empty name is not allowed")]
    Empty,
}

/// Errors surfaced by a journal implementation.
#[derive(Debug, thiserror::Error)]
pub enum JournalError {
    #[error("Journal {0} is already disposed")]
    Disposed(String),

    #[error("Chunk {chunk} was rejected by the flush handler: {source}")]
    Handler {
        chunk: String,
        #[source]
        source: ImportError,
    },

    #[error("Journal I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors returned by the remote bulk-import sink.
#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    /// The blob could not be prepared for upload. Retrying will not help.
    #[error("Failed to prepare payload: {0}")]
    Payload(String),

    /// The destination rejected the request or could not be reached.
    #[error("Error shipping data: {0:?} {1}")]
    Destination(Option<StatusCode>, String),
}

impl From<reqwest::Error> for ImportError {
    fn from(err: reqwest::Error) -> Self {
        ImportError::Destination(err.status(), err.to_string())
    }
}

/// Top-level errors of the output stage.
#[derive(Debug, thiserror::Error)]
pub enum OutputError {
    #[error("Invalid destination name: {0}")]
    InvalidName(#[from] NameError),

    #[error(transparent)]
    Journal(#[from] JournalError),

    #[error("Failed to encode records: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to construct output: {0}")]
    Construction(String),

    #[error("Output already started")]
    AlreadyStarted,

    #[error("Output is shutting down")]
    ShuttingDown,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = OutputError::InvalidConfig("missing API key".to_string());
        assert_eq!(error.to_string(), "Invalid configuration: missing API key");

        let error = OutputError::from(NameError::Empty);
        assert_eq!(
            error.to_string(),
            "Invalid destination name: Empty name is not allowed"
        );
    }

    #[test]
    fn test_handler_error_keeps_source() {
        let error = JournalError::Handler {
            chunk: "c1".to_string(),
            source: ImportError::Destination(
                Some(StatusCode::SERVICE_UNAVAILABLE),
                "unavailable".to_string(),
            ),
        };
        let source = std::error::Error::source(&error).expect("source should be kept");
        assert!(source.to_string().contains("503"));
        assert!(error.to_string().starts_with("Chunk c1 was rejected"));
    }
}
