use serde::{Deserialize, Serialize};
use std::fmt;

/// Failure classes the core distinguishes. Derived from the error code prefix so every
/// call site only has to pick a code.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Fatal at startup (e.g. embedding dimension mismatch). Not recoverable per request.
    Configuration,
    /// Scoped to one document's ingestion.
    Document,
    /// Vector storage unreachable or corrupt. The request fails with no partial write.
    IndexUnavailable,
    /// Embedding or generation backend unreachable or timed out.
    ModelUnavailable,
    /// Generation output did not match the section contract. Recovered by fallback.
    SchemaParse,
    /// Malformed or conflicting request (empty query, concurrent re-ingest).
    InvalidRequest,
}

/// Single structured error shape used across the core and exposed to collaborators.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppError {
    pub code: String,
    pub message: String,
    pub details: Option<String>,
    pub retryable: bool,
}

/// What a caller sees when a query or ingest request fails.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorResponse {
    pub kind: ErrorKind,
    pub code: String,
    pub message: String,
}

impl AppError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
            retryable: false,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    pub fn kind(&self) -> ErrorKind {
        let code = self.code.as_str();
        if code.starts_with("CONFIG_") {
            ErrorKind::Configuration
        } else if code.starts_with("DOCUMENT_") {
            ErrorKind::Document
        } else if code.starts_with("INDEX_") || code.starts_with("DB_") {
            ErrorKind::IndexUnavailable
        } else if code.starts_with("MODEL_") {
            ErrorKind::ModelUnavailable
        } else if code.starts_with("SCHEMA_") {
            ErrorKind::SchemaParse
        } else {
            ErrorKind::InvalidRequest
        }
    }

    pub fn is_fatal_configuration(&self) -> bool {
        self.kind() == ErrorKind::Configuration
    }

    pub fn to_response(&self) -> ErrorResponse {
        ErrorResponse {
            kind: self.kind(),
            code: self.code.clone(),
            message: self.message.clone(),
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for AppError {}
