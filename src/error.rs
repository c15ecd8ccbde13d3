//! Error types for loading, building and validating form trees.

use std::path::PathBuf;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// Errors while loading a schema or data document.
#[derive(Debug, Error)]
pub enum LoadError {
    // IO errors (exit code 3)
    #[error("file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("cannot read {path}: {source}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[cfg(feature = "remote")]
    #[error("failed to fetch {url}: {source}")]
    NetworkError {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    // Parse errors (exit code 2)
    #[error("invalid JSON: {source}")]
    InvalidJson {
        #[source]
        source: serde_json::Error,
    },
}

/// Hard failures of the form API.
///
/// Expression failures, unresolvable paths and injection cycles are not
/// errors; the engine degrades to defaults for those.
#[derive(Debug, Error)]
pub enum FormError {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error("invalid schema: {message}")]
    InvalidSchema { message: String },

    #[error("validator failed to compile schema: {message}")]
    ValidatorCompile { message: String },

    #[error("no node at {path}")]
    NodeNotFound { path: String },

    #[error("node at {path} is not an array")]
    NotAnArray { path: String },

    #[error("array at {path} already holds maxItems ({max}) items")]
    MaxItems { path: String, max: usize },

    #[error("no item {index} in array at {path}")]
    IndexOutOfBounds { path: String, index: usize },
}

/// Errors from the validate workflow.
#[derive(Debug, Error)]
pub enum ValidateError {
    #[error(transparent)]
    Form(#[from] FormError),

    #[error("validation failed with {} error(s)", errors.len())]
    Invalid { errors: Vec<JsonSchemaError> },
}

/// One validator finding, addressed by instance path.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JsonSchemaError {
    /// Failing keyword (`required`, `type`, …).
    pub keyword: String,
    /// JSON Pointer (RFC 6901) to the invalid value.
    pub instance_path: String,
    /// JSON Pointer to the failing keyword in the schema.
    pub schema_path: String,
    /// Keyword-specific details.
    pub params: Value,
    /// Human-readable message.
    pub message: String,
}

impl std::fmt::Display for JsonSchemaError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.instance_path, self.message)
    }
}

impl LoadError {
    /// Returns the exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self {
            LoadError::FileNotFound { .. } | LoadError::ReadError { .. } => 3,
            #[cfg(feature = "remote")]
            LoadError::NetworkError { .. } => 3,
            LoadError::InvalidJson { .. } => 2,
        }
    }
}

impl FormError {
    /// Returns the exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self {
            FormError::Load(e) => e.exit_code(),
            _ => 2,
        }
    }
}

impl ValidateError {
    /// Returns the exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self {
            ValidateError::Form(e) => e.exit_code(),
            ValidateError::Invalid { .. } => 1,
        }
    }
}
