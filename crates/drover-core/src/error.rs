//! Core error types

use thiserror::Error;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum CoreError {
    #[error("merge conflict at {side}{path}: expected {expected}, found {found}")]
    MergeTypeMismatch {
        side: &'static str,
        path: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("can't set field {path}: {message}")]
    FieldPath { path: String, message: String },

    #[error("invalid last-applied annotation: {0}")]
    LastApplied(#[source] serde_json::Error),

    #[error("failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;
