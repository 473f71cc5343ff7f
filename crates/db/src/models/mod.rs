//! Row structs for the workflow tables.
//!
//! Each submodule holds `FromRow` structs matching a table's columns and the
//! conversions into the `cadence-core` domain types.

pub mod approval;
pub mod audit;
pub mod delegation;
pub mod instance;
pub mod status;
pub mod user;
pub mod workflow;

/// Raised when a stored value cannot be mapped onto a domain type.
#[derive(Debug, thiserror::Error)]
pub enum RowError {
    #[error("Unknown {kind} '{value}' in column {column}")]
    UnknownValue {
        kind: &'static str,
        column: &'static str,
        value: String,
    },

    #[error("Invalid JSON in column {column}: {message}")]
    InvalidJson {
        column: &'static str,
        message: String,
    },
}
