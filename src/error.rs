use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// A single rejected field of a transaction payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

impl FieldError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Errors raised by the transaction store and importer.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("invalid transaction: {}", join_fields(.0))]
    Validation(Vec<FieldError>),

    #[error("transaction {0} not found")]
    NotFound(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("malformed stored row: {0}")]
    CorruptRow(String),

    #[error("database connection lock poisoned")]
    LockPoisoned,
}

fn join_fields(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

pub type LedgerResult<T> = Result<T, LedgerError>;
