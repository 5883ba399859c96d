use std::fmt;

use thiserror::Error;

/// Error type for formula parsing and evaluation.
#[derive(Error, Debug, Clone, PartialEq, uniffi::Error)]
#[uniffi(flat_error)]
pub enum FormulaError {
    #[error("parse error at position {position}: {message}")]
    ParseError { position: u32, message: String },

    #[error("empty expression")]
    EmptyExpression,

    #[error("expression is {length} bytes, limit is {limit}")]
    TooLong { length: u32, limit: u32 },

    #[error("parentheses nested deeper than {limit}")]
    NestingTooDeep { limit: u32 },

    #[error("unknown parameter: {0}")]
    UnknownVariable(String),

    #[error("division by zero")]
    DivisionByZero,

    #[error("result is not a finite number")]
    NonFiniteResult,

    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    #[error("evaluation exceeded its {budget_ms} ms budget")]
    Timeout { budget_ms: u64 },
}

/// Coarse failure category of a [`FormulaError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    Parse,
    Evaluation,
    TypeMismatch,
    Timeout,
}

impl FormulaError {
    pub fn kind(&self) -> FailureKind {
        match self {
            FormulaError::ParseError { .. }
            | FormulaError::EmptyExpression
            | FormulaError::TooLong { .. }
            | FormulaError::NestingTooDeep { .. } => FailureKind::Parse,
            FormulaError::UnknownVariable(_)
            | FormulaError::DivisionByZero
            | FormulaError::NonFiniteResult => FailureKind::Evaluation,
            FormulaError::TypeMismatch { .. } => FailureKind::TypeMismatch,
            FormulaError::Timeout { .. } => FailureKind::Timeout,
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureKind::Parse => "ParseError",
            FailureKind::Evaluation => "EvaluationError",
            FailureKind::TypeMismatch => "TypeMismatch",
            FailureKind::Timeout => "Timeout",
        };
        f.write_str(name)
    }
}

/// Errors raised by a [`crate::storage::Storage`] backend.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("corrupt {column} value {value:?}: {reason}")]
    Corrupt {
        column: &'static str,
        value: String,
        reason: String,
    },

    #[error("{entity} conflicts with existing data: {reason}")]
    Conflict { entity: &'static str, reason: String },

    #[error("migration {version} failed: {reason}")]
    Migration { version: i64, reason: String },
}

/// Errors surfaced by [`crate::service::CalibrationService`].
///
/// Formula failures never appear here; the calibration engine turns them
/// into omitted values.
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("invalid {field}: {reason}")]
    Validation { field: &'static str, reason: String },

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl ServiceError {
    pub(crate) fn not_found(entity: &'static str, id: impl fmt::Display) -> Self {
        ServiceError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub(crate) fn validation(field: &'static str, reason: impl Into<String>) -> Self {
        ServiceError::Validation {
            field,
            reason: reason.into(),
        }
    }
}

/// Errors loading or validating a [`crate::config::ServiceConfig`].
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}
