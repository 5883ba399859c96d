//! QC calibration evaluation for lawn-care calibration logs.
//!
//! Lawn services carry operator-written formulas; [`CalibrationEngine`]
//! evaluates them against a log's measurements under a time budget and
//! turns every formula failure into an omitted value.
//! [`CalibrationService`] wires that engine to SQLite-backed storage.

pub mod calibration;
pub mod config;
pub mod error;
pub mod ffi;
pub mod filter;
pub mod formula;
pub mod logging;
pub mod migrations;
pub mod models;
pub mod service;
pub mod sqlite;
pub mod storage;

uniffi::setup_scaffolding!();

pub use calibration::{CalibrationEngine, DifferentialContext, LogContext, Measurement};
pub use config::ServiceConfig;
pub use error::{ConfigError, FailureKind, FormulaError, ServiceError, StorageError};
pub use filter::{build_predicate, FilterField, FilterFields, Predicate, SimpleDate};
pub use formula::{evaluate_expression, validate, Evaluator};
pub use models::{
    CalibrationLog, CalibrationLogFilter, CalibrationLogId, CalibrationRecord,
    CalibrationRecordFilter, CalibrationRecordId, Formulation, FormulationId, LawnService,
    LawnServiceId, Unit, UserId,
};
pub use service::CalibrationService;
pub use sqlite::SqliteStorage;
pub use storage::Storage;
