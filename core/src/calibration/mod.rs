//! Calibration computation for calibration logs.
//!
//! [`context`] turns ordered records into formula parameters and [`engine`]
//! evaluates a lawn service's formulas against them.

pub mod context;
pub mod engine;

pub use context::{
    DifferentialContext, LogContext, Measurement, DIFFERENTIAL_PARAMETERS, LOG_PARAMETERS,
};
pub use engine::CalibrationEngine;
