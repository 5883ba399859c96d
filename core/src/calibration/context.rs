//! Parameter bindings for calibration formulas.
//!
//! A log-level context exposes the first and latest measurement of a log;
//! a differential context exposes one measurement and its predecessor. The
//! first record of a log has no predecessor and is measured against a zero
//! baseline.

use std::collections::HashMap;

use crate::formula::VariableProvider;
use crate::models::CalibrationRecord;

pub const FIRST_AMOUNT: &str = "first_amount";
pub const FIRST_AREA: &str = "first_area";
pub const CURRENT_AMOUNT: &str = "current_amount";
pub const CURRENT_AREA: &str = "current_area";
pub const PREVIOUS_AMOUNT: &str = "previous_amount";
pub const PREVIOUS_AREA: &str = "previous_area";

/// Names bound for the primary calibration function.
pub const LOG_PARAMETERS: [&str; 4] = [FIRST_AMOUNT, CURRENT_AMOUNT, FIRST_AREA, CURRENT_AREA];

/// Names bound for the differential calibration function.
pub const DIFFERENTIAL_PARAMETERS: [&str; 4] =
    [CURRENT_AMOUNT, CURRENT_AREA, PREVIOUS_AMOUNT, PREVIOUS_AREA];

/// The part of a calibration record formulas can see.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Measurement {
    pub value: f64,
    pub area: u32,
}

impl Measurement {
    pub fn new(value: f64, area: u32) -> Self {
        Self { value, area }
    }

    fn area_f64(&self) -> f64 {
        f64::from(self.area)
    }
}

impl From<&CalibrationRecord> for Measurement {
    fn from(record: &CalibrationRecord) -> Self {
        Self::new(record.measurement_value, record.measurement_area)
    }
}

/// Bindings for the primary calibration function.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LogContext {
    pub first_amount: f64,
    pub current_amount: f64,
    pub first_area: f64,
    pub current_area: f64,
}

impl LogContext {
    /// Build from measurements in ascending creation order; `None` when empty.
    pub fn from_measurements(measurements: &[Measurement]) -> Option<Self> {
        let first = measurements.first()?;
        let current = measurements.last()?;
        Some(Self {
            first_amount: first.value,
            current_amount: current.value,
            first_area: first.area_f64(),
            current_area: current.area_f64(),
        })
    }

    pub fn names(&self) -> &'static [&'static str] {
        &LOG_PARAMETERS
    }

    pub fn to_map(&self) -> HashMap<String, f64> {
        collect_bindings(self, self.names())
    }
}

impl VariableProvider for LogContext {
    fn get(&self, name: &str) -> Option<f64> {
        match name {
            FIRST_AMOUNT => Some(self.first_amount),
            CURRENT_AMOUNT => Some(self.current_amount),
            FIRST_AREA => Some(self.first_area),
            CURRENT_AREA => Some(self.current_area),
            _ => None,
        }
    }
}

/// Bindings for the differential calibration function at one record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DifferentialContext {
    pub current_amount: f64,
    pub current_area: f64,
    pub previous_amount: f64,
    pub previous_area: f64,
}

impl DifferentialContext {
    /// Build for `measurements[index]`; `None` when `index` is out of range.
    pub fn at(measurements: &[Measurement], index: usize) -> Option<Self> {
        let current = measurements.get(index)?;
        let previous = index
            .checked_sub(1)
            .and_then(|i| measurements.get(i))
            .copied()
            .unwrap_or_default();
        Some(Self {
            current_amount: current.value,
            current_area: current.area_f64(),
            previous_amount: previous.value,
            previous_area: previous.area_f64(),
        })
    }

    pub fn names(&self) -> &'static [&'static str] {
        &DIFFERENTIAL_PARAMETERS
    }

    pub fn to_map(&self) -> HashMap<String, f64> {
        collect_bindings(self, self.names())
    }
}

impl VariableProvider for DifferentialContext {
    fn get(&self, name: &str) -> Option<f64> {
        match name {
            CURRENT_AMOUNT => Some(self.current_amount),
            CURRENT_AREA => Some(self.current_area),
            PREVIOUS_AMOUNT => Some(self.previous_amount),
            PREVIOUS_AREA => Some(self.previous_area),
            _ => None,
        }
    }
}

fn collect_bindings<V: VariableProvider>(vars: &V, names: &[&str]) -> HashMap<String, f64> {
    names
        .iter()
        .filter_map(|name| vars.get(name).map(|v| (name.to_string(), v)))
        .collect()
}
