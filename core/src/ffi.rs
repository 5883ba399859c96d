//! Foreign bindings so field apps can compute calibrations offline with the
//! same engine as the service.

use std::collections::HashMap;
use std::time::Duration;

use crate::calibration::{CalibrationEngine, Measurement, DIFFERENTIAL_PARAMETERS, LOG_PARAMETERS};
use crate::error::FormulaError;
use crate::formula::{self, Evaluator, DEFAULT_TIMEOUT};

#[derive(Debug, Clone, Copy, PartialEq, uniffi::Record)]
pub struct MeasurementInput {
    pub value: f64,
    pub area: u32,
}

#[derive(Debug, Clone, PartialEq, uniffi::Record)]
pub struct CalibrationSummary {
    pub current_calibration: Option<f64>,
    pub record_calibrations: Vec<f64>,
}

fn budget(timeout_ms: Option<u64>) -> Duration {
    timeout_ms.map_or(DEFAULT_TIMEOUT, Duration::from_millis)
}

/// Evaluate `expression` against named parameters.
#[uniffi::export]
pub fn evaluate_formula(
    expression: String,
    parameters: HashMap<String, f64>,
    timeout_ms: Option<u64>,
) -> Result<f64, FormulaError> {
    let lookup = |name: &str| parameters.get(name).copied();
    Evaluator::new(budget(timeout_ms)).evaluate(&expression, &lookup)
}

#[uniffi::export]
pub fn validate_formula(expression: String) -> Result<(), FormulaError> {
    formula::validate(&expression)
}

/// Run both lawn service formulas over measurements in creation order.
#[uniffi::export]
pub fn compute_calibration(
    calibration_function: String,
    differential_calibration_function: String,
    measurements: Vec<MeasurementInput>,
    timeout_ms: Option<u64>,
) -> CalibrationSummary {
    let engine = CalibrationEngine::with_timeout(budget(timeout_ms));
    let measurements: Vec<Measurement> = measurements
        .iter()
        .map(|m| Measurement::new(m.value, m.area))
        .collect();
    CalibrationSummary {
        current_calibration: engine.current_calibration(&calibration_function, &measurements),
        record_calibrations: engine
            .differential_calibrations(&differential_calibration_function, &measurements),
    }
}

/// Parameter names bound for the primary or the differential formula.
#[uniffi::export]
pub fn supported_parameters(differential: bool) -> Vec<String> {
    let names: &[&str] = if differential {
        &DIFFERENTIAL_PARAMETERS
    } else {
        &LOG_PARAMETERS
    };
    names.iter().map(|name| name.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureKind;

    #[test]
    fn test_evaluate_formula() {
        let params: HashMap<String, f64> = [
            ("current_amount".to_string(), 15.0),
            ("current_area".to_string(), 100.0),
        ]
        .into_iter()
        .collect();
        let value =
            evaluate_formula("current_amount / current_area".into(), params.clone(), None).unwrap();
        assert!((value - 0.15).abs() < 1e-12);

        let err = evaluate_formula("last_amount".into(), params, None).unwrap_err();
        assert_eq!(err.kind(), FailureKind::Evaluation);
    }

    #[test]
    fn test_validate_formula() {
        assert!(validate_formula("current_amount / current_area".into()).is_ok());
        assert!(validate_formula("invalid_function +".into()).is_err());
    }

    #[test]
    fn test_compute_calibration() {
        let summary = compute_calibration(
            "current_amount / current_area".into(),
            "current_amount - previous_amount".into(),
            vec![
                MeasurementInput { value: 10.0, area: 50 },
                MeasurementInput { value: 15.0, area: 100 },
            ],
            Some(100),
        );
        assert!((summary.current_calibration.unwrap() - 0.15).abs() < 1e-12);
        assert_eq!(summary.record_calibrations, vec![10.0, 5.0]);

        let empty = compute_calibration("current_amount".into(), String::new(), vec![], None);
        assert_eq!(empty.current_calibration, None);
        assert!(empty.record_calibrations.is_empty());
    }

    #[test]
    fn test_supported_parameters() {
        assert_eq!(
            supported_parameters(false),
            vec!["first_amount", "current_amount", "first_area", "current_area"]
        );
        assert!(supported_parameters(true).contains(&"previous_area".to_string()));
    }
}
