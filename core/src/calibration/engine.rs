use std::time::Duration;

use crate::calibration::context::{DifferentialContext, LogContext, Measurement};
use crate::formula::Evaluator;
use crate::models::{CalibrationLog, LawnService};

/// Computes calibration values for a log from its lawn service formulas.
///
/// Formula failures of any kind are logged and turned into omitted values:
/// an unset `current_calibration`, or a zero `calibration` on the record.
#[derive(Debug, Clone, Copy, Default)]
pub struct CalibrationEngine {
    evaluator: Evaluator,
}

impl CalibrationEngine {
    pub fn new(evaluator: Evaluator) -> Self {
        Self { evaluator }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self::new(Evaluator::new(timeout))
    }

    pub fn evaluator(&self) -> &Evaluator {
        &self.evaluator
    }

    /// Log-level value from the first and latest measurement.
    ///
    /// `measurements` must be in ascending creation order.
    pub fn current_calibration(&self, formula: &str, measurements: &[Measurement]) -> Option<f64> {
        if is_blank(formula) {
            return None;
        }
        let context = LogContext::from_measurements(measurements)?;
        match self.evaluator.evaluate(formula, &context) {
            Ok(value) => Some(value),
            Err(err) => {
                tracing::warn!(
                    kind = %err.kind(),
                    error = %err,
                    formula,
                    "calibration function failed; value omitted"
                );
                None
            }
        }
    }

    /// One value per measurement, each relative to its predecessor.
    ///
    /// The result always has the same length as `measurements`. Entries whose
    /// evaluation fails stay at zero and do not stop the remaining ones.
    pub fn differential_calibrations(&self, formula: &str, measurements: &[Measurement]) -> Vec<f64> {
        let mut values = vec![0.0; measurements.len()];
        if is_blank(formula) {
            return values;
        }

        for (index, slot) in values.iter_mut().enumerate() {
            let Some(context) = DifferentialContext::at(measurements, index) else {
                continue;
            };
            match self.evaluator.evaluate(formula, &context) {
                Ok(value) => *slot = value,
                Err(err) => {
                    tracing::debug!(
                        index,
                        kind = %err.kind(),
                        error = %err,
                        "differential calibration failed; record left at zero"
                    );
                }
            }
        }
        values
    }

    /// Fill the transient calibration fields of `log` in place.
    ///
    /// Previously computed values are cleared first, so applying twice gives
    /// the same result as applying once.
    pub fn apply(&self, service: &LawnService, log: &mut CalibrationLog) {
        let _span = tracing::debug_span!(
            "apply_calibration",
            log_id = %log.id,
            lawn_service = %service.code
        )
        .entered();

        log.current_calibration = None;
        for record in &mut log.records {
            record.calibration = 0.0;
        }

        let measurements: Vec<Measurement> = log.records.iter().map(Measurement::from).collect();
        log.current_calibration =
            self.current_calibration(&service.calibration_function, &measurements);

        let values = self.differential_calibrations(
            &service.differential_calibration_function,
            &measurements,
        );
        for (record, value) in log.records.iter_mut().zip(values) {
            record.calibration = value;
        }
    }
}

fn is_blank(formula: &str) -> bool {
    formula.trim().is_empty()
}
