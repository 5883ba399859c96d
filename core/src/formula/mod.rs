//! Formula engine for lawn-service calibration functions.
//!
//! Formulas are operator-supplied text, so parsing and evaluation run under
//! structural limits and a wall-clock budget.
//!
//! # Supported Grammar
//!
//! - Arithmetic: `+ - * / ( )`
//! - Comparison: `> < >= <= == !=`
//! - Boolean: `&& || !` (also `and or not`)
//! - Ternary: `cond ? a : b`
//! - Numeric literals and named parameters; no functions, no string literals
//!
//! # Example
//!
//! ```
//! use qc_calibration::formula::{validate, evaluate_expression};
//!
//! let formula = "current_amount / current_area";
//! validate(formula).expect("Formula should be valid");
//!
//! let params = |name: &str| match name {
//!     "current_amount" => Some(15.0),
//!     "current_area" => Some(100.0),
//!     _ => None,
//! };
//! let result = evaluate_expression(formula, &params).expect("Should compute");
//! assert!((result - 0.15).abs() < f64::EPSILON);
//! ```

pub mod ast;
pub mod evaluator;
pub mod parser;

use std::time::Duration;

pub use ast::{BinaryOp, Expr, UnaryOp};
pub use evaluator::{evaluate, Deadline, Value, VariableProvider};
pub use parser::{parse, MAX_EXPRESSION_LEN, MAX_NESTING_DEPTH};

use crate::error::FormulaError;

/// Default wall-clock budget for one formula evaluation.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(100);

/// Parses and evaluates formulas under a fixed time budget.
#[derive(Debug, Clone, Copy)]
pub struct Evaluator {
    timeout: Duration,
}

impl Default for Evaluator {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}

impl Evaluator {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Parse `expression`, bind `params` and return the numeric result.
    ///
    /// The budget covers parsing as well as evaluation. Non-numeric and
    /// non-finite results are rejected.
    pub fn evaluate<V: VariableProvider>(
        &self,
        expression: &str,
        params: &V,
    ) -> Result<f64, FormulaError> {
        let deadline = Deadline::start(self.timeout);
        let ast = parse(expression)?;
        let value = evaluate(&ast, params, &deadline)?;
        // A result that arrives after the budget is discarded.
        deadline.check()?;
        let number = value.as_number()?;
        if number.is_finite() {
            Ok(number)
        } else {
            Err(FormulaError::NonFiniteResult)
        }
    }
}

/// Evaluate a formula with the default budget.
pub fn evaluate_expression<V: VariableProvider>(
    expression: &str,
    params: &V,
) -> Result<f64, FormulaError> {
    Evaluator::default().evaluate(expression, params)
}

/// Validate a formula expression without evaluating it.
///
/// This checks that the formula parses correctly but does not validate
/// that all parameters exist (as that depends on context).
pub fn validate(expression: &str) -> Result<(), FormulaError> {
    parse(expression)?;
    Ok(())
}

/// Validate a formula and check that every parameter it names is available.
pub fn validate_with_parameters(expression: &str, available: &[&str]) -> Result<(), FormulaError> {
    let ast = parse(expression)?;
    match ast.variables().into_iter().find(|name| !available.contains(name)) {
        Some(missing) => Err(FormulaError::UnknownVariable(missing.to_string())),
        None => Ok(()),
    }
}
