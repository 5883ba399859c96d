use std::time::{Duration, Instant};

use crate::error::FormulaError;
use crate::formula::ast::{BinaryOp, Expr, UnaryOp};

/// Result of evaluating an expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Number(f64),
    Boolean(bool),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Number(_) => "number",
            Value::Boolean(_) => "boolean",
        }
    }

    pub fn as_number(&self) -> Result<f64, FormulaError> {
        match self {
            Value::Number(n) => Ok(*n),
            other => Err(FormulaError::TypeMismatch {
                expected: "number",
                found: other.type_name(),
            }),
        }
    }

    pub fn as_bool(&self) -> Result<bool, FormulaError> {
        match self {
            Value::Boolean(b) => Ok(*b),
            other => Err(FormulaError::TypeMismatch {
                expected: "boolean",
                found: other.type_name(),
            }),
        }
    }
}

/// Trait for providing parameter values during evaluation.
pub trait VariableProvider {
    fn get(&self, name: &str) -> Option<f64>;
}

impl<F> VariableProvider for F
where
    F: Fn(&str) -> Option<f64>,
{
    fn get(&self, name: &str) -> Option<f64> {
        self(name)
    }
}

/// Wall-clock budget shared by every step of one evaluation.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    started: Instant,
    budget: Duration,
}

impl Deadline {
    pub fn start(budget: Duration) -> Self {
        Self {
            started: Instant::now(),
            budget,
        }
    }

    pub fn budget(&self) -> Duration {
        self.budget
    }

    pub fn check(&self) -> Result<(), FormulaError> {
        if self.started.elapsed() >= self.budget {
            Err(FormulaError::Timeout {
                budget_ms: self.budget.as_millis() as u64,
            })
        } else {
            Ok(())
        }
    }
}

/// Evaluate an expression with the given parameter provider.
///
/// The deadline is checked before every node, so a timed-out evaluation
/// returns `Timeout` and whatever it had computed so far is dropped.
pub fn evaluate<V: VariableProvider>(
    expr: &Expr,
    vars: &V,
    deadline: &Deadline,
) -> Result<Value, FormulaError> {
    deadline.check()?;
    match expr {
        Expr::Number(n) => Ok(Value::Number(*n)),
        Expr::Variable(name) => vars
            .get(name)
            .map(Value::Number)
            .ok_or_else(|| FormulaError::UnknownVariable(name.clone())),
        Expr::Binary { op, left, right } => {
            let left_val = evaluate(left, vars, deadline)?;
            // && and || short-circuit on the left operand.
            match (op, &left_val) {
                (BinaryOp::And, Value::Boolean(false)) => return Ok(Value::Boolean(false)),
                (BinaryOp::Or, Value::Boolean(true)) => return Ok(Value::Boolean(true)),
                _ => {}
            }
            let right_val = evaluate(right, vars, deadline)?;
            evaluate_binary(*op, left_val, right_val)
        }
        Expr::Unary { op, expr } => {
            let val = evaluate(expr, vars, deadline)?;
            evaluate_unary(*op, val)
        }
        Expr::Ternary {
            condition,
            then_expr,
            else_expr,
        } => {
            let cond = evaluate(condition, vars, deadline)?;
            if cond.as_bool()? {
                evaluate(then_expr, vars, deadline)
            } else {
                evaluate(else_expr, vars, deadline)
            }
        }
    }
}

fn evaluate_binary(op: BinaryOp, left: Value, right: Value) -> Result<Value, FormulaError> {
    match op {
        BinaryOp::Add => Ok(Value::Number(left.as_number()? + right.as_number()?)),
        BinaryOp::Sub => Ok(Value::Number(left.as_number()? - right.as_number()?)),
        BinaryOp::Mul => Ok(Value::Number(left.as_number()? * right.as_number()?)),
        BinaryOp::Div => {
            let l = left.as_number()?;
            let r = right.as_number()?;
            if r == 0.0 {
                Err(FormulaError::DivisionByZero)
            } else {
                Ok(Value::Number(l / r))
            }
        }
        BinaryOp::Gt => Ok(Value::Boolean(left.as_number()? > right.as_number()?)),
        BinaryOp::Lt => Ok(Value::Boolean(left.as_number()? < right.as_number()?)),
        BinaryOp::Gte => Ok(Value::Boolean(left.as_number()? >= right.as_number()?)),
        BinaryOp::Lte => Ok(Value::Boolean(left.as_number()? <= right.as_number()?)),
        BinaryOp::Eq => equals(&left, &right).map(Value::Boolean),
        BinaryOp::Neq => equals(&left, &right).map(|eq| Value::Boolean(!eq)),
        BinaryOp::And => Ok(Value::Boolean(left.as_bool()? && right.as_bool()?)),
        BinaryOp::Or => Ok(Value::Boolean(left.as_bool()? || right.as_bool()?)),
    }
}

fn equals(left: &Value, right: &Value) -> Result<bool, FormulaError> {
    match (left, right) {
        (Value::Number(l), Value::Number(r)) => Ok((l - r).abs() < f64::EPSILON),
        (Value::Boolean(l), Value::Boolean(r)) => Ok(l == r),
        (l, r) => Err(FormulaError::TypeMismatch {
            expected: l.type_name(),
            found: r.type_name(),
        }),
    }
}

fn evaluate_unary(op: UnaryOp, val: Value) -> Result<Value, FormulaError> {
    match op {
        UnaryOp::Neg => Ok(Value::Number(-val.as_number()?)),
        UnaryOp::Not => Ok(Value::Boolean(!val.as_bool()?)),
    }
}
