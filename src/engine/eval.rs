// ============================================================================
// Expression evaluation
// ============================================================================
//
// Integer arithmetic is checked and computed in i128 before being narrowed
// back to i64/u64. Division always yields a float; dividing by zero yields
// NULL. Comparisons and boolean operators follow three-valued logic.
//
// ============================================================================

use super::ast::{BinaryOp, Expr};
use crate::core::{DbError, Result, Value};
use std::cmp::Ordering;

/// Row and arguments an expression is evaluated against
pub struct EvalContext<'a> {
    pub table: Option<&'a str>,
    pub columns: &'a [String],
    pub row: &'a [Value],
    pub params: &'a [Value],
}

impl<'a> EvalContext<'a> {
    /// Context without a current row
    pub fn params_only(params: &'a [Value]) -> Self {
        Self {
            table: None,
            columns: &[],
            row: &[],
            params,
        }
    }

    fn column(&self, table: Option<&str>, name: &str) -> Result<Value> {
        if let (Some(wanted), Some(current)) = (table, self.table) {
            if !wanted.eq_ignore_ascii_case(current) {
                return Err(DbError::ColumnNotFound(name.to_string(), wanted.to_string()));
            }
        }
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(name))
            .and_then(|idx| self.row.get(idx))
            .cloned()
            .ok_or_else(|| {
                DbError::ColumnNotFound(name.to_string(), self.table.unwrap_or("<none>").to_string())
            })
    }
}

pub fn evaluate(expr: &Expr, ctx: &EvalContext<'_>) -> Result<Value> {
    match expr {
        Expr::Literal(v) => Ok(v.clone()),
        Expr::Param(idx) => ctx
            .params
            .get(*idx)
            .cloned()
            .ok_or_else(|| DbError::ExecutionError(format!("No value bound for parameter {}", idx + 1))),
        Expr::Column { table, name } => ctx.column(table.as_deref(), name),
        Expr::Negate(inner) => negate(evaluate(inner, ctx)?),
        Expr::Not(inner) => match evaluate(inner, ctx)? {
            Value::Null => Ok(Value::Null),
            v => Ok(Value::Boolean(!v.as_bool())),
        },
        Expr::IsNull { expr, negated } => {
            let is_null = evaluate(expr, ctx)?.is_null();
            Ok(Value::Boolean(is_null != *negated))
        }
        Expr::Binary { left, op, right } => match op {
            BinaryOp::And => {
                let l = evaluate(left, ctx)?;
                if !l.is_null() && !l.as_bool() {
                    return Ok(Value::Boolean(false));
                }
                let r = evaluate(right, ctx)?;
                match (l.is_null(), r.is_null()) {
                    (_, false) if !r.as_bool() => Ok(Value::Boolean(false)),
                    (false, false) => Ok(Value::Boolean(true)),
                    _ => Ok(Value::Null),
                }
            }
            BinaryOp::Or => {
                let l = evaluate(left, ctx)?;
                if l.as_bool() {
                    return Ok(Value::Boolean(true));
                }
                let r = evaluate(right, ctx)?;
                if r.as_bool() {
                    Ok(Value::Boolean(true))
                } else if l.is_null() || r.is_null() {
                    Ok(Value::Null)
                } else {
                    Ok(Value::Boolean(false))
                }
            }
            _ => binary(&evaluate(left, ctx)?, *op, &evaluate(right, ctx)?),
        },
    }
}

/// Evaluates a WHERE predicate; NULL counts as false
pub fn matches(expr: &Expr, ctx: &EvalContext<'_>) -> Result<bool> {
    Ok(evaluate(expr, ctx)?.as_bool())
}

fn negate(value: Value) -> Result<Value> {
    match value {
        Value::Null => Ok(Value::Null),
        Value::Integer(i) => i
            .checked_neg()
            .map(Value::Integer)
            .ok_or_else(|| DbError::ExecutionError("BIGINT value is out of range".into())),
        Value::Unsigned(u) => narrow(-(u as i128)),
        Value::Float(f) => Ok(Value::Float(-f)),
        Value::Boolean(b) => Ok(Value::Integer(-(b as i64))),
        other => Err(DbError::TypeMismatch(format!(
            "Cannot negate {}",
            other.type_name()
        ))),
    }
}

fn binary(left: &Value, op: BinaryOp, right: &Value) -> Result<Value> {
    if left.is_null() || right.is_null() {
        return Ok(Value::Null);
    }

    match op {
        BinaryOp::Eq => Ok(Value::Boolean(left.compare(right)? == Ordering::Equal)),
        BinaryOp::NotEq => Ok(Value::Boolean(left.compare(right)? != Ordering::Equal)),
        BinaryOp::Lt => Ok(Value::Boolean(left.compare(right)? == Ordering::Less)),
        BinaryOp::LtEq => Ok(Value::Boolean(left.compare(right)? != Ordering::Greater)),
        BinaryOp::Gt => Ok(Value::Boolean(left.compare(right)? == Ordering::Greater)),
        BinaryOp::GtEq => Ok(Value::Boolean(left.compare(right)? != Ordering::Less)),
        _ => arithmetic(left, op, right),
    }
}

fn as_i128(value: &Value) -> Option<i128> {
    match value {
        Value::Integer(i) => Some(*i as i128),
        Value::Unsigned(u) => Some(*u as i128),
        Value::Boolean(b) => Some(*b as i128),
        _ => None,
    }
}

fn as_float(value: &Value) -> Result<f64> {
    match value {
        Value::Boolean(b) => Ok(*b as i64 as f64),
        v => v.as_f64().ok_or_else(|| {
            DbError::TypeMismatch(format!("Cannot use {} in arithmetic", v.type_name()))
        }),
    }
}

/// Narrows an exact result to i64, falling back to u64 for large positives
fn narrow(n: i128) -> Result<Value> {
    if let Ok(i) = i64::try_from(n) {
        Ok(Value::Integer(i))
    } else if let Ok(u) = u64::try_from(n) {
        Ok(Value::Unsigned(u))
    } else {
        Err(DbError::ExecutionError("BIGINT value is out of range".into()))
    }
}

fn arithmetic(left: &Value, op: BinaryOp, right: &Value) -> Result<Value> {
    if op == BinaryOp::Divide {
        let divisor = as_float(right)?;
        if divisor == 0.0 {
            return Ok(Value::Null);
        }
        return Ok(Value::Float(as_float(left)? / divisor));
    }

    if let (Some(a), Some(b)) = (as_i128(left), as_i128(right)) {
        let result = match op {
            BinaryOp::Add => a.checked_add(b),
            BinaryOp::Subtract => a.checked_sub(b),
            BinaryOp::Multiply => a.checked_mul(b),
            BinaryOp::Modulo if b == 0 => return Ok(Value::Null),
            BinaryOp::Modulo => a.checked_rem(b),
            _ => None,
        };
        return result
            .ok_or_else(|| DbError::ExecutionError("BIGINT value is out of range".into()))
            .and_then(narrow);
    }

    let (a, b) = (as_float(left)?, as_float(right)?);
    match op {
        BinaryOp::Add => Ok(Value::Float(a + b)),
        BinaryOp::Subtract => Ok(Value::Float(a - b)),
        BinaryOp::Multiply => Ok(Value::Float(a * b)),
        BinaryOp::Modulo if b == 0.0 => Ok(Value::Null),
        BinaryOp::Modulo => Ok(Value::Float(a % b)),
        _ => Err(DbError::UnsupportedOperation(format!("Operator {}", op))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lit(v: impl Into<Value>) -> Box<Expr> {
        Box::new(Expr::Literal(v.into()))
    }

    fn eval_op(l: impl Into<Value>, op: BinaryOp, r: impl Into<Value>) -> Result<Value> {
        let expr = Expr::Binary {
            left: lit(l),
            op,
            right: lit(r),
        };
        evaluate(&expr, &EvalContext::params_only(&[]))
    }

    #[test]
    fn test_integer_arithmetic() {
        assert_eq!(eval_op(41i64, BinaryOp::Add, 1i64).unwrap(), Value::Integer(42));
        assert_eq!(eval_op(7i64, BinaryOp::Modulo, 3i64).unwrap(), Value::Integer(1));
        assert_eq!(eval_op(u64::MAX, BinaryOp::Subtract, 1i64).unwrap(), Value::Unsigned(u64::MAX - 1));
        assert!(eval_op(i64::MAX, BinaryOp::Multiply, i64::MAX).is_err());
    }

    #[test]
    fn test_division() {
        assert_eq!(eval_op(1i64, BinaryOp::Divide, 4i64).unwrap(), Value::Float(0.25));
        assert!(eval_op(1i64, BinaryOp::Divide, 0i64).unwrap().is_null());
        assert!(eval_op(1i64, BinaryOp::Modulo, 0i64).unwrap().is_null());
    }

    #[test]
    fn test_null_propagation_and_logic() {
        assert!(eval_op(Value::Null, BinaryOp::Add, 1i64).unwrap().is_null());
        assert_eq!(eval_op(Value::Null, BinaryOp::And, false).unwrap(), Value::Boolean(false));
        assert!(eval_op(Value::Null, BinaryOp::And, true).unwrap().is_null());
        assert_eq!(eval_op(Value::Null, BinaryOp::Or, true).unwrap(), Value::Boolean(true));
        assert!(eval_op(Value::Null, BinaryOp::Or, false).unwrap().is_null());
    }

    #[test]
    fn test_params_and_columns() {
        let columns = vec!["Host".to_string(), "User".to_string()];
        let row = vec![Value::from("%"), Value::from("root")];
        let params = vec![Value::from("root")];
        let ctx = EvalContext {
            table: Some("user"),
            columns: &columns,
            row: &row,
            params: &params,
        };

        let expr = Expr::Binary {
            left: Box::new(Expr::Column {
                table: Some("user".into()),
                name: "user".into(),
            }),
            op: BinaryOp::Eq,
            right: Box::new(Expr::Param(0)),
        };
        assert!(matches(&expr, &ctx).unwrap());

        let missing = Expr::Param(3);
        assert!(evaluate(&missing, &ctx).is_err());
    }

    #[test]
    fn test_type_mismatch() {
        assert!(matches!(
            eval_op("a", BinaryOp::Add, 1i64),
            Err(DbError::TypeMismatch(_))
        ));
    }
}
