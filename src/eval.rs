use std::cmp::Ordering;

use crate::engine::Error;
use crate::value::Value;

/// Apply a named operator to already-resolved operands.
///
/// `and`/`or`/`xor` are bitwise on two integers and fall back to truthiness
/// otherwise; comparisons order numbers (integers and floats mixed) and
/// strings; `contains` takes the container first.
pub(crate) fn apply(operator: &str, operands: &[Value]) -> Result<Value, Error> {
    match operator {
        "not" => {
            let [a] = unary(operator, operands)?;
            Ok(Value::Bool(!a.is_truthy()))
        }
        "and" => {
            let (a, b) = binary(operator, operands)?;
            Ok(match (a, b) {
                (Value::Int(x), Value::Int(y)) => Value::Int(x & y),
                _ => Value::Bool(a.is_truthy() && b.is_truthy()),
            })
        }
        "or" => {
            let (a, b) = binary(operator, operands)?;
            Ok(match (a, b) {
                (Value::Int(x), Value::Int(y)) => Value::Int(x | y),
                _ => Value::Bool(a.is_truthy() || b.is_truthy()),
            })
        }
        "xor" => {
            let (a, b) = binary(operator, operands)?;
            Ok(match (a, b) {
                (Value::Int(x), Value::Int(y)) => Value::Int(x ^ y),
                _ => Value::Bool(a.is_truthy() != b.is_truthy()),
            })
        }
        "eq" => {
            let (a, b) = binary(operator, operands)?;
            Ok(Value::Bool(a.loosely_equals(b)))
        }
        "ne" => {
            let (a, b) = binary(operator, operands)?;
            Ok(Value::Bool(!a.loosely_equals(b)))
        }
        "ge" => ordered(operator, operands, |o| o != Ordering::Less),
        "gt" => ordered(operator, operands, |o| o == Ordering::Greater),
        "le" => ordered(operator, operands, |o| o != Ordering::Greater),
        "lt" => ordered(operator, operands, |o| o == Ordering::Less),
        "mod" => {
            let (a, b) = binary(operator, operands)?;
            let (x, y) = match (a, b) {
                (Value::Int(x), Value::Int(y)) => (*x, *y),
                _ => {
                    return Err(Error::Expression(format!(
                        "`mod` takes integers, got `{a}` and `{b}`"
                    )));
                }
            };
            if y == 0 {
                return Err(Error::Expression("modulus by zero".to_string()));
            }
            // Floor modulus: the sign follows the divisor.
            Ok(Value::Int(((x % y) + y) % y))
        }
        "contains" => {
            let (container, item) = binary(operator, operands)?;
            contains(container, item)
        }
        other => Err(Error::UnknownOperator(other.to_string())),
    }
}

fn unary<'v>(operator: &str, operands: &'v [Value]) -> Result<[&'v Value; 1], Error> {
    match operands {
        [a] => Ok([a]),
        _ => Err(arity(operator, 1, operands.len())),
    }
}

fn binary<'v>(operator: &str, operands: &'v [Value]) -> Result<(&'v Value, &'v Value), Error> {
    match operands {
        [a, b] => Ok((a, b)),
        _ => Err(arity(operator, 2, operands.len())),
    }
}

fn arity(operator: &str, expected: usize, actual: usize) -> Error {
    Error::Expression(format!(
        "operator `{operator}` takes {expected} operand(s), got {actual}"
    ))
}

fn ordered(
    operator: &str,
    operands: &[Value],
    accept: impl Fn(Ordering) -> bool,
) -> Result<Value, Error> {
    let (a, b) = binary(operator, operands)?;
    let ordering = match (a, b) {
        (Value::Int(x), Value::Int(y)) => x.cmp(y),
        (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
            let x = number(a);
            let y = number(b);
            x.partial_cmp(&y).ok_or_else(|| {
                Error::Expression(format!("`{operator}` cannot order {x} and {y}"))
            })?
        }
        (Value::Str(x), Value::Str(y)) => x.cmp(y),
        _ => {
            return Err(Error::Expression(format!(
                "`{operator}` cannot order `{a}` and `{b}`"
            )));
        }
    };
    Ok(Value::Bool(accept(ordering)))
}

fn number(value: &Value) -> f64 {
    match value {
        Value::Int(i) => *i as f64,
        Value::Float(f) => *f,
        _ => f64::NAN,
    }
}

fn contains(container: &Value, item: &Value) -> Result<Value, Error> {
    match container {
        Value::Seq(seq) => Ok(Value::Bool(seq.iter().any(|v| v.loosely_equals(item)))),
        Value::Str(s) => {
            let needle = item.as_str().ok_or_else(|| {
                Error::Expression(format!("cannot search `{s}` for non-string `{item}`"))
            })?;
            Ok(Value::Bool(s.contains(needle)))
        }
        Value::Map(map) => {
            let key = item.as_str().ok_or_else(|| {
                Error::Expression(format!("mapping keys are strings, got `{item}`"))
            })?;
            Ok(Value::Bool(map.contains_key(key)))
        }
        other => Err(Error::Expression(format!(
            "`contains` takes a sequence, string or mapping, got `{other}`"
        ))),
    }
}
