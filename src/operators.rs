//! Operator semantics on runtime values
//!
//! Promotion rules: `+` with an array operand prepends, appends or
//! concatenates; otherwise a string operand makes `+` a concatenation; a
//! float operand makes the result a float; two integers stay integers.
//! Transform views must be materialised by the caller before reaching here.

use std::cmp::Ordering;

use anyhow::{anyhow, Result};

use crate::token::Token;
use crate::value::{Kind, Value};

/// Whether `op` is a binary operator handled by `binary`
pub fn is_binary_operator(op: Token) -> bool {
    op == Token::Add || is_numeric_operator(op) || op.is_comparison() || is_logic_operator(op)
}

fn is_numeric_operator(op: Token) -> bool {
    matches!(
        op,
        Token::Sub
            | Token::Mul
            | Token::Quo
            | Token::Rem
            | Token::And
            | Token::Or
            | Token::Xor
            | Token::Shl
            | Token::Shr
            | Token::AndNot
    )
}

fn is_logic_operator(op: Token) -> bool {
    matches!(op, Token::LAnd | Token::LOr)
}

/// Apply a binary operator
pub fn binary(op: Token, left: Value, right: Value) -> Result<Value> {
    match op {
        Token::Add => add(left, right),
        op if is_numeric_operator(op) => numeric(op, left, right),
        op if op.is_comparison() => compare(op, &left, &right).map(Value::Bool),
        Token::LAnd | Token::LOr => logic(op, &left, &right).map(Value::Bool),
        op => Err(anyhow!("unsupported binary operator {}", op)),
    }
}

/// `+` across every value kind
pub fn add(left: Value, right: Value) -> Result<Value> {
    match (left, right) {
        (Value::Array(mut items), Value::Array(other)) => {
            items.extend(other);
            Ok(Value::Array(items))
        }
        (Value::Array(mut items), scalar) => {
            items.push(scalar);
            Ok(Value::Array(items))
        }
        (scalar, Value::Array(mut items)) => {
            items.insert(0, scalar);
            Ok(Value::Array(items))
        }
        (Value::String(mut s), other) => {
            s.push_str(&other.to_text()?);
            Ok(Value::String(s))
        }
        (other, Value::String(s)) => Ok(Value::String(other.to_text()? + &s)),
        (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a.wrapping_add(b))),
        (left, right) if left.is_number() && right.is_number() => {
            Ok(Value::Float(left.to_float()? + right.to_float()?))
        }
        (left, right) => Err(anyhow!(
            "operator + is not supported between {} and {}",
            left.kind(),
            right.kind()
        )),
    }
}

/// `- * / % & | ^ << >> &^`; numeric strings are coerced
pub fn numeric(op: Token, left: Value, right: Value) -> Result<Value> {
    let has_float = matches!(left, Value::Float(_)) || matches!(right, Value::Float(_));
    let has_int = matches!(left, Value::Int(_)) || matches!(right, Value::Int(_));

    if has_float {
        let (a, b) = (left.to_float()?, right.to_float()?);
        return match op {
            Token::Sub => Ok(Value::Float(a - b)),
            Token::Mul => Ok(Value::Float(a * b)),
            Token::Quo => Ok(Value::Float(a / b)),
            _ => Err(anyhow!("operator {} is not supported on float", op)),
        };
    }
    if !has_int {
        return Err(anyhow!(
            "operator {} is not supported between {} and {}",
            op,
            left.kind(),
            right.kind()
        ));
    }

    let (a, b) = (left.to_int()?, right.to_int()?);
    let result = match op {
        Token::Sub => a.wrapping_sub(b),
        Token::Mul => a.wrapping_mul(b),
        Token::Quo | Token::Rem if b == 0 => return Err(anyhow!("integer divide by zero")),
        Token::Quo => a.wrapping_div(b),
        Token::Rem => a.wrapping_rem(b),
        Token::And => a & b,
        Token::Or => a | b,
        Token::Xor => a ^ b,
        Token::AndNot => a & !b,
        Token::Shl | Token::Shr if b < 0 => {
            return Err(anyhow!("negative shift amount {}", b));
        }
        Token::Shl => a.checked_shl(b as u32).unwrap_or(0),
        Token::Shr => a.checked_shr(b as u32).unwrap_or(if a < 0 { -1 } else { 0 }),
        op => return Err(anyhow!("operator {} is not a numeric operator", op)),
    };
    Ok(Value::Int(result))
}

/// `== != < <= > >=`
pub fn compare(op: Token, left: &Value, right: &Value) -> Result<bool> {
    let ordering = match (left, right) {
        (Value::Int(a), Value::Int(b)) => a.cmp(b),
        (l, r) if l.is_number() && r.is_number() => {
            let (a, b) = (l.to_float()?, r.to_float()?);
            match a.partial_cmp(&b) {
                Some(ordering) => ordering,
                // NaN is unequal to everything
                None => return Ok(op == Token::Neq),
            }
        }
        (Value::String(a), Value::String(b)) => a.cmp(b),
        (l, r) if l.kind() == r.kind() => {
            return match op {
                Token::Eql => Ok(l == r),
                Token::Neq => Ok(l != r),
                _ => Err(anyhow!("operator {} is not supported on {}", op, l.kind())),
            };
        }
        (l, r) => {
            return Err(anyhow!(
                "cannot compare {} with {}",
                l.kind(),
                r.kind()
            ))
        }
    };
    Ok(match op {
        Token::Eql => ordering == Ordering::Equal,
        Token::Neq => ordering != Ordering::Equal,
        Token::Lss => ordering == Ordering::Less,
        Token::Leq => ordering != Ordering::Greater,
        Token::Gtr => ordering == Ordering::Greater,
        Token::Geq => ordering != Ordering::Less,
        op => return Err(anyhow!("operator {} is not a comparison", op)),
    })
}

/// `&&` and `||` on booleans
pub fn logic(op: Token, left: &Value, right: &Value) -> Result<bool> {
    match (left, right) {
        (Value::Bool(a), Value::Bool(b)) => match op {
            Token::LAnd => Ok(*a && *b),
            Token::LOr => Ok(*a || *b),
            op => Err(anyhow!("operator {} is not a logical operator", op)),
        },
        (l, r) => Err(anyhow!(
            "operator {} requires boolean operands, got {} and {}",
            op,
            l.kind(),
            r.kind()
        )),
    }
}

/// Unary `+ - ! ^`
pub fn unary(op: Token, value: Value) -> Result<Value> {
    match op {
        Token::Add => value.to_number(),
        Token::Sub => match value.to_number()? {
            Value::Int(i) => Ok(Value::Int(i.wrapping_neg())),
            Value::Float(f) => Ok(Value::Float(-f)),
            other => Err(anyhow!("cannot negate {}", other.kind())),
        },
        Token::Not => Ok(Value::Bool(!value.is_truthy())),
        Token::Xor => match value {
            Value::Int(i) => Ok(Value::Int(!i)),
            other => Err(anyhow!("operator ^ requires integer, got {}", other.kind())),
        },
        op => Err(anyhow!("unsupported unary operator {}", op)),
    }
}

/// `++` / `--`, numeric strings become numbers
pub fn inc_dec(op: Token, value: &Value) -> Result<Value> {
    let delta = if op == Token::Inc { 1 } else { -1 };
    match value.to_number()? {
        Value::Int(i) => Ok(Value::Int(i.wrapping_add(delta))),
        Value::Float(f) => Ok(Value::Float(f + delta as f64)),
        other => Err(anyhow!("operator {} is not supported on {}", op, other.kind())),
    }
}

/// `integer(x)`, `float(x)`, `string(x)`, `boolean(x)`
pub fn cast(to: Kind, value: Value) -> Result<Value> {
    if value.kind() == to {
        return Ok(value);
    }
    let from = value.kind();
    let failed = || anyhow!("cannot cast {} to {}", from, to);
    match (to, value) {
        (Kind::Integer, Value::Float(f)) => Ok(Value::Int(f.trunc() as i64)),
        (Kind::Integer, Value::String(s)) => s
            .trim()
            .parse::<i64>()
            .map(Value::Int)
            .map_err(|_| anyhow!("cannot cast {:?} to integer", s)),
        (Kind::Float, Value::Int(i)) => Ok(Value::Float(i as f64)),
        (Kind::Float, Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|_| anyhow!("cannot cast {:?} to float", s)),
        (Kind::Boolean, Value::String(s)) => parse_bool(&s)
            .map(Value::Bool)
            .ok_or_else(|| anyhow!("cannot cast {:?} to boolean", s)),
        (Kind::String, v @ (Value::Int(_) | Value::Float(_) | Value::Bool(_))) => {
            Ok(Value::String(v.to_string()))
        }
        _ => Err(failed()),
    }
}

/// Accepts the usual spellings: 1, t, T, TRUE, true, True and their false forms
pub fn parse_bool(s: &str) -> Option<bool> {
    match s.trim() {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Some(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn array(items: &[i64]) -> Value {
        Value::Array(items.iter().map(|i| Value::Int(*i)).collect())
    }

    #[test]
    fn test_int_float_promotion() {
        for (a, b) in [(1i64, 0.5f64), (-3, 2.25), (0, 0.0), (7, -1.5)] {
            let result = add(Value::Int(a), Value::Float(b)).unwrap();
            assert_eq!(result, Value::Float(a as f64 + b));
        }
        assert_eq!(add(Value::Int(2), Value::Int(3)).unwrap(), Value::Int(5));
    }

    #[test]
    fn test_string_concatenation() {
        let values = [Value::Int(12), Value::Float(1.5), Value::Bool(true), Value::from("x")];
        for v in values {
            let text = v.to_string();
            assert_eq!(
                add(Value::from("s"), v.clone()).unwrap(),
                Value::String(format!("s{}", text))
            );
            assert_eq!(
                add(v, Value::from("s")).unwrap(),
                Value::String(format!("{}s", text))
            );
        }
    }

    #[test]
    fn test_array_addition() {
        assert_eq!(add(array(&[1, 2]), array(&[3, 4])).unwrap(), array(&[1, 2, 3, 4]));
        assert_eq!(add(Value::Int(1), array(&[2, 3])).unwrap(), array(&[1, 2, 3]));
        assert_eq!(add(array(&[2, 3]), Value::Int(1)).unwrap(), array(&[2, 3, 1]));
    }

    #[test]
    fn test_numeric_operators() {
        assert_eq!(numeric(Token::Sub, Value::Int(5), Value::Int(7)).unwrap(), Value::Int(-2));
        assert_eq!(numeric(Token::Quo, Value::Int(7), Value::Int(2)).unwrap(), Value::Int(3));
        assert_eq!(numeric(Token::Mul, Value::from("3"), Value::Int(2)).unwrap(), Value::Int(6));
        assert_eq!(
            numeric(Token::Quo, Value::Float(442.0), Value::Int(2)).unwrap(),
            Value::Float(221.0)
        );
        assert_eq!(numeric(Token::AndNot, Value::Int(0b111), Value::Int(0b010)).unwrap(), Value::Int(0b101));
        assert_eq!(numeric(Token::Shl, Value::Int(1), Value::Int(4)).unwrap(), Value::Int(16));
        assert!(numeric(Token::Quo, Value::Int(1), Value::Int(0)).is_err());
        assert!(numeric(Token::Rem, Value::Float(1.0), Value::Int(2)).is_err());
        assert!(numeric(Token::Sub, Value::from("1"), Value::from("2")).is_err());
    }

    #[test]
    fn test_comparisons() {
        assert!(compare(Token::Lss, &Value::Int(2), &Value::Float(2.5)).unwrap());
        assert!(compare(Token::Geq, &Value::from("b"), &Value::from("a")).unwrap());
        assert!(compare(Token::Eql, &Value::Bool(true), &Value::Bool(true)).unwrap());
        assert!(compare(Token::Lss, &Value::Bool(true), &Value::Bool(false)).is_err());
        assert!(compare(Token::Eql, &array(&[1]), &array(&[1])).unwrap());
        assert!(compare(Token::Eql, &Value::Int(1), &Value::from("1")).is_err());
    }

    #[test]
    fn test_unary_operators() {
        assert_eq!(unary(Token::Sub, Value::from("4")).unwrap(), Value::Int(-4));
        assert_eq!(unary(Token::Add, Value::from("1.5")).unwrap(), Value::Float(1.5));
        assert_eq!(unary(Token::Not, Value::Bool(false)).unwrap(), Value::Bool(true));
        assert_eq!(unary(Token::Not, Value::from("")).unwrap(), Value::Bool(true));
        assert_eq!(unary(Token::Xor, Value::Int(0)).unwrap(), Value::Int(-1));
        assert!(unary(Token::Xor, Value::Float(1.0)).is_err());
    }

    #[test]
    fn test_inc_dec() {
        assert_eq!(inc_dec(Token::Inc, &Value::Int(1)).unwrap(), Value::Int(2));
        assert_eq!(inc_dec(Token::Dec, &Value::from("2.5")).unwrap(), Value::Float(1.5));
        assert!(inc_dec(Token::Inc, &Value::Bool(true)).is_err());
    }

    #[test]
    fn test_casts() {
        assert_eq!(cast(Kind::Integer, Value::Float(3.9)).unwrap(), Value::Int(3));
        assert_eq!(cast(Kind::Integer, Value::from("42")).unwrap(), Value::Int(42));
        assert!(cast(Kind::Integer, Value::from("forty")).is_err());
        assert_eq!(cast(Kind::Float, Value::Int(2)).unwrap(), Value::Float(2.0));
        assert_eq!(cast(Kind::Boolean, Value::from("T")).unwrap(), Value::Bool(true));
        assert_eq!(cast(Kind::String, Value::Float(442.0)).unwrap(), Value::from("442"));
        assert_eq!(cast(Kind::Integer, Value::Int(5)).unwrap(), Value::Int(5));
        assert!(cast(Kind::Integer, Value::Bool(true)).is_err());
        assert!(cast(Kind::String, array(&[1])).is_err());
    }
}
