//! Operator semantics on runtime values.
//!
//! Logical operators (`and`, `or`, `??`) and the closure-taking ones (`has some`,
//! `has every`) short-circuit or call back into the renderer, so they live there.

use std::cmp::Ordering;

use regex::Regex;

use crate::diagnostics::TemplateError;
use crate::parser::ast::{BinaryOp, UnaryOp};

use super::value::Value;

pub fn unary(op: UnaryOp, value: &Value) -> Result<Value, TemplateError> {
    match op {
        UnaryOp::Not => Ok(Value::Bool(!value.is_truthy())),
        UnaryOp::Pos => number(value, "+"),
        UnaryOp::Neg => match number(value, "-")? {
            Value::Int(n) => Ok(n.checked_neg().map_or(Value::Float(-(n as f64)), Value::Int)),
            Value::Float(n) => Ok(Value::Float(-n)),
            other => Ok(other),
        },
    }
}

pub fn binary(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, TemplateError> {
    use BinaryOp::*;
    match op {
        Add | Sub | Mul => arithmetic(op, left, right),
        Div => divide(left, right),
        FloorDiv => {
            let quotient = divide(left, right)?;
            Ok(Value::Int(quotient.as_float().unwrap_or_default().floor() as i64))
        }
        Mod => modulo(left, right),
        Pow => power(left, right),
        Concat => Ok(Value::Str(format!("{}{}", left.to_output()?, right.to_output()?))),
        Eq => Ok(Value::Bool(left.loose_eq(right))),
        NotEq => Ok(Value::Bool(!left.loose_eq(right))),
        Spaceship => Ok(Value::Int(match left.compare(right) {
            Some(Ordering::Less) => -1,
            Some(Ordering::Equal) => 0,
            _ => 1,
        })),
        Lt => Ok(Value::Bool(left.compare(right) == Some(Ordering::Less))),
        Gt => Ok(Value::Bool(left.compare(right) == Some(Ordering::Greater))),
        Le => Ok(Value::Bool(matches!(left.compare(right), Some(Ordering::Less | Ordering::Equal)))),
        Ge => Ok(Value::Bool(matches!(left.compare(right), Some(Ordering::Greater | Ordering::Equal)))),
        In => Ok(Value::Bool(contains(right, left))),
        NotIn => Ok(Value::Bool(!contains(right, left))),
        Matches => Ok(Value::Bool(compile_regex(&right.to_output()?)?.is_match(&left.to_output()?))),
        StartsWith => Ok(Value::Bool(match (left.as_str(), right.as_str()) {
            (Some(s), Some(prefix)) => s.starts_with(prefix),
            _ => false,
        })),
        EndsWith => Ok(Value::Bool(match (left.as_str(), right.as_str()) {
            (Some(s), Some(suffix)) => s.ends_with(suffix),
            _ => false,
        })),
        BitAnd => Ok(Value::Int(int(left, "b-and")? & int(right, "b-and")?)),
        BitOr => Ok(Value::Int(int(left, "b-or")? | int(right, "b-or")?)),
        BitXor => Ok(Value::Int(int(left, "b-xor")? ^ int(right, "b-xor")?)),
        Xor => Ok(Value::Bool(left.is_truthy() ^ right.is_truthy())),
        And => Ok(Value::Bool(left.is_truthy() && right.is_truthy())),
        Or => Ok(Value::Bool(left.is_truthy() || right.is_truthy())),
        NullCoalesce => Ok(if left.is_null() { right.clone() } else { left.clone() }),
        HasSome | HasEvery => Err(TemplateError::runtime(format!("The \"{op}\" operator requires an arrow function."))),
    }
}

/// Coerce to a number for arithmetic; numeric strings are accepted.
pub fn number(value: &Value, op: &str) -> Result<Value, TemplateError> {
    match value {
        Value::Int(_) | Value::Float(_) => Ok(value.clone()),
        Value::Null => Ok(Value::Int(0)),
        Value::Bool(b) => Ok(Value::Int(i64::from(*b))),
        Value::Str(s) | Value::Markup(s) => {
            let trimmed = s.trim();
            if let Ok(n) = trimmed.parse::<i64>() {
                Ok(Value::Int(n))
            } else if let Ok(n) = trimmed.parse::<f64>() {
                Ok(Value::Float(n))
            } else {
                Err(TemplateError::runtime(format!(
                    "A non-numeric value \"{s}\" cannot be used with the \"{op}\" operator."
                )))
            }
        }
        other => Err(TemplateError::runtime(format!(
            "Unsupported operand type \"{}\" for the \"{op}\" operator.",
            other.type_name()
        ))),
    }
}

fn int(value: &Value, op: &str) -> Result<i64, TemplateError> {
    match number(value, op)? {
        Value::Int(n) => Ok(n),
        Value::Float(n) => Ok(n as i64),
        _ => Ok(0),
    }
}

fn arithmetic(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, TemplateError> {
    let symbol = op.to_string();
    let (a, b) = (number(left, &symbol)?, number(right, &symbol)?);
    if let (Value::Int(x), Value::Int(y)) = (&a, &b) {
        let checked = match op {
            BinaryOp::Add => x.checked_add(*y),
            BinaryOp::Sub => x.checked_sub(*y),
            _ => x.checked_mul(*y),
        };
        if let Some(n) = checked {
            return Ok(Value::Int(n));
        }
    }
    let (x, y) = (a.as_float().unwrap_or_default(), b.as_float().unwrap_or_default());
    Ok(Value::Float(match op {
        BinaryOp::Add => x + y,
        BinaryOp::Sub => x - y,
        _ => x * y,
    }))
}

fn divide(left: &Value, right: &Value) -> Result<Value, TemplateError> {
    let (a, b) = (number(left, "/")?, number(right, "/")?);
    let y = b.as_float().unwrap_or_default();
    if y == 0.0 {
        return Err(TemplateError::runtime("Division by zero."));
    }
    if let (Value::Int(x), Value::Int(y)) = (&a, &b) {
        if x % y == 0 {
            return Ok(Value::Int(x / y));
        }
    }
    Ok(Value::Float(a.as_float().unwrap_or_default() / y))
}

fn modulo(left: &Value, right: &Value) -> Result<Value, TemplateError> {
    let (x, y) = (int(left, "%")?, int(right, "%")?);
    if y == 0 {
        return Err(TemplateError::runtime("Modulo by zero."));
    }
    Ok(Value::Int(x.wrapping_rem(y)))
}

fn power(left: &Value, right: &Value) -> Result<Value, TemplateError> {
    let (a, b) = (number(left, "**")?, number(right, "**")?);
    if let (Value::Int(x), Value::Int(y)) = (&a, &b) {
        if let Some(n) = u32::try_from(*y).ok().and_then(|y| x.checked_pow(y)) {
            return Ok(Value::Int(n));
        }
    }
    Ok(Value::Float(a.as_float().unwrap_or_default().powf(b.as_float().unwrap_or_default())))
}

/// `needle in haystack`: substring for strings, loose value equality for collections.
pub fn contains(haystack: &Value, needle: &Value) -> bool {
    match haystack {
        Value::Seq(items) => items.iter().any(|item| item.loose_eq(needle)),
        Value::Map(map) => map.values().any(|item| item.loose_eq(needle)),
        Value::Str(s) | Value::Markup(s) => match needle {
            Value::Str(_) | Value::Markup(_) | Value::Int(_) | Value::Float(_) => {
                s.contains(needle.to_display().as_str())
            }
            _ => false,
        },
        _ => false,
    }
}

/// Compile a delimited pattern such as `/^a.*$/i`.
pub fn compile_regex(pattern: &str) -> Result<Regex, TemplateError> {
    let invalid = |reason: &str| {
        TemplateError::runtime(format!("Regexp \"{pattern}\" passed to \"matches\" is not valid: {reason}."))
    };
    let mut chars = pattern.chars();
    let delimiter = chars.next().ok_or_else(|| invalid("empty pattern"))?;
    if delimiter.is_alphanumeric() || delimiter == '\\' || delimiter.is_whitespace() {
        return Err(invalid("delimiter must not be alphanumeric or backslash"));
    }
    let closing = match delimiter {
        '(' => ')',
        '[' => ']',
        '{' => '}',
        '<' => '>',
        c => c,
    };
    let body = &pattern[delimiter.len_utf8()..];
    let end = body.rfind(closing).ok_or_else(|| invalid("no ending delimiter"))?;
    let (expr, flags) = (&body[..end], &body[end + closing.len_utf8()..]);
    let mut inline = String::new();
    for flag in flags.chars() {
        match flag {
            'i' | 'm' | 's' | 'x' => inline.push(flag),
            'u' => {}
            other => return Err(invalid(&format!("unknown modifier \"{other}\""))),
        }
    }
    let source = if inline.is_empty() { expr.to_string() } else { format!("(?{inline}){expr}") };
    Regex::new(&source).map_err(|e| invalid(&e.to_string()))
}

/// `low..high` with a step; characters produce character ranges, descending when low > high.
pub fn range(low: &Value, high: &Value, step: &Value) -> Result<Value, TemplateError> {
    let step = if step.is_null() { Value::Int(1) } else { number(step, "range")? };
    if step.as_float().unwrap_or_default() == 0.0 {
        return Err(TemplateError::runtime("The step of a range cannot be zero."));
    }

    let single_char = |v: &Value| match v {
        Value::Str(s) if s.chars().count() == 1 && !s.chars().all(|c| c.is_ascii_digit()) => s.chars().next(),
        _ => None,
    };
    if let (Some(a), Some(b)) = (single_char(low), single_char(high)) {
        let step = step.as_int().unwrap_or(1).unsigned_abs().max(1) as usize;
        let (a, b) = (a as u32, b as u32);
        let codes: Vec<u32> =
            if a <= b { (a..=b).step_by(step).collect() } else { (b..=a).rev().step_by(step).collect() };
        return Ok(Value::Seq(
            codes.into_iter().filter_map(char::from_u32).map(|c| Value::Str(c.to_string())).collect(),
        ));
    }

    let (low, high) = (number(low, "range")?, number(high, "range")?);
    if let (Value::Int(a), Value::Int(b), Value::Int(s)) = (&low, &high, &step) {
        let s = s.unsigned_abs() as i64;
        let count = (a - b).unsigned_abs() / s.unsigned_abs() + 1;
        if count > 1_000_000 {
            return Err(TemplateError::runtime("The range is too large."));
        }
        let items = (0..count as i64).map(|i| Value::Int(if a <= b { a + i * s } else { a - i * s }));
        return Ok(Value::Seq(items.collect()));
    }
    let (a, b) = (low.as_float().unwrap_or_default(), high.as_float().unwrap_or_default());
    let s = step.as_float().unwrap_or(1.0).abs();
    let count = ((a - b).abs() / s).floor() as usize + 1;
    if count > 1_000_000 {
        return Err(TemplateError::runtime("The range is too large."));
    }
    Ok(Value::Seq(
        (0..count).map(|i| Value::Float(if a <= b { a + i as f64 * s } else { a - i as f64 * s })).collect(),
    ))
}
