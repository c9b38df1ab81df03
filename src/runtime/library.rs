//! Built-in filters, functions and tests.
//!
//! Every implementation receives the filtered value (filters, tests) followed by the
//! call's positional arguments. Arguments the call left out are missing or null, and
//! both mean "use the default".

use std::cmp::Ordering;

use crate::diagnostics::TemplateError;
use crate::parser::ast::BinaryOp;

use super::value::{key_value, Map, Value};
use super::{escape as strategies, ops, CallContext};

type Result<T> = std::result::Result<T, TemplateError>;

static NULL: Value = Value::Null;

/// The argument at `index`, or null.
pub fn arg(args: &[Value], index: usize) -> &Value {
    args.get(index).unwrap_or(&NULL)
}

/// The argument at `index` unless it was left out.
fn given(args: &[Value], index: usize) -> Option<&Value> {
    args.get(index).filter(|value| !value.is_null())
}

fn string(args: &[Value], index: usize) -> Result<String> {
    arg(args, index).to_output()
}

fn int_or(args: &[Value], index: usize, default: i64) -> i64 {
    given(args, index).and_then(Value::as_int).unwrap_or(default)
}

fn bool_or(args: &[Value], index: usize, default: bool) -> bool {
    given(args, index).map_or(default, Value::is_truthy)
}

fn char_slice(s: &str, start: usize, end: usize) -> String {
    s.chars().skip(start).take(end.saturating_sub(start)).collect()
}

fn require_iterable(value: &Value, filter: &str) -> Result<()> {
    if value.is_iterable() {
        return Ok(());
    }
    Err(TemplateError::runtime(format!(
        "The \"{filter}\" filter expects a sequence or a mapping, got \"{}\".",
        value.type_name()
    )))
}

/// Rebuild a collection of the same shape from key/value pairs.
fn collect_like(original: &Value, pairs: Vec<(Value, Value)>) -> Value {
    match original {
        Value::Map(_) => Value::Map(pairs.into_iter().map(|(k, v)| (k.to_display(), v)).collect()),
        _ => Value::Seq(pairs.into_iter().map(|(_, v)| v).collect()),
    }
}

// ----------------------------------------------------------------------------
// Filters
// ----------------------------------------------------------------------------

pub fn abs(_: &CallContext<'_>, args: &[Value]) -> Result<Value> {
    Ok(match ops::number(arg(args, 0), "abs")? {
        Value::Int(n) => n.checked_abs().map_or(Value::Float((n as f64).abs()), Value::Int),
        Value::Float(n) => Value::Float(n.abs()),
        other => other,
    })
}

pub fn batch(_: &CallContext<'_>, args: &[Value]) -> Result<Value> {
    let items = arg(args, 0);
    require_iterable(items, "batch")?;
    let size = given(args, 1).and_then(Value::as_float).unwrap_or(0.0).ceil();
    if size < 1.0 {
        return Err(TemplateError::runtime("The batch size must be greater than zero."));
    }
    let size = size as usize;
    let fill = given(args, 2);
    let preserve_keys = bool_or(args, 3, true);

    let pairs = items.pairs().unwrap_or_default();
    let mut batches = Vec::new();
    for chunk in pairs.chunks(size) {
        let mut chunk = chunk.to_vec();
        if let Some(fill) = fill {
            let mut next = chunk.len();
            while chunk.len() < size {
                chunk.push((Value::from(next), fill.clone()));
                next += 1;
            }
        }
        let batch = if preserve_keys && matches!(items, Value::Map(_)) {
            Value::Map(chunk.into_iter().map(|(k, v)| (k.to_display(), v)).collect())
        } else {
            Value::Seq(chunk.into_iter().map(|(_, v)| v).collect())
        };
        batches.push(batch);
    }
    Ok(Value::Seq(batches))
}

pub fn capitalize(_: &CallContext<'_>, args: &[Value]) -> Result<Value> {
    let s = string(args, 0)?;
    let mut chars = s.chars();
    Ok(Value::Str(match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }))
}

pub fn default(_: &CallContext<'_>, args: &[Value]) -> Result<Value> {
    let value = arg(args, 0);
    if value.is_empty() {
        Ok(given(args, 1).cloned().unwrap_or_else(|| Value::from("")))
    } else {
        Ok(value.clone())
    }
}

pub fn escape(_: &CallContext<'_>, args: &[Value]) -> Result<Value> {
    let value = arg(args, 0);
    let strategy = match given(args, 1) {
        Some(strategy) => strategy.to_output()?,
        None => "html".to_string(),
    };
    let autoescape = bool_or(args, 3, false);
    let input = match value {
        Value::Markup(_) if autoescape => return Ok(value.clone()),
        Value::Str(s) | Value::Markup(s) => s.clone(),
        Value::Object(object) => match object.to_template_string() {
            Some(s) => s,
            None => return Ok(value.clone()),
        },
        _ if strategies::STRATEGIES.contains(&strategy.as_str()) => return Ok(value.clone()),
        other => other.to_output()?,
    };
    Ok(Value::Str(strategies::escape(&input, &strategy)?))
}

pub fn filter(ctx: &CallContext<'_>, args: &[Value]) -> Result<Value> {
    let items = arg(args, 0);
    require_iterable(items, "filter")?;
    let arrow = arg(args, 1);
    let mut kept = Vec::new();
    for (key, value) in items.pairs().unwrap_or_default() {
        if ctx.call(arrow, &[value.clone(), key.clone()])?.is_truthy() {
            kept.push((key, value));
        }
    }
    Ok(collect_like(items, kept))
}

pub fn first(_: &CallContext<'_>, args: &[Value]) -> Result<Value> {
    Ok(match arg(args, 0) {
        Value::Str(s) | Value::Markup(s) => s.chars().next().map(String::from).map_or(Value::from(""), Value::Str),
        other => other.values().and_then(|values| values.into_iter().next()).unwrap_or_default(),
    })
}

pub fn last(_: &CallContext<'_>, args: &[Value]) -> Result<Value> {
    Ok(match arg(args, 0) {
        Value::Str(s) | Value::Markup(s) => s.chars().last().map(String::from).map_or(Value::from(""), Value::Str),
        other => other.values().and_then(|values| values.into_iter().last()).unwrap_or_default(),
    })
}

/// `sprintf`-style formatting: `%s`, `%d`, `%f`, `%x`, `%X`, `%o`, `%b`, `%c`, `%e`, `%%`,
/// with `-`, `+`, `0` flags, width and precision.
pub fn format(_: &CallContext<'_>, args: &[Value]) -> Result<Value> {
    let pattern = string(args, 0)?;
    let mut values = args.iter().skip(1).flat_map(|value| match value {
        Value::Map(named) => named.values().cloned().collect(),
        other => vec![other.clone()],
    });
    let mut out = String::with_capacity(pattern.len());
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        if chars.peek() == Some(&'%') {
            chars.next();
            out.push('%');
            continue;
        }
        let (mut left, mut plus, mut pad) = (false, false, ' ');
        while let Some(&flag) = chars.peek() {
            match flag {
                '-' => left = true,
                '+' => plus = true,
                '0' => pad = '0',
                _ => break,
            }
            chars.next();
        }
        let mut width = 0usize;
        while let Some(digit) = chars.peek().and_then(|c| c.to_digit(10)) {
            width = width * 10 + digit as usize;
            chars.next();
        }
        let mut precision = None;
        if chars.peek() == Some(&'.') {
            chars.next();
            let mut p = 0usize;
            while let Some(digit) = chars.peek().and_then(|c| c.to_digit(10)) {
                p = p * 10 + digit as usize;
                chars.next();
            }
            precision = Some(p);
        }
        let Some(conversion) = chars.next() else {
            return Err(TemplateError::runtime("Missing format specifier at end of string."));
        };
        let Some(value) = values.next() else {
            return Err(TemplateError::runtime(format!(
                "Not enough arguments for the format \"{pattern}\"."
            )));
        };
        let signed = |s: String, negative: bool| if plus && !negative { format!("+{s}") } else { s };
        let body = match conversion {
            's' => {
                let s = value.to_output()?;
                match precision {
                    Some(p) => s.chars().take(p).collect(),
                    None => s,
                }
            }
            'd' | 'i' | 'u' => {
                let n = value.as_float().unwrap_or_default() as i64;
                signed(n.to_string(), n < 0)
            }
            'f' | 'F' => {
                let n = value.as_float().unwrap_or_default();
                signed(format!("{n:.*}", precision.unwrap_or(6)), n < 0.0)
            }
            'e' | 'E' => {
                let n = value.as_float().unwrap_or_default();
                let s = format!("{n:.*e}", precision.unwrap_or(6));
                let s = if conversion == 'E' { s.to_uppercase() } else { s };
                signed(s, n < 0.0)
            }
            'x' => format!("{:x}", value.as_int().unwrap_or_default()),
            'X' => format!("{:X}", value.as_int().unwrap_or_default()),
            'o' => format!("{:o}", value.as_int().unwrap_or_default()),
            'b' => format!("{:b}", value.as_int().unwrap_or_default()),
            'c' => u32::try_from(value.as_int().unwrap_or_default())
                .ok()
                .and_then(char::from_u32)
                .map(String::from)
                .unwrap_or_default(),
            other => {
                return Err(TemplateError::runtime(format!("Unknown format specifier \"{other}\".")));
            }
        };
        let len = body.chars().count();
        if len >= width {
            out.push_str(&body);
        } else if left {
            out.push_str(&body);
            out.extend(std::iter::repeat_n(' ', width - len));
        } else if pad == '0' && body.starts_with(['-', '+']) {
            let (sign, digits) = body.split_at(1);
            out.push_str(sign);
            out.extend(std::iter::repeat_n('0', width - len));
            out.push_str(digits);
        } else {
            out.extend(std::iter::repeat_n(pad, width - len));
            out.push_str(&body);
        }
    }
    Ok(Value::Str(out))
}

pub fn join(_: &CallContext<'_>, args: &[Value]) -> Result<Value> {
    let Some(items) = arg(args, 0).values() else {
        return Ok(Value::from(""));
    };
    let glue = match given(args, 1) {
        Some(glue) => glue.to_output()?,
        None => String::new(),
    };
    let parts = items.iter().map(Value::to_output).collect::<Result<Vec<_>>>()?;
    let Some(and) = given(args, 2) else {
        return Ok(Value::Str(parts.join(&glue)));
    };
    if parts.len() < 2 {
        return Ok(Value::Str(parts.join(&glue)));
    }
    let (last, rest) = parts.split_last().map(|(last, rest)| (last.clone(), rest.to_vec())).unwrap_or_default();
    Ok(Value::Str(format!("{}{}{last}", rest.join(&glue), and.to_output()?)))
}

pub fn json_encode(_: &CallContext<'_>, args: &[Value]) -> Result<Value> {
    serde_json::to_string(&arg(args, 0).to_json())
        .map(Value::Str)
        .map_err(|err| TemplateError::runtime(format!("Unable to encode the value as JSON: {err}.")))
}

pub fn keys(_: &CallContext<'_>, args: &[Value]) -> Result<Value> {
    Ok(match arg(args, 0) {
        Value::Seq(items) => Value::Seq((0..items.len()).map(Value::from).collect()),
        Value::Map(map) => Value::Seq(map.keys().map(|key| key_value(key)).collect()),
        _ => Value::Seq(Vec::new()),
    })
}

pub fn length(_: &CallContext<'_>, args: &[Value]) -> Result<Value> {
    let value = arg(args, 0);
    match value.len() {
        Some(n) => Ok(Value::from(n)),
        None => Ok(Value::from(value.to_output()?.chars().count())),
    }
}

pub fn lower(_: &CallContext<'_>, args: &[Value]) -> Result<Value> {
    Ok(Value::Str(string(args, 0)?.to_lowercase()))
}

pub fn upper(_: &CallContext<'_>, args: &[Value]) -> Result<Value> {
    Ok(Value::Str(string(args, 0)?.to_uppercase()))
}

pub fn title(_: &CallContext<'_>, args: &[Value]) -> Result<Value> {
    let s = string(args, 0)?;
    let mut out = String::with_capacity(s.len());
    let mut boundary = true;
    for c in s.chars() {
        if boundary {
            out.extend(c.to_uppercase());
        } else {
            out.extend(c.to_lowercase());
        }
        boundary = c.is_whitespace() || c == '-';
    }
    Ok(Value::Str(out))
}

pub fn map(ctx: &CallContext<'_>, args: &[Value]) -> Result<Value> {
    let items = arg(args, 0);
    require_iterable(items, "map")?;
    let arrow = arg(args, 1);
    let mut mapped = Vec::new();
    for (key, value) in items.pairs().unwrap_or_default() {
        let result = ctx.call(arrow, &[value, key.clone()])?;
        mapped.push((key, result));
    }
    Ok(collect_like(items, mapped))
}

pub fn merge(_: &CallContext<'_>, args: &[Value]) -> Result<Value> {
    let check = |value: &Value, position: usize| -> Result<()> {
        if value.is_iterable() || value.is_null() {
            return Ok(());
        }
        Err(TemplateError::runtime(format!(
            "The \"merge\" filter only works with sequences or mappings, got \"{}\" for argument {position}.",
            value.type_name()
        )))
    };
    let (left, right) = (arg(args, 0), arg(args, 1));
    check(left, 1)?;
    check(right, 2)?;
    Ok(match (left, right) {
        (Value::Map(a), Value::Map(b)) => {
            let mut merged = a.clone();
            merged.extend(b.iter().map(|(k, v)| (k.clone(), v.clone())));
            Value::Map(merged)
        }
        (Value::Map(a), Value::Seq(b)) => {
            let mut merged = a.clone();
            let offset = merged.len();
            merged.extend(b.iter().enumerate().map(|(i, v)| ((offset + i).to_string(), v.clone())));
            Value::Map(merged)
        }
        (Value::Seq(a), Value::Map(b)) => {
            let mut merged: Map = a.iter().enumerate().map(|(i, v)| (i.to_string(), v.clone())).collect();
            merged.extend(b.iter().map(|(k, v)| (k.clone(), v.clone())));
            Value::Map(merged)
        }
        _ => {
            let mut merged = left.values().unwrap_or_default();
            merged.extend(right.values().unwrap_or_default());
            Value::Seq(merged)
        }
    })
}

pub fn nl2br(_: &CallContext<'_>, args: &[Value]) -> Result<Value> {
    let s = string(args, 0)?;
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\r' | '\n' => {
                out.push_str("<br />");
                out.push(c);
                let pair = if c == '\r' { '\n' } else { '\r' };
                if chars.peek() == Some(&pair) {
                    out.push(pair);
                    chars.next();
                }
            }
            c => out.push(c),
        }
    }
    Ok(Value::Str(out))
}

pub fn raw(_: &CallContext<'_>, args: &[Value]) -> Result<Value> {
    Ok(arg(args, 0).clone())
}

pub fn reduce(ctx: &CallContext<'_>, args: &[Value]) -> Result<Value> {
    let items = arg(args, 0);
    require_iterable(items, "reduce")?;
    let arrow = arg(args, 1);
    let mut carry = arg(args, 2).clone();
    for (key, value) in items.pairs().unwrap_or_default() {
        carry = ctx.call(arrow, &[carry, value, key])?;
    }
    Ok(carry)
}

/// Replace every occurrence of the mapping's keys, longest key first at each position.
pub fn replace(_: &CallContext<'_>, args: &[Value]) -> Result<Value> {
    let s = string(args, 0)?;
    let pairs = match arg(args, 1) {
        Value::Map(map) => map.iter().map(|(k, v)| Ok((k.clone(), v.to_output()?))).collect::<Result<Vec<_>>>()?,
        Value::Seq(items) => {
            items.iter().enumerate().map(|(i, v)| Ok((i.to_string(), v.to_output()?))).collect::<Result<Vec<_>>>()?
        }
        other => {
            return Err(TemplateError::runtime(format!(
                "The \"replace\" filter expects a sequence or a mapping, got \"{}\".",
                other.type_name()
            )));
        }
    };
    let mut pairs: Vec<(String, String)> = pairs.into_iter().filter(|(from, _)| !from.is_empty()).collect();
    pairs.sort_by(|a, b| b.0.len().cmp(&a.0.len()));

    let mut out = String::with_capacity(s.len());
    let mut rest = s.as_str();
    'scan: while !rest.is_empty() {
        for (from, to) in &pairs {
            if let Some(tail) = rest.strip_prefix(from.as_str()) {
                out.push_str(to);
                rest = tail;
                continue 'scan;
            }
        }
        let mut chars = rest.chars();
        if let Some(c) = chars.next() {
            out.push(c);
        }
        rest = chars.as_str();
    }
    Ok(Value::Str(out))
}

pub fn reverse(_: &CallContext<'_>, args: &[Value]) -> Result<Value> {
    Ok(match arg(args, 0) {
        Value::Seq(items) => Value::Seq(items.iter().rev().cloned().collect()),
        Value::Map(map) => Value::Map(map.iter().rev().map(|(k, v)| (k.clone(), v.clone())).collect()),
        other => Value::Str(other.to_output()?.chars().rev().collect()),
    })
}

pub fn round(_: &CallContext<'_>, args: &[Value]) -> Result<Value> {
    let value = ops::number(arg(args, 0), "round")?.as_float().unwrap_or_default();
    let precision = int_or(args, 1, 0).clamp(-15, 15) as i32;
    let method = match given(args, 2) {
        Some(method) => method.to_output()?,
        None => "common".to_string(),
    };
    let factor = 10f64.powi(precision);
    let scaled = value * factor;
    let rounded = match method.as_str() {
        "common" => scaled.round(),
        "ceil" => scaled.ceil(),
        "floor" => scaled.floor(),
        _ => {
            return Err(TemplateError::runtime(
                "The round filter only supports the \"common\", \"ceil\", and \"floor\" methods.",
            ));
        }
    };
    Ok(Value::Float(rounded / factor))
}

/// Resolve a start/length pair the way array slicing does: negative start counts from
/// the end, negative length stops that many items before the end.
fn slice_bounds(len: usize, start: i64, length: Option<i64>) -> (usize, usize) {
    let len_i = len as i64;
    let start = if start < 0 { (len_i + start).max(0) } else { start.min(len_i) };
    let end = match length {
        None => len_i,
        Some(n) if n < 0 => (len_i + n).max(start),
        Some(n) => (start + n).min(len_i),
    };
    (start as usize, end as usize)
}

pub fn slice(_: &CallContext<'_>, args: &[Value]) -> Result<Value> {
    let value = arg(args, 0);
    let start = int_or(args, 1, 0);
    let length = given(args, 2).and_then(Value::as_int);
    let preserve_keys = bool_or(args, 3, false);
    Ok(match value {
        Value::Seq(items) => {
            let (from, to) = slice_bounds(items.len(), start, length);
            if preserve_keys {
                Value::Map((from..to).map(|i| (i.to_string(), items[i].clone())).collect())
            } else {
                Value::Seq(items[from..to].to_vec())
            }
        }
        Value::Map(map) => {
            let (from, to) = slice_bounds(map.len(), start, length);
            Value::Map(map.iter().skip(from).take(to - from).map(|(k, v)| (k.clone(), v.clone())).collect())
        }
        other => {
            let s = other.to_output()?;
            let (from, to) = slice_bounds(s.chars().count(), start, length);
            Value::Str(char_slice(&s, from, to))
        }
    })
}

pub fn sort(ctx: &CallContext<'_>, args: &[Value]) -> Result<Value> {
    let items = arg(args, 0);
    require_iterable(items, "sort")?;
    let arrow = given(args, 1);
    let mut pairs = items.pairs().unwrap_or_default();
    let mut failure = None;
    pairs.sort_by(|(_, a), (_, b)| {
        if failure.is_some() {
            return Ordering::Equal;
        }
        match arrow {
            Some(arrow) => match ctx.call(arrow, &[a.clone(), b.clone()]) {
                Ok(result) => result.as_int().unwrap_or_default().cmp(&0),
                Err(err) => {
                    failure = Some(err);
                    Ordering::Equal
                }
            },
            None => a.compare(b).unwrap_or(Ordering::Equal),
        }
    });
    if let Some(err) = failure {
        return Err(err);
    }
    Ok(collect_like(items, pairs))
}

pub fn split(_: &CallContext<'_>, args: &[Value]) -> Result<Value> {
    let s = string(args, 0)?;
    let delimiter = string(args, 1)?;
    let limit = given(args, 2).and_then(Value::as_int);
    let parts: Vec<String> = if delimiter.is_empty() {
        let size = limit.filter(|n| *n > 1).unwrap_or(1) as usize;
        let chars: Vec<char> = s.chars().collect();
        chars.chunks(size).map(|chunk| chunk.iter().collect()).collect()
    } else {
        match limit {
            None => s.split(delimiter.as_str()).map(String::from).collect(),
            Some(n) if n > 0 => s.splitn(n as usize, delimiter.as_str()).map(String::from).collect(),
            Some(0) => vec![s.clone()],
            Some(n) => {
                let mut all: Vec<String> = s.split(delimiter.as_str()).map(String::from).collect();
                let keep = all.len().saturating_sub(n.unsigned_abs() as usize);
                all.truncate(keep);
                all
            }
        }
    };
    Ok(Value::Seq(parts.into_iter().map(Value::Str).collect()))
}

pub fn trim(_: &CallContext<'_>, args: &[Value]) -> Result<Value> {
    let s = string(args, 0)?;
    let chars: Vec<char> = match given(args, 1) {
        Some(chars) => chars.to_output()?.chars().collect(),
        None => vec![' ', '\t', '\n', '\r', '\0', '\x0B'],
    };
    let side = match given(args, 2) {
        Some(side) => side.to_output()?,
        None => "both".to_string(),
    };
    let matches = |c: char| chars.contains(&c);
    let trimmed = match side.as_str() {
        "both" => s.trim_matches(matches),
        "left" => s.trim_start_matches(matches),
        "right" => s.trim_end_matches(matches),
        _ => return Err(TemplateError::runtime("Trimming side must be \"left\", \"right\" or \"both\".")),
    };
    Ok(Value::Str(trimmed.to_string()))
}

pub fn url_encode(_: &CallContext<'_>, args: &[Value]) -> Result<Value> {
    match arg(args, 0) {
        Value::Map(_) | Value::Seq(_) => {
            let pairs = arg(args, 0).pairs().unwrap_or_default();
            let query = pairs
                .iter()
                .map(|(k, v)| Ok(format!("{}={}", strategies::url(&k.to_display()), strategies::url(&v.to_output()?))))
                .collect::<Result<Vec<_>>>()?;
            Ok(Value::Str(query.join("&")))
        }
        other => Ok(Value::Str(strategies::url(&other.to_output()?))),
    }
}

// ----------------------------------------------------------------------------
// Functions
// ----------------------------------------------------------------------------

pub fn range(_: &CallContext<'_>, args: &[Value]) -> Result<Value> {
    let step = given(args, 2).cloned().unwrap_or(Value::Int(1));
    ops::range(arg(args, 0), arg(args, 1), &step)
}

pub fn cycle(_: &CallContext<'_>, args: &[Value]) -> Result<Value> {
    let values = arg(args, 0);
    let Some(items) = values.values() else {
        return Ok(values.clone());
    };
    if items.is_empty() {
        return Err(TemplateError::runtime("The \"cycle\" function does not work on empty sequences."));
    }
    let position = int_or(args, 1, 0).rem_euclid(items.len() as i64) as usize;
    Ok(items[position].clone())
}

fn extremum(args: &[Value], wanted: Ordering) -> Value {
    let candidates = match args {
        [single] if single.is_iterable() => single.values().unwrap_or_default(),
        _ => args.to_vec(),
    };
    candidates.into_iter().reduce(|best, next| if next.compare(&best) == Some(wanted) { next } else { best }).unwrap_or_default()
}

pub fn max(_: &CallContext<'_>, args: &[Value]) -> Result<Value> {
    Ok(extremum(args, Ordering::Greater))
}

pub fn min(_: &CallContext<'_>, args: &[Value]) -> Result<Value> {
    Ok(extremum(args, Ordering::Less))
}

pub fn include(ctx: &CallContext<'_>, args: &[Value]) -> Result<Value> {
    ctx.include(arg(args, 0), given(args, 1), bool_or(args, 2, true), bool_or(args, 3, false), bool_or(args, 4, false))
}

pub fn source(ctx: &CallContext<'_>, args: &[Value]) -> Result<Value> {
    let name = string(args, 0)?;
    match ctx.env().loader().source(&name) {
        Ok(source) => Ok(Value::Str(source.code().to_string())),
        Err(err) if err.is_loader() && bool_or(args, 1, false) => Ok(Value::from("")),
        Err(err) => Err(err),
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

pub fn empty(_: &CallContext<'_>, args: &[Value]) -> Result<Value> {
    Ok(Value::Bool(match arg(args, 0) {
        Value::Object(object) => object.to_template_string().is_some_and(|s| s.is_empty()),
        other => other.is_empty(),
    }))
}

pub fn even(_: &CallContext<'_>, args: &[Value]) -> Result<Value> {
    Ok(Value::Bool(arg(args, 0).as_int().is_some_and(|n| n % 2 == 0)))
}

pub fn odd(_: &CallContext<'_>, args: &[Value]) -> Result<Value> {
    Ok(Value::Bool(arg(args, 0).as_int().is_some_and(|n| n % 2 != 0)))
}

pub fn iterable(_: &CallContext<'_>, args: &[Value]) -> Result<Value> {
    Ok(Value::Bool(arg(args, 0).is_iterable()))
}

pub fn null(_: &CallContext<'_>, args: &[Value]) -> Result<Value> {
    Ok(Value::Bool(arg(args, 0).is_null()))
}

pub fn same_as(_: &CallContext<'_>, args: &[Value]) -> Result<Value> {
    Ok(Value::Bool(arg(args, 0).same_as(arg(args, 1))))
}

pub fn divisible_by(_: &CallContext<'_>, args: &[Value]) -> Result<Value> {
    let remainder = ops::binary(BinaryOp::Mod, arg(args, 0), arg(args, 1))?;
    Ok(Value::Bool(remainder.loose_eq(&Value::Int(0))))
}

fn is_list(map: &Map) -> bool {
    map.keys().enumerate().all(|(i, key)| *key == i.to_string())
}

pub fn sequence(_: &CallContext<'_>, args: &[Value]) -> Result<Value> {
    Ok(Value::Bool(match arg(args, 0) {
        Value::Seq(_) => true,
        Value::Map(map) => is_list(map),
        _ => false,
    }))
}

pub fn mapping(_: &CallContext<'_>, args: &[Value]) -> Result<Value> {
    Ok(Value::Bool(match arg(args, 0) {
        Value::Map(map) => !is_list(map),
        Value::Object(_) => true,
        _ => false,
    }))
}
