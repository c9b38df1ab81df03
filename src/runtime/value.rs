use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::diagnostics::TemplateError;
use crate::environment::Template;

use super::Closure;

pub type Map = IndexMap<String, Value>;

/// A host object exposed to templates. Property and method access on it goes
/// through the sandbox policy when the sandbox is enabled.
pub trait TemplateObject: Send + Sync + fmt::Debug {
    fn class_name(&self) -> &str;

    fn property(&self, _name: &str) -> Option<Value> {
        None
    }

    fn has_method(&self, _name: &str) -> bool {
        false
    }

    fn call_method(&self, name: &str, _args: &[Value]) -> Result<Value, TemplateError> {
        Err(TemplateError::runtime(format!(
            "Neither the property \"{name}\" nor the method \"{name}()\" exist in class \"{}\".",
            self.class_name()
        )))
    }

    /// String conversion, when the object supports it.
    fn to_template_string(&self) -> Option<String> {
        None
    }
}

#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    /// A string already safe for output; never escaped again.
    Markup(String),
    Seq(Vec<Value>),
    Map(Map),
    Object(Arc<dyn TemplateObject>),
    Closure(Arc<Closure>),
    Template(Arc<Template>),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Int(_) => "integer",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::Markup(_) => "markup",
            Value::Seq(_) => "sequence",
            Value::Map(_) => "mapping",
            Value::Object(_) => "object",
            Value::Closure(_) => "closure",
            Value::Template(_) => "template",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(n) => *n != 0,
            Value::Float(n) => *n != 0.0,
            Value::Str(s) | Value::Markup(s) => !s.is_empty() && s != "0",
            Value::Seq(items) => !items.is_empty(),
            Value::Map(map) => !map.is_empty(),
            Value::Object(_) | Value::Closure(_) | Value::Template(_) => true,
        }
    }

    pub fn is_iterable(&self) -> bool {
        matches!(self, Value::Seq(_) | Value::Map(_))
    }

    pub fn is_numeric(&self) -> bool {
        match self {
            Value::Int(_) | Value::Float(_) => true,
            Value::Str(s) => s.trim().parse::<f64>().is_ok(),
            _ => false,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) | Value::Markup(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            Value::Float(n) if n.fract() == 0.0 => Some(*n as i64),
            Value::Bool(b) => Some(i64::from(*b)),
            Value::Str(s) => s.trim().parse().ok(),
            Value::Null => Some(0),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Int(n) => Some(*n as f64),
            Value::Float(n) => Some(*n),
            Value::Bool(b) => Some(f64::from(u8::from(*b))),
            Value::Str(s) => s.trim().parse().ok(),
            Value::Null => Some(0.0),
            _ => None,
        }
    }

    /// Convert for output or concatenation. Objects must opt in through `to_template_string`.
    pub fn to_output(&self) -> Result<String, TemplateError> {
        Ok(match self {
            Value::Null => String::new(),
            Value::Bool(true) => "1".to_string(),
            Value::Bool(false) => String::new(),
            Value::Int(n) => n.to_string(),
            Value::Float(n) => format_float(*n),
            Value::Str(s) | Value::Markup(s) => s.clone(),
            Value::Seq(_) | Value::Map(_) => "Array".to_string(),
            Value::Object(object) => object.to_template_string().ok_or_else(|| {
                TemplateError::runtime(format!(
                    "Object of class \"{}\" could not be converted to string.",
                    object.class_name()
                ))
            })?,
            Value::Closure(_) => "Closure".to_string(),
            Value::Template(template) => template.name().to_string(),
        })
    }

    /// Lossy display used where conversion errors cannot surface (debug dumps, keys).
    pub fn to_display(&self) -> String {
        self.to_output().unwrap_or_else(|_| self.type_name().to_string())
    }

    /// Key/value pairs in iteration order; numeric map keys come back as integers.
    pub fn pairs(&self) -> Option<Vec<(Value, Value)>> {
        match self {
            Value::Seq(items) => {
                Some(items.iter().enumerate().map(|(i, v)| (Value::Int(i as i64), v.clone())).collect())
            }
            Value::Map(map) => Some(map.iter().map(|(k, v)| (key_value(k), v.clone())).collect()),
            _ => None,
        }
    }

    pub fn values(&self) -> Option<Vec<Value>> {
        match self {
            Value::Seq(items) => Some(items.clone()),
            Value::Map(map) => Some(map.values().cloned().collect()),
            _ => None,
        }
    }

    pub fn len(&self) -> Option<usize> {
        match self {
            Value::Str(s) | Value::Markup(s) => Some(s.chars().count()),
            Value::Seq(items) => Some(items.len()),
            Value::Map(map) => Some(map.len()),
            Value::Null => Some(0),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Bool(false) => true,
            Value::Str(s) | Value::Markup(s) => s.is_empty(),
            Value::Seq(items) => items.is_empty(),
            Value::Map(map) => map.is_empty(),
            _ => false,
        }
    }

    /// Look up `key` in a sequence or mapping.
    pub fn item(&self, key: &Value) -> Option<Value> {
        match self {
            Value::Seq(items) => {
                let index = key.as_int()?;
                let index = if index < 0 { items.len() as i64 + index } else { index };
                usize::try_from(index).ok().and_then(|i| items.get(i)).cloned()
            }
            Value::Map(map) => map.get(&key.to_display()).cloned(),
            _ => None,
        }
    }

    pub fn from_json(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or_default()),
            },
            serde_json::Value::String(s) => Value::Str(s),
            serde_json::Value::Array(items) => Value::Seq(items.into_iter().map(Value::from_json).collect()),
            serde_json::Value::Object(map) => {
                Value::Map(map.into_iter().map(|(k, v)| (k, Value::from_json(v))).collect())
            }
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(n) => serde_json::Value::from(*n),
            Value::Float(n) => serde_json::Number::from_f64(*n).map_or(serde_json::Value::Null, serde_json::Value::Number),
            Value::Str(s) | Value::Markup(s) => serde_json::Value::String(s.clone()),
            Value::Seq(items) => serde_json::Value::Array(items.iter().map(Value::to_json).collect()),
            Value::Map(map) => {
                serde_json::Value::Object(map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect())
            }
            Value::Object(object) => {
                object.to_template_string().map_or(serde_json::Value::Null, serde_json::Value::String)
            }
            Value::Closure(_) | Value::Template(_) => serde_json::Value::Null,
        }
    }

    /// Loose equality in the template language's sense: `1 == "1"`, `null == false`.
    pub fn loose_eq(&self, other: &Value) -> bool {
        self.compare(other) == Some(Ordering::Equal)
    }

    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        use Value::*;
        match (self, other) {
            (Null, Null) => Some(Ordering::Equal),
            (Bool(_), _) | (_, Bool(_)) | (Null, _) | (_, Null) => {
                Some(self.is_truthy().cmp(&other.is_truthy()))
            }
            (Int(a), Int(b)) => Some(a.cmp(b)),
            (Int(_) | Float(_), Int(_) | Float(_)) => self.as_float()?.partial_cmp(&other.as_float()?),
            (Int(_) | Float(_), Str(s) | Markup(s)) | (Str(s) | Markup(s), Int(_) | Float(_)) => {
                if s.trim().parse::<f64>().is_ok() {
                    self.as_float()?.partial_cmp(&other.as_float()?)
                } else {
                    Some(self.to_display().cmp(&other.to_display()))
                }
            }
            (Str(a) | Markup(a), Str(b) | Markup(b)) => {
                match (a.trim().parse::<f64>(), b.trim().parse::<f64>()) {
                    (Ok(x), Ok(y)) if !a.is_empty() && !b.is_empty() => x.partial_cmp(&y),
                    _ => Some(a.cmp(b)),
                }
            }
            (Seq(a), Seq(b)) => {
                if a.len() != b.len() {
                    return Some(a.len().cmp(&b.len()));
                }
                for (x, y) in a.iter().zip(b) {
                    match x.compare(y)? {
                        Ordering::Equal => {}
                        other => return Some(other),
                    }
                }
                Some(Ordering::Equal)
            }
            (Map(a), Map(b)) => {
                if a.len() != b.len() {
                    return Some(a.len().cmp(&b.len()));
                }
                for (key, x) in a {
                    match x.compare(b.get(key)?)? {
                        Ordering::Equal => {}
                        other => return Some(other),
                    }
                }
                Some(Ordering::Equal)
            }
            (Object(a), Object(b)) => Arc::ptr_eq(a, b).then_some(Ordering::Equal),
            (Closure(a), Closure(b)) => Arc::ptr_eq(a, b).then_some(Ordering::Equal),
            (Template(a), Template(b)) => Arc::ptr_eq(a, b).then_some(Ordering::Equal),
            _ => None,
        }
    }

    /// Identity: same type and same value (`same as`).
    pub fn same_as(&self, other: &Value) -> bool {
        use Value::*;
        match (self, other) {
            (Null, Null) => true,
            (Bool(a), Bool(b)) => a == b,
            (Int(a), Int(b)) => a == b,
            (Float(a), Float(b)) => a == b,
            (Str(a), Str(b)) | (Markup(a), Markup(b)) => a == b,
            (Seq(_), Seq(_)) | (Map(_), Map(_)) => self.loose_eq(other),
            _ => self.compare(other) == Some(Ordering::Equal) && self.type_name() == other.type_name(),
        }
    }
}

pub fn key_value(key: &str) -> Value {
    match key.parse::<i64>() {
        Ok(n) if n.to_string() == key => Value::Int(n),
        _ => Value::Str(key.to_string()),
    }
}

pub fn format_float(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{n:.0}")
    } else if n.is_nan() {
        "NAN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 { "INF".to_string() } else { "-INF".to_string() }
    } else {
        n.to_string()
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(n) => write!(f, "{n}"),
            Value::Float(n) => write!(f, "{n:?}"),
            Value::Str(s) => write!(f, "{s:?}"),
            Value::Markup(s) => write!(f, "Markup({s:?})"),
            Value::Seq(items) => f.debug_list().entries(items).finish(),
            Value::Map(map) => f.debug_map().entries(map).finish(),
            Value::Object(object) => write!(f, "{}", object.class_name()),
            Value::Closure(closure) => write!(f, "Closure({})", closure.params.join(", ")),
            Value::Template(template) => write!(f, "Template({})", template.name()),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.same_as(other)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Int(i64::from(n))
    }
}

impl From<usize> for Value {
    fn from(n: usize) -> Self {
        Value::Int(n as i64)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Float(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::Seq(items.into_iter().map(Into::into).collect())
    }
}

impl From<Map> for Value {
    fn from(map: Map) -> Self {
        Value::Map(map)
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        Value::from_json(value)
    }
}
