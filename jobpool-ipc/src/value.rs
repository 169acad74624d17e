//! Job Argument and Result Values
//!
//! Plain data that can cross the process boundary. Every variant is flat
//! (no nesting) so the archived form stays simple to validate.

use rkyv::{Archive, Deserialize as RkyvDeserialize, Serialize as RkyvSerialize};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// A single argument or result value.
///
/// Serde uses the untagged form, so batch files can write `3`, `"abc"`,
/// `[1, 2, 3]` or `null` directly. Only `Bytes` is wrapped in an object.
#[derive(
    Debug, Clone, PartialEq, Default, Archive, RkyvSerialize, RkyvDeserialize, Serialize, Deserialize,
)]
#[archive(check_bytes)]
#[serde(untagged)]
pub enum Value {
    /// No value
    #[default]
    Unit,
    /// Boolean
    Bool(bool),
    /// Signed integer
    Int(i64),
    /// Floating point number
    Float(f64),
    /// UTF-8 string
    Str(String),
    /// List of integers (e.g. an array to sort)
    IntList(Vec<i64>),
    /// List of floats
    FloatList(Vec<f64>),
    /// Opaque bytes, written to JSON as `{"bytes": [...]}`
    Bytes(#[serde(with = "bytes_object")] Vec<u8>),
}

/// A bare number array would read back as `IntList`
mod bytes_object {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Serialize, Deserialize)]
    #[serde(deny_unknown_fields)]
    struct Tagged<T> {
        bytes: T,
    }

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        Tagged { bytes }.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        Tagged::<Vec<u8>>::deserialize(deserializer).map(|t| t.bytes)
    }
}

impl Value {
    /// Name of the variant, used in error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Unit => "unit",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::IntList(_) => "int list",
            Value::FloatList(_) => "float list",
            Value::Bytes(_) => "bytes",
        }
    }

    /// Integer content, if any
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Float content; integers are widened
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            Value::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// Boolean content, if any
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// String content, if any
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(v) => Some(v),
            _ => None,
        }
    }

    /// Integer list content, if any
    pub fn as_int_list(&self) -> Option<&[i64]> {
        match self {
            Value::IntList(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Unit => write!(f, "()"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Str(v) => write!(f, "{v:?}"),
            Value::IntList(v) => write!(f, "{v:?}"),
            Value::FloatList(v) => write!(f, "{v:?}"),
            Value::Bytes(v) => write!(f, "<{} bytes>", v.len()),
        }
    }
}

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value::Unit
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<Vec<i64>> for Value {
    fn from(v: Vec<i64>) -> Self {
        Value::IntList(v)
    }
}

impl From<Vec<f64>> for Value {
    fn from(v: Vec<f64>) -> Self {
        Value::FloatList(v)
    }
}

/// Errors raised by the typed argument accessors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ArgError {
    /// Positional argument index out of range
    #[error("missing positional argument {0}")]
    MissingPositional(usize),

    /// Keyword argument not supplied
    #[error("missing keyword argument `{0}`")]
    MissingKeyword(String),

    /// Argument present with another type
    #[error("argument {name} should be {expected}, got {got}")]
    WrongType {
        /// Position or keyword of the argument
        name: String,
        /// Expected variant
        expected: &'static str,
        /// Variant actually supplied
        got: &'static str,
    },
}

/// A named argument
#[derive(
    Debug, Clone, PartialEq, Archive, RkyvSerialize, RkyvDeserialize, Serialize, Deserialize,
)]
#[archive(check_bytes)]
pub struct KeywordArg {
    /// Keyword
    pub name: String,
    /// Bound value
    pub value: Value,
}

/// Positional and keyword arguments for one job
#[derive(
    Debug,
    Clone,
    PartialEq,
    Default,
    Archive,
    RkyvSerialize,
    RkyvDeserialize,
    Serialize,
    Deserialize,
)]
#[archive(check_bytes)]
pub struct JobArgs {
    /// Arguments by position
    #[serde(default)]
    pub positional: Vec<Value>,
    /// Arguments by name, in insertion order
    #[serde(default)]
    pub keyword: Vec<KeywordArg>,
}

impl JobArgs {
    /// No arguments
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from positional values only
    pub fn positional(values: impl IntoIterator<Item = Value>) -> Self {
        Self {
            positional: values.into_iter().collect(),
            keyword: Vec::new(),
        }
    }

    /// Append a positional argument
    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.positional.push(value.into());
        self
    }

    /// Set a keyword argument, replacing an earlier binding of the same name
    pub fn kwarg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        let name = name.into();
        let value = value.into();
        match self.keyword.iter_mut().find(|k| k.name == name) {
            Some(existing) => existing.value = value,
            None => self.keyword.push(KeywordArg { name, value }),
        }
        self
    }

    /// Positional argument `index`
    pub fn get(&self, index: usize) -> Result<&Value, ArgError> {
        self.positional
            .get(index)
            .ok_or(ArgError::MissingPositional(index))
    }

    /// Keyword argument `name`, if supplied
    pub fn get_kwarg(&self, name: &str) -> Option<&Value> {
        self.keyword
            .iter()
            .find(|k| k.name == name)
            .map(|k| &k.value)
    }

    /// Keyword argument `name`, required
    pub fn require_kwarg(&self, name: &str) -> Result<&Value, ArgError> {
        self.get_kwarg(name)
            .ok_or_else(|| ArgError::MissingKeyword(name.to_string()))
    }

    /// Positional integer
    pub fn int(&self, index: usize) -> Result<i64, ArgError> {
        let value = self.get(index)?;
        value
            .as_int()
            .ok_or_else(|| wrong_type(format!("#{index}"), "int", value))
    }

    /// Positional float (integers accepted)
    pub fn float(&self, index: usize) -> Result<f64, ArgError> {
        let value = self.get(index)?;
        value
            .as_float()
            .ok_or_else(|| wrong_type(format!("#{index}"), "float", value))
    }

    /// Positional string
    pub fn str(&self, index: usize) -> Result<&str, ArgError> {
        let value = self.get(index)?;
        value
            .as_str()
            .ok_or_else(|| wrong_type(format!("#{index}"), "str", value))
    }

    /// Positional integer list
    pub fn int_list(&self, index: usize) -> Result<&[i64], ArgError> {
        let value = self.get(index)?;
        value
            .as_int_list()
            .ok_or_else(|| wrong_type(format!("#{index}"), "int list", value))
    }

    /// Keyword integer with a default
    pub fn int_or(&self, name: &str, default: i64) -> Result<i64, ArgError> {
        match self.get_kwarg(name) {
            None => Ok(default),
            Some(value) => value
                .as_int()
                .ok_or_else(|| wrong_type(name.to_string(), "int", value)),
        }
    }

    /// Keyword boolean with a default
    pub fn bool_or(&self, name: &str, default: bool) -> Result<bool, ArgError> {
        match self.get_kwarg(name) {
            None => Ok(default),
            Some(value) => value
                .as_bool()
                .ok_or_else(|| wrong_type(name.to_string(), "bool", value)),
        }
    }
}

fn wrong_type(name: String, expected: &'static str, got: &Value) -> ArgError {
    ArgError::WrongType {
        name,
        expected,
        got: got.type_name(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typed_accessors() {
        let args = JobArgs::new()
            .arg(3i64)
            .arg(vec![3i64, 1, 2])
            .kwarg("reverse", true);
        assert_eq!(args.int(0), Ok(3));
        assert_eq!(args.float(0), Ok(3.0));
        assert_eq!(args.int_list(1), Ok(&[3i64, 1, 2][..]));
        assert_eq!(args.bool_or("reverse", false), Ok(true));
        assert_eq!(args.int_or("limit", 10), Ok(10));
    }

    #[test]
    fn test_accessor_errors() {
        let args = JobArgs::new().arg("text");
        assert_eq!(args.int(1), Err(ArgError::MissingPositional(1)));
        assert!(matches!(
            args.int(0),
            Err(ArgError::WrongType { expected: "int", got: "str", .. })
        ));
        assert_eq!(
            args.require_kwarg("n"),
            Err(ArgError::MissingKeyword("n".to_string()))
        );
    }

    #[test]
    fn test_kwarg_rebinding_replaces() {
        let args = JobArgs::new().kwarg("n", 1i64).kwarg("n", 2i64);
        assert_eq!(args.keyword.len(), 1);
        assert_eq!(args.get_kwarg("n"), Some(&Value::Int(2)));
    }

    #[test]
    fn test_untagged_json() {
        let values: Vec<Value> =
            serde_json::from_str(r#"[null, true, 4, 2.5, "x", [1, 2]]"#).unwrap();
        assert_eq!(
            values,
            vec![
                Value::Unit,
                Value::Bool(true),
                Value::Int(4),
                Value::Float(2.5),
                Value::Str("x".to_string()),
                Value::IntList(vec![1, 2]),
            ]
        );
    }

    #[test]
    fn test_bytes_survive_json() {
        let values = vec![Value::Bytes(vec![0, 255, 7]), Value::IntList(vec![0, 255, 7])];
        let json = serde_json::to_string(&values).unwrap();
        assert_eq!(json, r#"[{"bytes":[0,255,7]},[0,255,7]]"#);

        let back: Vec<Value> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, values);
    }

    #[test]
    fn test_display() {
        assert_eq!(Value::Int(16).to_string(), "16");
        assert_eq!(Value::Str("a".into()).to_string(), "\"a\"");
        assert_eq!(Value::Bytes(vec![0; 4]).to_string(), "<4 bytes>");
    }
}
