// Scalar values, the closed DType set, missing sentinels, and the JSON mapping.
use std::fmt;

use serde_json::Number;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::core::error::{Error, ErrorKind};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum DType {
    Integer,
    Float,
    String,
    Timestamp,
    Boolean,
}

impl DType {
    pub const ALL: [DType; 5] = [
        DType::Integer,
        DType::Float,
        DType::String,
        DType::Timestamp,
        DType::Boolean,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            DType::Integer => "int",
            DType::Float => "float",
            DType::String => "string",
            DType::Timestamp => "time",
            DType::Boolean => "bool",
        }
    }

    pub fn parse(name: &str) -> Result<Self, Error> {
        match name {
            "int" => Ok(DType::Integer),
            "float" => Ok(DType::Float),
            "string" => Ok(DType::String),
            "time" => Ok(DType::Timestamp),
            "bool" => Ok(DType::Boolean),
            _ => Err(Error::new(ErrorKind::UnknownType)
                .with_message(format!("unknown dtype name {name:?}"))),
        }
    }

    /// The value written for rows that lack this field.
    pub fn missing(self) -> Value {
        match self {
            DType::Integer => Value::Int(0),
            DType::Float => Value::Float(f64::NAN),
            DType::String => Value::String(String::new()),
            DType::Timestamp => Value::Timestamp(OffsetDateTime::UNIX_EPOCH),
            DType::Boolean => Value::Bool(false),
        }
    }

    pub(crate) fn wire_tag(self) -> u8 {
        match self {
            DType::Integer => 1,
            DType::Float => 2,
            DType::String => 3,
            DType::Timestamp => 4,
            DType::Boolean => 5,
        }
    }

    pub(crate) fn from_wire_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(DType::Integer),
            2 => Some(DType::Float),
            3 => Some(DType::String),
            4 => Some(DType::Timestamp),
            5 => Some(DType::Boolean),
            _ => None,
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug)]
pub enum Value {
    Int(i64),
    Float(f64),
    String(String),
    Timestamp(OffsetDateTime),
    Bool(bool),
}

impl Value {
    pub fn dtype(&self) -> DType {
        match self {
            Value::Int(_) => DType::Integer,
            Value::Float(_) => DType::Float,
            Value::String(_) => DType::String,
            Value::Timestamp(_) => DType::Timestamp,
            Value::Bool(_) => DType::Boolean,
        }
    }

    pub fn is_missing(&self) -> bool {
        match self {
            Value::Int(value) => *value == 0,
            Value::Float(value) => value.is_nan(),
            Value::String(value) => value.is_empty(),
            Value::Timestamp(value) => *value == OffsetDateTime::UNIX_EPOCH,
            Value::Bool(value) => !*value,
        }
    }

    /// Maps a loosely-typed JSON value onto the closed DType set.
    ///
    /// `null`, arrays, and objects have no mapping and fail with `UnknownType`.
    pub fn from_json(value: &serde_json::Value) -> Result<Self, Error> {
        match value {
            serde_json::Value::Bool(flag) => Ok(Value::Bool(*flag)),
            serde_json::Value::String(text) => Ok(Value::String(text.clone())),
            serde_json::Value::Number(number) => {
                if let Some(int) = number.as_i64() {
                    Ok(Value::Int(int))
                } else if let Some(float) = number.as_f64() {
                    Ok(Value::Float(float))
                } else {
                    Err(Error::new(ErrorKind::UnknownType)
                        .with_message(format!("number {number} has no dtype mapping")))
                }
            }
            serde_json::Value::Null => Err(Error::new(ErrorKind::UnknownType)
                .with_message("null has no dtype mapping")
                .with_hint("Omit the field instead; missing fields are backfilled.")),
            serde_json::Value::Array(_) => Err(Error::new(ErrorKind::UnknownType)
                .with_message("arrays have no dtype mapping")),
            serde_json::Value::Object(_) => Err(Error::new(ErrorKind::UnknownType)
                .with_message("objects have no dtype mapping")),
        }
    }

    /// Renders the value as JSON; timestamps become RFC 3339 strings and
    /// non-finite floats become `null`.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Int(value) => serde_json::Value::from(*value),
            Value::Float(value) => Number::from_f64(*value)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(value) => serde_json::Value::String(value.clone()),
            Value::Timestamp(value) => match value.format(&Rfc3339) {
                Ok(text) => serde_json::Value::String(text),
                Err(_) => serde_json::Value::from(value.unix_timestamp()),
            },
            Value::Bool(value) => serde_json::Value::Bool(*value),
        }
    }
}

// Floats compare NaN-equal so that missing sentinels survive equality checks.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => float_eq(*a, *b),
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Timestamp(a), Value::Timestamp(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            _ => false,
        }
    }
}

pub(crate) fn float_eq(a: f64, b: f64) -> bool {
    a == b || (a.is_nan() && b.is_nan())
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(value.into())
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<OffsetDateTime> for Value {
    fn from(value: OffsetDateTime) -> Self {
        Value::Timestamp(value)
    }
}

/// Splits a timestamp into signed Unix seconds and sub-second nanoseconds.
pub fn timestamp_parts(value: OffsetDateTime) -> (i64, u32) {
    (value.unix_timestamp(), value.nanosecond())
}

pub fn timestamp_from_parts(seconds: i64, nanos: u32) -> Result<OffsetDateTime, Error> {
    if nanos >= 1_000_000_000 {
        return Err(Error::new(ErrorKind::OutOfRange)
            .with_message(format!("timestamp nanos {nanos} exceed one second")));
    }
    let total = i128::from(seconds) * 1_000_000_000 + i128::from(nanos);
    OffsetDateTime::from_unix_timestamp_nanos(total).map_err(|err| {
        Error::new(ErrorKind::OutOfRange)
            .with_message("timestamp outside representable range")
            .with_source(err)
    })
}
