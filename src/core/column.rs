// Named, typed columns: materialized (owned typed storage) or broadcast (one scalar + length).
use time::OffsetDateTime;

use crate::core::error::{Error, ErrorKind};
use crate::core::value::{DType, Value, float_eq};

/// Typed backing storage for a materialized column.
#[derive(Clone, Debug)]
pub enum ColumnData {
    Int(Vec<i64>),
    Float(Vec<f64>),
    String(Vec<String>),
    Timestamp(Vec<OffsetDateTime>),
    Bool(Vec<bool>),
}

impl ColumnData {
    pub fn empty(dtype: DType) -> Self {
        Self::with_capacity(dtype, 0)
    }

    pub fn with_capacity(dtype: DType, capacity: usize) -> Self {
        match dtype {
            DType::Integer => ColumnData::Int(Vec::with_capacity(capacity)),
            DType::Float => ColumnData::Float(Vec::with_capacity(capacity)),
            DType::String => ColumnData::String(Vec::with_capacity(capacity)),
            DType::Timestamp => ColumnData::Timestamp(Vec::with_capacity(capacity)),
            DType::Boolean => ColumnData::Bool(Vec::with_capacity(capacity)),
        }
    }

    /// Storage of `len` missing sentinels.
    pub fn missing(dtype: DType, len: usize) -> Self {
        match dtype {
            DType::Integer => ColumnData::Int(vec![0; len]),
            DType::Float => ColumnData::Float(vec![f64::NAN; len]),
            DType::String => ColumnData::String(vec![String::new(); len]),
            DType::Timestamp => ColumnData::Timestamp(vec![OffsetDateTime::UNIX_EPOCH; len]),
            DType::Boolean => ColumnData::Bool(vec![false; len]),
        }
    }

    pub fn dtype(&self) -> DType {
        match self {
            ColumnData::Int(_) => DType::Integer,
            ColumnData::Float(_) => DType::Float,
            ColumnData::String(_) => DType::String,
            ColumnData::Timestamp(_) => DType::Timestamp,
            ColumnData::Bool(_) => DType::Boolean,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ColumnData::Int(data) => data.len(),
            ColumnData::Float(data) => data.len(),
            ColumnData::String(data) => data.len(),
            ColumnData::Timestamp(data) => data.len(),
            ColumnData::Bool(data) => data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn get(&self, index: usize) -> Option<Value> {
        match self {
            ColumnData::Int(data) => data.get(index).map(|v| Value::Int(*v)),
            ColumnData::Float(data) => data.get(index).map(|v| Value::Float(*v)),
            ColumnData::String(data) => data.get(index).map(|v| Value::String(v.clone())),
            ColumnData::Timestamp(data) => data.get(index).map(|v| Value::Timestamp(*v)),
            ColumnData::Bool(data) => data.get(index).map(|v| Value::Bool(*v)),
        }
    }

    /// Pushes `value`, handing it back unchanged when its dtype disagrees.
    pub(crate) fn push(&mut self, value: Value) -> Result<(), Value> {
        match (self, value) {
            (ColumnData::Int(data), Value::Int(v)) => data.push(v),
            (ColumnData::Float(data), Value::Float(v)) => data.push(v),
            (ColumnData::String(data), Value::String(v)) => data.push(v),
            (ColumnData::Timestamp(data), Value::Timestamp(v)) => data.push(v),
            (ColumnData::Bool(data), Value::Bool(v)) => data.push(v),
            (_, value) => return Err(value),
        }
        Ok(())
    }

    fn slice(&self, start: usize, end: usize) -> Self {
        match self {
            ColumnData::Int(data) => ColumnData::Int(data[start..end].to_vec()),
            ColumnData::Float(data) => ColumnData::Float(data[start..end].to_vec()),
            ColumnData::String(data) => ColumnData::String(data[start..end].to_vec()),
            ColumnData::Timestamp(data) => ColumnData::Timestamp(data[start..end].to_vec()),
            ColumnData::Bool(data) => ColumnData::Bool(data[start..end].to_vec()),
        }
    }
}

impl PartialEq for ColumnData {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (ColumnData::Int(a), ColumnData::Int(b)) => a == b,
            (ColumnData::Float(a), ColumnData::Float(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| float_eq(*x, *y))
            }
            (ColumnData::String(a), ColumnData::String(b)) => a == b,
            (ColumnData::Timestamp(a), ColumnData::Timestamp(b)) => a == b,
            (ColumnData::Bool(a), ColumnData::Bool(b)) => a == b,
            _ => false,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Column {
    Materialized { name: String, data: ColumnData },
    /// Broadcast columns reject `append`; their length is fixed at construction.
    Broadcast { name: String, value: Value, len: usize },
}

impl Column {
    pub fn materialized(name: impl Into<String>, data: ColumnData) -> Self {
        Column::Materialized {
            name: name.into(),
            data,
        }
    }

    pub fn broadcast(name: impl Into<String>, value: impl Into<Value>, len: usize) -> Self {
        Column::Broadcast {
            name: name.into(),
            value: value.into(),
            len,
        }
    }

    /// A materialized column of `len` missing sentinels.
    pub fn missing(name: impl Into<String>, dtype: DType, len: usize) -> Self {
        Self::materialized(name, ColumnData::missing(dtype, len))
    }

    pub fn name(&self) -> &str {
        match self {
            Column::Materialized { name, .. } | Column::Broadcast { name, .. } => name,
        }
    }

    pub fn dtype(&self) -> DType {
        match self {
            Column::Materialized { data, .. } => data.dtype(),
            Column::Broadcast { value, .. } => value.dtype(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Column::Materialized { data, .. } => data.len(),
            Column::Broadcast { len, .. } => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_broadcast(&self) -> bool {
        matches!(self, Column::Broadcast { .. })
    }

    pub fn value_at(&self, index: usize) -> Result<Value, Error> {
        self.check_index(index)?;
        match self {
            Column::Materialized { data, .. } => data.get(index).ok_or_else(|| {
                Error::new(ErrorKind::Internal).with_message("column storage shorter than length")
            }),
            Column::Broadcast { value, .. } => Ok(value.clone()),
        }
    }

    pub fn int_at(&self, index: usize) -> Result<i64, Error> {
        match self.typed_at(index, DType::Integer)? {
            Value::Int(value) => Ok(value),
            _ => Err(self.type_mismatch(DType::Integer)),
        }
    }

    pub fn float_at(&self, index: usize) -> Result<f64, Error> {
        match self.typed_at(index, DType::Float)? {
            Value::Float(value) => Ok(value),
            _ => Err(self.type_mismatch(DType::Float)),
        }
    }

    pub fn string_at(&self, index: usize) -> Result<String, Error> {
        match self.typed_at(index, DType::String)? {
            Value::String(value) => Ok(value),
            _ => Err(self.type_mismatch(DType::String)),
        }
    }

    pub fn time_at(&self, index: usize) -> Result<OffsetDateTime, Error> {
        match self.typed_at(index, DType::Timestamp)? {
            Value::Timestamp(value) => Ok(value),
            _ => Err(self.type_mismatch(DType::Timestamp)),
        }
    }

    pub fn bool_at(&self, index: usize) -> Result<bool, Error> {
        match self.typed_at(index, DType::Boolean)? {
            Value::Bool(value) => Ok(value),
            _ => Err(self.type_mismatch(DType::Boolean)),
        }
    }

    pub fn append(&mut self, value: Value) -> Result<(), Error> {
        match self {
            Column::Materialized { name, data } => data.push(value).map_err(|value| {
                Error::new(ErrorKind::TypeMismatch)
                    .with_message(format!(
                        "cannot append {} value to {} column",
                        value.dtype(),
                        data.dtype()
                    ))
                    .with_column(name.clone())
            }),
            Column::Broadcast { name, .. } => Err(Error::new(ErrorKind::Usage)
                .with_message("broadcast columns do not support append")
                .with_column(name.clone())),
        }
    }

    /// Rows `[start, end)` of this column, keeping its variant.
    pub fn slice(&self, start: usize, end: usize) -> Result<Column, Error> {
        if start > end || end > self.len() {
            return Err(Error::new(ErrorKind::OutOfRange)
                .with_message(format!(
                    "slice [{start}:{end}] outside column of length {}",
                    self.len()
                ))
                .with_column(self.name()));
        }
        Ok(match self {
            Column::Materialized { name, data } => Column::Materialized {
                name: name.clone(),
                data: data.slice(start, end),
            },
            Column::Broadcast { name, value, .. } => Column::Broadcast {
                name: name.clone(),
                value: value.clone(),
                len: end - start,
            },
        })
    }

    pub fn ints(&self) -> Result<Vec<i64>, Error> {
        self.collect_typed(DType::Integer, |value| match value {
            Value::Int(v) => Some(v),
            _ => None,
        })
    }

    pub fn floats(&self) -> Result<Vec<f64>, Error> {
        self.collect_typed(DType::Float, |value| match value {
            Value::Float(v) => Some(v),
            _ => None,
        })
    }

    pub fn strings(&self) -> Result<Vec<String>, Error> {
        self.collect_typed(DType::String, |value| match value {
            Value::String(v) => Some(v),
            _ => None,
        })
    }

    pub fn times(&self) -> Result<Vec<OffsetDateTime>, Error> {
        self.collect_typed(DType::Timestamp, |value| match value {
            Value::Timestamp(v) => Some(v),
            _ => None,
        })
    }

    pub fn bools(&self) -> Result<Vec<bool>, Error> {
        self.collect_typed(DType::Boolean, |value| match value {
            Value::Bool(v) => Some(v),
            _ => None,
        })
    }

    fn collect_typed<T>(
        &self,
        dtype: DType,
        unwrap: impl Fn(Value) -> Option<T>,
    ) -> Result<Vec<T>, Error> {
        if self.dtype() != dtype {
            return Err(self.type_mismatch(dtype));
        }
        (0..self.len())
            .map(|index| {
                let value = self.value_at(index)?;
                unwrap(value).ok_or_else(|| self.type_mismatch(dtype))
            })
            .collect()
    }

    fn typed_at(&self, index: usize, dtype: DType) -> Result<Value, Error> {
        if self.dtype() != dtype {
            return Err(self.type_mismatch(dtype));
        }
        self.value_at(index)
    }

    fn check_index(&self, index: usize) -> Result<(), Error> {
        if index >= self.len() {
            return Err(Error::new(ErrorKind::OutOfRange)
                .with_message(format!("index out of range [0:{})", self.len()))
                .with_column(self.name())
                .with_index(index as u64));
        }
        Ok(())
    }

    fn type_mismatch(&self, requested: DType) -> Error {
        Error::new(ErrorKind::TypeMismatch)
            .with_message(format!(
                "requested {requested} from {} column",
                self.dtype()
            ))
            .with_column(self.name())
    }
}
