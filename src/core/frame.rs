// Frames: name-unique data columns, index columns, and labels sharing one row count.
use std::collections::{BTreeMap, HashMap, HashSet};

use crate::core::column::Column;
use crate::core::error::{Error, ErrorKind};
use crate::core::value::Value;

/// Field name row-oriented sources use for a row's natural index key.
pub const INDEX_FIELD: &str = "__name";

/// `INDEX_FIELD` value marking an internal schema row rather than data.
pub const SCHEMA_MARKER: &str = ".#schema";

pub type Labels = BTreeMap<String, Value>;

/// One row as ordered `(field, value)` pairs; fields are optional per row.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Row {
    fields: Vec<(String, Value)>,
}

impl Row {
    pub fn new() -> Self {
        Self { fields: Vec::new() }
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    /// Sets `name`, replacing an existing value in place.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        let name = name.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(field, _)| *field == name) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn retain(&mut self, mut keep: impl FnMut(&str) -> bool) {
        self.fields.retain(|(name, _)| keep(name));
    }

    /// Builds a row from a JSON object, mapping each field through `Value::from_json`.
    pub fn from_json(value: &serde_json::Value) -> Result<Self, Error> {
        let object = value.as_object().ok_or_else(|| {
            Error::new(ErrorKind::Usage).with_message("row must be a JSON object")
        })?;
        let mut row = Row::new();
        for (name, field) in object {
            let value = Value::from_json(field).map_err(|err| err.with_column(name.clone()))?;
            row.insert(name.clone(), value);
        }
        Ok(row)
    }

    pub fn to_json(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        for (name, value) in self.iter() {
            map.insert(name.to_string(), value.to_json());
        }
        serde_json::Value::Object(map)
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Row {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut row = Row::new();
        for (name, value) in iter {
            row.insert(name, value);
        }
        row
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Frame {
    columns: Vec<Column>,
    indices: Vec<Column>,
    labels: Labels,
    by_name: HashMap<String, usize>,
    len: usize,
}

impl Frame {
    pub fn new(columns: Vec<Column>, indices: Vec<Column>, labels: Labels) -> Result<Self, Error> {
        let len = columns
            .first()
            .or_else(|| indices.first())
            .map(Column::len)
            .unwrap_or(0);

        let mut by_name = HashMap::with_capacity(columns.len());
        for (position, column) in columns.iter().enumerate() {
            if by_name.insert(column.name().to_string(), position).is_some() {
                return Err(Error::new(ErrorKind::Usage)
                    .with_message("duplicate column name")
                    .with_column(column.name()));
            }
        }
        // Rows carry index and data values side by side, so the names share one namespace.
        let mut index_names = HashSet::with_capacity(indices.len());
        for column in &indices {
            if by_name.contains_key(column.name()) || !index_names.insert(column.name()) {
                return Err(Error::new(ErrorKind::Usage)
                    .with_message("duplicate index column name")
                    .with_column(column.name()));
            }
        }

        for column in columns.iter().chain(indices.iter()) {
            if column.len() != len {
                return Err(Error::new(ErrorKind::Usage)
                    .with_message(format!(
                        "column length {} differs from frame length {len}",
                        column.len()
                    ))
                    .with_column(column.name()));
            }
        }

        Ok(Self {
            columns,
            indices,
            labels,
            by_name,
            len,
        })
    }

    pub fn names(&self) -> Vec<&str> {
        self.columns.iter().map(Column::name).collect()
    }

    pub fn column(&self, name: &str) -> Result<&Column, Error> {
        self.by_name
            .get(name)
            .map(|position| &self.columns[*position])
            .ok_or_else(|| {
                Error::new(ErrorKind::NotFound)
                    .with_message("column not found")
                    .with_column(name)
            })
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn indices(&self) -> &[Column] {
        &self.indices
    }

    pub fn labels(&self) -> &Labels {
        &self.labels
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn slice(&self, start: usize, end: usize) -> Result<Frame, Error> {
        if start > end || end > self.len {
            return Err(Error::new(ErrorKind::OutOfRange).with_message(format!(
                "slice [{start}:{end}] outside frame of length {}",
                self.len
            )));
        }
        let columns = self
            .columns
            .iter()
            .map(|column| column.slice(start, end))
            .collect::<Result<Vec<_>, _>>()?;
        let indices = self
            .indices
            .iter()
            .map(|column| column.slice(start, end))
            .collect::<Result<Vec<_>, _>>()?;
        Frame::new(columns, indices, self.labels.clone())
    }

    /// Lazily yields one `Row` per frame row; each call starts from row zero.
    pub fn iter_rows(&self, include_indices: bool) -> RowIter<'_> {
        RowIter {
            frame: self,
            include_indices,
            next: 0,
        }
    }
}

pub struct RowIter<'a> {
    frame: &'a Frame,
    include_indices: bool,
    next: usize,
}

impl Iterator for RowIter<'_> {
    type Item = Row;

    fn next(&mut self) -> Option<Row> {
        if self.next >= self.frame.len {
            return None;
        }
        let index = self.next;
        self.next += 1;

        let mut row = Row::new();
        let indices: &[Column] = if self.include_indices {
            &self.frame.indices
        } else {
            &[]
        };
        for column in indices.iter().chain(self.frame.columns.iter()) {
            // Lengths were validated at construction.
            if let Ok(value) = column.value_at(index) {
                row.insert(column.name(), value);
            }
        }
        Some(row)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.frame.len.saturating_sub(self.next);
        (remaining, Some(remaining))
    }
}
