// Row-to-frame assembly with per-field type inference and missing-value backfill.
use std::collections::HashMap;

use crate::core::column::Column;
use crate::core::error::{Error, ErrorKind};
use crate::core::frame::{Frame, Labels, Row};

/// Accumulates rows into columns, one column per distinct field.
///
/// A field's dtype is fixed by the first row that carries it. Rows that lack a
/// known field get the dtype's missing sentinel, and a field first seen at row
/// `n` is backfilled with sentinels for rows `0..n` so every column always has
/// `row_count()` entries.
#[derive(Debug, Default)]
pub struct FrameBuilder {
    index_names: Vec<String>,
    columns: Vec<Column>,
    positions: HashMap<String, usize>,
    rows: usize,
}

impl FrameBuilder {
    pub fn new<I, S>(index_names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            index_names: index_names.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn row_count(&self) -> usize {
        self.rows
    }

    /// Appends one row. On error the builder is left unchanged.
    pub fn push_row(&mut self, row: &Row) -> Result<(), Error> {
        for (name, value) in row.iter() {
            if let Some(position) = self.positions.get(name) {
                let expected = self.columns[*position].dtype();
                if value.dtype() != expected {
                    return Err(Error::new(ErrorKind::TypeMismatch)
                        .with_message(format!(
                            "field holds {} value but column is {expected}",
                            value.dtype()
                        ))
                        .with_column(name)
                        .with_index(self.rows as u64));
                }
            }
        }

        for (name, value) in row.iter() {
            let position = match self.positions.get(name) {
                Some(position) => *position,
                None => {
                    let column = Column::missing(name, value.dtype(), self.rows);
                    self.columns.push(column);
                    self.positions.insert(name.to_string(), self.columns.len() - 1);
                    self.columns.len() - 1
                }
            };
            self.columns[position].append(value.clone())?;
        }

        for column in &mut self.columns {
            if column.len() == self.rows {
                let missing = column.dtype().missing();
                column.append(missing)?;
            }
        }
        self.rows += 1;
        Ok(())
    }

    /// Splits accumulated columns into data and index sets and builds the frame.
    ///
    /// Index columns follow the order given to `new`; index names that never
    /// appeared in any row are skipped.
    pub fn finish(self, labels: Labels) -> Result<Frame, Error> {
        let FrameBuilder {
            index_names,
            columns,
            ..
        } = self;

        let mut data = Vec::with_capacity(columns.len());
        let mut found: HashMap<String, Column> = HashMap::new();
        for column in columns {
            if index_names.iter().any(|name| name == column.name()) {
                found.insert(column.name().to_string(), column);
            } else {
                data.push(column);
            }
        }
        let indices = index_names
            .iter()
            .filter_map(|name| found.remove(name))
            .collect();
        Frame::new(data, indices, labels)
    }
}

/// Builds one frame from `rows`, routing `index_names` fields to index columns.
pub fn frame_from_rows<'a, I>(rows: I, index_names: &[&str], labels: Labels) -> Result<Frame, Error>
where
    I: IntoIterator<Item = &'a Row>,
{
    let mut builder = FrameBuilder::new(index_names.iter().copied());
    for row in rows {
        builder.push_row(row)?;
    }
    builder.finish(labels)
}

#[cfg(test)]
mod tests {
    use super::{FrameBuilder, frame_from_rows};
    use crate::core::error::ErrorKind;
    use crate::core::frame::{INDEX_FIELD, Labels, Row};
    use crate::core::value::{DType, Value};

    #[test]
    fn sparse_rows_are_backfilled() {
        let rows = vec![
            Row::new().with("x", 1).with("y", "a"),
            Row::new().with("x", 2).with("z", 1.0),
            Row::new().with("x", 3).with("y", "b").with("z", 2.0),
        ];
        let frame = frame_from_rows(&rows, &[], Labels::new()).expect("frame");
        assert_eq!(frame.names(), vec!["x", "y", "z"]);
        assert_eq!(frame.len(), 3);

        let y = frame.column("y").expect("y");
        assert_eq!(y.dtype(), DType::String);
        assert_eq!(y.strings().expect("strings"), vec!["a", "", "b"]);

        let z = frame.column("z").expect("z");
        assert_eq!(z.dtype(), DType::Float);
        assert!(z.float_at(0).expect("z0").is_nan());
        assert_eq!(z.float_at(2).expect("z2"), 2.0);
    }

    #[test]
    fn index_fields_become_index_columns() {
        let rows = vec![
            Row::new().with(INDEX_FIELD, "k1").with("v", 1),
            Row::new().with(INDEX_FIELD, "k2").with("v", 2),
        ];
        let frame = frame_from_rows(&rows, &[INDEX_FIELD, "absent"], Labels::new()).expect("frame");
        assert_eq!(frame.names(), vec!["v"]);
        assert_eq!(frame.indices().len(), 1);
        assert_eq!(frame.indices()[0].name(), INDEX_FIELD);
        assert_eq!(frame.indices()[0].string_at(1).expect("k2"), "k2");
    }

    #[test]
    fn conflicting_types_leave_builder_unchanged() {
        let mut builder = FrameBuilder::new(Vec::<String>::new());
        builder.push_row(&Row::new().with("x", 1)).expect("row");
        let err = builder
            .push_row(&Row::new().with("y", true).with("x", "one"))
            .expect_err("mismatch");
        assert_eq!(err.kind(), ErrorKind::TypeMismatch);
        assert_eq!(err.column(), Some("x"));
        assert_eq!(err.index(), Some(1));
        assert_eq!(builder.row_count(), 1);

        let frame = builder.finish(Labels::new()).expect("frame");
        assert_eq!(frame.names(), vec!["x"]);
    }

    #[test]
    fn labels_are_carried() {
        let mut labels = Labels::new();
        labels.insert("region".to_string(), Value::from("eu"));
        let rows = vec![Row::new().with("x", 1)];
        let frame = frame_from_rows(&rows, &[], labels).expect("frame");
        assert_eq!(frame.labels().get("region"), Some(&Value::from("eu")));
    }

    #[test]
    fn no_rows_build_an_empty_frame() {
        let frame = frame_from_rows(&Vec::<Row>::new(), &[], Labels::new()).expect("frame");
        assert!(frame.is_empty());
        assert!(frame.names().is_empty());
    }
}
