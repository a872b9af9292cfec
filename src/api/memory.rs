//! Purpose: Provide an in-process, row-oriented reference backend.
//! Exports: `MemoryBackend`.
//! Role: Default backend for `frames serve` and the integration tests.
//! Invariants: Each table starts with one schema marker row that reads never return.
//! Invariants: Writes append rows in arrival order; frame labels become row fields.
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use crate::api::backend::{Backend, BoxFrameIterator};
use crate::api::request::{CreateRequest, DeleteRequest, ReadRequest, WriteReceipt, WriteRequest};
use crate::core::error::{Error, ErrorKind};
use crate::core::frame::{Frame, INDEX_FIELD, Row, SCHEMA_MARKER};
use crate::core::iter::{FrameIterator, IterState, PagedIterator, VecRowSource};
use crate::core::value::Value;

#[derive(Debug, Default)]
pub struct MemoryBackend {
    tables: Mutex<BTreeMap<String, Vec<Row>>>,
    row_limit: usize,
}

impl MemoryBackend {
    /// `row_limit` applies to reads that do not carry their own limit.
    pub fn new(row_limit: usize) -> Self {
        Self {
            tables: Mutex::new(BTreeMap::new()),
            row_limit,
        }
    }

    fn tables(&self) -> Result<MutexGuard<'_, BTreeMap<String, Vec<Row>>>, Error> {
        self.tables
            .lock()
            .map_err(|_| Error::new(ErrorKind::Internal).with_message("table lock poisoned"))
    }
}

impl Backend for MemoryBackend {
    fn read(&self, request: &ReadRequest) -> Result<BoxFrameIterator, Error> {
        reject_filter(&request.filter)?;
        let mut rows = self
            .tables()?
            .get(&request.table)
            .cloned()
            .ok_or_else(|| table_not_found(&request.table))?;

        let select_all = request.columns.is_empty() || request.columns.iter().any(|c| c == "*");
        if !select_all {
            for row in &mut rows {
                row.retain(|name| name == INDEX_FIELD || request.columns.iter().any(|c| c == name));
            }
        }

        let limit = if request.limit == 0 {
            self.row_limit
        } else {
            request.limit
        };
        tracing::debug!(table = %request.table, rows = rows.len(), limit, "memory read");
        Ok(Box::new(PagedIterator::new(VecRowSource::new(rows), limit)))
    }

    fn write(
        &self,
        request: &WriteRequest,
        frames: &mut dyn FrameIterator,
    ) -> Result<WriteReceipt, Error> {
        // Rows are staged so a stream that fails part way commits nothing.
        let mut receipt = WriteReceipt::default();
        let mut staged = Vec::new();
        while frames.next() {
            let Some(frame) = frames.take() else {
                continue;
            };
            let rows = frame_rows(&frame);
            receipt.frames += 1;
            receipt.rows += rows.len() as u64;
            staged.extend(rows);
        }
        if frames.state() != IterState::Exhausted {
            return Err(frames.take_err().unwrap_or_else(|| {
                Error::new(ErrorKind::Internal).with_message("frame stream failed")
            }));
        }
        self.tables()?
            .entry(request.table.clone())
            .or_insert_with(|| vec![schema_row()])
            .extend(staged);
        tracing::debug!(
            table = %request.table,
            frames = receipt.frames,
            rows = receipt.rows,
            "memory write"
        );
        Ok(receipt)
    }

    fn create(&self, request: &CreateRequest) -> Result<(), Error> {
        let mut schema = schema_row();
        for (name, value) in &request.attributes {
            let value = Value::from_json(value).map_err(|err| {
                Error::new(ErrorKind::Usage)
                    .with_message("table attribute has no dtype mapping")
                    .with_column(name.clone())
                    .with_source(err)
            })?;
            schema.insert(name.clone(), value);
        }

        let mut tables = self.tables()?;
        if tables.contains_key(&request.table) {
            return Err(Error::new(ErrorKind::AlreadyExists)
                .with_message(format!("table {:?} already exists", request.table)));
        }
        tables.insert(request.table.clone(), vec![schema]);
        Ok(())
    }

    fn delete(&self, request: &DeleteRequest) -> Result<(), Error> {
        reject_filter(&request.filter)?;
        let removed = self.tables()?.remove(&request.table);
        if removed.is_none() && !request.force {
            return Err(table_not_found(&request.table).with_hint("Use force to ignore missing tables."));
        }
        Ok(())
    }
}

// Label values fill fields the row does not already carry.
fn frame_rows(frame: &Frame) -> Vec<Row> {
    frame
        .iter_rows(true)
        .map(|mut row| {
            for (name, value) in frame.labels() {
                if !row.contains(name) {
                    row.insert(name.clone(), value.clone());
                }
            }
            row
        })
        .collect()
}

fn schema_row() -> Row {
    Row::new().with(INDEX_FIELD, SCHEMA_MARKER)
}

fn reject_filter(filter: &str) -> Result<(), Error> {
    if !filter.trim().is_empty() {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("the memory backend does not support filter expressions"));
    }
    Ok(())
}

fn table_not_found(table: &str) -> Error {
    Error::new(ErrorKind::NotFound).with_message(format!("table {table:?} not found"))
}

#[cfg(test)]
mod tests {
    use super::MemoryBackend;
    use crate::api::backend::Backend;
    use crate::api::request::{CreateRequest, DeleteRequest, ReadRequest, WriteRequest};
    use crate::core::builder::frame_from_rows;
    use crate::core::error::ErrorKind;
    use crate::core::frame::{Frame, INDEX_FIELD, Labels, Row};
    use crate::core::iter::{FrameIterator, PagedIterator, StreamFrameIterator, VecRowSource, frames};
    use crate::core::value::Value;
    use crate::core::wire::Encoder;
    use serde_json::json;

    fn read_request(table: &str) -> ReadRequest {
        ReadRequest {
            backend: "mem".to_string(),
            table: table.to_string(),
            ..ReadRequest::default()
        }
    }

    fn write_rows(backend: &MemoryBackend, table: &str, rows: Vec<Row>, limit: usize) {
        let request = WriteRequest {
            backend: "mem".to_string(),
            table: table.to_string(),
            session: None,
        };
        let mut iter = PagedIterator::new(VecRowSource::new(rows), limit);
        backend.write(&request, &mut iter).expect("write");
    }

    fn read_all(backend: &MemoryBackend, request: &ReadRequest) -> Vec<Frame> {
        let iter = backend.read(request).expect("read");
        frames(iter).collect::<Result<Vec<_>, _>>().expect("frames")
    }

    fn rows(count: i64) -> Vec<Row> {
        (0..count)
            .map(|i| Row::new().with(INDEX_FIELD, format!("r{i}")).with("v", i).with("w", "x"))
            .collect()
    }

    #[test]
    fn write_creates_table_and_reads_page_by_page() {
        let backend = MemoryBackend::new(256);
        write_rows(&backend, "t", rows(5), 3);

        let mut request = read_request("t");
        request.limit = 2;
        let pages = read_all(&backend, &request);
        let sizes: Vec<usize> = pages.iter().map(Frame::len).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
        assert_eq!(pages[0].indices()[0].string_at(0).expect("key"), "r0");
        assert_eq!(pages[2].column("v").expect("v").int_at(0).expect("v"), 4);
    }

    #[test]
    fn read_projects_columns_but_keeps_index() {
        let backend = MemoryBackend::new(256);
        write_rows(&backend, "t", rows(2), 10);
        let mut request = read_request("t");
        request.columns = vec!["w".to_string()];
        let pages = read_all(&backend, &request);
        assert_eq!(pages[0].names(), vec!["w"]);
        assert_eq!(pages[0].indices().len(), 1);
    }

    #[test]
    fn labels_are_stored_as_fields() {
        let backend = MemoryBackend::new(256);
        let mut labels = Labels::new();
        labels.insert("site".to_string(), Value::from("lab"));
        let frame = frame_from_rows(&rows(1), &[INDEX_FIELD], labels).expect("frame");
        let mut encoder = Encoder::new(Vec::new());
        encoder.encode(&frame).expect("encode");
        let encoded = encoder.into_inner();
        let mut iter = StreamFrameIterator::new(encoded.as_slice());
        let request = WriteRequest {
            backend: "mem".to_string(),
            table: "t".to_string(),
            session: None,
        };
        let receipt = backend.write(&request, &mut iter).expect("write");
        assert_eq!((receipt.frames, receipt.rows), (1, 1));

        let pages = read_all(&backend, &read_request("t"));
        assert_eq!(pages[0].column("site").expect("site").string_at(0).expect("site"), "lab");
    }

    #[test]
    fn failed_stream_commits_nothing() {
        let backend = MemoryBackend::new(256);
        write_rows(&backend, "t", rows(1), 10);

        let mut encoder = Encoder::new(Vec::new());
        for row in rows(2) {
            let frame = frame_from_rows(&[row], &[INDEX_FIELD], Labels::new()).expect("frame");
            encoder.encode(&frame).expect("encode");
        }
        let mut encoded = encoder.into_inner();
        encoded.extend_from_slice(b"FRM1garbage!!");
        let mut iter = StreamFrameIterator::new(encoded.as_slice());
        let request = WriteRequest {
            backend: "mem".to_string(),
            table: "t".to_string(),
            session: None,
        };
        let err = backend.write(&request, &mut iter).expect_err("corrupt tail");
        assert_eq!(err.kind(), ErrorKind::Decode);

        let pages = read_all(&backend, &read_request("t"));
        let total: usize = pages.iter().map(Frame::len).sum();
        assert_eq!(total, 1);
    }

    #[test]
    fn create_and_delete_follow_table_lifecycle() {
        let backend = MemoryBackend::new(256);
        let mut create = CreateRequest {
            backend: "mem".to_string(),
            table: "t".to_string(),
            ..CreateRequest::default()
        };
        create.attributes.insert("retention".to_string(), json!(7));
        backend.create(&create).expect("create");
        let err = backend.create(&create).expect_err("duplicate");
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);

        // Only the schema row exists, so reads end immediately.
        let mut iter = backend.read(&read_request("t")).expect("read");
        assert!(!iter.next());
        assert!(iter.err().is_none());

        let delete = DeleteRequest {
            backend: "mem".to_string(),
            table: "t".to_string(),
            ..DeleteRequest::default()
        };
        backend.delete(&delete).expect("delete");
        assert_eq!(backend.delete(&delete).expect_err("missing").kind(), ErrorKind::NotFound);
        backend
            .delete(&DeleteRequest {
                force: true,
                ..delete
            })
            .expect("forced");
        assert_eq!(
            backend.read(&read_request("t")).err().expect("gone").kind(),
            ErrorKind::NotFound
        );
    }

    #[test]
    fn filters_are_rejected() {
        let backend = MemoryBackend::new(256);
        write_rows(&backend, "t", rows(1), 1);
        let mut request = read_request("t");
        request.filter = "v > 1".to_string();
        assert_eq!(backend.read(&request).err().expect("filter").kind(), ErrorKind::Usage);
    }

    #[test]
    fn unmapped_attribute_is_rejected() {
        let backend = MemoryBackend::new(256);
        let mut create = CreateRequest {
            backend: "mem".to_string(),
            table: "t".to_string(),
            ..CreateRequest::default()
        };
        create.attributes.insert("nested".to_string(), json!({"a": 1}));
        let err = backend.create(&create).expect_err("attribute");
        assert_eq!(err.kind(), ErrorKind::Usage);
        assert_eq!(err.column(), Some("nested"));
    }
}
