//! Purpose: Turn JSON Lines input into rows for `frames write`.
//! Exports: `JsonlRowSource`, `MAX_LINE_BYTES`.
//! Role: Row supply for `PagedIterator`, which groups rows into frames.
//! Invariants: Every non-blank line is one JSON object; errors carry the 1-based line number.
//! Invariants: Per-line buffering is capped at `MAX_LINE_BYTES`.
use std::io::{BufRead, Read};

use frames::api::{Error, ErrorKind, Row, RowSource};

pub const MAX_LINE_BYTES: usize = 16 * 1024 * 1024;

pub struct JsonlRowSource<R> {
    reader: R,
    line: u64,
    buf: Vec<u8>,
}

impl<R: BufRead> JsonlRowSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line: 0,
            buf: Vec::new(),
        }
    }

    pub fn lines_read(&self) -> u64 {
        self.line
    }

    fn read_line(&mut self) -> Result<bool, Error> {
        self.buf.clear();
        let limit = MAX_LINE_BYTES as u64 + 1;
        let read = (&mut self.reader)
            .take(limit)
            .read_until(b'\n', &mut self.buf)
            .map_err(|err| {
                Error::new(ErrorKind::Io)
                    .with_message("failed to read input")
                    .with_source(err)
            })?;
        if read == 0 {
            return Ok(false);
        }
        self.line += 1;
        if self.buf.len() > MAX_LINE_BYTES {
            return Err(Error::new(ErrorKind::Usage)
                .with_message(format!("input line exceeds {MAX_LINE_BYTES} bytes"))
                .with_index(self.line));
        }
        Ok(true)
    }
}

impl<R: BufRead> RowSource for JsonlRowSource<R> {
    fn next_row(&mut self) -> Result<Option<Row>, Error> {
        loop {
            if !self.read_line()? {
                return Ok(None);
            }
            let text = std::str::from_utf8(&self.buf).map_err(|err| {
                Error::new(ErrorKind::Usage)
                    .with_message("input line is not valid UTF-8")
                    .with_index(self.line)
                    .with_source(err)
            })?;
            let text = text.trim();
            if text.is_empty() {
                continue;
            }
            let value: serde_json::Value = serde_json::from_str(text).map_err(|err| {
                Error::new(ErrorKind::Usage)
                    .with_message("input line is not valid JSON")
                    .with_hint("Provide one JSON object per line.")
                    .with_index(self.line)
                    .with_source(err)
            })?;
            let row = Row::from_json(&value).map_err(|err| err.with_index(self.line))?;
            return Ok(Some(row));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::JsonlRowSource;
    use frames::api::{
        ErrorKind, FrameIterator, INDEX_FIELD, IterState, PagedIterator, RowSource, frames,
    };

    #[test]
    fn blank_lines_are_skipped() {
        let input = "{\"a\":1}\n\n  \n{\"a\":2}\n";
        let mut source = JsonlRowSource::new(input.as_bytes());
        assert!(source.next_row().expect("row").is_some());
        assert!(source.next_row().expect("row").is_some());
        assert!(source.next_row().expect("end").is_none());
        assert_eq!(source.lines_read(), 4);
    }

    #[test]
    fn errors_report_line_numbers() {
        let input = "{\"a\":1}\n{oops}\n";
        let mut source = JsonlRowSource::new(input.as_bytes());
        source.next_row().expect("first");
        let err = source.next_row().expect_err("bad json");
        assert_eq!(err.kind(), ErrorKind::Usage);
        assert_eq!(err.index(), Some(2));

        let mut source = JsonlRowSource::new("{\"a\":null}\n".as_bytes());
        let err = source.next_row().expect_err("null");
        assert_eq!(err.kind(), ErrorKind::UnknownType);
        assert_eq!(err.column(), Some("a"));
        assert_eq!(err.index(), Some(1));
    }

    #[test]
    fn rows_page_into_frames_with_index() {
        let input = (0..5)
            .map(|i| format!("{{\"{INDEX_FIELD}\":\"k{i}\",\"v\":{i}}}\n"))
            .collect::<String>();
        let source = JsonlRowSource::new(input.as_bytes());
        let pages = frames(PagedIterator::new(source, 2))
            .collect::<Result<Vec<_>, _>>()
            .expect("pages");
        let sizes: Vec<usize> = pages.iter().map(|frame| frame.len()).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
        assert_eq!(pages[0].names(), vec!["v"]);
        assert_eq!(pages[0].indices().len(), 1);
    }

    #[test]
    fn type_change_within_page_fails_iteration() {
        let input = "{\"v\":1}\n{\"v\":\"x\"}\n";
        let mut iter = PagedIterator::new(JsonlRowSource::new(input.as_bytes()), 10);
        assert!(!iter.next());
        assert_eq!(iter.state(), IterState::Failed);
        assert_eq!(iter.err().expect("err").kind(), ErrorKind::TypeMismatch);
    }
}
