// Frame iteration: the advance-then-check contract, row-limited paging, and stream decoding.
use std::io::Read;

use crate::core::builder::FrameBuilder;
use crate::core::error::Error;
use crate::core::frame::{Frame, INDEX_FIELD, Labels, Row, SCHEMA_MARKER};
use crate::core::value::Value;
use crate::core::wire::Decoder;

pub const DEFAULT_ROW_LIMIT: usize = 256;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum IterState {
    Ready,
    Exhausted,
    Failed,
}

/// Lazy, forward-only sequence of frames.
///
/// `next()` advances and returns `false` at the end. A `false` return is
/// either a clean end (`state() == Exhausted`, `err()` is `None`) or a failure
/// (`state() == Failed`, `err()` holds the cause). `at()` is only meaningful
/// directly after `next()` returned `true`.
pub trait FrameIterator {
    fn next(&mut self) -> bool;
    fn at(&self) -> Option<&Frame>;
    /// Moves the current frame out; `at()` returns `None` afterwards.
    fn take(&mut self) -> Option<Frame>;
    fn err(&self) -> Option<&Error>;
    /// Moves the terminal error out; `err()` returns `None` afterwards.
    fn take_err(&mut self) -> Option<Error>;
    fn state(&self) -> IterState;
}

impl<I: FrameIterator + ?Sized> FrameIterator for Box<I> {
    fn next(&mut self) -> bool {
        (**self).next()
    }

    fn at(&self) -> Option<&Frame> {
        (**self).at()
    }

    fn take(&mut self) -> Option<Frame> {
        (**self).take()
    }

    fn err(&self) -> Option<&Error> {
        (**self).err()
    }

    fn take_err(&mut self) -> Option<Error> {
        (**self).take_err()
    }

    fn state(&self) -> IterState {
        (**self).state()
    }
}

/// Adapts a `FrameIterator` into a std iterator of `Result<Frame, Error>`.
///
/// A failure is yielded once as `Err`, after which the adapter ends.
pub fn frames<I: FrameIterator>(iter: I) -> Frames<I> {
    Frames { iter, done: false }
}

pub struct Frames<I> {
    iter: I,
    done: bool,
}

impl<I: FrameIterator> Iterator for Frames<I> {
    type Item = Result<Frame, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if self.iter.next() {
            if let Some(frame) = self.iter.take() {
                return Some(Ok(frame));
            }
        }
        self.done = true;
        self.iter.take_err().map(Err)
    }
}

/// Pull-based row supply for `PagedIterator`.
pub trait RowSource {
    /// `Ok(None)` marks the end of the source.
    fn next_row(&mut self) -> Result<Option<Row>, Error>;
}

pub struct VecRowSource {
    rows: std::vec::IntoIter<Row>,
}

impl VecRowSource {
    pub fn new(rows: Vec<Row>) -> Self {
        Self {
            rows: rows.into_iter(),
        }
    }
}

impl RowSource for VecRowSource {
    fn next_row(&mut self) -> Result<Option<Row>, Error> {
        Ok(self.rows.next())
    }
}

/// Groups rows from a `RowSource` into frames of at most `limit` rows.
///
/// Schema marker rows are skipped, and `__name` values land in the index set.
pub struct PagedIterator<S> {
    source: S,
    limit: usize,
    labels: Labels,
    current: Option<Frame>,
    error: Option<Error>,
    state: IterState,
    drained: bool,
}

impl<S: RowSource> PagedIterator<S> {
    /// A `limit` of zero selects `DEFAULT_ROW_LIMIT`.
    pub fn new(source: S, limit: usize) -> Self {
        Self {
            source,
            limit: if limit == 0 { DEFAULT_ROW_LIMIT } else { limit },
            labels: Labels::new(),
            current: None,
            error: None,
            state: IterState::Ready,
            drained: false,
        }
    }

    /// Labels attached to every page.
    pub fn with_labels(mut self, labels: Labels) -> Self {
        self.labels = labels;
        self
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    fn fail(&mut self, err: Error) -> bool {
        tracing::debug!(error = %err, "paged iteration failed");
        self.current = None;
        self.error = Some(err);
        self.state = IterState::Failed;
        false
    }

    fn exhaust(&mut self) -> bool {
        self.current = None;
        self.state = IterState::Exhausted;
        false
    }
}

impl<S: RowSource> FrameIterator for PagedIterator<S> {
    fn next(&mut self) -> bool {
        if self.state != IterState::Ready {
            return false;
        }
        self.current = None;
        if self.drained {
            return self.exhaust();
        }

        let mut builder = FrameBuilder::new([INDEX_FIELD]);
        while builder.row_count() < self.limit {
            match self.source.next_row() {
                Ok(Some(row)) => {
                    if is_schema_row(&row) {
                        continue;
                    }
                    if let Err(err) = builder.push_row(&row) {
                        return self.fail(err);
                    }
                }
                Ok(None) => {
                    self.drained = true;
                    break;
                }
                Err(err) => return self.fail(err),
            }
        }

        if builder.row_count() == 0 {
            return self.exhaust();
        }
        match builder.finish(self.labels.clone()) {
            Ok(frame) => {
                self.current = Some(frame);
                true
            }
            Err(err) => self.fail(err),
        }
    }

    fn at(&self) -> Option<&Frame> {
        self.current.as_ref()
    }

    fn take(&mut self) -> Option<Frame> {
        self.current.take()
    }

    fn err(&self) -> Option<&Error> {
        self.error.as_ref()
    }

    fn take_err(&mut self) -> Option<Error> {
        self.error.take()
    }

    fn state(&self) -> IterState {
        self.state
    }
}

fn is_schema_row(row: &Row) -> bool {
    matches!(row.get(INDEX_FIELD), Some(Value::String(name)) if name == SCHEMA_MARKER)
}

/// Yields frames decoded from a byte stream; the reader is dropped at the end.
pub struct StreamFrameIterator<R: Read> {
    decoder: Option<Decoder<R>>,
    current: Option<Frame>,
    error: Option<Error>,
    state: IterState,
}

impl<R: Read> StreamFrameIterator<R> {
    pub fn new(reader: R) -> Self {
        Self {
            decoder: Some(Decoder::new(reader)),
            current: None,
            error: None,
            state: IterState::Ready,
        }
    }
}

impl<R: Read> FrameIterator for StreamFrameIterator<R> {
    fn next(&mut self) -> bool {
        self.current = None;
        let Some(decoder) = self.decoder.as_mut() else {
            return false;
        };
        match decoder.decode_frame() {
            Ok(Some(frame)) => {
                self.current = Some(frame);
                return true;
            }
            Ok(None) => self.state = IterState::Exhausted,
            Err(err) => {
                self.error = Some(err);
                self.state = IterState::Failed;
            }
        }
        self.decoder = None;
        false
    }

    fn at(&self) -> Option<&Frame> {
        self.current.as_ref()
    }

    fn take(&mut self) -> Option<Frame> {
        self.current.take()
    }

    fn err(&self) -> Option<&Error> {
        self.error.as_ref()
    }

    fn take_err(&mut self) -> Option<Error> {
        self.error.take()
    }

    fn state(&self) -> IterState {
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::{
        DEFAULT_ROW_LIMIT, FrameIterator, IterState, PagedIterator, RowSource,
        StreamFrameIterator, VecRowSource, frames,
    };
    use crate::core::error::{Error, ErrorKind};
    use crate::core::frame::{Frame, INDEX_FIELD, Labels, Row, SCHEMA_MARKER};
    use crate::core::value::{DType, Value};
    use crate::core::wire::Encoder;

    fn numbered_rows(count: i64) -> Vec<Row> {
        (0..count)
            .map(|i| Row::new().with(INDEX_FIELD, format!("k{i}")).with("v", i))
            .collect()
    }

    struct FailingSource {
        remaining: usize,
    }

    impl RowSource for FailingSource {
        fn next_row(&mut self) -> Result<Option<Row>, Error> {
            if self.remaining == 0 {
                return Err(Error::new(ErrorKind::Io).with_message("source went away"));
            }
            self.remaining -= 1;
            Ok(Some(Row::new().with("v", 1)))
        }
    }

    #[test]
    fn pages_follow_row_limit() {
        let mut iter = PagedIterator::new(VecRowSource::new(numbered_rows(5)), 2);
        let mut sizes = Vec::new();
        while iter.next() {
            let frame = iter.at().expect("frame");
            assert_eq!(frame.names(), vec!["v"]);
            assert_eq!(frame.indices()[0].name(), INDEX_FIELD);
            sizes.push(frame.len());
        }
        assert_eq!(sizes, vec![2, 2, 1]);
        assert!(iter.err().is_none());
        assert_eq!(iter.state(), IterState::Exhausted);
        assert!(!iter.next());
    }

    #[test]
    fn zero_limit_uses_default() {
        let iter = PagedIterator::new(VecRowSource::new(Vec::new()), 0);
        assert_eq!(iter.limit(), DEFAULT_ROW_LIMIT);
    }

    #[test]
    fn empty_source_exhausts_cleanly() {
        let mut iter = PagedIterator::new(VecRowSource::new(Vec::new()), 2);
        assert!(!iter.next());
        assert_eq!(iter.state(), IterState::Exhausted);
        assert!(iter.err().is_none());
        assert!(iter.at().is_none());
    }

    #[test]
    fn schema_rows_are_skipped() {
        let mut rows = vec![Row::new().with(INDEX_FIELD, SCHEMA_MARKER).with("v", "schema")];
        rows.extend(numbered_rows(3));
        let mut iter = PagedIterator::new(VecRowSource::new(rows), 2);
        assert!(iter.next());
        let frame = iter.take().expect("frame");
        assert_eq!(frame.len(), 2);
        assert_eq!(frame.column("v").expect("v").dtype(), DType::Integer);
        assert!(iter.next());
        assert_eq!(iter.at().expect("frame").len(), 1);
        assert!(!iter.next());
    }

    #[test]
    fn late_fields_are_backfilled_within_a_page() {
        let rows = vec![
            Row::new().with("a", 1),
            Row::new().with("a", 2),
            Row::new().with("a", 3).with("b", "late"),
        ];
        let mut iter = PagedIterator::new(VecRowSource::new(rows), 10);
        assert!(iter.next());
        let frame = iter.at().expect("frame");
        let b = frame.column("b").expect("b");
        assert_eq!(b.len(), 3);
        assert_eq!(b.strings().expect("strings"), vec!["", "", "late"]);
    }

    #[test]
    fn source_error_fails_iteration() {
        let mut iter = PagedIterator::new(FailingSource { remaining: 3 }, 2);
        assert!(iter.next());
        assert!(!iter.next());
        assert_eq!(iter.state(), IterState::Failed);
        assert_eq!(iter.err().expect("err").kind(), ErrorKind::Io);
        assert!(!iter.next());
    }

    #[test]
    fn type_clash_fails_iteration() {
        let rows = vec![Row::new().with("v", 1), Row::new().with("v", "one")];
        let mut iter = PagedIterator::new(VecRowSource::new(rows), 10);
        assert!(!iter.next());
        assert_eq!(iter.state(), IterState::Failed);
        assert_eq!(iter.err().expect("err").kind(), ErrorKind::TypeMismatch);
    }

    #[test]
    fn labels_attach_to_every_page() {
        let mut labels = Labels::new();
        labels.insert("table".to_string(), Value::from("metrics"));
        let iter = PagedIterator::new(VecRowSource::new(numbered_rows(3)), 2).with_labels(labels);
        for frame in frames(iter) {
            let frame = frame.expect("frame");
            assert_eq!(frame.labels().get("table"), Some(&Value::from("metrics")));
        }
    }

    #[test]
    fn frames_adapter_surfaces_failure_once() {
        let iter = PagedIterator::new(FailingSource { remaining: 1 }, 1);
        let results: Vec<Result<Frame, Error>> = frames(iter).collect();
        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        let err = results[1].as_ref().expect_err("failure");
        assert_eq!(err.kind(), ErrorKind::Io);
    }

    #[test]
    fn stream_iterator_reads_until_end() {
        let mut encoder = Encoder::new(Vec::new());
        let mut pages = PagedIterator::new(VecRowSource::new(numbered_rows(5)), 2);
        while pages.next() {
            encoder.encode(pages.at().expect("frame")).expect("encode");
        }
        let bytes = encoder.into_inner();

        let mut iter = StreamFrameIterator::new(bytes.as_slice());
        let sizes: Vec<usize> = std::iter::from_fn(|| iter.next().then(|| iter.take()))
            .flatten()
            .map(|frame| frame.len())
            .collect();
        assert_eq!(sizes, vec![2, 2, 1]);
        assert_eq!(iter.state(), IterState::Exhausted);
        assert!(iter.err().is_none());
    }

    #[test]
    fn stream_iterator_fails_on_corrupt_tail() {
        let mut encoder = Encoder::new(Vec::new());
        let frame = Frame::new(Vec::new(), Vec::new(), Labels::new()).expect("frame");
        encoder.encode(&frame).expect("encode");
        let mut bytes = encoder.into_inner();
        bytes.extend_from_slice(b"FRM");

        let mut iter = StreamFrameIterator::new(bytes.as_slice());
        assert!(iter.next());
        assert!(!iter.next());
        assert_eq!(iter.state(), IterState::Failed);
        assert_eq!(iter.err().expect("err").kind(), ErrorKind::Decode);
    }
}
