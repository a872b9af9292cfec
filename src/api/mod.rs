//! Purpose: Define the public Rust API boundary of the frames gateway.
//! Exports: Frame model types, iterators, codecs, control messages, backends, and clients.
//! Role: Shared surface for the `frames` binary, its HTTP server, and tests.
//! Invariants: Core modules are reached through these re-exports, not by path.
//! Invariants: Backends are looked up through an explicit `BackendRegistry` value.

mod backend;
mod conduit;
mod memory;
mod remote;
mod request;

pub use crate::core::builder::{FrameBuilder, frame_from_rows};
pub use crate::core::column::{Column, ColumnData};
#[doc(hidden)]
pub use crate::core::error::to_exit_code;
pub use crate::core::error::{Error, ErrorKind};
pub use crate::core::frame::{Frame, INDEX_FIELD, Labels, Row, RowIter, SCHEMA_MARKER};
pub use crate::core::iter::{
    DEFAULT_ROW_LIMIT, FrameIterator, Frames, IterState, PagedIterator, RowSource,
    StreamFrameIterator, VecRowSource, frames,
};
pub use crate::core::message::{
    FrameMessage, decode_json, encode_json, frame_from_message, frame_message,
};
pub use crate::core::value::{DType, Value};
pub use crate::core::wire::{Decoder, Encoder, MAX_FRAME_ROWS, MAX_RECORD_BYTES, encode_record};
pub use backend::{Backend, BackendConfig, BackendKind, BackendRegistry, BoxFrameIterator};
pub use conduit::{CONDUIT_DEPTH, Chunk, ConduitReader, ConduitWriter, conduit};
pub use memory::MemoryBackend;
pub use remote::{FrameWriter, JsonlFrames, RemoteClient, RemoteFrames};
pub use request::{
    CreateRequest, DeleteRequest, FRAME_STREAM_MIME, JSONL_MIME, PROTOCOL_VERSION, ReadRequest,
    Session, VERSION_HEADER, WriteReceipt, WriteRequest, control_record, read_control_record,
};
