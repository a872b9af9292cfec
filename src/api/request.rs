//! Purpose: Define the control messages exchanged before frame data flows.
//! Exports: `ReadRequest`, `WriteRequest`, `CreateRequest`, `DeleteRequest`, `Session`,
//! `WriteReceipt`, and the write control record helpers.
//! Role: Shared by the HTTP client and server; JSON over the wire.
//! Invariants: A write body starts with one control record: u32 LE length + JSON.
//! Invariants: Session fields are carried to backends verbatim and never interpreted here.
use std::collections::BTreeMap;
use std::fmt;
use std::io::Read;

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::core::error::{Error, ErrorKind};

pub const MAX_CONTROL_BYTES: usize = 1024 * 1024;

/// Response header naming the protocol revision.
pub const VERSION_HEADER: &str = "frames-version";
pub const PROTOCOL_VERSION: &str = "0";

/// Content type of a binary frame record stream.
pub const FRAME_STREAM_MIME: &str = "application/x-frames";
pub const JSONL_MIME: &str = "application/jsonl";

#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub container: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub path: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub user: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub password: String,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("url", &self.url)
            .field("container", &self.container)
            .field("path", &self.path)
            .field("user", &self.user)
            .field("password", &if self.password.is_empty() { "" } else { "<redacted>" })
            .finish()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ReadRequest {
    pub backend: String,
    pub table: String,
    /// Empty or `["*"]` selects every column.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub columns: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub filter: String,
    /// Rows per frame; zero lets the backend pick.
    #[serde(default)]
    pub limit: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<Session>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct WriteRequest {
    pub backend: String,
    pub table: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<Session>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CreateRequest {
    pub backend: String,
    pub table: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<Session>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DeleteRequest {
    pub backend: String,
    pub table: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub filter: String,
    /// Succeed even when the table does not exist.
    #[serde(default)]
    pub force: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<Session>,
}

/// Outcome of a completed write.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteReceipt {
    pub frames: u64,
    pub rows: u64,
}

impl ReadRequest {
    pub fn validate(&self) -> Result<(), Error> {
        require("backend", &self.backend)?;
        require("table", &self.table)
    }
}

impl WriteRequest {
    pub fn validate(&self) -> Result<(), Error> {
        require("backend", &self.backend)?;
        require("table", &self.table)
    }
}

impl CreateRequest {
    pub fn validate(&self) -> Result<(), Error> {
        require("backend", &self.backend)?;
        require("table", &self.table)
    }
}

impl DeleteRequest {
    pub fn validate(&self) -> Result<(), Error> {
        require("backend", &self.backend)?;
        require("table", &self.table)
    }
}

fn require(field: &str, value: &str) -> Result<(), Error> {
    if value.trim().is_empty() {
        return Err(Error::new(ErrorKind::Usage)
            .with_message(format!("request is missing {field}"))
            .with_hint(format!("Set a non-empty {field}.")));
    }
    Ok(())
}

/// Frames `request` as the leading control record of a write body.
pub fn control_record(request: &WriteRequest) -> Result<Bytes, Error> {
    let payload = serde_json::to_vec(request).map_err(|err| {
        Error::new(ErrorKind::Encode)
            .with_message("failed to encode write request")
            .with_source(err)
    })?;
    if payload.len() > MAX_CONTROL_BYTES {
        return Err(Error::new(ErrorKind::Encode).with_message("write request exceeds max size"));
    }
    let mut record = BytesMut::with_capacity(4 + payload.len());
    record.put_u32_le(payload.len() as u32);
    record.put_slice(&payload);
    Ok(record.freeze())
}

pub fn read_control_record<R: Read>(reader: &mut R) -> Result<WriteRequest, Error> {
    let mut len = [0u8; 4];
    reader.read_exact(&mut len).map_err(|err| {
        Error::new(ErrorKind::Decode)
            .with_message("missing write control record")
            .with_source(err)
    })?;
    let len = u32::from_le_bytes(len) as usize;
    if len > MAX_CONTROL_BYTES {
        return Err(Error::new(ErrorKind::Decode)
            .with_message(format!("control record of {len} bytes exceeds max")));
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).map_err(|err| {
        Error::new(ErrorKind::Decode)
            .with_message("truncated write control record")
            .with_source(err)
    })?;
    serde_json::from_slice(&payload).map_err(|err| {
        Error::new(ErrorKind::Usage)
            .with_message("invalid write request json")
            .with_source(err)
    })
}

#[cfg(test)]
mod tests {
    use super::{
        DeleteRequest, ReadRequest, Session, WriteRequest, control_record, read_control_record,
    };
    use crate::core::error::ErrorKind;
    use serde_json::json;

    #[test]
    fn control_record_reads_back() {
        let request = WriteRequest {
            backend: "mem".to_string(),
            table: "metrics".to_string(),
            session: Some(Session {
                container: "bigdata".to_string(),
                ..Session::default()
            }),
        };
        let mut bytes = control_record(&request).expect("record").to_vec();
        bytes.extend_from_slice(b"frame bytes follow");
        let mut reader = bytes.as_slice();
        let decoded = read_control_record(&mut reader).expect("decode");
        assert_eq!(decoded, request);
        assert_eq!(reader, b"frame bytes follow");
    }

    #[test]
    fn truncated_control_record_fails() {
        let bytes = control_record(&WriteRequest::default()).expect("record");
        let mut reader = &bytes[..bytes.len() - 1];
        let err = read_control_record(&mut reader).expect_err("truncated");
        assert_eq!(err.kind(), ErrorKind::Decode);

        let mut empty: &[u8] = &[];
        let err = read_control_record(&mut empty).expect_err("missing");
        assert_eq!(err.kind(), ErrorKind::Decode);
    }

    #[test]
    fn read_request_defaults_optional_fields() {
        let request: ReadRequest =
            serde_json::from_value(json!({"backend": "mem", "table": "t"})).expect("request");
        assert!(request.columns.is_empty());
        assert_eq!(request.limit, 0);
        assert!(request.session.is_none());
        request.validate().expect("valid");
    }

    #[test]
    fn missing_table_is_usage_error() {
        let request = DeleteRequest {
            backend: "mem".to_string(),
            ..DeleteRequest::default()
        };
        assert_eq!(request.validate().expect_err("table").kind(), ErrorKind::Usage);
    }

    #[test]
    fn session_debug_redacts_password() {
        let session = Session {
            user: "admin".to_string(),
            password: "hunter2".to_string(),
            ..Session::default()
        };
        let rendered = format!("{session:?}");
        assert!(rendered.contains("admin"));
        assert!(!rendered.contains("hunter2"));
    }
}
