// Binary frame records: header layout, body encoding, and streaming decode.
use std::io::{self, Read, Write};

use bytes::{Buf, BufMut, BytesMut};

use crate::core::column::{Column, ColumnData};
use crate::core::error::{Error, ErrorKind};
use crate::core::frame::{Frame, Labels};
use crate::core::value::{DType, Value, timestamp_from_parts, timestamp_parts};

pub const RECORD_MAGIC: [u8; 4] = *b"FRM1";
pub const RECORD_VERSION: u16 = 1;
pub const RECORD_HEADER_LEN: usize = 16;
pub const MAX_RECORD_BYTES: usize = 256 * 1024 * 1024;
/// Upper bound on a column's logical length, broadcast columns included.
pub const MAX_FRAME_ROWS: usize = 1 << 24;

const VARIANT_MATERIALIZED: u8 = 0;
const VARIANT_BROADCAST: u8 = 1;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RecordHeader {
    pub version: u16,
    pub flags: u16,
    pub body_len: u32,
    pub body_len_xor: u32,
}

impl RecordHeader {
    pub fn new(body_len: u32) -> Self {
        Self {
            version: RECORD_VERSION,
            flags: 0,
            body_len,
            body_len_xor: body_len ^ 0xFFFF_FFFF,
        }
    }

    pub fn encode(&self) -> [u8; RECORD_HEADER_LEN] {
        let mut buf = [0u8; RECORD_HEADER_LEN];
        let mut out = &mut buf[..];
        out.put_slice(&RECORD_MAGIC);
        out.put_u16_le(self.version);
        out.put_u16_le(self.flags);
        out.put_u32_le(self.body_len);
        out.put_u32_le(self.body_len_xor);
        buf
    }

    pub fn decode(buf: &[u8; RECORD_HEADER_LEN]) -> Result<Self, Error> {
        if buf[0..4] != RECORD_MAGIC {
            return Err(decode_error("bad record magic"));
        }
        let mut input = &buf[4..];
        let header = Self {
            version: input.get_u16_le(),
            flags: input.get_u16_le(),
            body_len: input.get_u32_le(),
            body_len_xor: input.get_u32_le(),
        };
        header.validate()?;
        Ok(header)
    }

    fn validate(&self) -> Result<(), Error> {
        if self.version != RECORD_VERSION {
            return Err(decode_error(format!(
                "unsupported record version {}",
                self.version
            )));
        }
        if self.body_len ^ self.body_len_xor != 0xFFFF_FFFF {
            return Err(decode_error("body length xor mismatch"));
        }
        if self.body_len as usize > MAX_RECORD_BYTES {
            return Err(decode_error("body length exceeds max"));
        }
        Ok(())
    }
}

/// Appends one self-describing record per frame to `W`.
pub struct Encoder<W: Write> {
    writer: W,
}

impl<W: Write> Encoder<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Writes the whole record in a single `write_all` followed by a flush.
    pub fn encode(&mut self, frame: &Frame) -> Result<(), Error> {
        let record = encode_record(frame)?;
        self.writer
            .write_all(&record)
            .and_then(|()| self.writer.flush())
            .map_err(|err| {
                Error::new(ErrorKind::Io)
                    .with_message("failed to write frame record")
                    .with_source(err)
            })
    }

    pub fn get_ref(&self) -> &W {
        &self.writer
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.writer
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

/// Reads records from `R` until a clean end of stream.
pub struct Decoder<R: Read> {
    reader: R,
}

impl<R: Read> Decoder<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }

    /// Returns `Ok(None)` when the stream ends before any byte of a new record.
    pub fn decode_frame(&mut self) -> Result<Option<Frame>, Error> {
        let mut header = [0u8; RECORD_HEADER_LEN];
        let filled = read_full(&mut self.reader, &mut header)?;
        if filled == 0 {
            return Ok(None);
        }
        if filled < RECORD_HEADER_LEN {
            return Err(decode_error("truncated record header"));
        }
        let header = RecordHeader::decode(&header)?;

        // The buffer grows with the bytes that arrive, not with the declared length.
        let mut body = Vec::new();
        (&mut self.reader)
            .take(u64::from(header.body_len))
            .read_to_end(&mut body)
            .map_err(|err| {
                Error::new(ErrorKind::Io)
                    .with_message("failed to read frame stream")
                    .with_source(err)
            })?;
        if body.len() < header.body_len as usize {
            return Err(decode_error("truncated record body"));
        }
        decode_body(&body).map(Some)
    }

    pub fn into_inner(self) -> R {
        self.reader
    }
}

pub fn encode_record(frame: &Frame) -> Result<BytesMut, Error> {
    let mut body = BytesMut::new();
    body.put_u32_le(count_u32(frame.columns().len(), "column count")?);
    body.put_u32_le(count_u32(frame.indices().len(), "index count")?);
    body.put_u32_le(count_u32(frame.labels().len(), "label count")?);
    for column in frame.columns().iter().chain(frame.indices()) {
        put_column(&mut body, column)?;
    }
    for (name, value) in frame.labels() {
        put_str(&mut body, name)?;
        body.put_u8(value.dtype().wire_tag());
        put_value(&mut body, value)?;
    }
    if body.len() > MAX_RECORD_BYTES {
        return Err(Error::new(ErrorKind::Encode)
            .with_message(format!("record body of {} bytes exceeds max", body.len())));
    }

    let header = RecordHeader::new(body.len() as u32);
    let mut record = BytesMut::with_capacity(RECORD_HEADER_LEN + body.len());
    record.put_slice(&header.encode());
    record.put_slice(&body);
    Ok(record)
}

fn decode_body(body: &[u8]) -> Result<Frame, Error> {
    let mut input = body;
    let n_columns = get_u32(&mut input)? as usize;
    let n_indices = get_u32(&mut input)? as usize;
    let n_labels = get_u32(&mut input)? as usize;

    let mut columns = Vec::with_capacity(n_columns.min(input.remaining()));
    for _ in 0..n_columns {
        columns.push(get_column(&mut input)?);
    }
    let mut indices = Vec::with_capacity(n_indices.min(input.remaining()));
    for _ in 0..n_indices {
        indices.push(get_column(&mut input)?);
    }
    let mut labels = Labels::new();
    for _ in 0..n_labels {
        let name = get_str(&mut input)?;
        let dtype = get_dtype(&mut input)?;
        let value = get_value(&mut input, dtype)?;
        labels.insert(name, value);
    }
    if input.has_remaining() {
        return Err(decode_error(format!(
            "{} trailing bytes in record body",
            input.remaining()
        )));
    }

    Frame::new(columns, indices, labels).map_err(|err| {
        Error::new(ErrorKind::Decode)
            .with_message("record does not form a valid frame")
            .with_source(err)
    })
}

fn put_column(buf: &mut BytesMut, column: &Column) -> Result<(), Error> {
    if column.len() > MAX_FRAME_ROWS {
        return Err(Error::new(ErrorKind::Encode)
            .with_message(format!("column length {} exceeds max of {MAX_FRAME_ROWS} rows", column.len()))
            .with_column(column.name()));
    }
    match column {
        Column::Materialized { name, data } => {
            buf.put_u8(VARIANT_MATERIALIZED);
            buf.put_u8(data.dtype().wire_tag());
            put_str(buf, name)?;
            buf.put_u64_le(data.len() as u64);
            match data {
                ColumnData::Int(values) => values.iter().for_each(|v| buf.put_i64_le(*v)),
                ColumnData::Float(values) => values.iter().for_each(|v| buf.put_f64_le(*v)),
                ColumnData::String(values) => {
                    for value in values {
                        put_str(buf, value)?;
                    }
                }
                ColumnData::Timestamp(values) => {
                    for value in values {
                        put_value(buf, &Value::Timestamp(*value))?;
                    }
                }
                ColumnData::Bool(values) => values.iter().for_each(|v| buf.put_u8(u8::from(*v))),
            }
        }
        Column::Broadcast { name, value, len } => {
            buf.put_u8(VARIANT_BROADCAST);
            buf.put_u8(value.dtype().wire_tag());
            put_str(buf, name)?;
            buf.put_u64_le(*len as u64);
            put_value(buf, value)?;
        }
    }
    Ok(())
}

fn get_column(input: &mut &[u8]) -> Result<Column, Error> {
    let variant = get_u8(input)?;
    let dtype = get_dtype(input)?;
    let name = get_str(input)?;
    let len = usize::try_from(get_u64(input)?)
        .map_err(|_| decode_error("column length exceeds platform limits").with_column(&name))?;
    if len > MAX_FRAME_ROWS {
        return Err(decode_error(format!("column length {len} exceeds max of {MAX_FRAME_ROWS} rows"))
            .with_column(name));
    }

    match variant {
        VARIANT_MATERIALIZED => {
            // Every value takes at least one byte, so a larger count is corrupt.
            if len > input.remaining() {
                return Err(decode_error("column length exceeds record body").with_column(&name));
            }
            let mut data = ColumnData::with_capacity(dtype, len);
            for _ in 0..len {
                let value = get_value(input, dtype)?;
                data.push(value)
                    .map_err(|_| decode_error("value dtype disagrees with column"))?;
            }
            Ok(Column::Materialized { name, data })
        }
        VARIANT_BROADCAST => {
            let value = get_value(input, dtype)?;
            Ok(Column::Broadcast { name, value, len })
        }
        other => Err(decode_error(format!("unknown column variant {other}")).with_column(name)),
    }
}

fn put_value(buf: &mut BytesMut, value: &Value) -> Result<(), Error> {
    match value {
        Value::Int(v) => buf.put_i64_le(*v),
        Value::Float(v) => buf.put_f64_le(*v),
        Value::String(v) => put_str(buf, v)?,
        Value::Timestamp(v) => {
            let (seconds, nanos) = timestamp_parts(*v);
            buf.put_i64_le(seconds);
            buf.put_u32_le(nanos);
        }
        Value::Bool(v) => buf.put_u8(u8::from(*v)),
    }
    Ok(())
}

fn get_value(input: &mut &[u8], dtype: DType) -> Result<Value, Error> {
    Ok(match dtype {
        DType::Integer => Value::Int(get_u64(input)? as i64),
        DType::Float => Value::Float(f64::from_bits(get_u64(input)?)),
        DType::String => Value::String(get_str(input)?),
        DType::Timestamp => {
            let seconds = get_u64(input)? as i64;
            let nanos = get_u32(input)?;
            let value = timestamp_from_parts(seconds, nanos).map_err(|err| {
                decode_error("timestamp out of range").with_source(err)
            })?;
            Value::Timestamp(value)
        }
        DType::Boolean => match get_u8(input)? {
            0 => Value::Bool(false),
            1 => Value::Bool(true),
            other => return Err(decode_error(format!("invalid bool byte {other}"))),
        },
    })
}

fn put_str(buf: &mut BytesMut, value: &str) -> Result<(), Error> {
    buf.put_u32_le(count_u32(value.len(), "string length")?);
    buf.put_slice(value.as_bytes());
    Ok(())
}

fn get_str(input: &mut &[u8]) -> Result<String, Error> {
    let len = get_u32(input)? as usize;
    ensure(input, len)?;
    let bytes = input[..len].to_vec();
    input.advance(len);
    String::from_utf8(bytes)
        .map_err(|err| decode_error("string is not valid UTF-8").with_source(err))
}

fn get_dtype(input: &mut &[u8]) -> Result<DType, Error> {
    let tag = get_u8(input)?;
    DType::from_wire_tag(tag).ok_or_else(|| decode_error(format!("unknown dtype tag {tag}")))
}

fn get_u8(input: &mut &[u8]) -> Result<u8, Error> {
    ensure(input, 1)?;
    Ok(input.get_u8())
}

fn get_u32(input: &mut &[u8]) -> Result<u32, Error> {
    ensure(input, 4)?;
    Ok(input.get_u32_le())
}

fn get_u64(input: &mut &[u8]) -> Result<u64, Error> {
    ensure(input, 8)?;
    Ok(input.get_u64_le())
}

fn ensure(input: &[u8], needed: usize) -> Result<(), Error> {
    if input.remaining() < needed {
        return Err(decode_error("record body truncated"));
    }
    Ok(())
}

fn count_u32(value: usize, what: &str) -> Result<u32, Error> {
    u32::try_from(value).map_err(|_| {
        Error::new(ErrorKind::Encode).with_message(format!("{what} {value} exceeds u32"))
    })
}

fn decode_error(message: impl Into<String>) -> Error {
    Error::new(ErrorKind::Decode).with_message(message)
}

// Like `read_exact`, but reports how many bytes arrived before end of stream.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize, Error> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => {
                return Err(Error::new(ErrorKind::Io)
                    .with_message("failed to read frame stream")
                    .with_source(err));
            }
        }
    }
    Ok(filled)
}
