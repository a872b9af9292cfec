// Schema-typed frame messages: one typed array per dtype and a slice/label column discriminator.
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::column::{Column, ColumnData};
use crate::core::error::{Error, ErrorKind};
use crate::core::frame::{Frame, Labels};
use crate::core::value::{DType, Value, timestamp_from_parts, timestamp_parts};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FrameMessage {
    pub columns: Vec<ColumnMessage>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub indices: Vec<ColumnMessage>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, ScalarMessage>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnKind {
    /// Materialized values, one per row.
    Slice,
    /// One value repeated `size` times.
    Label,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ColumnMessage {
    pub kind: ColumnKind,
    pub name: String,
    pub dtype: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<ScalarMessage>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ints: Vec<i64>,
    /// `None` stands for a non-finite float, which JSON cannot carry.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub floats: Vec<Option<f64>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub strings: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub times: Vec<TimeMessage>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bools: Vec<bool>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct TimeMessage {
    pub seconds: i64,
    pub nanos: u32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalarMessage {
    Int(i64),
    Float(Option<f64>),
    String(String),
    Time(TimeMessage),
    Bool(bool),
}

impl ScalarMessage {
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::Int(v) => ScalarMessage::Int(*v),
            Value::Float(v) => ScalarMessage::Float(finite(*v)),
            Value::String(v) => ScalarMessage::String(v.clone()),
            Value::Timestamp(v) => ScalarMessage::Time(time_message(*v)),
            Value::Bool(v) => ScalarMessage::Bool(*v),
        }
    }

    pub fn into_value(self) -> Result<Value, Error> {
        Ok(match self {
            ScalarMessage::Int(v) => Value::Int(v),
            ScalarMessage::Float(v) => Value::Float(v.unwrap_or(f64::NAN)),
            ScalarMessage::String(v) => Value::String(v),
            ScalarMessage::Time(v) => Value::Timestamp(time_value(v)?),
            ScalarMessage::Bool(v) => Value::Bool(v),
        })
    }
}

pub fn frame_message(frame: &Frame) -> FrameMessage {
    FrameMessage {
        columns: frame.columns().iter().map(column_message).collect(),
        indices: frame.indices().iter().map(column_message).collect(),
        labels: frame
            .labels()
            .iter()
            .map(|(name, value)| (name.clone(), ScalarMessage::from_value(value)))
            .collect(),
    }
}

pub fn frame_from_message(message: FrameMessage) -> Result<Frame, Error> {
    let columns = message
        .columns
        .into_iter()
        .map(column_from_message)
        .collect::<Result<Vec<_>, _>>()?;
    let indices = message
        .indices
        .into_iter()
        .map(column_from_message)
        .collect::<Result<Vec<_>, _>>()?;
    let mut labels = Labels::new();
    for (name, value) in message.labels {
        let value = value
            .into_value()
            .map_err(|err| decode_error("invalid label value").with_column(&name).with_source(err))?;
        labels.insert(name, value);
    }
    Frame::new(columns, indices, labels)
        .map_err(|err| decode_error("message does not form a valid frame").with_source(err))
}

/// Renders a frame as one JSON line (no trailing newline).
pub fn encode_json(frame: &Frame) -> Result<String, Error> {
    serde_json::to_string(&frame_message(frame)).map_err(|err| {
        Error::new(ErrorKind::Encode)
            .with_message("failed to encode frame message")
            .with_source(err)
    })
}

pub fn decode_json(line: &str) -> Result<Frame, Error> {
    let message: FrameMessage = serde_json::from_str(line)
        .map_err(|err| decode_error("invalid frame message").with_source(err))?;
    frame_from_message(message)
}

fn column_message(column: &Column) -> ColumnMessage {
    let mut message = ColumnMessage {
        kind: ColumnKind::Slice,
        name: column.name().to_string(),
        dtype: column.dtype().as_str().to_string(),
        size: None,
        value: None,
        ints: Vec::new(),
        floats: Vec::new(),
        strings: Vec::new(),
        times: Vec::new(),
        bools: Vec::new(),
    };
    match column {
        Column::Broadcast { value, len, .. } => {
            message.kind = ColumnKind::Label;
            message.size = Some(*len as u64);
            message.value = Some(ScalarMessage::from_value(value));
        }
        Column::Materialized { data, .. } => match data {
            ColumnData::Int(values) => message.ints = values.clone(),
            ColumnData::Float(values) => message.floats = values.iter().map(|v| finite(*v)).collect(),
            ColumnData::String(values) => message.strings = values.clone(),
            ColumnData::Timestamp(values) => {
                message.times = values.iter().map(|v| time_message(*v)).collect()
            }
            ColumnData::Bool(values) => message.bools = values.clone(),
        },
    }
    message
}

fn column_from_message(message: ColumnMessage) -> Result<Column, Error> {
    let dtype = DType::parse(&message.dtype)
        .map_err(|err| decode_error("unknown column dtype").with_column(&message.name).with_source(err))?;
    let name = message.name;
    match message.kind {
        ColumnKind::Label => {
            let value = message
                .value
                .ok_or_else(|| decode_error("label column without value").with_column(&name))?
                .into_value()
                .map_err(|err| decode_error("invalid label value").with_column(&name).with_source(err))?;
            if value.dtype() != dtype {
                return Err(decode_error(format!(
                    "label value is {} but column is {dtype}",
                    value.dtype()
                ))
                .with_column(name));
            }
            let len = usize::try_from(message.size.unwrap_or(0))
                .map_err(|_| decode_error("label size exceeds platform limits").with_column(&name))?;
            Ok(Column::broadcast(name, value, len))
        }
        ColumnKind::Slice => {
            let filled = [
                (DType::Integer, !message.ints.is_empty()),
                (DType::Float, !message.floats.is_empty()),
                (DType::String, !message.strings.is_empty()),
                (DType::Timestamp, !message.times.is_empty()),
                (DType::Boolean, !message.bools.is_empty()),
            ];
            if let Some((other, _)) = filled.iter().find(|(kind, set)| *set && *kind != dtype) {
                return Err(decode_error(format!("{dtype} column carries {other} values"))
                    .with_column(name));
            }
            let data = match dtype {
                DType::Integer => ColumnData::Int(message.ints),
                DType::Float => ColumnData::Float(
                    message.floats.into_iter().map(|v| v.unwrap_or(f64::NAN)).collect(),
                ),
                DType::String => ColumnData::String(message.strings),
                DType::Timestamp => ColumnData::Timestamp(
                    message
                        .times
                        .into_iter()
                        .map(time_value)
                        .collect::<Result<Vec<_>, _>>()
                        .map_err(|err| err.with_column(name.clone()))?,
                ),
                DType::Boolean => ColumnData::Bool(message.bools),
            };
            Ok(Column::materialized(name, data))
        }
    }
}

fn finite(value: f64) -> Option<f64> {
    value.is_finite().then_some(value)
}

fn time_message(value: time::OffsetDateTime) -> TimeMessage {
    let (seconds, nanos) = timestamp_parts(value);
    TimeMessage { seconds, nanos }
}

fn time_value(message: TimeMessage) -> Result<time::OffsetDateTime, Error> {
    timestamp_from_parts(message.seconds, message.nanos)
}

fn decode_error(message: impl Into<String>) -> Error {
    Error::new(ErrorKind::Decode).with_message(message)
}

#[cfg(test)]
mod tests {
    use super::{ColumnKind, decode_json, encode_json, frame_from_message, frame_message};
    use crate::core::column::{Column, ColumnData};
    use crate::core::error::ErrorKind;
    use crate::core::frame::{Frame, INDEX_FIELD, Labels};
    use crate::core::value::{Value, timestamp_from_parts};
    use serde_json::json;

    fn sample_frame() -> Frame {
        let columns = vec![
            Column::materialized("f", ColumnData::Float(vec![0.5, f64::NAN])),
            Column::materialized(
                "t",
                ColumnData::Timestamp(vec![
                    timestamp_from_parts(1, 5).expect("ts"),
                    timestamp_from_parts(-1, 0).expect("ts"),
                ]),
            ),
            Column::broadcast("host", "a1", 2),
        ];
        let indices = vec![Column::materialized(INDEX_FIELD, ColumnData::Int(vec![10, 11]))];
        let mut labels = Labels::new();
        labels.insert("ok".to_string(), Value::Bool(true));
        Frame::new(columns, indices, labels).expect("frame")
    }

    #[test]
    fn variants_map_to_discriminator() {
        let message = frame_message(&sample_frame());
        assert_eq!(message.columns[0].kind, ColumnKind::Slice);
        assert_eq!(message.columns[0].floats, vec![Some(0.5), None]);
        assert_eq!(message.columns[2].kind, ColumnKind::Label);
        assert_eq!(message.columns[2].size, Some(2));
        assert_eq!(message.indices[0].ints, vec![10, 11]);

        let back = frame_from_message(message).expect("frame");
        assert_eq!(back, sample_frame());
    }

    #[test]
    fn json_line_round_trips_with_nan() {
        let line = encode_json(&sample_frame()).expect("encode");
        assert!(!line.contains('\n'));
        let value: serde_json::Value = serde_json::from_str(&line).expect("json");
        assert_eq!(value["columns"][0]["floats"], json!([0.5, null]));
        assert_eq!(value["columns"][1]["times"][0], json!({"seconds": 1, "nanos": 5}));
        assert_eq!(value["columns"][2]["value"], json!({"string": "a1"}));

        let frame = decode_json(&line).expect("decode");
        assert_eq!(frame, sample_frame());
    }

    #[test]
    fn mismatched_arrays_fail_decode() {
        let line = json!({
            "columns": [{"kind": "slice", "name": "x", "dtype": "int", "strings": ["a"]}]
        })
        .to_string();
        let err = decode_json(&line).expect_err("mismatch");
        assert_eq!(err.kind(), ErrorKind::Decode);
        assert_eq!(err.column(), Some("x"));
    }

    #[test]
    fn label_without_value_fails_decode() {
        let line = json!({
            "columns": [{"kind": "label", "name": "x", "dtype": "int", "size": 3}]
        })
        .to_string();
        assert_eq!(decode_json(&line).expect_err("value").kind(), ErrorKind::Decode);
    }

    #[test]
    fn unknown_dtype_fails_decode() {
        let line = json!({
            "columns": [{"kind": "slice", "name": "x", "dtype": "decimal"}]
        })
        .to_string();
        assert_eq!(decode_json(&line).expect_err("dtype").kind(), ErrorKind::Decode);
        assert_eq!(decode_json("{").expect_err("syntax").kind(), ErrorKind::Decode);
    }
}
