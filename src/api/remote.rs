//! Purpose: Provide an HTTP client for the frames v0 protocol (JSON control + binary frames).
//! Exports: `RemoteClient`, `RemoteFrames`, `JsonlFrames`, `FrameWriter`.
//! Role: Blocking client API; reads stream frames back, writes pipeline frames into one request.
//! Invariants: Any non-200 status is a `Transport` error carrying the status and body text.
//! Invariants: A write's outcome is reported exactly once, after `wait_for_complete`.
//! Invariants: A timed-out or dropped `FrameWriter` aborts its in-flight call.
//! Invariants: Blocking methods must not be called from inside an async runtime.
#![allow(clippy::result_large_err)]

use std::io::{BufRead, BufReader, Read, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Body;
use hyper::header::{ACCEPT, CONTENT_TYPE};
use hyper::{Method, Request, StatusCode, Uri};
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use serde::Deserialize;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::runtime::Runtime;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use url::Url;

use super::conduit::{ConduitWriter, conduit};
use super::request::{
    CreateRequest, DeleteRequest, FRAME_STREAM_MIME, JSONL_MIME, ReadRequest, WriteReceipt,
    WriteRequest, control_record,
};
use crate::core::error::{Error, ErrorKind};
use crate::core::frame::Frame;
use crate::core::iter::{FrameIterator, IterState, StreamFrameIterator};
use crate::core::message::decode_json;
use crate::core::wire::Encoder;

type ApiResult<T> = Result<T, Error>;

type BodyReader = Box<dyn Read + Send + Sync>;

const MAX_RESPONSE_BYTES: usize = 16 * 1024 * 1024;

/// Frames decoded from a binary read response.
pub type RemoteFrames = StreamFrameIterator<BodyReader>;

#[derive(Clone)]
pub struct RemoteClient {
    inner: Arc<RemoteClientInner>,
}

struct RemoteClientInner {
    base_url: Url,
    agent: ureq::Agent,
    // Built on first write; drives the streaming request task.
    runtime: Mutex<Option<Arc<Runtime>>>,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: RemoteError,
}

#[derive(Deserialize)]
struct RemoteError {
    kind: String,
    message: Option<String>,
    hint: Option<String>,
    column: Option<String>,
    index: Option<u64>,
}

impl RemoteClient {
    pub fn new(base_url: impl Into<String>) -> ApiResult<Self> {
        let base_url = normalize_base_url(base_url.into())?;
        let agent = ureq::AgentBuilder::new().build();
        Ok(Self {
            inner: Arc::new(RemoteClientInner {
                base_url,
                agent,
                runtime: Mutex::new(None),
            }),
        })
    }

    /// Bounds connection setup for the JSON and read calls.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new().timeout_connect(timeout).build();
        self.inner = Arc::new(RemoteClientInner {
            base_url: self.inner.base_url.clone(),
            agent,
            runtime: Mutex::new(None),
        });
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.inner.base_url
    }

    pub fn health(&self) -> ApiResult<()> {
        let url = build_url(&self.inner.base_url, &["healthz"])?;
        let _value: serde_json::Value = self.request_json::<(), _>("GET", &url, &())?;
        Ok(())
    }

    pub fn create(&self, request: &CreateRequest) -> ApiResult<()> {
        request.validate()?;
        let url = build_url(&self.inner.base_url, &["v0", "create"])?;
        let _value: serde_json::Value = self.request_json("POST", &url, request)?;
        Ok(())
    }

    pub fn delete(&self, request: &DeleteRequest) -> ApiResult<()> {
        request.validate()?;
        let url = build_url(&self.inner.base_url, &["v0", "delete"])?;
        let _value: serde_json::Value = self.request_json("POST", &url, request)?;
        Ok(())
    }

    /// Streams the read response as binary frame records.
    pub fn read(&self, request: &ReadRequest) -> ApiResult<RemoteFrames> {
        request.validate()?;
        let reader = self.request_stream(&["v0", "read"], request, FRAME_STREAM_MIME)?;
        Ok(StreamFrameIterator::new(reader))
    }

    /// Streams the read response as one JSON frame message per line.
    pub fn read_jsonl(&self, request: &ReadRequest) -> ApiResult<JsonlFrames> {
        request.validate()?;
        let reader = self.request_stream(&["v0", "read"], request, JSONL_MIME)?;
        Ok(JsonlFrames::new(reader))
    }

    /// Opens a streaming write; frames added to the writer become the request body.
    pub fn write(&self, request: &WriteRequest) -> ApiResult<FrameWriter> {
        request.validate()?;
        let url = build_url(&self.inner.base_url, &["v0", "write"])?;
        let uri: Uri = url.as_str().parse().map_err(|err| {
            Error::new(ErrorKind::Usage)
                .with_message("invalid write url")
                .with_source(err)
        })?;
        let control = control_record(request)?;
        let runtime = self.runtime()?;

        let (tx, rx) = conduit();
        let http_request = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(CONTENT_TYPE, FRAME_STREAM_MIME)
            .header(ACCEPT, "application/json")
            .body(Body::from_stream(ReceiverStream::new(rx)))
            .map_err(|err| {
                Error::new(ErrorKind::Internal)
                    .with_message("failed to build write request")
                    .with_source(err)
            })?;

        let (done_tx, done_rx) = oneshot::channel();
        let table = request.table.clone();
        let call = runtime.spawn(async move {
            let outcome = send_write(http_request).await;
            match &outcome {
                Ok(receipt) => tracing::debug!(%table, rows = receipt.rows, "remote write completed"),
                Err(err) => tracing::debug!(%table, error = %err, "remote write failed"),
            }
            let _ = done_tx.send(outcome);
        });

        let mut writer = ConduitWriter::new(tx);
        if let Err(err) = writer.write_all(&control) {
            call.abort();
            return Err(Error::new(ErrorKind::Transport)
                .with_message("failed to start write stream")
                .with_source(err));
        }

        Ok(FrameWriter {
            encoder: Some(Encoder::new(writer)),
            done: Some(done_rx),
            call: Some(call),
            runtime,
            frames: 0,
        })
    }

    fn runtime(&self) -> ApiResult<Arc<Runtime>> {
        let mut slot = self
            .inner
            .runtime
            .lock()
            .map_err(|_| Error::new(ErrorKind::Internal).with_message("runtime lock poisoned"))?;
        if let Some(runtime) = slot.as_ref() {
            return Ok(runtime.clone());
        }
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("frames-write")
            .enable_all()
            .build()
            .map_err(|err| {
                Error::new(ErrorKind::Io)
                    .with_message("failed to start write runtime")
                    .with_source(err)
            })?;
        let runtime = Arc::new(runtime);
        *slot = Some(runtime.clone());
        Ok(runtime)
    }

    fn request_json<T, R>(&self, method: &str, url: &Url, body: &T) -> ApiResult<R>
    where
        T: Serialize,
        R: DeserializeOwned,
    {
        let request = self
            .inner
            .agent
            .request(method, url.as_str())
            .set("Accept", "application/json");
        let response = if method == "GET" {
            request.call()
        } else {
            let payload = encode_body(body)?;
            request
                .set("Content-Type", "application/json")
                .send_string(&payload)
        };

        match response {
            Ok(resp) => read_json_response(resp),
            Err(ureq::Error::Status(code, resp)) => Err(parse_error_response(code, resp)),
            Err(ureq::Error::Transport(err)) => Err(Error::new(ErrorKind::Transport)
                .with_message("request failed")
                .with_source(err)),
        }
    }

    fn request_stream<T: Serialize>(
        &self,
        segments: &[&str],
        body: &T,
        accept: &str,
    ) -> ApiResult<BodyReader> {
        let url = build_url(&self.inner.base_url, segments)?;
        let payload = encode_body(body)?;
        let response = self
            .inner
            .agent
            .post(url.as_str())
            .set("Accept", accept)
            .set("Content-Type", "application/json")
            .send_string(&payload);
        match response {
            Ok(resp) => Ok(resp.into_reader()),
            Err(ureq::Error::Status(code, resp)) => Err(parse_error_response(code, resp)),
            Err(ureq::Error::Transport(err)) => Err(Error::new(ErrorKind::Transport)
                .with_message("request failed")
                .with_source(err)),
        }
    }
}

/// Producer side of a streaming write.
///
/// Each `add` encodes one frame into the bounded conduit and blocks while the
/// conduit is full. `wait_for_complete` ends the body and waits for the call.
pub struct FrameWriter {
    encoder: Option<Encoder<ConduitWriter>>,
    done: Option<oneshot::Receiver<ApiResult<WriteReceipt>>>,
    call: Option<JoinHandle<()>>,
    runtime: Arc<Runtime>,
    frames: u64,
}

impl FrameWriter {
    pub fn add(&mut self, frame: &Frame) -> ApiResult<()> {
        let Some(encoder) = self.encoder.as_mut() else {
            return Err(Error::new(ErrorKind::Usage).with_message("write stream already closed"));
        };
        encoder.encode(frame).map_err(|err| match err.kind() {
            ErrorKind::Io => Error::new(ErrorKind::Transport)
                .with_message("write call ended before the stream was finalized")
                .with_hint("Call wait_for_complete to see the remote outcome.")
                .with_source(err),
            _ => err,
        })?;
        self.frames += 1;
        Ok(())
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames
    }

    /// Closes the body, then waits up to `timeout` for the call's outcome.
    ///
    /// On timeout the call is aborted before `Timeout` is returned.
    pub fn wait_for_complete(mut self, timeout: Duration) -> ApiResult<WriteReceipt> {
        self.encoder = None;
        let Some(done) = self.done.take() else {
            return Err(Error::new(ErrorKind::Internal).with_message("write outcome already taken"));
        };
        match self.runtime.block_on(async move { tokio::time::timeout(timeout, done).await }) {
            Ok(Ok(outcome)) => {
                self.call = None;
                outcome
            }
            Ok(Err(_)) => {
                self.call = None;
                Err(Error::new(ErrorKind::Internal).with_message("write task ended without an outcome"))
            }
            Err(_) => {
                if let Some(call) = self.call.take() {
                    call.abort();
                }
                Err(Error::new(ErrorKind::Timeout).with_message(format!(
                    "write did not complete within {}ms",
                    timeout.as_millis()
                )))
            }
        }
    }
}

impl Drop for FrameWriter {
    fn drop(&mut self) {
        let Some(call) = self.call.take() else {
            return;
        };
        // The body must not end cleanly, or the server commits a partial write.
        // Cancel the call while the sender is still alive, then fail the stream.
        call.abort();
        if tokio::runtime::Handle::try_current().is_err() {
            let _ = self.runtime.block_on(call);
        }
        if let Some(encoder) = self.encoder.take() {
            encoder.into_inner().abandon();
        }
    }
}

async fn send_write(request: Request<Body>) -> ApiResult<WriteReceipt> {
    let client = Client::builder(TokioExecutor::new()).build_http::<Body>();
    let response = client.request(request).await.map_err(|err| {
        Error::new(ErrorKind::Transport)
            .with_message("write request failed")
            .with_source(err)
    })?;
    let status = response.status();
    let body = axum::body::to_bytes(Body::new(response.into_body()), MAX_RESPONSE_BYTES)
        .await
        .map_err(|err| {
            Error::new(ErrorKind::Transport)
                .with_message("failed to read write response")
                .with_source(err)
        })?;
    if status != StatusCode::OK {
        return Err(status_error(status.as_u16(), &body));
    }
    serde_json::from_slice(&body).map_err(|err| {
        Error::new(ErrorKind::Decode)
            .with_message("invalid write receipt json")
            .with_source(err)
    })
}

/// Frames decoded from a JSONL read response, one frame message per line.
pub struct JsonlFrames {
    reader: Option<BufReader<BodyReader>>,
    current: Option<Frame>,
    error: Option<Error>,
    state: IterState,
}

impl JsonlFrames {
    pub fn new(reader: BodyReader) -> Self {
        Self {
            reader: Some(BufReader::new(reader)),
            current: None,
            error: None,
            state: IterState::Ready,
        }
    }

    fn finish(&mut self, error: Option<Error>) -> bool {
        self.reader = None;
        self.state = if error.is_some() {
            IterState::Failed
        } else {
            IterState::Exhausted
        };
        self.error = error;
        false
    }
}

impl FrameIterator for JsonlFrames {
    fn next(&mut self) -> bool {
        self.current = None;
        let Some(reader) = self.reader.as_mut() else {
            return false;
        };
        loop {
            let mut line = String::new();
            match reader.read_line(&mut line) {
                Ok(0) => return self.finish(None),
                Ok(_) if line.trim().is_empty() => continue,
                Ok(_) => {}
                Err(err) => {
                    let err = Error::new(ErrorKind::Io)
                        .with_message("failed to read frame stream")
                        .with_source(err);
                    return self.finish(Some(err));
                }
            }
            return match decode_json(line.trim_end()) {
                Ok(frame) => {
                    self.current = Some(frame);
                    true
                }
                Err(err) => self.finish(Some(err)),
            };
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

fn normalize_base_url(raw: String) -> ApiResult<Url> {
    let mut url = Url::parse(&raw).map_err(|err| {
        Error::new(ErrorKind::Usage)
            .with_message("invalid remote base url")
            .with_source(err)
    })?;
    if url.scheme() != "http" {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("remote base url must use the http scheme"));
    }
    if url.path() != "/" && !url.path().is_empty() {
        return Err(
            Error::new(ErrorKind::Usage).with_message("remote base url must not include a path")
        );
    }
    url.set_path("/");
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}

fn build_url(base_url: &Url, segments: &[&str]) -> ApiResult<Url> {
    let mut url = base_url.clone();
    {
        let mut path = url.path_segments_mut().map_err(|_| {
            Error::new(ErrorKind::Usage).with_message("remote base url cannot be a base")
        })?;
        path.clear();
        for segment in segments {
            path.push(segment);
        }
    }
    Ok(url)
}

fn encode_body<T: Serialize>(body: &T) -> ApiResult<String> {
    serde_json::to_string(body).map_err(|err| {
        Error::new(ErrorKind::Encode)
            .with_message("failed to encode request json")
            .with_source(err)
    })
}

fn read_json_response<R>(response: ureq::Response) -> ApiResult<R>
where
    R: DeserializeOwned,
{
    let body = response.into_string().map_err(|err| {
        Error::new(ErrorKind::Transport)
            .with_message("failed to read response body")
            .with_source(err)
    })?;
    serde_json::from_str(&body).map_err(|err| {
        Error::new(ErrorKind::Decode)
            .with_message("invalid response json")
            .with_source(err)
    })
}

fn parse_error_response(status: u16, response: ureq::Response) -> Error {
    let body = response.into_string().unwrap_or_default();
    status_error(status, body.as_bytes())
}

fn status_error(status: u16, body: &[u8]) -> Error {
    let text = String::from_utf8_lossy(body);
    if let Ok(envelope) = serde_json::from_str::<ErrorEnvelope>(&text) {
        return error_from_remote(status, envelope.error);
    }
    let text = text.trim();
    let message = if text.is_empty() {
        format!("remote error status {status}")
    } else {
        format!("remote error status {status}: {text}")
    };
    Error::new(ErrorKind::Transport)
        .with_status(status)
        .with_message(message)
}

fn error_from_remote(status: u16, remote: RemoteError) -> Error {
    let message = match remote.message {
        Some(message) => format!("remote {}: {message}", remote.kind),
        None => format!("remote {}", remote.kind),
    };
    let mut err = Error::new(ErrorKind::Transport)
        .with_status(status)
        .with_message(message);
    if let Some(hint) = remote.hint {
        err = err.with_hint(hint);
    }
    if let Some(column) = remote.column {
        err = err.with_column(column);
    }
    if let Some(index) = remote.index {
        err = err.with_index(index);
    }
    err
}
