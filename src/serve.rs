//! Purpose: Provide the HTTP gateway server for the frames v0 protocol.
//! Exports: `ServeConfig`, `serve`.
//! Role: Axum-based loopback server routing read/write/create/delete to named backends.
//! Invariants: Every response carries `frames-version: 0`; errors use the JSON envelope.
//! Invariants: Loopback-only unless explicitly allowed.
//! Invariants: Backend calls run on blocking threads; bodies cross via bounded conduits.
//! Notes: Reads stream binary frame records, or JSONL frame messages on request.

use std::future::IntoFuture;
use std::io::Write;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::json;
use tokio::time::Duration;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use frames::api::{
    BackendConfig, BackendRegistry, BoxFrameIterator, ConduitReader, ConduitWriter,
    CreateRequest, DeleteRequest, Encoder, Error, ErrorKind, FRAME_STREAM_MIME, JSONL_MIME,
    PROTOCOL_VERSION, ReadRequest, StreamFrameIterator, VERSION_HEADER, WriteReceipt, conduit,
    encode_json, read_control_record,
};

#[derive(Clone, Debug)]
pub struct ServeConfig {
    pub bind: SocketAddr,
    pub backends: Vec<BackendConfig>,
    pub allow_non_loopback: bool,
    /// Limit for JSON request bodies; write streams are bounded per record instead.
    pub max_body_bytes: u64,
    pub row_limit: usize,
}

struct AppState {
    registry: BackendRegistry,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum ReadFormat {
    Frames,
    Jsonl,
}

pub async fn serve(config: ServeConfig) -> Result<(), Error> {
    validate_config(&config)?;

    init_tracing();

    let max_body_bytes: usize = config
        .max_body_bytes
        .try_into()
        .map_err(|_| Error::new(ErrorKind::Usage).with_message("--max-body-bytes is too large"))?;

    let registry = BackendRegistry::from_configs(&config.backends, config.row_limit)?;
    let state = Arc::new(AppState { registry });

    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/v0/read", post(read_frames))
        .route("/v0/write", post(write_frames))
        .route("/v0/create", post(create_table))
        .route("/v0/delete", post(delete_table))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("failed to bind server")
                .with_source(err)
        })?;
    tracing::info!(
        bind = %config.bind,
        backends = %backend_list(&config.backends),
        "frames gateway listening"
    );

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let server = axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        })
        .into_future();
    tokio::pin!(server);

    tokio::select! {
        result = &mut server => {
            result.map_err(|err| {
                Error::new(ErrorKind::Io)
                    .with_message("server failed")
                    .with_source(err)
            })?;
        }
        _ = shutdown_signal() => {
            let _ = shutdown_tx.send(());
            match tokio::time::timeout(Duration::from_secs(10), &mut server).await {
                Ok(result) => result.map_err(|err| {
                    Error::new(ErrorKind::Io)
                        .with_message("server failed")
                        .with_source(err)
                })?,
                Err(_) => {
                    return Err(Error::new(ErrorKind::Io).with_message("server shutdown timed out"));
                }
            }
        }
    };
    Ok(())
}

fn is_loopback(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(addr) => addr.is_loopback(),
        IpAddr::V6(addr) => addr.is_loopback(),
    }
}

fn validate_config(config: &ServeConfig) -> Result<(), Error> {
    if !is_loopback(config.bind.ip()) && !config.allow_non_loopback {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("non-loopback bind requires explicit opt-in")
            .with_hint("Re-run with --allow-non-loopback or use a loopback address."));
    }

    if config.backends.is_empty() {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("no backends configured")
            .with_hint("Add one with --backend NAME=TYPE, for example --backend mem=memory."));
    }

    if config.max_body_bytes == 0 {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("--max-body-bytes must be greater than zero")
            .with_hint("Use a positive value like 1048576."));
    }

    if config.max_body_bytes > usize::MAX as u64 {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("--max-body-bytes exceeds platform limits")
            .with_hint("Use a smaller value that fits in memory."));
    }

    if config.row_limit == 0 {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("--row-limit must be greater than zero")
            .with_hint("Use a positive value like 256."));
    }

    Ok(())
}

fn backend_list(backends: &[BackendConfig]) -> String {
    backends
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .try_init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(unix)]
    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    #[cfg(not(unix))]
    ctrl_c.await;
}

async fn healthz(State(state): State<Arc<AppState>>) -> Response {
    json_response(json!({ "ok": true, "backends": state.registry.names() }))
}

#[derive(Debug, Serialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    kind: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    hint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    column: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    index: Option<u64>,
}

async fn create_table(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateRequest>,
) -> Response {
    let result = run_blocking(move || {
        request.validate()?;
        state.registry.get(&request.backend)?.create(&request)
    })
    .await;
    match result {
        Ok(()) => json_response(json!({ "ok": true })),
        Err(err) => error_response(err),
    }
}

async fn delete_table(
    State(state): State<Arc<AppState>>,
    Json(request): Json<DeleteRequest>,
) -> Response {
    let result = run_blocking(move || {
        request.validate()?;
        state.registry.get(&request.backend)?.delete(&request)
    })
    .await;
    match result {
        Ok(()) => json_response(json!({ "ok": true })),
        Err(err) => error_response(err),
    }
}

async fn write_frames(State(state): State<Arc<AppState>>, body: Body) -> Response {
    let (tx, rx) = conduit();
    let mut data = body.into_data_stream();
    tokio::spawn(async move {
        while let Some(chunk) = data.next().await {
            let chunk = chunk.map_err(|err| std::io::Error::other(err.to_string()));
            let failed = chunk.is_err();
            if tx.send(chunk).await.is_err() || failed {
                break;
            }
        }
    });

    let result = run_blocking(move || -> Result<WriteReceipt, Error> {
        let mut reader = ConduitReader::new(rx);
        let request = read_control_record(&mut reader)?;
        request.validate()?;
        let backend = state.registry.get(&request.backend)?;
        let mut frames = StreamFrameIterator::new(reader);
        let receipt = backend.write(&request, &mut frames)?;
        tracing::info!(
            backend = %request.backend,
            table = %request.table,
            frames = receipt.frames,
            rows = receipt.rows,
            "write completed"
        );
        Ok(receipt)
    })
    .await;
    match result {
        Ok(receipt) => json_response(json!(receipt)),
        Err(err) => error_response(err),
    }
}

async fn read_frames(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<ReadRequest>,
) -> Response {
    let format = read_format(&headers);
    let table = request.table.clone();
    // Open before streaming so lookup failures still get a proper status.
    let opened = run_blocking(move || {
        request.validate()?;
        state.registry.get(&request.backend)?.read(&request)
    })
    .await;
    let mut frames = match opened {
        Ok(frames) => frames,
        Err(err) => return error_response(err),
    };

    let (tx, rx) = conduit();
    tokio::task::spawn_blocking(move || {
        let mut writer = ConduitWriter::new(tx);
        if let Err(err) = stream_frames(&mut frames, &mut writer, format) {
            tracing::warn!(%table, error = %err, "read stream aborted");
            writer.fail(std::io::Error::other(err.to_string()));
        }
    });

    let content_type = match format {
        ReadFormat::Frames => FRAME_STREAM_MIME,
        ReadFormat::Jsonl => JSONL_MIME,
    };
    let mut response = Response::new(Body::from_stream(ReceiverStream::new(rx)));
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    insert_version(&mut response);
    response
}

fn read_format(headers: &HeaderMap) -> ReadFormat {
    let wants_jsonl = headers
        .get(header::ACCEPT)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|accept| accept.contains(JSONL_MIME));
    if wants_jsonl {
        ReadFormat::Jsonl
    } else {
        ReadFormat::Frames
    }
}

fn stream_frames(
    frames: &mut BoxFrameIterator,
    writer: &mut ConduitWriter,
    format: ReadFormat,
) -> Result<(), Error> {
    let mut encoder = Encoder::new(&mut *writer);
    while frames.next() {
        let Some(frame) = frames.take() else {
            continue;
        };
        match format {
            ReadFormat::Frames => encoder.encode(&frame)?,
            ReadFormat::Jsonl => {
                let mut line = encode_json(&frame)?;
                line.push('\n');
                encoder.get_mut().write_all(line.as_bytes()).map_err(|err| {
                    Error::new(ErrorKind::Io)
                        .with_message("failed to write frame line")
                        .with_source(err)
                })?;
            }
        }
    }
    match frames.take_err() {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

async fn run_blocking<T, F>(work: F) -> Result<T, Error>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, Error> + Send + 'static,
{
    tokio::task::spawn_blocking(work).await.map_err(|err| {
        Error::new(ErrorKind::Internal)
            .with_message("backend task failed")
            .with_source(err)
    })?
}

fn insert_version(response: &mut Response) {
    response
        .headers_mut()
        .insert(VERSION_HEADER, HeaderValue::from_static(PROTOCOL_VERSION));
}

fn json_response(payload: serde_json::Value) -> Response {
    let mut response = Json(payload).into_response();
    insert_version(&mut response);
    response
}

fn error_status(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Usage
        | ErrorKind::Decode
        | ErrorKind::UnknownType
        | ErrorKind::TypeMismatch
        | ErrorKind::OutOfRange => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::AlreadyExists => StatusCode::CONFLICT,
        ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
        ErrorKind::Encode | ErrorKind::Transport | ErrorKind::Io | ErrorKind::Internal => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

fn error_response(err: Error) -> Response {
    let status = error_status(err.kind());
    if status.is_server_error() {
        tracing::warn!(error = %err, "request failed");
    }
    let body = ErrorEnvelope {
        error: ErrorBody {
            kind: format!("{:?}", err.kind()),
            message: err.message().unwrap_or("error").to_string(),
            hint: err.hint().map(str::to_string),
            column: err.column().map(str::to_string),
            index: err.index(),
        },
    };
    let mut response = (status, Json(body)).into_response();
    insert_version(&mut response);
    response
}

#[cfg(test)]
mod tests {
    use super::{
        ErrorKind, ReadFormat, ServeConfig, error_response, error_status, read_format, serve,
        validate_config,
    };
    use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
    use frames::api::{BackendConfig, Error};

    fn config(bind: &str) -> ServeConfig {
        ServeConfig {
            bind: bind.parse().expect("bind"),
            backends: vec!["mem=memory".parse::<BackendConfig>().expect("backend")],
            allow_non_loopback: false,
            max_body_bytes: 1024 * 1024,
            row_limit: 256,
        }
    }

    #[tokio::test]
    async fn serve_rejects_non_loopback_bind() {
        let err = serve(config("0.0.0.0:0")).await.expect_err("expected usage error");
        assert_eq!(err.kind(), ErrorKind::Usage);
    }

    #[test]
    fn non_loopback_requires_allow_flag() {
        let mut config = config("0.0.0.0:0");
        let err = validate_config(&config).expect_err("expected usage error");
        assert_eq!(err.kind(), ErrorKind::Usage);
        config.allow_non_loopback = true;
        validate_config(&config).expect("config ok");
    }

    #[test]
    fn safety_limits_require_positive_values() {
        let mut zero_body = config("127.0.0.1:0");
        zero_body.max_body_bytes = 0;
        assert_eq!(
            validate_config(&zero_body).expect_err("body").kind(),
            ErrorKind::Usage
        );

        let mut zero_rows = config("127.0.0.1:0");
        zero_rows.row_limit = 0;
        assert_eq!(
            validate_config(&zero_rows).expect_err("rows").kind(),
            ErrorKind::Usage
        );

        let mut no_backends = config("127.0.0.1:0");
        no_backends.backends.clear();
        assert_eq!(
            validate_config(&no_backends).expect_err("backends").kind(),
            ErrorKind::Usage
        );
    }

    #[test]
    fn error_kinds_map_to_statuses() {
        assert_eq!(error_status(ErrorKind::TypeMismatch), StatusCode::BAD_REQUEST);
        assert_eq!(error_status(ErrorKind::Decode), StatusCode::BAD_REQUEST);
        assert_eq!(error_status(ErrorKind::NotFound), StatusCode::NOT_FOUND);
        assert_eq!(error_status(ErrorKind::AlreadyExists), StatusCode::CONFLICT);
        assert_eq!(error_status(ErrorKind::Timeout), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(error_status(ErrorKind::Io), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn error_response_carries_version_header() {
        let response = error_response(Error::new(ErrorKind::NotFound).with_message("missing"));
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            response.headers().get("frames-version"),
            Some(&HeaderValue::from_static("0"))
        );
    }

    #[test]
    fn accept_header_selects_jsonl() {
        let mut headers = HeaderMap::new();
        assert_eq!(read_format(&headers), ReadFormat::Frames);
        headers.insert(header::ACCEPT, HeaderValue::from_static("application/jsonl"));
        assert_eq!(read_format(&headers), ReadFormat::Jsonl);
    }
}
