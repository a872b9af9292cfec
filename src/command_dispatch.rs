//! Purpose: Execute parsed CLI commands against the gateway.
//! Exports: `dispatch_command`.
//! Role: Thin glue between clap definitions in `main.rs` and the `frames::api` surface.
//! Invariants: Commands report success on stdout and return errors for `main` to render.
//! Invariants: A write that fails before completion drops its writer, aborting the call.
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::net::SocketAddr;
use std::time::Duration;

use clap::CommandFactory;
use serde_json::json;

use crate::ingest::JsonlRowSource;
use crate::serve;
use crate::{ClientArgs, Cli, Command, ReadOutput, ReadWire, RunOutcome, ServeArgs, emit_line};
use frames::api::{
    BackendConfig, CreateRequest, DeleteRequest, Error, ErrorKind, FrameIterator, Labels,
    PagedIterator, ReadRequest, RemoteClient, Value, WriteRequest, frame_message,
};

pub(super) fn dispatch_command(command: Command) -> Result<RunOutcome, Error> {
    match command {
        Command::Completion { shell } => {
            let mut cmd = Cli::command();
            clap_complete::aot::generate(shell, &mut cmd, "frames", &mut io::stdout());
            Ok(RunOutcome::ok())
        }
        Command::Serve(args) => {
            let config = serve_config_from_args(args)?;
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .map_err(|err| {
                    Error::new(ErrorKind::Internal)
                        .with_message("failed to start runtime")
                        .with_source(err)
                })?;
            runtime.block_on(serve::serve(config))?;
            Ok(RunOutcome::ok())
        }
        Command::Read {
            client,
            table,
            columns,
            filter,
            limit,
            output,
            wire,
        } => {
            let remote = remote_client(&client)?;
            let request = ReadRequest {
                backend: table.backend.clone(),
                table: table.table.clone(),
                columns,
                filter,
                limit,
                session: table.session(),
            };
            match wire {
                ReadWire::Binary => emit_frames(remote.read(&request)?, output),
                ReadWire::Jsonl => emit_frames(remote.read_jsonl(&request)?, output),
            }
        }
        Command::Write {
            client,
            table,
            file,
            batch,
            labels,
        } => {
            if batch == 0 {
                return Err(Error::new(ErrorKind::Usage)
                    .with_message("--batch must be greater than zero")
                    .with_hint("Use a positive value like 256."));
            }
            let timeout = write_timeout(&client)?;
            let labels = parse_labels(&labels)?;
            let reader: Box<dyn BufRead> = match file {
                Some(path) => {
                    let file = File::open(&path).map_err(|err| {
                        Error::new(ErrorKind::Io)
                            .with_message(format!("failed to open {}", path.display()))
                            .with_source(err)
                    })?;
                    Box::new(BufReader::new(file))
                }
                None => Box::new(io::stdin().lock()),
            };

            let remote = remote_client(&client)?;
            let request = WriteRequest {
                backend: table.backend.clone(),
                table: table.table.clone(),
                session: table.session(),
            };
            let mut rows = PagedIterator::new(JsonlRowSource::new(reader), batch).with_labels(labels);
            let mut writer = remote.write(&request)?;
            while rows.next() {
                let Some(frame) = rows.take() else {
                    continue;
                };
                if let Err(err) = writer.add(&frame) {
                    // Prefer the server's own failure over the broken stream.
                    return Err(writer.wait_for_complete(timeout).err().unwrap_or(err));
                }
            }
            if let Some(err) = rows.take_err() {
                return Err(err);
            }
            let receipt = writer.wait_for_complete(timeout)?;
            emit_line(&json!({ "frames": receipt.frames, "rows": receipt.rows }));
            Ok(RunOutcome::ok())
        }
        Command::Create {
            client,
            table,
            attributes,
        } => {
            let remote = remote_client(&client)?;
            let mut request = CreateRequest {
                backend: table.backend.clone(),
                table: table.table.clone(),
                session: table.session(),
                ..CreateRequest::default()
            };
            for spec in &attributes {
                let (key, value) = parse_key_value(spec, "--attr")?;
                request.attributes.insert(key, value);
            }
            remote.create(&request)?;
            emit_line(&json!({ "created": request.table }));
            Ok(RunOutcome::ok())
        }
        Command::Delete {
            client,
            table,
            filter,
            force,
        } => {
            let remote = remote_client(&client)?;
            let request = DeleteRequest {
                backend: table.backend.clone(),
                table: table.table.clone(),
                filter,
                force,
                session: table.session(),
            };
            remote.delete(&request)?;
            emit_line(&json!({ "deleted": request.table }));
            Ok(RunOutcome::ok())
        }
    }
}

fn serve_config_from_args(args: ServeArgs) -> Result<serve::ServeConfig, Error> {
    let bind: SocketAddr = args.bind.parse().map_err(|_| {
        Error::new(ErrorKind::Usage)
            .with_message("invalid bind address")
            .with_hint("Use a host:port value like 127.0.0.1:9800.")
    })?;
    let backends = args
        .backends
        .iter()
        .map(|spec| spec.parse::<BackendConfig>())
        .collect::<Result<Vec<_>, _>>()?;
    Ok(serve::ServeConfig {
        bind,
        backends,
        allow_non_loopback: args.allow_non_loopback,
        max_body_bytes: args.max_body_bytes,
        row_limit: args.row_limit,
    })
}

fn remote_client(client: &ClientArgs) -> Result<RemoteClient, Error> {
    Ok(RemoteClient::new(client.url.clone())?
        .with_connect_timeout(Duration::from_millis(client.timeout_ms.max(1))))
}

fn write_timeout(client: &ClientArgs) -> Result<Duration, Error> {
    if client.timeout_ms == 0 {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("--timeout-ms must be greater than zero")
            .with_hint("Use a positive value like 30000."));
    }
    Ok(Duration::from_millis(client.timeout_ms))
}

fn emit_frames<I: FrameIterator>(mut iter: I, output: ReadOutput) -> Result<RunOutcome, Error> {
    while iter.next() {
        let Some(frame) = iter.take() else {
            continue;
        };
        match output {
            ReadOutput::Frames => {
                let value = serde_json::to_value(frame_message(&frame)).map_err(|err| {
                    Error::new(ErrorKind::Encode)
                        .with_message("failed to encode frame message")
                        .with_source(err)
                })?;
                emit_line(&value);
            }
            ReadOutput::Rows => {
                for mut row in frame.iter_rows(true) {
                    for (name, value) in frame.labels() {
                        if !row.contains(name) {
                            row.insert(name.clone(), value.clone());
                        }
                    }
                    emit_line(&row.to_json());
                }
            }
        }
    }
    match iter.take_err() {
        Some(err) => Err(err),
        None => Ok(RunOutcome::ok()),
    }
}

/// Splits `KEY=VALUE`; values that are not JSON are taken as strings.
fn parse_key_value(spec: &str, flag: &str) -> Result<(String, serde_json::Value), Error> {
    let Some((key, raw)) = spec.split_once('=') else {
        return Err(Error::new(ErrorKind::Usage)
            .with_message(format!("invalid {flag} value {spec:?}"))
            .with_hint(format!("Use {flag} KEY=VALUE.")));
    };
    let key = key.trim();
    if key.is_empty() {
        return Err(
            Error::new(ErrorKind::Usage).with_message(format!("{flag} value {spec:?} has an empty key"))
        );
    }
    let value = serde_json::from_str(raw)
        .unwrap_or_else(|_| serde_json::Value::String(raw.to_string()));
    Ok((key.to_string(), value))
}

fn parse_labels(specs: &[String]) -> Result<Labels, Error> {
    let mut labels = BTreeMap::new();
    for spec in specs {
        let (key, value) = parse_key_value(spec, "--label")?;
        let value = Value::from_json(&value).map_err(|err| err.with_column(key.clone()))?;
        labels.insert(key, value);
    }
    Ok(labels)
}
