//! Purpose: `frames` CLI entry point and command definitions.
//! Role: Binary crate root; parses args, runs commands, emits JSON on stdout.
//! Invariants: Data commands emit one JSON document per line on stdout.
//! Invariants: Non-interactive errors are emitted as JSON on stderr.
//! Invariants: Process exit code is derived from `api::to_exit_code`.
#![allow(clippy::result_large_err)]
use std::io::{self, IsTerminal};
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum, ValueHint, error::ErrorKind as ClapErrorKind};
use clap_complete::aot::Shell;
use serde_json::{Map, Value, json};
use std::error::Error as StdError;

mod command_dispatch;
mod ingest;
mod serve;

use frames::api::{Error, ErrorKind, Session, to_exit_code};

pub const DEFAULT_URL: &str = "http://127.0.0.1:9800";

#[derive(Copy, Clone, Debug)]
struct RunOutcome {
    exit_code: i32,
}

impl RunOutcome {
    fn ok() -> Self {
        Self { exit_code: 0 }
    }

    fn with_code(exit_code: i32) -> Self {
        Self { exit_code }
    }
}

fn main() {
    let exit_code = match run() {
        Ok(outcome) => outcome.exit_code,
        Err(err) => {
            emit_error(&err);
            to_exit_code(err.kind())
        }
    };
    std::process::exit(exit_code);
}

fn run() -> Result<RunOutcome, Error> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => match err.kind() {
            ClapErrorKind::DisplayHelp
            | ClapErrorKind::DisplayVersion
            | ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => {
                err.print().map_err(|io_err| {
                    Error::new(ErrorKind::Io)
                        .with_message("failed to write help")
                        .with_source(io_err)
                })?;
                let exit_code = if matches!(
                    err.kind(),
                    ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
                ) {
                    2
                } else {
                    0
                };
                return Ok(RunOutcome::with_code(exit_code));
            }
            _ => {
                return Err(Error::new(ErrorKind::Usage)
                    .with_message(clap_error_summary(&err))
                    .with_hint("Try `frames --help`."));
            }
        },
    };

    command_dispatch::dispatch_command(cli.command).map_err(add_transport_hint)
}

#[derive(Parser)]
#[command(
    name = "frames",
    version,
    about = "Columnar frame gateway: read and write typed frames over HTTP",
    long_about = None,
    after_help = r#"EXAMPLES
  $ frames serve --backend mem=memory
  $ frames create --backend mem --table weather
  $ printf '{"__name":"a","temp":21.5}\n' | frames write --backend mem --table weather
  $ frames read --backend mem --table weather --limit 100

LEARN MORE
  $ frames <command> --help"#,
    arg_required_else_help = true
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    #[command(
        about = "Run the HTTP gateway",
        long_about = r#"Serve the frames v0 protocol over HTTP.

Each --backend names one storage adapter as NAME=TYPE. Requests pick a backend by name."#,
        after_help = r#"EXAMPLES
  $ frames serve
  $ frames serve --bind 127.0.0.1:9800 --backend mem=memory --backend scratch=memory
  $ RUST_LOG=debug frames serve --row-limit 1000"#
    )]
    Serve(ServeArgs),
    #[command(
        about = "Read a table as JSON Lines",
        after_help = r#"EXAMPLES
  $ frames read --backend mem --table weather
  $ frames read --backend mem --table weather --column temp --limit 2 --output frames"#
    )]
    Read {
        #[command(flatten)]
        client: ClientArgs,
        #[command(flatten)]
        table: TableArgs,
        #[arg(long = "column", help = "Column to read (repeatable; default: all)")]
        columns: Vec<String>,
        #[arg(long, default_value = "", help = "Backend filter expression")]
        filter: String,
        #[arg(long, default_value_t = 0, help = "Rows per frame (0 = backend default)")]
        limit: usize,
        #[arg(long, value_enum, default_value_t = ReadOutput::Rows, help = "Print rows or frame messages")]
        output: ReadOutput,
        #[arg(long, value_enum, default_value_t = ReadWire::Binary, help = "Response encoding to request")]
        wire: ReadWire,
    },
    #[command(
        about = "Write JSON Lines rows to a table",
        long_about = r#"Write rows to a table as a single streaming request.

Each input line is one JSON object. Rows are grouped into frames of --batch rows;
a `__name` field becomes the frame index. Input comes from --file or stdin."#,
        after_help = r#"EXAMPLES
  $ frames write --backend mem --table weather -f readings.jsonl
  $ jq -c '.[]' data.json | frames write --backend mem --table weather --label site=lab"#
    )]
    Write {
        #[command(flatten)]
        client: ClientArgs,
        #[command(flatten)]
        table: TableArgs,
        #[arg(short = 'f', long, help = "Read rows from a file instead of stdin", value_hint = ValueHint::FilePath)]
        file: Option<PathBuf>,
        #[arg(long, default_value_t = 256, help = "Rows per frame")]
        batch: usize,
        #[arg(long = "label", value_name = "KEY=JSON", help = "Label attached to every frame (repeatable)")]
        labels: Vec<String>,
    },
    #[command(about = "Create a table")]
    Create {
        #[command(flatten)]
        client: ClientArgs,
        #[command(flatten)]
        table: TableArgs,
        #[arg(long = "attr", value_name = "KEY=JSON", help = "Table attribute (repeatable)")]
        attributes: Vec<String>,
    },
    #[command(about = "Delete a table")]
    Delete {
        #[command(flatten)]
        client: ClientArgs,
        #[command(flatten)]
        table: TableArgs,
        #[arg(long, default_value = "", help = "Backend filter expression")]
        filter: String,
        #[arg(long, help = "Succeed when the table does not exist")]
        force: bool,
    },
    #[command(
        arg_required_else_help = true,
        about = "Generate shell completions",
        after_help = r#"EXAMPLES
  $ frames completion bash > ~/.local/share/bash-completion/completions/frames
  $ frames completion zsh > ~/.zfunc/_frames"#
    )]
    Completion {
        #[arg(help = "Shell to generate completions for")]
        shell: Shell,
    },
}

#[derive(Args, Debug)]
struct ServeArgs {
    #[arg(long, default_value = "127.0.0.1:9800", help = "Bind address (host:port)")]
    bind: String,
    #[arg(
        long = "backend",
        value_name = "NAME=TYPE",
        default_value = "mem=memory",
        help = "Backend to expose (repeatable)"
    )]
    backends: Vec<String>,
    #[arg(long, default_value_t = 1024 * 1024, help = "Max JSON request body size")]
    max_body_bytes: u64,
    #[arg(long, default_value_t = 256, help = "Default rows per frame for reads")]
    row_limit: usize,
    #[arg(long, help = "Allow binding to non-loopback addresses")]
    allow_non_loopback: bool,
}

#[derive(Args, Debug, Clone)]
struct ClientArgs {
    #[arg(long, env = "FRAMES_URL", default_value = DEFAULT_URL, help = "Gateway base URL")]
    url: String,
    #[arg(long, default_value_t = 30_000, help = "Time to wait for a write to complete")]
    timeout_ms: u64,
}

#[derive(Args, Debug, Clone)]
struct TableArgs {
    #[arg(long, help = "Backend name")]
    backend: String,
    #[arg(long, help = "Table name")]
    table: String,
    #[arg(long, help = "Session container passed to the backend")]
    container: Option<String>,
    #[arg(long, help = "Session user passed to the backend")]
    user: Option<String>,
    #[arg(long, env = "FRAMES_PASSWORD", hide_env_values = true, help = "Session password")]
    password: Option<String>,
}

impl TableArgs {
    fn session(&self) -> Option<Session> {
        if self.container.is_none() && self.user.is_none() && self.password.is_none() {
            return None;
        }
        Some(Session {
            container: self.container.clone().unwrap_or_default(),
            user: self.user.clone().unwrap_or_default(),
            password: self.password.clone().unwrap_or_default(),
            ..Session::default()
        })
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum ReadOutput {
    Rows,
    Frames,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum ReadWire {
    Binary,
    Jsonl,
}

fn emit_line(value: &Value) {
    let json = serde_json::to_string(value)
        .unwrap_or_else(|_| "{\"error\":\"json encode failed\"}".to_string());
    println!("{json}");
}

fn emit_error(err: &Error) {
    let is_tty = io::stderr().is_terminal();
    if is_tty {
        eprintln!("{}", error_text(err));
        return;
    }

    let json = serde_json::to_string(&error_json(err)).unwrap_or_else(|_| {
        "{\"error\":{\"kind\":\"Internal\",\"message\":\"json encode failed\"}}".to_string()
    });
    eprintln!("{json}");
}

fn error_message(err: &Error) -> String {
    if let Some(message) = err.message() {
        return message.to_string();
    }
    match err.kind() {
        ErrorKind::Internal => "internal error".to_string(),
        ErrorKind::Usage => "usage error".to_string(),
        ErrorKind::NotFound => "not found".to_string(),
        ErrorKind::AlreadyExists => "already exists".to_string(),
        ErrorKind::TypeMismatch => "type mismatch".to_string(),
        ErrorKind::OutOfRange => "index out of range".to_string(),
        ErrorKind::UnknownType => "value has no column type".to_string(),
        ErrorKind::Decode => "malformed frame data".to_string(),
        ErrorKind::Encode => "frame encoding failed".to_string(),
        ErrorKind::Transport => "request failed".to_string(),
        ErrorKind::Timeout => "operation timed out".to_string(),
        ErrorKind::Io => "i/o error".to_string(),
    }
}

fn error_json(err: &Error) -> Value {
    let mut inner = Map::new();
    inner.insert("kind".to_string(), json!(format!("{:?}", err.kind())));
    inner.insert("message".to_string(), json!(error_message(err)));
    if let Some(hint) = err.hint() {
        inner.insert("hint".to_string(), json!(hint));
    }
    if let Some(column) = err.column() {
        inner.insert("column".to_string(), json!(column));
    }
    if let Some(index) = err.index() {
        inner.insert("index".to_string(), json!(index));
    }
    if let Some(status) = err.status() {
        inner.insert("status".to_string(), json!(status));
    }
    let causes = error_causes(err);
    if !causes.is_empty() {
        inner.insert("causes".to_string(), json!(causes));
    }

    let mut outer = Map::new();
    outer.insert("error".to_string(), Value::Object(inner));
    Value::Object(outer)
}

fn error_text(err: &Error) -> String {
    let mut lines = vec![format!("error: {}", error_message(err))];
    if let Some(hint) = err.hint() {
        lines.push(format!("hint: {hint}"));
    }
    if let Some(column) = err.column() {
        lines.push(format!("column: {column}"));
    }
    if let Some(index) = err.index() {
        lines.push(format!("index: {index}"));
    }
    if let Some(status) = err.status() {
        lines.push(format!("status: {status}"));
    }
    for cause in error_causes(err) {
        lines.push(format!("caused by: {cause}"));
    }
    lines.join("\n")
}

fn error_causes(err: &Error) -> Vec<String> {
    let mut causes = Vec::new();
    let mut current = err.source();
    while let Some(source) = current {
        causes.push(source.to_string());
        current = source.source();
    }
    causes
}

fn add_transport_hint(err: Error) -> Error {
    if err.kind() != ErrorKind::Transport || err.hint().is_some() || err.status().is_some() {
        return err;
    }
    err.with_hint("Is `frames serve` running? Check --url or FRAMES_URL.")
}

fn clap_error_summary(err: &clap::Error) -> String {
    for line in err.to_string().lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Some(rest) = trimmed.strip_prefix("error:") {
            return rest.trim().to_string();
        }
        return trimmed.to_string();
    }
    "invalid arguments".to_string()
}

#[cfg(test)]
mod tests {
    use super::{Cli, Command, ReadOutput, add_transport_hint, error_json, error_text};
    use clap::{CommandFactory, Parser};
    use frames::api::{Error, ErrorKind};

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn read_defaults_to_rows_over_binary() {
        let cli = Cli::try_parse_from(["frames", "read", "--backend", "mem", "--table", "t"])
            .expect("parse");
        match cli.command {
            Command::Read { output, limit, .. } => {
                assert_eq!(output, ReadOutput::Rows);
                assert_eq!(limit, 0);
            }
            _ => panic!("expected read"),
        }
    }

    #[test]
    fn error_json_includes_column_and_index() {
        let err = Error::new(ErrorKind::TypeMismatch)
            .with_message("column type differs")
            .with_column("temp")
            .with_index(3);
        let value = error_json(&err);
        assert_eq!(value["error"]["kind"], "TypeMismatch");
        assert_eq!(value["error"]["column"], "temp");
        assert_eq!(value["error"]["index"], 3);
        assert!(error_text(&err).contains("column: temp"));
    }

    #[test]
    fn transport_hint_only_for_connection_failures() {
        let err = add_transport_hint(Error::new(ErrorKind::Transport));
        assert!(err.hint().is_some());
        let err = add_transport_hint(Error::new(ErrorKind::Transport).with_status(404));
        assert!(err.hint().is_none());
    }
}
