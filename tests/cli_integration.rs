// CLI integration tests for the client commands against a spawned gateway.
use std::io::Write;
use std::net::TcpListener;
use std::process::{Child, Command, Output, Stdio};
use std::thread::sleep;
use std::time::{Duration, Instant};

use serde_json::Value;

fn cmd() -> Command {
    let exe = env!("CARGO_BIN_EXE_frames");
    Command::new(exe)
}

fn parse_json_lines(output: &[u8]) -> Vec<Value> {
    String::from_utf8_lossy(output)
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).expect("valid json"))
        .collect()
}

struct Gateway {
    child: Child,
    url: String,
}

impl Gateway {
    fn start() -> Self {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
            listener.local_addr().expect("addr").port()
        };
        let bind = format!("127.0.0.1:{port}");
        let child = cmd()
            .args(["serve", "--bind", &bind, "--backend", "mem=memory"])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .expect("spawn serve");
        let url = format!("http://{bind}");
        let start = Instant::now();
        while ureq::get(&format!("{url}/healthz")).call().is_err() {
            assert!(start.elapsed() < Duration::from_secs(8), "server did not start");
            sleep(Duration::from_millis(20));
        }
        Self { child, url }
    }

    fn run(&self, args: &[&str]) -> Output {
        cmd()
            .args(args)
            .env("FRAMES_URL", &self.url)
            .output()
            .expect("run frames")
    }
}

impl Drop for Gateway {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

#[test]
fn write_then_read_rows_flow() {
    let gateway = Gateway::start();
    let mut input = tempfile::NamedTempFile::new().expect("tempfile");
    for i in 0..5 {
        writeln!(input, "{{\"__name\":\"k{i}\",\"temp\":{}.5}}", 20 + i).expect("write input");
    }
    input.flush().expect("flush");

    let write = gateway.run(&[
        "write",
        "--backend",
        "mem",
        "--table",
        "weather",
        "--batch",
        "2",
        "--label",
        "site=lab",
        "-f",
        input.path().to_str().expect("path"),
    ]);
    assert!(write.status.success(), "{}", String::from_utf8_lossy(&write.stderr));
    let receipt = &parse_json_lines(&write.stdout)[0];
    assert_eq!(receipt["frames"], 3);
    assert_eq!(receipt["rows"], 5);

    let read = gateway.run(&["read", "--backend", "mem", "--table", "weather", "--limit", "2"]);
    assert!(read.status.success(), "{}", String::from_utf8_lossy(&read.stderr));
    let rows = parse_json_lines(&read.stdout);
    assert_eq!(rows.len(), 5);
    assert_eq!(rows[0]["__name"], "k0");
    assert_eq!(rows[4]["temp"], 24.5);
    assert_eq!(rows[4]["site"], "lab");

    let frames = gateway.run(&[
        "read", "--backend", "mem", "--table", "weather", "--output", "frames", "--wire", "jsonl",
    ]);
    assert!(frames.status.success());
    let messages = parse_json_lines(&frames.stdout);
    assert_eq!(messages.len(), 1);
    assert!(messages[0]["columns"].is_array());
}

#[test]
fn create_and_delete_report_errors_with_exit_codes() {
    let gateway = Gateway::start();
    let create = gateway.run(&["create", "--backend", "mem", "--table", "t", "--attr", "retention=7"]);
    assert!(create.status.success());
    assert_eq!(parse_json_lines(&create.stdout)[0]["created"], "t");

    // Remote failures surface as transport errors carrying the status.
    let again = gateway.run(&["create", "--backend", "mem", "--table", "t"]);
    assert_eq!(again.status.code(), Some(10));
    let err = &parse_json_lines(&again.stderr)[0];
    assert_eq!(err["error"]["kind"], "Transport");
    assert_eq!(err["error"]["status"], 409);

    let delete = gateway.run(&["delete", "--backend", "mem", "--table", "t"]);
    assert!(delete.status.success());
    let missing = gateway.run(&["delete", "--backend", "mem", "--table", "t"]);
    assert_eq!(missing.status.code(), Some(10));
    let forced = gateway.run(&["delete", "--backend", "mem", "--table", "t", "--force"]);
    assert!(forced.status.success());
}

#[test]
fn bad_input_line_fails_with_line_number() {
    let gateway = Gateway::start();
    let mut child = cmd()
        .args(["write", "--backend", "mem", "--table", "bad"])
        .env("FRAMES_URL", &gateway.url)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn write");
    child
        .stdin
        .take()
        .expect("stdin")
        .write_all(b"{\"v\":1}\nnot json\n")
        .expect("write stdin");
    let output = child.wait_with_output().expect("wait");
    assert_eq!(output.status.code(), Some(2));
    let err = &parse_json_lines(&output.stderr)[0];
    assert_eq!(err["error"]["kind"], "Usage");
    assert_eq!(err["error"]["index"], 2);
}

#[test]
fn unreachable_gateway_is_a_transport_error() {
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        listener.local_addr().expect("addr").port()
    };
    let output = cmd()
        .args(["read", "--backend", "mem", "--table", "t"])
        .env("FRAMES_URL", format!("http://127.0.0.1:{port}"))
        .output()
        .expect("run");
    assert_eq!(output.status.code(), Some(10));
    let err = &parse_json_lines(&output.stderr)[0];
    assert_eq!(err["error"]["kind"], "Transport");
    assert!(err["error"]["hint"].as_str().is_some());
}

#[test]
fn completion_emits_script() {
    let output = cmd().args(["completion", "bash"]).output().expect("completion");
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("frames"));
}
