//! Sample connector speaking the v1 line-delimited JSON protocol on stdio.
//! Tools: echo, time, sleep, and the reserved __introspect.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::io::{BufRead, Write};

const CONNECTOR_VERSION: &str = "1.0.0";
const PROTOCOL_VERSION: &str = "v1";

#[derive(Debug, Deserialize)]
struct Request {
    #[serde(default)]
    version: String,
    #[serde(default)]
    id: String,
    #[serde(default)]
    tool: String,
    #[serde(default)]
    args: Value,
}

#[derive(Debug, Serialize)]
struct Response {
    version: &'static str,
    id: String,
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<RespError>,
}

#[derive(Debug, Serialize)]
struct RespError {
    code: &'static str,
    message: String,
}

fn main() {
    eprintln!("sample-connector started");

    let stdin = std::io::stdin();
    let stdout = std::io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                eprintln!("stdin error: {e}");
                std::process::exit(1);
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let resp = match serde_json::from_str::<Request>(&line) {
            Err(e) => error_response(String::new(), "INVALID_REQUEST", format!("invalid json: {e}")),
            Ok(req) if req.version != PROTOCOL_VERSION => error_response(
                req.id,
                "INVALID_REQUEST",
                format!("unsupported version: {}", req.version),
            ),
            Ok(req) => handle(req),
        };

        let mut out = stdout.lock();
        if let Ok(encoded) = serde_json::to_string(&resp) {
            let _ = writeln!(out, "{encoded}");
            let _ = out.flush();
        }
    }
}

fn handle(req: Request) -> Response {
    match req.tool.as_str() {
        "__introspect" => introspect(req.id),
        "echo" => echo(req.id, &req.args),
        "time" => time(req.id),
        "sleep" => sleep(req.id, &req.args),
        other => error_response(
            req.id,
            "NOT_SUPPORTED",
            format!("unknown tool: {other}"),
        ),
    }
}

fn introspect(id: String) -> Response {
    success(
        id,
        json!({
            "name": "sample",
            "version": CONNECTOR_VERSION,
            "tools": [{"name": "echo"}, {"name": "time"}, {"name": "sleep"}]
        }),
    )
}

fn echo(id: String, args: &Value) -> Response {
    let text = args.get("text").and_then(Value::as_str).unwrap_or("");
    if text.is_empty() {
        return error_response(id, "INVALID_ARGS", "text is required".to_string());
    }
    success(id, json!({"text": text}))
}

fn time(id: String) -> Response {
    let now = chrono::Local::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
    success(id, json!({"time": now}))
}

// Test tool used to validate timeout enforcement.
fn sleep(id: String, args: &Value) -> Response {
    let ms = args.get("ms").and_then(Value::as_u64).unwrap_or(0);
    if ms == 0 {
        return error_response(id, "INVALID_ARGS", "ms must be a positive integer".to_string());
    }
    std::thread::sleep(std::time::Duration::from_millis(ms));
    success(id, json!({"slept": format!("{ms}ms")}))
}

fn success(id: String, data: Value) -> Response {
    Response {
        version: PROTOCOL_VERSION,
        id,
        ok: true,
        data: Some(data),
        error: None,
    }
}

fn error_response(id: String, code: &'static str, message: String) -> Response {
    Response {
        version: PROTOCOL_VERSION,
        id,
        ok: false,
        data: None,
        error: Some(RespError { code, message }),
    }
}
