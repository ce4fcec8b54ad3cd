use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

pub const PROTOCOL_VERSION: &str = "v1";

/// Reserved tool name for introspection; always allowed.
pub const INTROSPECT_TOOL: &str = "__introspect";

pub const ERR_INVALID_ARGS: &str = "INVALID_ARGS";
pub const ERR_INVALID_REQUEST: &str = "INVALID_REQUEST";
pub const ERR_NOT_SUPPORTED: &str = "NOT_SUPPORTED";
pub const ERR_INTERNAL: &str = "INTERNAL";
pub const ERR_TIMEOUT: &str = "TIMEOUT";
pub const ERR_UNAUTHORIZED: &str = "UNAUTHORIZED";

/// The JSON envelope written to a connector's stdin, one per line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub version: String,
    pub id: String,
    pub tool: String,
    pub args: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<RequestMeta>,
}

/// Optional tracing metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

/// The JSON envelope read from a connector's stdout, one per line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub version: String,
    pub id: String,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ResponseError>,
}

/// A structured error from a connector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseError {
    pub code: String,
    pub message: String,
}

impl fmt::Display for ResponseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

/// Data returned by the `__introspect` tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntrospectData {
    pub name: String,
    pub version: String,
    pub tools: Vec<IntrospectTool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntrospectTool {
    pub name: String,
}

/// Checks a request for protocol correctness.
pub fn validate_request(req: &Request) -> Result<(), String> {
    if req.version != PROTOCOL_VERSION {
        return Err(format!(
            "unsupported protocol version {:?}, expected {:?}",
            req.version, PROTOCOL_VERSION
        ));
    }
    if req.id.is_empty() {
        return Err("request id is required".to_string());
    }
    if req.tool.is_empty() {
        return Err("tool name is required".to_string());
    }
    if req.args.is_null() {
        return Err("args is required".to_string());
    }
    Ok(())
}

/// Checks a response for protocol correctness. A response is valid iff it is
/// version v1, carries an id, and is either ok or carries an error object.
pub fn validate_response(resp: &Response) -> Result<(), String> {
    if resp.version != PROTOCOL_VERSION {
        return Err(format!(
            "unsupported protocol version {:?}",
            resp.version
        ));
    }
    if resp.id.is_empty() {
        return Err("response id is required".to_string());
    }
    if !resp.ok && resp.error.is_none() {
        return Err("error response must include error object".to_string());
    }
    Ok(())
}
