//! The JSON envelope spoken over the outbound Unix socket.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const MAX_PAYLOAD_BYTES: usize = 8192;
pub const MAX_TEXT_LEN: usize = 4096;
pub const MAX_SOURCE_LEN: usize = 128;
pub const CURRENT_VERSION: u32 = 1;

/// A request sent over the socket.
#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IpcRequest {
    pub version: u32,
    pub action: String,
    #[serde(default)]
    pub payload: Value,
}

/// The payload for the "notify" action.
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NotifyPayload {
    pub text: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub source: String,
}

/// The envelope written back to the client.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct IpcResponse {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl IpcResponse {
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(error.into()),
            id: None,
        }
    }

    pub fn success(id: impl Into<String>) -> Self {
        Self {
            ok: true,
            error: None,
            id: Some(id.into()),
        }
    }
}

/// Checks the request envelope and the payload of known actions. Unknown
/// fields anywhere are rejected.
pub fn validate_request(data: &[u8]) -> Result<IpcRequest> {
    if data.len() > MAX_PAYLOAD_BYTES {
        bail!("payload exceeds {MAX_PAYLOAD_BYTES} byte limit");
    }

    let req: IpcRequest = serde_json::from_slice(data).context("invalid JSON")?;
    if req.version != CURRENT_VERSION {
        bail!(
            "unsupported version {}, expected {}",
            req.version,
            CURRENT_VERSION
        );
    }

    match req.action.as_str() {
        "notify" => {
            parse_notify_payload(&req.payload)?;
        }
        other => bail!("unknown action {other:?}"),
    }
    Ok(req)
}

/// Extracts and validates the notify payload.
pub fn parse_notify_payload(raw: &Value) -> Result<NotifyPayload> {
    if raw.is_null() {
        bail!("missing payload");
    }

    let payload: NotifyPayload =
        serde_json::from_value(raw.clone()).context("invalid notify payload")?;

    if payload.text.is_empty() {
        bail!("text is required");
    }
    if payload.text.chars().count() > MAX_TEXT_LEN {
        bail!("text exceeds {MAX_TEXT_LEN} character limit");
    }
    if payload.source.chars().count() > MAX_SOURCE_LEN {
        bail!("source exceeds {MAX_SOURCE_LEN} character limit");
    }
    Ok(payload)
}
