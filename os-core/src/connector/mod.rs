//! External connector subprocesses: the v1 stdio protocol, configuration,
//! process lifecycle, call routing, and the op bridge into the registry.

mod config;
mod manager;
mod op;
mod protocol;
mod router;

pub use config::{
    load_config, Config, ConnectorConfig, Limits, DEFAULT_CALL_TIMEOUT_MS, DEFAULT_REQ_MAX_BYTES,
    DEFAULT_RESP_MAX_BYTES,
};
pub use manager::Manager;
pub use op::{register_ops, ConnectorOp};
pub use protocol::{
    validate_request, validate_response, IntrospectData, IntrospectTool, Request, RequestMeta,
    Response, ResponseError, ERR_INTERNAL, ERR_INVALID_ARGS, ERR_INVALID_REQUEST,
    ERR_NOT_SUPPORTED, ERR_TIMEOUT, ERR_UNAUTHORIZED, INTROSPECT_TOOL, PROTOCOL_VERSION,
};
pub use router::Router;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error("connector {0:?} is not running")]
    NotRunning(String),
    #[error("request exceeds {limit} byte limit ({size} bytes)")]
    RequestTooLarge { limit: usize, size: usize },
    #[error("response from {name:?} exceeds {limit} byte limit")]
    ResponseTooLarge { name: String, limit: usize },
    #[error("connector {0:?} call timed out")]
    Timeout(String),
    #[error("connector {0:?} closed stdout")]
    StdoutClosed(String),
    #[error("invalid response from {name:?}: {reason}")]
    Protocol { name: String, reason: String },
    #[error("response id mismatch from {name:?}: got {got:?}, want {want:?}")]
    IdMismatch {
        name: String,
        got: String,
        want: String,
    },
    #[error("unknown connector {0:?}")]
    UnknownConnector(String),
    #[error("tool {tool:?} not allowed for connector {connector:?}")]
    ToolNotAllowed { connector: String, tool: String },
    #[error("invalid tool name {0:?}: must be connector.tool")]
    InvalidQualifiedName(String),
    #[error("connector {name:?} io: {source}")]
    Io {
        name: String,
        #[source]
        source: std::io::Error,
    },
    #[error("encode request: {0}")]
    Encode(#[source] serde_json::Error),
}
