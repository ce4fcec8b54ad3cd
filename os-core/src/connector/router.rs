use super::config::Config;
use super::manager::Manager;
use super::protocol::{Request, Response, PROTOCOL_VERSION};
use super::ConnectorError;
use serde_json::{json, Value};
use std::sync::Arc;

/// Validates and dispatches connector tool calls addressed by qualified
/// `connector.tool` names.
pub struct Router {
    cfg: Config,
    manager: Arc<Manager>,
}

impl Router {
    pub fn new(cfg: Config, manager: Arc<Manager>) -> Self {
        Self { cfg, manager }
    }

    pub async fn call(&self, qualified: &str, args: Value) -> Result<Response, ConnectorError> {
        let (connector, tool) = split_tool(qualified)?;

        let cc = self
            .cfg
            .connectors
            .get(connector)
            .ok_or_else(|| ConnectorError::UnknownConnector(connector.to_string()))?;
        if !cc.tool_allowed(tool) {
            return Err(ConnectorError::ToolNotAllowed {
                connector: connector.to_string(),
                tool: tool.to_string(),
            });
        }

        let args = if args.is_null() { json!({}) } else { args };
        let req = Request {
            version: PROTOCOL_VERSION.to_string(),
            id: new_request_id(),
            tool: tool.to_string(),
            args,
            meta: None,
        };

        tracing::info!(
            connector = %connector,
            tool = %tool,
            id = %req.id,
            "routing connector call"
        );
        self.manager.call(connector, &req).await
    }
}

fn new_request_id() -> String {
    let hex = uuid::Uuid::new_v4().simple().to_string();
    format!("req_{}", &hex[..8])
}

/// Parses `"connector.tool"` into its two non-empty parts.
fn split_tool(qualified: &str) -> Result<(&str, &str), ConnectorError> {
    let Some((connector, tool)) = qualified.split_once('.') else {
        return Err(ConnectorError::InvalidQualifiedName(qualified.to_string()));
    };
    if connector.is_empty() || tool.is_empty() {
        return Err(ConnectorError::InvalidQualifiedName(qualified.to_string()));
    }
    Ok((connector, tool))
}
