use super::config::Config;
use super::router::Router;
use crate::ops::{Op, Registry, RiskLevel};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

/// Bridges a connector tool into the op registry so it can be invoked from
/// chat like any other command, e.g. `/sample.echo hello world`.
pub struct ConnectorOp {
    qualified: String,
    description: String,
    router: Arc<Router>,
}

impl ConnectorOp {
    pub fn new(qualified: impl Into<String>, router: Arc<Router>) -> Self {
        let qualified = qualified.into();
        Self {
            description: format!("Connector: {qualified}"),
            qualified,
            router,
        }
    }
}

#[async_trait]
impl Op for ConnectorOp {
    fn name(&self) -> &str {
        &self.qualified
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn risk(&self) -> RiskLevel {
        RiskLevel::Low
    }

    async fn execute(&self, args: &str) -> Result<String> {
        let body = args_to_json(args)?;
        let resp = self.router.call(&self.qualified, body).await?;

        if !resp.ok {
            match resp.error {
                Some(e) => bail!("{e}"),
                None => bail!("connector error without detail"),
            }
        }
        Ok(format_data(resp.data.as_ref()))
    }
}

/// Converts a plain args string into a JSON request body: empty becomes an
/// empty object, a leading `{` is parsed as JSON, anything else is wrapped
/// as `{"text": ...}`.
fn args_to_json(args: &str) -> Result<Value> {
    let args = args.trim();
    if args.is_empty() {
        return Ok(json!({}));
    }
    if args.starts_with('{') {
        return serde_json::from_str(args).context("args is not valid JSON");
    }
    Ok(json!({ "text": args }))
}

/// Renders response data for the chat: a flat string-to-string object prints
/// as `key: value` lines, anything else as indented JSON.
fn format_data(data: Option<&Value>) -> String {
    let Some(data) = data else {
        return "OK".to_string();
    };

    if let Value::Object(map) = data {
        if !map.is_empty() && map.values().all(Value::is_string) {
            return map
                .iter()
                .map(|(k, v)| format!("{k}: {}", v.as_str().unwrap_or_default()))
                .collect::<Vec<_>>()
                .join("\n");
        }
    }

    serde_json::to_string_pretty(data).unwrap_or_else(|_| data.to_string())
}

/// Creates and registers a ConnectorOp for each allowed tool of every
/// configured connector, returning the registered names.
pub fn register_ops(
    cfg: &Config,
    router: &Arc<Router>,
    registry: &Registry,
) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for (connector, cc) in &cfg.connectors {
        for tool in &cc.tools {
            let qualified = format!("{connector}.{tool}");
            registry
                .register(Arc::new(ConnectorOp::new(qualified.clone(), router.clone())))
                .with_context(|| format!("register connector op {qualified:?}"))?;
            names.push(qualified);
        }
    }
    Ok(names)
}
