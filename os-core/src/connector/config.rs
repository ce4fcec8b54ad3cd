use super::protocol::INTROSPECT_TOOL;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

pub const DEFAULT_REQ_MAX_BYTES: usize = 4096;
pub const DEFAULT_RESP_MAX_BYTES: usize = 16384;
pub const DEFAULT_CALL_TIMEOUT_MS: u64 = 10_000;

/// Top-level connector configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub connectors: BTreeMap<String, ConnectorConfig>,
    #[serde(default)]
    pub limits: Limits,
}

/// A single connector's executable and allowed tools.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectorConfig {
    pub exec: String,
    pub tools: Vec<String>,
}

impl ConnectorConfig {
    /// True if the tool is allowlisted. `__introspect` is always allowed.
    pub fn tool_allowed(&self, tool: &str) -> bool {
        tool == INTROSPECT_TOOL || self.tools.iter().any(|t| t == tool)
    }
}

/// Global resource limits. Zero values take the defaults.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Limits {
    #[serde(default)]
    pub req_max_bytes: usize,
    #[serde(default)]
    pub resp_max_bytes: usize,
    #[serde(default)]
    pub call_timeout_ms: u64,
}

/// Reads and validates a connector config file. A missing file means no
/// connectors are configured.
pub fn load_config(path: &Path) -> Result<Option<Config>> {
    let data = match std::fs::read_to_string(path) {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e).context("read connector config"),
        Ok(data) => data,
    };

    let mut cfg: Config = serde_json::from_str(&data).context("parse connector config")?;
    validate(&cfg)?;
    apply_defaults(&mut cfg.limits);
    Ok(Some(cfg))
}

fn validate(cfg: &Config) -> Result<()> {
    for (name, cc) in &cfg.connectors {
        if name.is_empty() {
            bail!("connector name cannot be empty");
        }
        if name.contains('.') {
            bail!("connector name {name:?} must not contain dots");
        }
        if cc.exec.is_empty() {
            bail!("connector {name:?} missing exec path");
        }
        if cc.tools.is_empty() {
            bail!("connector {name:?} has no allowed tools");
        }
        for tool in &cc.tools {
            if tool.is_empty() {
                bail!("connector {name:?} has empty tool name");
            }
            if tool.starts_with("__") && tool != INTROSPECT_TOOL {
                bail!("connector {name:?}: tool {tool:?} uses reserved prefix __");
            }
        }
    }
    Ok(())
}

fn apply_defaults(limits: &mut Limits) {
    if limits.req_max_bytes == 0 {
        limits.req_max_bytes = DEFAULT_REQ_MAX_BYTES;
    }
    if limits.resp_max_bytes == 0 {
        limits.resp_max_bytes = DEFAULT_RESP_MAX_BYTES;
    }
    if limits.call_timeout_ms == 0 {
        limits.call_timeout_ms = DEFAULT_CALL_TIMEOUT_MS;
    }
}
