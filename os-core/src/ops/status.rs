use super::Op;
use anyhow::Result;
use async_trait::async_trait;
use std::time::Instant;

/// Reports daemon uptime and version.
pub struct StatusOp {
    started_at: Instant,
}

impl StatusOp {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
        }
    }
}

impl Default for StatusOp {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Op for StatusOp {
    fn name(&self) -> &str {
        "status"
    }

    fn description(&self) -> &str {
        "Show daemon status"
    }

    async fn execute(&self, _args: &str) -> Result<String> {
        Ok(format!(
            "Status: OK\nUptime: {}s\nVersion: {}",
            self.started_at.elapsed().as_secs(),
            env!("CARGO_PKG_VERSION"),
        ))
    }
}
