use super::{Op, Registry, RiskLevel};
use anyhow::Result;
use async_trait::async_trait;
use std::fmt::Write;
use std::sync::{Arc, Weak};

/// Lists all registered operations.
pub struct HelpOp {
    registry: Weak<Registry>,
}

impl HelpOp {
    pub fn new(registry: &Arc<Registry>) -> Self {
        Self {
            registry: Arc::downgrade(registry),
        }
    }
}

#[async_trait]
impl Op for HelpOp {
    fn name(&self) -> &str {
        "help"
    }

    fn description(&self) -> &str {
        "List available commands"
    }

    fn risk(&self) -> RiskLevel {
        RiskLevel::None
    }

    async fn execute(&self, _args: &str) -> Result<String> {
        let Some(registry) = self.registry.upgrade() else {
            return Ok("No commands available.".to_string());
        };

        let all = registry.list();
        if all.is_empty() {
            return Ok("No commands available.".to_string());
        }

        let mut out = String::from("Available commands:\n");
        for op in all {
            let _ = writeln!(out, "  /{} — {}", op.name(), op.description());
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::FnOp;
    use super::*;

    #[tokio::test]
    async fn lists_registered_ops() {
        let registry = Arc::new(Registry::new());
        registry.register(FnOp::echo()).unwrap();
        let help = HelpOp::new(&registry);
        registry.register(Arc::new(HelpOp::new(&registry))).unwrap();

        let out = help.execute("").await.unwrap();
        assert!(out.starts_with("Available commands:"));
        assert!(out.contains("/echo"));
        assert!(out.contains("/help — List available commands"));
    }

    #[tokio::test]
    async fn empty_registry_reports_no_commands() {
        let registry = Arc::new(Registry::new());
        let help = HelpOp::new(&registry);
        assert_eq!(help.execute("").await.unwrap(), "No commands available.");
    }

    #[test]
    fn help_is_risk_none() {
        let registry = Arc::new(Registry::new());
        assert_eq!(HelpOp::new(&registry).risk(), RiskLevel::None);
    }
}
