//! Executable operations triggered by inbound commands, and the registry
//! that holds them.

mod help;
mod shell;
mod status;
mod tasks;

pub use help::HelpOp;
pub use shell::{load_commands, ShellOp};
pub use status::StatusOp;
pub use tasks::{TaskDoneOp, TaskListOp, TaskTomorrowOp};

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

/// Classifies how dangerous an operation is, which selects its
/// authentication path in the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RiskLevel {
    /// No TOTP required (e.g. /help).
    None,
    /// TOTP required as the last argument.
    Low,
    /// Two-step /do + /approve flow.
    High,
}

/// An operation invoked by a parsed `/name args` message. Ops that do not
/// override `risk` are treated as low-risk.
#[async_trait]
pub trait Op: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;

    fn risk(&self) -> RiskLevel {
        RiskLevel::Low
    }

    async fn execute(&self, args: &str) -> Result<String>;
}

/// Registered operations keyed by case-folded name.
pub struct Registry {
    ops: RwLock<HashMap<String, Arc<dyn Op>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            ops: RwLock::new(HashMap::new()),
        }
    }

    /// Adds an operation. Fails if the (case-folded) name is taken.
    pub fn register(&self, op: Arc<dyn Op>) -> Result<()> {
        let key = op.name().to_lowercase();
        let mut ops = self.ops.write().unwrap_or_else(PoisonError::into_inner);
        if ops.contains_key(&key) {
            bail!("op already registered: {key}");
        }
        ops.insert(key, op);
        Ok(())
    }

    /// Removes an operation. Unknown names are ignored.
    pub fn unregister(&self, name: &str) {
        let mut ops = self.ops.write().unwrap_or_else(PoisonError::into_inner);
        ops.remove(&name.to_lowercase());
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Op>> {
        let ops = self.ops.read().unwrap_or_else(PoisonError::into_inner);
        ops.get(&name.to_lowercase()).cloned()
    }

    /// All registered operations, sorted by name.
    pub fn list(&self) -> Vec<Arc<dyn Op>> {
        let ops = self.ops.read().unwrap_or_else(PoisonError::into_inner);
        let mut keys: Vec<&String> = ops.keys().collect();
        keys.sort();
        keys.iter().filter_map(|k| ops.get(*k).cloned()).collect()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
