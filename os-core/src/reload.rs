use crate::connector::{self, ConnectorOp, Manager, Router};
use crate::ops::{self, Op, Registry};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Hot-reloads dynamic ops (shell commands and connector tools) when their
/// config files change. Previously registered dynamic ops are always
/// unregistered before the new config is read, so a malformed file leaves no
/// stale ops behind. Static built-ins are untouched.
pub struct Reloader {
    registry: Arc<Registry>,
    state: Mutex<ReloadState>,
}

#[derive(Default)]
struct ReloadState {
    shell_ops: Vec<String>,
    connector_ops: Vec<String>,
    manager: Option<Arc<Manager>>,
}

impl Reloader {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            state: Mutex::new(ReloadState::default()),
        }
    }

    /// Records the shell op names registered at startup.
    pub async fn track_shell_ops(&self, names: Vec<String>) {
        self.state.lock().await.shell_ops = names;
    }

    /// Records the connector op names registered at startup.
    pub async fn track_connector_ops(&self, names: Vec<String>) {
        self.state.lock().await.connector_ops = names;
    }

    /// Records the connector manager started at startup, if any.
    pub async fn set_connector_manager(&self, manager: Option<Arc<Manager>>) {
        self.state.lock().await.manager = manager;
    }

    /// Replaces the dynamic shell ops with the contents of the config file.
    pub async fn reload_commands(&self, path: &Path) {
        let mut state = self.state.lock().await;

        for name in state.shell_ops.drain(..) {
            self.registry.unregister(&name);
        }

        let cmds = match ops::load_commands(path) {
            Ok(cmds) => cmds,
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "reload commands failed");
                return;
            }
        };

        let mut names = Vec::new();
        for cmd in cmds {
            let name = cmd.name().to_string();
            match self.registry.register(Arc::new(cmd)) {
                Ok(()) => {
                    tracing::info!(name = %name, "reloaded command");
                    names.push(name);
                }
                Err(e) => {
                    tracing::warn!(name = %name, error = %e, "skip reloaded command");
                }
            }
        }
        tracing::info!(count = names.len(), "commands reloaded");
        state.shell_ops = names;
    }

    /// Stops the old connectors, loads the new config, starts new ones, and
    /// re-registers their ops.
    pub async fn reload_connectors(&self, path: &Path) {
        let mut state = self.state.lock().await;

        for name in state.connector_ops.drain(..) {
            self.registry.unregister(&name);
        }
        if let Some(manager) = state.manager.take() {
            manager.shutdown().await;
        }

        let cfg = match connector::load_config(path) {
            Ok(cfg) => cfg,
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "reload connectors failed");
                return;
            }
        };
        let Some(cfg) = cfg.filter(|c| !c.connectors.is_empty()) else {
            tracing::info!(count = 0, "connectors reloaded");
            return;
        };

        let manager = Arc::new(Manager::new(cfg.clone()));
        if let Err(e) = manager.start().await {
            tracing::error!(error = %e, "reload connectors: start failed");
            return;
        }

        let router = Arc::new(Router::new(cfg.clone(), manager.clone()));
        let mut names = Vec::new();
        for (connector, cc) in &cfg.connectors {
            for tool in &cc.tools {
                let qualified = format!("{connector}.{tool}");
                match self
                    .registry
                    .register(Arc::new(ConnectorOp::new(qualified.clone(), router.clone())))
                {
                    Ok(()) => names.push(qualified),
                    Err(e) => {
                        tracing::warn!(name = %qualified, error = %e, "skip reloaded connector op");
                    }
                }
            }
        }

        tracing::info!(count = cfg.connectors.len(), "connectors reloaded");
        state.manager = Some(manager);
        state.connector_ops = names;
    }

    /// Stops the connector manager, if one is running. Called on daemon
    /// shutdown.
    pub async fn shutdown(&self) {
        let mut state = self.state.lock().await;
        if let Some(manager) = state.manager.take() {
            manager.shutdown().await;
        }
    }
}
