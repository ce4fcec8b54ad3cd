//! Daemon wiring: secrets, ops, security components, dispatcher, socket
//! server, receiver, scheduler, and the config hot-reload path.

use crate::secrets;
use anyhow::{Context, Result};
use os_channels::{TelegramNotifier, TelegramReceiver};
use os_core::approval::ApprovalStore;
use os_core::configwatch::Watcher;
use os_core::connector::{self, Manager, Router};
use os_core::ops::{
    self, HelpOp, Op, Registry, StatusOp, TaskDoneOp, TaskListOp, TaskTomorrowOp,
};
use os_core::policy::Policy;
use os_core::ratelimit::RateLimiter;
use os_core::reload::Reloader;
use os_core::server::SocketServer;
use os_core::tasks::{Scheduler, TaskService, TaskStore};
use os_core::totp::Totp;
use os_core::{Dispatcher, NotifierRegistry};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

const WATCH_INTERVAL: Duration = Duration::from_secs(1);

pub async fn serve(state_dir: Option<PathBuf>) -> Result<()> {
    let state_dir = resolve_state_dir(state_dir)?;

    let bot_token = secrets::get(secrets::TELEGRAM_BOT_TOKEN)?;
    let chat_id_raw = secrets::get(secrets::TELEGRAM_CHAT_ID)?;
    let chat_id: i64 = chat_id_raw
        .parse()
        .context("telegram-chat-id must be a numeric chat id")?;

    // Outbound side: notifier registry backing the socket server and the
    // dispatcher replies.
    let notifiers = Arc::new(NotifierRegistry::new());
    notifiers.register(Arc::new(TelegramNotifier::new(&bot_token, &chat_id_raw)?))?;
    let notifier = notifiers.default_notifier()?;

    // Op registry with static built-ins.
    let registry = Arc::new(Registry::new());
    registry.register(Arc::new(HelpOp::new(&registry)))?;
    registry.register(Arc::new(StatusOp::new()))?;

    let tasks = Arc::new(TaskService::new(TaskStore::new(
        state_dir.join("tasks.json"),
    )));
    registry.register(Arc::new(TaskTomorrowOp::new(tasks.clone())))?;
    registry.register(Arc::new(TaskListOp::new(tasks.clone())))?;
    registry.register(Arc::new(TaskDoneOp::new(tasks.clone())))?;

    // Dynamic ops: custom shell commands.
    let commands_path = state_dir.join("commands.json");
    let mut shell_names = Vec::new();
    for cmd in ops::load_commands(&commands_path)? {
        let name = cmd.name().to_string();
        registry
            .register(Arc::new(cmd))
            .with_context(|| format!("register command {name:?}"))?;
        shell_names.push(name);
    }
    tracing::info!(count = shell_names.len(), "custom commands loaded");

    // Dynamic ops: connector tools.
    let connectors_path = state_dir.join("connectors.json");
    let mut manager: Option<Arc<Manager>> = None;
    let mut connector_names = Vec::new();
    if let Some(cfg) = connector::load_config(&connectors_path)? {
        let mgr = Arc::new(Manager::new(cfg.clone()));
        mgr.start().await.context("start connectors")?;
        let router = Arc::new(Router::new(cfg.clone(), mgr.clone()));
        connector_names = connector::register_ops(&cfg, &router, &registry)?;
        tracing::info!(count = cfg.connectors.len(), "connectors loaded");
        manager = Some(mgr);
    }

    // Security trio. An absent TOTP secret disables all of it.
    let (totp, limiter, approvals) = match secrets::get(secrets::TOTP_SECRET) {
        Ok(secret) => {
            let totp = Arc::new(Totp::new(&secret).context("parse totp-secret")?);
            (
                Some(totp),
                Some(Arc::new(RateLimiter::new())),
                Some(Arc::new(ApprovalStore::new())),
            )
        }
        Err(_) => {
            tracing::warn!(
                "totp-secret not set; TOTP, rate limiting, and two-step approvals are disabled"
            );
            (None, None, None)
        }
    };

    let dispatcher = Arc::new(
        Dispatcher::new(
            Arc::new(Policy::new(&[chat_id])),
            registry.clone(),
            notifier.clone(),
        )
        .with_security(totp, limiter, approvals),
    );

    // Hot reload of the dynamic op config files.
    let reloader = Arc::new(Reloader::new(registry.clone()));
    reloader.track_shell_ops(shell_names).await;
    reloader.track_connector_ops(connector_names).await;
    reloader.set_connector_manager(manager).await;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let watcher = Arc::new(Watcher::new(WATCH_INTERVAL));
    {
        let reloader = reloader.clone();
        watcher.watch(&commands_path, move |path| {
            let reloader = reloader.clone();
            let path = path.to_path_buf();
            tokio::spawn(async move { reloader.reload_commands(&path).await });
        });
    }
    {
        let reloader = reloader.clone();
        watcher.watch(&connectors_path, move |path| {
            let reloader = reloader.clone();
            let path = path.to_path_buf();
            tokio::spawn(async move { reloader.reload_connectors(&path).await });
        });
    }
    let watcher_handle = {
        let watcher = watcher.clone();
        let rx = shutdown_rx.clone();
        tokio::spawn(async move { watcher.run(rx).await })
    };

    // Outbound socket server.
    let socket_server = Arc::new(SocketServer::new(
        state_dir.join("openslack.sock"),
        notifiers.clone(),
    ));
    let server_handle = socket_server.start(shutdown_rx.clone()).await?;

    // Daily task reminder.
    let scheduler_handle = {
        let scheduler = Scheduler::new(tasks.clone(), notifier.clone());
        let rx = shutdown_rx.clone();
        tokio::spawn(async move { scheduler.run(rx).await })
    };

    // Inbound long-poll receiver.
    let receiver_handle = {
        let receiver = TelegramReceiver::new(&bot_token, dispatcher.clone())?;
        let rx = shutdown_rx.clone();
        tokio::spawn(async move { receiver.run(rx).await })
    };

    tracing::info!(state_dir = %state_dir.display(), chat_id, "openslackd running");

    tokio::signal::ctrl_c()
        .await
        .context("wait for shutdown signal")?;
    tracing::info!("shutting down");

    let _ = shutdown_tx.send(true);
    let _ = server_handle.await;
    let _ = receiver_handle.await;
    let _ = scheduler_handle.await;
    let _ = watcher_handle.await;
    reloader.shutdown().await;

    Ok(())
}

pub async fn doctor(state_dir: Option<PathBuf>) -> Result<()> {
    let state_dir = resolve_state_dir(state_dir)?;

    let _bot_token = secrets::get(secrets::TELEGRAM_BOT_TOKEN)?;
    let chat_id_raw = secrets::get(secrets::TELEGRAM_CHAT_ID)?;
    let chat_id: i64 = chat_id_raw
        .parse()
        .context("telegram-chat-id must be a numeric chat id")?;

    let totp_enabled = match secrets::get(secrets::TOTP_SECRET) {
        Ok(secret) => {
            Totp::new(&secret).context("parse totp-secret")?;
            true
        }
        Err(_) => false,
    };

    let commands = ops::load_commands(&state_dir.join("commands.json"))?;
    let connectors = connector::load_config(&state_dir.join("connectors.json"))?
        .map(|cfg| cfg.connectors.len())
        .unwrap_or(0);

    tracing::info!(
        state_dir = %state_dir.display(),
        chat_id,
        totp_enabled,
        custom_commands = commands.len(),
        connectors,
        "config ok"
    );
    Ok(())
}

fn resolve_state_dir(state_dir: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(dir) = state_dir {
        return Ok(dir);
    }
    let home = std::env::var("HOME").context("HOME is not set")?;
    Ok(PathBuf::from(home).join(".openslack"))
}
