//! Unix-domain socket server for outbound notification requests from local
//! processes. No inbound network surface: the socket lives in a 0700
//! directory and is itself 0600.

use crate::ipc::{self, IpcResponse, MAX_PAYLOAD_BYTES};
use crate::traits::NotifierRegistry;
use crate::types::Notification;
use anyhow::{bail, Context, Result};
use chrono::Utc;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};

const CONN_DEADLINE: Duration = Duration::from_secs(5);
const STALE_PROBE_TIMEOUT: Duration = Duration::from_millis(500);

pub struct SocketServer {
    socket_path: PathBuf,
    registry: Arc<NotifierRegistry>,
}

impl SocketServer {
    pub fn new(socket_path: impl Into<PathBuf>, registry: Arc<NotifierRegistry>) -> Self {
        Self {
            socket_path: socket_path.into(),
            registry,
        }
    }

    /// Binds the socket and spawns the accept loop. Fails hard if another
    /// instance is already listening; a stale socket file is removed.
    pub async fn start(
        self: Arc<Self>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<JoinHandle<()>> {
        if let Some(dir) = self.socket_path.parent() {
            std::fs::create_dir_all(dir).context("create socket directory")?;
            std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700))
                .context("chmod socket directory")?;
        }

        if self.socket_path.exists() {
            let probe =
                tokio::time::timeout(STALE_PROBE_TIMEOUT, UnixStream::connect(&self.socket_path))
                    .await;
            if matches!(probe, Ok(Ok(_))) {
                bail!(
                    "another instance is already listening on {}",
                    self.socket_path.display()
                );
            }
            tracing::info!(path = %self.socket_path.display(), "removing stale socket");
            std::fs::remove_file(&self.socket_path).context("remove stale socket")?;
        }

        let listener = UnixListener::bind(&self.socket_path).context("listen")?;
        std::fs::set_permissions(&self.socket_path, std::fs::Permissions::from_mode(0o600))
            .context("chmod socket")?;
        tracing::info!(path = %self.socket_path.display(), "listening");

        let server = self.clone();
        let handle = tokio::spawn(async move {
            let mut connections = JoinSet::new();
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    accepted = listener.accept() => match accepted {
                        Ok((conn, _addr)) => {
                            let registry = server.registry.clone();
                            connections.spawn(handle_connection(conn, registry));
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "accept error");
                            break;
                        }
                    },
                }
            }

            // Drain in-flight connections (each is deadline-bounded).
            while connections.join_next().await.is_some() {}
            let _ = std::fs::remove_file(&server.socket_path);
        });
        Ok(handle)
    }
}

async fn handle_connection(mut conn: UnixStream, registry: Arc<NotifierRegistry>) {
    if tokio::time::timeout(CONN_DEADLINE, serve_connection(&mut conn, registry))
        .await
        .is_err()
    {
        tracing::warn!("socket connection exceeded deadline");
    }
}

async fn serve_connection(conn: &mut UnixStream, registry: Arc<NotifierRegistry>) {
    let mut data = Vec::new();
    let read = (&mut *conn)
        .take(MAX_PAYLOAD_BYTES as u64 + 1)
        .read_to_end(&mut data)
        .await;
    if read.is_err() {
        write_response(conn, IpcResponse::failure("read error")).await;
        return;
    }
    if data.len() > MAX_PAYLOAD_BYTES {
        write_response(
            conn,
            IpcResponse::failure(format!("payload exceeds {MAX_PAYLOAD_BYTES} byte limit")),
        )
        .await;
        return;
    }

    let req = match ipc::validate_request(&data) {
        Ok(req) => req,
        Err(e) => {
            tracing::warn!(error = %e, "invalid request");
            write_response(conn, IpcResponse::failure(e.to_string())).await;
            return;
        }
    };

    match req.action.as_str() {
        "notify" => handle_notify(conn, registry, &req).await,
        other => {
            write_response(conn, IpcResponse::failure(format!("unknown action {other:?}"))).await;
        }
    }
}

async fn handle_notify(
    conn: &mut UnixStream,
    registry: Arc<NotifierRegistry>,
    req: &ipc::IpcRequest,
) {
    let payload = match ipc::parse_notify_payload(&req.payload) {
        Ok(payload) => payload,
        Err(e) => {
            write_response(conn, IpcResponse::failure(e.to_string())).await;
            return;
        }
    };

    let notifier = match registry.default_notifier() {
        Ok(n) => n,
        Err(e) => {
            tracing::error!(error = %e, "no default notifier");
            write_response(conn, IpcResponse::failure("no notifier configured")).await;
            return;
        }
    };

    let id = uuid::Uuid::new_v4().to_string();
    let n = Notification {
        id: id.clone(),
        text: payload.text,
        source: payload.source.clone(),
        created_at: Utc::now(),
    };

    if let Err(e) = notifier.send(n).await {
        tracing::error!(notifier = %notifier.name(), error = %e, "send failed");
        write_response(conn, IpcResponse::failure("delivery failed")).await;
        return;
    }

    tracing::info!(id = %id, notifier = %notifier.name(), source = %payload.source, "notification sent");
    write_response(conn, IpcResponse::success(id)).await;
}

async fn write_response(conn: &mut UnixStream, resp: IpcResponse) {
    let Ok(data) = serde_json::to_vec(&resp) else {
        return;
    };
    let _ = conn.write_all(&data).await;
    let _ = conn.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::Notifier;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    struct RecordingNotifier {
        sent: Mutex<Vec<Notification>>,
        fail: bool,
    }

    impl RecordingNotifier {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                sent: Mutex::new(Vec::new()),
                fail,
            })
        }
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        fn name(&self) -> &str {
            "recording"
        }
        async fn send(&self, n: Notification) -> Result<()> {
            if self.fail {
                bail!("chat unreachable");
            }
            self.sent.lock().unwrap().push(n);
            Ok(())
        }
    }

    async fn start_server(
        notifier: Arc<RecordingNotifier>,
    ) -> (tempfile::TempDir, PathBuf, watch::Sender<bool>, JoinHandle<()>) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("openslack.sock");

        let registry = Arc::new(NotifierRegistry::new());
        registry.register(notifier).unwrap();

        let server = Arc::new(SocketServer::new(&path, registry));
        let (tx, rx) = watch::channel(false);
        let handle = server.start(rx).await.unwrap();
        (dir, path, tx, handle)
    }

    async fn roundtrip(path: &std::path::Path, body: &[u8]) -> IpcResponse {
        let mut conn = UnixStream::connect(path).await.unwrap();
        conn.write_all(body).await.unwrap();
        conn.shutdown().await.unwrap();

        let mut out = Vec::new();
        conn.read_to_end(&mut out).await.unwrap();
        serde_json::from_slice(&out).unwrap()
    }

    #[tokio::test]
    async fn notify_delivers_and_returns_an_id() {
        let notifier = RecordingNotifier::new(false);
        let (_dir, path, tx, handle) = start_server(notifier.clone()).await;

        let body = serde_json::to_vec(&json!({
            "version": 1,
            "action": "notify",
            "payload": {"text": "deploy done", "source": "ci"}
        }))
        .unwrap();
        let resp = roundtrip(&path, &body).await;

        assert!(resp.ok);
        assert!(resp.id.is_some());
        let sent = notifier.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].text, "deploy done");
        assert_eq!(sent[0].source, "ci");
        drop(sent);

        tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn invalid_requests_are_rejected() {
        let (_dir, path, tx, handle) = start_server(RecordingNotifier::new(false)).await;

        let resp = roundtrip(&path, b"{not json").await;
        assert!(!resp.ok);

        let body = serde_json::to_vec(&json!({
            "version": 1,
            "action": "notify",
            "payload": {"text": "hi", "bogus": 1}
        }))
        .unwrap();
        let resp = roundtrip(&path, &body).await;
        assert!(!resp.ok);

        tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn oversize_payloads_are_rejected() {
        let (_dir, path, tx, handle) = start_server(RecordingNotifier::new(false)).await;

        let body = vec![b'x'; MAX_PAYLOAD_BYTES + 100];
        let resp = roundtrip(&path, &body).await;
        assert!(!resp.ok);
        assert!(resp.error.unwrap().contains("byte limit"));

        tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn delivery_failure_is_reported() {
        let (_dir, path, tx, handle) = start_server(RecordingNotifier::new(true)).await;

        let body = serde_json::to_vec(&json!({
            "version": 1,
            "action": "notify",
            "payload": {"text": "hi"}
        }))
        .unwrap();
        let resp = roundtrip(&path, &body).await;
        assert!(!resp.ok);
        assert_eq!(resp.error.as_deref(), Some("delivery failed"));

        tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn second_instance_fails_while_first_listens() {
        let (_dir, path, tx, handle) = start_server(RecordingNotifier::new(false)).await;

        let registry = Arc::new(NotifierRegistry::new());
        let second = Arc::new(SocketServer::new(&path, registry));
        let (_tx2, rx2) = watch::channel(false);
        let err = second.start(rx2).await.unwrap_err();
        assert!(err.to_string().contains("already listening"));

        tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn stale_socket_is_removed_on_startup() {
        let notifier = RecordingNotifier::new(false);
        let (_dir, path, tx, handle) = start_server(notifier.clone()).await;

        // Shut the first server down; the socket file is removed on exit,
        // so recreate a stale one by hand.
        tx.send(true).unwrap();
        handle.await.unwrap();
        drop(
            std::os::unix::net::UnixListener::bind(&path).expect("bind stale socket"),
        );
        assert!(path.exists());

        let registry = Arc::new(NotifierRegistry::new());
        registry.register(notifier).unwrap();
        let server = Arc::new(SocketServer::new(&path, registry));
        let (tx2, rx2) = watch::channel(false);
        let handle2 = server.start(rx2).await.unwrap();

        tx2.send(true).unwrap();
        handle2.await.unwrap();
    }

    #[tokio::test]
    async fn socket_permissions_are_restricted() {
        let (_dir, path, tx, handle) = start_server(RecordingNotifier::new(false)).await;

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);

        let dir_mode = std::fs::metadata(path.parent().unwrap())
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(dir_mode & 0o777, 0o700);

        tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
