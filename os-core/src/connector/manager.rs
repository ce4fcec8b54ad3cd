use super::config::Config;
use super::protocol::{validate_response, Request, Response};
use super::ConnectorError;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{oneshot, Mutex as AsyncMutex};

/// Owns the lifecycle of connector child processes and routes framed calls
/// to them. Each connector sees at most one in-flight call at a time.
pub struct Manager {
    cfg: Config,
    procs: StdMutex<HashMap<String, Arc<ConnectorProc>>>,
}

struct ConnectorProc {
    name: String,
    /// Serializes calls so a connector sees strict FIFO traffic.
    call_lock: AsyncMutex<()>,
    stdin: AsyncMutex<ChildStdin>,
    stdout: Arc<AsyncMutex<BufReader<ChildStdout>>>,
    child: StdMutex<Option<Child>>,
}

impl Manager {
    pub fn new(cfg: Config) -> Self {
        Self {
            cfg,
            procs: StdMutex::new(HashMap::new()),
        }
    }

    /// Launches all configured connectors. On any spawn failure the already
    /// started children are stopped again.
    pub async fn start(&self) -> Result<(), ConnectorError> {
        for (name, cc) in &self.cfg.connectors {
            if let Err(e) = self.spawn_connector(name, &cc.exec) {
                self.shutdown().await;
                return Err(e);
            }
            tracing::info!(name = %name, exec = %cc.exec, "connector started");
        }
        Ok(())
    }

    /// Launches a single connector by name.
    pub fn start_connector(&self, name: &str, exec: &str) -> Result<(), ConnectorError> {
        self.spawn_connector(name, exec)?;
        tracing::info!(name = %name, exec = %exec, "connector started");
        Ok(())
    }

    fn spawn_connector(&self, name: &str, exec: &str) -> Result<(), ConnectorError> {
        let io_err = |source| ConnectorError::Io {
            name: name.to_string(),
            source,
        };

        let mut child = Command::new(exec)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(io_err)?;

        let Some(stdin) = child.stdin.take() else {
            return Err(io_err(std::io::Error::other("child stdin unavailable")));
        };
        let Some(stdout) = child.stdout.take() else {
            return Err(io_err(std::io::Error::other("child stdout unavailable")));
        };
        if let Some(stderr) = child.stderr.take() {
            drain_stderr(name.to_string(), stderr);
        }

        let proc = Arc::new(ConnectorProc {
            name: name.to_string(),
            call_lock: AsyncMutex::new(()),
            stdin: AsyncMutex::new(stdin),
            stdout: Arc::new(AsyncMutex::new(BufReader::new(stdout))),
            child: StdMutex::new(Some(child)),
        });

        self.procs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), proc);
        Ok(())
    }

    /// Sends a request to a connector and awaits its response, bounded by
    /// the configured call timeout and size limits.
    pub async fn call(&self, connector: &str, req: &Request) -> Result<Response, ConnectorError> {
        let proc = self
            .procs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(connector)
            .cloned()
            .ok_or_else(|| ConnectorError::NotRunning(connector.to_string()))?;

        let mut data = serde_json::to_vec(req).map_err(ConnectorError::Encode)?;
        if data.len() > self.cfg.limits.req_max_bytes {
            return Err(ConnectorError::RequestTooLarge {
                limit: self.cfg.limits.req_max_bytes,
                size: data.len(),
            });
        }
        data.push(b'\n');

        let _call = proc.call_lock.lock().await;

        {
            let mut stdin = proc.stdin.lock().await;
            let written = async {
                stdin.write_all(&data).await?;
                stdin.flush().await
            };
            written.await.map_err(|source| ConnectorError::Io {
                name: proc.name.clone(),
                source,
            })?;
        }

        // The read runs in its own task so that a timed-out response is
        // still drained from the pipe when it eventually arrives, instead
        // of being misread as the reply to the next call.
        let (tx, rx) = oneshot::channel();
        let reader_proc = proc.clone();
        let resp_max = self.cfg.limits.resp_max_bytes;
        tokio::spawn(async move {
            let mut stdout = reader_proc.stdout.lock().await;
            let result = read_line_bounded(&mut stdout, resp_max, &reader_proc.name).await;
            let _ = tx.send(result);
        });

        let timeout = Duration::from_millis(self.cfg.limits.call_timeout_ms);
        let line = match tokio::time::timeout(timeout, rx).await {
            Err(_) => {
                tracing::warn!(connector = %proc.name, id = %req.id, "connector call timed out");
                return Err(ConnectorError::Timeout(proc.name.clone()));
            }
            Ok(Err(_)) => return Err(ConnectorError::StdoutClosed(proc.name.clone())),
            Ok(Ok(result)) => result?,
        };

        let resp: Response =
            serde_json::from_slice(&line).map_err(|e| ConnectorError::Protocol {
                name: proc.name.clone(),
                reason: e.to_string(),
            })?;
        validate_response(&resp).map_err(|reason| ConnectorError::Protocol {
            name: proc.name.clone(),
            reason,
        })?;
        if resp.id != req.id {
            return Err(ConnectorError::IdMismatch {
                name: proc.name.clone(),
                got: resp.id,
                want: req.id.clone(),
            });
        }
        Ok(resp)
    }

    /// Stops a single connector by name.
    pub async fn stop_connector(&self, name: &str) -> Result<(), ConnectorError> {
        let proc = self
            .procs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
            .ok_or_else(|| ConnectorError::NotRunning(name.to_string()))?;
        kill_child(&proc).await;
        tracing::info!(name = %name, "connector stopped");
        Ok(())
    }

    /// Stops all connector processes.
    pub async fn shutdown(&self) {
        let procs: Vec<Arc<ConnectorProc>> = self
            .procs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, p)| p)
            .collect();

        for proc in procs {
            kill_child(&proc).await;
            tracing::info!(name = %proc.name, "connector stopped");
        }
    }
}

async fn kill_child(proc: &ConnectorProc) {
    let child = proc
        .child
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .take();
    if let Some(mut child) = child {
        if let Err(e) = child.start_kill() {
            tracing::warn!(name = %proc.name, error = %e, "failed to kill connector");
        }
        let _ = child.wait().await;
    }
}

/// Reads one newline-terminated frame, refusing frames longer than `max`
/// bytes. The read consumes at most `max + 1` bytes of the stream.
async fn read_line_bounded(
    reader: &mut BufReader<ChildStdout>,
    max: usize,
    name: &str,
) -> Result<Vec<u8>, ConnectorError> {
    let mut line = Vec::new();
    let mut limited = (&mut *reader).take(max as u64 + 1);
    let n = limited
        .read_until(b'\n', &mut line)
        .await
        .map_err(|source| ConnectorError::Io {
            name: name.to_string(),
            source,
        })?;

    if n == 0 {
        return Err(ConnectorError::StdoutClosed(name.to_string()));
    }
    if line.last() == Some(&b'\n') {
        line.pop();
    }
    if line.len() > max {
        return Err(ConnectorError::ResponseTooLarge {
            name: name.to_string(),
            limit: max,
        });
    }
    Ok(line)
}

fn drain_stderr(name: String, stderr: tokio::process::ChildStderr) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            tracing::debug!(connector = %name, line = %line, "connector stderr");
        }
    });
}
