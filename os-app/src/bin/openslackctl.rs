//! Command-line client for the daemon's Unix socket.
//!
//! Exit codes: 0 on success, 1 on a validation or application error, 2 when
//! the daemon is unreachable.

use clap::{Parser, Subcommand};
use os_core::ipc::IpcResponse;
use std::path::PathBuf;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;

#[derive(Debug, Parser)]
#[command(name = "openslackctl", version, about = "Send requests to openslackd")]
struct Cli {
    /// Socket path. Defaults to ~/.openslack/openslack.sock
    #[arg(long)]
    socket: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Deliver a notification to the chat.
    Notify { text: String },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    std::process::exit(run(cli).await);
}

async fn run(cli: Cli) -> i32 {
    let socket = match socket_path(cli.socket) {
        Ok(path) => path,
        Err(e) => {
            eprintln!("{e}");
            return 2;
        }
    };

    match cli.command {
        Command::Notify { text } => notify(&socket, &text).await,
    }
}

async fn notify(socket: &PathBuf, text: &str) -> i32 {
    let mut conn = match UnixStream::connect(socket).await {
        Ok(conn) => conn,
        Err(e) => {
            eprintln!("connect {}: {e}", socket.display());
            return 2;
        }
    };

    let request = serde_json::json!({
        "version": 1,
        "action": "notify",
        "payload": {"text": text, "source": "openslackctl"}
    });
    let body = match serde_json::to_vec(&request) {
        Ok(body) => body,
        Err(e) => {
            eprintln!("encode request: {e}");
            return 1;
        }
    };

    if let Err(e) = send_and_close(&mut conn, &body).await {
        eprintln!("write {}: {e}", socket.display());
        return 2;
    }

    let mut raw = Vec::new();
    if let Err(e) = conn.read_to_end(&mut raw).await {
        eprintln!("read {}: {e}", socket.display());
        return 2;
    }

    let resp: IpcResponse = match serde_json::from_slice(&raw) {
        Ok(resp) => resp,
        Err(e) => {
            eprintln!("invalid response: {e}");
            return 2;
        }
    };

    println!("{}", String::from_utf8_lossy(&raw));
    if resp.ok {
        0
    } else {
        1
    }
}

async fn send_and_close(conn: &mut UnixStream, body: &[u8]) -> std::io::Result<()> {
    conn.write_all(body).await?;
    conn.shutdown().await
}

fn socket_path(flag: Option<PathBuf>) -> Result<PathBuf, String> {
    if let Some(path) = flag {
        return Ok(path);
    }
    let home = std::env::var("HOME").map_err(|_| "HOME is not set".to_string())?;
    Ok(PathBuf::from(home).join(".openslack").join("openslack.sock"))
}
