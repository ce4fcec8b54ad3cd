//! Secret resolution for the daemon. Secrets are named the way the ops
//! runbook refers to them and resolved from `OPENSLACK_*` environment
//! variables (a `.env` file is honored via the `--env` flag).

use anyhow::{bail, Result};

pub const TELEGRAM_BOT_TOKEN: &str = "telegram-bot-token";
pub const TELEGRAM_CHAT_ID: &str = "telegram-chat-id";
pub const TOTP_SECRET: &str = "totp-secret";

/// Resolves a named secret. Missing or empty values are errors; callers
/// that treat a secret as optional handle the error themselves.
pub fn get(name: &str) -> Result<String> {
    let var = env_name(name);
    match std::env::var(&var) {
        Ok(value) if !value.trim().is_empty() => Ok(value.trim().to_string()),
        _ => bail!("secret {name:?} not set (export {var})"),
    }
}

fn env_name(name: &str) -> String {
    format!("OPENSLACK_{}", name.to_uppercase().replace('-', "_"))
}
