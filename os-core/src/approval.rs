use chrono::{DateTime, Duration, Utc};
use data_encoding::HEXLOWER;
use rand::RngCore;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

const NONCE_BYTES: usize = 8;
const EXPIRY_SECS: i64 = 2 * 60;
const MAX_PENDING: usize = 100;

type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ApprovalError {
    #[error("unknown or expired approval nonce")]
    UnknownOrExpired,
    #[error("approval nonce belongs to a different chat")]
    WrongChat,
    #[error("too many pending approvals")]
    Capacity,
}

struct Pending {
    chat_id: i64,
    op_name: String,
    args: String,
    created_at: DateTime<Utc>,
}

/// Holds pending two-step approval requests keyed by an unpredictable nonce.
/// Entries expire after two minutes and nonces are single-use.
pub struct ApprovalStore {
    items: Mutex<HashMap<String, Pending>>,
    now: Clock,
}

impl ApprovalStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(Utc::now))
    }

    fn with_clock(now: Clock) -> Self {
        Self {
            items: Mutex::new(HashMap::new()),
            now,
        }
    }

    /// Registers a pending operation and returns its nonce. Fails if the
    /// store is at capacity after expired entries are pruned.
    pub fn create(&self, chat_id: i64, op_name: &str, args: &str) -> Result<String, ApprovalError> {
        let mut items = self.items.lock().unwrap_or_else(PoisonError::into_inner);
        let now = (self.now)();
        prune(&mut items, now);

        if items.len() >= MAX_PENDING {
            return Err(ApprovalError::Capacity);
        }

        let nonce = generate_nonce();
        items.insert(
            nonce.clone(),
            Pending {
                chat_id,
                op_name: op_name.to_string(),
                args: args.to_string(),
                created_at: now,
            },
        );
        Ok(nonce)
    }

    /// Validates and removes a pending approval, returning its op name and
    /// args. A chat mismatch leaves the entry in place.
    pub fn consume(&self, nonce: &str, chat_id: i64) -> Result<(String, String), ApprovalError> {
        let mut items = self.items.lock().unwrap_or_else(PoisonError::into_inner);
        prune(&mut items, (self.now)());

        let Some(pending) = items.get(nonce) else {
            return Err(ApprovalError::UnknownOrExpired);
        };
        if pending.chat_id != chat_id {
            return Err(ApprovalError::WrongChat);
        }

        let pending = items.remove(nonce).ok_or(ApprovalError::UnknownOrExpired)?;
        Ok((pending.op_name, pending.args))
    }
}

impl Default for ApprovalStore {
    fn default() -> Self {
        Self::new()
    }
}

fn prune(items: &mut HashMap<String, Pending>, now: DateTime<Utc>) {
    let expiry = Duration::seconds(EXPIRY_SECS);
    items.retain(|_, p| now.signed_duration_since(p.created_at) <= expiry);
}

fn generate_nonce() -> String {
    let mut bytes = [0u8; NONCE_BYTES];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    HEXLOWER.encode(&bytes)
}
