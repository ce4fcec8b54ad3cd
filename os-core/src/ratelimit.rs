use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

const MAX_FAILURES: usize = 5;
const FAILURE_WINDOW_MINS: i64 = 15;
const LOCKOUT_MINS: i64 = 15;

type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("rate limited — try again in {remaining_secs}s")]
pub struct LockoutError {
    pub remaining_secs: i64,
}

#[derive(Default)]
struct Record {
    failures: Vec<DateTime<Utc>>,
    locked_at: Option<DateTime<Utc>>,
}

/// Tracks authentication failures per chat and locks out chats that exceed
/// the failure threshold within the window.
pub struct RateLimiter {
    records: Mutex<HashMap<i64, Record>>,
    now: Clock,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(Utc::now))
    }

    fn with_clock(now: Clock) -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            now,
        }
    }

    /// Fails while the chat is inside its lockout window. An expired lockout
    /// clears the chat's state.
    pub fn check(&self, chat_id: i64) -> Result<(), LockoutError> {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(record) = records.get(&chat_id) else {
            return Ok(());
        };

        if let Some(locked_at) = record.locked_at {
            let elapsed = (self.now)().signed_duration_since(locked_at);
            let lockout = Duration::minutes(LOCKOUT_MINS);
            if elapsed < lockout {
                return Err(LockoutError {
                    remaining_secs: (lockout - elapsed).num_seconds(),
                });
            }
            records.remove(&chat_id);
        }
        Ok(())
    }

    /// Records an authentication failure. Reaching the threshold within the
    /// window locks the chat out.
    pub fn record_failure(&self, chat_id: i64) {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        let now = (self.now)();
        let record = records.entry(chat_id).or_default();

        let cutoff = now - Duration::minutes(FAILURE_WINDOW_MINS);
        record.failures.retain(|t| *t > cutoff);
        record.failures.push(now);

        if record.failures.len() >= MAX_FAILURES {
            record.locked_at = Some(now);
        }
    }

    /// Clears all failure state for a chat (called on successful auth).
    pub fn reset(&self, chat_id: i64) {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        records.remove(&chat_id);
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}
