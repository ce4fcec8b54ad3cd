use chrono::{DateTime, Utc};
use std::collections::{HashSet, VecDeque};
use std::sync::{Mutex, PoisonError};
use thiserror::Error;

const FRESHNESS_WINDOW_SECS: i64 = 5 * 60;
const MAX_SEEN_IDS: usize = 10_000;
const PRUNE_COUNT: usize = 1_000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PolicyError {
    #[error("unauthorized chat: {0}")]
    Unauthorized(i64),
    #[error("stale message: {0}s old")]
    Stale(i64),
    #[error("duplicate update: {0}")]
    Duplicate(i64),
}

/// Authorizes inbound messages against a chat allowlist, a freshness window,
/// and update-id deduplication.
pub struct Policy {
    allowed: HashSet<i64>,
    state: Mutex<SeenState>,
}

struct SeenState {
    seen: HashSet<i64>,
    order: VecDeque<i64>,
}

impl Policy {
    /// Creates a Policy that authorizes only the given chat IDs.
    pub fn new(chat_ids: &[i64]) -> Self {
        Self {
            allowed: chat_ids.iter().copied().collect(),
            state: Mutex::new(SeenState {
                seen: HashSet::new(),
                order: VecDeque::new(),
            }),
        }
    }

    /// Checks whether a message should be processed. On success the update id
    /// is recorded for deduplication.
    pub fn authorize(
        &self,
        chat_id: i64,
        update_id: i64,
        timestamp: DateTime<Utc>,
    ) -> Result<(), PolicyError> {
        if !self.allowed.contains(&chat_id) {
            return Err(PolicyError::Unauthorized(chat_id));
        }

        let age_secs = Utc::now().signed_duration_since(timestamp).num_seconds();
        if age_secs > FRESHNESS_WINDOW_SECS {
            return Err(PolicyError::Stale(age_secs));
        }

        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        if state.seen.contains(&update_id) {
            return Err(PolicyError::Duplicate(update_id));
        }

        // Evict the oldest ids once the window is full.
        if state.seen.len() >= MAX_SEEN_IDS {
            for _ in 0..PRUNE_COUNT {
                let Some(old) = state.order.pop_front() else {
                    break;
                };
                state.seen.remove(&old);
            }
        }

        state.seen.insert(update_id);
        state.order.push_back(update_id);
        Ok(())
    }
}
