use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A message received from the chat platform.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub update_id: i64,
    pub chat_id: i64,
    pub user_id: i64,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

/// An outbound notification to be delivered to a chat channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    #[serde(default)]
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub source: String,
    pub created_at: DateTime<Utc>,
}
