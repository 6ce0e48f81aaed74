//! Persistence for conversation threads and their messages.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::error::Result;
use crate::message::{Message, Role};
use crate::provider::ProviderId;

pub mod sqlite;

pub use sqlite::SqliteStore;

pub type ThreadId = i64;
pub type MessageId = i64;

/// A persisted conversation bound to one provider/model pair
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Thread {
    pub id: ThreadId,
    pub provider: String,
    pub model: String,
    pub name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Thread {
    /// The registered provider, if the stored name is still known
    pub fn provider_id(&self) -> Option<ProviderId> {
        self.provider.parse().ok()
    }
}

/// One persisted turn
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredMessage {
    pub id: MessageId,
    pub thread_id: ThreadId,
    pub role: Role,
    pub content: String,
    pub meta: Option<Value>,
    pub created_at: DateTime<Utc>,
}

impl From<&StoredMessage> for Message {
    fn from(stored: &StoredMessage) -> Self {
        Message::new(stored.role, stored.content.clone())
    }
}

/// Thread/message store consumed by the orchestrator
///
/// The orchestrator only reads and appends; it never deletes.
pub trait Store {
    fn create_thread(&self, provider: ProviderId, model: &str, name: Option<&str>)
    -> Result<ThreadId>;

    fn get_thread(&self, id: ThreadId) -> Result<Option<Thread>>;

    /// Most recently updated thread for `provider`, narrowed to `model` when given
    fn get_latest_thread(&self, provider: ProviderId, model: Option<&str>)
    -> Result<Option<Thread>>;

    /// Most recently updated threads across all providers
    fn get_recent_threads(&self, limit: usize) -> Result<Vec<Thread>>;

    /// The last `limit` messages of a thread, oldest first
    fn get_thread_messages(&self, thread_id: ThreadId, limit: usize) -> Result<Vec<StoredMessage>>;

    /// Appends a message and bumps the thread's `updated_at`
    fn add_message(
        &self,
        thread_id: ThreadId,
        role: Role,
        content: &str,
        meta: Option<&Value>,
    ) -> Result<MessageId>;
}
