use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An event pushed on a student's realtime channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StudentEvent {
    /// Something the student should read.
    Notification(Notification),
    /// Grants, payments or the cohort changed; the client must refetch
    /// modules. `module_id` is unset when every module may be affected.
    EntitlementsChanged { module_id: Option<Uuid> },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub title: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn new(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            message: message.into(),
            created_at: Utc::now(),
        }
    }
}
