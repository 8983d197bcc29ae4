use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    Passenger,
    Driver,
}

impl ChatRole {
    pub fn opposite(self) -> Self {
        match self {
            ChatRole::Passenger => ChatRole::Driver,
            ChatRole::Driver => ChatRole::Passenger,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: u64,
    pub booking_id: u64,
    pub sender_role: ChatRole,
    pub content: String,
    pub send_time: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
