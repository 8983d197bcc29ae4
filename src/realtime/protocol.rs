//! Payloads pushed to duplex connections.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// A single outbound frame, queued per connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
}

impl Frame {
    pub fn event(event: &ServerEvent) -> Result<Self, serde_json::Error> {
        serde_json::to_string(event).map(Frame::Text)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Pushed to a driver's dispatch room when a booking is matched to them.
    NewBooking {
        #[serde(rename = "bookingId")]
        booking_id: u64,
    },

    /// Pushed to the opposite chat role after a message is edited.
    UpdateMessage {
        message_id: u64,
        content: String,
        timestamp: DateTime<Utc>,
    },
}
