use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info};

use crate::error::AppError;
use crate::models::message::{ChatMessage, ChatRole};
use crate::observability::metrics::Metrics;
use crate::realtime::protocol::{Frame, ServerEvent};
use crate::realtime::registry::{BroadcastReport, ConnectionRegistry, MemberRole, RoomKey};
use crate::store::Store;

#[derive(Debug, Clone, Serialize)]
pub struct EditOutcome {
    pub message: ChatMessage,
    /// `false` when the new content matched the stored one and nothing ran.
    pub changed: bool,
    pub delivered: usize,
}

/// Passenger/driver chat over the registry, one room per booking.
pub struct ChatRelay {
    store: Store,
    registry: Arc<ConnectionRegistry>,
    metrics: Metrics,
}

impl ChatRelay {
    pub fn new(store: Store, registry: Arc<ConnectionRegistry>, metrics: Metrics) -> Self {
        Self {
            store,
            registry,
            metrics,
        }
    }

    /// Stores the message, then relays its content verbatim to the other role.
    pub fn send(
        &self,
        booking_id: u64,
        sender_role: ChatRole,
        content: String,
    ) -> Result<ChatMessage, AppError> {
        if content.trim().is_empty() {
            return Err(AppError::InvalidInput("content cannot be empty".to_string()));
        }
        self.store.bookings.get(booking_id)?;

        let now = Utc::now();
        let message = self.store.messages.create(ChatMessage {
            id: 0,
            booking_id,
            sender_role,
            content,
            send_time: now,
            updated_at: now,
        })?;

        let report = self.relay(booking_id, sender_role, &Frame::Text(message.content.clone()));
        self.metrics
            .chat_messages_total
            .with_label_values(&["sent"])
            .inc();
        debug!(
            booking_id,
            message_id = message.id,
            ?sender_role,
            delivered = report.delivered,
            "chat message sent"
        );

        Ok(message)
    }

    /// Handles one frame read from a chat connection. Non-blank text goes
    /// through `send`; blank text and binary frames are relayed verbatim and
    /// not stored.
    pub fn forward(
        &self,
        booking_id: u64,
        sender_role: ChatRole,
        frame: Frame,
    ) -> Result<(), AppError> {
        match frame {
            Frame::Text(text) if !text.trim().is_empty() => {
                self.send(booking_id, sender_role, text)?;
            }
            frame => {
                let report = self.relay(booking_id, sender_role, &frame);
                debug!(
                    booking_id,
                    ?sender_role,
                    delivered = report.delivered,
                    "relayed unstored chat frame"
                );
            }
        }
        Ok(())
    }

    /// Queues `frame` for every member of the booking's room holding the role
    /// opposite to `sender_role`.
    pub fn relay(&self, booking_id: u64, sender_role: ChatRole, frame: &Frame) -> BroadcastReport {
        let recipient = MemberRole::from(sender_role.opposite());
        let report = self
            .registry
            .broadcast(&RoomKey::Chat(booking_id), frame, |role| role == recipient);

        if report.evicted > 0 {
            self.metrics
                .broadcast_evictions_total
                .inc_by(report.evicted as u64);
        }
        report
    }

    /// Identical content is a no-op: no write and no broadcast.
    pub fn edit_message(
        &self,
        message_id: u64,
        new_content: String,
    ) -> Result<EditOutcome, AppError> {
        let mut message = self.store.messages.get(message_id)?;

        if message.content == new_content {
            debug!(message_id, "edit carries unchanged content; skipping");
            return Ok(EditOutcome {
                message,
                changed: false,
                delivered: 0,
            });
        }
        if new_content.trim().is_empty() {
            return Err(AppError::InvalidInput("content cannot be empty".to_string()));
        }

        message.content = new_content;
        message.updated_at = Utc::now();
        self.store.messages.update(message.clone())?;

        let frame = Frame::event(&ServerEvent::UpdateMessage {
            message_id: message.id,
            content: message.content.clone(),
            timestamp: message.updated_at,
        })
        .map_err(|err| AppError::Internal(format!("failed to serialize update: {err}")))?;

        let report = self.relay(message.booking_id, message.sender_role, &frame);
        self.metrics
            .chat_messages_total
            .with_label_values(&["edited"])
            .inc();
        info!(
            message_id,
            booking_id = message.booking_id,
            delivered = report.delivered,
            "chat message edited"
        );

        Ok(EditOutcome {
            message,
            changed: true,
            delivered: report.delivered,
        })
    }

    /// Messages for the booking ordered by send time.
    pub fn messages(&self, booking_id: u64) -> Result<Vec<ChatMessage>, AppError> {
        let mut messages = self
            .store
            .messages
            .list(&|message: &ChatMessage| message.booking_id == booking_id)?;
        messages.sort_by_key(|message| message.send_time);
        Ok(messages)
    }

    pub fn delete_message(&self, message_id: u64) -> Result<ChatMessage, AppError> {
        let message = self.store.messages.get(message_id)?;
        self.store.messages.delete(message_id)?;
        info!(message_id, booking_id = message.booking_id, "chat message deleted");
        Ok(message)
    }
}
