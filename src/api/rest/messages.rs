use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, patch, post};
use axum::Json;
use axum::Router;
use serde::Deserialize;

use crate::error::AppError;
use crate::models::message::{ChatMessage, ChatRole};
use crate::realtime::chat::EditOutcome;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/messages", post(send_message))
        .route("/messages/:id", patch(edit_message).delete(delete_message))
        .route("/bookings/:id/messages", get(list_messages))
}

#[derive(Deserialize)]
pub struct SendMessageRequest {
    pub booking_id: u64,
    pub sender_role: ChatRole,
    pub content: String,
}

#[derive(Deserialize)]
pub struct EditMessageRequest {
    pub content: String,
}

async fn send_message(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<SendMessageRequest>,
) -> Result<(StatusCode, Json<ChatMessage>), AppError> {
    let message = state
        .chat
        .send(payload.booking_id, payload.sender_role, payload.content)?;
    Ok((StatusCode::CREATED, Json(message)))
}

async fn edit_message(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
    Json(payload): Json<EditMessageRequest>,
) -> Result<Json<EditOutcome>, AppError> {
    Ok(Json(state.chat.edit_message(id, payload.content)?))
}

async fn delete_message(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> Result<Json<ChatMessage>, AppError> {
    Ok(Json(state.chat.delete_message(id)?))
}

async fn list_messages(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> Result<Json<Vec<ChatMessage>>, AppError> {
    state.store.bookings.get(id)?;
    Ok(Json(state.chat.messages(id)?))
}
