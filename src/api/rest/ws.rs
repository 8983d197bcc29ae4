use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use futures::SinkExt;
use futures::StreamExt;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::error::AppError;
use crate::models::message::ChatRole;
use crate::realtime::protocol::Frame;
use crate::realtime::registry::{ConnectionHandle, MemberRole, RoomKey};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/ws/drivers/:driver_id", get(driver_dispatch_ws))
        .route("/ws/chat/:booking_id/passenger", get(passenger_chat_ws))
        .route("/ws/chat/:booking_id/driver", get(driver_chat_ws))
}

/// What the server does with frames read from a connection.
#[derive(Debug, Clone, Copy)]
enum Inbound {
    /// Dispatch rooms are push-only; reads only keep the socket alive.
    Discard,
    Chat { booking_id: u64, role: ChatRole },
}

async fn driver_dispatch_ws(
    ws: WebSocketUpgrade,
    Path(driver_id): Path<u64>,
    State(state): State<Arc<AppState>>,
) -> Result<Response, AppError> {
    state.store.drivers.get(driver_id)?;

    Ok(ws.on_upgrade(move |socket| {
        serve_connection(
            socket,
            state,
            RoomKey::Dispatch(driver_id),
            MemberRole::Subscriber,
            Inbound::Discard,
        )
    }))
}

async fn passenger_chat_ws(
    ws: WebSocketUpgrade,
    Path(booking_id): Path<u64>,
    State(state): State<Arc<AppState>>,
) -> Result<Response, AppError> {
    chat_upgrade(ws, booking_id, ChatRole::Passenger, state)
}

async fn driver_chat_ws(
    ws: WebSocketUpgrade,
    Path(booking_id): Path<u64>,
    State(state): State<Arc<AppState>>,
) -> Result<Response, AppError> {
    chat_upgrade(ws, booking_id, ChatRole::Driver, state)
}

fn chat_upgrade(
    ws: WebSocketUpgrade,
    booking_id: u64,
    role: ChatRole,
    state: Arc<AppState>,
) -> Result<Response, AppError> {
    state.store.bookings.get(booking_id)?;

    Ok(ws.on_upgrade(move |socket| {
        serve_connection(
            socket,
            state,
            RoomKey::Chat(booking_id),
            MemberRole::from(role),
            Inbound::Chat { booking_id, role },
        )
    }))
}

/// Runs one connection until either side stops, then deregisters it from
/// every room before returning.
async fn serve_connection(
    socket: WebSocket,
    state: Arc<AppState>,
    room: RoomKey,
    role: MemberRole,
    inbound: Inbound,
) {
    let (mut sink, mut stream) = socket.split();
    let (handle, mut outbound) = ConnectionHandle::channel(state.connections.outbound_buffer);
    let connection_id = handle.id();

    state.registry.join(room.clone(), &handle, role);
    // From here the registry owns the only senders for `outbound`.
    drop(handle);
    state.metrics.ws_connections.inc();
    info!(room = %room, connection_id = %connection_id, ?role, "connection opened");

    let send_timeout = state.connections.send_timeout;
    let mut send_task = tokio::spawn(async move {
        while let Some(frame) = outbound.recv().await {
            match timeout(send_timeout, sink.send(into_message(frame))).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    debug!(connection_id = %connection_id, error = %err, "socket write failed");
                    break;
                }
                Err(_) => {
                    warn!(connection_id = %connection_id, "socket write timed out");
                    break;
                }
            }
        }
    });

    let reader_state = state.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(result) = stream.next().await {
            let message = match result {
                Ok(message) => message,
                Err(err) => {
                    debug!(connection_id = %connection_id, error = %err, "socket read failed");
                    break;
                }
            };

            match message {
                Message::Text(text) => handle_inbound(&reader_state, inbound, Frame::Text(text)),
                Message::Binary(bytes) => {
                    handle_inbound(&reader_state, inbound, Frame::Binary(bytes))
                }
                Message::Close(_) => break,
                Message::Ping(_) | Message::Pong(_) => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    let rooms = state.registry.leave_all(connection_id);
    state.metrics.ws_connections.dec();
    info!(room = %room, connection_id = %connection_id, rooms, "connection closed");
}

fn handle_inbound(state: &AppState, inbound: Inbound, frame: Frame) {
    let Inbound::Chat { booking_id, role } = inbound else {
        return;
    };

    if let Err(err) = state.chat.forward(booking_id, role, frame) {
        warn!(booking_id, ?role, error = %err, "dropping chat frame");
    }
}

fn into_message(frame: Frame) -> Message {
    match frame {
        Frame::Text(text) => Message::Text(text),
        Frame::Binary(bytes) => Message::Binary(bytes),
    }
}
