use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::{SinkExt, Stream, StreamExt};
use ride_dispatch::api::rest::router;
use ride_dispatch::config::ConnectionSettings;
use ride_dispatch::engine::dispatch::NewBooking;
use ride_dispatch::geo::Coordinate;
use ride_dispatch::models::driver::{Driver, DriverStatus};
use ride_dispatch::realtime::registry::RoomKey;
use ride_dispatch::state::AppState;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

async fn spawn_server() -> (SocketAddr, Arc<AppState>) {
    let state = Arc::new(AppState::new(ConnectionSettings::default()));
    let app = router(state.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (addr, state)
}

fn add_driver(state: &AppState, latitude: f64, longitude: f64) -> u64 {
    state
        .store
        .drivers
        .create(Driver {
            id: 0,
            name: "driver".to_string(),
            location: Some(Coordinate::new(latitude, longitude)),
            status: DriverStatus::Available,
            updated_at: Utc::now(),
        })
        .unwrap()
        .id
}

/// Polls until `check` holds; connection setup and teardown finish
/// asynchronously on the server side.
async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..100 {
        if check() {
            return;
        }
        sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not reached in time");
}

async fn next_text<S>(socket: &mut S) -> String
where
    S: Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    loop {
        let message = timeout(Duration::from_secs(2), socket.next())
            .await
            .expect("timed out waiting for frame")
            .expect("socket closed")
            .unwrap();
        if let Message::Text(text) = message {
            return text;
        }
    }
}

#[tokio::test]
async fn driver_socket_receives_new_booking() {
    let (addr, state) = spawn_server().await;
    let driver_id = add_driver(&state, 13.757, 100.502);

    let (mut socket, _) = connect_async(format!("ws://{addr}/ws/drivers/{driver_id}"))
        .await
        .unwrap();
    eventually(|| state.registry.member_count(&RoomKey::Dispatch(driver_id)) == 1).await;

    let view = state
        .dispatcher
        .create(NewBooking {
            passenger_id: Some(7),
            pickup: Some(Coordinate::new(13.7563, 100.5018)),
            ..Default::default()
        })
        .unwrap();

    let event: Value = serde_json::from_str(&next_text(&mut socket).await).unwrap();
    assert_eq!(
        event,
        json!({ "type": "new_booking", "bookingId": view.booking.id })
    );
}

#[tokio::test]
async fn unknown_driver_is_refused() {
    let (addr, _state) = spawn_server().await;

    let result = connect_async(format!("ws://{addr}/ws/drivers/404")).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn chat_relays_between_roles_and_persists_non_blank_text() {
    let (addr, state) = spawn_server().await;
    add_driver(&state, 13.757, 100.502);
    let booking_id = state
        .dispatcher
        .create(NewBooking {
            passenger_id: Some(7),
            pickup: Some(Coordinate::new(13.7563, 100.5018)),
            ..Default::default()
        })
        .unwrap()
        .booking
        .id;

    let (mut passenger, _) = connect_async(format!("ws://{addr}/ws/chat/{booking_id}/passenger"))
        .await
        .unwrap();
    let (mut driver, _) = connect_async(format!("ws://{addr}/ws/chat/{booking_id}/driver"))
        .await
        .unwrap();
    eventually(|| state.registry.member_count(&RoomKey::Chat(booking_id)) == 2).await;

    passenger.send(Message::Text("   ".to_string())).await.unwrap();
    assert_eq!(next_text(&mut driver).await, "   ");

    passenger
        .send(Message::Text("at the north entrance".to_string()))
        .await
        .unwrap();
    assert_eq!(next_text(&mut driver).await, "at the north entrance");

    driver
        .send(Message::Text("two minutes away".to_string()))
        .await
        .unwrap();
    assert_eq!(next_text(&mut passenger).await, "two minutes away");

    eventually(|| state.chat.messages(booking_id).unwrap().len() == 2).await;
    let stored = state.chat.messages(booking_id).unwrap();
    assert_eq!(stored[0].content, "at the north entrance");
    assert_eq!(stored[1].content, "two minutes away");
}

#[tokio::test]
async fn disconnect_removes_empty_room() {
    let (addr, state) = spawn_server().await;
    let driver_id = add_driver(&state, 13.757, 100.502);
    let room = RoomKey::Dispatch(driver_id);

    let (mut socket, _) = connect_async(format!("ws://{addr}/ws/drivers/{driver_id}"))
        .await
        .unwrap();
    eventually(|| state.registry.exists(&room)).await;

    socket.close(None).await.unwrap();

    eventually(|| !state.registry.exists(&room)).await;
    assert_eq!(state.registry.connection_count(), 0);
}
