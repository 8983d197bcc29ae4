use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, patch, post};
use axum::Json;
use axum::Router;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::engine::dispatch::{BookingFilter, BookingView, NewBooking};
use crate::error::AppError;
use crate::models::booking::{Booking, BookingStatus, BookingStatusRecord};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/bookings", post(create_booking).get(list_bookings))
        .route("/bookings/:id", get(get_booking).delete(delete_booking))
        .route(
            "/bookings/:id/status",
            get(get_booking_status).patch(set_booking_status),
        )
        .route("/bookings/:id/time", patch(update_booking_time))
        .route("/bookings/:id/history", get(get_booking_history))
        .route("/bookings/:id/accept", post(accept_booking))
        .route("/bookings/:id/reject", post(reject_booking))
        .route("/bookings/:id/complete", post(complete_booking))
}

#[derive(Deserialize)]
pub struct ListBookingsQuery {
    pub status: Option<BookingStatus>,
    pub prebooking: Option<bool>,
}

#[derive(Deserialize)]
pub struct SetStatusRequest {
    pub status: BookingStatus,
}

#[derive(Deserialize)]
pub struct BookingTimeRequest {
    /// RFC 3339 timestamp; missing or blank is refused.
    pub booking_time: Option<String>,
}

async fn create_booking(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<NewBooking>,
) -> Result<(StatusCode, Json<BookingView>), AppError> {
    let view = state.dispatcher.create(payload)?;
    Ok((StatusCode::CREATED, Json(view)))
}

async fn list_bookings(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListBookingsQuery>,
) -> Result<Json<Vec<BookingView>>, AppError> {
    let views = state.dispatcher.bookings(BookingFilter {
        status: query.status,
        prebooking: query.prebooking,
    })?;
    Ok(Json(views))
}

async fn get_booking(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> Result<Json<BookingView>, AppError> {
    Ok(Json(state.dispatcher.booking(id)?))
}

async fn delete_booking(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> Result<Json<Booking>, AppError> {
    Ok(Json(state.dispatcher.delete(id)?))
}

async fn get_booking_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> Result<Json<BookingStatusRecord>, AppError> {
    state.store.bookings.get(id)?;
    Ok(Json(state.dispatcher.current_status(id)?))
}

async fn get_booking_history(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> Result<Json<Vec<BookingStatusRecord>>, AppError> {
    state.store.bookings.get(id)?;
    Ok(Json(state.dispatcher.history(id)?))
}

async fn set_booking_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
    Json(payload): Json<SetStatusRequest>,
) -> Result<Json<BookingView>, AppError> {
    let view = state.dispatcher.set_status(id, payload.status)?;
    if payload.status == BookingStatus::Paid {
        return matched(view);
    }
    Ok(Json(view))
}

async fn update_booking_time(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
    Json(payload): Json<BookingTimeRequest>,
) -> Result<Json<BookingView>, AppError> {
    let booking_time = payload
        .booking_time
        .as_deref()
        .map(str::trim)
        .filter(|raw| !raw.is_empty())
        .map(|raw| {
            DateTime::parse_from_rfc3339(raw)
                .map(|time| time.with_timezone(&Utc))
                .map_err(|err| AppError::InvalidInput(format!("invalid booking_time: {err}")))
        })
        .transpose()?;

    Ok(Json(state.dispatcher.reschedule(id, booking_time)?))
}

async fn accept_booking(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> Result<Json<BookingView>, AppError> {
    Ok(Json(state.dispatcher.accept(id)?))
}

async fn reject_booking(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> Result<Json<BookingView>, AppError> {
    matched(state.dispatcher.reject(id)?)
}

async fn complete_booking(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> Result<Json<BookingView>, AppError> {
    Ok(Json(state.dispatcher.complete(id)?))
}

/// The booking is already persisted as `NoDriverAvailable`; the caller still
/// gets an explicit failure for the exhausted roster.
fn matched(view: BookingView) -> Result<Json<BookingView>, AppError> {
    if view.status == BookingStatus::NoDriverAvailable {
        return Err(AppError::NoDriverAvailable {
            booking_id: view.booking.id,
        });
    }
    Ok(Json(view))
}
