use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{patch, post};
use axum::Json;
use axum::Router;
use chrono::Utc;
use serde::Deserialize;
use tracing::info;

use crate::error::AppError;
use crate::geo::Coordinate;
use crate::models::driver::{Driver, DriverStatus};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/drivers", post(create_driver).get(list_drivers))
        .route("/drivers/:id/status", patch(update_driver_status))
        .route("/drivers/:id/location", patch(update_driver_location))
}

#[derive(Deserialize)]
pub struct CreateDriverRequest {
    pub name: String,
    pub location: Option<Coordinate>,
}

#[derive(Deserialize)]
pub struct UpdateStatusRequest {
    pub status: DriverStatus,
}

#[derive(Deserialize)]
pub struct UpdateLocationRequest {
    pub location: Coordinate,
}

async fn create_driver(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateDriverRequest>,
) -> Result<(StatusCode, Json<Driver>), AppError> {
    if payload.name.trim().is_empty() {
        return Err(AppError::InvalidInput("name cannot be empty".to_string()));
    }
    if payload.location.is_some_and(|location| !location.is_valid()) {
        return Err(AppError::InvalidInput(
            "location coordinates out of range".to_string(),
        ));
    }

    let driver = state.store.drivers.create(Driver {
        id: 0,
        name: payload.name,
        location: payload.location,
        status: DriverStatus::Available,
        updated_at: Utc::now(),
    })?;

    info!(driver_id = driver.id, "driver registered");
    Ok((StatusCode::CREATED, Json(driver)))
}

async fn list_drivers(State(state): State<Arc<AppState>>) -> Result<Json<Vec<Driver>>, AppError> {
    Ok(Json(state.store.drivers.list(&|_: &Driver| true)?))
}

async fn update_driver_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
    Json(payload): Json<UpdateStatusRequest>,
) -> Result<Json<Driver>, AppError> {
    let mut driver = state.store.drivers.get(id)?;

    driver.status = payload.status;
    driver.updated_at = Utc::now();
    state.store.drivers.update(driver.clone())?;

    Ok(Json(driver))
}

async fn update_driver_location(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
    Json(payload): Json<UpdateLocationRequest>,
) -> Result<Json<Driver>, AppError> {
    if !payload.location.is_valid() {
        return Err(AppError::InvalidInput(
            "location coordinates out of range".to_string(),
        ));
    }

    let mut driver = state.store.drivers.get(id)?;

    driver.location = Some(payload.location);
    driver.updated_at = Utc::now();
    state.store.drivers.update(driver.clone())?;

    Ok(Json(driver))
}
