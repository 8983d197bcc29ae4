//! Booking lifecycle and nearest-driver matching.
//!
//! ```text
//! Created ─▶ (match) ─▶ WaitingAcceptance ─▶ Accepted ─▶ Completed
//!    │                     ▲        │
//!    │ paid (unassigned)   │        ▼
//!    └──────▶ (match) ─────┘     Rejected ─▶ (match, excluding rejecters)
//!                                   │
//!                                   ▼
//!                           NoDriverAvailable
//! ```
//!
//! The status history is the source of truth: every transition appends a
//! record and the newest one decides what is legal next. Writes always land
//! in the store before the driver is notified.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::engine::locator::DriverLocator;
use crate::error::AppError;
use crate::geo::Coordinate;
use crate::models::booking::{Booking, BookingStatus, BookingStatusRecord};
use crate::models::driver::{Driver, DriverStatus};
use crate::models::message::ChatMessage;
use crate::observability::metrics::Metrics;
use crate::realtime::protocol::{Frame, ServerEvent};
use crate::realtime::registry::{ConnectionRegistry, RoomKey};
use crate::store::Store;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewBooking {
    pub passenger_id: Option<u64>,
    pub pickup: Option<Coordinate>,
    pub destination: Option<Coordinate>,
    /// Defer matching until the booking is marked paid.
    #[serde(default)]
    pub prebooking: bool,
    pub booking_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BookingView {
    #[serde(flatten)]
    pub booking: Booking,
    pub status: BookingStatus,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BookingFilter {
    pub status: Option<BookingStatus>,
    pub prebooking: Option<bool>,
}

pub struct Dispatcher {
    store: Store,
    registry: Arc<ConnectionRegistry>,
    locator: Arc<dyn DriverLocator>,
    metrics: Metrics,
    // Serialises read-status-then-write sequences across bookings.
    transitions: Mutex<()>,
}

impl Dispatcher {
    pub fn new(
        store: Store,
        registry: Arc<ConnectionRegistry>,
        locator: Arc<dyn DriverLocator>,
        metrics: Metrics,
    ) -> Self {
        Self {
            store,
            registry,
            locator,
            metrics,
            transitions: Mutex::new(()),
        }
    }

    pub fn create(&self, request: NewBooking) -> Result<BookingView, AppError> {
        self.timed("create", || {
            let passenger_id = request
                .passenger_id
                .filter(|id| *id != 0)
                .ok_or_else(|| AppError::InvalidInput("passenger_id is required".to_string()))?;
            let pickup = request
                .pickup
                .ok_or_else(|| AppError::InvalidInput("pickup is required".to_string()))?;
            if !pickup.is_valid() {
                return Err(AppError::InvalidInput(
                    "pickup coordinates out of range".to_string(),
                ));
            }
            if request.destination.is_some_and(|d| !d.is_valid()) {
                return Err(AppError::InvalidInput(
                    "destination coordinates out of range".to_string(),
                ));
            }

            let _guard = self.lock()?;

            let booking = self.store.bookings.create(Booking {
                id: 0,
                passenger_id,
                driver_id: None,
                pickup,
                destination: request.destination,
                prebooking: request.prebooking,
                booking_time: request.booking_time,
                created_at: Utc::now(),
            })?;
            self.record(booking.id, BookingStatus::Created, None)?;
            info!(booking_id = booking.id, passenger_id, "booking created");

            if booking.prebooking {
                return Ok(BookingView {
                    booking,
                    status: BookingStatus::Created,
                });
            }

            self.assign(booking, &HashSet::new())
        })
    }

    pub fn accept(&self, booking_id: u64) -> Result<BookingView, AppError> {
        self.timed("accept", || {
            let _guard = self.lock()?;
            let booking = self.store.bookings.get(booking_id)?;
            self.expect_status(booking_id, BookingStatus::WaitingAcceptance, "accept")?;

            self.record(booking_id, BookingStatus::Accepted, booking.driver_id)?;
            self.metrics.record_outcome("accepted");
            info!(booking_id, driver_id = ?booking.driver_id, "booking accepted");

            Ok(BookingView {
                booking,
                status: BookingStatus::Accepted,
            })
        })
    }

    /// Records the rejection and makes one re-match attempt that excludes
    /// every driver who has rejected this booking so far.
    pub fn reject(&self, booking_id: u64) -> Result<BookingView, AppError> {
        self.timed("reject", || {
            let _guard = self.lock()?;
            let booking = self.store.bookings.get(booking_id)?;
            self.expect_status(booking_id, BookingStatus::WaitingAcceptance, "reject")?;

            self.record(booking_id, BookingStatus::Rejected, booking.driver_id)?;
            self.metrics.record_outcome("rejected");
            info!(booking_id, driver_id = ?booking.driver_id, "booking rejected");

            let exclude = self.rejected_drivers(booking_id)?;
            self.assign(booking, &exclude)
        })
    }

    pub fn complete(&self, booking_id: u64) -> Result<BookingView, AppError> {
        self.timed("complete", || {
            let _guard = self.lock()?;
            let booking = self.store.bookings.get(booking_id)?;
            self.expect_status(booking_id, BookingStatus::Accepted, "complete")?;

            self.record(booking_id, BookingStatus::Completed, booking.driver_id)?;
            self.metrics.record_outcome("completed");
            info!(booking_id, "booking completed");

            Ok(BookingView {
                booking,
                status: BookingStatus::Completed,
            })
        })
    }

    /// Administrative transition, limited to `Created` and `Paid` on a booking
    /// with no driver assigned. Lifecycle states only come from `create`,
    /// `accept`, `reject` and `complete`. Marking a booking `Paid` starts
    /// matching, the second trigger point besides `create`.
    pub fn set_status(
        &self,
        booking_id: u64,
        status: BookingStatus,
    ) -> Result<BookingView, AppError> {
        self.timed("set_status", || {
            if !status.is_administrative() {
                return Err(AppError::InvalidInput(format!(
                    "status {status} can only be reached through the booking lifecycle"
                )));
            }

            let _guard = self.lock()?;
            let booking = self.store.bookings.get(booking_id)?;
            let current = self.current_status(booking_id)?;
            if current.status.is_terminal() {
                return Err(AppError::InvalidState(format!(
                    "booking {booking_id} is {} and cannot change",
                    current.status
                )));
            }
            if let Some(driver_id) = booking.driver_id {
                return Err(AppError::InvalidState(format!(
                    "booking {booking_id} already has driver {driver_id} assigned"
                )));
            }

            self.record(booking_id, status, None)?;
            info!(booking_id, from = %current.status, to = %status, "booking status set");

            if status == BookingStatus::Paid {
                let exclude = self.rejected_drivers(booking_id)?;
                return self.assign(booking, &exclude);
            }

            Ok(BookingView { booking, status })
        })
    }

    /// Moves the booking's scheduled time. Status and driver are untouched.
    pub fn reschedule(
        &self,
        booking_id: u64,
        booking_time: Option<DateTime<Utc>>,
    ) -> Result<BookingView, AppError> {
        self.timed("reschedule", || {
            let _guard = self.lock()?;
            let mut booking = self.store.bookings.get(booking_id)?;
            let booking_time = booking_time.ok_or_else(|| {
                AppError::InvalidInput("booking_time cannot be empty".to_string())
            })?;
            let status = self.current_status(booking_id)?.status;
            if status.is_terminal() {
                return Err(AppError::InvalidState(format!(
                    "booking {booking_id} is {status} and cannot be rescheduled"
                )));
            }

            booking.booking_time = Some(booking_time);
            self.store.bookings.update(booking.clone())?;
            info!(booking_id, %booking_time, "booking rescheduled");

            Ok(BookingView { booking, status })
        })
    }

    pub fn booking(&self, booking_id: u64) -> Result<BookingView, AppError> {
        let booking = self.store.bookings.get(booking_id)?;
        let status = self.current_status(booking_id)?.status;
        Ok(BookingView { booking, status })
    }

    pub fn bookings(&self, filter: BookingFilter) -> Result<Vec<BookingView>, AppError> {
        let bookings = self.store.bookings.list(&|booking: &Booking| {
            filter
                .prebooking
                .is_none_or(|prebooking| booking.prebooking == prebooking)
        })?;

        let mut views = Vec::with_capacity(bookings.len());
        for booking in bookings {
            let status = self.current_status(booking.id)?.status;
            if filter.status.is_none_or(|wanted| wanted == status) {
                views.push(BookingView { booking, status });
            }
        }
        Ok(views)
    }

    /// Removes the booking together with its status history and chat messages.
    pub fn delete(&self, booking_id: u64) -> Result<Booking, AppError> {
        let _guard = self.lock()?;
        let booking = self.store.bookings.get(booking_id)?;
        for record in self.history(booking_id)? {
            self.store.statuses.delete(record.id)?;
        }
        let messages = self
            .store
            .messages
            .list(&|message: &ChatMessage| message.booking_id == booking_id)?;
        for message in messages {
            self.store.messages.delete(message.id)?;
        }
        self.store.bookings.delete(booking_id)?;
        info!(booking_id, "booking deleted");
        Ok(booking)
    }

    pub fn current_status(&self, booking_id: u64) -> Result<BookingStatusRecord, AppError> {
        self.history(booking_id)?
            .pop()
            .ok_or_else(|| AppError::NotFound(format!("status for booking {booking_id} not found")))
    }

    /// Status records for the booking, oldest first.
    pub fn history(&self, booking_id: u64) -> Result<Vec<BookingStatusRecord>, AppError> {
        Ok(self
            .store
            .statuses
            .list(&|record: &BookingStatusRecord| record.booking_id == booking_id)?)
    }

    fn assign(
        &self,
        mut booking: Booking,
        exclude: &HashSet<u64>,
    ) -> Result<BookingView, AppError> {
        let roster = self
            .store
            .drivers
            .list(&|driver: &Driver| driver.status == DriverStatus::Available)?;

        let Some(nearest) = self.locator.find_nearest(&booking.pickup, &roster, exclude) else {
            warn!(
                booking_id = booking.id,
                candidates = roster.len(),
                excluded = exclude.len(),
                "no driver available"
            );
            if booking.driver_id.take().is_some() {
                self.store.bookings.update(booking.clone())?;
            }
            self.record(booking.id, BookingStatus::NoDriverAvailable, None)?;
            self.metrics.record_outcome("no_driver_available");

            return Ok(BookingView {
                booking,
                status: BookingStatus::NoDriverAvailable,
            });
        };

        info!(
            booking_id = booking.id,
            driver_id = nearest.driver_id,
            distance_km = nearest.distance_km,
            "driver matched"
        );

        booking.driver_id = Some(nearest.driver_id);
        self.store.bookings.update(booking.clone())?;
        self.record(
            booking.id,
            BookingStatus::WaitingAcceptance,
            Some(nearest.driver_id),
        )?;
        self.metrics.record_outcome("matched");

        self.notify_driver(nearest.driver_id, booking.id);

        Ok(BookingView {
            booking,
            status: BookingStatus::WaitingAcceptance,
        })
    }

    fn notify_driver(&self, driver_id: u64, booking_id: u64) {
        let frame = match Frame::event(&ServerEvent::NewBooking { booking_id }) {
            Ok(frame) => frame,
            Err(err) => {
                error!(error = %err, booking_id, "failed to serialize booking notification");
                return;
            }
        };

        let report = self
            .registry
            .broadcast(&RoomKey::Dispatch(driver_id), &frame, |_| true);

        if report.evicted > 0 {
            self.metrics
                .broadcast_evictions_total
                .inc_by(report.evicted as u64);
        }
        if report.delivered == 0 {
            warn!(
                booking_id,
                driver_id, "driver has no live connection; booking left for polling"
            );
        }
    }

    fn expect_status(
        &self,
        booking_id: u64,
        expected: BookingStatus,
        operation: &str,
    ) -> Result<(), AppError> {
        let current = self.current_status(booking_id)?;
        if current.status != expected {
            return Err(AppError::InvalidState(format!(
                "cannot {operation} booking {booking_id} in state {}",
                current.status
            )));
        }
        Ok(())
    }

    fn rejected_drivers(&self, booking_id: u64) -> Result<HashSet<u64>, AppError> {
        Ok(self
            .history(booking_id)?
            .into_iter()
            .filter(|record| record.status == BookingStatus::Rejected)
            .filter_map(|record| record.driver_id)
            .collect())
    }

    fn record(
        &self,
        booking_id: u64,
        status: BookingStatus,
        driver_id: Option<u64>,
    ) -> Result<BookingStatusRecord, AppError> {
        Ok(self.store.statuses.create(BookingStatusRecord {
            id: 0,
            booking_id,
            status,
            driver_id,
            created_at: Utc::now(),
        })?)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, ()>, AppError> {
        self.transitions
            .lock()
            .map_err(|_| AppError::Internal("dispatch lock poisoned".to_string()))
    }

    fn timed<T>(
        &self,
        operation: &str,
        f: impl FnOnce() -> Result<T, AppError>,
    ) -> Result<T, AppError> {
        let start = Instant::now();
        let result = f();
        self.metrics
            .dispatch_latency_seconds
            .with_label_values(&[operation])
            .observe(start.elapsed().as_secs_f64());
        result
    }
}
