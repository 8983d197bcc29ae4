use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::geo::Coordinate;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Created,
    /// Payment confirmed; re-triggers matching when no driver is assigned.
    Paid,
    WaitingAcceptance,
    Accepted,
    Rejected,
    NoDriverAvailable,
    Completed,
}

impl BookingStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, BookingStatus::Completed)
    }

    /// Statuses an operator may set directly.
    pub fn is_administrative(self) -> bool {
        matches!(self, BookingStatus::Created | BookingStatus::Paid)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BookingStatus::Created => "created",
            BookingStatus::Paid => "paid",
            BookingStatus::WaitingAcceptance => "waiting_acceptance",
            BookingStatus::Accepted => "accepted",
            BookingStatus::Rejected => "rejected",
            BookingStatus::NoDriverAvailable => "no_driver_available",
            BookingStatus::Completed => "completed",
        }
    }
}

impl std::fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Booking {
    pub id: u64,
    pub passenger_id: u64,
    pub driver_id: Option<u64>,
    pub pickup: Coordinate,
    pub destination: Option<Coordinate>,
    pub prebooking: bool,
    /// Scheduled pickup time, if the passenger booked ahead.
    pub booking_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// One entry of a booking's status history. The entry with the highest id is
/// the booking's current status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingStatusRecord {
    pub id: u64,
    pub booking_id: u64,
    pub status: BookingStatus,
    /// Driver the transition concerns: the matched driver for
    /// `WaitingAcceptance`, the rejecting one for `Rejected`.
    pub driver_id: Option<u64>,
    pub created_at: DateTime<Utc>,
}
