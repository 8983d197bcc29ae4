use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::geo::Coordinate;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DriverStatus {
    Available,
    Offline,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Driver {
    pub id: u64,
    pub name: String,
    /// Last reported position; `None` until the driver's device reports one.
    pub location: Option<Coordinate>,
    pub status: DriverStatus,
    pub updated_at: DateTime<Utc>,
}
