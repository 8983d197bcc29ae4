use std::collections::HashSet;

use crate::geo::{haversine_km, Coordinate};
use crate::models::driver::Driver;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NearestDriver {
    pub driver_id: u64,
    pub distance_km: f64,
}

/// Picks a driver for a pickup point.
///
/// Implementations receive the roster snapshot in the order the caller wants
/// ties broken and must never return an excluded driver. A spatial index can
/// replace the linear scan behind this trait without touching callers.
pub trait DriverLocator: Send + Sync {
    fn find_nearest(
        &self,
        pickup: &Coordinate,
        candidates: &[Driver],
        exclude: &HashSet<u64>,
    ) -> Option<NearestDriver>;
}

/// O(n) scan keeping the strictly closer candidate, so among equally distant
/// drivers the first one in input order wins.
#[derive(Debug, Default, Clone, Copy)]
pub struct LinearScanLocator;

impl DriverLocator for LinearScanLocator {
    fn find_nearest(
        &self,
        pickup: &Coordinate,
        candidates: &[Driver],
        exclude: &HashSet<u64>,
    ) -> Option<NearestDriver> {
        let mut nearest: Option<NearestDriver> = None;

        for driver in candidates {
            if exclude.contains(&driver.id) {
                continue;
            }
            // No reported position yet: skip rather than fail the match.
            let Some(location) = driver.location.as_ref() else {
                continue;
            };

            let distance_km = haversine_km(pickup, location);
            if nearest.is_none_or(|best| distance_km < best.distance_km) {
                nearest = Some(NearestDriver {
                    driver_id: driver.id,
                    distance_km,
                });
            }
        }

        nearest
    }
}
