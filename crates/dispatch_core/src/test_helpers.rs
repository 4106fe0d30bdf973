//! Test helpers for common test setup and utilities.
//!
//! Fixtures here build passengers and drivers whose timestamps follow their
//! ids, so snapshot ordering in tests is deterministic.

use chrono::{DateTime, Duration, TimeZone, Utc};

use crate::agents::{Driver, DriverId, Location, Passenger, PassengerId, Rating};
use crate::matching::CostMatrix;

/// Fixed reference instant for fixture timestamps.
///
/// # Panics
///
/// Panics if the constant date is invalid (should never happen).
pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 8, 0, 0)
        .single()
        .expect("fixture epoch should be a valid instant")
}

/// Rating fixture.
///
/// # Panics
///
/// Panics if `value` is not a valid rating.
pub fn rating(value: f64) -> Rating {
    Rating::new(value).expect("fixture rating must be positive")
}

/// A waiting passenger who requested `id` seconds after [`epoch`].
pub fn passenger(id: u64, pickup: i64, dropoff: i64) -> Passenger {
    Passenger::new(
        PassengerId(id),
        format!("passenger {id}"),
        Location(pickup),
        Location(dropoff),
        Rating::default(),
        epoch() + Duration::seconds(id as i64),
    )
}

/// An available driver whose last trip ended `id` seconds after [`epoch`].
pub fn driver(id: u64, location: i64) -> Driver {
    Driver::new(
        DriverId(id),
        format!("driver {id}"),
        Location(location),
        Rating::default(),
        epoch() + Duration::seconds(id as i64),
    )
}

pub fn matrix(rows: &[&[f64]]) -> CostMatrix {
    CostMatrix::from_rows(rows.iter().map(|row| row.to_vec()).collect())
}
