//! Passenger and driver records shared by the matcher, the store and the trip lifecycle.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Rating assumed for an entity that has not been rated yet.
pub const DEFAULT_RATING: f64 = 5.0;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ModelError {
    #[error("rating must be a positive finite number, got {0}")]
    InvalidRating(f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PassengerId(pub u64);

impl fmt::Display for PassengerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "passenger-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DriverId(pub u64);

impl fmt::Display for DriverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "driver-{}", self.0)
    }
}

/// Stable external key of one lifecycle instance (the workflow id of a passenger's trip).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LifecycleKey(String);

impl LifecycleKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Key derived from the passenger id, used when the caller has no workflow id of its own.
    pub fn for_passenger(passenger: PassengerId) -> Self {
        Self(format!("trip-{}", passenger.0))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LifecycleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Position on the service line. Locations are integer coordinates; distance is the absolute gap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location(pub i64);

impl Location {
    pub fn distance_to(self, other: Location) -> f64 {
        self.0.abs_diff(other.0) as f64
    }
}

/// Strictly positive rating.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct Rating(f64);

impl Rating {
    pub fn new(value: f64) -> Result<Self, ModelError> {
        if value.is_finite() && value > 0.0 {
            Ok(Self(value))
        } else {
            Err(ModelError::InvalidRating(value))
        }
    }

    pub fn value(self) -> f64 {
        self.0
    }

    /// Folds a new score into the rating as the mean of the previous rating and the score.
    pub fn aggregate(self, score: Rating) -> Rating {
        Rating((self.0 + score.0) / 2.0)
    }
}

impl Default for Rating {
    fn default() -> Self {
        Self(DEFAULT_RATING)
    }
}

impl TryFrom<f64> for Rating {
    type Error = ModelError;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        Rating::new(value)
    }
}

impl From<Rating> for f64 {
    fn from(rating: Rating) -> Self {
        rating.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PassengerPhase {
    /// Waiting for the next match cycle.
    Waiting,
    /// Paired with a driver; the trip lifecycle owns the passenger from here on.
    InRide,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Passenger {
    pub id: PassengerId,
    pub name: String,
    pub pickup: Location,
    pub dropoff: Location,
    pub rating: Rating,
    /// When the passenger started waiting; the matcher serves the oldest first.
    pub requested_at: DateTime<Utc>,
    pub lifecycle_key: LifecycleKey,
    pub phase: PassengerPhase,
    pub with_driver: Option<DriverId>,
}

impl Passenger {
    pub fn new(
        id: PassengerId,
        name: impl Into<String>,
        pickup: Location,
        dropoff: Location,
        rating: Rating,
        requested_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            pickup,
            dropoff,
            rating,
            requested_at,
            lifecycle_key: LifecycleKey::for_passenger(id),
            phase: PassengerPhase::Waiting,
            with_driver: None,
        }
    }

    pub fn with_lifecycle_key(mut self, key: LifecycleKey) -> Self {
        self.lifecycle_key = key;
        self
    }

    pub fn is_waiting(&self) -> bool {
        self.phase == PassengerPhase::Waiting && self.with_driver.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Driver {
    pub id: DriverId,
    pub name: String,
    pub location: Location,
    pub rating: Rating,
    pub available: bool,
    pub online: bool,
    pub with_passenger: Option<PassengerId>,
    /// End of the previous trip (or when the driver came online); the longest idle go first.
    pub last_trip_end_at: DateTime<Utc>,
}

impl Driver {
    pub fn new(
        id: DriverId,
        name: impl Into<String>,
        location: Location,
        rating: Rating,
        last_trip_end_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            location,
            rating,
            available: true,
            online: true,
            with_passenger: None,
            last_trip_end_at,
        }
    }

    pub fn is_available(&self) -> bool {
        self.online && self.available && self.with_passenger.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rating_rejects_zero_negative_and_nan() {
        assert_eq!(Rating::new(0.0), Err(ModelError::InvalidRating(0.0)));
        assert!(Rating::new(-1.5).is_err());
        assert!(Rating::new(f64::NAN).is_err());
        assert!(Rating::new(f64::INFINITY).is_err());
        assert_eq!(Rating::new(4.5).expect("rating").value(), 4.5);
    }

    #[test]
    fn rating_aggregate_is_mean_of_previous_and_new() {
        let previous = Rating::new(5.0).expect("rating");
        let score = Rating::new(3.0).expect("rating");
        assert_eq!(previous.aggregate(score).value(), 4.0);
    }

    #[test]
    fn rating_deserialize_validates() {
        let ok: Rating = serde_json::from_str("4.0").expect("valid rating");
        assert_eq!(ok.value(), 4.0);
        assert!(serde_json::from_str::<Rating>("0.0").is_err());
    }

    #[test]
    fn location_distance_is_absolute_gap() {
        assert_eq!(Location(3).distance_to(Location(15)), 12.0);
        assert_eq!(Location(9).distance_to(Location(8)), 1.0);
        assert_eq!(Location(-4).distance_to(Location(4)), 8.0);
    }

    #[test]
    fn new_passenger_waits_with_derived_key() {
        let passenger = Passenger::new(
            PassengerId(7),
            "ana",
            Location(1),
            Location(6),
            Rating::default(),
            Utc::now(),
        );
        assert!(passenger.is_waiting());
        assert_eq!(passenger.lifecycle_key.as_str(), "trip-7");
    }
}
