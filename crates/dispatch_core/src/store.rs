//! Store contract: the core's only window onto passenger and driver state.
//!
//! The match cycle reads a snapshot and applies pairings; the trip lifecycle
//! finalizes trips. Applies are conditional on the entity still being in the
//! state the snapshot saw, so a concurrent change surfaces as
//! [`ApplyOutcome::Conflict`] rather than a double booking.

pub mod ecs_store;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::agents::{Driver, DriverId, Location, Passenger, PassengerId, Rating};

pub use ecs_store::EcsStore;

/// Waiting passengers (oldest request first) and available drivers (longest idle first).
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub passengers: Vec<Passenger>,
    pub drivers: Vec<Driver>,
}

impl Snapshot {
    pub fn is_empty(&self) -> bool {
        self.passengers.is_empty() || self.drivers.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyOutcome {
    Applied,
    /// Passenger no longer waiting or driver no longer available.
    Conflict,
}

/// What the lifecycle needs to finish a trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TripTicket {
    pub passenger: PassengerId,
    pub driver: DriverId,
    pub destination: Location,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RatingTarget {
    Passenger(PassengerId),
    Driver(DriverId),
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("unknown passenger {0}")]
    UnknownPassenger(PassengerId),
    #[error("unknown driver {0}")]
    UnknownDriver(DriverId),
    #[error("{0} has no active trip")]
    NoActiveTrip(PassengerId),
}

impl StoreError {
    /// Whether retrying the same call later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn snapshot_waiting(&self) -> Result<Snapshot, StoreError>;

    /// Pairs the passenger with the driver if both are still eligible.
    async fn apply_assignment(
        &self,
        passenger: PassengerId,
        driver: DriverId,
    ) -> Result<ApplyOutcome, StoreError>;

    async fn active_trip(&self, passenger: PassengerId) -> Result<TripTicket, StoreError>;

    /// Frees the driver at `destination` and stamps the trip end, but only while
    /// the driver is still serving `passenger`. Idempotent.
    async fn finalize_arrival(
        &self,
        driver: DriverId,
        passenger: PassengerId,
        destination: Location,
    ) -> Result<(), StoreError>;

    /// Retires the passenger's trip record. Idempotent.
    async fn finalize_trip_end(&self, passenger: PassengerId) -> Result<(), StoreError>;

    /// Folds `score` into the target's rating.
    async fn record_rating(&self, target: RatingTarget, score: Rating) -> Result<(), StoreError>;
}

pub type SharedStore = Arc<dyn Store>;
