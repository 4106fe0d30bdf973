//! Durable actions a trip lifecycle invokes, and the store-backed implementation.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::agents::{LifecycleKey, PassengerId, Rating};
use crate::config::RideConfig;
use crate::executor::{ActivityError, Heartbeat};
use crate::store::{RatingTarget, SharedStore};

/// Identity of the trip an action runs for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TripContext {
    pub key: LifecycleKey,
    pub passenger: PassengerId,
}

impl TripContext {
    pub fn new(key: LifecycleKey, passenger: PassengerId) -> Self {
        Self { key, passenger }
    }
}

/// Who is rating whom.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RatingSide {
    DriverRatesPassenger,
    PassengerRatesDriver,
}

impl fmt::Display for RatingSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DriverRatesPassenger => write!(f, "driver_rates_passenger"),
            Self::PassengerRatesDriver => write!(f, "passenger_rates_driver"),
        }
    }
}

#[async_trait]
pub trait TripActions: Send + Sync {
    /// Carries the passenger to the drop-off, reporting heartbeats on the way.
    async fn ride(&self, trip: &TripContext, heartbeat: Heartbeat) -> Result<(), ActivityError>;

    /// Waits a bounded time for a score; `None` if nobody rated.
    async fn collect_rating(
        &self,
        trip: &TripContext,
        side: RatingSide,
    ) -> Result<Option<Rating>, ActivityError>;

    /// Frees the driver at the destination if it is still serving this trip.
    async fn arrive(&self, trip: &TripContext) -> Result<(), ActivityError>;

    /// Folds a collected score into the rated party's rating.
    async fn record_rating(
        &self,
        trip: &TripContext,
        side: RatingSide,
        score: Rating,
    ) -> Result<(), ActivityError>;

    /// Retires the trip record.
    async fn end_trip(&self, trip: &TripContext) -> Result<(), ActivityError>;
}

pub type SharedTripActions = Arc<dyn TripActions>;

/// Collection point for ratings submitted by riders and drivers.
///
/// A score submitted before collection starts is kept until collected.
#[derive(Debug, Clone, Default)]
pub struct RatingBoard {
    inner: Arc<RatingBoardInner>,
}

#[derive(Debug, Default)]
struct RatingBoardInner {
    scores: Mutex<HashMap<(LifecycleKey, RatingSide), Rating>>,
    submitted: Notify,
}

impl RatingBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a score; a later submission for the same trip and side replaces it.
    pub fn submit(&self, key: LifecycleKey, side: RatingSide, score: Rating) {
        debug!(key = %key, side = %side, score = score.value(), "rating submitted");
        self.inner.scores.lock().insert((key, side), score);
        self.inner.submitted.notify_waiters();
    }

    fn take(&self, key: &LifecycleKey, side: RatingSide) -> Option<Rating> {
        self.inner.scores.lock().remove(&(key.clone(), side))
    }

    /// Waits up to `window` for a score and removes it from the board.
    pub async fn collect(
        &self,
        key: &LifecycleKey,
        side: RatingSide,
        window: Duration,
    ) -> Option<Rating> {
        let deadline = Instant::now() + window;
        loop {
            let notified = self.inner.submitted.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if let Some(score) = self.take(key, side) {
                return Some(score);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.take(key, side);
            }
        }
    }

    pub fn pending(&self) -> usize {
        self.inner.scores.lock().len()
    }
}

/// Samples how long a simulated ride takes.
#[derive(Debug)]
pub struct RideDurationModel {
    rng: StdRng,
    min: Duration,
    max: Duration,
}

impl RideDurationModel {
    pub fn new(seed: Option<u64>, config: &RideConfig) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            rng,
            min: Duration::from_millis(config.min_duration_ms),
            max: Duration::from_millis(config.max_duration_ms),
        }
    }

    /// A duration in `min..max`, or `min` when the range is empty.
    pub fn sample(&mut self) -> Duration {
        if self.max <= self.min {
            return self.min;
        }
        self.rng.gen_range(self.min..self.max)
    }
}

/// [`TripActions`] backed by a [`Store`](crate::store::Store) and a [`RatingBoard`].
pub struct StoreTripActions {
    store: SharedStore,
    ratings: RatingBoard,
    durations: Mutex<RideDurationModel>,
    heartbeat_interval: Duration,
    rating_window: Duration,
}

impl StoreTripActions {
    pub fn new(
        store: SharedStore,
        ratings: RatingBoard,
        durations: RideDurationModel,
        heartbeat_interval: Duration,
        rating_window: Duration,
    ) -> Self {
        Self {
            store,
            ratings,
            durations: Mutex::new(durations),
            heartbeat_interval,
            rating_window,
        }
    }
}

#[async_trait]
impl TripActions for StoreTripActions {
    async fn ride(&self, trip: &TripContext, heartbeat: Heartbeat) -> Result<(), ActivityError> {
        let ticket = self.store.active_trip(trip.passenger).await?;
        let mut remaining = self.durations.lock().sample();
        info!(
            key = %trip.key,
            passenger = %ticket.passenger,
            driver = %ticket.driver,
            duration = ?remaining,
            "ride started"
        );
        heartbeat.record();
        while !remaining.is_zero() {
            let step = remaining.min(self.heartbeat_interval);
            tokio::time::sleep(step).await;
            remaining -= step;
            heartbeat.record();
        }
        Ok(())
    }

    async fn collect_rating(
        &self,
        trip: &TripContext,
        side: RatingSide,
    ) -> Result<Option<Rating>, ActivityError> {
        let score = self
            .ratings
            .collect(&trip.key, side, self.rating_window)
            .await;
        match score {
            Some(score) => info!(key = %trip.key, side = %side, score = score.value(), "rating collected"),
            None => info!(key = %trip.key, side = %side, "no rating within window"),
        }
        Ok(score)
    }

    async fn arrive(&self, trip: &TripContext) -> Result<(), ActivityError> {
        let ticket = self.store.active_trip(trip.passenger).await?;
        self.store
            .finalize_arrival(ticket.driver, ticket.passenger, ticket.destination)
            .await?;
        info!(
            key = %trip.key,
            driver = %ticket.driver,
            destination = ticket.destination.0,
            "arrived at destination"
        );
        Ok(())
    }

    async fn record_rating(
        &self,
        trip: &TripContext,
        side: RatingSide,
        score: Rating,
    ) -> Result<(), ActivityError> {
        let ticket = self.store.active_trip(trip.passenger).await?;
        let target = match side {
            RatingSide::DriverRatesPassenger => RatingTarget::Passenger(ticket.passenger),
            RatingSide::PassengerRatesDriver => RatingTarget::Driver(ticket.driver),
        };
        self.store.record_rating(target, score).await?;
        debug!(key = %trip.key, side = %side, score = score.value(), "rating recorded");
        Ok(())
    }

    async fn end_trip(&self, trip: &TripContext) -> Result<(), ActivityError> {
        self.store.finalize_trip_end(trip.passenger).await?;
        info!(key = %trip.key, passenger = %trip.passenger, "trip closed");
        Ok(())
    }
}
