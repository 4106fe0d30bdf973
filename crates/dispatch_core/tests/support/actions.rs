use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dispatch_core::activities::{RatingSide, TripActions, TripContext};
use dispatch_core::agents::Rating;
use dispatch_core::executor::{ActivityError, Heartbeat};
use parking_lot::Mutex;

/// Trip actions that record every call and follow a script instead of touching a store.
pub struct ScriptedActions {
    calls: Mutex<Vec<String>>,
    ride_time: Duration,
    heartbeat_every: Option<Duration>,
    transient_arrivals: AtomicU32,
    transient_ratings: AtomicU32,
    score: Option<Rating>,
}

impl Default for ScriptedActions {
    fn default() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            ride_time: Duration::from_secs(3),
            heartbeat_every: Some(Duration::from_secs(1)),
            transient_arrivals: AtomicU32::new(0),
            transient_ratings: AtomicU32::new(0),
            score: Some(Rating::new(4.0).expect("rating")),
        }
    }
}

impl ScriptedActions {
    pub fn new() -> Self {
        Self::default()
    }

    /// A ride that runs for `ride_time` without ever reporting a heartbeat.
    pub fn with_silent_ride(mut self, ride_time: Duration) -> Self {
        self.ride_time = ride_time;
        self.heartbeat_every = None;
        self
    }

    /// The next `failures` arrival attempts fail as transient.
    pub fn with_transient_arrivals(self, failures: u32) -> Self {
        self.transient_arrivals.store(failures, Ordering::SeqCst);
        self
    }

    /// The next `failures` rating writes fail as transient.
    pub fn with_transient_ratings(self, failures: u32) -> Self {
        self.transient_ratings.store(failures, Ordering::SeqCst);
        self
    }

    pub fn without_ratings(mut self) -> Self {
        self.score = None;
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn count(&self, name: &str) -> usize {
        self.calls.lock().iter().filter(|call| *call == name).count()
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().push(call.into());
    }
}

#[async_trait]
impl TripActions for ScriptedActions {
    async fn ride(&self, _trip: &TripContext, heartbeat: Heartbeat) -> Result<(), ActivityError> {
        self.record("ride");
        match self.heartbeat_every {
            Some(every) => {
                let mut elapsed = Duration::ZERO;
                while elapsed < self.ride_time {
                    tokio::time::sleep(every).await;
                    elapsed += every;
                    heartbeat.record();
                }
            }
            None => tokio::time::sleep(self.ride_time).await,
        }
        Ok(())
    }

    async fn collect_rating(
        &self,
        _trip: &TripContext,
        side: RatingSide,
    ) -> Result<Option<Rating>, ActivityError> {
        self.record(format!("collect_rating:{side}"));
        Ok(self.score)
    }

    async fn arrive(&self, _trip: &TripContext) -> Result<(), ActivityError> {
        self.record("arrive");
        if take_failure(&self.transient_arrivals) {
            return Err(ActivityError::Transient("store unavailable".into()));
        }
        Ok(())
    }

    async fn record_rating(
        &self,
        _trip: &TripContext,
        side: RatingSide,
        _score: Rating,
    ) -> Result<(), ActivityError> {
        self.record(format!("record_rating:{side}"));
        if take_failure(&self.transient_ratings) {
            return Err(ActivityError::Transient("store unavailable".into()));
        }
        Ok(())
    }

    async fn end_trip(&self, _trip: &TripContext) -> Result<(), ActivityError> {
        self.record("end_trip");
        Ok(())
    }
}

fn take_failure(left: &AtomicU32) -> bool {
    left.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}
