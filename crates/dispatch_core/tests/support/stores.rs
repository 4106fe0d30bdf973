use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use dispatch_core::agents::{DriverId, LifecycleKey, Location, PassengerId, Rating};
use dispatch_core::signal::{LifecycleSignal, SignalError, SignalSender};
use dispatch_core::store::{
    ApplyOutcome, EcsStore, RatingTarget, Snapshot, Store, StoreError, TripTicket,
};
use parking_lot::Mutex;

/// Wraps an [`EcsStore`] and injects apply conflicts and failures.
pub struct ScriptedStore {
    pub inner: Arc<EcsStore>,
    conflicts: Mutex<HashSet<PassengerId>>,
    fail_after: Mutex<Option<usize>>,
    applies: Mutex<Vec<(PassengerId, DriverId)>>,
}

impl ScriptedStore {
    pub fn new(inner: Arc<EcsStore>) -> Self {
        Self {
            inner,
            conflicts: Mutex::new(HashSet::new()),
            fail_after: Mutex::new(None),
            applies: Mutex::new(Vec::new()),
        }
    }

    /// Applies for `passenger` report a conflict without touching the store.
    pub fn conflict_on(&self, passenger: PassengerId) {
        self.conflicts.lock().insert(passenger);
    }

    /// After `successes` more apply calls, the next one fails once.
    pub fn fail_apply_after(&self, successes: usize) {
        *self.fail_after.lock() = Some(successes);
    }

    /// Every apply call that reached the store, in order.
    pub fn applies(&self) -> Vec<(PassengerId, DriverId)> {
        self.applies.lock().clone()
    }
}

#[async_trait]
impl Store for ScriptedStore {
    async fn snapshot_waiting(&self) -> Result<Snapshot, StoreError> {
        self.inner.snapshot_waiting().await
    }

    async fn apply_assignment(
        &self,
        passenger: PassengerId,
        driver: DriverId,
    ) -> Result<ApplyOutcome, StoreError> {
        {
            let mut fail_after = self.fail_after.lock();
            match *fail_after {
                Some(0) => {
                    *fail_after = None;
                    return Err(StoreError::Unavailable("apply failed".into()));
                }
                Some(left) => *fail_after = Some(left - 1),
                None => {}
            }
        }
        if self.conflicts.lock().contains(&passenger) {
            return Ok(ApplyOutcome::Conflict);
        }
        self.applies.lock().push((passenger, driver));
        self.inner.apply_assignment(passenger, driver).await
    }

    async fn active_trip(&self, passenger: PassengerId) -> Result<TripTicket, StoreError> {
        self.inner.active_trip(passenger).await
    }

    async fn finalize_arrival(
        &self,
        driver: DriverId,
        passenger: PassengerId,
        destination: Location,
    ) -> Result<(), StoreError> {
        self.inner
            .finalize_arrival(driver, passenger, destination)
            .await
    }

    async fn finalize_trip_end(&self, passenger: PassengerId) -> Result<(), StoreError> {
        self.inner.finalize_trip_end(passenger).await
    }

    async fn record_rating(&self, target: RatingTarget, score: Rating) -> Result<(), StoreError> {
        self.inner.record_rating(target, score).await
    }
}

/// Signal sender that records what it was asked to deliver.
#[derive(Default)]
pub struct RecordingSender {
    sent: Mutex<Vec<(LifecycleKey, LifecycleSignal)>>,
    unreachable: Mutex<HashSet<LifecycleKey>>,
}

impl RecordingSender {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unreachable(&self, key: LifecycleKey) {
        self.unreachable.lock().insert(key);
    }

    pub fn sent(&self) -> Vec<(LifecycleKey, LifecycleSignal)> {
        self.sent.lock().clone()
    }
}

impl SignalSender for RecordingSender {
    fn send(&self, key: &LifecycleKey, signal: LifecycleSignal) -> Result<(), SignalError> {
        if self.unreachable.lock().contains(key) {
            return Err(SignalError::UnknownTarget(key.clone()));
        }
        self.sent.lock().push((key.clone(), signal));
        Ok(())
    }
}
