//! Per-passenger trip state machine.
//!
//! The lifecycle walks [`TripState`] strictly in order, suspending on signals
//! in the two waiting states and running every side effect through the
//! [`DurableExecutor`]. The checkpoint is saved after every transition and
//! every loop iteration, so an instance can be resumed from the last state it
//! reached.

pub mod checkpoint;
pub mod registry;
pub mod state;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::activities::{RatingSide, SharedTripActions, TripContext};
use crate::agents::Rating;
use crate::config::DispatchConfig;
use crate::executor::{ActivityOptions, DurableExecutor, ExecutionError};
use crate::signal::{SignalError, SignalInbox, SignalName};

pub use checkpoint::{
    CheckpointError, CheckpointStore, InMemoryCheckpoints, LifecycleCheckpoint,
    SharedCheckpointStore,
};
pub use registry::{LifecycleOutcome, LifecycleRegistry, LifecycleStatus, RegistryError};
pub use state::TripState;

#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("signal wait failed in {state}: {source}")]
    Signal {
        state: TripState,
        #[source]
        source: SignalError,
    },
    #[error("activity failed in {state}: {source}")]
    Activity {
        state: TripState,
        #[source]
        source: ExecutionError,
    },
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
}

/// Options for each kind of durable action a lifecycle runs.
#[derive(Debug, Clone, PartialEq)]
pub struct LifecycleOptions {
    pub ride: ActivityOptions,
    pub rating: ActivityOptions,
    pub finalize: ActivityOptions,
}

impl LifecycleOptions {
    pub fn from_config(config: &DispatchConfig) -> Self {
        Self {
            ride: config.ride_options(),
            rating: config.rating_options(),
            finalize: config.finalize_options(),
        }
    }
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self::from_config(&DispatchConfig::default())
    }
}

pub struct TripLifecycle {
    trip: TripContext,
    checkpoint: LifecycleCheckpoint,
    actions: SharedTripActions,
    checkpoints: SharedCheckpointStore,
    options: LifecycleOptions,
    executor: DurableExecutor,
    progress: watch::Sender<TripState>,
}

impl TripLifecycle {
    /// Builds an instance that continues from `checkpoint`. A fresh trip starts from
    /// [`LifecycleCheckpoint::new`].
    pub fn new(
        checkpoint: LifecycleCheckpoint,
        actions: SharedTripActions,
        checkpoints: SharedCheckpointStore,
        options: LifecycleOptions,
    ) -> Self {
        let trip = TripContext::new(checkpoint.key.clone(), checkpoint.passenger);
        let (progress, _) = watch::channel(checkpoint.state);
        Self {
            trip,
            checkpoint,
            actions,
            checkpoints,
            options,
            executor: DurableExecutor::new(),
            progress,
        }
    }

    /// Observes the current state while the instance runs.
    pub fn subscribe(&self) -> watch::Receiver<TripState> {
        self.progress.subscribe()
    }

    pub fn state(&self) -> TripState {
        self.checkpoint.state
    }

    /// Drives the instance to [`TripState::Completed`] and returns the final checkpoint.
    ///
    /// On failure the checkpoint keeps the last state reached and records the
    /// failure reason.
    pub async fn run(
        mut self,
        mut inbox: SignalInbox,
    ) -> Result<LifecycleCheckpoint, LifecycleError> {
        self.checkpoint.failure = None;
        info!(
            key = %self.trip.key,
            passenger = %self.trip.passenger,
            state = %self.checkpoint.state,
            "lifecycle running"
        );
        self.save(&mut inbox).await?;

        match self.drive(&mut inbox).await {
            Ok(()) => Ok(self.checkpoint),
            Err(err) => {
                error!(
                    key = %self.trip.key,
                    state = %self.checkpoint.state,
                    error = %err,
                    "lifecycle failed"
                );
                self.checkpoint.failure = Some(err.to_string());
                if let Err(save_err) = self.save(&mut inbox).await {
                    warn!(key = %self.trip.key, error = %save_err, "failed to record lifecycle failure");
                }
                Err(err)
            }
        }
    }

    async fn drive(&mut self, inbox: &mut SignalInbox) -> Result<(), LifecycleError> {
        loop {
            let state = self.checkpoint.state;
            match state {
                TripState::WaitingForMatch => {
                    if self.receive(inbox, SignalName::Match).await? {
                        self.advance(inbox).await?;
                    } else {
                        info!(key = %self.trip.key, "no match yet, waiting for the next cycle");
                        self.save(inbox).await?;
                    }
                }
                TripState::InTrip => {
                    let actions = self.actions.clone();
                    let trip = self.trip.clone();
                    self.executor
                        .run("ride", &self.options.ride, |heartbeat| {
                            let actions = actions.clone();
                            let trip = trip.clone();
                            async move { actions.ride(&trip, heartbeat).await }
                        })
                        .await
                        .map_err(|source| LifecycleError::Activity { state, source })?;
                    self.advance(inbox).await?;
                }
                TripState::AwaitingDriverRating => {
                    self.checkpoint.driver_rating =
                        self.collect_rating(RatingSide::DriverRatesPassenger).await?;
                    self.advance(inbox).await?;
                }
                TripState::AwaitingPayment => {
                    if !self.checkpoint.arrival_finalized {
                        self.arrive().await?;
                        self.checkpoint.arrival_finalized = true;
                        self.save(inbox).await?;
                    }
                    if let (Some(score), false) = (
                        self.checkpoint.driver_rating,
                        self.checkpoint.driver_rating_recorded,
                    ) {
                        self.record_rating(RatingSide::DriverRatesPassenger, score)
                            .await?;
                        self.checkpoint.driver_rating_recorded = true;
                        self.save(inbox).await?;
                    }
                    if self.receive(inbox, SignalName::Payment).await? {
                        self.advance(inbox).await?;
                    } else {
                        info!(key = %self.trip.key, "payment declined, waiting for another attempt");
                        self.save(inbox).await?;
                    }
                }
                TripState::AwaitingPassengerRating => {
                    if self.checkpoint.passenger_rating.is_none() {
                        self.checkpoint.passenger_rating =
                            self.collect_rating(RatingSide::PassengerRatesDriver).await?;
                        self.save(inbox).await?;
                    }
                    if let (Some(score), false) = (
                        self.checkpoint.passenger_rating,
                        self.checkpoint.passenger_rating_recorded,
                    ) {
                        self.record_rating(RatingSide::PassengerRatesDriver, score)
                            .await?;
                        self.checkpoint.passenger_rating_recorded = true;
                        self.save(inbox).await?;
                    }
                    self.end_trip().await?;
                    self.advance(inbox).await?;
                }
                TripState::Completed => return Ok(()),
            }
        }
    }

    async fn receive(
        &mut self,
        inbox: &mut SignalInbox,
        name: SignalName,
    ) -> Result<bool, LifecycleError> {
        let state = self.checkpoint.state;
        let ok = inbox
            .receive(name)
            .await
            .map_err(|source| LifecycleError::Signal { state, source })?;
        info!(key = %self.trip.key, state = %state, signal = %name, ok, "signal received");
        Ok(ok)
    }

    async fn collect_rating(
        &self,
        side: RatingSide,
    ) -> Result<Option<Rating>, LifecycleError> {
        let state = self.checkpoint.state;
        let actions = self.actions.clone();
        let trip = self.trip.clone();
        self.executor
            .run("collect_rating", &self.options.rating, |_| {
                let actions = actions.clone();
                let trip = trip.clone();
                async move { actions.collect_rating(&trip, side).await }
            })
            .await
            .map_err(|source| LifecycleError::Activity { state, source })
    }

    async fn arrive(&self) -> Result<(), LifecycleError> {
        let state = self.checkpoint.state;
        let actions = self.actions.clone();
        let trip = self.trip.clone();
        self.executor
            .run("arrive", &self.options.finalize, |_| {
                let actions = actions.clone();
                let trip = trip.clone();
                async move { actions.arrive(&trip).await }
            })
            .await
            .map_err(|source| LifecycleError::Activity { state, source })
    }

    async fn record_rating(&self, side: RatingSide, score: Rating) -> Result<(), LifecycleError> {
        let state = self.checkpoint.state;
        let actions = self.actions.clone();
        let trip = self.trip.clone();
        self.executor
            .run("record_rating", &self.options.finalize, |_| {
                let actions = actions.clone();
                let trip = trip.clone();
                async move { actions.record_rating(&trip, side, score).await }
            })
            .await
            .map_err(|source| LifecycleError::Activity { state, source })
    }

    async fn end_trip(&self) -> Result<(), LifecycleError> {
        let state = self.checkpoint.state;
        let actions = self.actions.clone();
        let trip = self.trip.clone();
        self.executor
            .run("end_trip", &self.options.finalize, |_| {
                let actions = actions.clone();
                let trip = trip.clone();
                async move { actions.end_trip(&trip).await }
            })
            .await
            .map_err(|source| LifecycleError::Activity { state, source })
    }

    /// Moves to the next state and checkpoints it.
    async fn advance(&mut self, inbox: &mut SignalInbox) -> Result<(), LifecycleError> {
        let from = self.checkpoint.state;
        let Some(next) = from.next() else {
            return Ok(());
        };
        self.checkpoint.state = next;
        self.progress.send_replace(next);
        info!(
            key = %self.trip.key,
            passenger = %self.trip.passenger,
            from = %from,
            to = %next,
            "lifecycle transition"
        );
        self.save(inbox).await
    }

    async fn save(&mut self, inbox: &mut SignalInbox) -> Result<(), LifecycleError> {
        inbox.drain_ready();
        self.checkpoint.pending_signals = inbox.pending();
        self.checkpoint.updated_at = Utc::now();
        self.checkpoints.save(&self.checkpoint).await?;
        Ok(())
    }
}
