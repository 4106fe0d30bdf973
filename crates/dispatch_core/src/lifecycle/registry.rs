//! Spawns lifecycle instances and tracks them by key.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::activities::SharedTripActions;
use crate::agents::{LifecycleKey, PassengerId};
use crate::signal::{LifecycleSignal, SignalError, SignalRouter, SignalSender};
use crate::telemetry::{TripRecord, TripTelemetry};

use super::checkpoint::{CheckpointError, LifecycleCheckpoint, SharedCheckpointStore};
use super::state::TripState;
use super::{LifecycleOptions, TripLifecycle};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum LifecycleOutcome {
    Running,
    Completed,
    Failed { reason: String },
    Abandoned,
}

impl LifecycleOutcome {
    pub fn is_finished(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleStatus {
    pub key: LifecycleKey,
    pub passenger: PassengerId,
    /// Last state the instance reached.
    pub state: TripState,
    pub outcome: LifecycleOutcome,
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("lifecycle {0} is already running")]
    AlreadyRunning(LifecycleKey),
    #[error("no lifecycle instance for key {0}")]
    UnknownInstance(LifecycleKey),
    #[error("lifecycle {0} has already finished")]
    Finished(LifecycleKey),
    #[error("no checkpoint stored for key {0}")]
    NoCheckpoint(LifecycleKey),
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
}

struct Instance {
    passenger: PassengerId,
    started_at: DateTime<Utc>,
    state: watch::Receiver<TripState>,
    outcome: Arc<watch::Sender<LifecycleOutcome>>,
    handle: Option<JoinHandle<()>>,
}

impl Instance {
    fn status(&self, key: &LifecycleKey) -> LifecycleStatus {
        LifecycleStatus {
            key: key.clone(),
            passenger: self.passenger,
            state: *self.state.borrow(),
            outcome: self.outcome.borrow().clone(),
        }
    }
}

/// Owns every lifecycle instance of the process.
///
/// Cloning is cheap; all clones share the same instances. The registry is
/// also the [`SignalSender`] handed to the match cycle: it rejects signals for
/// instances that have finished.
#[derive(Clone)]
pub struct LifecycleRegistry {
    router: SignalRouter,
    actions: SharedTripActions,
    checkpoints: SharedCheckpointStore,
    options: LifecycleOptions,
    telemetry: TripTelemetry,
    instances: Arc<Mutex<HashMap<LifecycleKey, Instance>>>,
}

impl LifecycleRegistry {
    pub fn new(
        actions: SharedTripActions,
        checkpoints: SharedCheckpointStore,
        options: LifecycleOptions,
        telemetry: TripTelemetry,
    ) -> Self {
        Self {
            router: SignalRouter::new(),
            actions,
            checkpoints,
            options,
            telemetry,
            instances: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn telemetry(&self) -> &TripTelemetry {
        &self.telemetry
    }

    /// Starts a fresh lifecycle for `passenger`, suspended in [`TripState::WaitingForMatch`].
    pub fn start(&self, key: LifecycleKey, passenger: PassengerId) -> Result<(), RegistryError> {
        self.ensure_not_running(&key)?;
        self.spawn(LifecycleCheckpoint::new(key, passenger));
        Ok(())
    }

    /// Continues an instance from its stored checkpoint, including buffered signals.
    pub async fn resume(&self, key: &LifecycleKey) -> Result<LifecycleStatus, RegistryError> {
        self.ensure_not_running(key)?;
        let checkpoint = self
            .checkpoints
            .load(key)
            .await?
            .ok_or_else(|| RegistryError::NoCheckpoint(key.clone()))?;
        if checkpoint.state.is_terminal() {
            return Err(RegistryError::Finished(key.clone()));
        }
        info!(key = %key, state = %checkpoint.state, "resuming lifecycle");
        self.spawn(checkpoint);
        self.status(key)
            .ok_or_else(|| RegistryError::UnknownInstance(key.clone()))
    }

    pub fn status(&self, key: &LifecycleKey) -> Option<LifecycleStatus> {
        self.instances.lock().get(key).map(|instance| instance.status(key))
    }

    /// Status of every known instance, ordered by key.
    pub fn statuses(&self) -> Vec<LifecycleStatus> {
        let instances = self.instances.lock();
        let mut statuses: Vec<_> = instances
            .iter()
            .map(|(key, instance)| instance.status(key))
            .collect();
        statuses.sort_by(|a, b| a.key.cmp(&b.key));
        statuses
    }

    pub fn running(&self) -> usize {
        self.instances
            .lock()
            .values()
            .filter(|instance| !instance.outcome.borrow().is_finished())
            .count()
    }

    /// Stops an in-flight instance without compensating anything it already did.
    pub fn abandon(&self, key: &LifecycleKey) -> Result<(), RegistryError> {
        let (outcome, handle, passenger, started_at, state) = {
            let mut instances = self.instances.lock();
            let instance = instances
                .get_mut(key)
                .ok_or_else(|| RegistryError::UnknownInstance(key.clone()))?;
            let state = *instance.state.borrow();
            (
                instance.outcome.clone(),
                instance.handle.take(),
                instance.passenger,
                instance.started_at,
                state,
            )
        };
        if let Some(handle) = handle {
            handle.abort();
        }
        if !settle(&outcome, LifecycleOutcome::Abandoned) {
            return Err(RegistryError::Finished(key.clone()));
        }
        self.router.unregister(key);
        warn!(key = %key, state = %state, "lifecycle abandoned");
        self.telemetry.record_trip(TripRecord {
            key: key.clone(),
            passenger,
            final_state: state,
            outcome: LifecycleOutcome::Abandoned,
            started_at,
            finished_at: Utc::now(),
        });
        Ok(())
    }

    /// Waits until the instance stops running and returns its final status.
    pub async fn wait(&self, key: &LifecycleKey) -> Result<LifecycleStatus, RegistryError> {
        let mut outcome = {
            let instances = self.instances.lock();
            instances
                .get(key)
                .ok_or_else(|| RegistryError::UnknownInstance(key.clone()))?
                .outcome
                .subscribe()
        };
        // The sender lives in the map, so the channel cannot close while we wait.
        let _ = outcome.wait_for(LifecycleOutcome::is_finished).await;
        self.status(key)
            .ok_or_else(|| RegistryError::UnknownInstance(key.clone()))
    }

    fn ensure_not_running(&self, key: &LifecycleKey) -> Result<(), RegistryError> {
        match self.instances.lock().get(key) {
            Some(instance) if !instance.outcome.borrow().is_finished() => {
                Err(RegistryError::AlreadyRunning(key.clone()))
            }
            _ => Ok(()),
        }
    }

    fn spawn(&self, checkpoint: LifecycleCheckpoint) {
        let key = checkpoint.key.clone();
        let passenger = checkpoint.passenger;
        let inbox = self
            .router
            .register_with_pending(key.clone(), checkpoint.pending_signals.clone());
        let lifecycle = TripLifecycle::new(
            checkpoint,
            self.actions.clone(),
            self.checkpoints.clone(),
            self.options.clone(),
        );
        let state = lifecycle.subscribe();
        let (outcome, _) = watch::channel(LifecycleOutcome::Running);
        let outcome = Arc::new(outcome);
        let started_at = Utc::now();

        let handle = tokio::spawn({
            let router = self.router.clone();
            let telemetry = self.telemetry.clone();
            let outcome = outcome.clone();
            let state = state.clone();
            let key = key.clone();
            async move {
                let result = lifecycle.run(inbox).await;
                router.unregister(&key);
                let finished = match result {
                    Ok(_) => LifecycleOutcome::Completed,
                    Err(err) => {
                        error!(key = %key, error = %err, "lifecycle instance failed");
                        LifecycleOutcome::Failed {
                            reason: err.to_string(),
                        }
                    }
                };
                let final_state = *state.borrow();
                if settle(&outcome, finished.clone()) {
                    telemetry.record_trip(TripRecord {
                        key,
                        passenger,
                        final_state,
                        outcome: finished,
                        started_at,
                        finished_at: Utc::now(),
                    });
                }
            }
        });
        self.instances.lock().insert(
            key,
            Instance {
                passenger,
                started_at,
                state,
                outcome,
                handle: Some(handle),
            },
        );
    }
}

/// Moves a running instance to `finished`; false if it had already finished.
fn settle(outcome: &watch::Sender<LifecycleOutcome>, finished: LifecycleOutcome) -> bool {
    outcome.send_if_modified(|current| {
        if current.is_finished() {
            false
        } else {
            *current = finished;
            true
        }
    })
}

impl SignalSender for LifecycleRegistry {
    fn send(&self, key: &LifecycleKey, signal: LifecycleSignal) -> Result<(), SignalError> {
        let known_finished = match self.instances.lock().get(key) {
            Some(instance) => instance.outcome.borrow().is_finished(),
            None => return self.router.send(key, signal),
        };
        if known_finished {
            return Err(SignalError::Closed(key.clone()));
        }
        match self.router.send(key, signal) {
            Err(SignalError::UnknownTarget(_)) => Err(SignalError::Closed(key.clone())),
            other => other,
        }
    }
}
