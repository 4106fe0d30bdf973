use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::agents::{LifecycleKey, PassengerId, Rating};
use crate::signal::LifecycleSignal;

use super::state::TripState;

/// Everything needed to resume a lifecycle instance where it stopped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleCheckpoint {
    pub key: LifecycleKey,
    pub passenger: PassengerId,
    pub state: TripState,
    /// Signals delivered but not consumed yet, in arrival order.
    #[serde(default)]
    pub pending_signals: Vec<LifecycleSignal>,
    /// Score the driver gave the passenger.
    #[serde(default)]
    pub driver_rating: Option<Rating>,
    /// Score the passenger gave the driver.
    #[serde(default)]
    pub passenger_rating: Option<Rating>,
    #[serde(default)]
    pub arrival_finalized: bool,
    /// `driver_rating` has been folded into the passenger's rating.
    #[serde(default)]
    pub driver_rating_recorded: bool,
    /// `passenger_rating` has been folded into the driver's rating.
    #[serde(default)]
    pub passenger_rating_recorded: bool,
    #[serde(default)]
    pub failure: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl LifecycleCheckpoint {
    pub fn new(key: LifecycleKey, passenger: PassengerId) -> Self {
        Self {
            key,
            passenger,
            state: TripState::WaitingForMatch,
            pending_signals: Vec::new(),
            driver_rating: None,
            passenger_rating: None,
            arrival_finalized: false,
            driver_rating_recorded: false,
            passenger_rating_recorded: false,
            failure: None,
            updated_at: Utc::now(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("checkpoint encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),
    #[error("checkpoint store unavailable: {0}")]
    Unavailable(String),
}

/// Persistence for lifecycle checkpoints, keyed by lifecycle key.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Replaces the stored checkpoint for `checkpoint.key`.
    async fn save(&self, checkpoint: &LifecycleCheckpoint) -> Result<(), CheckpointError>;

    async fn load(&self, key: &LifecycleKey) -> Result<Option<LifecycleCheckpoint>, CheckpointError>;
}

pub type SharedCheckpointStore = Arc<dyn CheckpointStore>;

/// Keeps checkpoints as JSON documents in memory.
#[derive(Debug, Default)]
pub struct InMemoryCheckpoints {
    documents: Mutex<HashMap<LifecycleKey, String>>,
    saves: Mutex<u64>,
}

impl InMemoryCheckpoints {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of successful saves.
    pub fn save_count(&self) -> u64 {
        *self.saves.lock()
    }

    /// Raw stored document, as written.
    pub fn document(&self, key: &LifecycleKey) -> Option<String> {
        self.documents.lock().get(key).cloned()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpoints {
    async fn save(&self, checkpoint: &LifecycleCheckpoint) -> Result<(), CheckpointError> {
        let document = serde_json::to_string(checkpoint)?;
        self.documents
            .lock()
            .insert(checkpoint.key.clone(), document);
        *self.saves.lock() += 1;
        Ok(())
    }

    async fn load(&self, key: &LifecycleKey) -> Result<Option<LifecycleCheckpoint>, CheckpointError> {
        let document = self.documents.lock().get(key).cloned();
        document
            .map(|document| serde_json::from_str(&document).map_err(CheckpointError::from))
            .transpose()
    }
}
