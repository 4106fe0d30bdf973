//! One matching round: snapshot, build, solve, apply, notify.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::agents::{DriverId, LifecycleKey, PassengerId};
use crate::matching::{CostGraphBuilder, SharedSolver, SolveError};
use crate::signal::{LifecycleSignal, SignalSender};
use crate::store::{ApplyOutcome, SharedStore, StoreError};

/// A pairing that was applied in the store but whose lifecycle never heard about it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UndeliveredMatch {
    pub passenger: PassengerId,
    pub driver: DriverId,
    pub key: LifecycleKey,
    pub reason: String,
}

/// What one cycle did.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CycleReport {
    /// Size of the solved batch (0 when there was nothing to match).
    pub considered: usize,
    pub applied: Vec<(PassengerId, DriverId)>,
    pub conflicts: Vec<(PassengerId, DriverId)>,
    pub undelivered: Vec<UndeliveredMatch>,
}

#[derive(Debug, thiserror::Error)]
pub enum CycleError {
    #[error("snapshot failed: {0}")]
    Snapshot(#[source] StoreError),
    #[error("solver rejected the cost matrix: {0}")]
    Solve(#[from] SolveError),
    /// Store failure mid-apply. Pairs listed in `applied` stay applied; the rest
    /// remain eligible for the next cycle.
    #[error("applying {passenger} -> {driver} failed after {} applied pairs: {source}", .applied.len())]
    Apply {
        passenger: PassengerId,
        driver: DriverId,
        #[source]
        source: StoreError,
        applied: Vec<(PassengerId, DriverId)>,
    },
}

pub struct MatchCycle {
    store: SharedStore,
    solver: SharedSolver,
    builder: CostGraphBuilder,
    signals: Arc<dyn SignalSender>,
}

impl MatchCycle {
    pub fn new(
        store: SharedStore,
        solver: SharedSolver,
        builder: CostGraphBuilder,
        signals: Arc<dyn SignalSender>,
    ) -> Self {
        Self {
            store,
            solver,
            builder,
            signals,
        }
    }

    pub async fn run(&self) -> Result<CycleReport, CycleError> {
        let snapshot = self
            .store
            .snapshot_waiting()
            .await
            .map_err(CycleError::Snapshot)?;
        if snapshot.is_empty() {
            debug!(
                passengers = snapshot.passengers.len(),
                drivers = snapshot.drivers.len(),
                "nothing to match"
            );
            return Ok(CycleReport::default());
        }

        let graph = self.builder.build(&snapshot.passengers, &snapshot.drivers);
        let assignment = self.solver.solve(&graph.matrix)?;
        info!(
            batch = graph.size(),
            max_batch = self.builder.max_batch(),
            waiting = snapshot.passengers.len(),
            available = snapshot.drivers.len(),
            total_cost = assignment.total_cost(&graph.matrix),
            "assignment solved"
        );

        let keys: Vec<LifecycleKey> = snapshot
            .passengers
            .iter()
            .take(graph.size())
            .map(|passenger| passenger.lifecycle_key.clone())
            .collect();

        let mut report = CycleReport {
            considered: graph.size(),
            ..CycleReport::default()
        };
        for (row, col) in assignment.pairs() {
            let passenger = graph.passengers[row];
            let driver = graph.drivers[col];
            match self.store.apply_assignment(passenger, driver).await {
                Ok(ApplyOutcome::Applied) => {
                    report.applied.push((passenger, driver));
                    info!(passenger = %passenger, driver = %driver, "pair applied");
                    let key = &keys[row];
                    if let Err(err) = self.signals.send(key, LifecycleSignal::Match(true)) {
                        error!(
                            passenger = %passenger,
                            driver = %driver,
                            key = %key,
                            error = %err,
                            "match signal not delivered"
                        );
                        report.undelivered.push(UndeliveredMatch {
                            passenger,
                            driver,
                            key: key.clone(),
                            reason: err.to_string(),
                        });
                    }
                }
                Ok(ApplyOutcome::Conflict) => {
                    warn!(passenger = %passenger, driver = %driver, "pair conflicted, skipped");
                    report.conflicts.push((passenger, driver));
                }
                Err(source) => {
                    error!(
                        passenger = %passenger,
                        driver = %driver,
                        error = %source,
                        "apply failed, aborting cycle"
                    );
                    return Err(CycleError::Apply {
                        passenger,
                        driver,
                        source,
                        applied: report.applied,
                    });
                }
            }
        }
        Ok(report)
    }
}
