//! Telemetry: records match cycles and finished trips for the run summary.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::agents::{LifecycleKey, PassengerId};
use crate::lifecycle::{LifecycleOutcome, TripState};

/// One match cycle, recorded whether it succeeded or not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleRecord {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Size of the solved batch.
    pub considered: usize,
    pub applied: usize,
    pub conflicts: usize,
    pub undelivered: usize,
    pub error: Option<String>,
}

/// One lifecycle instance that stopped running.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TripRecord {
    pub key: LifecycleKey,
    pub passenger: PassengerId,
    pub final_state: TripState,
    pub outcome: LifecycleOutcome,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl TripRecord {
    /// Wall-clock time the instance ran, in milliseconds.
    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds().max(0)
    }
}

/// Aggregated counts over everything recorded so far.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySummary {
    pub cycles: usize,
    pub failed_cycles: usize,
    pub pairs_applied: usize,
    pub conflicts: usize,
    pub trips_completed: usize,
    pub trips_failed: usize,
    pub trips_abandoned: usize,
}

#[derive(Debug, Default)]
struct TelemetryLog {
    cycles: Vec<CycleRecord>,
    trips: Vec<TripRecord>,
}

/// Shared, cloneable telemetry sink.
#[derive(Debug, Clone, Default)]
pub struct TripTelemetry {
    log: Arc<Mutex<TelemetryLog>>,
}

impl TripTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_cycle(&self, record: CycleRecord) {
        self.log.lock().cycles.push(record);
    }

    pub fn record_trip(&self, record: TripRecord) {
        self.log.lock().trips.push(record);
    }

    pub fn cycles(&self) -> Vec<CycleRecord> {
        self.log.lock().cycles.clone()
    }

    pub fn trips(&self) -> Vec<TripRecord> {
        self.log.lock().trips.clone()
    }

    pub fn summary(&self) -> TelemetrySummary {
        let log = self.log.lock();
        let mut summary = TelemetrySummary {
            cycles: log.cycles.len(),
            ..TelemetrySummary::default()
        };
        for cycle in &log.cycles {
            if cycle.error.is_some() {
                summary.failed_cycles += 1;
            }
            summary.pairs_applied += cycle.applied;
            summary.conflicts += cycle.conflicts;
        }
        for trip in &log.trips {
            match trip.outcome {
                LifecycleOutcome::Completed => summary.trips_completed += 1,
                LifecycleOutcome::Failed { .. } => summary.trips_failed += 1,
                LifecycleOutcome::Abandoned => summary.trips_abandoned += 1,
                LifecycleOutcome::Running => {}
            }
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn trip(outcome: LifecycleOutcome) -> TripRecord {
        let started_at = Utc::now();
        TripRecord {
            key: LifecycleKey::new("trip-1"),
            passenger: PassengerId(1),
            final_state: TripState::Completed,
            outcome,
            started_at,
            finished_at: started_at + Duration::milliseconds(1_500),
        }
    }

    #[test]
    fn summary_counts_cycles_and_outcomes() {
        let telemetry = TripTelemetry::new();
        let now = Utc::now();
        telemetry.record_cycle(CycleRecord {
            started_at: now,
            finished_at: now,
            considered: 3,
            applied: 2,
            conflicts: 1,
            undelivered: 0,
            error: None,
        });
        telemetry.record_cycle(CycleRecord {
            started_at: now,
            finished_at: now,
            considered: 0,
            applied: 0,
            conflicts: 0,
            undelivered: 0,
            error: Some("store unavailable".into()),
        });
        telemetry.record_trip(trip(LifecycleOutcome::Completed));
        telemetry.record_trip(trip(LifecycleOutcome::Failed {
            reason: "ride timed out".into(),
        }));

        let summary = telemetry.summary();
        assert_eq!(summary.cycles, 2);
        assert_eq!(summary.failed_cycles, 1);
        assert_eq!(summary.pairs_applied, 2);
        assert_eq!(summary.conflicts, 1);
        assert_eq!(summary.trips_completed, 1);
        assert_eq!(summary.trips_failed, 1);
        assert_eq!(summary.trips_abandoned, 0);
    }

    #[test]
    fn trip_duration_is_in_milliseconds() {
        assert_eq!(trip(LifecycleOutcome::Completed).duration_ms(), 1_500);
    }
}
