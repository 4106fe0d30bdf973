//! Periodic trigger for the match cycle.
//!
//! Cycles run inline on one task, so they never overlap; ticks missed while a
//! cycle was running are skipped rather than replayed.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

use crate::cycle::{CycleError, CycleReport, MatchCycle};
use crate::telemetry::{CycleRecord, TripTelemetry};

/// Time range covered by one cycle. Logged for observability; the snapshot is
/// always everything currently waiting or available.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleWindow {
    pub last_run: Option<DateTime<Utc>>,
    pub this_run: DateTime<Utc>,
}

pub struct MatchScheduler {
    cycle: Arc<MatchCycle>,
    period: Duration,
    telemetry: TripTelemetry,
    last_run: Option<DateTime<Utc>>,
}

impl MatchScheduler {
    pub fn new(cycle: Arc<MatchCycle>, period: Duration, telemetry: TripTelemetry) -> Self {
        Self {
            cycle,
            period,
            telemetry,
            last_run: None,
        }
    }

    pub fn last_run(&self) -> Option<DateTime<Utc>> {
        self.last_run
    }

    /// Runs one cycle now and records it.
    pub async fn tick(&mut self) -> Result<CycleReport, CycleError> {
        let window = CycleWindow {
            last_run: self.last_run,
            this_run: Utc::now(),
        };
        self.last_run = Some(window.this_run);
        info!(last_run = ?window.last_run, this_run = %window.this_run, "match cycle started");

        let result = self.cycle.run().await;
        let record = match &result {
            Ok(report) => {
                info!(
                    considered = report.considered,
                    applied = report.applied.len(),
                    conflicts = report.conflicts.len(),
                    undelivered = report.undelivered.len(),
                    "match cycle finished"
                );
                CycleRecord {
                    started_at: window.this_run,
                    finished_at: Utc::now(),
                    considered: report.considered,
                    applied: report.applied.len(),
                    conflicts: report.conflicts.len(),
                    undelivered: report.undelivered.len(),
                    error: None,
                }
            }
            Err(err) => {
                error!(error = %err, "match cycle failed");
                let applied = match err {
                    CycleError::Apply { applied, .. } => applied.len(),
                    _ => 0,
                };
                CycleRecord {
                    started_at: window.this_run,
                    finished_at: Utc::now(),
                    considered: 0,
                    applied,
                    conflicts: 0,
                    undelivered: 0,
                    error: Some(err.to_string()),
                }
            }
        };
        self.telemetry.record_cycle(record);
        result
    }

    /// Ticks every period until `shutdown` flips to true or its sender is dropped.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(period = ?self.period, "match scheduler started");
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    // Failures are recorded; the next tick retries from a fresh snapshot.
                    let _ = self.tick().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("match scheduler stopped");
    }

    pub fn spawn(self) -> SchedulerHandle {
        let (shutdown, rx) = watch::channel(false);
        let join = tokio::spawn(self.run(rx));
        SchedulerHandle { shutdown, join }
    }
}

pub struct SchedulerHandle {
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Signals shutdown and waits for the in-flight cycle, if any, to finish.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(err) = self.join.await {
            error!(error = %err, "match scheduler task ended abnormally");
        }
    }
}
