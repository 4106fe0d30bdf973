//! Runs one lifecycle action with durable-execution semantics.
//!
//! Each attempt races the action against a hard start-to-close timer and, for
//! long actions, a heartbeat watchdog. Timeouts are fatal and never retried.
//! Transient action errors are retried with the policy's exponential backoff
//! until `max_attempts` is reached.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, warn};

use crate::config::RetryPolicy;
use crate::store::StoreError;

#[derive(Debug, Clone, PartialEq)]
pub struct ActivityOptions {
    pub start_to_close: Duration,
    /// Maximum gap between heartbeats; `None` disables the watchdog.
    pub heartbeat_timeout: Option<Duration>,
    pub retry: RetryPolicy,
}

/// Liveness handle passed to every attempt of an action.
#[derive(Debug, Clone)]
pub struct Heartbeat {
    tx: Arc<watch::Sender<u64>>,
}

impl Heartbeat {
    fn channel() -> (Self, watch::Receiver<u64>) {
        let (tx, rx) = watch::channel(0);
        (Self { tx: Arc::new(tx) }, rx)
    }

    /// Reports progress, resetting the heartbeat timeout.
    pub fn record(&self) {
        self.tx.send_modify(|beats| *beats += 1);
    }

    pub fn beats(&self) -> u64 {
        *self.tx.borrow()
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ActivityError {
    #[error("transient failure: {0}")]
    Transient(String),
    #[error("permanent failure: {0}")]
    Permanent(String),
}

impl From<StoreError> for ActivityError {
    fn from(err: StoreError) -> Self {
        if err.is_transient() {
            Self::Transient(err.to_string())
        } else {
            Self::Permanent(err.to_string())
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExecutionError {
    #[error("{activity} missed its heartbeat for {timeout:?}")]
    HeartbeatTimeout { activity: String, timeout: Duration },
    #[error("{activity} did not finish within {timeout:?}")]
    StartToCloseTimeout { activity: String, timeout: Duration },
    #[error("{activity} failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        activity: String,
        attempts: u32,
        last: String,
    },
    #[error("{activity} failed: {reason}")]
    Permanent { activity: String, reason: String },
}

impl ExecutionError {
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::HeartbeatTimeout { .. } | Self::StartToCloseTimeout { .. }
        )
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DurableExecutor;

impl DurableExecutor {
    pub fn new() -> Self {
        Self
    }

    /// Runs `action` until it succeeds, fails permanently, times out or
    /// exhausts its retry policy. `action` is called once per attempt.
    pub async fn run<T, F, Fut>(
        &self,
        activity: &str,
        options: &ActivityOptions,
        mut action: F,
    ) -> Result<T, ExecutionError>
    where
        F: FnMut(Heartbeat) -> Fut,
        Fut: Future<Output = Result<T, ActivityError>>,
    {
        let mut attempt = 1;
        loop {
            let (heartbeat, beats) = Heartbeat::channel();
            // Holding a sender keeps `changed()` pending if the action drops its handle.
            let keepalive = heartbeat.clone();
            debug!(activity, attempt, "activity attempt started");

            let result = tokio::select! {
                result = action(heartbeat) => result,
                _ = tokio::time::sleep(options.start_to_close) => {
                    error!(activity, attempt, timeout = ?options.start_to_close, "activity start-to-close timeout");
                    return Err(ExecutionError::StartToCloseTimeout {
                        activity: activity.to_string(),
                        timeout: options.start_to_close,
                    });
                }
                timeout = watchdog(beats, options.heartbeat_timeout) => {
                    error!(activity, attempt, timeout = ?timeout, "activity heartbeat timeout");
                    return Err(ExecutionError::HeartbeatTimeout {
                        activity: activity.to_string(),
                        timeout,
                    });
                }
            };
            drop(keepalive);

            match result {
                Ok(value) => return Ok(value),
                Err(ActivityError::Permanent(reason)) => {
                    error!(activity, attempt, %reason, "activity failed permanently");
                    return Err(ExecutionError::Permanent {
                        activity: activity.to_string(),
                        reason,
                    });
                }
                Err(ActivityError::Transient(reason)) => {
                    if attempt >= options.retry.max_attempts {
                        error!(activity, attempts = attempt, %reason, "activity retries exhausted");
                        return Err(ExecutionError::RetriesExhausted {
                            activity: activity.to_string(),
                            attempts: attempt,
                            last: reason,
                        });
                    }
                    let delay = options.retry.backoff(attempt);
                    warn!(activity, attempt, %reason, delay = ?delay, "activity failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

/// Resolves with the configured timeout once no heartbeat arrived within it.
async fn watchdog(mut beats: watch::Receiver<u64>, timeout: Option<Duration>) -> Duration {
    let Some(timeout) = timeout else {
        return std::future::pending().await;
    };
    loop {
        match tokio::time::timeout(timeout, beats.changed()).await {
            Ok(Ok(())) => continue,
            Ok(Err(_)) => return std::future::pending().await,
            Err(_) => return timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn options(heartbeat: Option<u64>, attempts: u32) -> ActivityOptions {
        ActivityOptions {
            start_to_close: Duration::from_secs(60),
            heartbeat_timeout: heartbeat.map(Duration::from_secs),
            retry: RetryPolicy {
                max_attempts: attempts,
                ..RetryPolicy::default()
            },
        }
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried_with_backoff() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let started = tokio::time::Instant::now();
        let value = DurableExecutor::new()
            .run("finalize", &options(None, 3), move |_| async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(ActivityError::Transient("store unavailable".into()))
                } else {
                    Ok(7)
                }
            })
            .await
            .expect("third attempt succeeds");
        assert_eq!(value, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let waited = started.elapsed();
        assert!(waited >= Duration::from_secs(3) && waited < Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_report_attempts() {
        let err = DurableExecutor::new()
            .run("finalize", &options(None, 2), |_| async {
                Err::<(), _>(ActivityError::Transient("down".into()))
            })
            .await
            .expect_err("never succeeds");
        assert_eq!(
            err,
            ExecutionError::RetriesExhausted {
                activity: "finalize".into(),
                attempts: 2,
                last: "down".into(),
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_failures_are_not_retried() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let err = DurableExecutor::new()
            .run("end_trip", &options(None, 5), move |_| async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(ActivityError::Permanent("unknown passenger".into()))
            })
            .await
            .expect_err("permanent");
        assert!(matches!(err, ExecutionError::Permanent { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_action_hits_heartbeat_timeout_once() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let err = DurableExecutor::new()
            .run("ride", &options(Some(2), 3), move |_| async move {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(())
            })
            .await
            .expect_err("no heartbeat");
        assert!(err.is_timeout());
        assert!(matches!(err, ExecutionError::HeartbeatTimeout { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeats_keep_long_action_alive() {
        let beats = DurableExecutor::new()
            .run("ride", &options(Some(2), 1), |heartbeat| async move {
                for _ in 0..10 {
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    heartbeat.record();
                }
                Ok(heartbeat.beats())
            })
            .await
            .expect("heartbeats arrive in time");
        assert_eq!(beats, 10);
    }

    #[tokio::test(start_paused = true)]
    async fn start_to_close_bounds_the_attempt() {
        let mut opts = options(None, 3);
        opts.start_to_close = Duration::from_secs(5);
        let err = DurableExecutor::new()
            .run("collect_rating", &opts, |_| async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(())
            })
            .await
            .expect_err("too slow");
        assert_eq!(
            err,
            ExecutionError::StartToCloseTimeout {
                activity: "collect_rating".into(),
                timeout: Duration::from_secs(5),
            }
        );
    }
}
