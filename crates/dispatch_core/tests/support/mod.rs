#![allow(dead_code)]

pub mod actions;
pub mod stores;

use std::time::Duration;

use dispatch_core::config::RetryPolicy;
use dispatch_core::executor::ActivityOptions;
use dispatch_core::lifecycle::LifecycleOptions;

/// Lifecycle options with short, round timeouts for paused-clock tests.
pub fn test_options() -> LifecycleOptions {
    let retry = RetryPolicy {
        max_attempts: 3,
        initial_interval_ms: 1_000,
        backoff_coefficient: 2.0,
        max_interval_ms: 10_000,
    };
    LifecycleOptions {
        ride: ActivityOptions {
            start_to_close: Duration::from_secs(60),
            heartbeat_timeout: Some(Duration::from_secs(5)),
            retry: retry.clone(),
        },
        rating: ActivityOptions {
            start_to_close: Duration::from_secs(30),
            heartbeat_timeout: None,
            retry: RetryPolicy::no_retry(),
        },
        finalize: ActivityOptions {
            start_to_close: Duration::from_secs(10),
            heartbeat_timeout: None,
            retry,
        },
    }
}
