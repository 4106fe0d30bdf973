pub mod activities;
pub mod agents;
pub mod config;
pub mod cycle;
pub mod ecs;
pub mod executor;
pub mod lifecycle;
pub mod logging;
pub mod matching;
pub mod scheduler;
pub mod signal;
pub mod store;
pub mod telemetry;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;
