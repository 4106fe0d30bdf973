//! Matching and trip lifecycles wired together over the in-memory store.

use std::sync::Arc;
use std::time::Duration;

use dispatch_core::activities::{RatingBoard, RatingSide, RideDurationModel, StoreTripActions};
use dispatch_core::agents::{DriverId, LifecycleKey, Location, PassengerId};
use dispatch_core::config::DispatchConfig;
use dispatch_core::cycle::MatchCycle;
use dispatch_core::lifecycle::{
    InMemoryCheckpoints, LifecycleOptions, LifecycleOutcome, LifecycleRegistry, TripState,
};
use dispatch_core::matching::{CostGraphBuilder, HungarianSolver};
use dispatch_core::scheduler::MatchScheduler;
use dispatch_core::signal::{LifecycleSignal, SignalSender};
use dispatch_core::store::EcsStore;
use dispatch_core::telemetry::TripTelemetry;
use dispatch_core::test_helpers::{driver, passenger, rating};

struct Dispatch {
    store: Arc<EcsStore>,
    ratings: RatingBoard,
    registry: LifecycleRegistry,
    cycle: Arc<MatchCycle>,
}

fn dispatch() -> Dispatch {
    let config = DispatchConfig::from_json_str(r#"{"ride": {"max_duration_ms": 20000}}"#)
        .expect("config");
    let store = Arc::new(EcsStore::new());
    let ratings = RatingBoard::new();
    let actions = StoreTripActions::new(
        store.clone(),
        ratings.clone(),
        RideDurationModel::new(Some(7), &config.ride),
        config.ride.heartbeat_interval(),
        config.lifecycle.rating.window(),
    );
    let registry = LifecycleRegistry::new(
        Arc::new(actions),
        Arc::new(InMemoryCheckpoints::new()),
        LifecycleOptions::from_config(&config),
        TripTelemetry::new(),
    );
    let cycle = Arc::new(MatchCycle::new(
        store.clone(),
        Arc::new(HungarianSolver::new()),
        CostGraphBuilder::new(config.matching.max_batch),
        Arc::new(registry.clone()),
    ));
    Dispatch {
        store,
        ratings,
        registry,
        cycle,
    }
}

impl Dispatch {
    /// Requests a trip and starts its lifecycle; the client already agreed to pay
    /// and both sides will rate each other.
    fn request(&self, id: u64, pickup: i64, dropoff: i64) -> LifecycleKey {
        let rider = passenger(id, pickup, dropoff);
        let key = rider.lifecycle_key.clone();
        self.store.request_trip(rider);
        self.registry
            .start(key.clone(), PassengerId(id))
            .expect("start lifecycle");
        self.ratings
            .submit(key.clone(), RatingSide::DriverRatesPassenger, rating(4.0));
        self.ratings
            .submit(key.clone(), RatingSide::PassengerRatesDriver, rating(3.0));
        self.registry
            .send(&key, LifecycleSignal::Payment(true))
            .expect("payment");
        key
    }
}

#[tokio::test(start_paused = true)]
async fn matched_trips_run_to_completion() {
    let dispatch = dispatch();
    let keys: Vec<_> = [(1, 3, 40), (2, 9, 50), (3, 20, 60)]
        .into_iter()
        .map(|(id, pickup, dropoff)| dispatch.request(id, pickup, dropoff))
        .collect();
    for (id, location) in [(1, 8), (2, 15), (3, 21)] {
        dispatch.store.go_online(driver(id, location));
    }

    let report = dispatch.cycle.run().await.expect("cycle");
    assert_eq!(
        report.applied,
        vec![
            (PassengerId(1), DriverId(1)),
            (PassengerId(2), DriverId(2)),
            (PassengerId(3), DriverId(3)),
        ]
    );
    assert!(report.undelivered.is_empty());

    for key in &keys {
        let status = dispatch.registry.wait(key).await.expect("wait");
        assert_eq!(status.outcome, LifecycleOutcome::Completed, "{key}");
        assert_eq!(status.state, TripState::Completed);
    }

    for (id, dropoff) in [(1, 40), (2, 50), (3, 60)] {
        let driver = dispatch.store.driver(DriverId(id)).expect("driver");
        assert_eq!(driver.location, Location(dropoff));
        assert!(driver.is_available());
        assert_eq!(driver.rating.value(), 4.0);
        assert!(dispatch.store.is_retired(PassengerId(id)));
    }
    assert_eq!(dispatch.ratings.pending(), 0);
    assert_eq!(dispatch.registry.telemetry().summary().trips_completed, 3);
}

#[tokio::test(start_paused = true)]
async fn unmatched_passengers_wait_for_a_later_cycle() {
    let dispatch = dispatch();
    let first = dispatch.request(1, 0, 10);
    let second = dispatch.request(2, 5, 30);
    dispatch.store.go_online(driver(1, 4));

    let report = dispatch.cycle.run().await.expect("cycle");
    assert_eq!(report.applied, vec![(PassengerId(1), DriverId(1))]);
    dispatch.registry.wait(&first).await.expect("wait");
    assert_eq!(
        dispatch.registry.status(&second).expect("status").state,
        TripState::WaitingForMatch
    );

    // The driver is idle again at the first dropoff.
    let report = dispatch.cycle.run().await.expect("cycle");
    assert_eq!(report.applied, vec![(PassengerId(2), DriverId(1))]);
    let status = dispatch.registry.wait(&second).await.expect("wait");
    assert_eq!(status.outcome, LifecycleOutcome::Completed);
    assert_eq!(
        dispatch.store.driver(DriverId(1)).expect("driver").location,
        Location(30)
    );
}

#[tokio::test(start_paused = true)]
async fn scheduler_drives_cycles_until_stopped() {
    let dispatch = dispatch();
    let key = dispatch.request(1, 0, 10);
    dispatch.store.go_online(driver(1, 2));

    let telemetry = dispatch.registry.telemetry().clone();
    let handle = MatchScheduler::new(
        dispatch.cycle.clone(),
        Duration::from_secs(30),
        telemetry.clone(),
    )
    .spawn();

    let status = dispatch.registry.wait(&key).await.expect("wait");
    assert_eq!(status.outcome, LifecycleOutcome::Completed);
    tokio::time::sleep(Duration::from_secs(61)).await;
    handle.stop().await;

    let cycles = telemetry.cycles();
    assert!(cycles.len() >= 3, "ran {} cycles", cycles.len());
    assert_eq!(cycles[0].applied, 1);
    assert!(cycles[1..].iter().all(|cycle| cycle.applied == 0));
    assert!(cycles.iter().all(|cycle| cycle.error.is_none()));

    let summary = telemetry.summary();
    assert_eq!(summary.pairs_applied, 1);
    assert_eq!(summary.trips_completed, 1);
}

#[tokio::test(start_paused = true)]
async fn scheduler_records_failed_cycles_and_keeps_going() {
    let dispatch = dispatch();
    dispatch.request(1, 0, 10);
    dispatch.store.go_online(driver(1, 2));
    dispatch.store.inject_outage(1);

    let telemetry = TripTelemetry::new();
    let mut scheduler = MatchScheduler::new(
        dispatch.cycle.clone(),
        Duration::from_secs(30),
        telemetry.clone(),
    );
    assert!(scheduler.last_run().is_none());
    assert!(scheduler.tick().await.is_err());
    assert!(scheduler.last_run().is_some());
    let report = scheduler.tick().await.expect("second cycle");
    assert_eq!(report.applied.len(), 1);

    let summary = telemetry.summary();
    assert_eq!(summary.cycles, 2);
    assert_eq!(summary.failed_cycles, 1);
    assert_eq!(summary.pairs_applied, 1);
}
