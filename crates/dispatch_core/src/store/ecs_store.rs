//! In-memory [`Store`] backed by a `bevy_ecs` world.
//!
//! Used by the demo runner and the tests. All operations take one lock on the
//! world, so a compare-and-swap apply is atomic with respect to every other
//! store call.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use bevy_ecs::prelude::{Entity, With, World};
use chrono::Utc;
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::agents::{Driver, DriverId, Location, Passenger, PassengerId, PassengerPhase, Rating};
use crate::ecs::{DriverRecord, Idle, PassengerRecord, Waiting};

use super::{ApplyOutcome, RatingTarget, Snapshot, Store, StoreError, TripTicket};

#[derive(Default)]
struct EcsState {
    world: World,
    passengers: HashMap<PassengerId, Entity>,
    drivers: HashMap<DriverId, Entity>,
    retired_passengers: HashSet<PassengerId>,
    retired_drivers: HashSet<DriverId>,
    /// Number of upcoming calls that fail with [`StoreError::Unavailable`].
    outage_calls: u32,
}

impl EcsState {
    fn check_available(&mut self) -> Result<(), StoreError> {
        if self.outage_calls > 0 {
            self.outage_calls -= 1;
            return Err(StoreError::Unavailable("injected outage".to_string()));
        }
        Ok(())
    }

    fn passenger_entity(&self, id: PassengerId) -> Result<Entity, StoreError> {
        self.passengers
            .get(&id)
            .copied()
            .ok_or(StoreError::UnknownPassenger(id))
    }

    fn driver_entity(&self, id: DriverId) -> Result<Entity, StoreError> {
        self.drivers
            .get(&id)
            .copied()
            .ok_or(StoreError::UnknownDriver(id))
    }

    fn retire_driver(&mut self, id: DriverId) {
        if let Some(entity) = self.drivers.remove(&id) {
            self.world.despawn(entity);
        }
        self.retired_drivers.insert(id);
    }
}

#[derive(Default)]
pub struct EcsStore {
    state: Mutex<EcsState>,
}

impl EcsStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a passenger trip request; the passenger waits for the next cycle.
    pub fn request_trip(&self, passenger: Passenger) {
        let mut state = self.state.lock();
        let id = passenger.id;
        if let Some(previous) = state.passengers.remove(&id) {
            state.world.despawn(previous);
        }
        state.retired_passengers.remove(&id);
        let waiting = passenger.is_waiting();
        let entity = {
            let mut entity = state.world.spawn(PassengerRecord(passenger));
            if waiting {
                entity.insert(Waiting);
            }
            entity.id()
        };
        state.passengers.insert(id, entity);
        debug!(passenger = %id, "trip requested");
    }

    /// Brings a driver online.
    pub fn go_online(&self, driver: Driver) {
        let mut state = self.state.lock();
        let id = driver.id;
        if let Some(previous) = state.drivers.remove(&id) {
            state.world.despawn(previous);
        }
        state.retired_drivers.remove(&id);
        let idle = driver.is_available();
        let entity = {
            let mut entity = state.world.spawn(DriverRecord(driver));
            if idle {
                entity.insert(Idle);
            }
            entity.id()
        };
        state.drivers.insert(id, entity);
        debug!(driver = %id, "driver online");
    }

    /// Takes a driver offline. A driver on a trip is retired once the trip arrives.
    pub fn go_offline(&self, id: DriverId) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        let entity = state.driver_entity(id)?;
        let on_trip = {
            let Some(mut entity) = state.world.get_entity_mut(entity) else {
                return Err(StoreError::UnknownDriver(id));
            };
            entity.remove::<Idle>();
            let Some(mut record) = entity.get_mut::<DriverRecord>() else {
                return Err(StoreError::UnknownDriver(id));
            };
            record.0.online = false;
            let on_trip = record.0.with_passenger.is_some();
            on_trip
        };
        if !on_trip {
            state.retire_driver(id);
        }
        info!(driver = %id, on_trip, "driver offline");
        Ok(())
    }

    pub fn passenger(&self, id: PassengerId) -> Option<Passenger> {
        let state = self.state.lock();
        let entity = state.passengers.get(&id)?;
        state
            .world
            .get::<PassengerRecord>(*entity)
            .map(|record| record.0.clone())
    }

    pub fn driver(&self, id: DriverId) -> Option<Driver> {
        let state = self.state.lock();
        let entity = state.drivers.get(&id)?;
        state
            .world
            .get::<DriverRecord>(*entity)
            .map(|record| record.0.clone())
    }

    pub fn is_retired(&self, id: PassengerId) -> bool {
        self.state.lock().retired_passengers.contains(&id)
    }

    /// Makes the next `calls` store operations fail as unavailable.
    pub fn inject_outage(&self, calls: u32) {
        self.state.lock().outage_calls = calls;
    }
}

#[async_trait]
impl Store for EcsStore {
    async fn snapshot_waiting(&self) -> Result<Snapshot, StoreError> {
        let mut state = self.state.lock();
        state.check_available()?;

        let mut passengers: Vec<Passenger> = {
            let mut query = state
                .world
                .query_filtered::<&PassengerRecord, With<Waiting>>();
            query
                .iter(&state.world)
                .map(|record| record.0.clone())
                .collect()
        };
        passengers.sort_by(|a, b| {
            a.requested_at
                .cmp(&b.requested_at)
                .then_with(|| a.id.cmp(&b.id))
        });

        let mut drivers: Vec<Driver> = {
            let mut query = state.world.query_filtered::<&DriverRecord, With<Idle>>();
            query
                .iter(&state.world)
                .map(|record| record.0.clone())
                .collect()
        };
        drivers.sort_by(|a, b| {
            a.last_trip_end_at
                .cmp(&b.last_trip_end_at)
                .then_with(|| a.id.cmp(&b.id))
        });

        Ok(Snapshot {
            passengers,
            drivers,
        })
    }

    async fn apply_assignment(
        &self,
        passenger: PassengerId,
        driver: DriverId,
    ) -> Result<ApplyOutcome, StoreError> {
        let mut state = self.state.lock();
        state.check_available()?;

        let (Some(&passenger_entity), Some(&driver_entity)) =
            (state.passengers.get(&passenger), state.drivers.get(&driver))
        else {
            return Ok(ApplyOutcome::Conflict);
        };

        let passenger_waiting = state
            .world
            .get_entity(passenger_entity)
            .is_some_and(|entity| entity.contains::<Waiting>());
        let driver_idle = state
            .world
            .get_entity(driver_entity)
            .is_some_and(|entity| entity.contains::<Idle>());
        if !passenger_waiting || !driver_idle {
            return Ok(ApplyOutcome::Conflict);
        }

        if let Some(mut entity) = state.world.get_entity_mut(passenger_entity) {
            entity.remove::<Waiting>();
            if let Some(mut record) = entity.get_mut::<PassengerRecord>() {
                record.0.phase = PassengerPhase::InRide;
                record.0.with_driver = Some(driver);
            }
        }
        if let Some(mut entity) = state.world.get_entity_mut(driver_entity) {
            entity.remove::<Idle>();
            if let Some(mut record) = entity.get_mut::<DriverRecord>() {
                record.0.available = false;
                record.0.with_passenger = Some(passenger);
            }
        }
        Ok(ApplyOutcome::Applied)
    }

    async fn active_trip(&self, passenger: PassengerId) -> Result<TripTicket, StoreError> {
        let mut state = self.state.lock();
        state.check_available()?;
        let entity = state.passenger_entity(passenger)?;
        let record = state
            .world
            .get::<PassengerRecord>(entity)
            .ok_or(StoreError::UnknownPassenger(passenger))?;
        let driver = record
            .0
            .with_driver
            .ok_or(StoreError::NoActiveTrip(passenger))?;
        Ok(TripTicket {
            passenger,
            driver,
            destination: record.0.dropoff,
        })
    }

    async fn finalize_arrival(
        &self,
        driver: DriverId,
        passenger: PassengerId,
        destination: Location,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        state.check_available()?;
        if state.retired_drivers.contains(&driver) {
            return Ok(());
        }
        let entity = state.driver_entity(driver)?;
        let online = {
            let Some(mut entity) = state.world.get_entity_mut(entity) else {
                return Err(StoreError::UnknownDriver(driver));
            };
            let online = {
                let Some(mut record) = entity.get_mut::<DriverRecord>() else {
                    return Err(StoreError::UnknownDriver(driver));
                };
                // Already released, possibly re-matched since.
                if record.0.with_passenger != Some(passenger) {
                    debug!(
                        driver = %driver,
                        passenger = %passenger,
                        serving = ?record.0.with_passenger,
                        "arrival already finalized"
                    );
                    return Ok(());
                }
                record.0.location = destination;
                record.0.available = true;
                record.0.with_passenger = None;
                record.0.last_trip_end_at = Utc::now();
                record.0.online
            };
            if online {
                entity.insert(Idle);
            }
            online
        };
        if !online {
            state.retire_driver(driver);
        }
        Ok(())
    }

    async fn finalize_trip_end(&self, passenger: PassengerId) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        state.check_available()?;
        if state.retired_passengers.contains(&passenger) {
            return Ok(());
        }
        let entity = state.passenger_entity(passenger)?;
        state.world.despawn(entity);
        state.passengers.remove(&passenger);
        state.retired_passengers.insert(passenger);
        Ok(())
    }

    async fn record_rating(&self, target: RatingTarget, score: Rating) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        state.check_available()?;
        match target {
            RatingTarget::Passenger(id) => {
                let entity = state.passenger_entity(id)?;
                let mut record = state
                    .world
                    .get_mut::<PassengerRecord>(entity)
                    .ok_or(StoreError::UnknownPassenger(id))?;
                record.0.rating = record.0.rating.aggregate(score);
            }
            RatingTarget::Driver(id) => {
                if state.retired_drivers.contains(&id) {
                    debug!(driver = %id, "rating for retired driver dropped");
                    return Ok(());
                }
                let entity = state.driver_entity(id)?;
                let mut record = state
                    .world
                    .get_mut::<DriverRecord>(entity)
                    .ok_or(StoreError::UnknownDriver(id))?;
                record.0.rating = record.0.rating.aggregate(score);
            }
        }
        Ok(())
    }
}
