//! ECS components backing the in-memory store.
//!
//! Each passenger and driver is one entity holding its record. Marker
//! components carry matching eligibility so a snapshot is a filtered query.

use bevy_ecs::prelude::Component;

use crate::agents::{Driver, Passenger};

#[derive(Debug, Clone, Component)]
pub struct PassengerRecord(pub Passenger);

#[derive(Debug, Clone, Component)]
pub struct DriverRecord(pub Driver);

/// Passenger is eligible for the next match cycle.
#[derive(Debug, Clone, Copy, Default, Component)]
pub struct Waiting;

/// Driver is online and free.
#[derive(Debug, Clone, Copy, Default, Component)]
pub struct Idle;
