//! Builds the square cost graph for one match cycle.
//!
//! Only the first `n = min(cap, passengers, drivers)` entries of each list are
//! used. The store hands passengers oldest-first and drivers longest-idle-first,
//! so truncation always keeps the entities that have waited the longest and
//! bounds the solver at `cap³` work.

use crate::agents::{Driver, DriverId, Passenger, PassengerId};

use super::types::CostMatrix;

/// Default maximum number of passengers (and drivers) considered per cycle.
pub const DEFAULT_MAX_BATCH: usize = 10;

/// Cost matrix plus the ids behind each row and column.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CostGraph {
    pub matrix: CostMatrix,
    pub passengers: Vec<PassengerId>,
    pub drivers: Vec<DriverId>,
}

impl CostGraph {
    pub fn is_empty(&self) -> bool {
        self.matrix.is_empty()
    }

    pub fn size(&self) -> usize {
        self.matrix.len()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CostGraphBuilder {
    max_batch: usize,
}

impl Default for CostGraphBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_BATCH)
    }
}

impl CostGraphBuilder {
    pub fn new(max_batch: usize) -> Self {
        Self { max_batch }
    }

    pub fn max_batch(&self) -> usize {
        self.max_batch
    }

    /// Cell `(i, j)` is `|pickup_i - location_j| / (rating_i + rating_j)`: close,
    /// well-rated pairs are cheap.
    pub fn build(&self, passengers: &[Passenger], drivers: &[Driver]) -> CostGraph {
        let n = self.max_batch.min(passengers.len()).min(drivers.len());
        let passengers = &passengers[..n];
        let drivers = &drivers[..n];

        let rows = passengers
            .iter()
            .map(|passenger| {
                drivers
                    .iter()
                    .map(|driver| pair_cost(passenger, driver))
                    .collect()
            })
            .collect();

        CostGraph {
            matrix: CostMatrix::from_rows(rows),
            passengers: passengers.iter().map(|p| p.id).collect(),
            drivers: drivers.iter().map(|d| d.id).collect(),
        }
    }
}

fn pair_cost(passenger: &Passenger, driver: &Driver) -> f64 {
    passenger.pickup.distance_to(driver.location)
        / (passenger.rating.value() + driver.rating.value())
}
