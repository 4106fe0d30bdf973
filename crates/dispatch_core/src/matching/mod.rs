pub mod algorithm;
pub mod graph;
pub mod hungarian;
pub mod types;

use std::sync::Arc;

pub use algorithm::AssignmentSolver;
pub use graph::{CostGraph, CostGraphBuilder, DEFAULT_MAX_BATCH};
pub use hungarian::HungarianSolver;
pub use types::{Assignment, CostMatrix, SolveError};

/// Shared handle to the solver used by the match cycle.
pub type SharedSolver = Arc<dyn AssignmentSolver>;
