use super::types::{Assignment, CostMatrix, SolveError};

/// Trait for assignment solvers that pair every row of a square cost matrix with one column.
///
/// A solver validates its input first and must not do any work on a malformed
/// matrix. On success the returned [`Assignment`] is a permutation: each row
/// and each column is used exactly once, and the total cost is minimal.
///
/// # Examples
///
/// ```rust
/// use dispatch_core::matching::{AssignmentSolver, CostMatrix, HungarianSolver};
///
/// let cost = CostMatrix::from_rows(vec![vec![0.5, 1.2], vec![0.1, 0.6]]);
/// let assignment = HungarianSolver::new().solve(&cost).unwrap();
/// assert_eq!(assignment.as_slice(), &[0, 1]);
/// ```
pub trait AssignmentSolver: Send + Sync {
    fn solve(&self, cost: &CostMatrix) -> Result<Assignment, SolveError>;
}
