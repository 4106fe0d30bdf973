use serde::{Deserialize, Serialize};

/// Cost matrix handed to an assignment solver: one row per passenger, one column per driver.
///
/// Rows are stored as given so that malformed input can be reported by [`CostMatrix::validate`]
/// instead of being rejected at construction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CostMatrix {
    rows: Vec<Vec<f64>>,
}

impl CostMatrix {
    pub fn from_rows(rows: Vec<Vec<f64>>) -> Self {
        Self { rows }
    }

    pub fn rows(&self) -> &[Vec<f64>] {
        &self.rows
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn at(&self, row: usize, col: usize) -> f64 {
        self.rows[row][col]
    }

    /// Checks that the matrix is non-empty, square, and holds only finite non-negative costs.
    /// Returns the side length.
    pub fn validate(&self) -> Result<usize, SolveError> {
        let n = self.rows.len();
        if n == 0 {
            return Err(SolveError::InvalidShape { rows: 0, cols: 0 });
        }
        if let Some(row) = self.rows.iter().find(|row| row.len() != n) {
            return Err(SolveError::InvalidShape {
                rows: n,
                cols: row.len(),
            });
        }
        for (i, row) in self.rows.iter().enumerate() {
            for (j, &value) in row.iter().enumerate() {
                if !value.is_finite() {
                    return Err(SolveError::NonFiniteCost { row: i, col: j });
                }
                if value < 0.0 {
                    return Err(SolveError::NegativeCost {
                        row: i,
                        col: j,
                        value,
                    });
                }
            }
        }
        Ok(n)
    }
}

/// Errors raised by the validation step before a solve is attempted.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SolveError {
    #[error("cost matrix must be non-empty and square, got {rows}x{cols}")]
    InvalidShape { rows: usize, cols: usize },
    #[error("cost at ({row},{col}) is negative: {value}")]
    NegativeCost { row: usize, col: usize, value: f64 },
    #[error("cost at ({row},{col}) is not a finite number")]
    NonFiniteCost { row: usize, col: usize },
}

/// Perfect matching on a square cost matrix: `row_to_col[i]` is the column assigned to row `i`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    row_to_col: Vec<usize>,
}

impl Assignment {
    pub fn new(row_to_col: Vec<usize>) -> Self {
        Self { row_to_col }
    }

    pub fn as_slice(&self) -> &[usize] {
        &self.row_to_col
    }

    pub fn len(&self) -> usize {
        self.row_to_col.len()
    }

    pub fn is_empty(&self) -> bool {
        self.row_to_col.is_empty()
    }

    /// `(row, col)` pairs in row order.
    pub fn pairs(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.row_to_col.iter().copied().enumerate()
    }

    pub fn total_cost(&self, cost: &CostMatrix) -> f64 {
        self.pairs().map(|(row, col)| cost.at(row, col)).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_rejects_empty_matrix() {
        let err = CostMatrix::default().validate().expect_err("empty");
        assert_eq!(err, SolveError::InvalidShape { rows: 0, cols: 0 });
    }

    #[test]
    fn validate_rejects_ragged_and_rectangular_rows() {
        let rectangular = CostMatrix::from_rows(vec![vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]]);
        assert_eq!(
            rectangular.validate(),
            Err(SolveError::InvalidShape { rows: 2, cols: 3 })
        );

        let ragged = CostMatrix::from_rows(vec![vec![1.0, 2.0], vec![4.0]]);
        assert_eq!(
            ragged.validate(),
            Err(SolveError::InvalidShape { rows: 2, cols: 1 })
        );
    }

    #[test]
    fn validate_reports_first_negative_cell() {
        let matrix = CostMatrix::from_rows(vec![vec![1.0, 2.0], vec![-0.5, -3.0]]);
        assert_eq!(
            matrix.validate(),
            Err(SolveError::NegativeCost {
                row: 1,
                col: 0,
                value: -0.5
            })
        );
    }

    #[test]
    fn validate_rejects_nan() {
        let matrix = CostMatrix::from_rows(vec![vec![1.0, f64::NAN], vec![0.0, 3.0]]);
        assert_eq!(
            matrix.validate(),
            Err(SolveError::NonFiniteCost { row: 0, col: 1 })
        );
    }

    #[test]
    fn total_cost_sums_assigned_cells() {
        let matrix = CostMatrix::from_rows(vec![vec![1.0, 2.0], vec![3.0, 4.0]]);
        let assignment = Assignment::new(vec![1, 0]);
        assert_eq!(assignment.total_cost(&matrix), 5.0);
    }
}
