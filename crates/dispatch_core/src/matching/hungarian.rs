//! Hungarian (Kuhn-Munkres) algorithm for minimum-cost perfect bipartite matching.
//!
//! Keeps a feasible labeling (`cost[i][j] >= row[i] + col[j]`) and grows the
//! matching only along tight edges. For each free row an alternating tree is
//! built while a slack vector tracks, per column, the smallest reduced cost
//! from any tree row. When no tight edge leaves the tree the labeling is
//! tightened by the minimum out-of-tree slack, which makes at least one new
//! edge tight. O(n³) overall.

use super::algorithm::AssignmentSolver;
use super::types::{Assignment, CostMatrix, SolveError};

/// Reduced costs within this distance of zero count as tight (absorbs float rounding).
const TIGHT_EPSILON: f64 = 1e-9;

/// Marker for a row or column with no partner yet.
const UNMATCHED: usize = usize::MAX;

/// Row/column labels plus the slack bookkeeping for the tree being grown.
struct Labeling<'a> {
    cost: &'a CostMatrix,
    rows: Vec<f64>,
    cols: Vec<f64>,
    /// Minimum reduced cost from the tree rows to each column.
    slack: Vec<f64>,
    /// Tree row realizing `slack[j]`.
    slack_row: Vec<usize>,
}

impl<'a> Labeling<'a> {
    /// Row label = row minimum, column label = 0.
    fn new(cost: &'a CostMatrix, n: usize) -> Self {
        let rows = cost
            .rows()
            .iter()
            .map(|row| row.iter().copied().fold(f64::INFINITY, f64::min))
            .collect();
        Self {
            cost,
            rows,
            cols: vec![0.0; n],
            slack: vec![0.0; n],
            slack_row: vec![0; n],
        }
    }

    fn n(&self) -> usize {
        self.cols.len()
    }

    fn reduced(&self, row: usize, col: usize) -> f64 {
        self.cost.at(row, col) - self.rows[row] - self.cols[col]
    }

    fn is_tight(&self, row: usize, col: usize) -> bool {
        self.reduced(row, col).abs() <= TIGHT_EPSILON
    }

    /// Starts a new tree at `root`.
    fn reset_slack(&mut self, root: usize) {
        for col in 0..self.n() {
            self.slack[col] = self.reduced(root, col);
            self.slack_row[col] = root;
        }
    }

    /// Folds a row that just joined the tree into the slack of out-of-tree columns.
    fn absorb_row(&mut self, row: usize, in_tree_cols: &[bool]) {
        for col in 0..self.n() {
            if in_tree_cols[col] {
                continue;
            }
            let reduced = self.reduced(row, col);
            if reduced < self.slack[col] {
                self.slack[col] = reduced;
                self.slack_row[col] = row;
            }
        }
    }

    /// First out-of-tree column (scan order) whose slack is zero.
    fn next_tight_col(&self, in_tree_cols: &[bool]) -> Option<usize> {
        (0..self.n()).find(|&col| !in_tree_cols[col] && self.slack[col] <= TIGHT_EPSILON)
    }

    /// Raises tree row labels and lowers tree column labels by the minimum out-of-tree slack.
    fn tighten(&mut self, tree_rows: &[usize], in_tree_cols: &[bool]) {
        let delta = (0..self.n())
            .filter(|&col| !in_tree_cols[col])
            .map(|col| self.slack[col])
            .fold(f64::INFINITY, f64::min);

        for &row in tree_rows {
            self.rows[row] += delta;
        }
        for col in 0..self.n() {
            if in_tree_cols[col] {
                self.cols[col] -= delta;
            } else {
                self.slack[col] -= delta;
            }
        }
    }
}

struct Matching {
    row_to_col: Vec<usize>,
    col_to_row: Vec<usize>,
}

impl Matching {
    fn new(n: usize) -> Self {
        Self {
            row_to_col: vec![UNMATCHED; n],
            col_to_row: vec![UNMATCHED; n],
        }
    }

    fn pair(&mut self, row: usize, col: usize) {
        self.row_to_col[row] = col;
        self.col_to_row[col] = row;
    }

    /// Seeds the matching with tight edges, first free column per row in scan order.
    fn seed_tight(&mut self, labeling: &Labeling<'_>) {
        let n = labeling.n();
        for row in 0..n {
            if let Some(col) = (0..n)
                .find(|&col| self.col_to_row[col] == UNMATCHED && labeling.is_tight(row, col))
            {
                self.pair(row, col);
            }
        }
    }

    /// Flips the alternating path ending at the free column `col`.
    fn augment(&mut self, mut col: usize, parent_row: &[usize]) {
        loop {
            let row = parent_row[col];
            let previous = self.row_to_col[row];
            self.pair(row, col);
            if previous == UNMATCHED {
                break;
            }
            col = previous;
        }
    }

    /// Grows an alternating tree from the free row `root` until an augmenting path is found.
    fn grow_from(&mut self, root: usize, labeling: &mut Labeling<'_>) {
        let n = labeling.n();
        let mut in_tree_cols = vec![false; n];
        let mut parent_row = vec![UNMATCHED; n];
        let mut tree_rows = vec![root];
        labeling.reset_slack(root);

        loop {
            let Some(col) = labeling.next_tight_col(&in_tree_cols) else {
                labeling.tighten(&tree_rows, &in_tree_cols);
                continue;
            };

            in_tree_cols[col] = true;
            parent_row[col] = labeling.slack_row[col];

            match self.col_to_row[col] {
                UNMATCHED => {
                    self.augment(col, &parent_row);
                    return;
                }
                matched_row => {
                    tree_rows.push(matched_row);
                    labeling.absorb_row(matched_row, &in_tree_cols);
                }
            }
        }
    }
}

/// Minimum-cost perfect matching via the labeled Hungarian method.
///
/// Deterministic: ties between equally cheap edges go to the first one found
/// in row/column scan order.
#[derive(Debug, Default, Clone, Copy)]
pub struct HungarianSolver;

impl HungarianSolver {
    pub fn new() -> Self {
        Self
    }
}

impl AssignmentSolver for HungarianSolver {
    fn solve(&self, cost: &CostMatrix) -> Result<Assignment, SolveError> {
        solve(cost)
    }
}

/// Validates `cost` and returns the minimum-cost row -> column assignment.
pub fn solve(cost: &CostMatrix) -> Result<Assignment, SolveError> {
    let n = cost.validate()?;

    let mut labeling = Labeling::new(cost, n);
    let mut matching = Matching::new(n);
    matching.seed_tight(&labeling);

    for root in 0..n {
        if matching.row_to_col[root] == UNMATCHED {
            matching.grow_from(root, &mut labeling);
        }
    }

    Ok(Assignment::new(matching.row_to_col))
}
