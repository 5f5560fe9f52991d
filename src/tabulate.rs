//! Row-oriented flattening of solver output for downstream consumers.

use serde::Serialize;

use crate::error::{HjbError, Result};
use crate::model::StateSpace;
use crate::solver::SolveResult;

/// Absolute floor of the obstacle near-equality test.
const AT_OBSTACLE_ABSOLUTE: f64 = 1e-10;
/// Relative tolerance of the obstacle near-equality test.
const AT_OBSTACLE_RELATIVE: f64 = 1e-8;

/// One grid cell of a converged solve, flattened for tabular consumers.
#[derive(Clone, Debug, Serialize)]
pub struct ResultRow {
    /// Flat index of the cell in the solver's ordering.
    pub index: usize,
    /// Discrete state (ownership flag or income state).
    pub discrete_state: usize,
    /// First continuous state (wealth, or liquid holdings).
    pub x1: f64,
    /// Second continuous state (illiquid holdings), when there is one.
    pub x2: Option<f64>,
    /// Converged value.
    pub value: f64,
    /// Obstacle (shadow) value at the cell.
    pub obstacle: f64,
    /// Consumption policy.
    pub consumption: f64,
    /// Net drift of the (liquid) continuous state.
    pub drift: f64,
    /// Transfer into the illiquid account, when the model has one.
    pub deposit: Option<f64>,
    /// Whether the value sits on the obstacle (stopping/exercise region).
    pub at_obstacle: bool,
}

fn near_equal(a: f64, b: f64) -> bool {
    (a - b).abs() <= AT_OBSTACLE_ABSOLUTE + AT_OBSTACLE_RELATIVE * a.abs().max(b.abs())
}

/// Flattens a [`SolveResult`] into one row per grid cell.
pub fn tabulate(result: &SolveResult, space: &StateSpace) -> Result<Vec<ResultRow>> {
    let total = space.total_unknowns();
    if result.value.len() != total {
        return Err(HjbError::dimension_mismatch("tabulation", total, result.value.len()));
    }

    let mut rows = Vec::with_capacity(total);
    for index in 0..total {
        let (discrete_state, x1, x2) = locate(space, index);
        rows.push(ResultRow {
            index,
            discrete_state,
            x1,
            x2,
            value: result.value[index],
            obstacle: result.obstacle[index],
            consumption: result.consumption[index],
            drift: result.drift[index],
            deposit: result.deposit.as_ref().map(|d| d[index]),
            at_obstacle: near_equal(result.value[index], result.obstacle[index]),
        });
    }
    Ok(rows)
}

fn locate(space: &StateSpace, index: usize) -> (usize, f64, Option<f64>) {
    match space {
        StateSpace::OneDim { grid, n_discrete } => {
            let k = index % n_discrete;
            let i = index / n_discrete;
            (k, grid.point(i), None)
        }
        StateSpace::TwoDim {
            liquid,
            illiquid,
            n_discrete,
        } => {
            let k = index % n_discrete;
            let rest = index / n_discrete;
            let i = rest % liquid.len();
            let j = rest / liquid.len();
            (k, liquid.point(i), Some(illiquid.point(j)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::DVector;

    use crate::grid::Grid;

    fn toy_result(n: usize) -> SolveResult {
        SolveResult {
            value: DVector::from_fn(n, |i, _| i as f64),
            obstacle: DVector::from_fn(n, |i, _| if i == 2 { 2.0 } else { -100.0 }),
            consumption: DVector::from_element(n, 0.5),
            drift: DVector::from_element(n, 0.0),
            deposit: None,
            iterations: 1,
            distances: vec![0.0],
        }
    }

    #[test]
    fn tabulation_covers_every_cell_and_flags_the_obstacle() {
        let space = StateSpace::OneDim {
            grid: Grid::new("x", 0.0, 1.0, 3).unwrap(),
            n_discrete: 2,
        };
        let rows = tabulate(&toy_result(6), &space).unwrap();

        assert_eq!(rows.len(), 6);
        assert!(rows[2].at_obstacle);
        assert_eq!(rows.iter().filter(|row| row.at_obstacle).count(), 1);
        // Layout: discrete state interleaved fastest.
        assert_eq!(rows[3].discrete_state, 1);
        assert_eq!(rows[3].x1, 0.5);
        assert!(rows[3].x2.is_none());
    }

    #[test]
    fn rows_serialize_to_json() {
        let space = StateSpace::OneDim {
            grid: Grid::new("x", 0.0, 1.0, 3).unwrap(),
            n_discrete: 2,
        };
        let rows = tabulate(&toy_result(6), &space).unwrap();
        let json = serde_json::to_string(&rows[0]).unwrap();
        assert!(json.contains("\"at_obstacle\":false"));
        assert!(json.contains("\"x2\":null"));
    }

    #[test]
    fn dimension_mismatch_is_reported() {
        let space = StateSpace::OneDim {
            grid: Grid::new("x", 0.0, 1.0, 4).unwrap(),
            n_discrete: 2,
        };
        assert!(tabulate(&toy_result(6), &space).is_err());
    }
}
