//! Implicit finite-difference solver for Hamilton-Jacobi-Bellman variational
//! inequalities (HJBVI) arising in continuous-time optimal-stopping and
//! optimal-control problems.
//!
//! The crate discretizes one or two continuous state dimensions (plus a small
//! discrete income/ownership state) on uniform grids, assembles the upwind
//! generator matrix of the controlled process, and iterates an implicit
//! pseudo-time step to a fixed point while enforcing the stopping constraint
//! either through a linear complementarity problem (LCP) or through an
//! explicit upwind switching rule. It provides
//!
//! - uniform grids with boundary-aware interpolation (`grid` module),
//! - validated model configurations for three workhorse models: durable-good
//!   purchase/sale, retirement timing, and two-asset portfolio choice with a
//!   kinked adjustment cost (`model` module),
//! - upwind finite differences and sparse generator assembly (`operator`
//!   module),
//! - an active-set LCP solver and obstacle constructors (`obstacle` module),
//! - the implicit time step and the outer convergence driver (`stepping` and
//!   `solver` modules), and
//! - row-oriented tabulation of converged results (`tabulate` module).
//!
//! # Quick start
//!
//! ```no_run
//! use hjbrs::model::DurableModel;
//! use hjbrs::solver::{solve_durable, SolveOptions};
//! use hjbrs::tabulate::tabulate;
//!
//! let model = DurableModel::standard();
//! let result = solve_durable(&model, &SolveOptions::default()).expect("converged");
//! println!(
//!     "converged in {} iterations, final distance {:e}",
//!     result.iterations,
//!     result.distances.last().unwrap()
//! );
//!
//! // Flatten to one row per grid cell; `at_obstacle` marks the cells where
//! // buying or selling the durable is optimal.
//! let rows = tabulate(&result, &model.state_space()).expect("tabulated");
//! let exercised = rows.iter().filter(|row| row.at_obstacle).count();
//! println!("{exercised} cells sit on the obstacle");
//! ```
//!
//! A solve either returns a complete converged result or a structured error
//! naming the check that failed (improper generator row sums, an unsolved
//! LCP, or an exhausted iteration budget); a value function that fails any of
//! those checks is never returned.

pub mod error;
pub mod grid;
pub mod model;
pub mod obstacle;
pub mod operator;
pub mod solver;
pub mod sparse;
pub mod stepping;
pub mod tabulate;
pub mod utility;

pub use error::{HjbError, Result};
pub use model::{DurableModel, RetirementModel, StateSpace, TwoAssetModel};
pub use solver::{
    solve_durable, solve_retirement, solve_two_asset, solve_two_asset_via_lcp, SolveOptions,
    SolveResult,
};
pub use tabulate::{tabulate, ResultRow};
