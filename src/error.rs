use thiserror::Error;

/// Unified error type for `hjbrs` operations.
#[derive(Debug, Error)]
pub enum HjbError {
    /// Raised when grid parameters cannot describe a valid discretization.
    #[error("invalid grid in {context}: {detail}")]
    InvalidGrid {
        /// Human-readable context describing which grid was rejected.
        context: &'static str,
        /// What was wrong with the supplied parameters.
        detail: String,
    },

    /// Raised when an economic coefficient is outside its admissible range.
    #[error("invalid parameter `{name}`: {value} ({detail})")]
    InvalidParameter {
        name: &'static str,
        value: f64,
        detail: &'static str,
    },

    /// Raised when provided arrays or matrices have incompatible dimensions.
    #[error("dimension mismatch in {context}: expected {expected} but found {found}")]
    DimensionMismatch {
        /// Human-readable context describing the operation.
        context: &'static str,
        /// The required dimension, often the model-implied value.
        expected: usize,
        /// The dimension that was actually supplied.
        found: usize,
    },

    /// Raised when the assembled generator matrix is not a valid transition-rate
    /// matrix: some row sum exceeds the conservation tolerance.
    #[error(
        "improper transition matrix at iteration {iteration}: row {row} sums to {row_sum:e} \
         (tolerance {tolerance:e})"
    )]
    ImproperGenerator {
        /// Outer iteration at which the violation was detected.
        iteration: usize,
        /// Worst-offending matrix row.
        row: usize,
        /// The signed row sum of that row.
        row_sum: f64,
        /// Conservation tolerance that was exceeded.
        tolerance: f64,
    },

    /// Raised when the linear complementarity solve leaves a residual above tolerance.
    #[error(
        "LCP not solved at iteration {iteration}: complementarity residual {residual:e} \
         exceeds {tolerance:e}"
    )]
    Complementarity {
        iteration: usize,
        residual: f64,
        tolerance: f64,
    },

    /// Raised when the banded factorization encounters an unusable pivot.
    #[error("singular implicit system in {context}: pivot {pivot:e} at row {row}")]
    SingularSystem {
        context: &'static str,
        row: usize,
        pivot: f64,
    },

    /// Raised when the value-function iteration exhausts its budget.
    #[error(
        "value function iteration did not converge after {iterations} iterations; \
         last distance {last_distance:e}"
    )]
    DidNotConverge {
        /// Number of iterations performed before termination.
        iterations: usize,
        /// Maximum absolute value-function change in the last iteration.
        last_distance: f64,
    },

    /// Raised when numerical routines produce NaN or infinity.
    #[error("encountered a non-finite value during {context}")]
    NumericalError { context: &'static str },
}

impl HjbError {
    /// Helper to format a [`DimensionMismatch`](HjbError::DimensionMismatch) error.
    pub fn dimension_mismatch(context: &'static str, expected: usize, found: usize) -> Self {
        Self::DimensionMismatch {
            context,
            expected,
            found,
        }
    }

    /// Helper to reject a grid specification.
    pub fn invalid_grid(context: &'static str, detail: impl Into<String>) -> Self {
        Self::InvalidGrid {
            context,
            detail: detail.into(),
        }
    }

    /// Helper to reject an economic coefficient.
    pub fn invalid_parameter(name: &'static str, value: f64, detail: &'static str) -> Self {
        Self::InvalidParameter {
            name,
            value,
            detail,
        }
    }
}

/// Type alias for results returned by this crate.
pub type Result<T> = std::result::Result<T, HjbError>;
