//! Uniform state-space grids and interpolation helpers.

use crate::error::{HjbError, Result};

/// An ordered, evenly spaced discretization of one continuous state dimension.
///
/// The grid always contains both endpoints, so the spacing satisfies
/// `step = (max - min) / (n - 1)`.
#[derive(Clone, Debug)]
pub struct Grid {
    min: f64,
    max: f64,
    n: usize,
    step: f64,
    points: Vec<f64>,
}

impl Grid {
    /// Builds a uniform grid of `n` points spanning `[min, max]` inclusive.
    ///
    /// Fails when fewer than two points are requested, when the interval is
    /// empty or reversed, or when a bound is not finite.
    pub fn new(context: &'static str, min: f64, max: f64, n: usize) -> Result<Self> {
        if !min.is_finite() || !max.is_finite() {
            return Err(HjbError::invalid_grid(
                context,
                format!("bounds must be finite, got [{min}, {max}]"),
            ));
        }
        if n < 2 {
            return Err(HjbError::invalid_grid(
                context,
                format!("at least two points are required, got {n}"),
            ));
        }
        if max <= min {
            return Err(HjbError::invalid_grid(
                context,
                format!("upper bound {max} must exceed lower bound {min}"),
            ));
        }

        let step = (max - min) / (n - 1) as f64;
        let mut points = Vec::with_capacity(n);
        for i in 0..n {
            points.push(min + step * i as f64);
        }
        // Pin the last node to the exact upper bound; accumulated rounding in
        // `min + step * i` can otherwise leave it a few ulps short.
        points[n - 1] = max;

        Ok(Self {
            min,
            max,
            n,
            step,
            points,
        })
    }

    /// Lower bound of the grid.
    pub fn min(&self) -> f64 {
        self.min
    }

    /// Upper bound of the grid.
    pub fn max(&self) -> f64 {
        self.max
    }

    /// Number of grid nodes.
    pub fn len(&self) -> usize {
        self.n
    }

    /// A grid is never empty; provided for clippy-friendly call sites.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Uniform spacing between adjacent nodes.
    pub fn step(&self) -> f64 {
        self.step
    }

    /// The ordered node locations.
    pub fn points(&self) -> &[f64] {
        &self.points
    }

    /// Location of node `i`.
    pub fn point(&self, i: usize) -> f64 {
        self.points[i]
    }

    /// Linearly interpolates `values` (one entry per node) at location `x`.
    ///
    /// Outside the domain the nearest endpoint value is returned; use
    /// [`interp_extrap`](Self::interp_extrap) when a finite extrapolation
    /// slope is available.
    pub fn interp(&self, values: &[f64], x: f64) -> Result<f64> {
        self.interp_extrap(values, x, 0.0, 0.0)
    }

    /// Linearly interpolates `values` at `x`, extrapolating linearly outside
    /// the domain with the supplied slopes.
    ///
    /// `lo_slope` is applied below `min` and `hi_slope` above `max`; both are
    /// typically boundary marginal values, which keeps off-grid shadow values
    /// finite instead of pinning them at an artificial infinity.
    pub fn interp_extrap(
        &self,
        values: &[f64],
        x: f64,
        lo_slope: f64,
        hi_slope: f64,
    ) -> Result<f64> {
        if values.len() != self.n {
            return Err(HjbError::dimension_mismatch(
                "grid interpolation",
                self.n,
                values.len(),
            ));
        }

        if x <= self.min {
            return Ok(values[0] + lo_slope * (x - self.min));
        }
        if x >= self.max {
            return Ok(values[self.n - 1] + hi_slope * (x - self.max));
        }

        let offset = (x - self.min) / self.step;
        let lo = (offset.floor() as usize).min(self.n - 2);
        let weight = (x - self.points[lo]) / self.step;
        Ok(values[lo] * (1.0 - weight) + values[lo + 1] * weight)
    }
}
