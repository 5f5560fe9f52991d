//! CRRA utility kernel shared by every model variant.

use crate::error::{HjbError, Result};

/// Floor applied to derivative estimates before inverting marginal utility.
///
/// Early iterates can produce non-monotone value functions whose finite
/// differences dip to zero or below; inverting those would yield NaN
/// consumption. The floor keeps the candidate policies finite.
pub const DERIVATIVE_FLOOR: f64 = 1e-6;

/// Constant relative risk aversion utility `u(c) = c^(1-sigma) / (1-sigma)`,
/// with the `sigma = 1` limit `u(c) = ln(c)`.
#[derive(Clone, Copy, Debug)]
pub struct Crra {
    sigma: f64,
}

impl Crra {
    /// Creates a CRRA kernel with risk aversion `sigma > 0`.
    pub fn new(sigma: f64) -> Result<Self> {
        if !sigma.is_finite() || sigma <= 0.0 {
            return Err(HjbError::invalid_parameter(
                "sigma",
                sigma,
                "risk aversion must be positive and finite",
            ));
        }
        Ok(Self { sigma })
    }

    /// Risk-aversion coefficient.
    pub fn sigma(&self) -> f64 {
        self.sigma
    }

    /// Flow utility of consuming `c > 0`.
    pub fn utility(&self, c: f64) -> f64 {
        if (self.sigma - 1.0).abs() < 1e-12 {
            c.ln()
        } else {
            c.powf(1.0 - self.sigma) / (1.0 - self.sigma)
        }
    }

    /// Marginal utility `u'(c) = c^(-sigma)`.
    pub fn marginal(&self, c: f64) -> f64 {
        c.powf(-self.sigma)
    }

    /// Inverse marginal utility `u'^{-1}(dv) = dv^(-1/sigma)`.
    ///
    /// The derivative estimate is floored at [`DERIVATIVE_FLOOR`] so that
    /// transient non-monotone iterates never produce NaN policies.
    pub fn inverse_marginal(&self, dv: f64) -> f64 {
        dv.max(DERIVATIVE_FLOOR).powf(-1.0 / self.sigma)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn rejects_non_positive_risk_aversion() {
        assert!(Crra::new(0.0).is_err());
        assert!(Crra::new(-2.0).is_err());
        assert!(Crra::new(f64::NAN).is_err());
    }

    #[test]
    fn inverse_marginal_inverts_marginal() {
        let u = Crra::new(2.0).unwrap();
        for c in [0.05, 0.4, 1.0, 7.5] {
            assert_relative_eq!(u.inverse_marginal(u.marginal(c)), c, epsilon = 1e-12);
        }
    }

    #[test]
    fn log_limit_is_used_at_sigma_one() {
        let u = Crra::new(1.0).unwrap();
        assert_relative_eq!(u.utility(2.0), 2.0_f64.ln());
        assert_relative_eq!(u.marginal(2.0), 0.5);
    }

    #[test]
    fn derivative_floor_keeps_consumption_finite() {
        let u = Crra::new(2.0).unwrap();
        let c = u.inverse_marginal(-3.0);
        assert!(c.is_finite());
        assert_relative_eq!(c, DERIVATIVE_FLOOR.powf(-0.5), epsilon = 1e-12);
    }
}
