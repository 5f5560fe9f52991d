//! One implicit pseudo-time step of the value-function iteration.

use nalgebra::DVector;

use crate::error::{HjbError, Result};
use crate::obstacle::solve_lcp;
use crate::operator::Generator;
use crate::sparse::{BandedLu, CsrMatrix};

/// The linear system `((rho + 1/delta) I - A) v_new = u + v_old / delta`
/// assembled for one iteration, optionally shifted by an obstacle.
#[derive(Clone, Debug)]
pub struct ImplicitStep {
    b: CsrMatrix,
    rhs: DVector<f64>,
    bandwidth: usize,
}

impl ImplicitStep {
    /// Assembles the implicit-step system from a validated generator.
    pub fn new(
        generator: &Generator,
        utility_flow: &DVector<f64>,
        v_old: &DVector<f64>,
        rho: f64,
        delta: f64,
        bandwidth: usize,
    ) -> Result<Self> {
        let n = generator.matrix().dimension();
        if utility_flow.len() != n {
            return Err(HjbError::dimension_mismatch(
                "implicit step utility flow",
                n,
                utility_flow.len(),
            ));
        }
        if v_old.len() != n {
            return Err(HjbError::dimension_mismatch(
                "implicit step previous iterate",
                n,
                v_old.len(),
            ));
        }

        let b = generator.matrix().shifted_negation(rho + 1.0 / delta);
        let rhs = utility_flow + v_old / delta;
        Ok(Self { b, rhs, bandwidth })
    }

    /// The implicit-step matrix `B`.
    pub fn matrix(&self) -> &CsrMatrix {
        &self.b
    }

    /// Solves the unconstrained step with a direct banded factorization.
    pub fn solve_direct(&self) -> Result<DVector<f64>> {
        let lu = BandedLu::factor(&self.b, self.bandwidth, "implicit step")?;
        lu.solve(&self.rhs)
    }

    /// Solves the step subject to `v_new >= vstar` through the LCP
    /// `z ⟂ (Bz + q)` with `z = v_new - vstar` and `q = B vstar - rhs`.
    pub fn solve_with_obstacle(
        &self,
        vstar: &DVector<f64>,
        v_old: &DVector<f64>,
        iteration: usize,
    ) -> Result<DVector<f64>> {
        let q = self.b.mul_vec(vstar)? - &self.rhs;
        let z0 = v_old - vstar;
        let solution = solve_lcp(&self.b, &q, &z0, self.bandwidth, iteration)?;
        Ok(solution.z + vstar)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DurableModel;
    use crate::operator::build_durable;
    use approx::assert_relative_eq;

    fn small_model() -> (DurableModel, DVector<f64>) {
        let model =
            DurableModel::new(2.0, 0.05, 0.045, 0.1, 0.25, 0.2, 0.1, -0.02, 3.0, 30).unwrap();
        let space = model.state_space();
        let v = DVector::from_fn(space.total_unknowns(), |idx, _| {
            let i = idx / 2;
            let a = model.wealth().point(i);
            model.utility().utility(model.income + model.r * a) / model.rho
        });
        (model, v)
    }

    #[test]
    fn direct_step_satisfies_the_linear_system() {
        let (model, v) = small_model();
        let (generator, policies) = build_durable(&model, &v).unwrap();
        generator.validate(0).unwrap();

        let step = ImplicitStep::new(&generator, &policies.utility_flow, &v, model.rho, 1000.0, 2)
            .unwrap();
        let v_new = step.solve_direct().unwrap();

        let residual = step.matrix().mul_vec(&v_new).unwrap() - &step.rhs;
        for value in residual.iter() {
            assert_relative_eq!(*value, 0.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn obstacle_step_respects_the_lower_bound() {
        let (model, v) = small_model();
        let (generator, policies) = build_durable(&model, &v).unwrap();

        let step = ImplicitStep::new(&generator, &policies.utility_flow, &v, model.rho, 1000.0, 2)
            .unwrap();
        let vstar = crate::obstacle::durable_obstacle(&model, &v).unwrap();
        let v_new = step.solve_with_obstacle(&vstar, &v, 0).unwrap();

        for idx in 0..v_new.len() {
            assert!(v_new[idx] >= vstar[idx] - 1e-9);
        }
    }
}
