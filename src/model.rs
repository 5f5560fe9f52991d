//! Validated model configurations and the state-space layout they induce.
//!
//! Each model is a plain read-only parameter container: construction validates
//! every coefficient eagerly and the solver never mutates it afterwards. The
//! flat unknown ordering interleaves the discrete dimension fastest (and the
//! liquid grid next for the two-asset model) so that the implicit-step matrix
//! keeps the smallest possible bandwidth.

use crate::error::{HjbError, Result};
use crate::grid::Grid;
use crate::utility::Crra;

/// Describes the Cartesian product of continuous grid(s) and a discrete state.
#[derive(Clone, Debug)]
pub enum StateSpace {
    /// One continuous dimension times `n_discrete` exogenous states.
    OneDim {
        /// Continuous state grid (wealth).
        grid: Grid,
        /// Size of the discrete dimension (1 or 2).
        n_discrete: usize,
    },
    /// Liquid times illiquid wealth times `n_discrete` income states.
    TwoDim {
        /// Liquid asset grid.
        liquid: Grid,
        /// Illiquid asset grid.
        illiquid: Grid,
        /// Size of the discrete income dimension.
        n_discrete: usize,
    },
}

impl StateSpace {
    /// Total number of unknowns (grid cells times discrete states).
    pub fn total_unknowns(&self) -> usize {
        match self {
            Self::OneDim { grid, n_discrete } => grid.len() * n_discrete,
            Self::TwoDim {
                liquid,
                illiquid,
                n_discrete,
            } => liquid.len() * illiquid.len() * n_discrete,
        }
    }

    /// Size of the discrete dimension.
    pub fn n_discrete(&self) -> usize {
        match self {
            Self::OneDim { n_discrete, .. } | Self::TwoDim { n_discrete, .. } => *n_discrete,
        }
    }

    /// Flat index of `(grid node i, discrete state k)` in the 1D layout.
    pub fn index_1d(&self, i: usize, k: usize) -> usize {
        i * self.n_discrete() + k
    }

    /// Flat index of `(liquid node i, illiquid node j, discrete state k)`.
    pub fn index_2d(&self, i: usize, j: usize, k: usize) -> usize {
        match self {
            Self::TwoDim { liquid, .. } => (j * liquid.len() + i) * self.n_discrete() + k,
            Self::OneDim { .. } => unreachable!("2D index requested from a 1D state space"),
        }
    }

    /// Half-bandwidth of the generator under the flat ordering.
    pub fn bandwidth(&self) -> usize {
        match self {
            Self::OneDim { n_discrete, .. } => *n_discrete,
            Self::TwoDim {
                liquid, n_discrete, ..
            } => liquid.len() * n_discrete,
        }
    }
}

/// Durable-good purchase/sale model: wealth plus an ownership flag.
///
/// A non-owner may buy the durable at price `buy_price`; an owner may sell it
/// back at `sell_price < buy_price` and receives the utility service flow
/// `service_flow` while holding it. Both switches are optimal-stopping
/// decisions handled through the LCP obstacle.
#[derive(Clone, Debug)]
pub struct DurableModel {
    utility: Crra,
    /// Subjective discount rate.
    pub rho: f64,
    /// Risk-free interest rate on wealth.
    pub r: f64,
    /// Exogenous income flow.
    pub income: f64,
    /// Utility flow while owning the durable.
    pub service_flow: f64,
    /// Purchase price of the durable.
    pub buy_price: f64,
    /// Resale price of the durable.
    pub sell_price: f64,
    wealth: Grid,
}

impl DurableModel {
    /// Validates and constructs a durable-good model.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        sigma: f64,
        rho: f64,
        r: f64,
        income: f64,
        service_flow: f64,
        buy_price: f64,
        sell_price: f64,
        wealth_min: f64,
        wealth_max: f64,
        n_wealth: usize,
    ) -> Result<Self> {
        let utility = Crra::new(sigma)?;
        let wealth = Grid::new("wealth", wealth_min, wealth_max, n_wealth)?;
        if rho <= 0.0 {
            return Err(HjbError::invalid_parameter(
                "rho",
                rho,
                "discount rate must be positive",
            ));
        }
        if r >= rho {
            return Err(HjbError::invalid_parameter(
                "r",
                r,
                "interest rate must lie below the discount rate",
            ));
        }
        if buy_price <= 0.0 || sell_price <= 0.0 || buy_price <= sell_price {
            return Err(HjbError::invalid_parameter(
                "buy_price",
                buy_price,
                "prices must be positive with buy_price > sell_price",
            ));
        }
        if service_flow <= 0.0 {
            return Err(HjbError::invalid_parameter(
                "service_flow",
                service_flow,
                "ownership utility flow must be positive",
            ));
        }
        if income + r * wealth_min <= 0.0 {
            return Err(HjbError::invalid_parameter(
                "income",
                income,
                "cash on hand must stay positive at the borrowing limit",
            ));
        }
        Ok(Self {
            utility,
            rho,
            r,
            income,
            service_flow,
            buy_price,
            sell_price,
            wealth,
        })
    }

    /// The parameterization used throughout the regression suite:
    /// sigma 2, rho 0.05, r 0.045, income 0.1, service flow 0.25,
    /// buy 0.2, sell 0.1, 500 wealth nodes on [-0.02, 3].
    pub fn standard() -> Self {
        Self::new(2.0, 0.05, 0.045, 0.1, 0.25, 0.2, 0.1, -0.02, 3.0, 500)
            .expect("standard durable parameterization is valid")
    }

    /// Utility kernel.
    pub fn utility(&self) -> &Crra {
        &self.utility
    }

    /// Wealth grid.
    pub fn wealth(&self) -> &Grid {
        &self.wealth
    }

    /// Ownership-flag state space (wealth times two discrete states).
    pub fn state_space(&self) -> StateSpace {
        StateSpace::OneDim {
            grid: self.wealth.clone(),
            n_discrete: 2,
        }
    }
}

/// Retirement model: one wealth dimension and a single discrete state.
///
/// A worker earns `wage` at disutility `labor_disutility` and may irreversibly
/// retire, which is worth the closed-form value of consuming the sustainable
/// flow `pension + r a` forever.
#[derive(Clone, Debug)]
pub struct RetirementModel {
    utility: Crra,
    /// Subjective discount rate.
    pub rho: f64,
    /// Risk-free interest rate on wealth.
    pub r: f64,
    /// Labor income while working.
    pub wage: f64,
    /// Flow disutility of working.
    pub labor_disutility: f64,
    /// Retirement income flow.
    pub pension: f64,
    wealth: Grid,
}

impl RetirementModel {
    /// Validates and constructs a retirement model.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        sigma: f64,
        rho: f64,
        r: f64,
        wage: f64,
        labor_disutility: f64,
        pension: f64,
        wealth_min: f64,
        wealth_max: f64,
        n_wealth: usize,
    ) -> Result<Self> {
        let utility = Crra::new(sigma)?;
        let wealth = Grid::new("wealth", wealth_min, wealth_max, n_wealth)?;
        if rho <= 0.0 {
            return Err(HjbError::invalid_parameter(
                "rho",
                rho,
                "discount rate must be positive",
            ));
        }
        if r >= rho {
            return Err(HjbError::invalid_parameter(
                "r",
                r,
                "interest rate must lie below the discount rate",
            ));
        }
        if labor_disutility <= 0.0 {
            return Err(HjbError::invalid_parameter(
                "labor_disutility",
                labor_disutility,
                "working must carry a positive flow disutility",
            ));
        }
        if wage <= pension {
            return Err(HjbError::invalid_parameter(
                "wage",
                wage,
                "working income must exceed the pension",
            ));
        }
        if pension + r * wealth_min <= 0.0 || wage + r * wealth_min <= 0.0 {
            return Err(HjbError::invalid_parameter(
                "pension",
                pension,
                "cash on hand must stay positive at the borrowing limit",
            ));
        }
        Ok(Self {
            utility,
            rho,
            r,
            wage,
            labor_disutility,
            pension,
            wealth,
        })
    }

    /// The parameterization used throughout the regression suite.
    pub fn standard() -> Self {
        Self::new(2.0, 0.05, 0.045, 0.25, 1.0, 0.15, 0.0, 8.0, 300)
            .expect("standard retirement parameterization is valid")
    }

    /// Utility kernel.
    pub fn utility(&self) -> &Crra {
        &self.utility
    }

    /// Wealth grid.
    pub fn wealth(&self) -> &Grid {
        &self.wealth
    }

    /// Single-discrete-state space.
    pub fn state_space(&self) -> StateSpace {
        StateSpace::OneDim {
            grid: self.wealth.clone(),
            n_discrete: 1,
        }
    }

    /// Closed-form value of being retired at wealth `a`: consume `pension + r a`
    /// forever. This is the obstacle of the stopping problem.
    pub fn retired_value(&self, a: f64) -> f64 {
        self.utility.utility(self.pension + self.r * a) / self.rho
    }
}

/// Two-asset portfolio model with a kinked adjustment cost.
///
/// Liquid wealth `b` earns `r_liquid`, illiquid wealth `a` earns `r_illiquid`,
/// labor income `wage * z` switches between two states at Poisson rates, and
/// transfers `d` between the accounts cost
/// `chi0 |d| + chi1 d^2 / (2 max(a, 1e-5))`.
#[derive(Clone, Debug)]
pub struct TwoAssetModel {
    utility: Crra,
    /// Subjective discount rate.
    pub rho: f64,
    /// Return on the liquid account.
    pub r_liquid: f64,
    /// Return on the illiquid account.
    pub r_illiquid: f64,
    /// Wage scale.
    pub wage: f64,
    /// Income states.
    pub z: [f64; 2],
    /// Poisson switching rates out of each income state.
    pub lambda: [f64; 2],
    /// Linear adjustment-cost coefficient.
    pub chi0: f64,
    /// Convex adjustment-cost coefficient.
    pub chi1: f64,
    /// Fraction of labor income deposited automatically into the illiquid account.
    pub xi: f64,
    liquid: Grid,
    illiquid: Grid,
}

impl TwoAssetModel {
    /// Validates and constructs a two-asset model.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        sigma: f64,
        rho: f64,
        r_liquid: f64,
        r_illiquid: f64,
        wage: f64,
        z: [f64; 2],
        lambda: [f64; 2],
        chi0: f64,
        chi1: f64,
        xi: f64,
        liquid: Grid,
        illiquid: Grid,
    ) -> Result<Self> {
        let utility = Crra::new(sigma)?;
        if rho <= 0.0 {
            return Err(HjbError::invalid_parameter(
                "rho",
                rho,
                "discount rate must be positive",
            ));
        }
        if r_illiquid <= r_liquid {
            return Err(HjbError::invalid_parameter(
                "r_illiquid",
                r_illiquid,
                "the illiquid return must exceed the liquid return",
            ));
        }
        if !(0.0..1.0).contains(&chi0) {
            return Err(HjbError::invalid_parameter(
                "chi0",
                chi0,
                "linear adjustment cost must lie in [0, 1)",
            ));
        }
        if chi1 <= 0.0 {
            return Err(HjbError::invalid_parameter(
                "chi1",
                chi1,
                "convex adjustment cost must be positive",
            ));
        }
        if lambda[0] <= 0.0 || lambda[1] <= 0.0 {
            return Err(HjbError::invalid_parameter(
                "lambda",
                lambda[0].min(lambda[1]),
                "income switching rates must be positive",
            ));
        }
        if z[0] <= 0.0 || z[1] <= z[0] {
            return Err(HjbError::invalid_parameter(
                "z",
                z[0],
                "income states must be positive and ordered",
            ));
        }
        if !(0.0..1.0).contains(&xi) {
            return Err(HjbError::invalid_parameter(
                "xi",
                xi,
                "automatic deposit share must lie in [0, 1)",
            ));
        }
        Ok(Self {
            utility,
            rho,
            r_liquid,
            r_illiquid,
            wage,
            z,
            lambda,
            chi0,
            chi1,
            xi,
            liquid,
            illiquid,
        })
    }

    /// A small but economically sensible parameterization used by the
    /// regression suite; grid sizes are arguments so tests can trade accuracy
    /// against runtime.
    pub fn standard(n_liquid: usize, n_illiquid: usize) -> Result<Self> {
        let liquid = Grid::new("liquid", 0.0, 40.0, n_liquid)?;
        let illiquid = Grid::new("illiquid", 0.0, 70.0, n_illiquid)?;
        Self::new(
            2.0,
            0.06,
            0.03,
            0.05,
            4.0,
            [0.8, 1.3],
            [1.0 / 3.0, 1.0 / 3.0],
            0.0445,
            0.956,
            0.1,
            liquid,
            illiquid,
        )
    }

    /// Utility kernel.
    pub fn utility(&self) -> &Crra {
        &self.utility
    }

    /// Liquid asset grid.
    pub fn liquid(&self) -> &Grid {
        &self.liquid
    }

    /// Illiquid asset grid.
    pub fn illiquid(&self) -> &Grid {
        &self.illiquid
    }

    /// Labor income flowing into the liquid account in income state `k`.
    pub fn liquid_income(&self, k: usize) -> f64 {
        (1.0 - self.xi) * self.wage * self.z[k]
    }

    /// Labor income deposited automatically into the illiquid account.
    pub fn illiquid_income(&self, k: usize) -> f64 {
        self.xi * self.wage * self.z[k]
    }

    /// Pecuniary cost of transferring at rate `d` with illiquid holdings `a`.
    pub fn adjustment_cost(&self, d: f64, a: f64) -> f64 {
        self.chi0 * d.abs() + 0.5 * self.chi1 * d * d / a.max(1e-5)
    }

    /// Two-income-state space over the liquid/illiquid grids.
    pub fn state_space(&self) -> StateSpace {
        StateSpace::TwoDim {
            liquid: self.liquid.clone(),
            illiquid: self.illiquid.clone(),
            n_discrete: 2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_durable_model_is_valid() {
        let model = DurableModel::standard();
        assert_eq!(model.wealth().len(), 500);
        assert_eq!(model.state_space().total_unknowns(), 1000);
        assert_eq!(model.state_space().bandwidth(), 2);
    }

    #[test]
    fn durable_model_rejects_inverted_prices() {
        let result = DurableModel::new(2.0, 0.05, 0.045, 0.1, 0.25, 0.1, 0.2, -0.02, 3.0, 500);
        assert!(matches!(result, Err(HjbError::InvalidParameter { .. })));
    }

    #[test]
    fn durable_model_rejects_negative_cash_on_hand() {
        let result = DurableModel::new(2.0, 0.05, 0.045, 0.1, 0.25, 0.2, 0.1, -3.0, 3.0, 500);
        assert!(matches!(result, Err(HjbError::InvalidParameter { .. })));
    }

    #[test]
    fn one_dim_layout_interleaves_discrete_state() {
        let model = DurableModel::standard();
        let space = model.state_space();
        assert_eq!(space.index_1d(0, 0), 0);
        assert_eq!(space.index_1d(0, 1), 1);
        assert_eq!(space.index_1d(1, 0), 2);
    }

    #[test]
    fn two_dim_layout_orders_liquid_before_illiquid() {
        let model = TwoAssetModel::standard(30, 20).unwrap();
        let space = model.state_space();
        assert_eq!(space.total_unknowns(), 30 * 20 * 2);
        // Liquid neighbors are adjacent up to the discrete interleave.
        assert_eq!(space.index_2d(1, 0, 0) - space.index_2d(0, 0, 0), 2);
        // Illiquid neighbors are one liquid row apart.
        assert_eq!(space.index_2d(0, 1, 0) - space.index_2d(0, 0, 0), 60);
        assert_eq!(space.bandwidth(), 60);
    }

    #[test]
    fn retired_value_is_increasing_in_wealth() {
        let model = RetirementModel::standard();
        assert!(model.retired_value(1.0) > model.retired_value(0.0));
    }

    #[test]
    fn two_asset_model_rejects_bad_costs() {
        let liquid = Grid::new("liquid", 0.0, 40.0, 10).unwrap();
        let illiquid = Grid::new("illiquid", 0.0, 70.0, 10).unwrap();
        let result = TwoAssetModel::new(
            2.0,
            0.06,
            0.03,
            0.05,
            4.0,
            [0.8, 1.3],
            [0.3, 0.3],
            0.0445,
            -1.0,
            0.1,
            liquid,
            illiquid,
        );
        assert!(matches!(result, Err(HjbError::InvalidParameter { .. })));
    }
}
