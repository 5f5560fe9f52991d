use approx::assert_relative_eq;
use hjbrs::model::{DurableModel, RetirementModel, TwoAssetModel};
use hjbrs::operator::{build_durable, build_two_asset};
use hjbrs::solver::{
    solve_durable, solve_retirement, solve_two_asset, solve_two_asset_via_lcp, SolveOptions,
    SolveResult,
};
use hjbrs::tabulate::tabulate;

/// Smallest wealth at which the non-owner's value touches the purchase value.
fn purchase_threshold(model: &DurableModel, result: &SolveResult) -> Option<f64> {
    let rows = tabulate(result, &model.state_space()).unwrap();
    rows.iter()
        .filter(|row| row.discrete_state == 0 && row.at_obstacle)
        .map(|row| row.x1)
        .fold(None, |acc, a| Some(acc.map_or(a, |b: f64| b.min(a))))
}

/// Largest wealth at which the owner's value touches the resale value.
fn sale_threshold(model: &DurableModel, result: &SolveResult) -> Option<f64> {
    let rows = tabulate(result, &model.state_space()).unwrap();
    rows.iter()
        .filter(|row| row.discrete_state == 1 && row.at_obstacle)
        .map(|row| row.x1)
        .fold(None, |acc, a| Some(acc.map_or(a, |b: f64| b.max(a))))
}

#[test]
fn durable_standard_model_converges_with_interior_thresholds() {
    let model = DurableModel::standard();
    let result = solve_durable(&model, &SolveOptions::default()).unwrap();

    assert!(result.iterations <= 100);
    assert!(*result.distances.last().unwrap() < 1e-6);
    assert_eq!(result.distances.len(), result.iterations);

    // Value matching: the value function never falls below its obstacle.
    for idx in 0..result.value.len() {
        assert!(result.value[idx] >= result.obstacle[idx] - 1e-9);
    }

    // The purchase region is an upper wealth interval with an interior edge,
    // and the resale region an interval below it: the buy/sell price wedge
    // keeps recent buyers away from immediately reselling.
    let buy = purchase_threshold(&model, &result).expect("somebody buys");
    let sell = sale_threshold(&model, &result).expect("somebody sells");
    let grid = model.wealth();
    assert!(buy > grid.min() && buy < grid.max(), "buy threshold {buy}");
    assert!(sell > grid.min() && sell < grid.max(), "sell threshold {sell}");
    assert!(sell < buy, "sell {sell} should lie below buy {buy}");

    // Continuation cells exist on both sides of the wedge.
    let rows = tabulate(&result, &model.state_space()).unwrap();
    assert!(rows.iter().any(|row| row.discrete_state == 0 && !row.at_obstacle));
    assert!(rows.iter().any(|row| row.discrete_state == 1 && !row.at_obstacle));
}

#[test]
fn durable_value_is_weakly_concave_away_from_the_obstacle() {
    let model = DurableModel::standard();
    let result = solve_durable(&model, &SolveOptions::default()).unwrap();
    let space = model.state_space();
    let rows = tabulate(&result, &space).unwrap();
    let n = model.wealth().len();

    for k in 0..2 {
        for i in 1..(n - 1) {
            let exercised = (i - 1..=i + 1).any(|m| rows[space.index_1d(m, k)].at_obstacle);
            if exercised {
                continue;
            }
            let second_difference = result.value[space.index_1d(i + 1, k)]
                - 2.0 * result.value[space.index_1d(i, k)]
                + result.value[space.index_1d(i - 1, k)];
            assert!(
                second_difference < 1e-4,
                "convexity at state {k}, node {i}: {second_difference}"
            );
        }
    }
}

#[test]
fn durable_generator_stays_conservative_at_the_fixed_point() {
    let model = DurableModel::standard();
    let result = solve_durable(&model, &SolveOptions::default()).unwrap();

    let (generator, _) = build_durable(&model, &result.value).unwrap();
    let (_, worst) = generator.matrix().max_abs_row_sum();
    assert!(worst.abs() < 1e-10, "worst row sum {worst:e}");
}

#[test]
fn durable_threshold_is_stable_under_grid_refinement() {
    let threshold_at = |n: usize| {
        let model =
            DurableModel::new(2.0, 0.05, 0.045, 0.1, 0.25, 0.2, 0.1, -0.02, 3.0, n).unwrap();
        let result = solve_durable(&model, &SolveOptions::default()).unwrap();
        purchase_threshold(&model, &result).expect("somebody buys")
    };

    let coarse = threshold_at(500);
    let fine = threshold_at(1000);
    // Doubling the grid may move the exercise edge only by discretization
    // error, not reverse the policy.
    assert!(
        (coarse - fine).abs() < 0.05,
        "threshold moved from {coarse} to {fine}"
    );
}

#[test]
fn retirement_standard_model_retires_at_interior_wealth() {
    let model = RetirementModel::standard();
    let result = solve_retirement(&model, &SolveOptions::default()).unwrap();

    assert!(result.iterations <= 100);
    for idx in 0..result.value.len() {
        assert!(result.value[idx] >= result.obstacle[idx] - 1e-9);
    }

    let rows = tabulate(&result, &model.state_space()).unwrap();
    let retired_from = rows
        .iter()
        .filter(|row| row.at_obstacle)
        .map(|row| row.x1)
        .fold(f64::INFINITY, f64::min);
    let grid = model.wealth();
    assert!(
        retired_from > grid.min() && retired_from < grid.max(),
        "retirement threshold {retired_from}"
    );
    // Workers keep working at the borrowing limit.
    assert!(!rows[0].at_obstacle);
}

#[test]
fn two_asset_lcp_and_explicit_paths_agree() {
    let model = TwoAssetModel::standard(24, 20).unwrap();
    let options = SolveOptions::default().with_max_iterations(300);

    let explicit = solve_two_asset(&model, &options).unwrap();
    let via_lcp = solve_two_asset_via_lcp(&model, &options).unwrap();

    for idx in 0..explicit.value.len() {
        assert_relative_eq!(
            explicit.value[idx],
            via_lcp.value[idx],
            epsilon = 1e-9,
            max_relative = 1e-6
        );
        assert_relative_eq!(
            explicit.consumption[idx],
            via_lcp.consumption[idx],
            epsilon = 1e-9,
            max_relative = 1e-6
        );
        assert_relative_eq!(
            explicit.drift[idx],
            via_lcp.drift[idx],
            epsilon = 1e-9,
            max_relative = 1e-6
        );
        assert_relative_eq!(
            explicit.deposit.as_ref().unwrap()[idx],
            via_lcp.deposit.as_ref().unwrap()[idx],
            epsilon = 1e-9,
            max_relative = 1e-6
        );
    }
}

#[test]
fn two_asset_generator_stays_conservative_at_the_fixed_point() {
    let model = TwoAssetModel::standard(24, 20).unwrap();
    let options = SolveOptions::default().with_max_iterations(300);
    let result = solve_two_asset(&model, &options).unwrap();

    let (generator, _) = build_two_asset(&model, &result.value).unwrap();
    let (_, worst) = generator.matrix().max_abs_row_sum();
    assert!(worst.abs() < 1e-10, "worst row sum {worst:e}");
}

#[test]
fn two_asset_transfers_flow_both_ways() {
    let model = TwoAssetModel::standard(24, 20).unwrap();
    let options = SolveOptions::default().with_max_iterations(300);
    let result = solve_two_asset(&model, &options).unwrap();

    let deposit = result.deposit.as_ref().unwrap();
    let max_deposit = deposit.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let min_deposit = deposit.iter().cloned().fold(f64::INFINITY, f64::min);
    // Liquid-rich households top up the illiquid account; liquid-poor ones
    // pay the kinked cost to draw it down.
    assert!(max_deposit > 0.0, "no deposits found");
    assert!(min_deposit < 0.0, "no withdrawals found");
}

#[test]
fn tabulation_matches_solver_arrays_and_serializes() {
    let model = DurableModel::standard();
    let result = solve_durable(&model, &SolveOptions::default()).unwrap();
    let rows = tabulate(&result, &model.state_space()).unwrap();

    assert_eq!(rows.len(), model.state_space().total_unknowns());
    for row in &rows {
        assert_eq!(row.value, result.value[row.index]);
        assert_eq!(row.obstacle, result.obstacle[row.index]);
        assert_eq!(row.at_obstacle, (row.value - row.obstacle).abs() <= 1e-10 + 1e-8 * row.value.abs().max(row.obstacle.abs()));
    }

    let json = serde_json::to_string(&rows[10]).unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed["index"], 10);
    assert_relative_eq!(
        parsed["value"].as_f64().unwrap(),
        rows[10].value,
        epsilon = 1e-12
    );
}
