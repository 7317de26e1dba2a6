use good_lp::solvers::microlp::microlp;
use good_lp::{constraint, variable, Expression, ProblemVariables, Solution, SolverModel, Variable};
use nalgebra::{DMatrix, DVector};
use serde_json::json;
use slog::{info, Logger};
use std::collections::BTreeMap;
use std::time::Instant;

use crate::model::errors::Error;
use crate::model::inputs::SolverInputs;
use crate::model::result::{AllocationResult, SolverStatus};

/// Default wall-clock budget for one solve, in seconds.
pub const DEFAULT_TIME_LIMIT: f64 = 300.0;

/// Egalitarian allocator: maximizes the smallest entitlement-weighted utility across agents.
///
/// The max-min program is linearized with an auxiliary variable t that lower-bounds every
/// weighted utility:
///
/// ```text
/// maximize t
/// subject to  sum_j u[i,j] x[i,j] - w_i t >= 0   for every agent i
///             sum_i x[i,j] = 1                   for every good j
///             x[i,j] = 0                         for every forbidden pair
///             sum_ij v_j x[i,j] <= B             when a value budget is set
///             x in [0,1], t >= epsilon
/// ```
///
/// An agent that values every reachable good at zero forces t <= 0, which collides with the
/// t >= epsilon floor; such programs are reported infeasible on purpose.
pub struct MaxMinSolver<'a> {
    logger: &'a Logger,
    time_limit: f64,
}

impl<'a> MaxMinSolver<'a> {
    pub fn new(logger: &'a Logger) -> MaxMinSolver<'a> {
        MaxMinSolver {
            logger,
            time_limit: DEFAULT_TIME_LIMIT,
        }
    }

    /// Return a new [MaxMinSolver] with the given time limit in seconds. The limit is advisory
    /// with the bundled LP engine, which is deterministic and has no interruption knob; it is
    /// recorded in the result metadata either way.
    pub fn with_time_limit(self, seconds: f64) -> MaxMinSolver<'a> {
        MaxMinSolver {
            logger: self.logger,
            time_limit: seconds,
        }
    }

    /// Solves the egalitarian program for the given inputs. Malformed inputs fail before any
    /// engine work; an engine that finds no feasible point yields a zero allocation tagged
    /// infeasible rather than an error.
    pub fn solve(&self, inputs: &SolverInputs) -> Result<AllocationResult, Error> {
        inputs.validate().into_result()?;

        let (n_agents, n_goods) = (inputs.n_agents(), inputs.n_goods());
        info!(
            self.logger,
            "Solving the max-min program for {n_agents} agents and {n_goods} goods."
        );

        let start = Instant::now();

        if let Some(result) = infeasibility_precheck(inputs, start) {
            info!(self.logger, "Program is infeasible before reaching the engine.");
            return Ok(result);
        }

        let mut problem = ProblemVariables::new();
        let t = problem.add(variable().min(inputs.epsilon));
        let x: Vec<Variable> = (0..n_agents * n_goods)
            .map(|index| {
                let (i, j) = (index / n_goods, index % n_goods);
                if inputs.is_allowed(i, j) {
                    problem.add(variable().min(0.0).max(1.0))
                } else {
                    // Forbidden pairs are pinned to zero through their upper bound.
                    problem.add(variable().min(0.0).max(0.0))
                }
            })
            .collect();

        let mut model = problem.maximise(t).using(microlp);

        // Every agent's utility must stay above the weighted floor t.
        for i in 0..n_agents {
            let mut weighted_utility = Expression::default();
            for j in 0..n_goods {
                weighted_utility += x[i * n_goods + j] * inputs.utilities[(i, j)];
            }
            weighted_utility += t * (-inputs.entitlements[i]);
            model = model.with(constraint::geq(weighted_utility, 0.0));
        }

        // Every good is fully allocated.
        for j in 0..n_goods {
            let mut column_sum = Expression::default();
            for i in 0..n_agents {
                column_sum += x[i * n_goods + j];
            }
            model = model.with(constraint::eq(column_sum, 1.0));
        }

        // Value-budget variant: the value moved through the allocation may not exceed B.
        if let (Some(values), Some(budget)) = (&inputs.good_values, inputs.budget) {
            let mut allocated_value = Expression::default();
            for i in 0..n_agents {
                for j in 0..n_goods {
                    allocated_value += x[i * n_goods + j] * values[j];
                }
            }
            model = model.with(constraint::leq(allocated_value, budget));
        }

        let solution = match model.solve() {
            Ok(solution) => solution,
            Err(engine_error) => {
                let message = format!("No feasible solution found: {engine_error}");
                info!(self.logger, "Engine reported failure: {message}");
                let mut result =
                    AllocationResult::infeasible(n_agents, n_goods, start.elapsed().as_secs_f64(), message);
                result
                    .metadata
                    .insert("algorithm".to_string(), json!("max_min_egalitarian"));
                return Ok(result);
            }
        };
        let solve_time = start.elapsed().as_secs_f64();

        let allocation =
            DMatrix::from_fn(n_agents, n_goods, |i, j| solution.value(x[i * n_goods + j]));
        let realized_utilities: DVector<f64> =
            inputs.utilities.component_mul(&allocation).column_sum();
        let objective_value = solution.value(t);

        let normalized_utilities: Vec<f64> = realized_utilities
            .iter()
            .zip(inputs.entitlements.iter())
            .map(|(u, w)| u / w)
            .collect();

        info!(
            self.logger,
            "Found the optimum with minimum weighted utility {objective_value}."
        );

        let mut metadata = BTreeMap::new();
        metadata.insert("algorithm".to_string(), json!("max_min_egalitarian"));
        metadata.insert("min_normalized_utility".to_string(), json!(objective_value));
        metadata.insert(
            "normalized_utilities".to_string(),
            json!(normalized_utilities),
        );
        metadata.insert("time_limit_seconds".to_string(), json!(self.time_limit));

        AllocationResult::new(
            allocation,
            realized_utilities,
            objective_value,
            SolverStatus::Optimal,
            solve_time,
            metadata,
        )
    }
}

/// Detects the two structural infeasibilities without an engine round-trip: an agent that cannot
/// reach any positive utility, and a good that no agent is allowed to receive.
fn infeasibility_precheck(inputs: &SolverInputs, start: Instant) -> Option<AllocationResult> {
    let (n_agents, n_goods) = (inputs.n_agents(), inputs.n_goods());

    for i in 0..n_agents {
        let attainable: f64 = (0..n_goods)
            .filter(|&j| inputs.is_allowed(i, j))
            .map(|j| inputs.utilities[(i, j)])
            .sum();
        if attainable <= 0.0 {
            return Some(AllocationResult::infeasible(
                n_agents,
                n_goods,
                start.elapsed().as_secs_f64(),
                format!(
                    "No feasible solution found: agent {i} cannot reach a positive utility \
                    from the goods it is allowed to receive."
                ),
            ));
        }
    }

    for j in 0..n_goods {
        if (0..n_agents).all(|i| !inputs.is_allowed(i, j)) {
            return Some(AllocationResult::infeasible(
                n_agents,
                n_goods,
                start.elapsed().as_secs_f64(),
                format!("No feasible solution found: every agent is forbidden from good {j}."),
            ));
        }
    }

    None
}
