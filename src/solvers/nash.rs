use nalgebra::{DMatrix, DVector};
use serde_json::json;
use slog::{debug, info, Logger};
use std::collections::BTreeMap;
use std::time::Instant;

use crate::model::errors::Error;
use crate::model::inputs::SolverInputs;
use crate::model::result::{AllocationResult, SolverStatus};

/// Tolerance for converging the solution during the projected-gradient iteration. This is an
/// absolute tolerance on the largest per-entry movement of the allocation in one accepted step.
pub const SOLVER_TOLERANCE: f64 = 1e-8;

/// Maximum number of iterations for the nonlinear solver.
pub const MAX_ITER: u32 = 1000;

/// Shrink factor applied to the trial step while backtracking.
const BACKTRACK_FACTOR: f64 = 0.5;

/// Fraction of the first-order predicted gain a trial step must realize to be accepted.
const SUFFICIENT_INCREASE: f64 = 1e-4;

/// Below this trial step the current point is treated as stationary.
const MIN_STEP: f64 = 1e-14;

/// Nash social welfare allocator: maximizes the entitlement-weighted sum of log utilities,
///
/// ```text
/// maximize sum_i w_i/sum(w) * log(U_i(x)),  U_i(x) = sum_j u[i,j] x[i,j]
/// ```
///
/// over the product of per-good simplices (every column of x sums to one), with forbidden pairs
/// fixed at zero and a strict positivity floor U_i >= epsilon. The objective is concave, so the
/// program is convex and the optimum unique whenever the weights are positive.
///
/// The engine is a projected gradient ascent with backtracking: the logarithms are clamped at
/// epsilon, the analytic gradient is w_i * u[i,j] / max(U_i, epsilon), each trial point is
/// projected column-wise back onto the simplex, and convergence is declared when an accepted
/// step no longer moves the allocation.
pub struct NashSolver<'a> {
    logger: &'a Logger,
    max_iter: u32,
    time_limit: f64,
}

impl<'a> NashSolver<'a> {
    pub fn new(logger: &'a Logger) -> NashSolver<'a> {
        NashSolver {
            logger,
            max_iter: MAX_ITER,
            time_limit: crate::solvers::maxmin::DEFAULT_TIME_LIMIT,
        }
    }

    /// Return a new [NashSolver] with the given iteration budget. The contents of the original
    /// object are moved into the new one.
    pub fn with_max_iter(self, max_iter: u32) -> NashSolver<'a> {
        NashSolver { max_iter, ..self }
    }

    /// Return a new [NashSolver] with the given advisory time limit in seconds. The engine
    /// bounds its work through the iteration budget; the limit is recorded in the metadata.
    pub fn with_time_limit(self, seconds: f64) -> NashSolver<'a> {
        NashSolver {
            time_limit: seconds,
            ..self
        }
    }

    /// Solves the Nash welfare program. Malformed inputs fail before any iteration; an agent
    /// that cannot reach the epsilon floor yields an infeasible-tagged result; a diverging
    /// iteration is surfaced as a solver failure with the engine message attached.
    pub fn solve(&self, inputs: &SolverInputs) -> Result<AllocationResult, Error> {
        inputs.validate().into_result()?;

        let (n_agents, n_goods) = (inputs.n_agents(), inputs.n_goods());
        info!(
            self.logger,
            "Solving the Nash welfare program for {n_agents} agents and {n_goods} goods."
        );

        let start = Instant::now();
        let epsilon = inputs.epsilon;

        if let Some(result) = self.infeasibility_precheck(inputs, start) {
            return Ok(result);
        }

        let weights = inputs.normalized_weights();

        // Uniform feasible start: each good split equally among the agents allowed to hold it.
        let mut x = DMatrix::zeros(n_agents, n_goods);
        for j in 0..n_goods {
            let allowed: Vec<usize> = (0..n_agents).filter(|&i| inputs.is_allowed(i, j)).collect();
            for &i in &allowed {
                x[(i, j)] = 1.0 / allowed.len() as f64;
            }
        }

        let mut objective = weighted_log_welfare(&x, inputs, &weights);
        let mut counter: u32 = 0;
        let mut converged = false;
        let mut residual = f64::INFINITY;
        let mut step: f64 = 1.0;

        while counter < self.max_iter {
            counter += 1;

            let gradient = welfare_gradient(&x, inputs, &weights);
            if objective.is_nan() || gradient.iter().any(|g| g.is_nan()) {
                return Err(Error::solver_failed(
                    "nash-iteration-diverged",
                    format!(
                        "The Nash welfare iteration produced a non-finite value at iteration \
                        {counter}. Check the utility matrix for extreme magnitudes."
                    ),
                ));
            }

            // Backtrack from the last accepted step until the projected point realizes enough
            // of the first-order predicted gain.
            step = (step * 2.0).min(1e6);
            let (candidate, candidate_objective, stationary) = loop {
                let candidate = project_onto_feasible_set(&(&x + &gradient * step), inputs);
                let movement = &candidate - &x;
                let predicted_gain: f64 = gradient.iter().zip(movement.iter()).map(|(g, d)| g * d).sum();
                let candidate_objective = weighted_log_welfare(&candidate, inputs, &weights);

                if candidate_objective >= objective + SUFFICIENT_INCREASE * predicted_gain {
                    break (candidate, candidate_objective, false);
                }

                step *= BACKTRACK_FACTOR;
                if step < MIN_STEP {
                    break (x.clone(), objective, true);
                }
            };

            if stationary {
                converged = true;
                residual = 0.0;
                break;
            }

            residual = (&candidate - &x).amax();
            x = candidate;
            objective = candidate_objective;

            debug!(
                self.logger,
                "Iteration {counter}: objective {objective}, residual {residual}."
            );

            if residual < SOLVER_TOLERANCE {
                converged = true;
                break;
            }
        }

        let solve_time = start.elapsed().as_secs_f64();
        let realized_utilities: DVector<f64> = inputs.utilities.component_mul(&x).column_sum();
        let objective_value = weighted_log_welfare(&x, inputs, &weights);

        // The epsilon floor is enforced through the clamped logarithms; flag the rare case
        // where the converged point still sits below it.
        let floor_violated = realized_utilities.iter().any(|&u| u + 1e-9 < epsilon);

        let solver_status = if converged && !floor_violated {
            info!(
                self.logger,
                "Converged in {counter} iterations with residual {residual}."
            );
            SolverStatus::Optimal
        } else {
            info!(
                self.logger,
                "Stopping after {counter} iterations without convergence (residual {residual})."
            );
            SolverStatus::Feasible
        };

        let mut metadata = BTreeMap::new();
        metadata.insert("algorithm".to_string(), json!("nash_social_welfare"));
        metadata.insert("nash_product".to_string(), json!(objective_value.exp()));
        metadata.insert("iterations".to_string(), json!(counter));
        metadata.insert("converged".to_string(), json!(converged));
        metadata.insert("epsilon".to_string(), json!(epsilon));
        metadata.insert("time_limit_seconds".to_string(), json!(self.time_limit));
        if floor_violated {
            metadata.insert(
                "epsilon_floor_violated".to_string(),
                json!("some agent ended below the epsilon utility floor"),
            );
        }

        AllocationResult::new(
            x,
            realized_utilities,
            objective_value,
            solver_status,
            solve_time,
            metadata,
        )
    }

    /// An agent that cannot reach the epsilon floor even when handed every good it may hold, or
    /// a good that nobody may hold, makes the program infeasible before any iteration.
    fn infeasibility_precheck(
        &self,
        inputs: &SolverInputs,
        start: Instant,
    ) -> Option<AllocationResult> {
        let (n_agents, n_goods) = (inputs.n_agents(), inputs.n_goods());

        for i in 0..n_agents {
            let attainable: f64 = (0..n_goods)
                .filter(|&j| inputs.is_allowed(i, j))
                .map(|j| inputs.utilities[(i, j)])
                .sum();
            if attainable < inputs.epsilon {
                info!(
                    self.logger,
                    "Agent {i} cannot reach the epsilon utility floor; reporting infeasible."
                );
                return Some(AllocationResult::infeasible(
                    n_agents,
                    n_goods,
                    start.elapsed().as_secs_f64(),
                    format!(
                        "No feasible solution found: agent {i} cannot reach the epsilon \
                        utility floor {} from the goods it is allowed to receive.",
                        inputs.epsilon
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
}

/// The clamped objective sum_i w_i * log(max(U_i, epsilon)).
fn weighted_log_welfare(x: &DMatrix<f64>, inputs: &SolverInputs, weights: &DVector<f64>) -> f64 {
    let realized: DVector<f64> = inputs.utilities.component_mul(x).column_sum();
    realized
        .iter()
        .zip(weights.iter())
        .map(|(&u, &w)| w * u.max(inputs.epsilon).ln())
        .sum()
}

/// Analytic gradient of the clamped objective: w_i * u[i,j] / max(U_i, epsilon), zeroed on
/// forbidden pairs so that the ascent never leaves the feasible face.
fn welfare_gradient(
    x: &DMatrix<f64>,
    inputs: &SolverInputs,
    weights: &DVector<f64>,
) -> DMatrix<f64> {
    let realized: DVector<f64> = inputs.utilities.component_mul(x).column_sum();
    DMatrix::from_fn(inputs.n_agents(), inputs.n_goods(), |i, j| {
        if inputs.is_allowed(i, j) {
            weights[i] * inputs.utilities[(i, j)] / realized[i].max(inputs.epsilon)
        } else {
            0.0
        }
    })
}

/// Projects every column of the trial point back onto its simplex, keeping forbidden pairs at
/// zero. The feasible set is the product of these per-good simplices.
fn project_onto_feasible_set(trial: &DMatrix<f64>, inputs: &SolverInputs) -> DMatrix<f64> {
    let (n_agents, n_goods) = trial.shape();
    let mut projected = DMatrix::zeros(n_agents, n_goods);

    for j in 0..n_goods {
        let allowed: Vec<usize> = (0..n_agents).filter(|&i| inputs.is_allowed(i, j)).collect();
        let values: Vec<f64> = allowed.iter().map(|&i| trial[(i, j)]).collect();
        let column = project_onto_simplex(&values);
        for (&i, &value) in allowed.iter().zip(column.iter()) {
            projected[(i, j)] = value;
        }
    }

    projected
}

/// Euclidean projection of a point onto the probability simplex { y >= 0, sum(y) = 1 } by the
/// sort-and-threshold rule of Held, Wolfe and Crowder.
fn project_onto_simplex(values: &[f64]) -> Vec<f64> {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));

    let mut cumulative = 0.0;
    let mut threshold = 0.0;
    for (k, &value) in sorted.iter().enumerate() {
        cumulative += value;
        let candidate = (cumulative - 1.0) / (k + 1) as f64;
        if value - candidate > 0.0 {
            threshold = candidate;
        }
    }

    values.iter().map(|&v| (v - threshold).max(0.0)).collect()
}
