use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use crate::model::errors::Error;

/// Tolerance below zero that an allocation entry may reach before the result is refused.
pub const NEGATIVITY_TOLERANCE: f64 = 1e-9;

/// Tolerance around one for the column sums of the allocation matrix.
pub const COLUMN_SUM_TOLERANCE: f64 = 1e-6;

/// Status reported by a solver. Infeasibility is a status, not an error: callers receive a
/// zero allocation tagged with [SolverStatus::Infeasible] and an explanation in the metadata.
#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Debug)]
#[serde(rename_all = "lowercase")]
pub enum SolverStatus {
    Optimal,
    Feasible,
    Infeasible,
}

impl Display for SolverStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            SolverStatus::Optimal => write!(f, "optimal"),
            SolverStatus::Feasible => write!(f, "feasible"),
            SolverStatus::Infeasible => write!(f, "infeasible"),
        }
    }
}

/// Result of one allocation solve: the allocation matrix, the realized utilities, the
/// solver-specific objective and a free-form metadata bag with engine diagnostics.
#[derive(Serialize, Deserialize, PartialEq, Clone, Debug)]
pub struct AllocationResult {
    /// Fraction of each good assigned to each agent, one row per agent and one column per good.
    /// Every column sums to one unless the status is infeasible.
    pub allocation: DMatrix<f64>,

    /// Realized utility per agent under this allocation.
    pub utilities: DVector<f64>,

    /// Solver-specific objective: the minimum weighted utility for max-min, the weighted log
    /// welfare for Nash.
    pub objective_value: f64,

    pub solver_status: SolverStatus,

    /// Wall-clock seconds spent in the solve.
    pub solve_time: f64,

    /// Free-form diagnostics: algorithm name, engine messages, iteration counts and similar.
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl AllocationResult {
    /// Builds a result and refuses allocations that violate the construction invariants:
    /// entries below -[NEGATIVITY_TOLERANCE], columns not summing to one within
    /// [COLUMN_SUM_TOLERANCE], or a utility vector whose length doesn't match the matrix.
    /// The allocation checks are suppressed for infeasible results, which carry an all-zeros
    /// matrix by convention.
    pub fn new(
        allocation: DMatrix<f64>,
        utilities: DVector<f64>,
        objective_value: f64,
        solver_status: SolverStatus,
        solve_time: f64,
        metadata: BTreeMap<String, serde_json::Value>,
    ) -> Result<AllocationResult, Error> {
        let (n_agents, n_goods) = allocation.shape();

        if utilities.len() != n_agents {
            return Err(Error::numeric(
                "utilities-shape-mismatch",
                format!(
                    "Utility vector has {} entries which doesn't match the number of agents {}.",
                    utilities.len(),
                    n_agents
                ),
            ));
        }

        if solver_status != SolverStatus::Infeasible {
            for i in 0..n_agents {
                for j in 0..n_goods {
                    if allocation[(i, j)] < -NEGATIVITY_TOLERANCE {
                        return Err(Error::numeric(
                            "allocation-contains-negative-values",
                            format!(
                                "Allocation entry for agent {i} and good {j} is {} which is \
                                below the negativity tolerance.",
                                allocation[(i, j)]
                            ),
                        ));
                    }
                }
            }

            for j in 0..n_goods {
                let column_sum: f64 = allocation.column(j).sum();
                if (column_sum - 1.0).abs() > COLUMN_SUM_TOLERANCE {
                    return Err(Error::numeric(
                        "good-not-fully-allocated",
                        format!("Good {j} is allocated to {column_sum} instead of 1."),
                    ));
                }
            }
        }

        Ok(AllocationResult {
            allocation,
            utilities,
            objective_value,
            solver_status,
            solve_time,
            metadata,
        })
    }

    /// Builds the tagged value for a program without a feasible point: zero allocation, zero
    /// utilities and an explanation under the `error` metadata key.
    pub fn infeasible(
        n_agents: usize,
        n_goods: usize,
        solve_time: f64,
        message: impl Into<String>,
    ) -> AllocationResult {
        let mut metadata = BTreeMap::new();
        metadata.insert(
            "error".to_string(),
            serde_json::Value::String(message.into()),
        );

        AllocationResult {
            allocation: DMatrix::zeros(n_agents, n_goods),
            utilities: DVector::zeros(n_agents),
            objective_value: 0.0,
            solver_status: SolverStatus::Infeasible,
            solve_time,
            metadata,
        }
    }
}
