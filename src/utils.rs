use nalgebra::{DMatrix, DVector};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::model::errors::Error;
use crate::model::inputs::SolverInputs;

/// Macro for asserting that the two numbers are close to each other with a given absolute
/// tolerance. Used in tests.
#[macro_export]
macro_rules! assert_close {
    ($expected:expr, $actual:expr, $abs_tolerance:expr) => {
        assert!(
            ($actual - $expected).abs() < $abs_tolerance,
            "Expected close to {}, got {}, which is outside of tolerance {}",
            $expected,
            $actual,
            $abs_tolerance
        );
    };
}

pub use assert_close;

/// Validates a utility matrix and entitlement vector and returns (n_agents, n_goods).
pub fn validate_inputs(
    utilities: &DMatrix<f64>,
    entitlements: &DVector<f64>,
) -> Result<(usize, usize), Error> {
    let inputs = SolverInputs::new(utilities.clone(), entitlements.clone());
    inputs.validate().into_result()?;
    Ok((inputs.n_agents(), inputs.n_goods()))
}

/// Rescales each column of an allocation so the good is fully allocated, correcting small
/// numerical drift. A column summing to roughly zero is replaced by an equal split.
pub fn normalize_allocation(allocation: &DMatrix<f64>, tolerance: f64) -> DMatrix<f64> {
    let mut normalized = allocation.clone();
    let (n_agents, n_goods) = normalized.shape();

    for j in 0..n_goods {
        let column_sum: f64 = normalized.column(j).sum();
        if (column_sum - 1.0).abs() > tolerance {
            if column_sum > tolerance {
                for i in 0..n_agents {
                    normalized[(i, j)] /= column_sum;
                }
            } else {
                for i in 0..n_agents {
                    normalized[(i, j)] = 1.0 / n_agents as f64;
                }
            }
        }
    }

    normalized
}

/// Generates a utility matrix with entries drawn uniformly from [low, high). A fixed seed
/// makes the instance reproducible across runs.
pub fn generate_random_utilities(
    n_agents: usize,
    n_goods: usize,
    low: f64,
    high: f64,
    seed: u64,
) -> DMatrix<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    DMatrix::from_fn(n_agents, n_goods, |_, _| rng.gen_range(low..high))
}

/// Generates a symmetric instance: every agent shares the same utility row.
pub fn generate_symmetric_utilities(
    n_agents: usize,
    utilities_per_agent: &DVector<f64>,
) -> DMatrix<f64> {
    DMatrix::from_fn(n_agents, utilities_per_agent.len(), |_, j| {
        utilities_per_agent[j]
    })
}
