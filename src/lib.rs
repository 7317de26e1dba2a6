pub mod diagnostics;
pub mod env;
pub mod loader;
pub mod model;
pub mod solvers;
pub mod utils;

use crate::env::create_discard_logger;

pub use crate::diagnostics::{analyze_fairness, check_ef1, compute_envy_matrix, DEFAULT_TOLERANCE};
pub use crate::model::errors::{Error, ErrorKind, Finding, Findings, Severity};
pub use crate::model::inputs::{RestrictionMask, SolverInputs, DEFAULT_EPSILON};
pub use crate::model::report::FairnessReport;
pub use crate::model::result::{AllocationResult, SolverStatus};
pub use crate::solvers::{MaxMinSolver, NashSolver};
pub use crate::utils::{
    generate_random_utilities, generate_symmetric_utilities, normalize_allocation, validate_inputs,
};

/// Computes the egalitarian allocation: the one maximizing the smallest entitlement-weighted
/// utility across agents. Runs without logging; use [MaxMinSolver] directly to attach a logger
/// or a time limit.
pub fn solve_maxmin_allocation(inputs: &SolverInputs) -> Result<AllocationResult, Error> {
    let logger = create_discard_logger();
    MaxMinSolver::new(&logger).solve(inputs)
}

/// Computes the allocation maximizing the Nash social welfare, the entitlement-weighted sum of
/// log utilities. Runs without logging; use [NashSolver] directly to attach a logger or tune
/// the iteration budget.
pub fn solve_nash_allocation(inputs: &SolverInputs) -> Result<AllocationResult, Error> {
    let logger = create_discard_logger();
    NashSolver::new(&logger).solve(inputs)
}
