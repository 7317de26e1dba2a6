use bitvec::order::Lsb0;
use bitvec::vec::BitVec;
use nalgebra::{DMatrix, DVector};

use crate::model::errors::Findings;

/// Default floor for agent utilities. Keeps the max-min auxiliary variable and the Nash
/// logarithms away from zero.
pub const DEFAULT_EPSILON: f64 = 1e-6;

/// Mask of forbidden agent-good pairs, stored as one bit per pair in row-major order.
/// A cleared bit forbids the agent from receiving any fraction of the good.
#[derive(PartialEq, Clone, Debug)]
pub struct RestrictionMask {
    bits: BitVec<usize, Lsb0>,
    n_agents: usize,
    n_goods: usize,
}

impl RestrictionMask {
    /// Creates a mask with every agent-good pair allowed.
    pub fn allow_all(n_agents: usize, n_goods: usize) -> RestrictionMask {
        RestrictionMask {
            bits: BitVec::repeat(true, n_agents * n_goods),
            n_agents,
            n_goods,
        }
    }

    /// Forbids the given agent from receiving any fraction of the given good.
    pub fn forbid(&mut self, agent: usize, good: usize) {
        let index = agent * self.n_goods + good;
        self.bits.set(index, false);
    }

    pub fn is_allowed(&self, agent: usize, good: usize) -> bool {
        self.bits[agent * self.n_goods + good]
    }

    pub fn n_forbidden(&self) -> usize {
        self.bits.count_zeros()
    }

    pub fn n_agents(&self) -> usize {
        self.n_agents
    }

    pub fn n_goods(&self) -> usize {
        self.n_goods
    }
}

/// Everything the solvers need to state their optimization programs: the utility matrix, the
/// entitlement weights and the optional restriction mask and value-budget pair. Constructed once
/// (usually by the loader) and only read afterwards.
#[derive(PartialEq, Clone, Debug)]
pub struct SolverInputs {
    /// Utility matrix with one row per agent and one column per good. Entries must be
    /// non-negative.
    pub utilities: DMatrix<f64>,

    /// Entitlement weights, one per agent. Entries must be strictly positive.
    pub entitlements: DVector<f64>,

    /// Optional mask of forbidden agent-good pairs.
    pub restrictions: Option<RestrictionMask>,

    /// Optional monetary value per good, used only by the value-budget variant of max-min.
    pub good_values: Option<DVector<f64>>,

    /// Optional budget paired with [SolverInputs::good_values].
    pub budget: Option<f64>,

    /// Strict positivity floor for agent utilities.
    pub epsilon: f64,
}

impl SolverInputs {
    pub fn new(utilities: DMatrix<f64>, entitlements: DVector<f64>) -> SolverInputs {
        SolverInputs {
            utilities,
            entitlements,
            restrictions: None,
            good_values: None,
            budget: None,
            epsilon: DEFAULT_EPSILON,
        }
    }

    /// Returns new inputs with the given utility floor. The contents of the original object are
    /// moved into the new one.
    pub fn with_epsilon(self, epsilon: f64) -> SolverInputs {
        SolverInputs { epsilon, ..self }
    }

    /// Returns new inputs with the given restriction mask.
    pub fn with_restrictions(self, restrictions: RestrictionMask) -> SolverInputs {
        SolverInputs {
            restrictions: Some(restrictions),
            ..self
        }
    }

    /// Returns new inputs with the value-budget pair that activates the budget constraint of the
    /// max-min solver.
    pub fn with_value_budget(self, good_values: DVector<f64>, budget: f64) -> SolverInputs {
        SolverInputs {
            good_values: Some(good_values),
            budget: Some(budget),
            ..self
        }
    }

    pub fn n_agents(&self) -> usize {
        self.utilities.nrows()
    }

    pub fn n_goods(&self) -> usize {
        self.utilities.ncols()
    }

    /// Entitlement weights normalized to sum to one.
    pub fn normalized_weights(&self) -> DVector<f64> {
        &self.entitlements / self.entitlements.sum()
    }

    /// Whether the given agent may receive a fraction of the given good.
    pub fn is_allowed(&self, agent: usize, good: usize) -> bool {
        self.restrictions
            .as_ref()
            .map_or(true, |r| r.is_allowed(agent, good))
    }

    /// Checks shapes, signs and the epsilon floor, collecting every defect found. The solvers
    /// run this before touching an engine and refuse on the first rejection.
    pub fn validate(&self) -> Findings {
        let mut findings = Findings::new();

        self.check_entitlements_shape(&mut findings);
        self.check_utilities_non_negative(&mut findings);
        self.check_entitlements_strictly_positive(&mut findings);
        self.check_epsilon(&mut findings);
        self.check_restrictions_shape(&mut findings);
        self.check_value_budget(&mut findings);

        findings
    }

    fn check_entitlements_shape(&self, findings: &mut Findings) {
        if self.entitlements.len() != self.n_agents() {
            findings.reject(
                "entitlements-shape-mismatch",
                format!(
                    "Entitlements have {} entries which doesn't match the number of agents {}.",
                    self.entitlements.len(),
                    self.n_agents()
                ),
            );
        }
    }

    fn check_utilities_non_negative(&self, findings: &mut Findings) {
        for i in 0..self.n_agents() {
            for j in 0..self.n_goods() {
                let u = self.utilities[(i, j)];
                if u < 0.0 || u.is_nan() {
                    findings.reject(
                        "utilities-must-be-non-negative",
                        format!(
                            "Utilities must be non-negative. Found {u} for agent {i} and good {j}."
                        ),
                    );
                    return;
                }
            }
        }
    }

    fn check_entitlements_strictly_positive(&self, findings: &mut Findings) {
        for (i, &w) in self.entitlements.iter().enumerate() {
            if !(w > 0.0) {
                findings.reject(
                    "entitlements-must-be-strictly-positive",
                    format!("Entitlements must be strictly positive. Found {w} for agent {i}."),
                );
                return;
            }
        }
    }

    fn check_epsilon(&self, findings: &mut Findings) {
        if !(self.epsilon > 0.0) {
            findings.reject(
                "epsilon-must-be-positive",
                format!(
                    "The utility floor epsilon must be positive. You provided {}.",
                    self.epsilon
                ),
            );
        }
    }

    fn check_restrictions_shape(&self, findings: &mut Findings) {
        if let Some(mask) = &self.restrictions {
            if mask.n_agents() != self.n_agents() || mask.n_goods() != self.n_goods() {
                findings.reject(
                    "restrictions-shape-mismatch",
                    format!(
                        "Restriction mask is {}x{} which doesn't match the {}x{} utility matrix.",
                        mask.n_agents(),
                        mask.n_goods(),
                        self.n_agents(),
                        self.n_goods()
                    ),
                );
            }
        }
    }

    fn check_value_budget(&self, findings: &mut Findings) {
        if let Some(values) = &self.good_values {
            if values.len() != self.n_goods() {
                findings.reject(
                    "good-values-shape-mismatch",
                    format!(
                        "Good values have {} entries which doesn't match the number of goods {}.",
                        values.len(),
                        self.n_goods()
                    ),
                );
            }
            for (j, &v) in values.iter().enumerate() {
                if v < 0.0 || v.is_nan() {
                    findings.reject(
                        "good-values-must-be-non-negative",
                        format!("Good values must be non-negative. Found {v} for good {j}."),
                    );
                    break;
                }
            }
        }

        if let Some(budget) = self.budget {
            if budget < 0.0 || budget.is_nan() {
                findings.reject(
                    "budget-must-be-non-negative",
                    format!("The budget must be non-negative. You provided {budget}."),
                );
            }
            if self.good_values.is_none() {
                findings.warn(
                    "budget-without-good-values",
                    "A budget was provided without good values and is ignored.",
                );
            }
        }
    }
}
