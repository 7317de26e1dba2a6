use nalgebra::{DMatrix, DVector};
use num_traits::pow::Pow;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::model::errors::{Error, Findings};
use crate::model::inputs::{RestrictionMask, SolverInputs};

pub type AgentId = String;
pub type GoodId = String;

/// How the agents expressed their preferences: monetary bids per good, or 1-5 star ratings
/// converted into utilities through the rating weight.
#[derive(Serialize, Deserialize, JsonSchema, PartialEq, Eq, Clone, Copy, Debug)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionMethod {
    Bids,
    Ratings,
}

/// A participant claiming a share of the allocation. A zero share means "use the default fill":
/// the entitlement left over by the explicit shares, split equally.
#[derive(Serialize, Deserialize, JsonSchema, Clone, Debug)]
pub struct AgentClaim {
    pub id: AgentId,
    pub name: String,
    #[serde(default)]
    pub share_of_entitlement: f64,
}

/// A divisible good with the monetary value the parties agreed on.
#[derive(Serialize, Deserialize, JsonSchema, Clone, Debug)]
pub struct Good {
    pub id: GoodId,
    pub name: String,
    pub estimated_value: f64,
}

/// One agent's stated preference for one good. Bids carry a monetary amount; ratings carry a
/// star count that the loader converts with `rating_weight^(stars - 3) * estimated_value`.
#[derive(Serialize, Deserialize, JsonSchema, Clone, Debug)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Valuation {
    Bid {
        agent_id: AgentId,
        good_id: GoodId,
        amount: f64,
    },
    Rating {
        agent_id: AgentId,
        good_id: GoodId,
        stars: u8,
    },
}

impl Valuation {
    pub fn agent_id(&self) -> &AgentId {
        match self {
            Valuation::Bid { agent_id, .. } => agent_id,
            Valuation::Rating { agent_id, .. } => agent_id,
        }
    }

    pub fn good_id(&self) -> &GoodId {
        match self {
            Valuation::Bid { good_id, .. } => good_id,
            Valuation::Rating { good_id, .. } => good_id,
        }
    }

    /// Whether this valuation is the kind the resolution method consumes.
    fn matches(&self, method: ResolutionMethod) -> bool {
        matches!(
            (self, method),
            (Valuation::Bid { .. }, ResolutionMethod::Bids)
                | (Valuation::Rating { .. }, ResolutionMethod::Ratings)
        )
    }
}

/// An agent-good pair that must receive no fraction at all.
#[derive(Serialize, Deserialize, JsonSchema, Clone, Debug)]
pub struct RestrictedAssignment {
    pub agent_id: AgentId,
    pub good_id: GoodId,
}

fn default_bounds_percentage() -> f64 {
    0.25
}

fn default_rating_weight() -> f64 {
    1.1
}

/// The dispute aggregate: agents, goods, their stated preferences and the numeric parameters.
/// This is the only integration surface of the core; everything else of a dispute's lifecycle
/// stays outside the library.
#[derive(Serialize, Deserialize, JsonSchema, Clone, Debug)]
pub struct Dispute {
    pub name: String,
    pub resolution_method: ResolutionMethod,

    /// Slack on top of the total good value when deriving the budget, in [0, 1].
    #[serde(default = "default_bounds_percentage")]
    pub bounds_percentage: f64,

    /// Base of the rating-to-utility conversion, in [1, 2]. Three stars map to the good's
    /// estimated value; each star above or below multiplies or divides by this weight.
    #[serde(default = "default_rating_weight")]
    pub rating_weight: f64,

    pub agents: Vec<AgentClaim>,
    pub goods: Vec<Good>,

    #[serde(default)]
    pub valuations: Vec<Valuation>,

    #[serde(default)]
    pub restricted_assignments: Vec<RestrictedAssignment>,
}

/// Solver inputs together with the orderings that map matrix rows and columns back to ids.
#[derive(Clone, Debug)]
pub struct LoadedDispute {
    pub inputs: SolverInputs,
    pub agent_order: Vec<AgentId>,
    pub good_order: Vec<GoodId>,
}

/// Creates a dispute from YAML and validates it, failing on the first rejection.
pub fn create_dispute(yaml_string: &str) -> Result<Dispute, Error> {
    let dispute: Dispute = serde_yaml::from_str(yaml_string).map_err(|e| {
        Error::invalid_input(
            "dispute-yaml-malformed",
            format!("Could not parse the dispute document: {e}."),
        )
    })?;

    dispute.validate().into_result()?;
    Ok(dispute)
}

impl Dispute {
    /// Flattens the aggregate into [SolverInputs]: the utility matrix (from bids or ratings),
    /// the filled entitlement vector, the restriction mask and the value-budget pair. Agents
    /// and goods keep their declaration order, which is returned so solver outputs can be
    /// mapped back to ids.
    pub fn to_solver_inputs(&self) -> Result<LoadedDispute, Error> {
        self.validate().into_result()?;

        let n_agents = self.agents.len();
        let n_goods = self.goods.len();

        let agent_index: HashMap<&str, usize> = self
            .agents
            .iter()
            .enumerate()
            .map(|(i, a)| (a.id.as_str(), i))
            .collect();
        let good_index: HashMap<&str, usize> = self
            .goods
            .iter()
            .enumerate()
            .map(|(j, g)| (g.id.as_str(), j))
            .collect();

        let mut utilities = DMatrix::zeros(n_agents, n_goods);
        for valuation in &self.valuations {
            if !valuation.matches(self.resolution_method) {
                continue;
            }
            let i = agent_index[valuation.agent_id().as_str()];
            let j = good_index[valuation.good_id().as_str()];
            utilities[(i, j)] = match valuation {
                Valuation::Bid { amount, .. } => *amount,
                Valuation::Rating { stars, .. } => {
                    self.rating_weight.pow(*stars as i32 - 3) * self.goods[j].estimated_value
                }
            };
        }

        let entitlements = self.fill_entitlements();

        let good_values = DVector::from_iterator(
            n_goods,
            self.goods.iter().map(|g| g.estimated_value),
        );
        let total_value: f64 = good_values.sum();
        let budget = total_value + self.bounds_percentage * total_value;

        let mut inputs = SolverInputs::new(utilities, entitlements)
            .with_value_budget(good_values, budget);

        if !self.restricted_assignments.is_empty() {
            let mut mask = RestrictionMask::allow_all(n_agents, n_goods);
            for restriction in &self.restricted_assignments {
                mask.forbid(
                    agent_index[restriction.agent_id.as_str()],
                    good_index[restriction.good_id.as_str()],
                );
            }
            inputs = inputs.with_restrictions(mask);
        }

        Ok(LoadedDispute {
            inputs,
            agent_order: self.agents.iter().map(|a| a.id.clone()).collect(),
            good_order: self.goods.iter().map(|g| g.id.clone()).collect(),
        })
    }

    /// Agents with an explicit positive share keep it; the remainder up to one is split equally
    /// among the agents without one. When every agent is explicit, any residual is discarded.
    fn fill_entitlements(&self) -> DVector<f64> {
        let explicit_total: f64 = self
            .agents
            .iter()
            .map(|a| a.share_of_entitlement)
            .filter(|&s| s > 0.0)
            .sum();
        let n_without_share = self
            .agents
            .iter()
            .filter(|a| a.share_of_entitlement <= 0.0)
            .count();

        let residual = 1.0 - explicit_total;
        let default_share = if residual >= 0.0 && n_without_share > 0 {
            residual / n_without_share as f64
        } else {
            0.0
        };

        DVector::from_iterator(
            self.agents.len(),
            self.agents.iter().map(|a| {
                if a.share_of_entitlement > 0.0 {
                    a.share_of_entitlement
                } else {
                    default_share
                }
            }),
        )
    }

    /// Checks the aggregate: non-empty sides, unique ids, resolvable references, in-range
    /// parameters and consistent valuations. Rejections block loading, warnings do not.
    pub fn validate(&self) -> Findings {
        let mut findings = Findings::new();

        if self.agents.is_empty() {
            findings.reject(
                "dispute-has-no-agents",
                format!("Dispute {} has no agents.", self.name),
            );
        }
        if self.goods.is_empty() {
            findings.reject(
                "dispute-has-no-goods",
                format!("Dispute {} has no goods.", self.name),
            );
        }

        let agent_ids: HashSet<&str> = self.agents.iter().map(|a| a.id.as_str()).collect();
        if agent_ids.len() != self.agents.len() {
            findings.reject(
                "agent-ids-must-be-unique",
                "All agent ids must be unique. Check your input.",
            );
        }
        let good_ids: HashSet<&str> = self.goods.iter().map(|g| g.id.as_str()).collect();
        if good_ids.len() != self.goods.len() {
            findings.reject(
                "good-ids-must-be-unique",
                "All good ids must be unique. Check your input.",
            );
        }

        self.check_parameters(&mut findings);
        self.check_shares(&mut findings);
        self.check_goods(&mut findings);
        self.check_valuations(&agent_ids, &good_ids, &mut findings);
        self.check_restrictions(&agent_ids, &good_ids, &mut findings);

        findings
    }

    fn check_parameters(&self, findings: &mut Findings) {
        if !(0.0..=1.0).contains(&self.bounds_percentage) {
            findings.reject(
                "bounds-percentage-out-of-range",
                format!(
                    "Bounds percentage must be between 0 and 1. You provided {}.",
                    self.bounds_percentage
                ),
            );
        }
        if !(1.0..=2.0).contains(&self.rating_weight) {
            findings.reject(
                "rating-weight-out-of-range",
                format!(
                    "Rating weight must be between 1 and 2. You provided {}.",
                    self.rating_weight
                ),
            );
        }
    }

    fn check_shares(&self, findings: &mut Findings) {
        for agent in &self.agents {
            if agent.share_of_entitlement < 0.0 || agent.share_of_entitlement > 1.0 {
                findings.reject(
                    "share-of-entitlement-out-of-range",
                    format!(
                        "Share of entitlement for agent {} must be between 0 and 1. You \
                        provided {}.",
                        agent.id, agent.share_of_entitlement
                    ),
                );
            }
        }

        let explicit_total: f64 = self
            .agents
            .iter()
            .map(|a| a.share_of_entitlement)
            .filter(|&s| s > 0.0)
            .sum();
        let n_without_share = self
            .agents
            .iter()
            .filter(|a| a.share_of_entitlement <= 0.0)
            .count();

        if explicit_total > 1.0 {
            findings.reject(
                "explicit-entitlement-shares-exceed-one",
                format!(
                    "The explicit shares of entitlement sum up to {explicit_total} which \
                    exceeds 1."
                ),
            );
        } else if explicit_total < 1.0 && n_without_share == 0 && !self.agents.is_empty() {
            findings.warn(
                "unallocated-entitlement-share-discarded",
                format!(
                    "All agents carry explicit shares summing up to {explicit_total}; the \
                    remaining entitlement is discarded."
                ),
            );
        }
    }

    fn check_goods(&self, findings: &mut Findings) {
        for good in &self.goods {
            if good.estimated_value < 0.0 {
                findings.reject(
                    "estimated-value-must-be-non-negative",
                    format!(
                        "Estimated value of good {} must be non-negative. You provided {}.",
                        good.id, good.estimated_value
                    ),
                );
            }
        }
    }

    fn check_valuations(
        &self,
        agent_ids: &HashSet<&str>,
        good_ids: &HashSet<&str>,
        findings: &mut Findings,
    ) {
        let mut seen_pairs: HashSet<(&str, &str)> = HashSet::new();

        for valuation in &self.valuations {
            let agent_id = valuation.agent_id().as_str();
            let good_id = valuation.good_id().as_str();

            if !agent_ids.contains(agent_id) {
                findings.reject(
                    "valuation-references-unknown-agent",
                    format!("A valuation references unknown agent {agent_id}."),
                );
            }
            if !good_ids.contains(good_id) {
                findings.reject(
                    "valuation-references-unknown-good",
                    format!("A valuation references unknown good {good_id}."),
                );
            }
            if !seen_pairs.insert((agent_id, good_id)) {
                findings.reject(
                    "duplicate-valuation-for-agent-and-good",
                    format!("Agent {agent_id} has more than one valuation for good {good_id}."),
                );
            }

            match valuation {
                Valuation::Bid { amount, .. } if *amount < 0.0 => {
                    findings.reject(
                        "bid-amount-must-be-non-negative",
                        format!(
                            "Bid of agent {agent_id} for good {good_id} must be non-negative. \
                            You provided {amount}."
                        ),
                    );
                }
                Valuation::Rating { stars, .. } if !(1..=5).contains(stars) => {
                    findings.reject(
                        "rating-must-be-between-one-and-five",
                        format!(
                            "Rating of agent {agent_id} for good {good_id} must be between 1 \
                            and 5 stars. You provided {stars}."
                        ),
                    );
                }
                _ => {}
            }

            if !valuation.matches(self.resolution_method) {
                findings.warn(
                    "valuation-ignored-for-resolution-method",
                    format!(
                        "The valuation of agent {agent_id} for good {good_id} doesn't match \
                        the resolution method and is ignored."
                    ),
                );
            }
        }
    }

    fn check_restrictions(
        &self,
        agent_ids: &HashSet<&str>,
        good_ids: &HashSet<&str>,
        findings: &mut Findings,
    ) {
        for restriction in &self.restricted_assignments {
            if !agent_ids.contains(restriction.agent_id.as_str()) {
                findings.reject(
                    "restriction-references-unknown-agent",
                    format!(
                        "A restriction references unknown agent {}.",
                        restriction.agent_id
                    ),
                );
            }
            if !good_ids.contains(restriction.good_id.as_str()) {
                findings.reject(
                    "restriction-references-unknown-good",
                    format!(
                        "A restriction references unknown good {}.",
                        restriction.good_id
                    ),
                );
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::assert_close;
    use crate::model::errors::Severity;

    const TEST_YAML: &str = "
        name: Estate of a late relative
        resolution_method: bids
        agents:
          - id: alice
            name: Alice
          - id: bob
            name: Bob
        goods:
          - id: house
            name: The house
            estimated_value: 300000.0
          - id: car
            name: The car
            estimated_value: 20000.0
        valuations:
          - type: bid
            agent_id: alice
            good_id: house
            amount: 310000.0
          - type: bid
            agent_id: bob
            good_id: car
            amount: 25000.0
    ";

    fn rating_dispute() -> Dispute {
        Dispute {
            name: "Rated estate".to_string(),
            resolution_method: ResolutionMethod::Ratings,
            bounds_percentage: 0.25,
            rating_weight: 1.1,
            agents: vec![
                AgentClaim {
                    id: "alice".to_string(),
                    name: "Alice".to_string(),
                    share_of_entitlement: 0.0,
                },
                AgentClaim {
                    id: "bob".to_string(),
                    name: "Bob".to_string(),
                    share_of_entitlement: 0.0,
                },
            ],
            goods: vec![Good {
                id: "house".to_string(),
                name: "The house".to_string(),
                estimated_value: 100.0,
            }],
            valuations: vec![
                Valuation::Rating {
                    agent_id: "alice".to_string(),
                    good_id: "house".to_string(),
                    stars: 5,
                },
                Valuation::Rating {
                    agent_id: "bob".to_string(),
                    good_id: "house".to_string(),
                    stars: 1,
                },
            ],
            restricted_assignments: vec![],
        }
    }

    #[test]
    fn test_create_dispute_from_yaml() {
        let dispute = create_dispute(TEST_YAML).unwrap();

        assert_eq!(dispute.name, "Estate of a late relative");
        assert_eq!(dispute.resolution_method, ResolutionMethod::Bids);
        assert_eq!(dispute.bounds_percentage, 0.25);
        assert_eq!(dispute.rating_weight, 1.1);
        assert_eq!(dispute.agents.len(), 2);
        assert_eq!(dispute.goods.len(), 2);
        assert_eq!(dispute.valuations.len(), 2);
    }

    #[test]
    fn test_bids_fill_the_utility_matrix_in_declaration_order() {
        let dispute = create_dispute(TEST_YAML).unwrap();
        let loaded = dispute.to_solver_inputs().unwrap();

        assert_eq!(loaded.agent_order, vec!["alice", "bob"]);
        assert_eq!(loaded.good_order, vec!["house", "car"]);
        assert_eq!(loaded.inputs.utilities[(0, 0)], 310000.0);
        assert_eq!(loaded.inputs.utilities[(0, 1)], 0.0);
        assert_eq!(loaded.inputs.utilities[(1, 0)], 0.0);
        assert_eq!(loaded.inputs.utilities[(1, 1)], 25000.0);
    }

    #[test]
    fn test_ratings_use_the_weighted_value_formula() {
        let loaded = rating_dispute().to_solver_inputs().unwrap();

        // Five stars: 1.1^2 * 100, one star: 1.1^-2 * 100.
        assert_close!(121.0, loaded.inputs.utilities[(0, 0)], 1e-9);
        assert_close!(100.0 / 1.21, loaded.inputs.utilities[(1, 0)], 1e-9);
    }

    #[test]
    fn test_missing_valuations_default_to_zero_utility() {
        let mut dispute = create_dispute(TEST_YAML).unwrap();
        dispute.valuations.pop();
        let loaded = dispute.to_solver_inputs().unwrap();

        assert_eq!(loaded.inputs.utilities[(1, 1)], 0.0);
    }

    #[test]
    fn test_entitlement_fill_splits_the_residual_equally() {
        let mut dispute = create_dispute(TEST_YAML).unwrap();
        dispute.agents[0].share_of_entitlement = 0.5;
        dispute.agents.push(AgentClaim {
            id: "carol".to_string(),
            name: "Carol".to_string(),
            share_of_entitlement: 0.0,
        });

        let entitlements = dispute.fill_entitlements();

        assert_close!(0.5, entitlements[0], 1e-12);
        assert_close!(0.25, entitlements[1], 1e-12);
        assert_close!(0.25, entitlements[2], 1e-12);
    }

    #[test]
    fn test_entitlement_fill_defaults_to_equal_split() {
        let dispute = create_dispute(TEST_YAML).unwrap();
        let entitlements = dispute.fill_entitlements();

        assert_close!(0.5, entitlements[0], 1e-12);
        assert_close!(0.5, entitlements[1], 1e-12);
    }

    #[test]
    fn test_residual_is_discarded_when_every_agent_is_explicit() {
        let mut dispute = create_dispute(TEST_YAML).unwrap();
        dispute.agents[0].share_of_entitlement = 0.4;
        dispute.agents[1].share_of_entitlement = 0.4;

        let entitlements = dispute.fill_entitlements();
        assert_close!(0.4, entitlements[0], 1e-12);
        assert_close!(0.4, entitlements[1], 1e-12);

        let findings = dispute.validate();
        assert!(findings.iter().any(|f| {
            f.code == "unallocated-entitlement-share-discarded" && f.severity == Severity::Warning
        }));
        assert!(findings.into_result().is_ok());
    }

    #[test]
    fn test_budget_adds_the_bounds_percentage_on_top() {
        let dispute = create_dispute(TEST_YAML).unwrap();
        let loaded = dispute.to_solver_inputs().unwrap();

        assert_close!(400000.0, loaded.inputs.budget.unwrap(), 1e-6);
        assert_eq!(loaded.inputs.good_values.as_ref().unwrap().len(), 2);
    }

    #[test]
    fn test_restrictions_clear_mask_bits() {
        let mut dispute = create_dispute(TEST_YAML).unwrap();
        dispute.restricted_assignments.push(RestrictedAssignment {
            agent_id: "bob".to_string(),
            good_id: "house".to_string(),
        });

        let loaded = dispute.to_solver_inputs().unwrap();
        let mask = loaded.inputs.restrictions.unwrap();

        assert!(!mask.is_allowed(1, 0));
        assert!(mask.is_allowed(0, 0));
        assert_eq!(mask.n_forbidden(), 1);
    }

    #[test]
    fn test_duplicate_valuations_are_rejected() {
        let mut dispute = create_dispute(TEST_YAML).unwrap();
        dispute.valuations.push(Valuation::Bid {
            agent_id: "alice".to_string(),
            good_id: "house".to_string(),
            amount: 1.0,
        });

        let e = dispute.to_solver_inputs().err().unwrap();
        assert_eq!(e.code, "duplicate-valuation-for-agent-and-good");
    }

    #[test]
    fn test_valuation_for_unknown_agent_is_rejected() {
        let mut dispute = create_dispute(TEST_YAML).unwrap();
        dispute.valuations.push(Valuation::Bid {
            agent_id: "mallory".to_string(),
            good_id: "house".to_string(),
            amount: 1.0,
        });

        let e = dispute.to_solver_inputs().err().unwrap();
        assert_eq!(e.code, "valuation-references-unknown-agent");
    }

    #[test]
    fn test_out_of_range_rating_is_rejected() {
        let mut dispute = rating_dispute();
        dispute.valuations[0] = Valuation::Rating {
            agent_id: "alice".to_string(),
            good_id: "house".to_string(),
            stars: 6,
        };

        let e = dispute.to_solver_inputs().err().unwrap();
        assert_eq!(e.code, "rating-must-be-between-one-and-five");
    }

    #[test]
    fn test_mismatched_valuation_kind_is_ignored_with_a_warning() {
        let mut dispute = create_dispute(TEST_YAML).unwrap();
        dispute.valuations.push(Valuation::Rating {
            agent_id: "alice".to_string(),
            good_id: "car".to_string(),
            stars: 4,
        });

        let findings = dispute.validate();
        assert!(findings.iter().any(|f| {
            f.code == "valuation-ignored-for-resolution-method" && f.severity == Severity::Warning
        }));

        // Warnings don't block loading, and the rating contributes nothing under bids.
        let loaded = dispute.to_solver_inputs().unwrap();
        assert_eq!(loaded.inputs.utilities[(0, 1)], 0.0);
    }

    #[test]
    fn test_dispute_without_goods_is_rejected() {
        let mut dispute = create_dispute(TEST_YAML).unwrap();
        dispute.goods.clear();
        dispute.valuations.clear();

        let e = dispute.to_solver_inputs().err().unwrap();
        assert_eq!(e.code, "dispute-has-no-goods");
    }

    #[test]
    fn test_dispute_yaml_roundtrip() {
        let dispute = create_dispute(TEST_YAML).unwrap();
        let serialized = serde_yaml::to_string(&dispute).unwrap();
        let reparsed = create_dispute(&serialized).unwrap();

        assert_eq!(reparsed.agents.len(), dispute.agents.len());
        assert_eq!(reparsed.goods[0].estimated_value, 300000.0);
        assert_eq!(reparsed.resolution_method, ResolutionMethod::Bids);
    }
}
