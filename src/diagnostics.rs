use itertools::Itertools;
use nalgebra::{DMatrix, DVector};
use ordered_float::OrderedFloat;
use std::cmp::Reverse;

use crate::model::report::{EnviousPair, FairnessReport, FairnessSummary};

/// Default numerical tolerance for the fairness comparisons.
pub const DEFAULT_TOLERANCE: f64 = 1e-6;

/// Floor applied to utilities before taking logarithms for the Nash welfare aggregate.
const LOG_FLOOR: f64 = 1e-10;

/// Evaluates one allocation against the standard fairness and efficiency criteria: welfare
/// aggregates, envy, proportionality, symmetry, a heuristic Pareto check and a Gini coefficient.
/// A pure derivation over the given arrays; it always produces a report, even when every flag
/// comes out false.
pub fn analyze_fairness(
    allocation: &DMatrix<f64>,
    utilities: &DMatrix<f64>,
    entitlements: &DVector<f64>,
    tolerance: f64,
) -> FairnessReport {
    let realized_utilities: DVector<f64> = utilities.component_mul(allocation).column_sum();

    let total_utility = realized_utilities.sum();
    let min_utility = realized_utilities.min();

    let normalized_weights = entitlements / entitlements.sum();
    let log_nash: f64 = realized_utilities
        .iter()
        .zip(normalized_weights.iter())
        .map(|(&u, &w)| w * u.max(LOG_FLOOR).ln())
        .sum();
    let nash_welfare = log_nash.exp();

    let (is_pareto_efficient, pareto_check_note) =
        check_pareto_efficiency_heuristic(allocation, utilities, tolerance);

    let (envy_matrix, max_envy, is_envy_free, envious_pairs) =
        analyze_envy(allocation, utilities, &realized_utilities, tolerance);

    let proportional_shares: DVector<f64> = &normalized_weights * total_utility;
    let proportionality_gaps: DVector<f64> = &realized_utilities - &proportional_shares;
    let is_proportional = proportionality_gaps.iter().all(|&gap| gap >= -tolerance);

    let is_symmetric_instance = check_symmetric_instance(utilities, entitlements, tolerance);
    let is_symmetric_allocation =
        check_symmetric_allocation(&realized_utilities, utilities, entitlements, tolerance);

    let fairness_summary = FairnessSummary {
        overall_fairness_score: overall_fairness_score(
            is_pareto_efficient,
            is_envy_free,
            is_proportional,
            max_envy,
        ),
        num_envious_pairs: envious_pairs.len(),
        min_proportionality_gap: proportionality_gaps.min(),
        welfare_concentration: welfare_concentration(&realized_utilities),
    };

    FairnessReport {
        utilities: realized_utilities,
        total_utility,
        nash_welfare,
        min_utility,
        is_pareto_efficient,
        pareto_check_note,
        envy_matrix,
        max_envy,
        is_envy_free,
        envious_pairs,
        proportional_shares,
        proportionality_gaps,
        is_proportional,
        is_symmetric_instance,
        is_symmetric_allocation,
        fairness_summary,
    }
}

/// Agent i's utility for agent k's bundle under the given allocation.
fn bundle_utility(utilities: &DMatrix<f64>, allocation: &DMatrix<f64>, i: usize, k: usize) -> f64 {
    (0..allocation.ncols())
        .map(|j| utilities[(i, j)] * allocation[(k, j)])
        .sum()
}

/// Computes the envy matrix: entry (i, k) is max(0, U_i(bundle_k) - U_i(bundle_i)), with a zero
/// diagonal.
pub fn compute_envy_matrix(allocation: &DMatrix<f64>, utilities: &DMatrix<f64>) -> DMatrix<f64> {
    let realized_utilities: DVector<f64> = utilities.component_mul(allocation).column_sum();
    let n_agents = allocation.nrows();

    DMatrix::from_fn(n_agents, n_agents, |i, k| {
        if i == k {
            0.0
        } else {
            (bundle_utility(utilities, allocation, i, k) - realized_utilities[i]).max(0.0)
        }
    })
}

fn analyze_envy(
    allocation: &DMatrix<f64>,
    utilities: &DMatrix<f64>,
    realized_utilities: &DVector<f64>,
    tolerance: f64,
) -> (DMatrix<f64>, f64, bool, Vec<EnviousPair>) {
    let envy_matrix = compute_envy_matrix(allocation, utilities);
    let n_agents = allocation.nrows();

    let mut envious_pairs: Vec<EnviousPair> = Vec::new();
    for i in 0..n_agents {
        for k in 0..n_agents {
            if i == k {
                continue;
            }
            let envy = bundle_utility(utilities, allocation, i, k) - realized_utilities[i];
            if envy > tolerance {
                envious_pairs.push(EnviousPair {
                    agent: i,
                    envied: k,
                    amount: envy,
                });
            }
        }
    }
    envious_pairs.sort_by_key(|pair| Reverse(OrderedFloat(pair.amount)));

    let max_envy = envy_matrix.max();
    let is_envy_free = max_envy <= tolerance;

    (envy_matrix, max_envy, is_envy_free, envious_pairs)
}

/// Heuristic Pareto check. This is not a proof: it only reports inefficiency when it can
/// exhibit a witness, either a good that is not fully allocated or a pair of agents where one
/// holds a good it values at zero while the other values it positively and holds less than all
/// of it.
fn check_pareto_efficiency_heuristic(
    allocation: &DMatrix<f64>,
    utilities: &DMatrix<f64>,
    tolerance: f64,
) -> (bool, String) {
    let (n_agents, n_goods) = allocation.shape();

    for j in 0..n_goods {
        let column_sum: f64 = allocation.column(j).sum();
        if (column_sum - 1.0).abs() > tolerance {
            return (false, "goods not fully allocated".to_string());
        }
    }

    for j in 0..n_goods {
        for i in 0..n_agents {
            if allocation[(i, j)] > tolerance && utilities[(i, j)] < tolerance {
                for k in 0..n_agents {
                    if k != i
                        && utilities[(k, j)] > tolerance
                        && allocation[(k, j)] < 1.0 - tolerance
                    {
                        return (
                            false,
                            format!(
                                "good {j} allocated inefficiently (agent {i} values it at \
                                zero, agent {k} values it positively)"
                            ),
                        );
                    }
                }
            }
        }
    }

    (
        true,
        "no obvious inefficiency detected (heuristic)".to_string(),
    )
}

/// Whether every agent shares the same utility row and the same entitlement.
fn check_symmetric_instance(
    utilities: &DMatrix<f64>,
    entitlements: &DVector<f64>,
    tolerance: f64,
) -> bool {
    let n_agents = utilities.nrows();

    for i in 1..n_agents {
        for j in 0..utilities.ncols() {
            if (utilities[(i, j)] - utilities[(0, j)]).abs() > tolerance {
                return false;
            }
        }
        if (entitlements[i] - entitlements[0]).abs() > tolerance {
            return false;
        }
    }

    true
}

/// Whether every pair of interchangeable agents (identical utility row, equal entitlement)
/// realizes equal utility.
fn check_symmetric_allocation(
    realized_utilities: &DVector<f64>,
    utilities: &DMatrix<f64>,
    entitlements: &DVector<f64>,
    tolerance: f64,
) -> bool {
    let n_agents = utilities.nrows();

    for (i, k) in (0..n_agents).tuple_combinations() {
        let same_row = (0..utilities.ncols())
            .all(|j| (utilities[(i, j)] - utilities[(k, j)]).abs() <= tolerance);
        let same_entitlement = (entitlements[i] - entitlements[k]).abs() <= tolerance;

        if same_row
            && same_entitlement
            && (realized_utilities[i] - realized_utilities[k]).abs() > tolerance
        {
            return false;
        }
    }

    true
}

/// Checks envy-freeness up to one good: for every envious pair (i, k), removing some single
/// good from k's bundle must bring i's valuation of the reduced bundle back under i's own
/// utility. Mainly meaningful for discrete allocations.
pub fn check_ef1(allocation: &DMatrix<f64>, utilities: &DMatrix<f64>, tolerance: f64) -> bool {
    let (n_agents, n_goods) = allocation.shape();
    let realized_utilities: DVector<f64> = utilities.component_mul(allocation).column_sum();

    for i in 0..n_agents {
        for k in 0..n_agents {
            if i == k {
                continue;
            }

            let utility_for_bundle = bundle_utility(utilities, allocation, i, k);
            if utility_for_bundle - realized_utilities[i] <= tolerance {
                continue;
            }

            let some_removal_eliminates_envy = (0..n_goods).any(|j| {
                allocation[(k, j)] > tolerance && {
                    let reduced = utility_for_bundle - utilities[(i, j)] * allocation[(k, j)];
                    reduced - realized_utilities[i] <= tolerance
                }
            });

            if !some_removal_eliminates_envy {
                return false;
            }
        }
    }

    true
}

/// Qualitative five-tier label from the individual flags.
fn overall_fairness_score(
    is_pareto_efficient: bool,
    is_envy_free: bool,
    is_proportional: bool,
    max_envy: f64,
) -> String {
    if is_pareto_efficient && is_envy_free && is_proportional {
        "Excellent (Pareto + EF + Proportional)".to_string()
    } else if is_pareto_efficient && is_envy_free {
        "Very Good (Pareto + EF)".to_string()
    } else if is_pareto_efficient && max_envy < 0.1 {
        "Good (Pareto + Low Envy)".to_string()
    } else if is_pareto_efficient {
        "Fair (Pareto Efficient)".to_string()
    } else if is_envy_free {
        "Fair (Envy-Free)".to_string()
    } else {
        "Limited (Some fairness issues)".to_string()
    }
}

/// Gini coefficient of the realized utilities: 0 for perfect equality, approaching 1 for
/// maximal concentration. All-zero utilities count as perfectly equal.
fn welfare_concentration(realized_utilities: &DVector<f64>) -> f64 {
    let n = realized_utilities.len();
    if n == 0 {
        return 0.0;
    }

    let mut sorted: Vec<f64> = realized_utilities.iter().copied().collect();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let total: f64 = sorted.iter().sum();
    if total == 0.0 {
        return 0.0;
    }

    let weighted_sum: f64 = sorted
        .iter()
        .enumerate()
        .map(|(rank, &u)| (rank + 1) as f64 * u)
        .sum();

    (2.0 * weighted_sum) / (n as f64 * total) - (n as f64 + 1.0) / n as f64
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::assert_close;

    fn symmetric_instance() -> (DMatrix<f64>, DMatrix<f64>, DVector<f64>) {
        let allocation = DMatrix::from_row_slice(2, 2, &[1.0, 0.0, 0.0, 1.0]);
        let utilities = DMatrix::from_row_slice(2, 2, &[10.0, 5.0, 5.0, 10.0]);
        let entitlements = DVector::from_vec(vec![1.0, 1.0]);
        (allocation, utilities, entitlements)
    }

    #[test]
    fn test_envy_free_allocation_is_detected() {
        let (allocation, utilities, entitlements) = symmetric_instance();
        let report = analyze_fairness(&allocation, &utilities, &entitlements, DEFAULT_TOLERANCE);

        assert!(report.is_envy_free);
        assert!(report.max_envy <= DEFAULT_TOLERANCE);
        assert!(report.envious_pairs.is_empty());
        assert!(report.is_pareto_efficient);
        assert!(report.is_proportional);
        assert_close!(10.0, report.utilities[0], 1e-12);
        assert_close!(10.0, report.utilities[1], 1e-12);
    }

    #[test]
    fn test_envy_matrix_diagonal_is_zero() {
        let (allocation, utilities, _) = symmetric_instance();
        let envy = compute_envy_matrix(&allocation, &utilities);
        for i in 0..2 {
            assert_eq!(envy[(i, i)], 0.0);
        }
    }

    #[test]
    fn test_hand_built_envious_allocation() {
        // Agent 0 holds everything; agent 1 holds nothing and envies by its full valuation.
        let allocation = DMatrix::from_row_slice(2, 2, &[1.0, 1.0, 0.0, 0.0]);
        let utilities = DMatrix::from_row_slice(2, 2, &[10.0, 5.0, 5.0, 10.0]);
        let entitlements = DVector::from_vec(vec![1.0, 1.0]);

        let report = analyze_fairness(&allocation, &utilities, &entitlements, DEFAULT_TOLERANCE);

        assert!(!report.is_envy_free);
        assert_eq!(report.envious_pairs[0].agent, 1);
        assert_eq!(report.envious_pairs[0].envied, 0);
        assert_close!(15.0, report.envious_pairs[0].amount, 1e-12);
        assert!(report.proportionality_gaps[1] < 0.0);
        assert_eq!(report.fairness_summary.num_envious_pairs, 1);
    }

    #[test]
    fn test_envious_pairs_are_sorted_descending() {
        let allocation = DMatrix::from_row_slice(3, 2, &[1.0, 1.0, 0.0, 0.0, 0.0, 0.0]);
        let utilities = DMatrix::from_row_slice(3, 2, &[10.0, 5.0, 5.0, 10.0, 1.0, 1.0]);
        let entitlements = DVector::from_vec(vec![1.0, 1.0, 1.0]);

        let report = analyze_fairness(&allocation, &utilities, &entitlements, DEFAULT_TOLERANCE);

        let amounts: Vec<f64> = report.envious_pairs.iter().map(|p| p.amount).collect();
        assert!(amounts.windows(2).all(|w| w[0] >= w[1]));
        assert_close!(15.0, amounts[0], 1e-12);
    }

    #[test]
    fn test_proportionality_gaps_sum_to_zero() {
        let allocation = DMatrix::from_row_slice(2, 2, &[0.7, 0.2, 0.3, 0.8]);
        let utilities = DMatrix::from_row_slice(2, 2, &[10.0, 5.0, 5.0, 10.0]);
        let entitlements = DVector::from_vec(vec![2.0, 1.0]);

        let report = analyze_fairness(&allocation, &utilities, &entitlements, DEFAULT_TOLERANCE);

        let gap_sum: f64 = report.proportionality_gaps.iter().sum();
        // Shares are a weighted split of the same total the utilities sum to.
        let weighted_gap_check: f64 = report.proportional_shares.sum() - report.total_utility;
        assert_close!(0.0, weighted_gap_check, 1e-9);
        assert_close!(0.0, gap_sum, 1e-9);
    }

    #[test]
    fn test_pareto_heuristic_flags_wasted_good_with_witness() {
        // Agent 0 holds good 1 but values it at zero; agent 1 values it and holds none of it.
        let allocation = DMatrix::from_row_slice(2, 2, &[1.0, 1.0, 0.0, 0.0]);
        let utilities = DMatrix::from_row_slice(2, 2, &[10.0, 0.0, 5.0, 10.0]);
        let entitlements = DVector::from_vec(vec![1.0, 1.0]);

        let report = analyze_fairness(&allocation, &utilities, &entitlements, DEFAULT_TOLERANCE);

        assert!(!report.is_pareto_efficient);
        assert!(report.pareto_check_note.contains("good 1"));
        assert!(report.pareto_check_note.contains("agent 0"));
        assert!(report.pareto_check_note.contains("agent 1"));
    }

    #[test]
    fn test_pareto_heuristic_flags_underallocated_goods() {
        let allocation = DMatrix::from_row_slice(2, 2, &[0.5, 0.2, 0.3, 0.3]);
        let utilities = DMatrix::from_row_slice(2, 2, &[10.0, 5.0, 5.0, 10.0]);
        let entitlements = DVector::from_vec(vec![1.0, 1.0]);

        let report = analyze_fairness(&allocation, &utilities, &entitlements, DEFAULT_TOLERANCE);

        assert!(!report.is_pareto_efficient);
        assert_eq!(report.pareto_check_note, "goods not fully allocated");
    }

    #[test]
    fn test_symmetry_detection() {
        let utilities = DMatrix::from_row_slice(2, 3, &[7.0, 9.0, 5.0, 7.0, 9.0, 5.0]);
        let entitlements = DVector::from_vec(vec![1.0, 1.0]);
        let allocation = DMatrix::from_row_slice(2, 3, &[0.5, 0.5, 0.5, 0.5, 0.5, 0.5]);

        let report = analyze_fairness(&allocation, &utilities, &entitlements, DEFAULT_TOLERANCE);

        assert!(report.is_symmetric_instance);
        assert!(report.is_symmetric_allocation);
    }

    #[test]
    fn test_asymmetric_treatment_of_identical_agents_is_detected() {
        let utilities = DMatrix::from_row_slice(2, 2, &[10.0, 10.0, 10.0, 10.0]);
        let entitlements = DVector::from_vec(vec![1.0, 1.0]);
        // Identical agents, very different bundles.
        let allocation = DMatrix::from_row_slice(2, 2, &[1.0, 1.0, 0.0, 0.0]);

        let report = analyze_fairness(&allocation, &utilities, &entitlements, DEFAULT_TOLERANCE);

        assert!(report.is_symmetric_instance);
        assert!(!report.is_symmetric_allocation);
    }

    #[test]
    fn test_ef1_holds_for_envy_free_allocation() {
        let (allocation, utilities, _) = symmetric_instance();
        assert!(check_ef1(&allocation, &utilities, DEFAULT_TOLERANCE));
    }

    #[test]
    fn test_ef1_discrete_allocation() {
        // Agent 1 envies agent 0's two goods, but dropping either one removes the envy.
        let allocation = DMatrix::from_row_slice(2, 3, &[1.0, 1.0, 0.0, 0.0, 0.0, 1.0]);
        let utilities = DMatrix::from_row_slice(2, 3, &[6.0, 6.0, 1.0, 5.0, 5.0, 6.0]);
        assert!(check_ef1(&allocation, &utilities, DEFAULT_TOLERANCE));
    }

    #[test]
    fn test_ef1_violated_when_one_removal_is_not_enough() {
        // Agent 1 holds nothing it values; even after removing one of agent 0's goods the envy
        // remains.
        let allocation = DMatrix::from_row_slice(2, 3, &[1.0, 1.0, 1.0, 0.0, 0.0, 0.0]);
        let utilities = DMatrix::from_row_slice(2, 3, &[1.0, 1.0, 1.0, 5.0, 5.0, 5.0]);
        assert!(!check_ef1(&allocation, &utilities, DEFAULT_TOLERANCE));
    }

    #[test]
    fn test_gini_is_zero_for_equal_utilities() {
        let utilities = DVector::from_vec(vec![5.0, 5.0, 5.0]);
        assert_close!(0.0, welfare_concentration(&utilities), 1e-12);
    }

    #[test]
    fn test_gini_is_zero_when_all_utilities_are_zero() {
        let utilities = DVector::from_vec(vec![0.0, 0.0]);
        assert_eq!(welfare_concentration(&utilities), 0.0);
    }

    #[test]
    fn test_gini_increases_with_concentration() {
        let spread = welfare_concentration(&DVector::from_vec(vec![1.0, 9.0]));
        let balanced = welfare_concentration(&DVector::from_vec(vec![4.0, 6.0]));
        assert!(spread > balanced);
        assert_close!(0.4, spread, 1e-12);
    }

    #[test]
    fn test_score_labels() {
        assert_eq!(
            overall_fairness_score(true, true, true, 0.0),
            "Excellent (Pareto + EF + Proportional)"
        );
        assert_eq!(
            overall_fairness_score(true, true, false, 0.0),
            "Very Good (Pareto + EF)"
        );
        assert_eq!(
            overall_fairness_score(true, false, false, 0.05),
            "Good (Pareto + Low Envy)"
        );
        assert_eq!(
            overall_fairness_score(true, false, false, 3.0),
            "Fair (Pareto Efficient)"
        );
        assert_eq!(
            overall_fairness_score(false, true, false, 0.0),
            "Fair (Envy-Free)"
        );
        assert_eq!(
            overall_fairness_score(false, false, false, 3.0),
            "Limited (Some fairness issues)"
        );
    }
}
