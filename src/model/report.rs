use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// One agent envying another: `agent` would rather hold `envied`'s bundle, by `amount` utility.
#[derive(Serialize, Deserialize, PartialEq, Clone, Debug)]
pub struct EnviousPair {
    pub agent: usize,
    pub envied: usize,
    pub amount: f64,
}

/// High-level flags and metrics distilled from the full report.
#[derive(Serialize, Deserialize, PartialEq, Clone, Debug)]
pub struct FairnessSummary {
    /// Qualitative five-tier label: Excellent, Very Good, Good, Fair or Limited.
    pub overall_fairness_score: String,
    pub num_envious_pairs: usize,
    /// The worst (smallest) proportionality gap across agents.
    pub min_proportionality_gap: f64,
    /// Gini coefficient of the realized utilities. 0 is perfect equality.
    pub welfare_concentration: f64,
}

/// Verdict of the fairness diagnostics on one allocation: welfare aggregates, envy,
/// proportionality and symmetry, plus a heuristic Pareto check. A pure derivation from the
/// allocation, the utility matrix and the entitlements; building one never fails.
#[derive(Serialize, Deserialize, PartialEq, Clone, Debug)]
pub struct FairnessReport {
    /// Realized utility per agent.
    pub utilities: DVector<f64>,
    /// Utilitarian welfare: the sum of all realized utilities.
    pub total_utility: f64,
    /// Weighted geometric mean of the realized utilities.
    pub nash_welfare: f64,
    /// Egalitarian welfare: the smallest realized utility.
    pub min_utility: f64,

    /// Whether the heuristic found no Pareto improvement. Not a proof of efficiency.
    pub is_pareto_efficient: bool,
    pub pareto_check_note: String,

    /// Entry (i, k) is how much agent i envies agent k's bundle. The diagonal is zero.
    pub envy_matrix: DMatrix<f64>,
    pub max_envy: f64,
    pub is_envy_free: bool,
    /// Envious pairs sorted by envy amount, largest first.
    pub envious_pairs: Vec<EnviousPair>,

    /// Each agent's entitlement-weighted share of the total utility.
    pub proportional_shares: DVector<f64>,
    /// Realized utility minus proportional share, per agent.
    pub proportionality_gaps: DVector<f64>,
    pub is_proportional: bool,

    /// Whether all agents have identical utility rows and equal entitlements.
    pub is_symmetric_instance: bool,
    /// Whether agents with identical utility rows and equal entitlements realize equal utility.
    pub is_symmetric_allocation: bool,

    pub fairness_summary: FairnessSummary,
}

const HEAVY_RULE: &str =
    "======================================================================";
const LIGHT_RULE: &str =
    "----------------------------------------------------------------------";

/// Formats a vector as a bracketed list with four decimals, e.g. `[7.5000, 7.5000]`.
fn format_vector(vector: &DVector<f64>) -> String {
    let entries: Vec<String> = vector.iter().map(|v| format!("{v:.4}")).collect();
    format!("[{}]", entries.join(", "))
}

fn yes_no(flag: bool) -> &'static str {
    if flag {
        "yes"
    } else {
        "no"
    }
}

impl Display for FairnessReport {
    /// Renders the human-readable report. The layout is stable so that golden-file tests can
    /// assert on the exact text.
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{HEAVY_RULE}")?;
        writeln!(f, "FAIRNESS ANALYSIS REPORT")?;
        writeln!(f, "{HEAVY_RULE}")?;
        writeln!(f)?;

        writeln!(f, "WELFARE METRICS")?;
        writeln!(f, "{LIGHT_RULE}")?;
        writeln!(f, "  Utilities:            {}", format_vector(&self.utilities))?;
        writeln!(f, "  Total Utility:        {:.4}", self.total_utility)?;
        writeln!(f, "  Nash Welfare:         {:.4}", self.nash_welfare)?;
        writeln!(f, "  Min Utility:          {:.4}", self.min_utility)?;
        writeln!(f)?;

        writeln!(f, "PARETO EFFICIENCY")?;
        writeln!(f, "{LIGHT_RULE}")?;
        writeln!(
            f,
            "  Status:               {}",
            if self.is_pareto_efficient {
                "efficient"
            } else {
                "not verified"
            }
        )?;
        writeln!(f, "  Note:                 {}", self.pareto_check_note)?;
        writeln!(f)?;

        writeln!(f, "ENVY ANALYSIS")?;
        writeln!(f, "{LIGHT_RULE}")?;
        writeln!(f, "  Envy-Free:            {}", yes_no(self.is_envy_free))?;
        writeln!(f, "  Max Envy:             {:.4}", self.max_envy)?;
        if !self.envious_pairs.is_empty() {
            writeln!(f, "  Envious Pairs:")?;
            for pair in self.envious_pairs.iter().take(5) {
                writeln!(
                    f,
                    "    Agent {} -> Agent {}: {:.4}",
                    pair.agent, pair.envied, pair.amount
                )?;
            }
            if self.envious_pairs.len() > 5 {
                writeln!(f, "    ... and {} more", self.envious_pairs.len() - 5)?;
            }
        }
        writeln!(f)?;

        writeln!(f, "PROPORTIONALITY")?;
        writeln!(f, "{LIGHT_RULE}")?;
        writeln!(f, "  Proportional:         {}", yes_no(self.is_proportional))?;
        writeln!(
            f,
            "  Proportional Shares:  {}",
            format_vector(&self.proportional_shares)
        )?;
        writeln!(
            f,
            "  Gaps (U - share):     {}",
            format_vector(&self.proportionality_gaps)
        )?;
        writeln!(f)?;

        writeln!(f, "SYMMETRY")?;
        writeln!(f, "{LIGHT_RULE}")?;
        writeln!(
            f,
            "  Symmetric Instance:   {}",
            yes_no(self.is_symmetric_instance)
        )?;
        writeln!(
            f,
            "  Symmetric Allocation: {}",
            yes_no(self.is_symmetric_allocation)
        )?;
        writeln!(f)?;

        writeln!(f, "SUMMARY")?;
        writeln!(f, "{LIGHT_RULE}")?;
        writeln!(
            f,
            "  Overall Score:        {}",
            self.fairness_summary.overall_fairness_score
        )?;
        writeln!(
            f,
            "  Envious Pairs:        {}",
            self.fairness_summary.num_envious_pairs
        )?;
        writeln!(
            f,
            "  Min Gap:              {:.4}",
            self.fairness_summary.min_proportionality_gap
        )?;
        writeln!(
            f,
            "  Gini:                 {:.4}",
            self.fairness_summary.welfare_concentration
        )?;
        write!(f, "{HEAVY_RULE}")
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_format_vector_uses_four_decimals() {
        let v = DVector::from_vec(vec![7.5, 0.123456]);
        assert_eq!(format_vector(&v), "[7.5000, 0.1235]");
    }

    #[test]
    fn test_report_renders_all_sections() {
        let report = FairnessReport {
            utilities: DVector::from_vec(vec![7.5, 7.5]),
            total_utility: 15.0,
            nash_welfare: 7.5,
            min_utility: 7.5,
            is_pareto_efficient: true,
            pareto_check_note: "no obvious inefficiency detected (heuristic)".to_string(),
            envy_matrix: DMatrix::zeros(2, 2),
            max_envy: 0.0,
            is_envy_free: true,
            envious_pairs: vec![],
            proportional_shares: DVector::from_vec(vec![7.5, 7.5]),
            proportionality_gaps: DVector::from_vec(vec![0.0, 0.0]),
            is_proportional: true,
            is_symmetric_instance: true,
            is_symmetric_allocation: true,
            fairness_summary: FairnessSummary {
                overall_fairness_score: "Excellent (Pareto + EF + Proportional)".to_string(),
                num_envious_pairs: 0,
                min_proportionality_gap: 0.0,
                welfare_concentration: 0.0,
            },
        };

        let rendered = report.to_string();
        for section in [
            "FAIRNESS ANALYSIS REPORT",
            "WELFARE METRICS",
            "PARETO EFFICIENCY",
            "ENVY ANALYSIS",
            "PROPORTIONALITY",
            "SYMMETRY",
            "SUMMARY",
        ] {
            assert!(rendered.contains(section), "missing section {section}");
        }
        assert!(rendered.contains("  Utilities:            [7.5000, 7.5000]"));
        assert!(rendered.contains("  Overall Score:        Excellent (Pareto + EF + Proportional)"));
    }
}
