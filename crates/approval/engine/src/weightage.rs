//! Weightage Calculator - weighted consensus over a step's ballot
//!
//! ```text
//! current = sum(weight where approved) / sum(weight) * 100   (2 dp; 0 if no weight)
//! reached = current >= step.minimum_approval_percentage
//! ```

use approval_types::{BallotEntry, Step, UserId};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// One approver's share of the ballot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApproverShare {
    pub user_id: UserId,
    pub weightage: f64,
    /// Share of the total weight, 2 dp
    pub percentage: f64,
    pub approved: bool,
}

/// Where a step's consensus stands
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusBreakdown {
    pub total_weight: f64,
    pub approved_weight: f64,
    pub pending_weight: f64,
    pub current_percentage: f64,
    pub required_percentage: f64,
    /// Percentage points still missing; 0 once reached
    pub remaining_percentage: f64,
    pub reached: bool,
    pub approvers: Vec<ApproverShare>,
}

/// Weighted consensus calculations
pub struct WeightageCalculator;

impl WeightageCalculator {
    /// Approved weight as a percentage of total weight, 2 dp
    pub fn current_percentage(entries: &[BallotEntry]) -> f64 {
        let total = total_weight(entries);
        if total <= 0.0 {
            return 0.0;
        }
        round2(approved_weight(entries) / total * 100.0)
    }

    /// Has the ballot met the step's threshold?
    pub fn has_reached_minimum(step: &Step, entries: &[BallotEntry]) -> bool {
        Self::current_percentage(entries) >= step.minimum_approval_percentage
    }

    pub fn breakdown(step: &Step, entries: &[BallotEntry]) -> ConsensusBreakdown {
        let total = total_weight(entries);
        let approved = approved_weight(entries);
        let current = Self::current_percentage(entries);
        let required = step.minimum_approval_percentage;

        let approvers = entries
            .iter()
            .map(|e| ApproverShare {
                user_id: e.user_id.clone(),
                weightage: e.weightage,
                percentage: if total > 0.0 {
                    round2(e.weightage / total * 100.0)
                } else {
                    0.0
                },
                approved: e.approved,
            })
            .collect();

        ConsensusBreakdown {
            total_weight: total,
            approved_weight: approved,
            pending_weight: total - approved,
            current_percentage: current,
            required_percentage: required,
            remaining_percentage: round2((required - current).max(0.0)),
            reached: current >= required,
            approvers,
        }
    }

    /// How many more approvers are needed to reach the threshold.
    ///
    /// Greedy: pending approvers are taken heaviest first, ties in ballot
    /// order. This is an estimate, not a minimum cover. `None` when even
    /// every pending approver would not be enough.
    pub fn minimum_approvers_needed(step: &Step, entries: &[BallotEntry]) -> Option<usize> {
        let required = step.minimum_approval_percentage;
        if Self::current_percentage(entries) >= required {
            return Some(0);
        }
        let total = total_weight(entries);
        if total <= 0.0 {
            return None;
        }

        let mut pending: Vec<&BallotEntry> = entries.iter().filter(|e| !e.approved).collect();
        pending.sort_by(|a, b| b.weightage.total_cmp(&a.weightage));

        let mut gathered = approved_weight(entries);
        for (count, entry) in pending.iter().enumerate() {
            gathered += entry.weightage;
            if round2(gathered / total * 100.0) >= required {
                return Some(count + 1);
            }
        }
        None
    }

    /// Problems with a step's weight distribution. Empty means valid.
    pub fn validate_distribution(step: &Step) -> Vec<String> {
        let mut problems = Vec::new();
        if !(0.0..=100.0).contains(&step.minimum_approval_percentage) {
            problems.push(format!(
                "step {}: minimum approval percentage {} is outside 0..=100",
                step.id, step.minimum_approval_percentage
            ));
        }

        let mut seen = HashSet::new();
        let mut total = 0.0;
        for approver in &step.approvers {
            if !approver.weightage.is_finite() || approver.weightage < 0.0 {
                problems.push(format!(
                    "step {}: approver {} '{}' has invalid weightage {}",
                    step.id, approver.approver_type, approver.reference, approver.weightage
                ));
            } else {
                total += approver.weightage;
            }
            if !seen.insert((approver.approver_type, approver.reference.as_str())) {
                problems.push(format!(
                    "step {}: approver {} '{}' is listed more than once",
                    step.id, approver.approver_type, approver.reference
                ));
            }
        }
        if !step.approvers.is_empty() && total <= 0.0 && step.approval_type.uses_consensus() {
            problems.push(format!(
                "step {}: approver weights sum to zero, consensus cannot be computed",
                step.id
            ));
        }
        problems
    }

    /// `n` weights summing to 100, 2 dp, remainder on the first.
    ///
    /// Shares round down so the remainder is never negative.
    pub fn distribute_evenly(n: usize) -> Vec<f64> {
        if n == 0 {
            return Vec::new();
        }
        let share = (100.0 / n as f64 * 100.0).floor() / 100.0;
        let mut weights = vec![share; n];
        weights[0] = round2(100.0 - share * (n - 1) as f64);
        weights
    }
}

fn total_weight(entries: &[BallotEntry]) -> f64 {
    entries.iter().map(|e| e.weightage).sum()
}

fn approved_weight(entries: &[BallotEntry]) -> f64 {
    entries.iter().filter(|e| e.approved).map(|e| e.weightage).sum()
}

pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
