//! Property tests: weighted consensus stays within bounds and never moves
//! backwards when a vote is added.

use approval_engine::WeightageCalculator;
use approval_types::{BallotEntry, Step, UserId};
use chrono::Utc;
use proptest::prelude::*;

// ---------------------------------------------------------------------------
// Helpers / Strategies
// ---------------------------------------------------------------------------

/// A ballot of up to 12 entries with random weights and votes.
fn arb_entries() -> impl Strategy<Value = Vec<BallotEntry>> {
    prop::collection::vec((0.0f64..1000.0, any::<bool>()), 1..12).prop_map(|votes| {
        votes
            .into_iter()
            .enumerate()
            .map(|(i, (weight, approved))| {
                let entry = BallotEntry::new(UserId::new(format!("u{}", i)), weight);
                if approved {
                    entry.approved(Utc::now())
                } else {
                    entry
                }
            })
            .collect()
    })
}

fn step_requiring(percentage: f64) -> Step {
    Step::new("s", "Step", 1).with_minimum_percentage(percentage)
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn percentage_is_bounded(entries in arb_entries()) {
        let pct = WeightageCalculator::current_percentage(&entries);
        prop_assert!((0.0..=100.0).contains(&pct), "percentage {} out of range", pct);
    }

    #[test]
    fn unanimous_ballot_is_complete(weights in prop::collection::vec(0.01f64..1000.0, 1..12)) {
        let entries: Vec<BallotEntry> = weights
            .iter()
            .enumerate()
            .map(|(i, w)| BallotEntry::new(UserId::new(format!("u{}", i)), *w).approved(Utc::now()))
            .collect();
        prop_assert_eq!(WeightageCalculator::current_percentage(&entries), 100.0);
        prop_assert!(WeightageCalculator::has_reached_minimum(&step_requiring(100.0), &entries));
    }

    #[test]
    fn another_vote_never_lowers_percentage(entries in arb_entries(), pick in any::<prop::sample::Index>()) {
        let before = WeightageCalculator::current_percentage(&entries);
        let mut after = entries.clone();
        let i = pick.index(after.len());
        after[i].approved = true;
        prop_assert!(WeightageCalculator::current_percentage(&after) >= before);
    }

    #[test]
    fn breakdown_agrees_with_threshold(entries in arb_entries(), required in 0.0f64..=100.0) {
        let step = step_requiring(required);
        let breakdown = WeightageCalculator::breakdown(&step, &entries);
        prop_assert_eq!(breakdown.reached, WeightageCalculator::has_reached_minimum(&step, &entries));
        prop_assert!(breakdown.remaining_percentage >= 0.0);
        if breakdown.reached {
            prop_assert_eq!(breakdown.remaining_percentage, 0.0);
        }
    }

    #[test]
    fn even_distribution_sums_to_hundred(n in 1usize..200) {
        let weights = WeightageCalculator::distribute_evenly(n);
        prop_assert_eq!(weights.len(), n);
        prop_assert!(weights.iter().all(|w| *w >= 0.0), "negative weight in {:?}", weights);
        let sum: f64 = weights.iter().sum();
        prop_assert!((sum - 100.0).abs() < 0.01, "weights sum to {}", sum);
    }
}
