//! Property tests: parallel sync policies need a sensible number of
//! branches and stay satisfied once satisfied.

use approval_types::SyncPolicy;
use proptest::prelude::*;

// ---------------------------------------------------------------------------
// Helpers / Strategies
// ---------------------------------------------------------------------------

/// A group size and a policy valid for it.
fn arb_policy() -> impl Strategy<Value = (u32, SyncPolicy)> {
    (1u32..20).prop_flat_map(|total| {
        (
            Just(total),
            prop_oneof![
                Just(SyncPolicy::All),
                Just(SyncPolicy::Any),
                Just(SyncPolicy::Majority),
                (1..=total).prop_map(|k| SyncPolicy::Custom {
                    required_approvals: k
                }),
            ],
        )
    })
}

// ---------------------------------------------------------------------------
// Fixed cases
// ---------------------------------------------------------------------------

#[test]
fn five_branch_requirements() {
    assert_eq!(SyncPolicy::All.required(5), 5);
    assert_eq!(SyncPolicy::Any.required(5), 1);
    assert_eq!(SyncPolicy::Majority.required(5), 3);
    assert_eq!(SyncPolicy::Custom { required_approvals: 4 }.required(5), 4);

    assert!(!SyncPolicy::Majority.is_satisfied(2, 5));
    assert!(SyncPolicy::Majority.is_satisfied(3, 5));
    assert!(SyncPolicy::Any.is_satisfied(1, 5));
    assert!(!SyncPolicy::All.is_satisfied(4, 5));
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn requirement_fits_group((total, policy) in arb_policy()) {
        let required = policy.required(total);
        prop_assert!(required >= 1);
        prop_assert!(required <= total);
        prop_assert!(policy.is_satisfied(total, total));
    }

    #[test]
    fn satisfaction_is_monotone((total, policy) in arb_policy(), completed in 0u32..20) {
        let completed = completed.min(total);
        if policy.is_satisfied(completed, total) && completed < total {
            prop_assert!(policy.is_satisfied(completed + 1, total));
        }
        prop_assert_eq!(policy.is_satisfied(completed, total), completed >= policy.required(total));
    }

    #[test]
    fn majority_is_more_than_half(total in 1u32..50) {
        let required = SyncPolicy::Majority.required(total);
        prop_assert!(required * 2 >= total);
        prop_assert!((required - 1) * 2 < total);
    }
}
