//! End-to-end test: fork/join across parallel steps.

use crate::common::*;
use approval_engine::{Blueprint, NotificationKind, SyncOutcome, Transition};
use approval_types::{
    ActionKind, ApprovalError, BranchOutcome, BranchStatus, ExecutionStatus, ParallelStepGroup,
    RequestStatus, StepId, SyncPolicy,
};
use serde_json::json;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// s1 forks into the given branches, which join at `done`
fn forked(sync: SyncPolicy, branches: &[&str]) -> Blueprint {
    let mut steps = vec![step("s1", 1, &[("lead", 1.0)])];
    for (i, branch) in branches.iter().enumerate() {
        let approver = format!("{}-approver", branch);
        steps.push(step(branch, 2 + i as u32, &[(approver.as_str(), 1.0)]));
    }
    steps.push(step("done", 10, &[("ceo", 1.0)]));

    Blueprint::new(workflow("review", "contract", steps)).with_parallel_group(
        ParallelStepGroup::new(
            "checks",
            "s1",
            sync,
            branches.iter().map(|b| StepId::new(*b)).collect(),
        )
        .joining_at("done"),
    )
}

fn branch_approver(branch: &str) -> approval_types::UserId {
    user(&format!("{}-approver", branch))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[test]
fn all_policy_joins_after_every_branch() {
    let (engine, _) = engine_for(forked(SyncPolicy::All, &["legal", "finance"]));
    let request = submit(&engine, "contract", json!({}));

    let outcome = engine.approve(&request.id, &user("lead"), None).unwrap();
    assert!(matches!(outcome.transition, Transition::Forked { ref groups } if groups.len() == 1));
    assert_eq!(outcome.request.current_step, Some(StepId::new("s1")));
    assert_eq!(outcome.request.status, RequestStatus::Pending);

    let states = engine.execution_states(&request.id).unwrap();
    assert_eq!(states.len(), 1);
    assert_eq!(states[0].total_steps, 2);
    assert_eq!(
        engine
            .parallel()
            .active_parallel_steps(&request.id)
            .unwrap()
            .len(),
        2
    );

    let vote = engine
        .approve_branch(&request.id, &StepId::new("legal"), &branch_approver("legal"), None)
        .unwrap();
    assert_eq!(
        vote.sync,
        Some(SyncOutcome::Waiting {
            completed: 1,
            required: 2
        })
    );
    assert_eq!(vote.request.current_step, Some(StepId::new("s1")));

    let vote = engine
        .approve_branch(
            &request.id,
            &StepId::new("finance"),
            &branch_approver("finance"),
            None,
        )
        .unwrap();
    assert_eq!(
        vote.sync,
        Some(SyncOutcome::Joined {
            join_step: Some(StepId::new("done"))
        })
    );
    assert_eq!(vote.request.current_step, Some(StepId::new("done")));

    let state = &engine.execution_states(&request.id).unwrap()[0];
    assert_eq!(state.status, ExecutionStatus::Completed);
    assert_eq!(state.completed_steps, 2);

    // a late completion for a joined group changes nothing
    let again = engine
        .parallel()
        .complete_parallel_step(&request.id, &StepId::new("legal"), BranchOutcome::Approved)
        .unwrap();
    assert_eq!(again, SyncOutcome::AlreadyCompleted);
    assert_eq!(
        engine.execution_states(&request.id).unwrap()[0].completed_steps,
        2
    );

    let outcome = engine.approve(&request.id, &user("ceo"), None).unwrap();
    assert_eq!(outcome.transition, Transition::Completed);
}

#[test]
fn fork_step_refuses_direct_votes_while_forked() {
    let (engine, _) = engine_for(forked(SyncPolicy::All, &["legal", "finance"]));
    let request = submit(&engine, "contract", json!({}));
    engine.approve(&request.id, &user("lead"), None).unwrap();

    assert!(matches!(
        engine.approve(&request.id, &user("lead"), None),
        Err(ApprovalError::ParallelExecutionInProgress(_))
    ));
    assert!(matches!(
        engine.reject(&request.id, &user("lead"), "no", None),
        Err(ApprovalError::ParallelExecutionInProgress(_))
    ));
}

#[test]
fn majority_joins_before_last_branch() {
    let (engine, _) = engine_for(forked(SyncPolicy::Majority, &["a", "b", "c"]));
    let request = submit(&engine, "contract", json!({}));
    engine.approve(&request.id, &user("lead"), None).unwrap();

    let first = engine
        .approve_branch(&request.id, &StepId::new("a"), &branch_approver("a"), None)
        .unwrap();
    assert_eq!(
        first.sync,
        Some(SyncOutcome::Waiting {
            completed: 1,
            required: 2
        })
    );
    let second = engine
        .approve_branch(&request.id, &StepId::new("c"), &branch_approver("c"), None)
        .unwrap();
    assert!(matches!(second.sync, Some(SyncOutcome::Joined { .. })));
    assert_eq!(second.request.current_step, Some(StepId::new("done")));

    // the straggler's branch closed with the join
    assert!(matches!(
        engine.approve_branch(&request.id, &StepId::new("b"), &branch_approver("b"), None),
        Err(ApprovalError::BranchNotActive { .. })
    ));
}

#[test]
fn any_policy_joins_on_first_branch() {
    let (engine, _) = engine_for(forked(SyncPolicy::Any, &["a", "b"]));
    let request = submit(&engine, "contract", json!({}));
    engine.approve(&request.id, &user("lead"), None).unwrap();

    let vote = engine
        .approve_branch(&request.id, &StepId::new("b"), &branch_approver("b"), None)
        .unwrap();
    assert!(matches!(vote.sync, Some(SyncOutcome::Joined { .. })));
}

#[test]
fn cancel_mid_fork_closes_branches() {
    let (engine, _) = engine_for(forked(SyncPolicy::All, &["legal", "finance"]));
    let request = submit(&engine, "contract", json!({}));
    engine.approve(&request.id, &user("lead"), None).unwrap();

    let cancelled = engine
        .cancel(&request.id, &user("requester"), "deal fell through")
        .unwrap();
    assert_eq!(cancelled.status, RequestStatus::Cancelled);

    let state = &engine.execution_states(&request.id).unwrap()[0];
    assert_eq!(state.status, ExecutionStatus::Failed);
    assert!(engine
        .parallel()
        .active_parallel_steps(&request.id)
        .unwrap()
        .is_empty());

    assert!(matches!(
        engine.approve_branch(
            &request.id,
            &StepId::new("legal"),
            &branch_approver("legal"),
            None
        ),
        Err(ApprovalError::TerminalRequest { .. })
    ));
}

#[test]
fn branch_rejection_rejects_request() {
    let (engine, _) = engine_for(forked(SyncPolicy::All, &["legal", "finance"]));
    let request = submit(&engine, "contract", json!({}));
    engine.approve(&request.id, &user("lead"), None).unwrap();
    engine
        .approve_branch(&request.id, &StepId::new("legal"), &branch_approver("legal"), None)
        .unwrap();

    let rejected = engine
        .reject_branch(
            &request.id,
            &StepId::new("finance"),
            &branch_approver("finance"),
            "budget exceeded",
            None,
        )
        .unwrap();
    assert_eq!(rejected.status, RequestStatus::Rejected);
    assert_eq!(rejected.rejection_reason.as_deref(), Some("budget exceeded"));

    let state = &engine.execution_states(&request.id).unwrap()[0];
    assert_eq!(state.status, ExecutionStatus::Failed);
    assert_eq!(
        state.step_statuses.get(&StepId::new("finance")),
        Some(&BranchStatus::Rejected)
    );
    assert_eq!(
        state.step_statuses.get(&StepId::new("legal")),
        Some(&BranchStatus::Approved)
    );
}

#[test]
fn unreachable_sync_policy_rejects_request() {
    let (engine, notifier) = engine_for(forked(SyncPolicy::All, &["legal", "finance"]));
    let request = submit(&engine, "contract", json!({}));
    engine.approve(&request.id, &user("lead"), None).unwrap();

    let outcome = engine
        .parallel()
        .complete_parallel_step(&request.id, &StepId::new("legal"), BranchOutcome::Rejected)
        .unwrap();
    assert_eq!(outcome, SyncOutcome::Failed);

    let rejected = engine.request(&request.id).unwrap();
    assert_eq!(rejected.status, RequestStatus::Rejected);
    assert!(rejected
        .rejection_reason
        .as_deref()
        .is_some_and(|r| r.contains("checks")));
    assert!(engine
        .parallel()
        .active_parallel_steps(&request.id)
        .unwrap()
        .is_empty());
    assert_eq!(
        engine.execution_states(&request.id).unwrap()[0].status,
        ExecutionStatus::Failed
    );

    let last = engine.history(&request.id).unwrap().pop().unwrap();
    assert!(matches!(last.kind, ActionKind::Rejected { .. }));
    assert_eq!(last.actor, user("system"));
    assert!(notifier
        .sent()
        .iter()
        .any(|n| n.to_creator && n.kind == NotificationKind::Rejected));

    assert!(matches!(
        engine.approve(&request.id, &user("lead"), None),
        Err(ApprovalError::TerminalRequest {
            status: RequestStatus::Rejected,
            ..
        })
    ));
    assert!(matches!(
        engine.approve_branch(&request.id, &StepId::new("finance"), &branch_approver("finance"), None),
        Err(ApprovalError::TerminalRequest { .. })
    ));
}

#[test]
fn send_back_from_fork_step_cancels_fork() {
    let blueprint = Blueprint::new(workflow(
        "review",
        "contract",
        vec![
            step("intake", 1, &[("clerk", 1.0)]),
            step("s1", 2, &[("lead", 1.0)]),
            step("legal", 3, &[("legal-approver", 1.0)]),
            step("finance", 4, &[("finance-approver", 1.0)]),
        ],
    ))
    .with_parallel_group(ParallelStepGroup::new(
        "checks",
        "s1",
        SyncPolicy::All,
        vec![StepId::new("legal"), StepId::new("finance")],
    ));
    let (engine, _) = engine_for(blueprint);
    let request = submit(&engine, "contract", json!({}));
    engine.approve(&request.id, &user("clerk"), None).unwrap();
    engine.approve(&request.id, &user("lead"), None).unwrap();

    let back = engine
        .send_back(&request.id, &user("lead"), None)
        .unwrap();
    assert_eq!(back.current_step, Some(StepId::new("intake")));
    assert!(engine
        .execution_states(&request.id)
        .unwrap()
        .iter()
        .all(|s| s.status == ExecutionStatus::Failed));
}

#[test]
fn join_without_later_step_approves_request() {
    let blueprint = Blueprint::new(workflow(
        "review",
        "contract",
        vec![
            step("s1", 1, &[("lead", 1.0)]),
            step("legal", 2, &[("legal-approver", 1.0)]),
            step("finance", 3, &[("finance-approver", 1.0)]),
        ],
    ))
    .with_parallel_group(ParallelStepGroup::new(
        "checks",
        "s1",
        SyncPolicy::All,
        vec![StepId::new("legal"), StepId::new("finance")],
    ));
    let (engine, _) = engine_for(blueprint);
    let request = submit(&engine, "contract", json!({}));
    engine.approve(&request.id, &user("lead"), None).unwrap();
    engine
        .approve_branch(&request.id, &StepId::new("legal"), &branch_approver("legal"), None)
        .unwrap();
    let vote = engine
        .approve_branch(
            &request.id,
            &StepId::new("finance"),
            &branch_approver("finance"),
            None,
        )
        .unwrap();

    assert_eq!(vote.sync, Some(SyncOutcome::Joined { join_step: None }));
    assert_eq!(vote.request.status, RequestStatus::Approved);

    let again = engine
        .parallel()
        .complete_parallel_step(&request.id, &StepId::new("finance"), BranchOutcome::Approved)
        .unwrap();
    assert_eq!(again, SyncOutcome::AlreadyCompleted);
    assert_eq!(
        engine.request(&request.id).unwrap().status,
        RequestStatus::Approved
    );
}
