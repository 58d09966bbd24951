//! End-to-end test: request lifecycle through serial weighted steps.

use crate::common::*;
use approval_engine::{Blueprint, NotificationKind, Transition};
use approval_types::{ActionKind, ApprovalError, RequestStatus, StepId};
use serde_json::json;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn two_step() -> Blueprint {
    Blueprint::new(workflow(
        "leave",
        "leave_request",
        vec![
            step("lead", 1, &[("bob", 1.0)]),
            step("hr", 2, &[("hana", 1.0), ("hugo", 1.0)]),
        ],
    ))
}

fn terminal_count(status: RequestStatus) -> usize {
    [
        RequestStatus::Approved,
        RequestStatus::Rejected,
        RequestStatus::Cancelled,
    ]
    .iter()
    .filter(|s| **s == status)
    .count()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[test]
fn unanimous_two_step_workflow_is_approved() {
    let (engine, notifier) = engine_for(two_step());
    let request = submit(&engine, "leave_request", json!({"days": 3}));
    assert_eq!(request.status, RequestStatus::Submitted);
    assert_eq!(request.current_step, Some(StepId::new("lead")));

    let outcome = engine.approve(&request.id, &user("bob"), None).unwrap();
    assert_eq!(
        outcome.transition,
        Transition::MovedTo {
            step: StepId::new("hr")
        }
    );

    let outcome = engine.approve(&request.id, &user("hana"), None).unwrap();
    assert_eq!(outcome.transition, Transition::Waiting { percentage: 50.0 });

    let outcome = engine
        .approve(&request.id, &user("hugo"), Some("enjoy".into()))
        .unwrap();
    assert_eq!(outcome.transition, Transition::Completed);
    assert_eq!(outcome.request.status, RequestStatus::Approved);
    assert!(outcome.request.completed_at.is_some());
    assert!(outcome.request.current_step.is_none());

    let progress = engine.calculate_approval_progress(&request.id).unwrap();
    assert_eq!(progress.completed_steps, 2);
    assert_eq!(progress.percentage, 100.0);

    let kinds: Vec<String> = engine
        .history(&request.id)
        .unwrap()
        .iter()
        .map(|a| a.kind.label().to_string())
        .collect();
    assert_eq!(kinds, vec!["submitted", "approved", "approved", "approved"]);

    let sent = notifier.sent();
    assert!(sent
        .iter()
        .any(|n| n.kind == NotificationKind::Approved && n.to_creator));
}

#[test]
fn rejection_is_terminal() {
    let (engine, _) = engine_for(two_step());
    let request = submit(&engine, "leave_request", json!({}));

    let rejected = engine
        .reject(&request.id, &user("bob"), "overlaps release", None)
        .unwrap();
    assert_eq!(rejected.status, RequestStatus::Rejected);
    assert_eq!(rejected.rejection_reason.as_deref(), Some("overlaps release"));

    assert!(matches!(
        engine.approve(&request.id, &user("bob"), None),
        Err(ApprovalError::TerminalRequest { .. })
    ));
    assert!(matches!(
        engine.reject(&request.id, &user("bob"), "again", None),
        Err(ApprovalError::TerminalRequest { .. })
    ));
    assert!(matches!(
        engine.hold(&request.id, &user("bob"), None),
        Err(ApprovalError::TerminalRequest { .. })
    ));
}

#[test]
fn repeated_vote_is_not_counted_twice() {
    let (engine, _) = engine_for(Blueprint::new(workflow(
        "capex",
        "capex",
        vec![step("board", 1, &[("a", 50.0), ("b", 30.0), ("c", 20.0)])
            .with_minimum_percentage(75.0)],
    )));
    let request = submit(&engine, "capex", json!({}));

    let first = engine.approve(&request.id, &user("a"), None).unwrap();
    assert_eq!(first.transition, Transition::Waiting { percentage: 50.0 });
    let second = engine.approve(&request.id, &user("a"), None).unwrap();
    assert_eq!(second.transition, Transition::Waiting { percentage: 50.0 });

    let breakdown = engine.consensus_breakdown(&request.id).unwrap();
    assert_eq!(breakdown.approved_weight, 50.0);
    assert!(!breakdown.reached);

    let third = engine.approve(&request.id, &user("b"), None).unwrap();
    assert_eq!(third.transition, Transition::Completed);
}

#[test]
fn heavy_approver_alone_meets_threshold() {
    let (engine, _) = engine_for(Blueprint::new(workflow(
        "contract",
        "contract",
        vec![
            step("legal", 1, &[("senior", 70.0), ("junior", 30.0)]).with_minimum_percentage(60.0),
            step("sign", 2, &[("ceo", 1.0)]),
        ],
    )));
    let request = submit(&engine, "contract", json!({}));
    let outcome = engine.approve(&request.id, &user("senior"), None).unwrap();
    assert_eq!(
        outcome.transition,
        Transition::MovedTo {
            step: StepId::new("sign")
        }
    );
}

#[test]
fn any_one_step_advances_on_first_vote() {
    let (engine, _) = engine_for(Blueprint::new(workflow(
        "it",
        "access",
        vec![
            step("desk", 1, &[("x", 1.0), ("y", 1.0), ("z", 1.0)])
                .with_approval_type(approval_types::ApprovalType::AnyOne),
            step("owner", 2, &[("o", 1.0)]),
        ],
    )));
    let request = submit(&engine, "access", json!({}));
    let outcome = engine.approve(&request.id, &user("z"), None).unwrap();
    assert_eq!(
        outcome.transition,
        Transition::MovedTo {
            step: StepId::new("owner")
        }
    );
}

#[test]
fn send_back_then_edit_and_resubmit() {
    let (engine, _) = engine_for(two_step());
    let request = submit(&engine, "leave_request", json!({"days": 10, "reason": "trip"}));
    engine.approve(&request.id, &user("bob"), None).unwrap();

    let back = engine
        .send_back(&request.id, &user("hana"), Some("check dates".into()))
        .unwrap();
    assert_eq!(back.current_step, Some(StepId::new("lead")));
    assert_eq!(back.status, RequestStatus::Pending);

    engine
        .reject(&request.id, &user("bob"), "too long", None)
        .unwrap();
    let resubmitted = engine
        .edit_and_resubmit(
            &request.id,
            payload(json!({"days": 5, "reason": "trip", "updated_at": "today"})),
            &user("requester"),
            None,
        )
        .unwrap();
    assert_eq!(resubmitted.status, RequestStatus::Submitted);
    assert_eq!(resubmitted.current_step, Some(StepId::new("lead")));

    let changes = engine.field_changes(&request.id).unwrap();
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].field, "days");
    assert_eq!(changes[0].old_value, Some(json!(10)));
    assert_eq!(changes[0].new_value, Some(json!(5)));

    let history = engine.history(&request.id).unwrap();
    assert!(matches!(
        history.last().map(|a| &a.kind),
        Some(ActionKind::Resubmitted { changed_fields: 1 })
    ));

    // the fresh ballot starts empty
    let outcome = engine.approve(&request.id, &user("bob"), None).unwrap();
    assert_eq!(
        outcome.transition,
        Transition::MovedTo {
            step: StepId::new("hr")
        }
    );
}

#[test]
fn at_most_one_terminal_status() {
    let (engine, _) = engine_for(two_step());
    let approved = submit(&engine, "leave_request", json!({}));
    engine.approve(&approved.id, &user("bob"), None).unwrap();
    engine.approve(&approved.id, &user("hana"), None).unwrap();
    engine.approve(&approved.id, &user("hugo"), None).unwrap();
    assert!(engine.cancel(&approved.id, &user("requester"), "late").is_err());

    let cancelled = submit(&engine, "leave_request", json!({}));
    engine
        .cancel(&cancelled.id, &user("requester"), "plans changed")
        .unwrap();
    assert!(engine
        .reject(&cancelled.id, &user("bob"), "no", None)
        .is_err());

    for id in [&approved.id, &cancelled.id] {
        let status = engine.request(id).unwrap().status;
        assert_eq!(terminal_count(status), 1);
    }

    let archived = engine.archive(&approved.id, &user("admin")).unwrap();
    assert_eq!(archived.status, RequestStatus::Archived);
}

#[test]
fn unknown_subject_type_has_no_workflow() {
    let (engine, _) = engine_for(two_step());
    let err = engine
        .submit(
            approval_types::Subject::new("expense", "1"),
            user("requester"),
            payload(json!({})),
        )
        .unwrap_err();
    assert!(matches!(err, ApprovalError::NoActiveWorkflow { .. }));
}
