//! End-to-end test: rule-gated topology changes and workflow versions.

use crate::common::*;
use approval_engine::{ApproverChange, ApprovalStore, Blueprint, Transition};
use approval_types::{
    ApprovalError, ModificationKind, RequestStatus, Step, StepApprover, StepId, WorkflowId,
    WorkflowModificationRule,
};
use serde_json::json;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn wf_id() -> WorkflowId {
    WorkflowId::new("spend")
}

fn spend(kinds: &[ModificationKind]) -> Blueprint {
    let mut blueprint = Blueprint::new(workflow(
        "spend",
        "spend",
        vec![
            step("s1", 1, &[("lead", 1.0)]),
            step("s2", 2, &[("finance", 1.0)]),
            step("s3", 3, &[("cfo", 1.0)]),
        ],
    ));
    for kind in kinds {
        blueprint = blueprint.with_rule(WorkflowModificationRule::allow(wf_id(), *kind));
    }
    blueprint
}

fn active_step_ids(engine: &approval_engine::ApprovalEngine) -> Vec<String> {
    let workflow = engine.store().workflow(&wf_id()).unwrap().unwrap();
    workflow
        .active_steps()
        .iter()
        .map(|s| s.id.as_str().to_string())
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[test]
fn versions_track_add_remove_and_rollback() {
    let (engine, _) = engine_for(spend(&[ModificationKind::AddStep, ModificationKind::RemoveStep]));
    let request = submit(&engine, "spend", json!({"amount": 10}));
    let dynamic = engine.dynamic();

    let added = dynamic
        .add_step(
            &request.id,
            Step::new("legal", "Legal", 2).with_approver(StepApprover::user("counsel", 1.0)),
            &user("admin"),
            Some("contract attached".into()),
        )
        .unwrap();
    assert_eq!(added.version.version_number, 2);
    assert_eq!(active_step_ids(&engine), vec!["s1", "legal", "s2", "s3"]);

    let removed = dynamic
        .remove_step(&request.id, &StepId::new("s3"), &user("admin"), None)
        .unwrap();
    assert_eq!(removed.version.version_number, 3);
    assert_eq!(active_step_ids(&engine), vec!["s1", "legal", "s2"]);

    let rolled_back = dynamic
        .rollback_to_version(&wf_id(), 1, &user("admin"))
        .unwrap();
    assert_eq!(rolled_back.version_number, 4);
    assert_eq!(active_step_ids(&engine), vec!["s1", "s2", "s3"]);

    let versions = engine.versions(&wf_id()).unwrap();
    let numbers: Vec<u32> = versions.iter().map(|v| v.version_number).collect();
    assert_eq!(numbers, vec![1, 2, 3, 4]);
    assert_eq!(versions.iter().filter(|v| v.active).count(), 1);
    assert_eq!(
        engine.active_version(&wf_id()).unwrap().map(|v| v.version_number),
        Some(4)
    );

    assert!(matches!(
        dynamic.rollback_to_version(&wf_id(), 42, &user("admin")),
        Err(ApprovalError::VersionNotFound { version: 42, .. })
    ));
}

#[test]
fn rollback_refused_while_request_sits_on_added_step() {
    let (engine, _) = engine_for(spend(&[ModificationKind::AddStep]));
    let request = submit(&engine, "spend", json!({"amount": 10}));
    let untouched = submit(&engine, "spend", json!({"amount": 20}));
    let dynamic = engine.dynamic();

    dynamic
        .add_step(
            &request.id,
            Step::new("legal", "Legal", 2).with_approver(StepApprover::user("counsel", 1.0)),
            &user("admin"),
            None,
        )
        .unwrap();
    engine.approve(&request.id, &user("lead"), None).unwrap();

    let err = dynamic
        .rollback_to_version(&wf_id(), 1, &user("admin"))
        .unwrap_err();
    match err {
        ApprovalError::RollbackStrandsRequests {
            version, requests, ..
        } => {
            assert_eq!(version, 1);
            assert_eq!(requests, vec![request.id.clone()]);
            assert!(!requests.contains(&untouched.id));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(engine.versions(&wf_id()).unwrap().len(), 2);
    assert_eq!(active_step_ids(&engine), vec!["s1", "legal", "s2", "s3"]);

    let outcome = engine.approve(&request.id, &user("counsel"), None).unwrap();
    assert_eq!(
        outcome.transition,
        Transition::MovedTo {
            step: StepId::new("s2")
        }
    );

    // nothing in flight sits on legal any more
    let rolled_back = dynamic
        .rollback_to_version(&wf_id(), 1, &user("admin"))
        .unwrap();
    assert_eq!(rolled_back.version_number, 3);
    assert_eq!(active_step_ids(&engine), vec!["s1", "s2", "s3"]);
}

#[test]
fn changes_without_rule_are_refused() {
    let (engine, _) = engine_for(spend(&[]));
    let request = submit(&engine, "spend", json!({}));

    let err = engine
        .dynamic()
        .skip_step(&request.id, &StepId::new("s2"), &user("admin"), None)
        .unwrap_err();
    assert!(matches!(err, ApprovalError::ModificationNotAllowed { .. }));
    assert_eq!(engine.versions(&wf_id()).unwrap().len(), 1);
}

#[test]
fn added_step_joins_routing_of_in_flight_request() {
    let (engine, _) = engine_for(spend(&[ModificationKind::AddStep]));
    let request = submit(&engine, "spend", json!({}));
    engine
        .dynamic()
        .add_step(
            &request.id,
            Step::new("legal", "Legal", 2).with_approver(StepApprover::user("counsel", 1.0)),
            &user("admin"),
            None,
        )
        .unwrap();

    let outcome = engine.approve(&request.id, &user("lead"), None).unwrap();
    assert_eq!(
        outcome.transition,
        Transition::MovedTo {
            step: StepId::new("legal")
        }
    );
}

#[test]
fn skip_is_scoped_to_one_request_and_survives_resubmission() {
    let (engine, _) = engine_for(spend(&[ModificationKind::SkipStep]));
    let skipped = submit(&engine, "spend", json!({"amount": 1}));
    let other = submit(&engine, "spend", json!({"amount": 2}));

    engine
        .dynamic()
        .skip_step(&skipped.id, &StepId::new("s2"), &user("admin"), Some("pre-approved".into()))
        .unwrap();

    let outcome = engine.approve(&skipped.id, &user("lead"), None).unwrap();
    assert_eq!(
        outcome.transition,
        Transition::MovedTo {
            step: StepId::new("s3")
        }
    );
    let outcome = engine.approve(&other.id, &user("lead"), None).unwrap();
    assert_eq!(
        outcome.transition,
        Transition::MovedTo {
            step: StepId::new("s2")
        }
    );

    engine
        .reject(&skipped.id, &user("cfo"), "wrong cost centre", None)
        .unwrap();
    engine
        .edit_and_resubmit(&skipped.id, payload(json!({"amount": 3})), &user("requester"), None)
        .unwrap();
    let outcome = engine.approve(&skipped.id, &user("lead"), None).unwrap();
    assert_eq!(
        outcome.transition,
        Transition::MovedTo {
            step: StepId::new("s3")
        }
    );
}

#[test]
fn skipping_every_remaining_step_approves() {
    let (engine, _) = engine_for(spend(&[ModificationKind::SkipStep]));
    let request = submit(&engine, "spend", json!({}));
    let dynamic = engine.dynamic();
    engine.approve(&request.id, &user("lead"), None).unwrap();

    dynamic
        .skip_step(&request.id, &StepId::new("s3"), &user("admin"), None)
        .unwrap();
    let outcome = dynamic
        .skip_step(&request.id, &StepId::new("s2"), &user("admin"), None)
        .unwrap();
    assert_eq!(outcome.transition, Some(Transition::Completed));
    assert_eq!(outcome.request.status, RequestStatus::Approved);
    assert_eq!(dynamic.step_modifications(&request.id).unwrap().len(), 2);
}

#[test]
fn replacement_approver_takes_over_vote() {
    let (engine, notifier) = engine_for(spend(&[ModificationKind::ChangeApprover]));
    let request = submit(&engine, "spend", json!({}));

    engine
        .dynamic()
        .assign_dynamic_approver(
            &request.id,
            ApproverChange::replacing(StepId::new("s1"), user("deputy"), user("lead")),
            &user("admin"),
            Some("lead on leave".into()),
        )
        .unwrap();

    let ballot = engine
        .ballot(&request.id, &StepId::new("s1"))
        .unwrap()
        .unwrap();
    assert!(ballot.contains(&user("deputy")));
    assert!(!ballot.contains(&user("lead")));

    let outcome = engine.approve(&request.id, &user("deputy"), None).unwrap();
    assert_eq!(
        outcome.transition,
        Transition::MovedTo {
            step: StepId::new("s2")
        }
    );
}

#[test]
fn assignment_for_later_step_applies_when_step_opens() {
    let (engine, _) = engine_for(spend(&[ModificationKind::ChangeApprover]));
    let request = submit(&engine, "spend", json!({}));

    engine
        .dynamic()
        .assign_dynamic_approver(
            &request.id,
            ApproverChange::adding(StepId::new("s2"), user("auditor")).with_weightage(1.0),
            &user("admin"),
            None,
        )
        .unwrap();
    engine.approve(&request.id, &user("lead"), None).unwrap();

    let outcome = engine.approve(&request.id, &user("finance"), None).unwrap();
    assert_eq!(outcome.transition, Transition::Waiting { percentage: 50.0 });
    let outcome = engine.approve(&request.id, &user("auditor"), None).unwrap();
    assert_eq!(
        outcome.transition,
        Transition::MovedTo {
            step: StepId::new("s3")
        }
    );
}
