//! End-to-end test: SLA escalation and reminders.

use crate::common::*;
use approval_engine::{Blueprint, EngineConfig, EscalationRecordPolicy, NotificationKind};
use approval_types::{ActionKind, ApprovalError, EscalationReason, RequestStatus, StepId};
use chrono::{Duration, Utc};
use serde_json::json;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn with_sla() -> Blueprint {
    Blueprint::new(workflow(
        "travel",
        "travel",
        vec![
            step("lead", 1, &[("bob", 1.0), ("beth", 1.0)]).with_sla_hours(24),
            step("director", 2, &[("dana", 1.0), ("dev", 1.0), ("dee", 1.0)]).with_sla_hours(48),
            step("finance", 3, &[("fiona", 1.0)]),
        ],
    ))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[test]
fn overdue_request_moves_to_next_step() {
    let (engine, notifier) = engine_for(with_sla());
    let request = submit(&engine, "travel", json!({"destination": "Lisbon"}));
    let deadline = request.sla_deadline.unwrap();
    let escalation = engine.escalation();

    assert!(escalation.find_overdue(deadline - Duration::minutes(1)).unwrap().is_empty());

    let report = escalation
        .check_overdue_approvals(deadline + Duration::minutes(1))
        .unwrap();
    assert_eq!(report.overdue, 1);
    assert_eq!(report.escalated, vec![request.id.clone()]);
    assert!(report.failed.is_empty());

    let escalated = engine.request(&request.id).unwrap();
    assert_eq!(escalated.current_step, Some(StepId::new("director")));
    assert_eq!(escalated.status, RequestStatus::Pending);
    assert!(escalated.sla_deadline.unwrap() > deadline);

    // two approvers from, three approvers to
    let records = engine.escalations(&request.id).unwrap();
    assert_eq!(records.len(), 6);
    assert!(records.iter().all(|r| r.reason == EscalationReason::SlaTimeout));
    assert!(records.iter().all(|r| r.from_step.as_str() == "lead"));

    let history = engine.history(&request.id).unwrap();
    let last = history.last().unwrap();
    assert!(matches!(
        &last.kind,
        ActionKind::Escalated { to_step } if to_step.as_str() == "director"
    ));
    assert_eq!(last.actor.as_str(), "system");

    let sent = notifier.sent();
    assert!(sent
        .iter()
        .any(|n| n.kind == NotificationKind::Escalated && n.recipients.len() == 3));
    assert!(sent
        .iter()
        .any(|n| n.kind == NotificationKind::Escalated && n.to_creator));
}

#[test]
fn per_request_policy_writes_one_record() {
    let mut config = EngineConfig::default();
    config.escalation.record_policy = EscalationRecordPolicy::PerRequest;
    let (engine, _) = engine_with_config(with_sla(), config);
    let request = submit(&engine, "travel", json!({}));

    let outcome = engine
        .escalation()
        .escalate_request(&request.id, EscalationReason::Manual)
        .unwrap()
        .unwrap();
    assert_eq!(outcome.records.len(), 1);
    assert_eq!(outcome.to_step, StepId::new("director"));
    assert!(outcome.records[0].from_user.is_none());
}

#[test]
fn last_step_is_not_escalated() {
    let (engine, _) = engine_for(Blueprint::new(workflow(
        "travel",
        "travel",
        vec![step("only", 1, &[("bob", 1.0)]).with_sla_hours(1)],
    )));
    let request = submit(&engine, "travel", json!({}));

    let report = engine
        .escalation()
        .check_overdue_approvals(Utc::now() + Duration::hours(2))
        .unwrap();
    assert_eq!(report.overdue, 1);
    assert_eq!(report.unescalated, vec![request.id.clone()]);
    assert_eq!(
        engine.request(&request.id).unwrap().current_step,
        Some(StepId::new("only"))
    );
    assert!(engine.escalations(&request.id).unwrap().is_empty());
}

#[test]
fn finished_requests_are_not_scanned() {
    let (engine, _) = engine_for(with_sla());
    let request = submit(&engine, "travel", json!({}));
    engine
        .reject(&request.id, &user("bob"), "no budget", None)
        .unwrap();

    let report = engine
        .escalation()
        .check_overdue_approvals(Utc::now() + Duration::days(30))
        .unwrap();
    assert_eq!(report.overdue, 0);
    assert!(matches!(
        engine
            .escalation()
            .escalate_request(&request.id, EscalationReason::Manual),
        Err(ApprovalError::TerminalRequest { .. })
    ));
}

#[test]
fn reminders_go_out_after_half_the_window() {
    let (engine, notifier) = engine_for(with_sla());
    let request = submit(&engine, "travel", json!({}));
    engine.approve(&request.id, &user("bob"), None).unwrap();
    let entered = engine.request(&request.id).unwrap().step_entered_at.unwrap();
    let escalation = engine.escalation();

    assert_eq!(escalation.send_reminders(entered + Duration::hours(6)).unwrap(), 0);
    assert_eq!(escalation.send_reminders(entered + Duration::hours(13)).unwrap(), 1);

    let reminders: Vec<_> = notifier
        .sent()
        .into_iter()
        .filter(|n| n.kind == NotificationKind::Reminder)
        .collect();
    assert_eq!(reminders.len(), 1);
    // bob already voted
    assert_eq!(reminders[0].recipients, vec![user("beth")]);

    // within the reminder interval
    assert_eq!(escalation.send_reminders(entered + Duration::hours(15)).unwrap(), 0);
    // past the deadline nothing is sent
    assert_eq!(escalation.send_reminders(entered + Duration::hours(25)).unwrap(), 0);
}
