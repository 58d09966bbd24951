//! Escalation service: SLA breaches and reminders
//!
//! Nothing here runs on a timer. A caller polls
//! [`EscalationService::check_overdue_approvals`] and
//! [`EscalationService::send_reminders`] with the current time; each
//! request is handled under its own lock, and a failure on one request
//! is logged without stopping the scan.

use crate::config::EscalationRecordPolicy;
use crate::notifier::NotificationKind;
use crate::store::WriteOp;
use crate::transition::{StepTransitions, Unit, IN_FLIGHT};
use approval_types::{
    Action, ActionKind, ApprovalError, ApprovalResult, Escalation, EscalationId, EscalationReason,
    Request, RequestId, RequestStatus, StepId, UserId,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A request handed to the next step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationOutcome {
    pub request: Request,
    pub from_step: StepId,
    pub to_step: StepId,
    pub records: Vec<Escalation>,
}

/// Summary of one overdue scan
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EscalationReport {
    /// Overdue requests found
    pub overdue: usize,
    pub escalated: Vec<RequestId>,
    /// Overdue, but already on their last step
    pub unescalated: Vec<RequestId>,
    pub failed: Vec<(RequestId, String)>,
}

/// Detects SLA breaches and hands requests to the next step
#[derive(Clone)]
pub struct EscalationService {
    core: Arc<StepTransitions>,
}

impl EscalationService {
    pub(crate) fn new(core: Arc<StepTransitions>) -> Self {
        Self { core }
    }

    /// In-flight requests whose SLA deadline is before `now`
    pub fn find_overdue(&self, now: DateTime<Utc>) -> ApprovalResult<Vec<Request>> {
        Ok(self
            .core
            .store
            .requests_with_status(&IN_FLIGHT)?
            .into_iter()
            .filter(|r| r.sla_deadline.is_some_and(|d| d < now))
            .collect())
    }

    /// Escalate every overdue request with reason `sla_timeout`
    pub fn check_overdue_approvals(&self, now: DateTime<Utc>) -> ApprovalResult<EscalationReport> {
        let overdue = self.find_overdue(now)?;
        let mut report = EscalationReport {
            overdue: overdue.len(),
            ..Default::default()
        };
        for request in overdue {
            match self.escalate_at(&request.id, EscalationReason::SlaTimeout, now) {
                Ok(Some(_)) => report.escalated.push(request.id),
                Ok(None) => report.unescalated.push(request.id),
                Err(e) => {
                    tracing::warn!(request_id = %request.id, error = %e, "Escalation failed");
                    report.failed.push((request.id, e.to_string()));
                }
            }
        }
        tracing::info!(
            overdue = report.overdue,
            escalated = report.escalated.len(),
            failed = report.failed.len(),
            "Overdue scan finished"
        );
        Ok(report)
    }

    /// Hand the request to the next step by sequence.
    ///
    /// Returns `None` when the current step is the last one; there is no
    /// workflow-level owner to escalate to.
    pub fn escalate_request(
        &self,
        request_id: &RequestId,
        reason: EscalationReason,
    ) -> ApprovalResult<Option<EscalationOutcome>> {
        self.escalate_at(request_id, reason, Utc::now())
    }

    fn escalate_at(
        &self,
        request_id: &RequestId,
        reason: EscalationReason,
        now: DateTime<Utc>,
    ) -> ApprovalResult<Option<EscalationOutcome>> {
        let core = &self.core;
        core.request_locks.with(request_id, || {
            let mut request = core.request(request_id)?;
            let from = core.actionable_step(&request)?;
            let workflow = core.workflow(&request.workflow_id)?;
            let skipped = core.skipped_steps(&request.id)?;
            let Some(next) = workflow.next_step_excluding(&from, &skipped) else {
                tracing::warn!(
                    request_id = %request.id,
                    step = %from,
                    "No step to escalate to, leaving request in place"
                );
                return Ok(None);
            };

            let from_users = match core.store.ballot(&request.id, &from)? {
                Some(ballot) => ballot.approvers(),
                None => Vec::new(),
            };

            let mut unit = Unit::new();
            core.plan_cancel_forks(&request.id, None, now, &mut unit)?;
            let message = format!("escalated from {} ({})", from, reason);
            let to_users = core.enter_step_notifying(
                &mut request,
                next,
                now,
                &mut unit,
                NotificationKind::Escalated,
                Some(message.clone()),
            )?;
            request.status = RequestStatus::Pending;

            let template = Escalation::new(
                request.id.clone(),
                from.clone(),
                next.id.clone(),
                reason.clone(),
                now,
            );
            let records = self.records(template, &from_users, &to_users);
            for record in &records {
                unit.push(WriteOp::AppendEscalation(record.clone()));
            }
            unit.record(
                Action::new(
                    request.id.clone(),
                    core.system_actor(),
                    ActionKind::Escalated {
                        to_step: next.id.clone(),
                    },
                )
                .at_step(from.clone())
                .with_remarks(Some(reason.to_string()))
                .at(now),
            );
            unit.notify_creator(NotificationKind::Escalated, Some(message));
            core.commit(&request, unit)?;
            tracing::info!(
                request_id = %request.id,
                from = %from,
                to = %next.id,
                reason = %reason,
                records = records.len(),
                "Request escalated"
            );
            Ok(Some(EscalationOutcome {
                from_step: from.clone(),
                to_step: next.id.clone(),
                request,
                records,
            }))
        })
    }

    /// Escalation records under the configured policy
    fn records(
        &self,
        template: Escalation,
        from_users: &[UserId],
        to_users: &[UserId],
    ) -> Vec<Escalation> {
        let record = || Escalation {
            id: EscalationId::generate(),
            ..template.clone()
        };
        match self.core.config.escalation.record_policy {
            EscalationRecordPolicy::PerRequest => vec![record()],
            EscalationRecordPolicy::PerPair => {
                let sources: Vec<Option<&UserId>> = if from_users.is_empty() {
                    vec![None]
                } else {
                    from_users.iter().map(Some).collect()
                };
                let targets: Vec<Option<&UserId>> = if to_users.is_empty() {
                    vec![None]
                } else {
                    to_users.iter().map(Some).collect()
                };
                let cap = self.core.config.escalation.max_pair_records;
                let total = sources.len() * targets.len();
                if total > cap {
                    tracing::warn!(
                        request_id = %template.request_id,
                        pairs = total,
                        cap,
                        "Escalation pairs exceed cap, truncating"
                    );
                }
                sources
                    .iter()
                    .flat_map(|f| targets.iter().map(move |t| (*f, *t)))
                    .take(cap)
                    .map(|(f, t)| record().between(f.cloned(), t.cloned()))
                    .collect()
            }
        }
    }

    /// Remind pending approvers of requests past half their SLA window.
    ///
    /// A request gets at most one reminder per configured interval and
    /// none once its deadline has passed. Returns how many were sent.
    pub fn send_reminders(&self, now: DateTime<Utc>) -> ApprovalResult<usize> {
        let candidates: Vec<RequestId> = self
            .core
            .store
            .requests_with_status(&IN_FLIGHT)?
            .into_iter()
            .filter(|r| self.reminder_due(r, now))
            .map(|r| r.id)
            .collect();

        let mut sent = 0;
        for id in candidates {
            match self.remind(&id, now) {
                Ok(true) => sent += 1,
                Ok(false) => {}
                Err(e) => tracing::warn!(request_id = %id, error = %e, "Reminder failed"),
            }
        }
        tracing::debug!(sent, "Reminders sent");
        Ok(sent)
    }

    fn reminder_due(&self, request: &Request, now: DateTime<Utc>) -> bool {
        let (Some(deadline), Some(entered)) = (request.sla_deadline, request.step_entered_at) else {
            return false;
        };
        if deadline <= now {
            return false;
        }
        let interval = Duration::hours(i64::from(self.core.config.escalation.reminder_interval_hours));
        if request.last_reminder_sent.is_some_and(|last| now - last < interval) {
            return false;
        }
        (now - entered) * 2 > deadline - entered
    }

    fn remind(&self, request_id: &RequestId, now: DateTime<Utc>) -> ApprovalResult<bool> {
        let core = &self.core;
        core.request_locks.with(request_id, || {
            let mut request = core.request(request_id)?;
            if !request.is_in_flight() || !self.reminder_due(&request, now) {
                return Ok(false);
            }
            let step = request
                .current_step
                .clone()
                .ok_or_else(|| ApprovalError::NoCurrentStep(request.id.clone()))?;
            let pending = match core.store.ballot(&request.id, &step)? {
                Some(ballot) => ballot.pending_approvers(),
                None => Vec::new(),
            };

            let mut unit = Unit::new();
            unit.notify_approvers(pending, NotificationKind::Reminder, None);
            request.last_reminder_sent = Some(now);
            core.commit(&request, unit)?;
            tracing::debug!(request_id = %request.id, step = %step, "Reminder sent");
            Ok(true)
        })
    }
}
