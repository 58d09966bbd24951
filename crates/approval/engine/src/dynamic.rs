//! Dynamic workflow manager: rule-gated runtime changes to topology and
//! approvers, with a version snapshot after every change.
//!
//! Adding and removing steps changes the shared workflow, so every
//! request on it sees the change. Skips and approver assignments are
//! scoped to one request.

use crate::notifier::NotificationKind;
use crate::store::WriteOp;
use crate::transition::{StepTransitions, Transition, Unit, IN_FLIGHT};
use approval_types::{
    Action, ActionKind, ApprovalError, ApprovalResult, AssignmentKind, DynamicApproverAssignment,
    DynamicStepModification, ModificationId, ModificationKind, Request, RequestId, RequestStatus,
    Step, StepId, StepModificationKind, UserId, Workflow, WorkflowId, WorkflowModificationRule,
    WorkflowVersion,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// An audit record together with the version it produced
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Modified<T> {
    pub record: T,
    pub version: WorkflowVersion,
}

/// Result of skipping a step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkipOutcome {
    pub record: DynamicStepModification,
    pub version: WorkflowVersion,
    pub request: Request,
    /// Set when the skipped step was the current one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transition: Option<Transition>,
}

/// An approver to put on one step of one request
#[derive(Debug, Clone, PartialEq)]
pub struct ApproverChange {
    pub step_id: StepId,
    pub approver: UserId,
    pub kind: AssignmentKind,
    pub weightage: Option<f64>,
}

impl ApproverChange {
    pub fn replacing(step_id: StepId, approver: UserId, replaces: UserId) -> Self {
        Self {
            step_id,
            approver,
            kind: AssignmentKind::Replacement { replaces },
            weightage: None,
        }
    }

    pub fn adding(step_id: StepId, approver: UserId) -> Self {
        Self {
            step_id,
            approver,
            kind: AssignmentKind::Addition,
            weightage: None,
        }
    }

    pub fn temporary(step_id: StepId, approver: UserId, until: DateTime<Utc>) -> Self {
        Self {
            step_id,
            approver,
            kind: AssignmentKind::Temporary { until },
            weightage: None,
        }
    }

    pub fn with_weightage(mut self, weightage: f64) -> Self {
        self.weightage = Some(weightage);
        self
    }
}

/// Runtime topology changes.
///
/// Every mutation checks for an active [`WorkflowModificationRule`] of the
/// matching kind, writes its audit record, and captures a new
/// [`WorkflowVersion`], all in one batch.
#[derive(Clone)]
pub struct DynamicWorkflowManager {
    core: Arc<StepTransitions>,
}

impl DynamicWorkflowManager {
    pub(crate) fn new(core: Arc<StepTransitions>) -> Self {
        Self { core }
    }

    // ── Rules ────────────────────────────────────────────────────────

    /// Problems with `rule` in the context of the stored workflow and its
    /// other rules. Empty means valid.
    pub fn validate_modification_rule(&self, rule: &WorkflowModificationRule) -> Vec<String> {
        let mut problems = rule.validate();
        match self.core.store.workflow(&rule.workflow_id) {
            Ok(Some(_)) => {}
            Ok(None) => problems.push(format!(
                "modification rule {}: workflow {} does not exist",
                rule.id, rule.workflow_id
            )),
            Err(e) => problems.push(format!("modification rule {}: {}", rule.id, e)),
        }
        match self.core.store.modification_rules(&rule.workflow_id) {
            Ok(existing) => {
                let duplicate = rule.active
                    && existing
                        .iter()
                        .any(|r| r.id != rule.id && r.active && r.kind == rule.kind);
                if duplicate {
                    problems.push(format!(
                        "workflow {} already has an active '{}' rule",
                        rule.workflow_id, rule.kind
                    ));
                }
            }
            Err(e) => problems.push(format!("modification rule {}: {}", rule.id, e)),
        }
        problems
    }

    /// Store `rule` when it is valid. Returns the problems otherwise.
    pub fn register_rule(&self, rule: WorkflowModificationRule) -> ApprovalResult<Vec<String>> {
        let problems = self.validate_modification_rule(&rule);
        if !problems.is_empty() {
            return Ok(problems);
        }
        let mut unit = Unit::new();
        tracing::info!(workflow = %rule.workflow_id, kind = %rule.kind, "Modification rule registered");
        unit.push(WriteOp::PutModificationRule(rule));
        self.core.commit_batch(unit)?;
        Ok(problems)
    }

    /// The active rule permitting `kind`, after its reason and per-request
    /// limits are checked
    fn permit(
        &self,
        workflow: &Workflow,
        request: &RequestId,
        kind: ModificationKind,
        reason: Option<&str>,
    ) -> ApprovalResult<WorkflowModificationRule> {
        let rule = self
            .core
            .store
            .modification_rules(&workflow.id)?
            .into_iter()
            .find(|r| r.active && r.kind == kind)
            .ok_or_else(|| ApprovalError::ModificationNotAllowed {
                workflow: workflow.id.clone(),
                kind,
            })?;

        if rule.requires_reason && reason.map_or(true, |r| r.trim().is_empty()) {
            return Err(ApprovalError::InvalidTransition(format!(
                "'{}' on workflow {} requires a reason",
                kind, workflow.id
            )));
        }
        if let Some(max) = rule.max_per_request {
            let used = self.modifications_made(workflow, request, kind)?;
            if used >= max as usize {
                return Err(ApprovalError::InvalidTransition(format!(
                    "request {} has used all {} '{}' modifications",
                    request, max, kind
                )));
            }
        }
        Ok(rule)
    }

    fn modifications_made(
        &self,
        workflow: &Workflow,
        request: &RequestId,
        kind: ModificationKind,
    ) -> ApprovalResult<usize> {
        let step_kind = match kind {
            ModificationKind::AddStep => StepModificationKind::Added,
            ModificationKind::RemoveStep => StepModificationKind::Removed,
            ModificationKind::SkipStep => StepModificationKind::Skipped,
            ModificationKind::ChangeApprover => {
                let mut count = 0;
                for step in &workflow.steps {
                    count += self.core.store.approver_assignments(request, &step.id)?.len();
                }
                return Ok(count);
            }
        };
        Ok(self
            .core
            .store
            .step_modifications(request)?
            .iter()
            .filter(|m| m.kind == step_kind)
            .count())
    }

    // ── Step changes ─────────────────────────────────────────────────

    /// Insert `step` into the request's workflow at its sequence, moving
    /// later steps back by one.
    pub fn add_step(
        &self,
        request_id: &RequestId,
        step: Step,
        by: &UserId,
        reason: Option<String>,
    ) -> ApprovalResult<Modified<DynamicStepModification>> {
        self.with_workflow_of(request_id, |request, mut workflow, now| {
            self.permit(&workflow, &request.id, ModificationKind::AddStep, reason.as_deref())?;
            if workflow.contains_step(&step.id) {
                return Err(ApprovalError::InvalidTransition(format!(
                    "workflow {} already has a step {}",
                    workflow.id, step.id
                )));
            }
            for existing in workflow.steps.iter_mut() {
                if existing.sequence >= step.sequence {
                    existing.sequence += 1;
                }
            }
            let step_id = workflow.add_step(step)?;

            let record =
                self.step_record(&request, step_id, StepModificationKind::Added, reason, by, now);
            let mut unit = Unit::new();
            unit.push(WriteOp::AppendStepModification(record.clone()));
            let version = self.record_version(
                &mut workflow,
                format!("added step {} for request {}", record.step_id, request.id),
                by,
                now,
                &mut unit,
            )?;
            self.core.commit_batch(unit)?;
            tracing::info!(
                request_id = %request.id,
                workflow = %workflow.id,
                step = %record.step_id,
                version = version.version_number,
                "Step added"
            );
            Ok(Modified { record, version })
        })
    }

    /// Deactivate a step of the request's workflow. The request's current
    /// step cannot be removed.
    pub fn remove_step(
        &self,
        request_id: &RequestId,
        step_id: &StepId,
        by: &UserId,
        reason: Option<String>,
    ) -> ApprovalResult<Modified<DynamicStepModification>> {
        self.with_workflow_of(request_id, |request, mut workflow, now| {
            self.permit(&workflow, &request.id, ModificationKind::RemoveStep, reason.as_deref())?;
            workflow.require_step(step_id)?;
            if request.current_step.as_ref() == Some(step_id) {
                return Err(ApprovalError::CannotRemoveCurrentStep(step_id.clone()));
            }
            if let Some(step) = workflow.step_mut(step_id) {
                step.active = false;
            }

            let record = self.step_record(
                &request,
                step_id.clone(),
                StepModificationKind::Removed,
                reason,
                by,
                now,
            );
            let mut unit = Unit::new();
            unit.push(WriteOp::AppendStepModification(record.clone()));
            let version = self.record_version(
                &mut workflow,
                format!("removed step {} for request {}", step_id, request.id),
                by,
                now,
                &mut unit,
            )?;
            self.core.commit_batch(unit)?;
            tracing::info!(
                request_id = %request.id,
                workflow = %workflow.id,
                step = %step_id,
                version = version.version_number,
                "Step removed"
            );
            Ok(Modified { record, version })
        })
    }

    /// Skip a step for this request only. Skipping the current step moves
    /// the request to the next step that is not skipped, or approves it.
    pub fn skip_step(
        &self,
        request_id: &RequestId,
        step_id: &StepId,
        by: &UserId,
        reason: Option<String>,
    ) -> ApprovalResult<SkipOutcome> {
        self.with_workflow_of(request_id, |mut request, mut workflow, now| {
            self.permit(&workflow, &request.id, ModificationKind::SkipStep, reason.as_deref())?;
            workflow.require_step(step_id)?;
            let mut skipped = self.core.skipped_steps(&request.id)?;
            if !skipped.insert(step_id.clone()) {
                return Err(ApprovalError::InvalidTransition(format!(
                    "step {} is already skipped for request {}",
                    step_id, request.id
                )));
            }
            let is_current = request.current_step.as_ref() == Some(step_id);
            if is_current && !self.core.open_forks(&request.id)?.is_empty() {
                return Err(ApprovalError::ParallelExecutionInProgress(request.id.clone()));
            }

            let record = self.step_record(
                &request,
                step_id.clone(),
                StepModificationKind::Skipped,
                reason.clone(),
                by,
                now,
            );
            let mut unit = Unit::new();
            unit.push(WriteOp::AppendStepModification(record.clone()));
            unit.record(
                Action::new(request.id.clone(), by.clone(), ActionKind::Skipped)
                    .at_step(step_id.clone())
                    .with_remarks(reason)
                    .at(now),
            );

            let transition = if is_current {
                let next = workflow.next_step_excluding(step_id, &skipped);
                Some(match next {
                    Some(step) => {
                        self.core.enter_step(&mut request, step, now, &mut unit)?;
                        request.status = RequestStatus::Pending;
                        Transition::MovedTo {
                            step: step.id.clone(),
                        }
                    }
                    None => {
                        self.core.complete(&mut request, now, &mut unit);
                        Transition::Completed
                    }
                })
            } else {
                None
            };

            let version = self.record_version(
                &mut workflow,
                format!("skipped step {} for request {}", step_id, request.id),
                by,
                now,
                &mut unit,
            )?;
            self.core.commit(&request, unit)?;
            tracing::info!(
                request_id = %request.id,
                step = %step_id,
                current = is_current,
                "Step skipped"
            );
            Ok(SkipOutcome {
                record,
                version,
                request,
                transition,
            })
        })
    }

    // ── Approver changes ─────────────────────────────────────────────

    /// Assign an approver to one step of one request.
    ///
    /// When the step already has a ballot open the approver joins it
    /// immediately; otherwise the assignment applies when the ballot opens.
    pub fn assign_dynamic_approver(
        &self,
        request_id: &RequestId,
        change: ApproverChange,
        by: &UserId,
        reason: Option<String>,
    ) -> ApprovalResult<Modified<DynamicApproverAssignment>> {
        self.with_workflow_of(request_id, |request, mut workflow, now| {
            self.permit(
                &workflow,
                &request.id,
                ModificationKind::ChangeApprover,
                reason.as_deref(),
            )?;
            workflow.require_step(&change.step_id)?;
            if let Some(w) = change.weightage {
                if !w.is_finite() || w < 0.0 {
                    return Err(ApprovalError::InvalidTransition(format!(
                        "weightage {} must be a non-negative number",
                        w
                    )));
                }
            }

            let record = DynamicApproverAssignment {
                id: ModificationId::generate(),
                request_id: request.id.clone(),
                step_id: change.step_id.clone(),
                approver: change.approver.clone(),
                weightage: change.weightage,
                kind: change.kind,
                reason,
                assigned_by: by.clone(),
                created_at: now,
            };
            let mut unit = Unit::new();
            unit.push(WriteOp::AppendApproverAssignment(record.clone()));

            if let Some(mut ballot) = self.core.store.ballot(&request.id, &change.step_id)? {
                if record.is_effective(now) {
                    self.core.apply_assignment(&mut ballot, &record);
                    unit.push(WriteOp::PutBallot(ballot));
                    unit.notify_approvers(
                        vec![record.approver.clone()],
                        NotificationKind::ApprovalRequired,
                        None,
                    );
                }
            }

            let version = self.record_version(
                &mut workflow,
                format!(
                    "assigned approver {} on step {} for request {}",
                    record.approver, record.step_id, request.id
                ),
                by,
                now,
                &mut unit,
            )?;
            self.core.commit(&request, unit)?;
            tracing::info!(
                request_id = %request.id,
                step = %record.step_id,
                approver = %record.approver,
                "Dynamic approver assigned"
            );
            Ok(Modified { record, version })
        })
    }

    // ── Versions ─────────────────────────────────────────────────────

    /// Restore the workflow and its full step set from a stored version,
    /// recording the rollback itself as a new version.
    ///
    /// Refused while an in-flight request sits on a step, or holds an open
    /// branch on a step, that the stored version does not have.
    pub fn rollback_to_version(
        &self,
        workflow_id: &WorkflowId,
        version_number: u32,
        by: &UserId,
    ) -> ApprovalResult<WorkflowVersion> {
        let core = &self.core;
        core.workflow_locks.with(workflow_id, || {
            let current = core.workflow(workflow_id)?;
            let target = core
                .store
                .versions(workflow_id)?
                .into_iter()
                .find(|v| v.version_number == version_number)
                .ok_or_else(|| ApprovalError::VersionNotFound {
                    workflow: workflow_id.clone(),
                    version: version_number,
                })?;

            let mut restored = target.snapshot;
            restored.id = current.id.clone();
            restored.created_at = current.created_at;
            restored.sort_steps();

            let mut in_flight: Vec<RequestId> = core
                .store
                .requests_with_status(&IN_FLIGHT)?
                .into_iter()
                .filter(|r| &r.workflow_id == workflow_id)
                .map(|r| r.id)
                .collect();
            in_flight.sort();

            core.request_locks.with_all(&in_flight, || {
                let stranded = self.stranded_requests(&restored, &in_flight)?;
                if !stranded.is_empty() {
                    tracing::warn!(
                        workflow = %workflow_id,
                        version = version_number,
                        stranded = stranded.len(),
                        "Rollback refused"
                    );
                    return Err(ApprovalError::RollbackStrandsRequests {
                        workflow: workflow_id.clone(),
                        version: version_number,
                        requests: stranded,
                    });
                }

                let mut unit = Unit::new();
                let version = self.record_version(
                    &mut restored,
                    format!("rolled back to version {}", version_number),
                    by,
                    Utc::now(),
                    &mut unit,
                )?;
                core.commit_batch(unit)?;
                tracing::info!(
                    workflow = %workflow_id,
                    from = version_number,
                    version = version.version_number,
                    "Workflow rolled back"
                );
                Ok(version)
            })
        })
    }

    /// Requests among `candidates` whose current step or open branches
    /// `workflow` does not contain
    fn stranded_requests(
        &self,
        workflow: &Workflow,
        candidates: &[RequestId],
    ) -> ApprovalResult<Vec<RequestId>> {
        let core = &self.core;
        let mut stranded = Vec::new();
        for id in candidates {
            let request = core.request(id)?;
            if !request.is_in_flight() {
                continue;
            }
            let off_current = request
                .current_step
                .as_ref()
                .is_some_and(|step| workflow.step(step).is_none());
            let off_branch = core
                .store
                .active_parallel_steps(id)?
                .iter()
                .any(|t| t.status.is_open() && workflow.step(&t.step_id).is_none());
            if off_current || off_branch {
                stranded.push(request.id);
            }
        }
        Ok(stranded)
    }

    /// Versions of a workflow, oldest first
    pub fn list_versions(&self, workflow_id: &WorkflowId) -> ApprovalResult<Vec<WorkflowVersion>> {
        Ok(self.core.store.versions(workflow_id)?)
    }

    pub fn active_version(&self, workflow_id: &WorkflowId) -> ApprovalResult<Option<WorkflowVersion>> {
        Ok(self
            .core
            .store
            .versions(workflow_id)?
            .into_iter()
            .find(|v| v.active))
    }

    pub fn step_modifications(
        &self,
        request_id: &RequestId,
    ) -> ApprovalResult<Vec<DynamicStepModification>> {
        Ok(self.core.store.step_modifications(request_id)?)
    }

    // ── Helpers ──────────────────────────────────────────────────────

    /// Run `f` holding the workflow lock, then the request lock
    fn with_workflow_of<T>(
        &self,
        request_id: &RequestId,
        f: impl FnOnce(Request, Workflow, DateTime<Utc>) -> ApprovalResult<T>,
    ) -> ApprovalResult<T> {
        let core = &self.core;
        let workflow_id = core.request(request_id)?.workflow_id;
        core.workflow_locks.with(&workflow_id, || {
            core.request_locks.with(request_id, || {
                let request = core.request(request_id)?;
                if request.is_terminal() {
                    return Err(ApprovalError::TerminalRequest {
                        request: request.id.clone(),
                        status: request.status,
                    });
                }
                let workflow = core.workflow(&request.workflow_id)?;
                f(request, workflow, Utc::now())
            })
        })
    }

    fn step_record(
        &self,
        request: &Request,
        step_id: StepId,
        kind: StepModificationKind,
        reason: Option<String>,
        by: &UserId,
        now: DateTime<Utc>,
    ) -> DynamicStepModification {
        DynamicStepModification {
            id: ModificationId::generate(),
            request_id: request.id.clone(),
            workflow_id: request.workflow_id.clone(),
            step_id,
            kind,
            reason,
            modified_by: by.clone(),
            created_at: now,
        }
    }

    /// Capture `workflow` as the next version and queue the workflow write
    fn record_version(
        &self,
        workflow: &mut Workflow,
        summary: String,
        by: &UserId,
        now: DateTime<Utc>,
        unit: &mut Unit,
    ) -> ApprovalResult<WorkflowVersion> {
        let number = match self.core.store.versions(&workflow.id)?.last() {
            Some(latest) => latest.version_number + 1,
            None => workflow.version + 1,
        };
        workflow.version = number;
        workflow.updated_at = now;
        let version = WorkflowVersion::capture(workflow, number, summary, by.clone(), now);
        unit.push(WriteOp::PutWorkflow(workflow.clone()));
        unit.push(WriteOp::InsertVersion(version.clone()));
        tracing::info!(workflow = %workflow.id, version = number, "Workflow version created");
        Ok(version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ApprovalEngine;
    use crate::store::{ApprovalStore, InMemoryStore, WriteBatch};
    use approval_types::{StepApprover, Subject};

    fn setup(kinds: &[ModificationKind]) -> (ApprovalEngine, Request) {
        let store = Arc::new(InMemoryStore::new());
        let wf = Workflow::new("Spend", "spend")
            .with_id("wf")
            .with_step(Step::new("s1", "Lead", 1).with_approver(StepApprover::user("lead", 1.0)))
            .unwrap()
            .with_step(Step::new("s2", "Finance", 2).with_approver(StepApprover::user("fin", 1.0)))
            .unwrap()
            .with_step(Step::new("s3", "CFO", 3).with_approver(StepApprover::user("cfo", 1.0)))
            .unwrap();
        let mut batch = WriteBatch::new();
        batch.put_workflow(wf);
        for kind in kinds {
            batch.push(WriteOp::PutModificationRule(WorkflowModificationRule::allow(
                WorkflowId::new("wf"),
                *kind,
            )));
        }
        store.commit(batch).unwrap();
        let engine = ApprovalEngine::new(store);
        let request = engine
            .submit(Subject::new("spend", "1"), UserId::new("alice"), Default::default())
            .unwrap();
        (engine, request)
    }

    #[test]
    fn test_requires_rule() {
        let (engine, request) = setup(&[]);
        let err = engine
            .dynamic()
            .skip_step(&request.id, &StepId::new("s2"), &UserId::new("admin"), None)
            .unwrap_err();
        assert!(matches!(
            err,
            ApprovalError::ModificationNotAllowed {
                kind: ModificationKind::SkipStep,
                ..
            }
        ));
    }

    #[test]
    fn test_add_step_shifts_sequences() {
        let (engine, request) = setup(&[ModificationKind::AddStep]);
        let added = engine
            .dynamic()
            .add_step(
                &request.id,
                Step::new("legal", "Legal", 2).with_approver(StepApprover::user("legal", 1.0)),
                &UserId::new("admin"),
                None,
            )
            .unwrap();
        assert_eq!(added.version.version_number, 2);

        let wf = engine.store().workflow(&WorkflowId::new("wf")).unwrap().unwrap();
        let order: Vec<(&str, u32)> = wf.steps.iter().map(|s| (s.id.as_str(), s.sequence)).collect();
        assert_eq!(order, vec![("s1", 1), ("legal", 2), ("s2", 3), ("s3", 4)]);
        assert_eq!(wf.version, 2);
    }

    #[test]
    fn test_remove_current_step_refused() {
        let (engine, request) = setup(&[ModificationKind::RemoveStep]);
        let err = engine
            .dynamic()
            .remove_step(&request.id, &StepId::new("s1"), &UserId::new("admin"), None)
            .unwrap_err();
        assert!(matches!(err, ApprovalError::CannotRemoveCurrentStep(_)));

        engine
            .dynamic()
            .remove_step(&request.id, &StepId::new("s2"), &UserId::new("admin"), None)
            .unwrap();
        let outcome = engine.approve(&request.id, &UserId::new("lead"), None).unwrap();
        assert_eq!(
            outcome.transition,
            Transition::MovedTo {
                step: StepId::new("s3")
            }
        );
    }

    #[test]
    fn test_skip_current_step_advances() {
        let (engine, request) = setup(&[ModificationKind::SkipStep]);
        let outcome = engine
            .dynamic()
            .skip_step(&request.id, &StepId::new("s1"), &UserId::new("admin"), Some("urgent".into()))
            .unwrap();
        assert_eq!(
            outcome.transition,
            Some(Transition::MovedTo {
                step: StepId::new("s2")
            })
        );
        assert_eq!(outcome.request.current_step, Some(StepId::new("s2")));

        let again = engine
            .dynamic()
            .skip_step(&request.id, &StepId::new("s1"), &UserId::new("admin"), None);
        assert!(matches!(again, Err(ApprovalError::InvalidTransition(_))));
    }

    #[test]
    fn test_reason_and_limit_enforced() {
        let store = Arc::new(InMemoryStore::new());
        let wf = Workflow::new("Spend", "spend")
            .with_id("wf")
            .with_step(Step::new("s1", "Lead", 1).with_approver(StepApprover::user("lead", 1.0)))
            .unwrap()
            .with_step(Step::new("s2", "Finance", 2).with_approver(StepApprover::user("fin", 1.0)))
            .unwrap()
            .with_step(Step::new("s3", "CFO", 3).with_approver(StepApprover::user("cfo", 1.0)))
            .unwrap();
        let mut batch = WriteBatch::new();
        batch.put_workflow(wf);
        batch.push(WriteOp::PutModificationRule(
            WorkflowModificationRule::allow(WorkflowId::new("wf"), ModificationKind::SkipStep)
                .requiring_reason()
                .with_max_per_request(1),
        ));
        store.commit(batch).unwrap();
        let engine = ApprovalEngine::new(store);
        let request = engine
            .submit(Subject::new("spend", "1"), UserId::new("alice"), Default::default())
            .unwrap();
        let admin = UserId::new("admin");

        let err = engine
            .dynamic()
            .skip_step(&request.id, &StepId::new("s2"), &admin, Some("  ".into()))
            .unwrap_err();
        assert!(matches!(err, ApprovalError::InvalidTransition(_)));

        engine
            .dynamic()
            .skip_step(&request.id, &StepId::new("s2"), &admin, Some("not needed".into()))
            .unwrap();
        let err = engine
            .dynamic()
            .skip_step(&request.id, &StepId::new("s3"), &admin, Some("also".into()))
            .unwrap_err();
        assert!(matches!(err, ApprovalError::InvalidTransition(_)));
    }

    #[test]
    fn test_assignment_joins_open_ballot() {
        let (engine, request) = setup(&[ModificationKind::ChangeApprover]);
        engine
            .dynamic()
            .assign_dynamic_approver(
                &request.id,
                ApproverChange::replacing(StepId::new("s1"), UserId::new("deputy"), UserId::new("lead")),
                &UserId::new("admin"),
                None,
            )
            .unwrap();
        let ballot = engine.ballot(&request.id, &StepId::new("s1")).unwrap().unwrap();
        assert!(ballot.contains(&UserId::new("deputy")));
        assert!(!ballot.contains(&UserId::new("lead")));

        let outcome = engine.approve(&request.id, &UserId::new("deputy"), None).unwrap();
        assert_eq!(
            outcome.transition,
            Transition::MovedTo {
                step: StepId::new("s2")
            }
        );
    }

    #[test]
    fn test_rollback_restores_steps() {
        let (engine, request) = setup(&[ModificationKind::RemoveStep]);
        let wf_id = WorkflowId::new("wf");
        let admin = UserId::new("admin");
        let original = engine.store().workflow(&wf_id).unwrap().unwrap();
        let mut batch = WriteBatch::new();
        batch.push(WriteOp::InsertVersion(WorkflowVersion::capture(
            &original,
            1,
            "initial",
            admin.clone(),
            Utc::now(),
        )));
        engine.store().commit(batch).unwrap();

        let removed = engine
            .dynamic()
            .remove_step(&request.id, &StepId::new("s3"), &admin, None)
            .unwrap();
        assert_eq!(removed.version.version_number, 2);
        let wf = engine.store().workflow(&wf_id).unwrap().unwrap();
        assert_eq!(wf.active_step_count(), 2);

        let rollback = engine.dynamic().rollback_to_version(&wf_id, 1, &admin).unwrap();
        assert_eq!(rollback.version_number, 3);
        let wf = engine.store().workflow(&wf_id).unwrap().unwrap();
        assert_eq!(wf.active_step_count(), 3);
        assert_eq!(wf.version, 3);

        let active = engine.dynamic().active_version(&wf_id).unwrap().unwrap();
        assert_eq!(active.version_number, 3);
        assert_eq!(engine.dynamic().list_versions(&wf_id).unwrap().len(), 3);

        assert!(matches!(
            engine.dynamic().rollback_to_version(&wf_id, 9, &admin),
            Err(ApprovalError::VersionNotFound { version: 9, .. })
        ));
    }

    #[test]
    fn test_validate_rule_against_store() {
        let (engine, _) = setup(&[ModificationKind::AddStep]);
        let duplicate = WorkflowModificationRule::allow(WorkflowId::new("wf"), ModificationKind::AddStep);
        assert_eq!(engine.dynamic().validate_modification_rule(&duplicate).len(), 1);

        let orphan = WorkflowModificationRule::allow(WorkflowId::new("nope"), ModificationKind::AddStep);
        assert_eq!(engine.dynamic().validate_modification_rule(&orphan).len(), 1);
    }
}
