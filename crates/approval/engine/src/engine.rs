//! Approval Engine: the request state machine
//!
//! ```text
//! Draft ──submit──▶ Submitted ──vote──▶ Pending ──▶ Approved
//!                        │                 │
//!                        └──── reject ─────┴──▶ Rejected ──edit & resubmit──▶ Submitted
//!                        └──── cancel ─────┴──▶ Cancelled
//!       Approved | Rejected | Cancelled ──archive──▶ Archived
//! ```
//!
//! Every mutating call runs under the request's lock and commits one
//! atomic batch: ballot update, consensus check, resulting transition and
//! audit entries land together or not at all. Notifications go out after
//! the commit.

use crate::config::EngineConfig;
use crate::dynamic::DynamicWorkflowManager;
use crate::escalation::EscalationService;
use crate::notifier::{NotificationKind, Notifier, TracingNotifier};
use crate::parallel::{finish_branch, ParallelWorkflowManager, SyncOutcome};
use crate::resolver::ApproverResolver;
use crate::store::{ApprovalStore, WriteOp};
use crate::transition::{StepTransitions, Transition, Unit};
use crate::weightage::{round2, ConsensusBreakdown, WeightageCalculator};
use approval_types::{
    Action, ActionKind, ActiveParallelStep, ApprovalError, ApprovalResult, Ballot, BranchOutcome,
    BranchStatus, Escalation, ExecutionState, ExecutionStatus, FieldChange, ModificationId,
    Payload, Request, RequestId, RequestStatus, StepId, Subject, UserId, WorkflowId,
    WorkflowVersion,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

/// The request after an action, and where it went
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub request: Request,
    pub transition: Transition,
}

/// The request after a branch vote
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchVote {
    pub request: Request,
    /// Consensus on the branch step after the vote
    pub percentage: f64,
    /// Set once the branch itself finished
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sync: Option<SyncOutcome>,
}

/// How far a request has come through its workflow
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ApprovalProgress {
    pub total_steps: usize,
    pub completed_steps: usize,
    pub percentage: f64,
}

// ── Builder ──────────────────────────────────────────────────────────

/// Assembles an [`ApprovalEngine`] from its collaborators
pub struct ApprovalEngineBuilder {
    store: Arc<dyn ApprovalStore>,
    resolver: ApproverResolver,
    notifier: Arc<dyn Notifier>,
    config: EngineConfig,
}

impl ApprovalEngineBuilder {
    pub fn with_resolver(mut self, resolver: ApproverResolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> ApprovalEngine {
        ApprovalEngine {
            core: Arc::new(StepTransitions::new(
                self.store,
                self.resolver,
                self.notifier,
                self.config,
            )),
        }
    }
}

// ── Engine ───────────────────────────────────────────────────────────

/// The approval state machine
#[derive(Clone)]
pub struct ApprovalEngine {
    core: Arc<StepTransitions>,
}

impl ApprovalEngine {
    /// An engine with the default resolver, notifier and configuration
    pub fn new(store: Arc<dyn ApprovalStore>) -> Self {
        Self::builder(store).build()
    }

    pub fn builder(store: Arc<dyn ApprovalStore>) -> ApprovalEngineBuilder {
        ApprovalEngineBuilder {
            store,
            resolver: ApproverResolver::default(),
            notifier: Arc::new(TracingNotifier),
            config: EngineConfig::default(),
        }
    }

    pub fn store(&self) -> &Arc<dyn ApprovalStore> {
        &self.core.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.core.config
    }

    /// Fork/join entry points sharing this engine's store and locks
    pub fn parallel(&self) -> ParallelWorkflowManager {
        ParallelWorkflowManager::new(self.core.clone())
    }

    /// Runtime topology changes sharing this engine's store and locks
    pub fn dynamic(&self) -> DynamicWorkflowManager {
        DynamicWorkflowManager::new(self.core.clone())
    }

    /// SLA escalation sharing this engine's store and locks
    pub fn escalation(&self) -> EscalationService {
        EscalationService::new(self.core.clone())
    }

    // ── Submission ───────────────────────────────────────────────────

    /// Create a draft bound to the active workflow for the subject's type
    pub fn create_draft(
        &self,
        subject: Subject,
        requester: UserId,
        data_snapshot: Payload,
    ) -> ApprovalResult<Request> {
        let workflow = self
            .core
            .store
            .active_workflow_for_subject(&subject.subject_type)?
            .ok_or_else(|| ApprovalError::NoActiveWorkflow {
                subject_type: subject.subject_type.clone(),
            })?;
        let request = Request::draft(workflow.id, subject, requester, data_snapshot);
        self.core.commit(&request, Unit::new())?;
        tracing::info!(request_id = %request.id, subject = %request.subject, "Draft created");
        Ok(request)
    }

    /// Submit a subject for approval.
    ///
    /// The request starts at the first active step of the active workflow
    /// bound to the subject's type.
    pub fn submit(
        &self,
        subject: Subject,
        requester: UserId,
        data_snapshot: Payload,
    ) -> ApprovalResult<Request> {
        let workflow = self
            .core
            .store
            .active_workflow_for_subject(&subject.subject_type)?
            .ok_or_else(|| ApprovalError::NoActiveWorkflow {
                subject_type: subject.subject_type.clone(),
            })?;
        let mut request = Request::draft(workflow.id.clone(), subject, requester, data_snapshot);
        let mut unit = Unit::new();
        self.start(&mut request, &mut unit)?;
        self.core.commit(&request, unit)?;
        Ok(request)
    }

    /// Submit a draft
    pub fn submit_draft(&self, request_id: &RequestId) -> ApprovalResult<Request> {
        let core = &self.core;
        core.request_locks.with(request_id, || {
            let mut request = core.request(request_id)?;
            match request.status {
                RequestStatus::Draft => {}
                status if status.is_terminal() => {
                    return Err(ApprovalError::TerminalRequest {
                        request: request.id.clone(),
                        status,
                    })
                }
                status => {
                    return Err(ApprovalError::InvalidTransition(format!(
                        "request {} is {}, only drafts can be submitted",
                        request.id, status
                    )))
                }
            }
            let mut unit = Unit::new();
            self.start(&mut request, &mut unit)?;
            core.commit(&request, unit)?;
            Ok(request)
        })
    }

    /// Put a request on its workflow's first step and mark it submitted
    fn start(&self, request: &mut Request, unit: &mut Unit) -> ApprovalResult<()> {
        let core = &self.core;
        let now = Utc::now();
        let workflow = core.workflow(&request.workflow_id)?;
        if !workflow.active {
            return Err(ApprovalError::NoActiveWorkflow {
                subject_type: request.subject.subject_type.clone(),
            });
        }
        let skipped = core.skipped_steps(&request.id)?;
        let first = workflow
            .first_step_excluding(&skipped)
            .ok_or_else(|| ApprovalError::WorkflowHasNoSteps(workflow.id.clone()))?;

        core.enter_step(request, first, now, unit)?;
        request.status = RequestStatus::Submitted;
        request.submitted_at = Some(now);
        unit.record(
            Action::new(request.id.clone(), request.requester.clone(), ActionKind::Submitted)
                .at_step(first.id.clone())
                .at(now),
        );
        tracing::info!(
            request_id = %request.id,
            workflow = %workflow.id,
            step = %first.id,
            "Request submitted"
        );
        Ok(())
    }

    // ── Votes ────────────────────────────────────────────────────────

    /// Record `user`'s approval of the current step.
    ///
    /// Any-one steps advance on the first vote; serial and parallel steps
    /// advance once weighted consensus reaches the step's threshold. A
    /// repeated vote is logged but not counted again.
    pub fn approve(
        &self,
        request_id: &RequestId,
        user: &UserId,
        remarks: Option<String>,
    ) -> ApprovalResult<ActionOutcome> {
        let core = &self.core;
        core.request_locks.with(request_id, || {
            let now = Utc::now();
            let mut request = core.request(request_id)?;
            let step_id = core.actionable_step(&request)?;
            self.ensure_not_forked(&request)?;
            let workflow = core.workflow(&request.workflow_id)?;
            let step = workflow.require_step(&step_id)?;

            let mut unit = Unit::new();
            let mut ballot = core.current_ballot(&request, step, now)?;
            let counted = ballot.record_approval(user, core.config.default_weightage, now);
            let percentage = WeightageCalculator::current_percentage(&ballot.entries);
            let reached = WeightageCalculator::has_reached_minimum(step, &ballot.entries);
            tracing::debug!(
                request_id = %request.id,
                step = %step.id,
                user = %user,
                counted,
                percentage,
                required = step.minimum_approval_percentage,
                "Approval recorded"
            );
            unit.push(WriteOp::PutBallot(ballot));
            unit.record(
                Action::new(request.id.clone(), user.clone(), ActionKind::Approved)
                    .at_step(step.id.clone())
                    .with_remarks(remarks)
                    .at(now),
            );
            if request.status == RequestStatus::Submitted {
                request.status = RequestStatus::Pending;
            }
            request.updated_at = now;

            let advance = counted && (!step.approval_type.uses_consensus() || reached);
            let transition = if advance {
                core.advance(&mut request, &workflow, step, now, &mut unit)?
            } else {
                Transition::Waiting { percentage }
            };

            core.commit(&request, unit)?;
            Ok(ActionOutcome {
                request,
                transition,
            })
        })
    }

    /// Reject the request. Any approver's rejection ends it.
    pub fn reject(
        &self,
        request_id: &RequestId,
        user: &UserId,
        reason: impl Into<String>,
        remarks: Option<String>,
    ) -> ApprovalResult<Request> {
        let reason = reason.into();
        let core = &self.core;
        core.request_locks.with(request_id, || {
            let now = Utc::now();
            let mut request = core.request(request_id)?;
            let step_id = core.actionable_step(&request)?;
            self.ensure_not_forked(&request)?;

            let mut unit = Unit::new();
            unit.record(
                Action::new(
                    request.id.clone(),
                    user.clone(),
                    ActionKind::Rejected {
                        reason: reason.clone(),
                    },
                )
                .at_step(step_id.clone())
                .with_remarks(remarks)
                .at(now),
            );
            request.reject(reason.clone(), now);
            unit.notify_creator(NotificationKind::Rejected, Some(reason));
            core.commit(&request, unit)?;
            tracing::info!(request_id = %request.id, step = %step_id, user = %user, "Request rejected");
            Ok(request)
        })
    }

    /// Return the request to the previous step by sequence.
    ///
    /// An in-progress fork is cancelled.
    pub fn send_back(
        &self,
        request_id: &RequestId,
        user: &UserId,
        remarks: Option<String>,
    ) -> ApprovalResult<Request> {
        let core = &self.core;
        core.request_locks.with(request_id, || {
            let now = Utc::now();
            let mut request = core.request(request_id)?;
            let step_id = core.actionable_step(&request)?;
            let workflow = core.workflow(&request.workflow_id)?;
            let step = workflow.require_step(&step_id)?;
            if !step.allow_send_back {
                return Err(ApprovalError::SendBackNotAllowed(step_id));
            }
            let skipped = core.skipped_steps(&request.id)?;
            let previous = workflow
                .previous_step_excluding(&step_id, &skipped)
                .ok_or_else(|| ApprovalError::NoPreviousStep {
                    request: request.id.clone(),
                    step: step_id.clone(),
                })?;

            let mut unit = Unit::new();
            core.plan_cancel_forks(&request.id, None, now, &mut unit)?;
            unit.record(
                Action::new(
                    request.id.clone(),
                    user.clone(),
                    ActionKind::SentBack {
                        to_step: previous.id.clone(),
                    },
                )
                .at_step(step_id.clone())
                .with_remarks(remarks)
                .at(now),
            );
            core.enter_step(&mut request, previous, now, &mut unit)?;
            request.status = RequestStatus::Pending;
            unit.notify_creator(NotificationKind::SentBack, None);
            core.commit(&request, unit)?;
            tracing::info!(
                request_id = %request.id,
                from = %step_id,
                to = %previous.id,
                "Request sent back"
            );
            Ok(request)
        })
    }

    /// Put the request on hold without moving it
    pub fn hold(
        &self,
        request_id: &RequestId,
        user: &UserId,
        remarks: Option<String>,
    ) -> ApprovalResult<Request> {
        let core = &self.core;
        core.request_locks.with(request_id, || {
            let now = Utc::now();
            let mut request = core.request(request_id)?;
            let step_id = core.actionable_step(&request)?;

            let mut unit = Unit::new();
            unit.record(
                Action::new(request.id.clone(), user.clone(), ActionKind::Held)
                    .at_step(step_id)
                    .with_remarks(remarks)
                    .at(now),
            );
            request.status = RequestStatus::Pending;
            request.updated_at = now;
            unit.notify_creator(NotificationKind::Held, None);
            core.commit(&request, unit)?;
            tracing::info!(request_id = %request.id, user = %user, "Request held");
            Ok(request)
        })
    }

    /// Replace the snapshot of a draft or rejected request and start it
    /// over from the first step.
    ///
    /// One field change is recorded per changed top-level key, ignoring
    /// configured system fields.
    pub fn edit_and_resubmit(
        &self,
        request_id: &RequestId,
        data_snapshot: Payload,
        user: &UserId,
        remarks: Option<String>,
    ) -> ApprovalResult<Request> {
        let core = &self.core;
        core.request_locks.with(request_id, || {
            let now = Utc::now();
            let mut request = core.request(request_id)?;
            match request.status {
                RequestStatus::Draft | RequestStatus::Rejected => {}
                status if status.is_terminal() => {
                    return Err(ApprovalError::TerminalRequest {
                        request: request.id.clone(),
                        status,
                    })
                }
                status => {
                    return Err(ApprovalError::InvalidTransition(format!(
                        "request {} is {}, only drafts and rejected requests can be resubmitted",
                        request.id, status
                    )))
                }
            }

            let mut unit = Unit::new();
            let changes = self.diff_snapshot(&request, &data_snapshot, user, now);
            let changed = changes.len();
            for change in changes {
                unit.push(WriteOp::AppendFieldChange(change));
            }
            unit.push(WriteOp::DeleteBallots(request.id.clone()));
            core.plan_cancel_forks(&request.id, None, now, &mut unit)?;

            request.data_snapshot = data_snapshot;
            request.rejection_reason = None;
            request.completed_at = None;
            let workflow = core.workflow(&request.workflow_id)?;
            let skipped = core.skipped_steps(&request.id)?;
            let first = workflow
                .first_step_excluding(&skipped)
                .ok_or_else(|| ApprovalError::WorkflowHasNoSteps(workflow.id.clone()))?;
            core.enter_step(&mut request, first, now, &mut unit)?;
            request.status = RequestStatus::Submitted;
            request.submitted_at = Some(now);
            unit.record(
                Action::new(
                    request.id.clone(),
                    user.clone(),
                    ActionKind::Resubmitted {
                        changed_fields: changed,
                    },
                )
                .at_step(first.id.clone())
                .with_remarks(remarks)
                .at(now),
            );
            core.commit(&request, unit)?;
            tracing::info!(request_id = %request.id, changed, "Request resubmitted");
            Ok(request)
        })
    }

    fn diff_snapshot(
        &self,
        request: &Request,
        next: &Payload,
        user: &UserId,
        now: chrono::DateTime<Utc>,
    ) -> Vec<FieldChange> {
        let old = &request.data_snapshot;
        let keys: BTreeSet<&String> = old.keys().chain(next.keys()).collect();
        keys.into_iter()
            .filter(|key| !self.core.config.is_system_field(key))
            .filter(|key| old.get(*key) != next.get(*key))
            .map(|key| FieldChange {
                id: ModificationId::generate(),
                request_id: request.id.clone(),
                field: key.clone(),
                old_value: old.get(key).cloned(),
                new_value: next.get(key).cloned(),
                changed_by: user.clone(),
                changed_at: now,
            })
            .collect()
    }

    /// Withdraw the request. Any in-progress fork is cancelled with it.
    pub fn cancel(
        &self,
        request_id: &RequestId,
        user: &UserId,
        reason: impl Into<String>,
    ) -> ApprovalResult<Request> {
        let reason = reason.into();
        let core = &self.core;
        core.request_locks.with(request_id, || {
            let now = Utc::now();
            let mut request = core.request(request_id)?;
            if request.is_terminal() {
                return Err(ApprovalError::TerminalRequest {
                    request: request.id.clone(),
                    status: request.status,
                });
            }

            let mut unit = Unit::new();
            core.plan_cancel_forks(&request.id, None, now, &mut unit)?;
            let mut action = Action::new(
                request.id.clone(),
                user.clone(),
                ActionKind::Cancelled {
                    reason: reason.clone(),
                },
            )
            .at(now);
            action.step_id = request.current_step.clone();
            unit.record(action);
            request.cancel(now);
            unit.notify_creator(NotificationKind::Cancelled, Some(reason));
            core.commit(&request, unit)?;
            tracing::info!(request_id = %request.id, user = %user, "Request cancelled");
            Ok(request)
        })
    }

    /// Archive a finished request
    pub fn archive(&self, request_id: &RequestId, user: &UserId) -> ApprovalResult<Request> {
        let core = &self.core;
        core.request_locks.with(request_id, || {
            let now = Utc::now();
            let mut request = core.request(request_id)?;
            if !matches!(
                request.status,
                RequestStatus::Approved | RequestStatus::Rejected | RequestStatus::Cancelled
            ) {
                return Err(ApprovalError::InvalidTransition(format!(
                    "request {} is {}, only finished requests can be archived",
                    request.id, request.status
                )));
            }
            let mut unit = Unit::new();
            unit.record(Action::new(request.id.clone(), user.clone(), ActionKind::Archived).at(now));
            request.status = RequestStatus::Archived;
            request.updated_at = now;
            core.commit(&request, unit)?;
            tracing::info!(request_id = %request.id, "Request archived");
            Ok(request)
        })
    }

    // ── Parallel branches ────────────────────────────────────────────

    /// Record `user`'s approval of an open branch step.
    ///
    /// The branch finishes when its own voting mode is satisfied, which
    /// may join the group and move the request on.
    pub fn approve_branch(
        &self,
        request_id: &RequestId,
        step_id: &StepId,
        user: &UserId,
        remarks: Option<String>,
    ) -> ApprovalResult<BranchVote> {
        let core = &self.core;
        core.request_locks.with(request_id, || {
            let now = Utc::now();
            let mut request = core.request(request_id)?;
            core.actionable_step(&request)?;
            let workflow = core.workflow(&request.workflow_id)?;
            let step = workflow.require_step(step_id)?;
            let state = self.open_branch(&request, step_id)?;

            let mut unit = Unit::new();
            let mut ballot = core.current_ballot(&request, step, now)?;
            let counted = ballot.record_approval(user, core.config.default_weightage, now);
            let percentage = WeightageCalculator::current_percentage(&ballot.entries);
            let finished = counted
                && (!step.approval_type.uses_consensus()
                    || WeightageCalculator::has_reached_minimum(step, &ballot.entries));
            unit.push(WriteOp::PutBallot(ballot));
            unit.record(
                Action::new(request.id.clone(), user.clone(), ActionKind::Approved)
                    .at_step(step_id.clone())
                    .with_remarks(remarks)
                    .at(now),
            );
            request.updated_at = now;

            let sync = if finished {
                Some(finish_branch(
                    core,
                    &mut request,
                    &workflow,
                    step_id,
                    BranchOutcome::Approved,
                    now,
                    &mut unit,
                )?)
            } else {
                self.mark_branch_in_progress(&request, state, step_id, now, &mut unit)?;
                None
            };

            core.commit(&request, unit)?;
            tracing::debug!(
                request_id = %request.id,
                step = %step_id,
                percentage,
                finished,
                "Branch vote recorded"
            );
            Ok(BranchVote {
                request,
                percentage,
                sync,
            })
        })
    }

    /// Reject an open branch step, which rejects the request and fails
    /// every in-progress fork.
    pub fn reject_branch(
        &self,
        request_id: &RequestId,
        step_id: &StepId,
        user: &UserId,
        reason: impl Into<String>,
        remarks: Option<String>,
    ) -> ApprovalResult<Request> {
        let reason = reason.into();
        let core = &self.core;
        core.request_locks.with(request_id, || {
            let now = Utc::now();
            let mut request = core.request(request_id)?;
            core.actionable_step(&request)?;
            let mut state = self.open_branch(&request, step_id)?;

            let mut unit = Unit::new();
            unit.record(
                Action::new(
                    request.id.clone(),
                    user.clone(),
                    ActionKind::Rejected {
                        reason: reason.clone(),
                    },
                )
                .at_step(step_id.clone())
                .with_remarks(remarks)
                .at(now),
            );
            state.step_statuses.insert(step_id.clone(), BranchStatus::Rejected);
            state.status = ExecutionStatus::Failed;
            state.finished_at = Some(now);
            core.plan_cancel_forks(&request.id, Some(&state.id), now, &mut unit)?;
            unit.push(WriteOp::PutExecutionState(state));

            request.reject(reason.clone(), now);
            unit.notify_creator(NotificationKind::Rejected, Some(reason));
            core.commit(&request, unit)?;
            tracing::info!(request_id = %request.id, step = %step_id, "Request rejected on a parallel branch");
            Ok(request)
        })
    }

    fn ensure_not_forked(&self, request: &Request) -> ApprovalResult<()> {
        if self.core.open_forks(&request.id)?.is_empty() {
            Ok(())
        } else {
            Err(ApprovalError::ParallelExecutionInProgress(request.id.clone()))
        }
    }

    /// The in-progress execution state in which `step` is an open branch
    fn open_branch(&self, request: &Request, step: &StepId) -> ApprovalResult<ExecutionState> {
        self.core
            .open_forks(&request.id)?
            .into_iter()
            .find(|s| s.step_statuses.get(step).is_some_and(|b| b.is_open()))
            .ok_or_else(|| ApprovalError::BranchNotActive {
                request: request.id.clone(),
                step: step.clone(),
            })
    }

    fn mark_branch_in_progress(
        &self,
        request: &Request,
        mut state: ExecutionState,
        step: &StepId,
        now: chrono::DateTime<Utc>,
        unit: &mut Unit,
    ) -> ApprovalResult<()> {
        if state.step_statuses.get(step) != Some(&BranchStatus::Pending) {
            return Ok(());
        }
        state
            .step_statuses
            .insert(step.clone(), BranchStatus::InProgress);
        state.status = ExecutionStatus::InProgress;
        unit.push(WriteOp::PutExecutionState(state.clone()));

        let tracker = self
            .core
            .store
            .active_parallel_steps(&request.id)?
            .into_iter()
            .find(|t| &t.step_id == step)
            .unwrap_or_else(|| {
                ActiveParallelStep::new(request.id.clone(), state.group_id.clone(), step.clone(), now)
            });
        unit.push(WriteOp::PutActiveParallelStep(ActiveParallelStep {
            status: BranchStatus::InProgress,
            ..tracker
        }));
        Ok(())
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn request(&self, request_id: &RequestId) -> ApprovalResult<Request> {
        self.core.request(request_id)
    }

    /// The action log, oldest first
    pub fn history(&self, request_id: &RequestId) -> ApprovalResult<Vec<Action>> {
        Ok(self.core.store.actions(request_id)?)
    }

    pub fn ballot(&self, request_id: &RequestId, step: &StepId) -> ApprovalResult<Option<Ballot>> {
        Ok(self.core.store.ballot(request_id, step)?)
    }

    pub fn execution_states(&self, request_id: &RequestId) -> ApprovalResult<Vec<ExecutionState>> {
        Ok(self.core.store.execution_states(request_id)?)
    }

    pub fn escalations(&self, request_id: &RequestId) -> ApprovalResult<Vec<Escalation>> {
        Ok(self.core.store.escalations(request_id)?)
    }

    pub fn field_changes(&self, request_id: &RequestId) -> ApprovalResult<Vec<FieldChange>> {
        Ok(self.core.store.field_changes(request_id)?)
    }

    pub fn versions(&self, workflow_id: &WorkflowId) -> ApprovalResult<Vec<WorkflowVersion>> {
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

    /// Consensus on the request's current step
    pub fn consensus_breakdown(&self, request_id: &RequestId) -> ApprovalResult<ConsensusBreakdown> {
        let core = &self.core;
        let request = core.request(request_id)?;
        let step_id = request
            .current_step
            .clone()
            .ok_or_else(|| ApprovalError::NoCurrentStep(request.id.clone()))?;
        let workflow = core.workflow(&request.workflow_id)?;
        let step = workflow.require_step(&step_id)?;
        let ballot = core.current_ballot(&request, step, Utc::now())?;
        Ok(WeightageCalculator::breakdown(step, &ballot.entries))
    }

    /// Active steps against distinct steps with at least one approval
    pub fn calculate_approval_progress(
        &self,
        request_id: &RequestId,
    ) -> ApprovalResult<ApprovalProgress> {
        let core = &self.core;
        let request = core.request(request_id)?;
        let workflow = core.workflow(&request.workflow_id)?;
        let total_steps = workflow.active_step_count();
        let approved: HashSet<StepId> = core
            .store
            .actions(request_id)?
            .into_iter()
            .filter(|a| a.is_approval())
            .filter_map(|a| a.step_id)
            .collect();
        let completed_steps = approved.len();
        let percentage = if total_steps == 0 {
            0.0
        } else {
            round2(completed_steps as f64 / total_steps as f64 * 100.0)
        };
        Ok(ApprovalProgress {
            total_steps,
            completed_steps,
            percentage,
        })
    }
}
