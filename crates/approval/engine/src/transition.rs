//! Step transitions shared by the engine, the parallel manager, the
//! dynamic manager and the escalation service.
//!
//! Nothing here takes a lock or commits on its own. Callers hold the
//! request lock, collect writes into a [`Unit`], and hand it to
//! [`StepTransitions::commit`] once the whole operation is decided.

use crate::condition_evaluator::ConditionEvaluator;
use crate::config::EngineConfig;
use crate::locks::KeyedLocks;
use crate::notifier::{Dispatch, NotificationKind, Notifier};
use crate::resolver::{ApproverResolver, ResolutionContext};
use crate::store::{ApprovalStore, WriteBatch, WriteOp};
use approval_types::{
    Action, ActiveParallelStep, ApprovalError, ApprovalResult, AssignmentKind, Ballot,
    BallotEntry, DynamicApproverAssignment, ExecutionState, ExecutionStateId, ExecutionStatus,
    ParallelGroupId, Request, RequestId, RequestStatus, Step, StepId, StepModificationKind,
    UserId, Workflow, WorkflowId,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

/// Statuses of a request that is waiting on approvers
pub(crate) const IN_FLIGHT: [RequestStatus; 2] = [RequestStatus::Submitted, RequestStatus::Pending];

/// Where an operation left the request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Transition {
    /// The current step is still collecting votes
    Waiting { percentage: f64 },
    /// The request moved to another step
    MovedTo { step: StepId },
    /// Parallel branches were opened; the request stays on the fork step
    Forked { groups: Vec<ParallelGroupId> },
    /// The request was approved
    Completed,
}

/// A notification to send once the unit is committed
#[derive(Debug, Clone)]
pub(crate) enum Notice {
    Approvers {
        recipients: Vec<UserId>,
        kind: NotificationKind,
        message: Option<String>,
    },
    Creator {
        kind: NotificationKind,
        message: Option<String>,
    },
}

/// Writes and notifications of one operation
#[derive(Debug, Default)]
pub(crate) struct Unit {
    pub(crate) batch: WriteBatch,
    pub(crate) notices: Vec<Notice>,
}

impl Unit {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, op: WriteOp) {
        self.batch.push(op);
    }

    pub(crate) fn record(&mut self, action: Action) {
        tracing::trace!(
            request_id = %action.request_id,
            action = %action.kind,
            actor = %action.actor,
            "Appending action"
        );
        self.batch.append_action(action);
    }

    pub(crate) fn notify_approvers(
        &mut self,
        recipients: Vec<UserId>,
        kind: NotificationKind,
        message: Option<String>,
    ) {
        self.notices.push(Notice::Approvers {
            recipients,
            kind,
            message,
        });
    }

    pub(crate) fn notify_creator(&mut self, kind: NotificationKind, message: Option<String>) {
        self.notices.push(Notice::Creator { kind, message });
    }
}

/// The collaborators and primitives every component shares
pub(crate) struct StepTransitions {
    pub(crate) store: Arc<dyn ApprovalStore>,
    pub(crate) resolver: ApproverResolver,
    pub(crate) config: EngineConfig,
    dispatch: Dispatch,
    pub(crate) request_locks: KeyedLocks<RequestId>,
    pub(crate) workflow_locks: KeyedLocks<WorkflowId>,
}

impl StepTransitions {
    pub(crate) fn new(
        store: Arc<dyn ApprovalStore>,
        resolver: ApproverResolver,
        notifier: Arc<dyn Notifier>,
        config: EngineConfig,
    ) -> Self {
        let dispatch = Dispatch::new(notifier, config.notifications.clone());
        Self {
            store,
            resolver,
            config,
            dispatch,
            request_locks: KeyedLocks::new(),
            workflow_locks: KeyedLocks::new(),
        }
    }

    pub(crate) fn system_actor(&self) -> UserId {
        UserId::new(self.config.system_actor.clone())
    }

    // ── Loading ──

    pub(crate) fn request(&self, id: &RequestId) -> ApprovalResult<Request> {
        self.store
            .request(id)?
            .ok_or_else(|| ApprovalError::RequestNotFound(id.clone()))
    }

    pub(crate) fn workflow(&self, id: &WorkflowId) -> ApprovalResult<Workflow> {
        self.store
            .workflow(id)?
            .ok_or_else(|| ApprovalError::WorkflowNotFound(id.clone()))
    }

    /// Current step of a request that still accepts actions
    pub(crate) fn actionable_step(&self, request: &Request) -> ApprovalResult<StepId> {
        if request.is_terminal() {
            return Err(ApprovalError::TerminalRequest {
                request: request.id.clone(),
                status: request.status,
            });
        }
        request
            .current_step
            .clone()
            .ok_or_else(|| ApprovalError::NoCurrentStep(request.id.clone()))
    }

    /// Steps skipped for this request
    pub(crate) fn skipped_steps(&self, request: &RequestId) -> ApprovalResult<HashSet<StepId>> {
        Ok(self
            .store
            .step_modifications(request)?
            .into_iter()
            .filter(|m| m.kind == StepModificationKind::Skipped)
            .map(|m| m.step_id)
            .collect())
    }

    /// Execution states of this request that have not finished
    pub(crate) fn open_forks(&self, request: &RequestId) -> ApprovalResult<Vec<ExecutionState>> {
        Ok(self
            .store
            .execution_states(request)?
            .into_iter()
            .filter(|s| s.is_in_progress())
            .collect())
    }

    // ── Ballots ──

    /// A fresh ballot: resolved approvers plus this request's dynamic
    /// assignments for the step
    pub(crate) fn open_ballot(
        &self,
        request: &Request,
        step: &Step,
        now: DateTime<Utc>,
    ) -> ApprovalResult<Ballot> {
        let mut ballot = Ballot::new(request.id.clone(), step.id.clone());
        ballot.opened_at = now;
        for entry in self
            .resolver
            .resolve_step(step, &ResolutionContext::new(request))
        {
            ballot.add_entry(entry);
        }

        for assignment in self.store.approver_assignments(&request.id, &step.id)? {
            if assignment.is_effective(now) {
                self.apply_assignment(&mut ballot, &assignment);
            }
        }
        Ok(ballot)
    }

    /// Put a dynamic approver on a ballot.
    ///
    /// A replacement takes over the replaced approver's entry, or joins
    /// the ballot when that approver is not on it.
    pub(crate) fn apply_assignment(
        &self,
        ballot: &mut Ballot,
        assignment: &DynamicApproverAssignment,
    ) {
        let weight = assignment
            .weightage
            .unwrap_or(self.config.default_weightage);
        match &assignment.kind {
            AssignmentKind::Replacement { replaces } => {
                let replaced = ballot.replace_approver(
                    replaces,
                    assignment.approver.clone(),
                    assignment.weightage,
                );
                if !replaced {
                    ballot.add_entry(BallotEntry::new(assignment.approver.clone(), weight));
                }
            }
            AssignmentKind::Addition | AssignmentKind::Temporary { .. } => {
                ballot.add_entry(BallotEntry::new(assignment.approver.clone(), weight));
            }
        }
    }

    /// The stored ballot for the step, or a freshly opened one
    pub(crate) fn current_ballot(
        &self,
        request: &Request,
        step: &Step,
        now: DateTime<Utc>,
    ) -> ApprovalResult<Ballot> {
        match self.store.ballot(&request.id, &step.id)? {
            Some(ballot) => Ok(ballot),
            None => self.open_ballot(request, step, now),
        }
    }

    // ── Transitions ──

    /// Make `step` the request's current step and open its ballot.
    ///
    /// Status is left to the caller.
    pub(crate) fn enter_step(
        &self,
        request: &mut Request,
        step: &Step,
        now: DateTime<Utc>,
        unit: &mut Unit,
    ) -> ApprovalResult<Vec<UserId>> {
        self.enter_step_notifying(request, step, now, unit, NotificationKind::ApprovalRequired, None)
    }

    /// [`StepTransitions::enter_step`] with a chosen notice for the new
    /// approvers
    pub(crate) fn enter_step_notifying(
        &self,
        request: &mut Request,
        step: &Step,
        now: DateTime<Utc>,
        unit: &mut Unit,
        kind: NotificationKind,
        message: Option<String>,
    ) -> ApprovalResult<Vec<UserId>> {
        request.current_step = Some(step.id.clone());
        request.step_entered_at = Some(now);
        request.sla_deadline = step.sla_hours.map(|h| now + Duration::hours(i64::from(h)));
        request.last_reminder_sent = None;
        request.updated_at = now;

        let ballot = self.open_ballot(request, step, now)?;
        let approvers = ballot.approvers();
        if approvers.is_empty() {
            tracing::warn!(request_id = %request.id, step = %step.id, "Step has no resolvable approvers");
        }
        unit.push(WriteOp::PutBallot(ballot));
        unit.notify_approvers(approvers.clone(), kind, message);
        Ok(approvers)
    }

    /// Mark the request approved
    pub(crate) fn complete(&self, request: &mut Request, now: DateTime<Utc>, unit: &mut Unit) {
        request.complete(now);
        tracing::info!(request_id = %request.id, "Request approved");
        unit.notify_creator(NotificationKind::Approved, None);
    }

    /// Move the request on from `from`, whose voting has finished.
    ///
    /// Order: fork groups at `from`, then routing conditions, then the next
    /// step by sequence, then completion. Skipped steps are passed over.
    pub(crate) fn advance(
        &self,
        request: &mut Request,
        workflow: &Workflow,
        from: &Step,
        now: DateTime<Utc>,
        unit: &mut Unit,
    ) -> ApprovalResult<Transition> {
        let forked = self.plan_fork(request, workflow, &from.id, now, unit)?;
        if !forked.is_empty() {
            request.status = RequestStatus::Pending;
            request.updated_at = now;
            let groups: Vec<ParallelGroupId> = forked.into_iter().map(|s| s.group_id).collect();
            return Ok(Transition::Forked { groups });
        }

        let skipped = self.skipped_steps(&request.id)?;
        let conditions = self.store.conditions(&workflow.id)?;
        let routed = ConditionEvaluator::find_next_step(&conditions, &from.id, &request.data_snapshot);

        let next = match routed {
            Some(target) => {
                let step = workflow.require_step(&target)?;
                if step.active && !skipped.contains(&step.id) {
                    Some(step)
                } else {
                    workflow.next_step_excluding(&target, &skipped)
                }
            }
            None => workflow.next_step_excluding(&from.id, &skipped),
        };

        match next {
            Some(step) => {
                self.enter_step(request, step, now, unit)?;
                request.status = RequestStatus::Pending;
                tracing::info!(
                    request_id = %request.id,
                    from = %from.id,
                    to = %step.id,
                    "Request advanced"
                );
                Ok(Transition::MovedTo {
                    step: step.id.clone(),
                })
            }
            None => {
                self.complete(request, now, unit);
                Ok(Transition::Completed)
            }
        }
    }

    /// Open every active parallel group forking at `fork_step`.
    ///
    /// Returns the new execution states; empty when nothing forks here.
    pub(crate) fn plan_fork(
        &self,
        request: &Request,
        workflow: &Workflow,
        fork_step: &StepId,
        now: DateTime<Utc>,
        unit: &mut Unit,
    ) -> ApprovalResult<Vec<ExecutionState>> {
        let groups: Vec<_> = self
            .store
            .parallel_groups(&workflow.id)?
            .into_iter()
            .filter(|g| g.active && &g.fork_from_step == fork_step)
            .collect();
        if groups.is_empty() {
            return Ok(Vec::new());
        }

        let open = self.open_forks(&request.id)?;
        let mut started = Vec::new();
        for mut group in groups {
            if open.iter().any(|s| s.group_id == group.id) {
                return Err(ApprovalError::ParallelExecutionInProgress(request.id.clone()));
            }

            let mut members = Vec::new();
            for member in &group.member_steps {
                let step = workflow.require_step(member)?;
                if step.active {
                    members.push(step);
                }
            }
            if members.is_empty() {
                tracing::warn!(
                    request_id = %request.id,
                    group = %group.id,
                    "Parallel group has no active members, not forking"
                );
                continue;
            }
            group.member_steps = members.iter().map(|s| s.id.clone()).collect();

            let state = ExecutionState::start(request.id.clone(), &group, now);
            unit.push(WriteOp::InsertExecutionState(state.clone()));
            for step in members {
                unit.push(WriteOp::PutActiveParallelStep(ActiveParallelStep::new(
                    request.id.clone(),
                    group.id.clone(),
                    step.id.clone(),
                    now,
                )));
                let ballot = self.open_ballot(request, step, now)?;
                unit.notify_approvers(ballot.approvers(), NotificationKind::ApprovalRequired, None);
                unit.push(WriteOp::PutBallot(ballot));
            }

            tracing::info!(
                request_id = %request.id,
                group = %group.id,
                sync = %group.sync,
                branches = state.total_steps,
                "Forked parallel group"
            );
            started.push(state);
        }
        Ok(started)
    }

    /// Fail every in-progress fork of the request except `keep`, and drop
    /// all branch trackers. Returns how many forks were failed.
    pub(crate) fn plan_cancel_forks(
        &self,
        request: &RequestId,
        keep: Option<&ExecutionStateId>,
        now: DateTime<Utc>,
        unit: &mut Unit,
    ) -> ApprovalResult<usize> {
        let open = self.open_forks(request)?;
        if open.is_empty() {
            return Ok(0);
        }
        let mut failed = 0;
        for mut state in open {
            if Some(&state.id) == keep {
                continue;
            }
            state.status = ExecutionStatus::Failed;
            state.finished_at = Some(now);
            tracing::info!(request_id = %request, group = %state.group_id, "Cancelled parallel execution");
            unit.push(WriteOp::PutExecutionState(state));
            failed += 1;
        }
        unit.push(WriteOp::DeleteActiveParallelSteps(request.clone()));
        Ok(failed)
    }

    // ── Commit ──

    /// Persist `request` with the unit's writes, then send its notices.
    pub(crate) fn commit(&self, request: &Request, mut unit: Unit) -> ApprovalResult<()> {
        unit.batch.put_request(request.clone());
        let ops = unit.batch.len();
        self.store.commit(unit.batch)?;
        tracing::debug!(request_id = %request.id, ops, "Committed");

        for notice in unit.notices {
            match notice {
                Notice::Approvers {
                    recipients,
                    kind,
                    message,
                } => self
                    .dispatch
                    .approvers(request, &recipients, kind, message.as_deref()),
                Notice::Creator { kind, message } => {
                    self.dispatch.creator(request, kind, message.as_deref())
                }
            }
        }
        Ok(())
    }

    /// Persist a unit that does not touch a request
    pub(crate) fn commit_batch(&self, unit: Unit) -> ApprovalResult<()> {
        self.store.commit(unit.batch)?;
        Ok(())
    }
}
