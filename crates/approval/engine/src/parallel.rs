//! Parallel Workflow Manager - fork/join across steps
//!
//! A fork opens one branch per member step of every active group whose
//! fork step the request just finished. Each branch collects its own
//! votes; as branches finish, the group's sync policy decides when the
//! request joins back into a single path.
//!
//! The request's current step stays on the fork step until the join.

use crate::notifier::NotificationKind;
use crate::store::WriteOp;
use crate::transition::{StepTransitions, Transition, Unit};
use approval_types::{
    Action, ActionKind, ActiveParallelStep, ApprovalError, ApprovalResult, BranchOutcome, BranchStatus,
    ExecutionState, ExecutionStatus, ParallelStepGroup, Request, RequestId, RequestStatus,
    StepId, StoreError, Workflow,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

/// What finishing a branch did to its group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncOutcome {
    /// The sync policy is not satisfied yet
    Waiting { completed: u32, required: u32 },
    /// The group joined. `None` means nothing follows and the request
    /// was approved.
    Joined { join_step: Option<StepId> },
    /// The group had already joined; nothing changed
    AlreadyCompleted,
    /// The group can no longer satisfy its sync policy; the request was
    /// rejected
    Failed,
}

/// How a branch outcome moved its execution state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BranchProgress {
    Waiting { completed: u32, required: u32 },
    Satisfied,
    Unreachable,
    AlreadyCompleted,
    AlreadyFailed,
}

/// Record `outcome` for `step` on `state` and evaluate the sync policy.
///
/// A branch that already finished is not counted twice.
pub(crate) fn apply_branch_outcome(
    state: &mut ExecutionState,
    group: &ParallelStepGroup,
    step: &StepId,
    outcome: BranchOutcome,
    now: DateTime<Utc>,
) -> BranchProgress {
    match state.status {
        ExecutionStatus::Completed => return BranchProgress::AlreadyCompleted,
        ExecutionStatus::Failed => return BranchProgress::AlreadyFailed,
        ExecutionStatus::Pending | ExecutionStatus::InProgress => {}
    }

    let required = group.sync.required(state.total_steps);
    if let Some(status) = state.step_statuses.get_mut(step) {
        if status.is_open() {
            match outcome {
                BranchOutcome::Approved => {
                    *status = BranchStatus::Approved;
                    state.completed_steps = (state.completed_steps + 1).min(state.total_steps);
                }
                BranchOutcome::Rejected => *status = BranchStatus::Rejected,
            }
        }
    }
    state.status = ExecutionStatus::InProgress;

    if group.sync.is_satisfied(state.completed_steps, state.total_steps) {
        state.status = ExecutionStatus::Completed;
        state.finished_at = Some(now);
        BranchProgress::Satisfied
    } else if state.completed_steps + state.open_branches() < required {
        state.status = ExecutionStatus::Failed;
        state.finished_at = Some(now);
        BranchProgress::Unreachable
    } else {
        BranchProgress::Waiting {
            completed: state.completed_steps,
            required,
        }
    }
}

/// Where a joined group continues: its explicit join step, else the first
/// step past its highest member sequence. Inactive and skipped steps are
/// passed over.
pub(crate) fn join_target(
    group: &ParallelStepGroup,
    workflow: &Workflow,
    skipped: &HashSet<StepId>,
) -> Option<StepId> {
    if let Some(join) = &group.join_to_step {
        return match workflow.step(join) {
            Some(step) if step.active && !skipped.contains(&step.id) => Some(step.id.clone()),
            Some(_) => workflow
                .next_step_excluding(join, skipped)
                .map(|s| s.id.clone()),
            None => None,
        };
    }
    let last_member = group
        .member_steps
        .iter()
        .filter_map(|id| workflow.step(id))
        .map(|s| s.sequence)
        .max()?;
    workflow
        .next_step_after_sequence(last_member, skipped)
        .map(|s| s.id.clone())
}

/// Finish one branch and, when its group joins and no other fork is open,
/// move the request to the join target.
pub(crate) fn finish_branch(
    core: &StepTransitions,
    request: &mut Request,
    workflow: &Workflow,
    step: &StepId,
    outcome: BranchOutcome,
    now: DateTime<Utc>,
    unit: &mut Unit,
) -> ApprovalResult<SyncOutcome> {
    let states = core.store.execution_states(&request.id)?;
    let Some(mut state) = states.iter().rev().find(|s| s.includes(step)).cloned() else {
        return Err(ApprovalError::BranchNotActive {
            request: request.id.clone(),
            step: step.clone(),
        });
    };
    let group = core
        .store
        .parallel_groups(&workflow.id)?
        .into_iter()
        .find(|g| g.id == state.group_id)
        .ok_or_else(|| StoreError::NotFound(format!("parallel group {}", state.group_id)))?;

    let progress = apply_branch_outcome(&mut state, &group, step, outcome, now);
    let result = match progress {
        BranchProgress::AlreadyCompleted => return Ok(SyncOutcome::AlreadyCompleted),
        BranchProgress::AlreadyFailed => return Ok(SyncOutcome::Failed),
        BranchProgress::Waiting {
            completed,
            required,
        } => SyncOutcome::Waiting {
            completed,
            required,
        },
        BranchProgress::Unreachable => SyncOutcome::Failed,
        BranchProgress::Satisfied => {
            let skipped = core.skipped_steps(&request.id)?;
            SyncOutcome::Joined {
                join_step: join_target(&group, workflow, &skipped),
            }
        }
    };

    let tracker = core
        .store
        .active_parallel_steps(&request.id)?
        .into_iter()
        .find(|t| &t.step_id == step);
    if let (Some(mut tracker), Some(status)) = (tracker, state.step_statuses.get(step)) {
        if tracker.status != *status {
            tracker.status = *status;
            tracker.finished_at = Some(now);
            unit.push(WriteOp::PutActiveParallelStep(tracker));
        }
    }

    if !state.is_in_progress() {
        // open branches of a finished group are no longer votable
        for (branch, status) in &state.step_statuses {
            if status.is_open() {
                unit.push(WriteOp::DeleteActiveParallelStep(
                    request.id.clone(),
                    branch.clone(),
                ));
            }
        }
    }

    if let SyncOutcome::Joined { join_step } = &result {
        let others_open = core
            .open_forks(&request.id)?
            .iter()
            .any(|s| s.id != state.id);
        tracing::info!(
            request_id = %request.id,
            group = %group.id,
            completed = state.completed_steps,
            total = state.total_steps,
            "Parallel group joined"
        );
        if !others_open {
            join(core, request, workflow, join_step.as_ref(), now, unit)?;
        }
    }

    if progress == BranchProgress::Unreachable {
        reject_unreachable(core, request, &group, &state, step, now, unit)?;
    }

    unit.push(WriteOp::PutExecutionState(state));
    Ok(result)
}

/// Reject a request whose group can no longer join, failing its other forks
fn reject_unreachable(
    core: &StepTransitions,
    request: &mut Request,
    group: &ParallelStepGroup,
    state: &ExecutionState,
    step: &StepId,
    now: DateTime<Utc>,
    unit: &mut Unit,
) -> ApprovalResult<()> {
    let reason = format!(
        "parallel group {} can no longer satisfy its sync policy",
        group.name
    );
    unit.record(
        Action::new(
            request.id.clone(),
            core.system_actor(),
            ActionKind::Rejected {
                reason: reason.clone(),
            },
        )
        .at_step(step.clone())
        .at(now),
    );
    core.plan_cancel_forks(&request.id, Some(&state.id), now, unit)?;
    request.reject(reason.clone(), now);
    unit.notify_creator(NotificationKind::Rejected, Some(reason));
    tracing::info!(
        request_id = %request.id,
        group = %group.id,
        "Request rejected: parallel group failed"
    );
    Ok(())
}

/// Move a request off its fork step after the last group joined
fn join(
    core: &StepTransitions,
    request: &mut Request,
    workflow: &Workflow,
    join_step: Option<&StepId>,
    now: DateTime<Utc>,
    unit: &mut Unit,
) -> ApprovalResult<Transition> {
    match join_step {
        Some(id) => {
            let step = workflow.require_step(id)?;
            core.enter_step(request, step, now, unit)?;
            request.status = RequestStatus::Pending;
            Ok(Transition::MovedTo { step: id.clone() })
        }
        None => {
            core.complete(request, now, unit);
            Ok(Transition::Completed)
        }
    }
}

/// Public entry points for fork/join.
///
/// Each call runs under the request lock and commits atomically.
#[derive(Clone)]
pub struct ParallelWorkflowManager {
    core: Arc<StepTransitions>,
}

impl ParallelWorkflowManager {
    pub(crate) fn new(core: Arc<StepTransitions>) -> Self {
        Self { core }
    }

    /// Open the parallel groups forking at `fork_step`.
    ///
    /// The request's current step is set to the fork step. Returns the new
    /// execution states; empty when no active group forks there.
    pub fn fork(
        &self,
        request_id: &RequestId,
        fork_step: &StepId,
    ) -> ApprovalResult<Vec<ExecutionState>> {
        let core = &self.core;
        core.request_locks.with(request_id, || {
            let now = Utc::now();
            let mut request = core.request(request_id)?;
            core.actionable_step(&request)?;
            let workflow = core.workflow(&request.workflow_id)?;
            workflow.require_step(fork_step)?;

            let mut unit = Unit::new();
            let states = core.plan_fork(&request, &workflow, fork_step, now, &mut unit)?;
            if states.is_empty() {
                return Ok(states);
            }
            request.current_step = Some(fork_step.clone());
            request.status = RequestStatus::Pending;
            request.updated_at = now;
            core.commit(&request, unit)?;
            Ok(states)
        })
    }

    /// Finish the branch at `step` with `outcome` and evaluate its group.
    ///
    /// When the group joins the request moves to the join target. Calling
    /// again for a joined group is a no-op.
    pub fn complete_parallel_step(
        &self,
        request_id: &RequestId,
        step: &StepId,
        outcome: BranchOutcome,
    ) -> ApprovalResult<SyncOutcome> {
        let core = &self.core;
        core.request_locks.with(request_id, || {
            let now = Utc::now();
            let mut request = core.request(request_id)?;
            // a join that approved the request leaves it terminal
            let joined = core
                .store
                .execution_states(&request.id)?
                .iter()
                .rev()
                .find(|s| s.includes(step))
                .is_some_and(|s| s.status == ExecutionStatus::Completed);
            if joined {
                tracing::debug!(request_id = %request.id, step = %step, "Group already joined");
                return Ok(SyncOutcome::AlreadyCompleted);
            }
            core.actionable_step(&request)?;
            let workflow = core.workflow(&request.workflow_id)?;

            let mut unit = Unit::new();
            let outcome = finish_branch(core, &mut request, &workflow, step, outcome, now, &mut unit)?;
            core.commit(&request, unit)?;
            Ok(outcome)
        })
    }

    /// Fail every in-progress fork of the request and drop its branch
    /// trackers. Returns how many forks were failed.
    pub fn cancel_parallel_execution(&self, request_id: &RequestId) -> ApprovalResult<usize> {
        let core = &self.core;
        core.request_locks.with(request_id, || {
            let mut unit = Unit::new();
            let failed = core.plan_cancel_forks(request_id, None, Utc::now(), &mut unit)?;
            if failed > 0 {
                core.commit_batch(unit)?;
            }
            Ok(failed)
        })
    }

    pub fn execution_states(&self, request_id: &RequestId) -> ApprovalResult<Vec<ExecutionState>> {
        Ok(self.core.store.execution_states(request_id)?)
    }

    pub fn active_parallel_steps(
        &self,
        request_id: &RequestId,
    ) -> ApprovalResult<Vec<ActiveParallelStep>> {
        Ok(self.core.store.active_parallel_steps(request_id)?)
    }
}
