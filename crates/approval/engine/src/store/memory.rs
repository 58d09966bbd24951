//! In-memory reference implementation of [`ApprovalStore`].
//!
//! All tables live behind one `RwLock`, so a batch is validated and
//! applied while holding a single write guard. Deterministic and
//! test-friendly; production deployments plug in a transactional backend.

use super::{ApprovalStore, WriteBatch, WriteOp};
use approval_types::{
    Action, ActionId, ActiveParallelStep, Ballot, Condition, ConditionGroup, ConditionGroupId,
    ConditionId, DynamicApproverAssignment, DynamicStepModification, Escalation, ExecutionState,
    ExecutionStateId, FieldChange, ModificationRuleId, ParallelGroupId, ParallelStepGroup, Request,
    RequestId, RequestStatus, StepId, StoreError, StoreResult, Workflow, WorkflowId,
    WorkflowModificationRule, WorkflowVersion,
};
use std::collections::{HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Default)]
struct Tables {
    workflows: HashMap<WorkflowId, Workflow>,
    conditions: HashMap<ConditionId, Condition>,
    condition_groups: HashMap<ConditionGroupId, ConditionGroup>,
    parallel_groups: HashMap<ParallelGroupId, ParallelStepGroup>,
    modification_rules: HashMap<ModificationRuleId, WorkflowModificationRule>,
    versions: Vec<WorkflowVersion>,
    requests: HashMap<RequestId, Request>,
    ballots: HashMap<(RequestId, StepId), Ballot>,
    actions: Vec<Action>,
    action_ids: HashSet<ActionId>,
    execution_states: HashMap<ExecutionStateId, ExecutionState>,
    active_parallel_steps: HashMap<(RequestId, StepId), ActiveParallelStep>,
    step_modifications: Vec<DynamicStepModification>,
    approver_assignments: Vec<DynamicApproverAssignment>,
    escalations: Vec<Escalation>,
    field_changes: Vec<FieldChange>,
}

/// In-memory approval store.
#[derive(Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, Tables>> {
        self.tables
            .read()
            .map_err(|_| StoreError::Backend("approval tables lock poisoned".to_string()))
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, Tables>> {
        self.tables
            .write()
            .map_err(|_| StoreError::Backend("approval tables lock poisoned".to_string()))
    }
}

fn sorted_by_id<T: Clone, K: Ord>(items: impl Iterator<Item = T>, key: impl Fn(&T) -> K) -> Vec<T> {
    let mut out: Vec<T> = items.collect();
    out.sort_by_key(|item| key(item));
    out
}

impl ApprovalStore for InMemoryStore {
    fn workflow(&self, id: &WorkflowId) -> StoreResult<Option<Workflow>> {
        Ok(self.read()?.workflows.get(id).cloned())
    }

    fn workflows(&self) -> StoreResult<Vec<Workflow>> {
        let guard = self.read()?;
        Ok(sorted_by_id(guard.workflows.values().cloned(), |w| w.id.clone()))
    }

    fn active_workflow_for_subject(&self, subject_type: &str) -> StoreResult<Option<Workflow>> {
        let guard = self.read()?;
        Ok(guard
            .workflows
            .values()
            .filter(|w| w.active && w.subject_type == subject_type)
            .max_by(|a, b| {
                a.created_at
                    .cmp(&b.created_at)
                    .then_with(|| a.id.cmp(&b.id))
            })
            .cloned())
    }

    fn conditions(&self, workflow: &WorkflowId) -> StoreResult<Vec<Condition>> {
        let guard = self.read()?;
        Ok(sorted_by_id(
            guard
                .conditions
                .values()
                .filter(|c| &c.workflow_id == workflow)
                .cloned(),
            |c| c.id.clone(),
        ))
    }

    fn condition_groups(&self, workflow: &WorkflowId) -> StoreResult<Vec<ConditionGroup>> {
        let guard = self.read()?;
        Ok(sorted_by_id(
            guard
                .condition_groups
                .values()
                .filter(|g| &g.workflow_id == workflow)
                .cloned(),
            |g| g.id.clone(),
        ))
    }

    fn parallel_groups(&self, workflow: &WorkflowId) -> StoreResult<Vec<ParallelStepGroup>> {
        let guard = self.read()?;
        Ok(sorted_by_id(
            guard
                .parallel_groups
                .values()
                .filter(|g| &g.workflow_id == workflow)
                .cloned(),
            |g| g.id.clone(),
        ))
    }

    fn modification_rules(
        &self,
        workflow: &WorkflowId,
    ) -> StoreResult<Vec<WorkflowModificationRule>> {
        let guard = self.read()?;
        Ok(sorted_by_id(
            guard
                .modification_rules
                .values()
                .filter(|r| &r.workflow_id == workflow)
                .cloned(),
            |r| r.id.clone(),
        ))
    }

    fn versions(&self, workflow: &WorkflowId) -> StoreResult<Vec<WorkflowVersion>> {
        let guard = self.read()?;
        let mut versions: Vec<WorkflowVersion> = guard
            .versions
            .iter()
            .filter(|v| &v.workflow_id == workflow)
            .cloned()
            .collect();
        versions.sort_by_key(|v| v.version_number);
        Ok(versions)
    }

    fn request(&self, id: &RequestId) -> StoreResult<Option<Request>> {
        Ok(self.read()?.requests.get(id).cloned())
    }

    fn requests_with_status(&self, statuses: &[RequestStatus]) -> StoreResult<Vec<Request>> {
        let guard = self.read()?;
        let mut requests: Vec<Request> = guard
            .requests
            .values()
            .filter(|r| statuses.contains(&r.status))
            .cloned()
            .collect();
        requests.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(requests)
    }

    fn ballot(&self, request: &RequestId, step: &StepId) -> StoreResult<Option<Ballot>> {
        Ok(self
            .read()?
            .ballots
            .get(&(request.clone(), step.clone()))
            .cloned())
    }

    fn actions(&self, request: &RequestId) -> StoreResult<Vec<Action>> {
        let guard = self.read()?;
        Ok(guard
            .actions
            .iter()
            .filter(|a| &a.request_id == request)
            .cloned()
            .collect())
    }

    fn execution_states(&self, request: &RequestId) -> StoreResult<Vec<ExecutionState>> {
        let guard = self.read()?;
        let mut states: Vec<ExecutionState> = guard
            .execution_states
            .values()
            .filter(|s| &s.request_id == request)
            .cloned()
            .collect();
        states.sort_by(|a, b| a.started_at.cmp(&b.started_at).then_with(|| a.id.cmp(&b.id)));
        Ok(states)
    }

    fn active_parallel_steps(&self, request: &RequestId) -> StoreResult<Vec<ActiveParallelStep>> {
        let guard = self.read()?;
        Ok(sorted_by_id(
            guard
                .active_parallel_steps
                .values()
                .filter(|s| &s.request_id == request)
                .cloned(),
            |s| s.step_id.clone(),
        ))
    }

    fn approver_assignments(
        &self,
        request: &RequestId,
        step: &StepId,
    ) -> StoreResult<Vec<DynamicApproverAssignment>> {
        let guard = self.read()?;
        Ok(guard
            .approver_assignments
            .iter()
            .filter(|a| &a.request_id == request && &a.step_id == step)
            .cloned()
            .collect())
    }

    fn step_modifications(&self, request: &RequestId) -> StoreResult<Vec<DynamicStepModification>> {
        let guard = self.read()?;
        Ok(guard
            .step_modifications
            .iter()
            .filter(|m| &m.request_id == request)
            .cloned()
            .collect())
    }

    fn escalations(&self, request: &RequestId) -> StoreResult<Vec<Escalation>> {
        let guard = self.read()?;
        Ok(guard
            .escalations
            .iter()
            .filter(|e| &e.request_id == request)
            .cloned()
            .collect())
    }

    fn field_changes(&self, request: &RequestId) -> StoreResult<Vec<FieldChange>> {
        let guard = self.read()?;
        Ok(guard
            .field_changes
            .iter()
            .filter(|c| &c.request_id == request)
            .cloned()
            .collect())
    }

    fn commit(&self, batch: WriteBatch) -> StoreResult<()> {
        let mut guard = self.write()?;
        check_batch(&guard, &batch)?;
        for op in batch.into_ops() {
            apply(&mut guard, op);
        }
        Ok(())
    }
}

/// Reject the batch before anything is applied.
fn check_batch(tables: &Tables, batch: &WriteBatch) -> StoreResult<()> {
    let mut open_forks: HashSet<(RequestId, ParallelGroupId)> = tables
        .execution_states
        .values()
        .filter(|s| s.is_in_progress())
        .map(|s| (s.request_id.clone(), s.group_id.clone()))
        .collect();
    let mut max_version: HashMap<WorkflowId, u32> = HashMap::new();
    for v in &tables.versions {
        let entry = max_version.entry(v.workflow_id.clone()).or_insert(0);
        *entry = (*entry).max(v.version_number);
    }
    let mut new_actions = HashSet::new();

    for op in batch.ops() {
        match op {
            WriteOp::InsertExecutionState(state) => {
                let key = (state.request_id.clone(), state.group_id.clone());
                if open_forks.contains(&key) {
                    return Err(StoreError::Conflict(format!(
                        "request {} already has an in-progress execution of group {}",
                        state.request_id, state.group_id
                    )));
                }
                if state.is_in_progress() {
                    open_forks.insert(key);
                }
                check_execution_counters(state)?;
            }
            WriteOp::PutExecutionState(state) => {
                check_execution_counters(state)?;
                if let Some(existing) = tables.execution_states.get(&state.id) {
                    if state.completed_steps < existing.completed_steps {
                        return Err(StoreError::InvariantViolation(format!(
                            "execution state {} completed count would drop from {} to {}",
                            state.id, existing.completed_steps, state.completed_steps
                        )));
                    }
                }
                if !state.is_in_progress() {
                    open_forks.remove(&(state.request_id.clone(), state.group_id.clone()));
                }
            }
            WriteOp::InsertVersion(version) => {
                let current = max_version.entry(version.workflow_id.clone()).or_insert(0);
                if version.version_number <= *current {
                    return Err(StoreError::Conflict(format!(
                        "workflow {} already has version {} (got {})",
                        version.workflow_id, current, version.version_number
                    )));
                }
                *current = version.version_number;
            }
            WriteOp::AppendAction(action) => {
                if tables.action_ids.contains(&action.id) || !new_actions.insert(&action.id) {
                    return Err(StoreError::Conflict(format!(
                        "action {} is already recorded",
                        action.id
                    )));
                }
            }
            WriteOp::PutRequest(request) => {
                if request.is_in_flight() && request.current_step.is_none() {
                    return Err(StoreError::InvariantViolation(format!(
                        "request {} is {} without a current step",
                        request.id, request.status
                    )));
                }
            }
            WriteOp::PutWorkflow(workflow) => {
                let mut sequences = HashSet::new();
                if !workflow.steps.iter().all(|s| sequences.insert(s.sequence)) {
                    return Err(StoreError::InvariantViolation(format!(
                        "workflow {} has duplicate step sequences",
                        workflow.id
                    )));
                }
            }
            _ => {}
        }
    }
    Ok(())
}

fn check_execution_counters(state: &ExecutionState) -> StoreResult<()> {
    if state.completed_steps > state.total_steps {
        return Err(StoreError::InvariantViolation(format!(
            "execution state {} has {} of {} steps completed",
            state.id, state.completed_steps, state.total_steps
        )));
    }
    Ok(())
}

fn apply(tables: &mut Tables, op: WriteOp) {
    match op {
        WriteOp::PutWorkflow(workflow) => {
            tables.workflows.insert(workflow.id.clone(), workflow);
        }
        WriteOp::PutCondition(condition) => {
            tables.conditions.insert(condition.id.clone(), condition);
        }
        WriteOp::PutConditionGroup(group) => {
            tables.condition_groups.insert(group.id.clone(), group);
        }
        WriteOp::PutParallelGroup(group) => {
            tables.parallel_groups.insert(group.id.clone(), group);
        }
        WriteOp::PutModificationRule(rule) => {
            tables.modification_rules.insert(rule.id.clone(), rule);
        }
        WriteOp::PutRequest(request) => {
            tables.requests.insert(request.id.clone(), request);
        }
        WriteOp::PutBallot(ballot) => {
            tables
                .ballots
                .insert((ballot.request_id.clone(), ballot.step_id.clone()), ballot);
        }
        WriteOp::DeleteBallots(request) => {
            tables.ballots.retain(|(r, _), _| r != &request);
        }
        WriteOp::AppendAction(action) => {
            tables.action_ids.insert(action.id.clone());
            tables.actions.push(action);
        }
        WriteOp::InsertExecutionState(state) | WriteOp::PutExecutionState(state) => {
            tables.execution_states.insert(state.id.clone(), state);
        }
        WriteOp::PutActiveParallelStep(step) => {
            tables
                .active_parallel_steps
                .insert((step.request_id.clone(), step.step_id.clone()), step);
        }
        WriteOp::DeleteActiveParallelStep(request, step) => {
            tables.active_parallel_steps.remove(&(request, step));
        }
        WriteOp::DeleteActiveParallelSteps(request) => {
            tables.active_parallel_steps.retain(|(r, _), _| r != &request);
        }
        WriteOp::AppendStepModification(modification) => {
            tables.step_modifications.push(modification);
        }
        WriteOp::AppendApproverAssignment(assignment) => {
            tables.approver_assignments.push(assignment);
        }
        WriteOp::InsertVersion(version) => {
            for existing in tables
                .versions
                .iter_mut()
                .filter(|v| v.workflow_id == version.workflow_id)
            {
                existing.active = false;
            }
            tables.versions.push(version);
        }
        WriteOp::AppendEscalation(escalation) => {
            tables.escalations.push(escalation);
        }
        WriteOp::AppendFieldChange(change) => {
            tables.field_changes.push(change);
        }
    }
}
