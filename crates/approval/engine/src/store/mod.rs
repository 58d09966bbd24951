//! Persistence contract
//!
//! Reads are typed lookups. Every write goes through [`ApprovalStore::commit`]
//! with a [`WriteBatch`] that is applied all-or-nothing, so one engine
//! operation (ballot update, transition, audit entry) lands as a unit.
//!
//! Append-only records (actions, escalations, field changes, modification
//! records) have no update or delete operation.

mod memory;

pub use memory::InMemoryStore;

use approval_types::{
    Action, ActiveParallelStep, Ballot, Condition, ConditionGroup, DynamicApproverAssignment,
    DynamicStepModification, Escalation, ExecutionState, FieldChange, ParallelStepGroup, Request,
    RequestId, RequestStatus, StepId, StoreResult, Workflow, WorkflowId, WorkflowModificationRule,
    WorkflowVersion,
};

/// Storage interface for the approval runtime.
pub trait ApprovalStore: Send + Sync {
    // ── Definitions ──

    fn workflow(&self, id: &WorkflowId) -> StoreResult<Option<Workflow>>;

    fn workflows(&self) -> StoreResult<Vec<Workflow>>;

    /// The active workflow bound to `subject_type`.
    ///
    /// When several are active the most recently created one wins.
    fn active_workflow_for_subject(&self, subject_type: &str) -> StoreResult<Option<Workflow>>;

    fn conditions(&self, workflow: &WorkflowId) -> StoreResult<Vec<Condition>>;

    fn condition_groups(&self, workflow: &WorkflowId) -> StoreResult<Vec<ConditionGroup>>;

    fn parallel_groups(&self, workflow: &WorkflowId) -> StoreResult<Vec<ParallelStepGroup>>;

    fn modification_rules(&self, workflow: &WorkflowId)
        -> StoreResult<Vec<WorkflowModificationRule>>;

    /// Versions of a workflow in ascending version number
    fn versions(&self, workflow: &WorkflowId) -> StoreResult<Vec<WorkflowVersion>>;

    // ── Requests ──

    fn request(&self, id: &RequestId) -> StoreResult<Option<Request>>;

    fn requests_with_status(&self, statuses: &[RequestStatus]) -> StoreResult<Vec<Request>>;

    fn ballot(&self, request: &RequestId, step: &StepId) -> StoreResult<Option<Ballot>>;

    /// Action log of a request, oldest first
    fn actions(&self, request: &RequestId) -> StoreResult<Vec<Action>>;

    fn execution_states(&self, request: &RequestId) -> StoreResult<Vec<ExecutionState>>;

    fn active_parallel_steps(&self, request: &RequestId) -> StoreResult<Vec<ActiveParallelStep>>;

    fn approver_assignments(
        &self,
        request: &RequestId,
        step: &StepId,
    ) -> StoreResult<Vec<DynamicApproverAssignment>>;

    fn step_modifications(&self, request: &RequestId) -> StoreResult<Vec<DynamicStepModification>>;

    fn escalations(&self, request: &RequestId) -> StoreResult<Vec<Escalation>>;

    fn field_changes(&self, request: &RequestId) -> StoreResult<Vec<FieldChange>>;

    // ── Writes ──

    /// Apply every operation in `batch`, or none of them.
    fn commit(&self, batch: WriteBatch) -> StoreResult<()>;
}

/// One write inside a [`WriteBatch`]
#[derive(Debug, Clone)]
pub enum WriteOp {
    PutWorkflow(Workflow),
    PutCondition(Condition),
    PutConditionGroup(ConditionGroup),
    PutParallelGroup(ParallelStepGroup),
    PutModificationRule(WorkflowModificationRule),
    PutRequest(Request),
    PutBallot(Ballot),
    /// Drop every ballot of a request
    DeleteBallots(RequestId),
    AppendAction(Action),
    /// Start tracking a fork; conflicts with an in-progress state for the
    /// same (request, group)
    InsertExecutionState(ExecutionState),
    PutExecutionState(ExecutionState),
    PutActiveParallelStep(ActiveParallelStep),
    /// Drop one branch tracker
    DeleteActiveParallelStep(RequestId, StepId),
    /// Drop every branch tracker of a request
    DeleteActiveParallelSteps(RequestId),
    AppendStepModification(DynamicStepModification),
    AppendApproverAssignment(DynamicApproverAssignment),
    /// Record a new version and deactivate every other version of the
    /// workflow; the number must exceed all existing ones
    InsertVersion(WorkflowVersion),
    AppendEscalation(Escalation),
    AppendFieldChange(FieldChange),
}

/// An ordered set of writes applied atomically
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, op: WriteOp) -> &mut Self {
        self.ops.push(op);
        self
    }

    pub fn put_workflow(&mut self, workflow: Workflow) -> &mut Self {
        self.push(WriteOp::PutWorkflow(workflow))
    }

    pub fn put_request(&mut self, request: Request) -> &mut Self {
        self.push(WriteOp::PutRequest(request))
    }

    pub fn put_ballot(&mut self, ballot: Ballot) -> &mut Self {
        self.push(WriteOp::PutBallot(ballot))
    }

    pub fn append_action(&mut self, action: Action) -> &mut Self {
        self.push(WriteOp::AppendAction(action))
    }

    pub fn extend(&mut self, other: WriteBatch) -> &mut Self {
        self.ops.extend(other.ops);
        self
    }

    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<WriteOp> {
        self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}
