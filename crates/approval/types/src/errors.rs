//! Error types for the approval layer

use crate::{ModificationKind, RequestId, RequestStatus, StepId, WorkflowId};

/// State-machine violations and lookup failures.
///
/// Validation problems are not errors; they are returned as plain
/// problem lists by the `validate` helpers.
#[derive(Debug, thiserror::Error)]
pub enum ApprovalError {
    #[error("No active workflow bound to subject type '{subject_type}'")]
    NoActiveWorkflow { subject_type: String },

    #[error("Request {0} has no current step")]
    NoCurrentStep(RequestId),

    #[error("Step {step} is the first step of request {request}; nothing to send back to")]
    NoPreviousStep { request: RequestId, step: StepId },

    #[error("Modification '{kind}' is not allowed on workflow {workflow}")]
    ModificationNotAllowed {
        workflow: WorkflowId,
        kind: ModificationKind,
    },

    #[error("Step {step} does not belong to workflow {workflow}")]
    StepWorkflowMismatch { step: StepId, workflow: WorkflowId },

    #[error("Request {request} is {status}; no further actions are accepted")]
    TerminalRequest {
        request: RequestId,
        status: RequestStatus,
    },

    #[error("Request not found: {0}")]
    RequestNotFound(RequestId),

    #[error("Workflow not found: {0}")]
    WorkflowNotFound(WorkflowId),

    #[error("Step not found: {0}")]
    StepNotFound(StepId),

    #[error("Workflow {workflow} has no version {version}")]
    VersionNotFound { workflow: WorkflowId, version: u32 },

    #[error("Workflow {0} has no active steps")]
    WorkflowHasNoSteps(WorkflowId),

    #[error("Request {0} is waiting on parallel branches; vote on a branch step instead")]
    ParallelExecutionInProgress(RequestId),

    #[error("Step {step} is not an open parallel branch of request {request}")]
    BranchNotActive { request: RequestId, step: StepId },

    #[error("Step {0} does not allow send-back")]
    SendBackNotAllowed(StepId),

    #[error("Step {0} is the request's current step and cannot be removed")]
    CannotRemoveCurrentStep(StepId),

    #[error(
        "Workflow {workflow} cannot roll back to version {version}: {} in-flight request(s) sit on steps that version lacks",
        .requests.len()
    )]
    RollbackStrandsRequests {
        workflow: WorkflowId,
        version: u32,
        requests: Vec<RequestId>,
    },

    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Result type alias for approval operations
pub type ApprovalResult<T> = Result<T, ApprovalError>;

/// Persistence-layer errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("record not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("backend error: {0}")]
    Backend(String),
}

/// Result type alias for store operations
pub type StoreResult<T> = Result<T, StoreError>;
