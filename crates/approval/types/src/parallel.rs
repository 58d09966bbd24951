//! Cross-step parallelism: fork a request into concurrent branch steps
//! and join them back under a synchronization policy
//!
//! This is workflow-level parallelism. It is unrelated to a single
//! step's [`ApprovalType::Parallel`](crate::ApprovalType) voting mode.

use crate::{ExecutionStateId, ParallelGroupId, RequestId, StepId, WorkflowId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ── Sync Policy ──────────────────────────────────────────────────────

/// How many branches must complete before the group joins
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncPolicy {
    /// Every branch
    All,
    /// The first branch
    Any,
    /// ceil(total / 2) branches
    Majority,
    /// A fixed number of branches
    Custom { required_approvals: u32 },
}

impl SyncPolicy {
    /// Branches needed to join a group of `total` members
    pub fn required(&self, total: u32) -> u32 {
        match self {
            Self::All => total,
            Self::Any => 1,
            Self::Majority => total.div_ceil(2),
            Self::Custom { required_approvals } => *required_approvals,
        }
    }

    pub fn is_satisfied(&self, completed: u32, total: u32) -> bool {
        completed >= self.required(total)
    }
}

impl std::fmt::Display for SyncPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::All => write!(f, "all"),
            Self::Any => write!(f, "any"),
            Self::Majority => write!(f, "majority"),
            Self::Custom { required_approvals } => write!(f, "custom({})", required_approvals),
        }
    }
}

// ── Parallel Step Group ──────────────────────────────────────────────

/// Steps forked together from one step and joined into another
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParallelStepGroup {
    pub id: ParallelGroupId,
    #[serde(default = "unassigned_workflow")]
    pub workflow_id: WorkflowId,
    pub name: String,
    pub fork_from_step: StepId,
    /// Explicit join step; otherwise the next step past the members
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join_to_step: Option<StepId>,
    pub sync: SyncPolicy,
    /// Member steps, in order
    pub member_steps: Vec<StepId>,
    #[serde(default = "default_true")]
    pub active: bool,
}

fn default_true() -> bool {
    true
}

fn unassigned_workflow() -> WorkflowId {
    WorkflowId::new("")
}

impl ParallelStepGroup {
    pub fn new(
        id: impl Into<String>,
        fork_from_step: impl Into<String>,
        sync: SyncPolicy,
        member_steps: Vec<StepId>,
    ) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id: ParallelGroupId::new(id),
            workflow_id: unassigned_workflow(),
            fork_from_step: StepId::new(fork_from_step),
            join_to_step: None,
            sync,
            member_steps,
            active: true,
        }
    }

    pub fn joining_at(mut self, step: impl Into<String>) -> Self {
        self.join_to_step = Some(StepId::new(step));
        self
    }

    pub fn in_workflow(mut self, workflow: WorkflowId) -> Self {
        self.workflow_id = workflow;
        self
    }

    pub fn total(&self) -> u32 {
        self.member_steps.len() as u32
    }

    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.member_steps.is_empty() {
            problems.push(format!("parallel group {} has no member steps", self.id));
        }
        if self.member_steps.contains(&self.fork_from_step) {
            problems.push(format!(
                "parallel group {} forks from one of its own members",
                self.id
            ));
        }
        if let Some(join) = &self.join_to_step {
            if self.member_steps.contains(join) {
                problems.push(format!(
                    "parallel group {} joins into one of its own members",
                    self.id
                ));
            }
        }
        if let SyncPolicy::Custom { required_approvals } = self.sync {
            if required_approvals == 0 || required_approvals > self.total() {
                problems.push(format!(
                    "parallel group {}: custom sync requires {} of {} branches",
                    self.id,
                    required_approvals,
                    self.total()
                ));
            }
        }
        problems
    }
}

// ── Execution State ──────────────────────────────────────────────────

/// Lifecycle of one forked group for one request
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

/// Lifecycle of one branch step
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BranchStatus {
    Pending,
    InProgress,
    Approved,
    Rejected,
}

impl BranchStatus {
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Pending | Self::InProgress)
    }
}

/// How a branch finished
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BranchOutcome {
    Approved,
    Rejected,
}

/// Progress of one (request, group) fork
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExecutionState {
    pub id: ExecutionStateId,
    pub request_id: RequestId,
    pub group_id: ParallelGroupId,
    /// Approved branches; never decreases and never exceeds `total_steps`
    pub completed_steps: u32,
    pub total_steps: u32,
    pub step_statuses: BTreeMap<StepId, BranchStatus>,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl ExecutionState {
    /// Begin tracking a fork of `group`
    pub fn start(request_id: RequestId, group: &ParallelStepGroup, now: DateTime<Utc>) -> Self {
        Self {
            id: ExecutionStateId::generate(),
            request_id,
            group_id: group.id.clone(),
            completed_steps: 0,
            total_steps: group.total(),
            step_statuses: group
                .member_steps
                .iter()
                .map(|s| (s.clone(), BranchStatus::Pending))
                .collect(),
            status: ExecutionStatus::InProgress,
            started_at: now,
            finished_at: None,
        }
    }

    pub fn is_in_progress(&self) -> bool {
        matches!(self.status, ExecutionStatus::Pending | ExecutionStatus::InProgress)
    }

    pub fn includes(&self, step: &StepId) -> bool {
        self.step_statuses.contains_key(step)
    }

    /// Branches that have not finished yet
    pub fn open_branches(&self) -> u32 {
        self.step_statuses.values().filter(|s| s.is_open()).count() as u32
    }
}

/// Branch tracker for one (request, step) inside a fork
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActiveParallelStep {
    pub request_id: RequestId,
    pub group_id: ParallelGroupId,
    pub step_id: StepId,
    pub status: BranchStatus,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl ActiveParallelStep {
    pub fn new(
        request_id: RequestId,
        group_id: ParallelGroupId,
        step_id: StepId,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            request_id,
            group_id,
            step_id,
            status: BranchStatus::Pending,
            started_at: now,
            finished_at: None,
        }
    }
}
