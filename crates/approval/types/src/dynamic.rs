//! Runtime topology changes: rules that permit them, the records they
//! leave behind, and the version snapshots that make them reversible

use crate::{ModificationId, ModificationRuleId, RequestId, StepId, UserId, VersionId, Workflow, WorkflowId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The kinds of runtime change a rule can permit
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModificationKind {
    AddStep,
    RemoveStep,
    SkipStep,
    ChangeApprover,
}

impl std::fmt::Display for ModificationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::AddStep => "add_step",
            Self::RemoveStep => "remove_step",
            Self::SkipStep => "skip_step",
            Self::ChangeApprover => "change_approver",
        };
        write!(f, "{}", s)
    }
}

// ── Modification Rule ────────────────────────────────────────────────

/// A per-workflow gate permitting one kind of runtime change
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkflowModificationRule {
    #[serde(default = "ModificationRuleId::generate")]
    pub id: ModificationRuleId,
    #[serde(default = "unassigned_workflow")]
    pub workflow_id: WorkflowId,
    pub kind: ModificationKind,
    #[serde(default = "default_true")]
    pub active: bool,
    /// Caller must give a reason
    #[serde(default)]
    pub requires_reason: bool,
    /// Cap on changes of this kind per request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_per_request: Option<u32>,
    #[serde(default)]
    pub description: String,
}

fn default_true() -> bool {
    true
}

fn unassigned_workflow() -> WorkflowId {
    WorkflowId::new("")
}

impl WorkflowModificationRule {
    pub fn allow(workflow_id: WorkflowId, kind: ModificationKind) -> Self {
        Self {
            id: ModificationRuleId::generate(),
            workflow_id,
            kind,
            active: true,
            requires_reason: false,
            max_per_request: None,
            description: String::new(),
        }
    }

    pub fn requiring_reason(mut self) -> Self {
        self.requires_reason = true;
        self
    }

    pub fn with_max_per_request(mut self, max: u32) -> Self {
        self.max_per_request = Some(max);
        self
    }

    /// Problems with this rule's payload. Empty means valid.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.workflow_id.as_str().trim().is_empty() {
            problems.push(format!("modification rule {}: workflow is not set", self.id));
        }
        if self.max_per_request == Some(0) {
            problems.push(format!(
                "modification rule {}: max_per_request of 0 can never be satisfied; deactivate the rule instead",
                self.id
            ));
        }
        problems
    }
}

/// Problems across a workflow's rule set, including per-rule problems
pub fn validate_modification_rules(rules: &[WorkflowModificationRule]) -> Vec<String> {
    let mut problems: Vec<String> = rules.iter().flat_map(|r| r.validate()).collect();
    let mut seen = std::collections::HashSet::new();
    for rule in rules.iter().filter(|r| r.active) {
        if !seen.insert((&rule.workflow_id, rule.kind)) {
            problems.push(format!(
                "workflow {} has more than one active '{}' rule",
                rule.workflow_id, rule.kind
            ));
        }
    }
    problems
}

// ── Modification Records ─────────────────────────────────────────────

/// What a step modification did
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepModificationKind {
    Added,
    Removed,
    Skipped,
}

/// Audit record of a runtime step change made on behalf of one request
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DynamicStepModification {
    pub id: ModificationId,
    pub request_id: RequestId,
    pub workflow_id: WorkflowId,
    pub step_id: StepId,
    pub kind: StepModificationKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub modified_by: UserId,
    pub created_at: DateTime<Utc>,
}

/// How a dynamic approver relates to the configured ones
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AssignmentKind {
    /// Takes over an existing approver's ballot entry
    Replacement { replaces: UserId },
    /// Joins the ballot
    Addition,
    /// Joins the ballot until the given time
    Temporary { until: DateTime<Utc> },
}

/// An approver assigned at runtime, scoped to one request and step
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DynamicApproverAssignment {
    pub id: ModificationId,
    pub request_id: RequestId,
    pub step_id: StepId,
    pub approver: UserId,
    /// Overrides the inherited or default weight
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weightage: Option<f64>,
    pub kind: AssignmentKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub assigned_by: UserId,
    pub created_at: DateTime<Utc>,
}

impl DynamicApproverAssignment {
    /// Whether the assignment still applies at `now`
    pub fn is_effective(&self, now: DateTime<Utc>) -> bool {
        match &self.kind {
            AssignmentKind::Temporary { until } => *until > now,
            _ => true,
        }
    }
}

// ── Versions ─────────────────────────────────────────────────────────

/// Immutable snapshot of a workflow and its steps
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkflowVersion {
    pub id: VersionId,
    pub workflow_id: WorkflowId,
    /// Monotonically increasing per workflow, starting at 1
    pub version_number: u32,
    pub snapshot: Workflow,
    /// Exactly one version per workflow is active
    pub active: bool,
    pub change_summary: String,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
}

impl WorkflowVersion {
    pub fn capture(
        workflow: &Workflow,
        version_number: u32,
        change_summary: impl Into<String>,
        created_by: UserId,
        now: DateTime<Utc>,
    ) -> Self {
        let mut snapshot = workflow.clone();
        snapshot.version = version_number;
        Self {
            id: VersionId::generate(),
            workflow_id: workflow.id.clone(),
            version_number,
            snapshot,
            active: true,
            change_summary: change_summary.into(),
            created_by,
            created_at: now,
        }
    }
}
