//! Workflows and steps: the topology a request travels through
//!
//! Steps are kept in a sequence-sorted vector. Navigation (first, next,
//! previous) is index arithmetic over the active steps, so callers never
//! have to re-query a store to find a neighbour.

use crate::{ApprovalError, ApprovalResult, ParallelGroupId, StepId, WorkflowId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

// ── Workflow ─────────────────────────────────────────────────────────

/// A workflow bound to one subject type, owning its ordered steps
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Workflow {
    /// Unique identifier
    pub id: WorkflowId,
    /// Human-readable name
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// The subject type tag this workflow approves (e.g. "purchase_order")
    pub subject_type: String,
    /// Only active workflows accept new submissions
    #[serde(default = "default_true")]
    pub active: bool,
    /// Number of the active version snapshot
    #[serde(default = "default_version")]
    pub version: u32,
    /// Steps, kept sorted by sequence
    #[serde(default)]
    pub steps: Vec<Step>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

impl Workflow {
    /// Create a new, empty workflow
    pub fn new(name: impl Into<String>, subject_type: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: WorkflowId::generate(),
            name: name.into(),
            description: String::new(),
            subject_type: subject_type.into(),
            active: true,
            version: 1,
            steps: Vec::new(),
            created_at: now,
            updated_at: now,
            metadata: HashMap::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = WorkflowId::new(id);
        for step in &mut self.steps {
            step.workflow_id = self.id.clone();
        }
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Add a step. The step is re-homed to this workflow.
    pub fn add_step(&mut self, mut step: Step) -> ApprovalResult<StepId> {
        if self.steps.iter().any(|s| s.id == step.id) {
            return Err(ApprovalError::InvalidTransition(format!(
                "duplicate step id {}",
                step.id
            )));
        }
        if self.steps.iter().any(|s| s.sequence == step.sequence) {
            return Err(ApprovalError::InvalidTransition(format!(
                "duplicate step sequence {}",
                step.sequence
            )));
        }
        step.workflow_id = self.id.clone();
        let id = step.id.clone();
        self.steps.push(step);
        self.sort_steps();
        Ok(id)
    }

    /// Builder form of [`Workflow::add_step`]
    pub fn with_step(mut self, step: Step) -> ApprovalResult<Self> {
        self.add_step(step)?;
        Ok(self)
    }

    /// Restore the sequence ordering invariant
    pub fn sort_steps(&mut self) {
        self.steps.sort_by_key(|s| s.sequence);
    }

    pub fn step(&self, id: &StepId) -> Option<&Step> {
        self.steps.iter().find(|s| &s.id == id)
    }

    pub fn step_mut(&mut self, id: &StepId) -> Option<&mut Step> {
        self.steps.iter_mut().find(|s| &s.id == id)
    }

    /// Look up a step, failing when it belongs elsewhere
    pub fn require_step(&self, id: &StepId) -> ApprovalResult<&Step> {
        self.step(id)
            .ok_or_else(|| ApprovalError::StepWorkflowMismatch {
                step: id.clone(),
                workflow: self.id.clone(),
            })
    }

    pub fn contains_step(&self, id: &StepId) -> bool {
        self.step(id).is_some()
    }

    /// Active steps in ascending sequence
    pub fn active_steps(&self) -> Vec<&Step> {
        self.steps.iter().filter(|s| s.active).collect()
    }

    pub fn active_step_count(&self) -> usize {
        self.steps.iter().filter(|s| s.active).count()
    }

    /// First active step by ascending sequence
    pub fn first_step(&self) -> Option<&Step> {
        self.first_step_excluding(&HashSet::new())
    }

    pub fn first_step_excluding(&self, excluded: &HashSet<StepId>) -> Option<&Step> {
        self.steps
            .iter()
            .find(|s| s.active && !excluded.contains(&s.id))
    }

    /// Next active step after `from` by sequence
    pub fn next_step(&self, from: &StepId) -> Option<&Step> {
        self.next_step_excluding(from, &HashSet::new())
    }

    /// Next active step after `from`, passing over `excluded` steps
    pub fn next_step_excluding(&self, from: &StepId, excluded: &HashSet<StepId>) -> Option<&Step> {
        let active = self.active_steps();
        let start = self.cursor_after(&active, from)?;
        active[start..]
            .iter()
            .find(|s| !excluded.contains(&s.id))
            .copied()
    }

    /// Previous active step before `from` by sequence
    pub fn previous_step(&self, from: &StepId) -> Option<&Step> {
        self.previous_step_excluding(from, &HashSet::new())
    }

    pub fn previous_step_excluding(
        &self,
        from: &StepId,
        excluded: &HashSet<StepId>,
    ) -> Option<&Step> {
        let active = self.active_steps();
        let end = self.cursor_before(&active, from)?;
        active[..end]
            .iter()
            .rev()
            .find(|s| !excluded.contains(&s.id))
            .copied()
    }

    /// First active step whose sequence is strictly greater than `sequence`,
    /// passing over `excluded` steps
    pub fn next_step_after_sequence(
        &self,
        sequence: u32,
        excluded: &HashSet<StepId>,
    ) -> Option<&Step> {
        self.steps
            .iter()
            .find(|s| s.active && s.sequence > sequence && !excluded.contains(&s.id))
    }

    /// Index into `active` of the first step after `from`.
    ///
    /// Falls back to sequence comparison when `from` itself is inactive.
    fn cursor_after(&self, active: &[&Step], from: &StepId) -> Option<usize> {
        match active.iter().position(|s| &s.id == from) {
            Some(idx) => Some(idx + 1),
            None => {
                let seq = self.step(from)?.sequence;
                Some(active.partition_point(|s| s.sequence <= seq))
            }
        }
    }

    /// Exclusive end index into `active` of the steps before `from`
    fn cursor_before(&self, active: &[&Step], from: &StepId) -> Option<usize> {
        match active.iter().position(|s| &s.id == from) {
            Some(idx) => Some(idx),
            None => {
                let seq = self.step(from)?.sequence;
                Some(active.partition_point(|s| s.sequence < seq))
            }
        }
    }

    /// Structural problems with this workflow. Empty means valid.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();

        if self.name.trim().is_empty() {
            problems.push("workflow name is empty".to_string());
        }
        if self.subject_type.trim().is_empty() {
            problems.push("workflow is not bound to a subject type".to_string());
        }
        if self.active_step_count() == 0 {
            problems.push(format!("workflow '{}' has no active steps", self.name));
        }

        let mut sequences = HashSet::new();
        let mut ids = HashSet::new();
        for step in &self.steps {
            if !sequences.insert(step.sequence) {
                problems.push(format!("sequence {} is used by more than one step", step.sequence));
            }
            if !ids.insert(&step.id) {
                problems.push(format!("step id {} is used more than once", step.id));
            }
            if step.workflow_id != self.id {
                problems.push(format!(
                    "step {} belongs to workflow {}, not {}",
                    step.id, step.workflow_id, self.id
                ));
            }
            if !(0.0..=100.0).contains(&step.minimum_approval_percentage) {
                problems.push(format!(
                    "step {} minimum approval percentage {} is outside 0..=100",
                    step.id, step.minimum_approval_percentage
                ));
            }
            if step.sla_hours == Some(0) {
                problems.push(format!("step {} has a zero-hour SLA", step.id));
            }
            if step.active && step.approvers.is_empty() {
                problems.push(format!("step {} has no approvers", step.id));
            }
        }

        problems
    }
}

fn default_true() -> bool {
    true
}

fn default_version() -> u32 {
    1
}

fn default_minimum_percentage() -> f64 {
    100.0
}

// ── Step ─────────────────────────────────────────────────────────────

/// One stage of a workflow
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Step {
    pub id: StepId,
    #[serde(default = "unassigned_workflow")]
    pub workflow_id: WorkflowId,
    pub name: String,
    /// Unique per workflow; defines default order
    pub sequence: u32,
    /// Within-step voting mode
    #[serde(default)]
    pub approval_type: ApprovalType,
    /// Consensus threshold; 100 means unanimous
    #[serde(default = "default_minimum_percentage")]
    pub minimum_approval_percentage: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sla_hours: Option<u32>,
    #[serde(default = "default_true")]
    pub allow_send_back: bool,
    /// Membership in a cross-step parallel group
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallel_group: Option<ParallelGroupId>,
    #[serde(default = "default_true")]
    pub active: bool,
    /// Who votes on this step, and with what weight
    #[serde(default)]
    pub approvers: Vec<StepApprover>,
}

fn unassigned_workflow() -> WorkflowId {
    WorkflowId::new("")
}

impl Step {
    pub fn new(id: impl Into<String>, name: impl Into<String>, sequence: u32) -> Self {
        Self {
            id: StepId::new(id),
            workflow_id: unassigned_workflow(),
            name: name.into(),
            sequence,
            approval_type: ApprovalType::default(),
            minimum_approval_percentage: default_minimum_percentage(),
            sla_hours: None,
            allow_send_back: true,
            parallel_group: None,
            active: true,
            approvers: Vec::new(),
        }
    }

    pub fn with_approval_type(mut self, approval_type: ApprovalType) -> Self {
        self.approval_type = approval_type;
        self
    }

    pub fn with_minimum_percentage(mut self, percentage: f64) -> Self {
        self.minimum_approval_percentage = percentage;
        self
    }

    pub fn with_sla_hours(mut self, hours: u32) -> Self {
        self.sla_hours = Some(hours);
        self
    }

    pub fn without_send_back(mut self) -> Self {
        self.allow_send_back = false;
        self
    }

    pub fn in_group(mut self, group: ParallelGroupId) -> Self {
        self.parallel_group = Some(group);
        self
    }

    pub fn with_approver(mut self, approver: StepApprover) -> Self {
        self.approvers.push(approver);
        self
    }
}

/// Within-step voting mode
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalType {
    /// Weighted consensus, approvers expected in order
    #[default]
    Serial,
    /// Weighted consensus, approvers vote in any order
    Parallel,
    /// The first vote advances the step
    AnyOne,
}

impl ApprovalType {
    /// Whether the step is gated by the weighted-consensus threshold
    pub fn uses_consensus(&self) -> bool {
        !matches!(self, Self::AnyOne)
    }
}

// ── Approver configuration ───────────────────────────────────────────

/// How a step approver is resolved to concrete users
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApproverType {
    /// `reference` is a user id
    User,
    /// `reference` is a role name
    Role,
    /// The requester's manager; `reference` is ignored
    Manager,
    /// `reference` is a department code
    DepartmentHead,
    /// `reference` is a position name
    Position,
    /// `reference` names a registered resolution strategy
    Custom,
}

impl std::fmt::Display for ApproverType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::User => "user",
            Self::Role => "role",
            Self::Manager => "manager",
            Self::DepartmentHead => "department_head",
            Self::Position => "position",
            Self::Custom => "custom",
        };
        write!(f, "{}", s)
    }
}

/// A configured approver slot on a step
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StepApprover {
    pub approver_type: ApproverType,
    #[serde(default)]
    pub reference: String,
    pub weightage: f64,
}

impl StepApprover {
    pub fn new(approver_type: ApproverType, reference: impl Into<String>, weightage: f64) -> Self {
        Self {
            approver_type,
            reference: reference.into(),
            weightage,
        }
    }

    pub fn user(user: impl Into<String>, weightage: f64) -> Self {
        Self::new(ApproverType::User, user, weightage)
    }

    pub fn role(role: impl Into<String>, weightage: f64) -> Self {
        Self::new(ApproverType::Role, role, weightage)
    }

    pub fn manager(weightage: f64) -> Self {
        Self::new(ApproverType::Manager, "", weightage)
    }

    pub fn department_head(department: impl Into<String>, weightage: f64) -> Self {
        Self::new(ApproverType::DepartmentHead, department, weightage)
    }

    pub fn position(position: impl Into<String>, weightage: f64) -> Self {
        Self::new(ApproverType::Position, position, weightage)
    }

    pub fn custom(strategy: impl Into<String>, weightage: f64) -> Self {
        Self::new(ApproverType::Custom, strategy, weightage)
    }
}
