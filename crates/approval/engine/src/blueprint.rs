//! Workflow blueprints: a workflow with its routing, parallel groups and
//! modification rules, authored as one YAML or JSON document.
//!
//! ```yaml
//! workflow:
//!   id: purchase
//!   name: Purchase Order
//!   subject_type: purchase_order
//!   steps:
//!     - { id: lead, name: Team Lead, sequence: 1, approvers: [{ approver_type: user, reference: bob, weightage: 1 }] }
//!     - { id: cfo, name: CFO, sequence: 2, approvers: [{ approver_type: role, reference: cfo, weightage: 1 }] }
//! conditions:
//!   - { from_step: lead, to_step: cfo, field: amount, operator: ">", value: 10000, priority: 10 }
//! directory:
//!   roles: { cfo: [carol] }
//! ```

use crate::condition_evaluator::{validate_condition, validate_condition_group};
use crate::resolver::{ApproverResolver, StaticDirectory};
use crate::store::{ApprovalStore, WriteBatch, WriteOp};
use crate::weightage::WeightageCalculator;
use approval_types::{
    validate_modification_rules, ApprovalResult, Condition, ConditionGroup, ParallelStepGroup,
    StepId, UserId, Workflow, WorkflowModificationRule, WorkflowVersion,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

/// Errors reading a blueprint document
#[derive(Debug, thiserror::Error)]
pub enum BlueprintError {
    #[error("failed to read blueprint: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid blueprint YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid blueprint JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// A workflow and everything that hangs off it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Blueprint {
    pub workflow: Workflow,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub condition_groups: Vec<ConditionGroup>,
    #[serde(default)]
    pub parallel_groups: Vec<ParallelStepGroup>,
    #[serde(default)]
    pub modification_rules: Vec<WorkflowModificationRule>,
    /// Organisation directory for role, manager and position approvers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory: Option<StaticDirectory>,
}

impl Blueprint {
    pub fn new(workflow: Workflow) -> Self {
        let mut blueprint = Self {
            workflow,
            conditions: Vec::new(),
            condition_groups: Vec::new(),
            parallel_groups: Vec::new(),
            modification_rules: Vec::new(),
            directory: None,
        };
        blueprint.normalize();
        blueprint
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self.normalize();
        self
    }

    pub fn with_parallel_group(mut self, group: ParallelStepGroup) -> Self {
        self.parallel_groups.push(group);
        self.normalize();
        self
    }

    pub fn with_rule(mut self, rule: WorkflowModificationRule) -> Self {
        self.modification_rules.push(rule);
        self.normalize();
        self
    }

    pub fn with_directory(mut self, directory: StaticDirectory) -> Self {
        self.directory = Some(directory);
        self
    }

    /// Read a blueprint file; `.json` files are parsed as JSON, anything
    /// else as YAML
    pub fn load(path: impl AsRef<Path>) -> Result<Self, BlueprintError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json_str(&text),
            _ => Self::from_yaml_str(&text),
        }
    }

    pub fn from_yaml_str(text: &str) -> Result<Self, BlueprintError> {
        let mut blueprint: Self = serde_yaml::from_str(text)?;
        blueprint.normalize();
        Ok(blueprint)
    }

    pub fn from_json_str(text: &str) -> Result<Self, BlueprintError> {
        let mut blueprint: Self = serde_json::from_str(text)?;
        blueprint.normalize();
        Ok(blueprint)
    }

    /// Bind every record to this blueprint's workflow and sort the steps
    fn normalize(&mut self) {
        let id = self.workflow.id.clone();
        for step in &mut self.workflow.steps {
            step.workflow_id = id.clone();
        }
        self.workflow.sort_steps();
        for condition in &mut self.conditions {
            condition.workflow_id = id.clone();
        }
        for group in &mut self.condition_groups {
            group.workflow_id = id.clone();
        }
        for group in &mut self.parallel_groups {
            group.workflow_id = id.clone();
        }
        for rule in &mut self.modification_rules {
            rule.workflow_id = id.clone();
        }
    }

    /// Every problem found in the blueprint. Empty means installable.
    pub fn validate(&self) -> Vec<String> {
        let wf = &self.workflow;
        let mut problems = wf.validate();

        for step in wf.steps.iter().filter(|s| s.active) {
            problems.extend(WeightageCalculator::validate_distribution(step));
        }

        let unknown = |step: &StepId| !wf.contains_step(step);
        for condition in &self.conditions {
            problems.extend(validate_condition(condition));
            if unknown(&condition.from_step) {
                problems.push(format!(
                    "condition {}: from_step {} is not a step of {}",
                    condition.id, condition.from_step, wf.id
                ));
            }
            if unknown(&condition.to_step) {
                problems.push(format!(
                    "condition {}: to_step {} is not a step of {}",
                    condition.id, condition.to_step, wf.id
                ));
            }
        }

        for group in &self.condition_groups {
            problems.extend(validate_condition_group(group));
        }

        for group in &self.parallel_groups {
            problems.extend(group.validate());
            let mut referenced = vec![&group.fork_from_step];
            referenced.extend(group.join_to_step.as_ref());
            referenced.extend(group.member_steps.iter());
            for step in referenced.into_iter().filter(|s| unknown(*s)) {
                problems.push(format!(
                    "parallel group {}: step {} is not a step of {}",
                    group.id, step, wf.id
                ));
            }
        }

        problems.extend(validate_modification_rules(&self.modification_rules));
        problems
    }

    /// Resolver backed by the blueprint's directory, or an empty one
    pub fn resolver(&self) -> ApproverResolver {
        ApproverResolver::new(Arc::new(self.directory.clone().unwrap_or_default()))
    }

    /// Write the blueprint to `store` in one batch, recording it as
    /// version 1 of the workflow.
    ///
    /// Validation is the caller's job; the store still rejects a workflow
    /// that already has versions.
    pub fn install(
        &self,
        store: &dyn ApprovalStore,
        by: &UserId,
    ) -> ApprovalResult<WorkflowVersion> {
        let mut workflow = self.workflow.clone();
        workflow.version = 1;
        let version =
            WorkflowVersion::capture(&workflow, 1, "initial version", by.clone(), Utc::now());

        let mut batch = WriteBatch::new();
        batch.put_workflow(workflow);
        for condition in &self.conditions {
            batch.push(WriteOp::PutCondition(condition.clone()));
        }
        for group in &self.condition_groups {
            batch.push(WriteOp::PutConditionGroup(group.clone()));
        }
        for group in &self.parallel_groups {
            batch.push(WriteOp::PutParallelGroup(group.clone()));
        }
        for rule in &self.modification_rules {
            batch.push(WriteOp::PutModificationRule(rule.clone()));
        }
        batch.push(WriteOp::InsertVersion(version.clone()));
        store.commit(batch)?;

        tracing::info!(
            workflow = %self.workflow.id,
            steps = self.workflow.steps.len(),
            conditions = self.conditions.len(),
            parallel_groups = self.parallel_groups.len(),
            "Blueprint installed"
        );
        Ok(version)
    }
}
