//! Routing conditions over a request's data snapshot

use crate::{ConditionGroupId, ConditionId, StepId, WorkflowId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ── Operator ─────────────────────────────────────────────────────────

/// The closed set of comparison operators
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Gte,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Lte,
    #[serde(rename = "in")]
    In,
    #[serde(rename = "not_in")]
    NotIn,
    #[serde(rename = "between")]
    Between,
    #[serde(rename = "contains")]
    Contains,
    #[serde(rename = "not_contains")]
    NotContains,
    #[serde(rename = "starts_with")]
    StartsWith,
    #[serde(rename = "ends_with")]
    EndsWith,
    #[serde(rename = "is_null")]
    IsNull,
    #[serde(rename = "is_not_null")]
    IsNotNull,
}

impl Operator {
    pub const ALL: [Operator; 15] = [
        Self::Eq,
        Self::Ne,
        Self::Gt,
        Self::Gte,
        Self::Lt,
        Self::Lte,
        Self::In,
        Self::NotIn,
        Self::Between,
        Self::Contains,
        Self::NotContains,
        Self::StartsWith,
        Self::EndsWith,
        Self::IsNull,
        Self::IsNotNull,
    ];

    /// The literal token used in condition definitions
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "!=",
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::Lt => "<",
            Self::Lte => "<=",
            Self::In => "in",
            Self::NotIn => "not_in",
            Self::Between => "between",
            Self::Contains => "contains",
            Self::NotContains => "not_contains",
            Self::StartsWith => "starts_with",
            Self::EndsWith => "ends_with",
            Self::IsNull => "is_null",
            Self::IsNotNull => "is_not_null",
        }
    }

    /// Ordering comparators that require numeric operands
    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Gt | Self::Gte | Self::Lt | Self::Lte | Self::Between)
    }

    /// Whether the operator reads the condition's compare value
    pub fn takes_value(&self) -> bool {
        !matches!(self, Self::IsNull | Self::IsNotNull)
    }
}

impl std::fmt::Display for Operator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unknown operator token
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown operator '{0}'")]
pub struct UnknownOperator(pub String);

impl std::str::FromStr for Operator {
    type Err = UnknownOperator;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let token = s.trim();
        Self::ALL
            .iter()
            .copied()
            .find(|op| op.as_str() == token)
            .ok_or_else(|| UnknownOperator(token.to_string()))
    }
}

// ── Condition ────────────────────────────────────────────────────────

/// A prioritized routing rule: when the predicate holds at `from_step`,
/// the request goes to `to_step`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    #[serde(default = "ConditionId::generate")]
    pub id: ConditionId,
    #[serde(default = "unassigned_workflow")]
    pub workflow_id: WorkflowId,
    pub from_step: StepId,
    pub to_step: StepId,
    /// Dot-path into the payload
    pub field: String,
    pub operator: Operator,
    #[serde(default)]
    pub value: Value,
    /// Higher priority is evaluated first
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_true")]
    pub active: bool,
}

fn default_true() -> bool {
    true
}

fn unassigned_workflow() -> WorkflowId {
    WorkflowId::new("")
}

impl Condition {
    pub fn new(
        from_step: impl Into<String>,
        to_step: impl Into<String>,
        field: impl Into<String>,
        operator: Operator,
        value: Value,
    ) -> Self {
        Self {
            id: ConditionId::generate(),
            workflow_id: unassigned_workflow(),
            from_step: StepId::new(from_step),
            to_step: StepId::new(to_step),
            field: field.into(),
            operator,
            value,
            priority: 0,
            active: true,
        }
    }

    /// A predicate-only condition, for use inside groups
    pub fn predicate(field: impl Into<String>, operator: Operator, value: Value) -> Self {
        Self::new("", "", field, operator, value)
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn in_workflow(mut self, workflow: WorkflowId) -> Self {
        self.workflow_id = workflow;
        self
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }

    /// Problems with the predicate's shape. Empty means valid.
    pub fn validate_predicate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        let label = &self.id;

        if self.field.trim().is_empty() {
            problems.push(format!("condition {}: field is empty", label));
        } else if self.field.split('.').any(|segment| segment.is_empty()) {
            problems.push(format!(
                "condition {}: field '{}' has an empty path segment",
                label, self.field
            ));
        }

        match self.operator {
            Operator::Between => match &self.value {
                Value::Array(bounds) if bounds.len() == 2 => {
                    if !bounds.iter().all(is_numeric) {
                        problems.push(format!(
                            "condition {}: 'between' bounds must both be numeric",
                            label
                        ));
                    }
                }
                _ => problems.push(format!(
                    "condition {}: 'between' requires exactly two values",
                    label
                )),
            },
            Operator::Gt | Operator::Gte | Operator::Lt | Operator::Lte => {
                if !is_numeric(&self.value) {
                    problems.push(format!(
                        "condition {}: '{}' requires a numeric value",
                        label, self.operator
                    ));
                }
            }
            Operator::In | Operator::NotIn => {
                if matches!(self.value, Value::Array(ref items) if items.is_empty()) {
                    problems.push(format!(
                        "condition {}: '{}' has an empty value list",
                        label, self.operator
                    ));
                }
            }
            Operator::StartsWith | Operator::EndsWith => {
                if !self.value.is_string() {
                    problems.push(format!(
                        "condition {}: '{}' requires a string value",
                        label, self.operator
                    ));
                }
            }
            Operator::Eq | Operator::Ne | Operator::Contains | Operator::NotContains => {
                if self.value.is_null() {
                    problems.push(format!(
                        "condition {}: '{}' has no compare value",
                        label, self.operator
                    ));
                }
            }
            Operator::IsNull | Operator::IsNotNull => {}
        }

        problems
    }

    /// Problems with the condition as a routing rule. Empty means valid.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = self.validate_predicate();
        if self.from_step.as_str().is_empty() {
            problems.push(format!("condition {}: from_step is empty", self.id));
        }
        if self.to_step.as_str().is_empty() {
            problems.push(format!("condition {}: to_step is empty", self.id));
        }
        if !self.from_step.as_str().is_empty() && self.from_step == self.to_step {
            problems.push(format!(
                "condition {}: routes step {} to itself",
                self.id, self.from_step
            ));
        }
        problems
    }
}

/// Numbers, and strings that parse as numbers
pub fn numeric_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        _ => None,
    }
}

fn is_numeric(value: &Value) -> bool {
    numeric_value(value).is_some()
}

// ── Condition Group ──────────────────────────────────────────────────

/// How a group combines its members
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupLogic {
    #[default]
    And,
    Or,
}

/// A named AND/OR aggregate of predicates
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConditionGroup {
    #[serde(default = "ConditionGroupId::generate")]
    pub id: ConditionGroupId,
    #[serde(default = "unassigned_workflow")]
    pub workflow_id: WorkflowId,
    pub name: String,
    #[serde(default)]
    pub logic: GroupLogic,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default = "default_true")]
    pub active: bool,
}

impl ConditionGroup {
    pub fn new(name: impl Into<String>, logic: GroupLogic) -> Self {
        Self {
            id: ConditionGroupId::generate(),
            workflow_id: unassigned_workflow(),
            name: name.into(),
            logic,
            conditions: Vec::new(),
            active: true,
        }
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.name.trim().is_empty() {
            problems.push(format!("condition group {}: name is empty", self.id));
        }
        if self.conditions.is_empty() {
            problems.push(format!("condition group '{}' has no conditions", self.name));
        }
        for condition in &self.conditions {
            problems.extend(
                condition
                    .validate_predicate()
                    .into_iter()
                    .map(|p| format!("group '{}': {}", self.name, p)),
            );
        }
        problems
    }
}
