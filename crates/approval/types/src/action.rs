//! The append-only action log
//!
//! Every vote, rejection, send-back, hold, edit and escalation produces
//! one [`Action`]. Actions are never mutated or deleted.

use crate::{ActionId, ModificationId, RequestId, StepId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What happened
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionKind {
    Submitted,
    Approved,
    Rejected { reason: String },
    SentBack { to_step: StepId },
    Held,
    Resubmitted { changed_fields: usize },
    Cancelled { reason: String },
    Escalated { to_step: StepId },
    Skipped,
    Archived,
}

impl ActionKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Submitted => "submitted",
            Self::Approved => "approved",
            Self::Rejected { .. } => "rejected",
            Self::SentBack { .. } => "sent_back",
            Self::Held => "held",
            Self::Resubmitted { .. } => "resubmitted",
            Self::Cancelled { .. } => "cancelled",
            Self::Escalated { .. } => "escalated",
            Self::Skipped => "skipped",
            Self::Archived => "archived",
        }
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// One immutable audit entry
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub id: ActionId,
    pub request_id: RequestId,
    /// The step acted on, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_id: Option<StepId>,
    pub actor: UserId,
    pub kind: ActionKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remarks: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Action {
    pub fn new(request_id: RequestId, actor: UserId, kind: ActionKind) -> Self {
        Self {
            id: ActionId::generate(),
            request_id,
            step_id: None,
            actor,
            kind,
            remarks: None,
            created_at: Utc::now(),
        }
    }

    pub fn at_step(mut self, step: StepId) -> Self {
        self.step_id = Some(step);
        self
    }

    pub fn with_remarks(mut self, remarks: Option<String>) -> Self {
        self.remarks = remarks.filter(|r| !r.trim().is_empty());
        self
    }

    pub fn at(mut self, at: DateTime<Utc>) -> Self {
        self.created_at = at;
        self
    }

    pub fn is_approval(&self) -> bool {
        matches!(self.kind, ActionKind::Approved)
    }
}

/// One changed top-level field of a resubmitted snapshot
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    pub id: ModificationId,
    pub request_id: RequestId,
    pub field: String,
    /// `None` when the field was added
    pub old_value: Option<serde_json::Value>,
    /// `None` when the field was removed
    pub new_value: Option<serde_json::Value>,
    pub changed_by: UserId,
    pub changed_at: DateTime<Utc>,
}
