//! Escalation records: SLA-driven or manual hand-offs between steps

use crate::{EscalationId, RequestId, StepId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Why a request was escalated
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationReason {
    /// The step's SLA deadline passed
    SlaTimeout,
    /// Someone escalated by hand
    Manual,
}

impl std::fmt::Display for EscalationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SlaTimeout => write!(f, "sla_timeout"),
            Self::Manual => write!(f, "manual"),
        }
    }
}

/// One hand-off from an approver of the escalated step to an approver
/// of the step it was escalated to
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Escalation {
    pub id: EscalationId,
    pub request_id: RequestId,
    pub from_step: StepId,
    pub to_step: StepId,
    /// `None` when the escalated step had nobody on its ballot
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_user: Option<UserId>,
    /// `None` when the target step resolved to nobody, or per-request records
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to_user: Option<UserId>,
    pub reason: EscalationReason,
    pub escalated_at: DateTime<Utc>,
}

impl Escalation {
    pub fn new(
        request_id: RequestId,
        from_step: StepId,
        to_step: StepId,
        reason: EscalationReason,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: EscalationId::generate(),
            request_id,
            from_step,
            to_step,
            from_user: None,
            to_user: None,
            reason,
            escalated_at: at,
        }
    }

    pub fn between(mut self, from: Option<UserId>, to: Option<UserId>) -> Self {
        self.from_user = from;
        self.to_user = to;
        self
    }
}
