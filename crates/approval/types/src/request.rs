//! Requests and ballots: the runtime side of a workflow
//!
//! A request never references the consuming application's entities
//! directly. It holds an opaque subject tag + id and a serialized data
//! snapshot, which the router reads through dot-paths.

use crate::{RequestId, StepId, UserId, WorkflowId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Untyped routing payload, addressed by dot-path
pub type Payload = serde_json::Map<String, serde_json::Value>;

// ── Subject ──────────────────────────────────────────────────────────

/// The thing being approved, as an opaque type tag and id
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Subject {
    pub subject_type: String,
    pub subject_id: String,
}

impl Subject {
    pub fn new(subject_type: impl Into<String>, subject_id: impl Into<String>) -> Self {
        Self {
            subject_type: subject_type.into(),
            subject_id: subject_id.into(),
        }
    }
}

impl std::fmt::Display for Subject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.subject_type, self.subject_id)
    }
}

// ── Request Status ───────────────────────────────────────────────────

/// Lifecycle status of a request
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Draft,
    Submitted,
    Pending,
    Approved,
    Rejected,
    Cancelled,
    Archived,
}

impl RequestStatus {
    /// No voting or routing action is accepted in a terminal status
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Approved | Self::Rejected | Self::Cancelled | Self::Archived
        )
    }

    /// Submitted and waiting on approvers
    pub fn is_in_flight(&self) -> bool {
        matches!(self, Self::Submitted | Self::Pending)
    }
}

impl std::fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Draft => "draft",
            Self::Submitted => "submitted",
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Cancelled => "cancelled",
            Self::Archived => "archived",
        };
        write!(f, "{}", s)
    }
}

// ── Request ──────────────────────────────────────────────────────────

/// A subject submitted for approval
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Request {
    pub id: RequestId,
    pub workflow_id: WorkflowId,
    pub subject: Subject,
    pub requester: UserId,
    pub status: RequestStatus,
    /// Set while the request is in flight; may be empty for drafts
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_step: Option<StepId>,
    /// Routing payload
    #[serde(default)]
    pub data_snapshot: Payload,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sla_deadline: Option<DateTime<Utc>>,
    /// When the current step became current
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_entered_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_reminder_sent: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub submitted_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Request {
    /// Create a draft request with no current step
    pub fn draft(
        workflow_id: WorkflowId,
        subject: Subject,
        requester: UserId,
        data_snapshot: Payload,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: RequestId::generate(),
            workflow_id,
            subject,
            requester,
            status: RequestStatus::Draft,
            current_step: None,
            data_snapshot,
            sla_deadline: None,
            step_entered_at: None,
            last_reminder_sent: None,
            rejection_reason: None,
            submitted_at: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn is_in_flight(&self) -> bool {
        self.status.is_in_flight()
    }

    /// Mark the request approved at `now`
    pub fn complete(&mut self, now: DateTime<Utc>) {
        self.status = RequestStatus::Approved;
        self.completed_at = Some(now);
        self.sla_deadline = None;
        self.updated_at = now;
    }

    /// Mark the request rejected at `now`
    pub fn reject(&mut self, reason: impl Into<String>, now: DateTime<Utc>) {
        self.status = RequestStatus::Rejected;
        self.rejection_reason = Some(reason.into());
        self.completed_at = Some(now);
        self.sla_deadline = None;
        self.updated_at = now;
    }

    pub fn cancel(&mut self, now: DateTime<Utc>) {
        self.status = RequestStatus::Cancelled;
        self.completed_at = Some(now);
        self.sla_deadline = None;
        self.updated_at = now;
    }

    /// Look up a value in the snapshot by dot-path
    pub fn field(&self, path: &str) -> Option<&serde_json::Value> {
        lookup_path(&self.data_snapshot, path)
    }
}

/// Resolve a dot-path (`"department.code"`, `"items.0.sku"`) in a payload
pub fn lookup_path<'a>(payload: &'a Payload, path: &str) -> Option<&'a serde_json::Value> {
    let mut segments = path.split('.');
    let first = segments.next()?;
    let mut current = payload.get(first)?;
    for segment in segments {
        current = match current {
            serde_json::Value::Object(map) => map.get(segment)?,
            serde_json::Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

// ── Ballot ───────────────────────────────────────────────────────────

/// One approver's entry on a ballot
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BallotEntry {
    pub user_id: UserId,
    pub weightage: f64,
    pub approved: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approved_at: Option<DateTime<Utc>>,
}

impl BallotEntry {
    pub fn new(user_id: UserId, weightage: f64) -> Self {
        Self {
            user_id,
            weightage,
            approved: false,
            approved_at: None,
        }
    }

    pub fn approved(mut self, at: DateTime<Utc>) -> Self {
        self.approved = true;
        self.approved_at = Some(at);
        self
    }
}

/// The weighted votes for one step of one request
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Ballot {
    pub request_id: RequestId,
    pub step_id: StepId,
    pub entries: Vec<BallotEntry>,
    pub opened_at: DateTime<Utc>,
}

impl Ballot {
    pub fn new(request_id: RequestId, step_id: StepId) -> Self {
        Self {
            request_id,
            step_id,
            entries: Vec::new(),
            opened_at: Utc::now(),
        }
    }

    pub fn with_entry(mut self, entry: BallotEntry) -> Self {
        self.add_entry(entry);
        self
    }

    /// Add an entry; an existing entry for the same user is kept
    pub fn add_entry(&mut self, entry: BallotEntry) -> bool {
        if self.entry(&entry.user_id).is_some() {
            return false;
        }
        self.entries.push(entry);
        true
    }

    pub fn entry(&self, user: &UserId) -> Option<&BallotEntry> {
        self.entries.iter().find(|e| &e.user_id == user)
    }

    pub fn contains(&self, user: &UserId) -> bool {
        self.entry(user).is_some()
    }

    /// Record an approval from `user`.
    ///
    /// A user not on the ballot is added with `default_weightage`.
    /// Returns `false` if the user had already approved, in which case
    /// nothing changes.
    pub fn record_approval(
        &mut self,
        user: &UserId,
        default_weightage: f64,
        at: DateTime<Utc>,
    ) -> bool {
        match self.entries.iter_mut().find(|e| &e.user_id == user) {
            Some(entry) if entry.approved => false,
            Some(entry) => {
                entry.approved = true;
                entry.approved_at = Some(at);
                true
            }
            None => {
                self.entries
                    .push(BallotEntry::new(user.clone(), default_weightage).approved(at));
                true
            }
        }
    }

    /// Swap `original` for `replacement`, keeping the weight unless overridden
    pub fn replace_approver(
        &mut self,
        original: &UserId,
        replacement: UserId,
        weightage: Option<f64>,
    ) -> bool {
        if self.contains(&replacement) {
            return false;
        }
        match self.entries.iter_mut().find(|e| &e.user_id == original) {
            Some(entry) => {
                entry.user_id = replacement;
                if let Some(w) = weightage {
                    entry.weightage = w;
                }
                entry.approved = false;
                entry.approved_at = None;
                true
            }
            None => false,
        }
    }

    pub fn approvers(&self) -> Vec<UserId> {
        self.entries.iter().map(|e| e.user_id.clone()).collect()
    }

    pub fn pending_approvers(&self) -> Vec<UserId> {
        self.entries
            .iter()
            .filter(|e| !e.approved)
            .map(|e| e.user_id.clone())
            .collect()
    }

    pub fn approval_count(&self) -> usize {
        self.entries.iter().filter(|e| e.approved).count()
    }
}
