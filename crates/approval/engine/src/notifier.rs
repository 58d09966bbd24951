//! Notification collaborator contract
//!
//! Delivery is somebody else's problem. The engine calls the notifier
//! after a transition has been committed; a failure is logged and never
//! undoes the transition.

use crate::config::NotificationConfig;
use approval_types::{Request, RequestId, UserId};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

/// What the notification is about
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// A step is waiting on the recipients
    ApprovalRequired,
    Reminder,
    Escalated,
    Approved,
    Rejected,
    SentBack,
    Held,
    Cancelled,
}

impl std::fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::ApprovalRequired => "approval_required",
            Self::Reminder => "reminder",
            Self::Escalated => "escalated",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::SentBack => "sent_back",
            Self::Held => "held",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

/// Notification delivery errors
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("delivery over '{channel}' failed: {reason}")]
    Delivery { channel: String, reason: String },

    #[error("notifier unavailable: {0}")]
    Unavailable(String),
}

/// Delivers notifications about requests.
pub trait Notifier: Send + Sync {
    /// Tell `recipients` about `request`
    fn notify_approvers(
        &self,
        request: &Request,
        recipients: &[UserId],
        kind: NotificationKind,
        message: Option<&str>,
        channels: &[String],
    ) -> Result<(), NotifyError>;

    /// Tell the requester about `request`
    fn notify_creator(
        &self,
        request: &Request,
        kind: NotificationKind,
        message: Option<&str>,
        channels: &[String],
    ) -> Result<(), NotifyError>;
}

/// Logs every notification through `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify_approvers(
        &self,
        request: &Request,
        recipients: &[UserId],
        kind: NotificationKind,
        message: Option<&str>,
        channels: &[String],
    ) -> Result<(), NotifyError> {
        tracing::info!(
            request_id = %request.id,
            kind = %kind,
            recipients = recipients.len(),
            channels = ?channels,
            message = message.unwrap_or(""),
            "Notify approvers"
        );
        Ok(())
    }

    fn notify_creator(
        &self,
        request: &Request,
        kind: NotificationKind,
        message: Option<&str>,
        channels: &[String],
    ) -> Result<(), NotifyError> {
        tracing::info!(
            request_id = %request.id,
            requester = %request.requester,
            kind = %kind,
            channels = ?channels,
            message = message.unwrap_or(""),
            "Notify requester"
        );
        Ok(())
    }
}

/// Drops every notification
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn notify_approvers(
        &self,
        _request: &Request,
        _recipients: &[UserId],
        _kind: NotificationKind,
        _message: Option<&str>,
        _channels: &[String],
    ) -> Result<(), NotifyError> {
        Ok(())
    }

    fn notify_creator(
        &self,
        _request: &Request,
        _kind: NotificationKind,
        _message: Option<&str>,
        _channels: &[String],
    ) -> Result<(), NotifyError> {
        Ok(())
    }
}

/// A notification captured by [`RecordingNotifier`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentNotification {
    pub request_id: RequestId,
    /// Recipients; the requester alone for creator notifications
    pub recipients: Vec<UserId>,
    pub kind: NotificationKind,
    pub to_creator: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub channels: Vec<String>,
}

/// Keeps every notification in memory, for inspection
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<SentNotification>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything sent so far
    pub fn sent(&self) -> Vec<SentNotification> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    fn record(&self, notification: SentNotification) -> Result<(), NotifyError> {
        self.sent
            .lock()
            .map_err(|_| NotifyError::Unavailable("recording lock poisoned".to_string()))?
            .push(notification);
        Ok(())
    }
}

impl Notifier for RecordingNotifier {
    fn notify_approvers(
        &self,
        request: &Request,
        recipients: &[UserId],
        kind: NotificationKind,
        message: Option<&str>,
        channels: &[String],
    ) -> Result<(), NotifyError> {
        self.record(SentNotification {
            request_id: request.id.clone(),
            recipients: recipients.to_vec(),
            kind,
            to_creator: false,
            message: message.map(str::to_string),
            channels: channels.to_vec(),
        })
    }

    fn notify_creator(
        &self,
        request: &Request,
        kind: NotificationKind,
        message: Option<&str>,
        channels: &[String],
    ) -> Result<(), NotifyError> {
        self.record(SentNotification {
            request_id: request.id.clone(),
            recipients: vec![request.requester.clone()],
            kind,
            to_creator: true,
            message: message.map(str::to_string),
            channels: channels.to_vec(),
        })
    }
}

/// Applies the notification config and swallows delivery failures
#[derive(Clone)]
pub(crate) struct Dispatch {
    notifier: Arc<dyn Notifier>,
    config: NotificationConfig,
}

impl Dispatch {
    pub(crate) fn new(notifier: Arc<dyn Notifier>, config: NotificationConfig) -> Self {
        Self { notifier, config }
    }

    pub(crate) fn approvers(
        &self,
        request: &Request,
        recipients: &[UserId],
        kind: NotificationKind,
        message: Option<&str>,
    ) {
        if !self.config.enabled || recipients.is_empty() {
            return;
        }
        if let Err(e) = self.notifier.notify_approvers(
            request,
            recipients,
            kind,
            message,
            &self.config.channels,
        ) {
            tracing::warn!(request_id = %request.id, kind = %kind, error = %e, "Approver notification failed");
        }
    }

    pub(crate) fn creator(&self, request: &Request, kind: NotificationKind, message: Option<&str>) {
        if !self.config.enabled {
            return;
        }
        if let Err(e) = self
            .notifier
            .notify_creator(request, kind, message, &self.config.channels)
        {
            tracing::warn!(request_id = %request.id, kind = %kind, error = %e, "Requester notification failed");
        }
    }
}
