//! Engine configuration
//!
//! Everything the engine would otherwise look up from ambient state is
//! carried here and injected at construction.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Configuration loading errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid configuration: {}", .0.join("; "))]
    Invalid(Vec<String>),
}

/// Main engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Actor recorded on actions the engine takes by itself
    #[serde(default = "default_system_actor")]
    pub system_actor: String,

    /// Weight given to a voter who is not on the step's ballot
    #[serde(default = "default_weightage")]
    pub default_weightage: f64,

    /// Top-level snapshot keys ignored when diffing a resubmission
    #[serde(default = "default_system_fields")]
    pub system_fields: Vec<String>,

    /// Notification configuration
    #[serde(default)]
    pub notifications: NotificationConfig,

    /// Escalation configuration
    #[serde(default)]
    pub escalation: EscalationConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            system_actor: default_system_actor(),
            default_weightage: default_weightage(),
            system_fields: default_system_fields(),
            notifications: NotificationConfig::default(),
            escalation: EscalationConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load and validate a YAML configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&text)
    }

    /// Parse and validate YAML configuration text
    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(text)?;
        let problems = config.validate();
        if !problems.is_empty() {
            return Err(ConfigError::Invalid(problems));
        }
        Ok(config)
    }

    /// Problems with this configuration. Empty means valid.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.system_actor.trim().is_empty() {
            problems.push("system_actor must not be empty".to_string());
        }
        if !self.default_weightage.is_finite() || self.default_weightage <= 0.0 {
            problems.push(format!(
                "default_weightage must be positive, got {}",
                self.default_weightage
            ));
        }
        if self.notifications.enabled && self.notifications.channels.is_empty() {
            problems.push("notifications are enabled but no channels are configured".to_string());
        }
        if self.escalation.reminder_interval_hours == 0 {
            problems.push("escalation.reminder_interval_hours must be at least 1".to_string());
        }
        if self.escalation.max_pair_records == 0 {
            problems.push("escalation.max_pair_records must be at least 1".to_string());
        }
        problems
    }

    /// Whether `field` is excluded from resubmission diffs
    pub fn is_system_field(&self, field: &str) -> bool {
        self.system_fields.iter().any(|f| f == field)
    }
}

/// Notification configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Channels passed to the notifier on every notification
    #[serde(default = "default_channels")]
    pub channels: Vec<String>,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            channels: default_channels(),
        }
    }
}

/// How escalation hand-offs are recorded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationRecordPolicy {
    /// One record per (current approver, next approver) pair
    #[default]
    PerPair,
    /// One record per escalated request
    PerRequest,
}

/// Escalation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationConfig {
    /// Minimum hours between two reminders for the same request
    #[serde(default = "default_reminder_interval")]
    pub reminder_interval_hours: u32,

    #[serde(default)]
    pub record_policy: EscalationRecordPolicy,

    /// Cap on per-pair records for one escalation
    #[serde(default = "default_max_pair_records")]
    pub max_pair_records: usize,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            reminder_interval_hours: default_reminder_interval(),
            record_policy: EscalationRecordPolicy::default(),
            max_pair_records: default_max_pair_records(),
        }
    }
}

fn default_system_actor() -> String {
    "system".to_string()
}

fn default_weightage() -> f64 {
    1.0
}

fn default_system_fields() -> Vec<String> {
    [
        "id",
        "created_at",
        "updated_at",
        "deleted_at",
        "status",
        "current_step",
        "submitted_at",
        "completed_at",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_true() -> bool {
    true
}

fn default_channels() -> Vec<String> {
    vec!["email".to_string(), "real-time".to_string()]
}

fn default_reminder_interval() -> u32 {
    6
}

fn default_max_pair_records() -> usize {
    100
}
