//! Identifiers for every persisted record.

use serde::{Deserialize, Serialize};

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            pub fn generate() -> Self {
                Self(uuid::Uuid::new_v4().to_string())
            }

            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// First eight characters, for log lines
            pub fn short(&self) -> &str {
                self.0.get(..8).unwrap_or(&self.0)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self::new(value)
            }
        }
    };
}

string_id!(
    /// Unique identifier for a workflow
    WorkflowId
);
string_id!(
    /// Unique identifier for a step within a workflow
    StepId
);
string_id!(
    /// Unique identifier for an approval request
    RequestId
);
string_id!(
    /// Identifier of a user as known to the surrounding application
    UserId
);
string_id!(
    /// Unique identifier for an audit action
    ActionId
);
string_id!(
    /// Unique identifier for a routing condition
    ConditionId
);
string_id!(
    /// Unique identifier for a condition group
    ConditionGroupId
);
string_id!(
    /// Unique identifier for a parallel step group
    ParallelGroupId
);
string_id!(
    /// Unique identifier for a parallel execution state
    ExecutionStateId
);
string_id!(
    /// Unique identifier for a modification rule
    ModificationRuleId
);
string_id!(
    /// Unique identifier for a dynamic modification or assignment record
    ModificationId
);
string_id!(
    /// Unique identifier for a workflow version snapshot
    VersionId
);
string_id!(
    /// Unique identifier for an escalation record
    EscalationId
);
