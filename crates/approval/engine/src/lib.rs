//! Approval Workflow Runtime
//!
//! Moves requests through multi-step approval workflows: weighted
//! consensus per step, condition-based routing between steps, fork/join
//! across parallel steps, rule-gated runtime changes with versioned
//! snapshots, and SLA escalation.
//!
//! # Key Principle
//!
//! **One operation, one batch.** Every mutating call runs under the
//! request's lock and commits its ballot update, transition and audit
//! entries through a single [`WriteBatch`]. Notifications are sent after
//! the commit and never roll it back.
//!
//! # Architecture
//!
//! The [`ApprovalEngine`] owns the request state machine and hands out
//! components that share its store and locks:
//!
//! - [`ParallelWorkflowManager`]: Forks parallel groups and joins them
//! - [`DynamicWorkflowManager`]: Adds, removes and skips steps, assigns approvers, rolls back versions
//! - [`EscalationService`]: Escalates overdue requests and sends reminders
//!
//! Stateless helpers: [`ConditionEvaluator`] for routing predicates and
//! [`WeightageCalculator`] for consensus.
//!
//! Collaborators are traits: [`ApprovalStore`] for persistence,
//! [`Notifier`] for delivery, [`Directory`] and [`ApproverStrategy`] for
//! approver resolution.
//!
//! # Example
//!
//! ```rust
//! use approval_engine::{ApprovalEngine, Blueprint, InMemoryStore, Transition};
//! use approval_types::*;
//! use std::sync::Arc;
//!
//! let workflow = Workflow::new("Leave", "leave_request")
//!     .with_id("leave")
//!     .with_step(Step::new("lead", "Team Lead", 1).with_approver(StepApprover::user("bob", 1.0)))
//!     .unwrap()
//!     .with_step(Step::new("hr", "HR", 2).with_approver(StepApprover::user("hana", 1.0)))
//!     .unwrap();
//!
//! let store = Arc::new(InMemoryStore::new());
//! Blueprint::new(workflow).install(store.as_ref(), &UserId::new("admin")).unwrap();
//! let engine = ApprovalEngine::new(store);
//!
//! let request = engine
//!     .submit(Subject::new("leave_request", "42"), UserId::new("alice"), Payload::new())
//!     .unwrap();
//! let outcome = engine.approve(&request.id, &UserId::new("bob"), None).unwrap();
//! assert_eq!(outcome.transition, Transition::MovedTo { step: StepId::new("hr") });
//!
//! let outcome = engine.approve(&request.id, &UserId::new("hana"), None).unwrap();
//! assert_eq!(outcome.request.status, RequestStatus::Approved);
//! ```

#![deny(unsafe_code)]

pub mod blueprint;
pub mod condition_evaluator;
pub mod config;
pub mod dynamic;
pub mod engine;
pub mod escalation;
pub mod locks;
pub mod notifier;
pub mod parallel;
pub mod resolver;
pub mod store;
pub mod weightage;

mod transition;

// Re-export main types
pub use blueprint::{Blueprint, BlueprintError};
pub use condition_evaluator::{validate_condition, validate_condition_group, ConditionEvaluator};
pub use config::{
    ConfigError, EngineConfig, EscalationConfig, EscalationRecordPolicy, NotificationConfig,
};
pub use dynamic::{ApproverChange, DynamicWorkflowManager, Modified, SkipOutcome};
pub use engine::{
    ActionOutcome, ApprovalEngine, ApprovalEngineBuilder, ApprovalProgress, BranchVote,
};
pub use escalation::{EscalationOutcome, EscalationReport, EscalationService};
pub use locks::KeyedLocks;
pub use notifier::{
    NoopNotifier, NotificationKind, Notifier, NotifyError, RecordingNotifier, SentNotification,
    TracingNotifier,
};
pub use parallel::{ParallelWorkflowManager, SyncOutcome};
pub use resolver::{
    ApproverResolver, ApproverStrategy, Directory, ResolutionContext, StaticDirectory,
};
pub use store::{ApprovalStore, InMemoryStore, WriteBatch, WriteOp};
pub use transition::Transition;
pub use weightage::{ApproverShare, ConsensusBreakdown, WeightageCalculator};
