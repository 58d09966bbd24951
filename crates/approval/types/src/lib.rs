//! Approval Workflow Domain Types
//!
//! A request submitted for approval travels through the ordered steps of
//! a workflow. Each step collects weighted votes from its approvers, and
//! the workflow decides where the request goes next: the next step by
//! sequence, a step chosen by a routing condition, or a set of parallel
//! branches that later join back into a single path.
//!
//! # Key Concepts
//!
//! - **Workflow / Step**: the topology. Steps are ordered by a unique
//!   sequence and carry a voting mode and a consensus threshold.
//! - **Request**: a submitted subject moving through a workflow, with an
//!   opaque data snapshot used for routing.
//! - **Ballot**: the weighted votes collected for one step of one request.
//! - **Action**: the append-only audit log of everything done to a request.
//! - **Condition / ConditionGroup**: routing predicates over the snapshot.
//! - **ParallelStepGroup / ExecutionState**: fork/join across steps.
//! - **WorkflowModificationRule / WorkflowVersion**: gated runtime changes
//!   to topology and the snapshots that make them reversible.
//! - **Escalation**: the record of an SLA-driven or manual hand-off.

#![deny(unsafe_code)]

mod action;
mod condition;
mod dynamic;
mod errors;
mod escalation;
mod ids;
mod parallel;
mod request;
mod workflow;

pub use action::*;
pub use condition::*;
pub use dynamic::*;
pub use errors::*;
pub use escalation::*;
pub use ids::*;
pub use parallel::*;
pub use request::*;
pub use workflow::*;
