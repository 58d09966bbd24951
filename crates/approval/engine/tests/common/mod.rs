//! Shared fixtures for the integration suites.

#![allow(dead_code)]

use approval_engine::{ApprovalEngine, Blueprint, EngineConfig, InMemoryStore, RecordingNotifier};
use approval_types::{Payload, Request, Step, StepApprover, Subject, UserId, Workflow};
use std::sync::Arc;

pub fn user(id: &str) -> UserId {
    UserId::new(id)
}

/// A step voted on by the given users with the given weights
pub fn step(id: &str, sequence: u32, approvers: &[(&str, f64)]) -> Step {
    approvers
        .iter()
        .fold(Step::new(id, id, sequence), |step, (who, weight)| {
            step.with_approver(StepApprover::user(*who, *weight))
        })
}

pub fn workflow(id: &str, subject_type: &str, steps: Vec<Step>) -> Workflow {
    steps
        .into_iter()
        .try_fold(Workflow::new(id, subject_type).with_id(id), |wf, s| wf.with_step(s))
        .unwrap()
}

pub fn payload(value: serde_json::Value) -> Payload {
    value.as_object().cloned().unwrap_or_default()
}

/// Install `blueprint` into a fresh in-memory store
pub fn engine_for(blueprint: Blueprint) -> (ApprovalEngine, Arc<RecordingNotifier>) {
    engine_with_config(blueprint, EngineConfig::default())
}

pub fn engine_with_config(
    blueprint: Blueprint,
    config: EngineConfig,
) -> (ApprovalEngine, Arc<RecordingNotifier>) {
    let problems = blueprint.validate();
    assert!(problems.is_empty(), "blueprint problems: {:?}", problems);

    let store = Arc::new(InMemoryStore::new());
    blueprint.install(store.as_ref(), &user("admin")).unwrap();
    let notifier = Arc::new(RecordingNotifier::new());
    let engine = ApprovalEngine::builder(store)
        .with_resolver(blueprint.resolver())
        .with_notifier(notifier.clone())
        .with_config(config)
        .build();
    (engine, notifier)
}

pub fn submit(engine: &ApprovalEngine, subject_type: &str, data: serde_json::Value) -> Request {
    engine
        .submit(Subject::new(subject_type, "1"), user("requester"), payload(data))
        .unwrap()
}
