//! End-to-end test: concurrent votes and forks on one request.

use crate::common::*;
use approval_engine::{Blueprint, Transition};
use approval_types::{ApprovalError, ParallelStepGroup, StepId, SyncPolicy};
use serde_json::json;
use std::thread;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[test]
fn concurrent_votes_advance_exactly_once() {
    let voters: Vec<String> = (0..10).map(|i| format!("u{}", i)).collect();
    let weights: Vec<(&str, f64)> = voters.iter().map(|v| (v.as_str(), 1.0)).collect();
    let (engine, _) = engine_for(Blueprint::new(workflow(
        "board",
        "resolution",
        vec![step("board", 1, &weights), step("chair", 2, &[("chair", 1.0)])],
    )));
    let request = submit(&engine, "resolution", json!({}));

    let transitions: Vec<Transition> = thread::scope(|scope| {
        let handles: Vec<_> = voters
            .iter()
            .map(|voter| {
                let engine = engine.clone();
                let id = request.id.clone();
                scope.spawn(move || engine.approve(&id, &user(voter), None).unwrap().transition)
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let advanced = transitions
        .iter()
        .filter(|t| matches!(t, Transition::MovedTo { .. }))
        .count();
    assert_eq!(advanced, 1);

    let ballot = engine
        .ballot(&request.id, &StepId::new("board"))
        .unwrap()
        .unwrap();
    assert_eq!(ballot.approval_count(), 10);
    assert_eq!(
        engine.request(&request.id).unwrap().current_step,
        Some(StepId::new("chair"))
    );
}

#[test]
fn concurrent_forks_start_one_execution() {
    let (engine, _) = engine_for(
        Blueprint::new(workflow(
            "review",
            "contract",
            vec![
                step("s1", 1, &[("lead", 1.0)]),
                step("a", 2, &[("x", 1.0)]),
                step("b", 3, &[("y", 1.0)]),
            ],
        ))
        .with_parallel_group(ParallelStepGroup::new(
            "checks",
            "s1",
            SyncPolicy::All,
            vec![StepId::new("a"), StepId::new("b")],
        )),
    );
    let request = submit(&engine, "contract", json!({}));
    let parallel = engine.parallel();

    let results: Vec<_> = thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let parallel = parallel.clone();
                let id = request.id.clone();
                scope.spawn(move || parallel.fork(&id, &StepId::new("s1")))
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let started = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(started, 1);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| matches!(e, ApprovalError::ParallelExecutionInProgress(_))));
    assert_eq!(engine.execution_states(&request.id).unwrap().len(), 1);
}

#[test]
fn concurrent_requests_do_not_block_each_other() {
    let (engine, _) = engine_for(Blueprint::new(workflow(
        "leave",
        "leave",
        vec![step("lead", 1, &[("bob", 1.0)])],
    )));
    let requests: Vec<_> = (0..16)
        .map(|i| {
            engine
                .submit(
                    approval_types::Subject::new("leave", i.to_string()),
                    user("requester"),
                    payload(json!({})),
                )
                .unwrap()
        })
        .collect();

    thread::scope(|scope| {
        for request in &requests {
            let engine = engine.clone();
            scope.spawn(move || {
                let outcome = engine.approve(&request.id, &user("bob"), None).unwrap();
                assert_eq!(outcome.transition, Transition::Completed);
            });
        }
    });

    assert!(requests.iter().all(|r| engine.request(&r.id).unwrap().is_terminal()));
}
