//! End-to-end test: condition-based routing between steps.

use crate::common::*;
use approval_engine::{Blueprint, ConditionEvaluator, Transition};
use approval_types::{Condition, ConditionGroup, GroupLogic, Operator, StepId};
use serde_json::json;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// start ─┬─ amount > 10000 (priority 10) ──▶ stepC
///        ├─ amount <= 10000 (priority 5) ─▶ stepB
///        └─ otherwise ────────────────────▶ review
fn routed() -> Blueprint {
    Blueprint::new(workflow(
        "purchase",
        "purchase_order",
        vec![
            step("start", 1, &[("lead", 1.0)]),
            step("review", 2, &[("reviewer", 1.0)]),
            step("stepB", 3, &[("manager", 1.0)]),
            step("stepC", 4, &[("cfo", 1.0)]),
        ],
    ))
    .with_condition(
        Condition::new("start", "stepB", "amount", Operator::Lte, json!(10000)).with_priority(5),
    )
    .with_condition(
        Condition::new("start", "stepC", "amount", Operator::Gt, json!(10000)).with_priority(10),
    )
}

fn first_hop(blueprint: Blueprint, data: serde_json::Value) -> Transition {
    let (engine, _) = engine_for(blueprint);
    let request = submit(&engine, "purchase_order", data);
    engine
        .approve(&request.id, &user("lead"), None)
        .unwrap()
        .transition
}

fn moved_to(step: &str) -> Transition {
    Transition::MovedTo {
        step: StepId::new(step),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[test]
fn large_amount_routes_to_high_priority_target() {
    assert_eq!(first_hop(routed(), json!({"amount": 15000})), moved_to("stepC"));
}

#[test]
fn small_amount_routes_to_lower_priority_target() {
    assert_eq!(first_hop(routed(), json!({"amount": 5000})), moved_to("stepB"));
}

#[test]
fn no_match_falls_back_to_sequence() {
    assert_eq!(first_hop(routed(), json!({"vendor": "acme"})), moved_to("review"));
}

#[test]
fn priority_wins_when_both_conditions_hold() {
    let blueprint = routed().with_condition(
        Condition::new("start", "review", "amount", Operator::Gte, json!(0)).with_priority(1),
    );
    assert_eq!(first_hop(blueprint.clone(), json!({"amount": 20000})), moved_to("stepC"));
    assert_eq!(first_hop(blueprint, json!({"amount": 100})), moved_to("stepB"));
}

#[test]
fn inactive_condition_is_ignored() {
    let blueprint = Blueprint::new(workflow(
        "purchase",
        "purchase_order",
        vec![
            step("start", 1, &[("lead", 1.0)]),
            step("review", 2, &[("reviewer", 1.0)]),
            step("stepC", 3, &[("cfo", 1.0)]),
        ],
    ))
    .with_condition(
        Condition::new("start", "stepC", "amount", Operator::Gt, json!(10000)).inactive(),
    );
    assert_eq!(first_hop(blueprint, json!({"amount": 50000})), moved_to("review"));
}

#[test]
fn dot_path_field_drives_routing() {
    let blueprint = Blueprint::new(workflow(
        "purchase",
        "purchase_order",
        vec![
            step("start", 1, &[("lead", 1.0)]),
            step("review", 2, &[("reviewer", 1.0)]),
            step("it", 3, &[("cio", 1.0)]),
        ],
    ))
    .with_condition(Condition::new(
        "start",
        "it",
        "department.code",
        Operator::In,
        json!(["IT", "SEC"]),
    ));
    assert_eq!(
        first_hop(blueprint.clone(), json!({"department": {"code": "SEC"}})),
        moved_to("it")
    );
    assert_eq!(
        first_hop(blueprint, json!({"department": {"code": "HR"}})),
        moved_to("review")
    );
}

#[test]
fn routed_request_completes_from_last_step() {
    let (engine, _) = engine_for(routed());
    let request = submit(&engine, "purchase_order", json!({"amount": 25000}));
    engine.approve(&request.id, &user("lead"), None).unwrap();
    let outcome = engine.approve(&request.id, &user("cfo"), None).unwrap();
    assert_eq!(outcome.transition, Transition::Completed);
}

#[test]
fn condition_group_combines_members() {
    let group = ConditionGroup::new("big_it_purchase", GroupLogic::And)
        .with_condition(Condition::predicate("amount", Operator::Gt, json!(1000)))
        .with_condition(Condition::predicate(
            "department.code",
            Operator::Eq,
            json!("IT"),
        ));
    let either = ConditionGroup {
        logic: GroupLogic::Or,
        ..group.clone()
    };

    let it_small = payload(json!({"amount": 10, "department": {"code": "IT"}}));
    let it_big = payload(json!({"amount": 5000, "department": {"code": "IT"}}));
    assert!(!ConditionEvaluator::evaluate_group(&group, &it_small));
    assert!(ConditionEvaluator::evaluate_group(&group, &it_big));
    assert!(ConditionEvaluator::evaluate_group(&either, &it_small));

    let empty = ConditionGroup::new("empty", GroupLogic::Or);
    assert!(!ConditionEvaluator::evaluate_group(&empty, &it_big));
}
