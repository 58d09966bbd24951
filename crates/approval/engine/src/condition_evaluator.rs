//! Condition Evaluator - routing predicates over a request snapshot
//!
//! Pure functions. Each operator maps to one comparator in a closed
//! table, so adding an operator without a comparator does not compile.

use approval_types::{
    lookup_path, numeric_value, Condition, ConditionGroup, GroupLogic, Operator, Payload, StepId,
};
use serde_json::Value;

type Comparator = fn(Option<&Value>, &Value) -> bool;

/// Evaluates conditions and condition groups
pub struct ConditionEvaluator;

impl ConditionEvaluator {
    /// Does `condition` hold for `payload`?
    pub fn evaluate(condition: &Condition, payload: &Payload) -> bool {
        let field = lookup_path(payload, &condition.field);
        comparator(condition.operator)(field, &condition.value)
    }

    /// Target of the highest-priority active condition leaving `from_step`
    /// that holds for `payload`.
    ///
    /// `None` means no condition matched and the caller should fall back
    /// to sequential routing. Equal priorities keep their given order.
    pub fn find_next_step(
        conditions: &[Condition],
        from_step: &StepId,
        payload: &Payload,
    ) -> Option<StepId> {
        let mut candidates: Vec<&Condition> = conditions
            .iter()
            .filter(|c| c.active && &c.from_step == from_step)
            .collect();
        candidates.sort_by(|a, b| b.priority.cmp(&a.priority));

        for condition in candidates {
            let matched = Self::evaluate(condition, payload);
            tracing::debug!(
                condition = %condition.id,
                field = %condition.field,
                operator = %condition.operator,
                priority = condition.priority,
                matched,
                "Evaluated routing condition"
            );
            if matched {
                return Some(condition.to_step.clone());
            }
        }
        None
    }

    /// Combine a group's active members with its AND/OR logic.
    ///
    /// Inactive or empty groups never hold.
    pub fn evaluate_group(group: &ConditionGroup, payload: &Payload) -> bool {
        if !group.active {
            return false;
        }
        let mut members = group.conditions.iter().filter(|c| c.active).peekable();
        if members.peek().is_none() {
            return false;
        }
        match group.logic {
            GroupLogic::And => members.all(|c| Self::evaluate(c, payload)),
            GroupLogic::Or => members.any(|c| Self::evaluate(c, payload)),
        }
    }
}

/// Problems with a condition definition. Empty means valid.
pub fn validate_condition(condition: &Condition) -> Vec<String> {
    condition.validate()
}

/// Problems with a condition group definition. Empty means valid.
pub fn validate_condition_group(group: &ConditionGroup) -> Vec<String> {
    group.validate()
}

// ── Comparator Table ─────────────────────────────────────────────────

fn comparator(operator: Operator) -> Comparator {
    match operator {
        Operator::Eq => |field, value| field.is_some_and(|f| loose_eq(f, value)),
        Operator::Ne => |field, value| !loose_eq(field.unwrap_or(&Value::Null), value),
        Operator::Gt => |field, value| numeric_pair(field, value).is_some_and(|(f, v)| f > v),
        Operator::Gte => |field, value| numeric_pair(field, value).is_some_and(|(f, v)| f >= v),
        Operator::Lt => |field, value| numeric_pair(field, value).is_some_and(|(f, v)| f < v),
        Operator::Lte => |field, value| numeric_pair(field, value).is_some_and(|(f, v)| f <= v),
        Operator::In => in_set,
        Operator::NotIn => |field, value| !in_set(field, value),
        Operator::Between => between,
        Operator::Contains => contains,
        Operator::NotContains => |field, value| !contains(field, value),
        Operator::StartsWith => |field, value| {
            string_pair(field, value).is_some_and(|(f, v)| f.starts_with(v.as_str()))
        },
        Operator::EndsWith => |field, value| {
            string_pair(field, value).is_some_and(|(f, v)| f.ends_with(v.as_str()))
        },
        Operator::IsNull => |field, _| field.map_or(true, Value::is_null),
        Operator::IsNotNull => |field, _| field.is_some_and(|f| !f.is_null()),
    }
}

/// Numbers compare numerically, other scalars by their string form
fn loose_eq(left: &Value, right: &Value) -> bool {
    if let (Some(l), Some(r)) = (numeric_value(left), numeric_value(right)) {
        return (l - r).abs() < f64::EPSILON;
    }
    match (scalar_text(left), scalar_text(right)) {
        (Some(l), Some(r)) => l == r,
        _ => left == right,
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn numeric_pair(field: Option<&Value>, value: &Value) -> Option<(f64, f64)> {
    Some((numeric_value(field?)?, numeric_value(value)?))
}

fn string_pair(field: Option<&Value>, value: &Value) -> Option<(String, String)> {
    Some((scalar_text(field?)?, scalar_text(value)?))
}

fn in_set(field: Option<&Value>, value: &Value) -> bool {
    let Some(field) = field else {
        return false;
    };
    match value {
        Value::Array(items) => items.iter().any(|item| loose_eq(field, item)),
        scalar => loose_eq(field, scalar),
    }
}

fn between(field: Option<&Value>, value: &Value) -> bool {
    let Value::Array(bounds) = value else {
        return false;
    };
    let [low, high] = bounds.as_slice() else {
        return false;
    };
    match (
        field.and_then(numeric_value),
        numeric_value(low),
        numeric_value(high),
    ) {
        (Some(f), Some(a), Some(b)) => f >= a.min(b) && f <= a.max(b),
        _ => false,
    }
}

fn contains(field: Option<&Value>, value: &Value) -> bool {
    match field {
        Some(Value::Array(items)) => items.iter().any(|item| loose_eq(item, value)),
        Some(other) => match (scalar_text(other), scalar_text(value)) {
            (Some(haystack), Some(needle)) => haystack.contains(&needle),
            _ => false,
        },
        None => false,
    }
}
