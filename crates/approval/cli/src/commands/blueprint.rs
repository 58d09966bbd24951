//! Blueprint inspection commands

use crate::error::{CliError, CliResult};
use crate::output::{self, OutputFormat};
use approval_engine::Blueprint;
use approval_types::ApprovalType;
use colored::Colorize;
use serde::Serialize;
use std::path::Path;
use tabled::Tabled;

#[derive(Debug, Serialize)]
struct ValidationResult<'a> {
    workflow: &'a str,
    valid: bool,
    problems: &'a [String],
}

/// Check a blueprint. Fails when it has any problem.
pub fn validate(path: &Path, format: OutputFormat) -> CliResult<()> {
    let blueprint = Blueprint::load(path)?;
    let problems = blueprint.validate();
    tracing::debug!(
        workflow = %blueprint.workflow.id,
        problems = problems.len(),
        "Blueprint validated"
    );

    let result = ValidationResult {
        workflow: blueprint.workflow.id.as_str(),
        valid: problems.is_empty(),
        problems: &problems,
    };
    if !output::print_structured(&result, format)? {
        if problems.is_empty() {
            output::print_success(&format!(
                "{} ({} steps) is valid",
                blueprint.workflow.id,
                blueprint.workflow.steps.len()
            ));
        } else {
            for problem in &problems {
                output::print_problem(problem);
            }
        }
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(CliError::InvalidBlueprint(problems.len()))
    }
}

#[derive(Debug, Serialize, Tabled)]
struct StepRow {
    #[tabled(rename = "#")]
    sequence: u32,
    id: String,
    name: String,
    mode: String,
    threshold: String,
    sla: String,
    approvers: String,
}

#[derive(Debug, Serialize, Tabled)]
struct ConditionRow {
    from: String,
    to: String,
    rule: String,
    priority: i32,
    active: bool,
}

#[derive(Debug, Serialize, Tabled)]
struct GroupRow {
    id: String,
    fork: String,
    members: String,
    join: String,
    sync: String,
}

fn mode_label(mode: ApprovalType) -> &'static str {
    match mode {
        ApprovalType::Serial => "serial",
        ApprovalType::Parallel => "parallel",
        ApprovalType::AnyOne => "any one",
    }
}

/// Print a blueprint in full
pub fn show(path: &Path, format: OutputFormat) -> CliResult<()> {
    let blueprint = Blueprint::load(path)?;
    if output::print_structured(&blueprint, format)? {
        return Ok(());
    }

    let wf = &blueprint.workflow;
    output::print_header(&format!("Workflow {} ({})", wf.name, wf.id));
    output::print_field("Subject type", &wf.subject_type);
    output::print_field("Version", wf.version);
    output::print_field(
        "Active",
        if wf.active { "yes".green() } else { "no".red() },
    );
    println!();

    println!("{}", "Steps".bold());
    output::print_table(
        wf.steps
            .iter()
            .filter(|s| s.active)
            .map(|s| StepRow {
                sequence: s.sequence,
                id: s.id.to_string(),
                name: s.name.clone(),
                mode: mode_label(s.approval_type).to_string(),
                threshold: format!("{}%", s.minimum_approval_percentage),
                sla: s
                    .sla_hours
                    .map(|h| format!("{}h", h))
                    .unwrap_or_else(|| "-".to_string()),
                approvers: s
                    .approvers
                    .iter()
                    .map(|a| format!("{}:{} ({})", a.approver_type, a.reference, a.weightage))
                    .collect::<Vec<_>>()
                    .join(", "),
            })
            .collect(),
    );

    println!("{}", "Routing".bold());
    output::print_table(
        blueprint
            .conditions
            .iter()
            .map(|c| ConditionRow {
                from: c.from_step.to_string(),
                to: c.to_step.to_string(),
                rule: format!("{} {} {}", c.field, c.operator, c.value),
                priority: c.priority,
                active: c.active,
            })
            .collect(),
    );

    println!("{}", "Parallel groups".bold());
    output::print_table(
        blueprint
            .parallel_groups
            .iter()
            .map(|g| GroupRow {
                id: g.id.to_string(),
                fork: g.fork_from_step.to_string(),
                members: g
                    .member_steps
                    .iter()
                    .map(|s| s.to_string())
                    .collect::<Vec<_>>()
                    .join(", "),
                join: g
                    .join_to_step
                    .as_ref()
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "next in sequence".to_string()),
                sync: g.sync.to_string(),
            })
            .collect(),
    );

    if !blueprint.modification_rules.is_empty() {
        println!("{}", "Runtime changes allowed".bold());
        for rule in &blueprint.modification_rules {
            let reason = if rule.requires_reason {
                " (reason required)"
            } else {
                ""
            };
            println!("  {}{}", rule.kind, reason.dimmed());
        }
    }
    Ok(())
}
