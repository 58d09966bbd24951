//! Scenario replay
//!
//! A script names a subject, a requester and an opening payload, then
//! lists actions in order. Each action runs against a fresh in-memory
//! engine loaded with the blueprint:
//!
//! ```yaml
//! subject: { subject_type: purchase_order, subject_id: PO-7 }
//! requester: alice
//! data: { amount: 25000 }
//! steps:
//!   - action: submit
//!   - { action: approve, user: bob }
//!   - { action: check_overdue, after_hours: 72 }
//! ```

use crate::error::{CliError, CliResult};
use crate::output::{self, OutputFormat};
use approval_engine::{
    ApprovalEngine, ApprovalProgress, Blueprint, EngineConfig, InMemoryStore, RecordingNotifier,
    SentNotification, SyncOutcome, Transition,
};
use approval_types::{
    Action, EscalationReason, Payload, Request, RequestId, RequestStatus, StepId, Subject,
    UserId, WorkflowId,
};
use chrono::{Duration, Utc};
use colored::Colorize;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tabled::Tabled;

/// Actor recorded on the blueprint's version 1
const INSTALLER: &str = "approvalctl";

// ── Script ───────────────────────────────────────────────────────────

/// A scenario to replay
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Script {
    pub subject: Subject,
    pub requester: UserId,
    /// Payload submitted with the request
    #[serde(default)]
    pub data: Payload,
    pub steps: Vec<ScriptStep>,
}

impl Script {
    /// Read a script file; `.json` files are parsed as JSON, anything
    /// else as YAML
    pub fn load(path: &Path) -> CliResult<Self> {
        let text = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Ok(serde_json::from_str(&text)?),
            _ => Ok(serde_yaml::from_str(&text)?),
        }
    }
}

fn manual() -> EscalationReason {
    EscalationReason::Manual
}

/// One scripted action
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ScriptStep {
    /// Submit the script's subject and payload
    Submit,
    Approve {
        user: UserId,
        #[serde(default)]
        remarks: Option<String>,
    },
    Reject {
        user: UserId,
        reason: String,
        #[serde(default)]
        remarks: Option<String>,
    },
    SendBack {
        user: UserId,
        #[serde(default)]
        remarks: Option<String>,
    },
    Hold {
        user: UserId,
        #[serde(default)]
        remarks: Option<String>,
    },
    /// Edit the payload of a rejected request and submit it again
    Resubmit {
        user: UserId,
        data: Payload,
        #[serde(default)]
        remarks: Option<String>,
    },
    ApproveBranch {
        step: StepId,
        user: UserId,
        #[serde(default)]
        remarks: Option<String>,
    },
    RejectBranch {
        step: StepId,
        user: UserId,
        reason: String,
        #[serde(default)]
        remarks: Option<String>,
    },
    Cancel {
        user: UserId,
        reason: String,
    },
    Archive {
        user: UserId,
    },
    SkipStep {
        step: StepId,
        by: UserId,
        #[serde(default)]
        reason: Option<String>,
    },
    /// Hand the request to the next step now
    Escalate {
        #[serde(default = "manual")]
        reason: EscalationReason,
    },
    /// Run the overdue scan as if `after_hours` had passed
    CheckOverdue { after_hours: i64 },
    /// Run the reminder scan as if `after_hours` had passed
    Remind { after_hours: i64 },
}

impl ScriptStep {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Submit => "submit",
            Self::Approve { .. } => "approve",
            Self::Reject { .. } => "reject",
            Self::SendBack { .. } => "send_back",
            Self::Hold { .. } => "hold",
            Self::Resubmit { .. } => "resubmit",
            Self::ApproveBranch { .. } => "approve_branch",
            Self::RejectBranch { .. } => "reject_branch",
            Self::Cancel { .. } => "cancel",
            Self::Archive { .. } => "archive",
            Self::SkipStep { .. } => "skip_step",
            Self::Escalate { .. } => "escalate",
            Self::CheckOverdue { .. } => "check_overdue",
            Self::Remind { .. } => "remind",
        }
    }
}

// ── Report ───────────────────────────────────────────────────────────

/// What one scripted action did
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepReport {
    pub index: usize,
    pub action: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<RequestStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_step: Option<StepId>,
    /// Outcome, or the engine's refusal
    pub detail: String,
}

/// Everything a replay produced
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationReport {
    pub workflow: WorkflowId,
    pub steps: Vec<StepReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request: Option<Request>,
    pub history: Vec<Action>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<ApprovalProgress>,
    pub notifications: Vec<SentNotification>,
}

impl SimulationReport {
    pub fn failures(&self) -> usize {
        self.steps.iter().filter(|s| !s.ok).count()
    }
}

// ── Replay ───────────────────────────────────────────────────────────

/// Replay `script` against a fresh engine loaded with `blueprint`.
///
/// Actions the engine refuses are recorded and the replay goes on,
/// unless `fail_fast` is set. Script mistakes always stop it.
pub fn run_script(
    blueprint: &Blueprint,
    config: EngineConfig,
    script: &Script,
    fail_fast: bool,
) -> CliResult<SimulationReport> {
    let problems = blueprint.validate();
    if !problems.is_empty() {
        for problem in &problems {
            tracing::warn!(workflow = %blueprint.workflow.id, "{}", problem);
        }
        return Err(CliError::InvalidBlueprint(problems.len()));
    }
    let config_problems = config.validate();
    if !config_problems.is_empty() {
        return Err(approval_engine::ConfigError::Invalid(config_problems).into());
    }

    let store = Arc::new(InMemoryStore::new());
    blueprint.install(store.as_ref(), &UserId::new(INSTALLER))?;
    let notifier = Arc::new(RecordingNotifier::new());
    let engine = ApprovalEngine::builder(store)
        .with_resolver(blueprint.resolver())
        .with_notifier(notifier.clone())
        .with_config(config)
        .build();

    let mut replay = Replay {
        engine: &engine,
        script,
        request_id: None,
    };
    let mut steps = Vec::with_capacity(script.steps.len());

    for (index, step) in script.steps.iter().enumerate() {
        let (ok, detail) = match replay.apply(step) {
            Ok(detail) => (true, detail),
            Err(CliError::Approval(e)) if !fail_fast => {
                tracing::debug!(index, action = step.name(), error = %e, "Action refused");
                (false, e.to_string())
            }
            Err(e) => return Err(e),
        };
        let request = replay.current()?;
        steps.push(StepReport {
            index: index + 1,
            action: step.name().to_string(),
            ok,
            status: request.as_ref().map(|r| r.status),
            current_step: request.and_then(|r| r.current_step),
            detail,
        });
    }

    let (request, history, progress) = match &replay.request_id {
        Some(id) => (
            Some(engine.request(id)?),
            engine.history(id)?,
            Some(engine.calculate_approval_progress(id)?),
        ),
        None => (None, Vec::new(), None),
    };

    Ok(SimulationReport {
        workflow: blueprint.workflow.id.clone(),
        steps,
        request,
        history,
        progress,
        notifications: notifier.sent(),
    })
}

struct Replay<'a> {
    engine: &'a ApprovalEngine,
    script: &'a Script,
    request_id: Option<RequestId>,
}

impl Replay<'_> {
    fn current(&self) -> CliResult<Option<Request>> {
        match &self.request_id {
            Some(id) => Ok(Some(self.engine.request(id)?)),
            None => Ok(None),
        }
    }

    fn submitted(&self, action: &str) -> CliResult<&RequestId> {
        self.request_id
            .as_ref()
            .ok_or_else(|| CliError::Script(format!("{} before submit", action)))
    }

    fn apply(&mut self, step: &ScriptStep) -> CliResult<String> {
        if let ScriptStep::Submit = step {
            return self.submit();
        }
        let id = self.submitted(step.name())?.clone();
        self.act(&id, step)
    }

    fn submit(&mut self) -> CliResult<String> {
        if self.request_id.is_some() {
            return Err(CliError::Script("the script submits twice".to_string()));
        }
        let request = self.engine.submit(
            self.script.subject.clone(),
            self.script.requester.clone(),
            self.script.data.clone(),
        )?;
        let detail = format!("submitted at {}", step_label(&request.current_step));
        self.request_id = Some(request.id);
        Ok(detail)
    }

    fn act(&self, id: &RequestId, step: &ScriptStep) -> CliResult<String> {
        let engine = self.engine;
        let detail = match step {
            ScriptStep::Submit => {
                return Err(CliError::Script("the script submits twice".to_string()))
            }
            ScriptStep::Approve { user, remarks } => {
                describe(&engine.approve(id, user, remarks.clone())?.transition)
            }
            ScriptStep::Reject {
                user,
                reason,
                remarks,
            } => {
                engine.reject(id, user, reason.as_str(), remarks.clone())?;
                "rejected".to_string()
            }
            ScriptStep::SendBack { user, remarks } => {
                let request = engine.send_back(id, user, remarks.clone())?;
                format!("sent back to {}", step_label(&request.current_step))
            }
            ScriptStep::Hold { user, remarks } => {
                engine.hold(id, user, remarks.clone())?;
                "on hold".to_string()
            }
            ScriptStep::Resubmit {
                user,
                data,
                remarks,
            } => {
                let request = engine.edit_and_resubmit(id, data.clone(), user, remarks.clone())?;
                format!("resubmitted at {}", step_label(&request.current_step))
            }
            ScriptStep::ApproveBranch {
                step,
                user,
                remarks,
            } => {
                let vote = engine.approve_branch(id, step, user, remarks.clone())?;
                match vote.sync {
                    Some(SyncOutcome::Waiting {
                        completed,
                        required,
                    }) => format!("{} done, {}/{} branches", step, completed, required),
                    Some(SyncOutcome::Joined {
                        join_step: Some(join),
                    }) => format!("joined at {}", join),
                    Some(SyncOutcome::Joined { join_step: None }) => {
                        "joined, request approved".to_string()
                    }
                    Some(SyncOutcome::AlreadyCompleted) => "group already joined".to_string(),
                    Some(SyncOutcome::Failed) => "group failed".to_string(),
                    None => format!("{} waiting at {:.1}%", step, vote.percentage),
                }
            }
            ScriptStep::RejectBranch {
                step,
                user,
                reason,
                remarks,
            } => {
                engine.reject_branch(id, step, user, reason.as_str(), remarks.clone())?;
                format!("rejected at branch {}", step)
            }
            ScriptStep::Cancel { user, reason } => {
                engine.cancel(id, user, reason.as_str())?;
                "cancelled".to_string()
            }
            ScriptStep::Archive { user } => {
                engine.archive(id, user)?;
                "archived".to_string()
            }
            ScriptStep::SkipStep { step, by, reason } => {
                let outcome = engine.dynamic().skip_step(id, step, by, reason.clone())?;
                match outcome.transition {
                    Some(transition) => format!("{} skipped, {}", step, describe(&transition)),
                    None => format!("{} skipped", step),
                }
            }
            ScriptStep::Escalate { reason } => {
                match engine.escalation().escalate_request(id, reason.clone())? {
                    Some(outcome) => {
                        format!("escalated {} -> {}", outcome.from_step, outcome.to_step)
                    }
                    None => "already at the last step".to_string(),
                }
            }
            ScriptStep::CheckOverdue { after_hours } => {
                let report = engine
                    .escalation()
                    .check_overdue_approvals(Utc::now() + Duration::hours(*after_hours))?;
                format!(
                    "{} overdue, {} escalated",
                    report.overdue,
                    report.escalated.len()
                )
            }
            ScriptStep::Remind { after_hours } => {
                let sent = engine
                    .escalation()
                    .send_reminders(Utc::now() + Duration::hours(*after_hours))?;
                format!("{} reminder(s) sent", sent)
            }
        };
        Ok(detail)
    }
}

fn step_label(step: &Option<StepId>) -> String {
    step.as_ref()
        .map(|s| s.to_string())
        .unwrap_or_else(|| "-".to_string())
}

fn describe(transition: &Transition) -> String {
    match transition {
        Transition::Waiting { percentage } => format!("waiting at {:.1}%", percentage),
        Transition::MovedTo { step } => format!("moved to {}", step),
        Transition::Forked { groups } => format!("forked {} parallel group(s)", groups.len()),
        Transition::Completed => "approved".to_string(),
    }
}

// ── Command ──────────────────────────────────────────────────────────

#[derive(Tabled)]
struct StepRow {
    #[tabled(rename = "#")]
    index: usize,
    action: String,
    result: String,
    status: String,
    step: String,
    detail: String,
}

#[derive(Tabled)]
struct ActionRow {
    at: String,
    actor: String,
    action: String,
    step: String,
    remarks: String,
}

pub fn execute(
    blueprint: &Path,
    script: &Path,
    config: Option<&Path>,
    fail_fast: bool,
    format: OutputFormat,
) -> CliResult<()> {
    let blueprint = Blueprint::load(blueprint)?;
    let script = Script::load(script)?;
    let config = match config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };

    let report = run_script(&blueprint, config, &script, fail_fast)?;
    if output::print_structured(&report, format)? {
        return Ok(());
    }
    print_report(&report);
    Ok(())
}

fn print_report(report: &SimulationReport) {
    output::print_header(&format!("Simulation of {}", report.workflow));
    output::print_table(
        report
            .steps
            .iter()
            .map(|s| StepRow {
                index: s.index,
                action: s.action.clone(),
                result: if s.ok {
                    "ok".green().to_string()
                } else {
                    "refused".red().to_string()
                },
                status: s
                    .status
                    .map(|st| st.to_string())
                    .unwrap_or_else(|| "-".to_string()),
                step: step_label(&s.current_step),
                detail: s.detail.clone(),
            })
            .collect(),
    );
    println!();

    if let Some(request) = &report.request {
        println!("{}", "Request".bold());
        output::print_field("Id", &request.id);
        output::print_field("Subject", &request.subject);
        output::print_field("Status", status_colored(request.status));
        output::print_field("Current step", step_label(&request.current_step));
        if let Some(reason) = &request.rejection_reason {
            output::print_field("Rejected for", reason);
        }
        if let Some(progress) = &report.progress {
            output::print_field(
                "Progress",
                format!(
                    "{}/{} steps ({:.1}%)",
                    progress.completed_steps, progress.total_steps, progress.percentage
                ),
            );
        }
        output::print_field("Notifications", report.notifications.len());
        println!();
    }

    println!("{}", "Action log".bold());
    output::print_table(
        report
            .history
            .iter()
            .map(|a| ActionRow {
                at: a.created_at.format("%H:%M:%S%.3f").to_string(),
                actor: a.actor.to_string(),
                action: a.kind.to_string(),
                step: step_label(&a.step_id),
                remarks: a.remarks.clone().unwrap_or_default(),
            })
            .collect(),
    );

    let failures = report.failures();
    if failures > 0 {
        println!();
        println!(
            "{} {} action(s) refused by the engine",
            "⚠".yellow(),
            failures
        );
    }
}

fn status_colored(status: RequestStatus) -> colored::ColoredString {
    let label = status.to_string();
    match status {
        RequestStatus::Approved => label.green(),
        RequestStatus::Rejected | RequestStatus::Cancelled => label.red(),
        RequestStatus::Pending | RequestStatus::Submitted => label.yellow(),
        RequestStatus::Draft | RequestStatus::Archived => label.dimmed(),
    }
}
