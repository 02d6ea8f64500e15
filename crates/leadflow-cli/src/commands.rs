use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Args, Subcommand};
use leadflow_core::stage::{catalog, ALTERNATE_STAGES, LINEAR_STAGES};
use leadflow_core::{NewLead, QualificationBlob, Stage};
use leadflow_engine::{
    AuditQuery, AutomationRequest, AutomationTriggerEngine, LifecycleError, LifecycleOrchestrator,
};
use serde_json::{json, Value};

const DEFAULT_DUE_LIMIT: u32 = 50;

#[derive(Subcommand, Debug)]
#[command(rename_all = "kebab-case")]
pub enum LeadCommand {
    Add(LeadAddArgs),
    Show(TargetArgs),
    /// Merge qualification answers (`--set key=value`, `key=null` clears)
    Qualify(LeadQualifyArgs),
    /// Record a touchpoint against the lead's current stage
    Touch(LeadTouchArgs),
}

#[derive(Subcommand, Debug)]
#[command(rename_all = "kebab-case")]
pub enum ReminderCommand {
    Due(ReminderDueArgs),
    Complete(ReminderTargetArgs),
}

#[derive(Args, Debug)]
pub struct TargetArgs {
    pub id: String,
}

#[derive(Args, Debug)]
pub struct TransitionArgs {
    pub id: String,
    pub stage: Stage,
}

#[derive(Args, Debug)]
pub struct LeadAddArgs {
    pub name: String,
    #[arg(long)]
    pub email: Option<String>,
    #[arg(long)]
    pub phone: Option<String>,
    #[arg(long)]
    pub stage: Option<Stage>,
    #[arg(long, default_value = "")]
    pub notes: String,
}

#[derive(Args, Debug)]
pub struct LeadQualifyArgs {
    pub id: String,
    #[arg(long = "set", required = true)]
    pub assignments: Vec<String>,
}

#[derive(Args, Debug)]
pub struct LeadTouchArgs {
    pub id: String,
    #[arg(long, default_value = "message")]
    pub kind: String,
    #[arg(long)]
    pub summary: String,
}

#[derive(Args, Debug)]
pub struct EventArgs {
    pub name: String,
    #[arg(long)]
    pub lead: Option<String>,
}

#[derive(Args, Debug)]
pub struct AuditArgs {
    #[arg(long)]
    pub lead: Option<String>,
    #[arg(long = "type")]
    pub event_type: Option<String>,
    #[arg(long, default_value_t = 1)]
    pub page: u32,
    #[arg(long)]
    pub page_size: Option<u32>,
}

#[derive(Args, Debug)]
pub struct ReminderDueArgs {
    #[arg(long, default_value_t = DEFAULT_DUE_LIMIT)]
    pub limit: u32,
}

#[derive(Args, Debug)]
pub struct ReminderTargetArgs {
    pub id: String,
}

pub fn handle_lead_command(
    orchestrator: &LifecycleOrchestrator,
    command: LeadCommand,
) -> Result<Value> {
    match command {
        LeadCommand::Add(args) => {
            let lead = orchestrator.create_lead(NewLead {
                name: args.name,
                email: args.email,
                phone: args.phone,
                stage: args.stage,
                notes: args.notes,
                qualification: QualificationBlob::new(),
            })?;
            to_value(&lead)
        }
        LeadCommand::Show(args) => {
            let lead = orchestrator.lead(&args.id)?;
            let reminders = orchestrator.pending_reminders(&args.id)?;
            Ok(json!({
                "lead": lead,
                "pending_reminders": reminders,
            }))
        }
        LeadCommand::Qualify(args) => {
            let patch = parse_assignments(&args.assignments)?;
            let lead = orchestrator.update_qualification(&args.id, &patch)?;
            let report = orchestrator.check_qualification(&args.id)?;
            Ok(json!({
                "lead": lead,
                "qualification": report,
            }))
        }
        LeadCommand::Touch(args) => {
            let interaction =
                orchestrator.record_interaction(&args.id, &args.kind, &args.summary)?;
            to_value(&interaction)
        }
    }
}

pub fn handle_reminder_command(
    orchestrator: &LifecycleOrchestrator,
    command: ReminderCommand,
) -> Result<Value> {
    match command {
        ReminderCommand::Due(args) => {
            let due = orchestrator.due_reminders(Utc::now(), args.limit)?;
            to_value(&due)
        }
        ReminderCommand::Complete(args) => {
            let reminder = orchestrator.complete_reminder(&args.id)?;
            to_value(&reminder)
        }
    }
}

pub fn advance(orchestrator: &LifecycleOrchestrator, args: &TargetArgs) -> Result<Value> {
    to_value(&orchestrator.advance(&args.id)?)
}

pub fn transition(orchestrator: &LifecycleOrchestrator, args: &TransitionArgs) -> Result<Value> {
    to_value(&orchestrator.transition(&args.id, args.stage)?)
}

pub fn check(orchestrator: &LifecycleOrchestrator, args: &TargetArgs) -> Result<Value> {
    to_value(&orchestrator.check_qualification(&args.id)?)
}

pub fn recommend(orchestrator: &LifecycleOrchestrator, args: &TargetArgs) -> Result<Value> {
    to_value(&orchestrator.get_stage_recommendations(&args.id)?)
}

pub fn event(engine: &AutomationTriggerEngine, args: &EventArgs) -> Result<Value> {
    let report = engine.handle_event(&AutomationRequest {
        event_name: args.name.clone(),
        lead_id: args.lead.clone(),
    });
    to_value(&report)
}

pub fn audit(orchestrator: &LifecycleOrchestrator, args: &AuditArgs) -> Result<Value> {
    let page = orchestrator.query_audit(&AuditQuery {
        lead_id: args.lead.clone(),
        event_type: args.event_type.clone(),
        page: args.page,
        page_size: args.page_size,
        ..AuditQuery::default()
    })?;
    to_value(&page)
}

pub fn stage_catalog() -> Value {
    json!({
        "linear": LINEAR_STAGES,
        "alternates": ALTERNATE_STAGES,
        "definitions": catalog(),
    })
}

pub fn lifecycle_error_json(err: &LifecycleError) -> Value {
    match err {
        LifecycleError::NotFound { entity, id } => json!({
            "error": "not_found",
            "entity": entity,
            "id": id,
        }),
        LifecycleError::ValidationDenied {
            reason,
            suggestions,
            required_path,
        } => json!({
            "error": "validation_denied",
            "reason": reason,
            "suggestions": suggestions,
            "required_path": required_path,
        }),
        LifecycleError::QualificationIncomplete {
            reason,
            missing_fields,
            suggestions,
        } => json!({
            "error": "qualification_incomplete",
            "reason": reason,
            "missing_fields": missing_fields,
            "suggestions": suggestions,
        }),
        LifecycleError::StageConflict { .. } | LifecycleError::Storage(_) => json!({
            "error": "transient_store_failure",
            "reason": err.to_string(),
            "retryable": err.is_retryable(),
        }),
    }
}

pub fn print_json(value: &Value) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value).context("Failed to render output")?;
    println!("{rendered}");
    Ok(())
}

fn to_value<T: serde::Serialize>(value: &T) -> Result<Value> {
    serde_json::to_value(value).context("Failed to serialize output")
}

/// `key=value` pairs; values that parse as JSON keep their type, anything else
/// is stored as a string.
fn parse_assignments(assignments: &[String]) -> Result<QualificationBlob> {
    let mut patch = QualificationBlob::new();
    for assignment in assignments {
        let Some((key, raw)) = assignment.split_once('=') else {
            bail!("expected key=value, got {assignment:?}");
        };
        let key = key.trim();
        if key.is_empty() {
            bail!("empty qualification key in {assignment:?}");
        }
        let raw = raw.trim();
        let value = serde_json::from_str::<Value>(raw).unwrap_or_else(|_| Value::from(raw));
        patch.insert(key.to_string(), value);
    }
    Ok(patch)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assignments_keep_json_types() {
        let patch = parse_assignments(&[
            "timeline=next spring".to_string(),
            "is_decision_maker=true".to_string(),
            "budget=1500".to_string(),
            "core_motivation=null".to_string(),
        ])
        .expect("parse");

        assert_eq!(patch["timeline"], json!("next spring"));
        assert_eq!(patch["is_decision_maker"], json!(true));
        assert_eq!(patch["budget"], json!(1500));
        assert!(patch["core_motivation"].is_null());
    }

    #[test]
    fn malformed_assignments_are_rejected() {
        assert!(parse_assignments(&["timeline".to_string()]).is_err());
        assert!(parse_assignments(&["=value".to_string()]).is_err());
    }

    #[test]
    fn denial_json_carries_required_path() {
        let value = lifecycle_error_json(&LifecycleError::ValidationDenied {
            reason: "cannot skip".to_string(),
            suggestions: vec!["Move to Warming Up first".to_string()],
            required_path: vec![Stage::WarmingUp, Stage::Invited],
        });
        assert_eq!(value["error"], "validation_denied");
        assert_eq!(value["required_path"], json!(["warming_up", "invited"]));
    }

    #[test]
    fn catalog_lists_every_stage() {
        let value = stage_catalog();
        assert_eq!(value["linear"].as_array().map(Vec::len), Some(7));
        assert_eq!(value["alternates"].as_array().map(Vec::len), Some(2));
        assert_eq!(value["definitions"].as_array().map(Vec::len), Some(9));
    }
}
