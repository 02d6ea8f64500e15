use crate::activity::{self, transition_score};
use crate::audit::{AuditLog, AuditQuery};
use crate::automation::{AutomationDispatcher, AutomationRequest};
use crate::qualification::{MoveCheck, QualificationReport};
use crate::scheduler::{ReminderScheduler, ScheduleOptions};
use crate::validator::{StageRecommendation, StageTransitionValidator, TransitionDecision};
use crate::{EngineConfig, LifecycleError};
use chrono::{DateTime, Duration, Utc};
use leadflow_core::stage::definition;
use leadflow_core::{
    new_id, AuditEvent, AuditEventType, Interaction, Lead, NewLead, Page, QualificationBlob,
    Reminder, Stage, StageDefinition,
};
use leadflow_storage::{lock_store, LeadStore, SharedStore};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, warn};

const STAGE_CHANGE_TOUCHPOINT: &str = "stage_change";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageRecommendations {
    pub lead_id: String,
    pub current_stage: Stage,
    pub qualification_score: u8,
    pub missing_fields: Vec<String>,
    pub next_valid_stages: Vec<Stage>,
    pub recommended: StageRecommendation,
}

/// Entry point for lead lifecycle changes. Holds the store lock for the whole
/// read-validate-write sequence and writes every side effect of a transition
/// in one transaction.
pub struct LifecycleOrchestrator {
    store: SharedStore,
    config: EngineConfig,
    validator: StageTransitionValidator,
    scheduler: ReminderScheduler,
    audit: AuditLog,
    automation: Option<AutomationDispatcher>,
    actor_id: Option<String>,
}

impl LifecycleOrchestrator {
    pub fn new(store: SharedStore, config: EngineConfig) -> Self {
        Self {
            validator: StageTransitionValidator::new(&config),
            scheduler: ReminderScheduler::new(),
            audit: AuditLog::new(&config),
            store,
            config,
            automation: None,
            actor_id: None,
        }
    }

    pub fn with_automation(mut self, dispatcher: AutomationDispatcher) -> Self {
        self.automation = Some(dispatcher);
        self
    }

    pub fn with_actor(mut self, actor_id: impl Into<String>) -> Self {
        let actor_id = actor_id.into();
        self.actor_id = (!actor_id.trim().is_empty()).then_some(actor_id);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    pub fn create_lead(&self, input: NewLead) -> Result<Lead, LifecycleError> {
        self.create_lead_at(input, Utc::now())
    }

    /// Records a new lead with its initial follow-up reminder and a
    /// `lead_created` audit event.
    pub fn create_lead_at(&self, input: NewLead, now: DateTime<Utc>) -> Result<Lead, LifecycleError> {
        if input.name.trim().is_empty() {
            return Err(LifecycleError::ValidationDenied {
                reason: "lead name is required".to_string(),
                suggestions: Vec::new(),
                required_path: Vec::new(),
            });
        }

        let store = lock_store(&self.store)?;
        let tx = store.begin()?;
        let lead = store.insert_lead(&input, now)?;
        let stage_definition = definition(lead.stage);
        store.update_lead_stage(
            &lead.id,
            lead.stage,
            lead.stage,
            &next_action_text(&stage_definition),
            now + cadence(&stage_definition),
            now,
        )?;
        self.audit.record(
            &store,
            AuditEventType::LeadCreated,
            json!({
                "name": lead.name,
                "stage": lead.stage,
                "stage_label": lead.stage.label(),
            }),
            Some(&lead.id),
            self.actor(),
            now,
        )?;
        self.scheduler.schedule(
            &store,
            &lead.id,
            lead.stage,
            ScheduleOptions {
                skip_if_exists: true,
                ..ScheduleOptions::default()
            },
            now,
        )?;
        tx.commit()?;

        info!(event = "lead_created", lead_id = %lead.id, stage = %lead.stage);
        load_lead(&store, &lead.id)
    }

    pub fn lead(&self, lead_id: &str) -> Result<Lead, LifecycleError> {
        let store = lock_store(&self.store)?;
        load_lead(&store, lead_id)
    }

    pub fn transition(&self, lead_id: &str, new_stage: Stage) -> Result<Lead, LifecycleError> {
        self.transition_at(lead_id, new_stage, Utc::now())
    }

    pub fn transition_at(
        &self,
        lead_id: &str,
        new_stage: Stage,
        now: DateTime<Utc>,
    ) -> Result<Lead, LifecycleError> {
        let store = lock_store(&self.store)?;
        let lead = load_lead(&store, lead_id)?;
        self.apply_transition(&store, lead, new_stage, now)
    }

    pub fn advance(&self, lead_id: &str) -> Result<Lead, LifecycleError> {
        self.advance_at(lead_id, Utc::now())
    }

    /// Moves the lead to the first entry of [`Self::next_valid_stages`].
    pub fn advance_at(&self, lead_id: &str, now: DateTime<Utc>) -> Result<Lead, LifecycleError> {
        let store = lock_store(&self.store)?;
        let lead = load_lead(&store, lead_id)?;
        let Some(next) = self.validator.next_valid_stages(lead.stage).first().copied() else {
            return Err(LifecycleError::ValidationDenied {
                reason: format!("{} has no next stage", lead.stage.label()),
                suggestions: Vec::new(),
                required_path: Vec::new(),
            });
        };
        self.apply_transition(&store, lead, next, now)
    }

    fn apply_transition(
        &self,
        store: &LeadStore,
        lead: Lead,
        to: Stage,
        now: DateTime<Utc>,
    ) -> Result<Lead, LifecycleError> {
        let from = lead.stage;
        if from == to {
            debug!(event = "transition_unchanged", lead_id = %lead.id, stage = %to);
            return Ok(lead);
        }

        let decision = self.validator.validate(store, &lead.id, from, to)?;
        if !decision.allowed {
            debug!(
                event = "transition_denied",
                lead_id = %lead.id,
                from = %from,
                to = %to,
                reason = decision.reason.as_deref().unwrap_or_default()
            );
            return Err(decision.into_error());
        }

        let previous = definition(from);
        let target = definition(to);

        let tx = store.begin()?;
        let written = store.update_lead_stage(
            &lead.id,
            from,
            to,
            &next_action_text(&target),
            now + cadence(&target),
            now,
        )?;
        if !written {
            return Err(LifecycleError::StageConflict {
                lead_id: lead.id.clone(),
                expected: from,
            });
        }

        self.audit.record(
            store,
            AuditEventType::StatusChanged,
            json!({
                "from": from,
                "to": to,
                "from_label": from.label(),
                "to_label": to.label(),
                "kind": decision.kind,
            }),
            Some(&lead.id),
            self.actor(),
            now,
        )?;

        let snapshot = activity::snapshot(
            store,
            &lead.id,
            &previous,
            self.config.activity_target_touchpoints,
            now,
        )?;
        store.record_interaction(&Interaction {
            id: new_id(),
            lead_id: lead.id.clone(),
            kind: STAGE_CHANGE_TOUCHPOINT.to_string(),
            stage: to,
            summary: format!("Moved from {} to {}", from.label(), to.label()),
            occurred_at: now,
        })?;

        if previous.reminder_type != target.reminder_type {
            let cancelled = self
                .scheduler
                .cancel_pending(store, &lead.id, previous.reminder_type, now)?;
            if cancelled > 0 {
                debug!(
                    event = "reminders_cancelled",
                    lead_id = %lead.id,
                    reminder_type = previous.reminder_type,
                    count = cancelled
                );
            }
        }
        let scheduled = self.scheduler.schedule(
            store,
            &lead.id,
            to,
            ScheduleOptions {
                context: Some(format!("entered from {}", from.label())),
                skip_if_exists: true,
                ..ScheduleOptions::default()
            },
            now,
        )?;

        let hours_in_previous_stage =
            (now - lead.stage_entered_at).num_seconds().max(0) as f64 / 3600.0;
        let score = transition_score(
            hours_in_previous_stage,
            previous.cadence_hours,
            snapshot.activity_score,
            &self.config.risk,
        );

        self.audit.record(
            store,
            AuditEventType::StageTransition,
            json!({
                "from": from,
                "to": to,
                "cadence_hours": previous.cadence_hours,
                "hours_in_previous_stage": (hours_in_previous_stage * 100.0).round() / 100.0,
                "score": score.score,
                "risk_level": score.risk_level,
                "touchpoints": snapshot.touchpoints,
                "activity_score": snapshot.activity_score,
                "recommended_action": snapshot.recommended_action,
                "reminder_id": scheduled.reminder.id,
            }),
            Some(&lead.id),
            self.actor(),
            now,
        )?;
        tx.commit()?;

        let updated = load_lead(store, &lead.id)?;
        info!(
            event = "stage_transition",
            lead_id = %updated.id,
            from = %from,
            to = %to,
            score = score.score,
            risk_level = %score.risk_level
        );
        self.fire_entry_events(&updated);
        Ok(updated)
    }

    fn fire_entry_events(&self, lead: &Lead) {
        for (stage, automation_event) in &self.config.entry_events {
            if *stage != lead.stage {
                continue;
            }
            let Some(dispatcher) = &self.automation else {
                debug!(event = "automation_disabled", lead_id = %lead.id, name = %automation_event);
                continue;
            };
            if let Err(err) =
                dispatcher.dispatch(AutomationRequest::new(*automation_event, lead.id.clone()))
            {
                warn!(
                    event = "automation_failed",
                    lead_id = %lead.id,
                    name = %automation_event,
                    error = %err
                );
            }
        }
    }

    pub fn check_qualification(&self, lead_id: &str) -> Result<QualificationReport, LifecycleError> {
        let store = lock_store(&self.store)?;
        self.validator.gate().check_qualification(&store, lead_id)
    }

    pub fn can_move_to_stage(&self, lead_id: &str, target: Stage) -> Result<MoveCheck, LifecycleError> {
        let store = lock_store(&self.store)?;
        self.validator.gate().can_move_to_stage(&store, lead_id, target)
    }

    /// Dry run of a transition from the lead's current stage.
    pub fn validate(&self, lead_id: &str, target: Stage) -> Result<TransitionDecision, LifecycleError> {
        let store = lock_store(&self.store)?;
        let lead = load_lead(&store, lead_id)?;
        self.validator.validate(&store, lead_id, lead.stage, target)
    }

    pub fn next_valid_stages(&self, current: Stage) -> Vec<Stage> {
        self.validator.next_valid_stages(current)
    }

    pub fn get_stage_recommendations(
        &self,
        lead_id: &str,
    ) -> Result<StageRecommendations, LifecycleError> {
        let store = lock_store(&self.store)?;
        let lead = load_lead(&store, lead_id)?;
        let report = self.validator.gate().evaluate(&lead);
        let recommended = self.validator.recommend(lead.stage, &report);

        Ok(StageRecommendations {
            lead_id: lead.id,
            current_stage: lead.stage,
            qualification_score: report.score,
            next_valid_stages: self.validator.next_valid_stages(lead.stage),
            missing_fields: report.missing_fields,
            recommended,
        })
    }

    pub fn update_qualification(
        &self,
        lead_id: &str,
        patch: &QualificationBlob,
    ) -> Result<Lead, LifecycleError> {
        self.update_qualification_at(lead_id, patch, Utc::now())
    }

    pub fn update_qualification_at(
        &self,
        lead_id: &str,
        patch: &QualificationBlob,
        now: DateTime<Utc>,
    ) -> Result<Lead, LifecycleError> {
        let store = lock_store(&self.store)?;
        let tx = store.begin()?;
        let lead = store
            .merge_qualification(lead_id, patch, now)?
            .ok_or_else(|| LifecycleError::lead_not_found(lead_id))?;
        let report = self.validator.gate().evaluate(&lead);
        self.audit.record(
            &store,
            AuditEventType::QualificationUpdated,
            json!({
                "fields": patch.keys().collect::<Vec<_>>(),
                "score": report.score,
                "is_qualified": report.is_qualified,
                "missing_fields": report.missing_fields,
            }),
            Some(lead_id),
            self.actor(),
            now,
        )?;
        tx.commit()?;

        debug!(event = "qualification_updated", lead_id = %lead_id, score = report.score);
        Ok(lead)
    }

    pub fn record_interaction(
        &self,
        lead_id: &str,
        kind: &str,
        summary: &str,
    ) -> Result<Interaction, LifecycleError> {
        self.record_interaction_at(lead_id, kind, summary, Utc::now())
    }

    /// Logs a real touchpoint against the lead's current stage.
    pub fn record_interaction_at(
        &self,
        lead_id: &str,
        kind: &str,
        summary: &str,
        now: DateTime<Utc>,
    ) -> Result<Interaction, LifecycleError> {
        let store = lock_store(&self.store)?;
        let lead = load_lead(&store, lead_id)?;
        let interaction = Interaction {
            id: new_id(),
            lead_id: lead.id,
            kind: kind.trim().to_string(),
            stage: lead.stage,
            summary: summary.trim().to_string(),
            occurred_at: now,
        };
        store.record_interaction(&interaction)?;
        Ok(interaction)
    }

    pub fn complete_reminder(&self, reminder_id: &str) -> Result<Reminder, LifecycleError> {
        self.complete_reminder_at(reminder_id, Utc::now())
    }

    pub fn complete_reminder_at(
        &self,
        reminder_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Reminder, LifecycleError> {
        let store = lock_store(&self.store)?;
        let tx = store.begin()?;
        let reminder = self.scheduler.mark_completed(&store, reminder_id)?;
        self.audit.record(
            &store,
            AuditEventType::ReminderCompleted,
            json!({
                "reminder_id": reminder.id,
                "reminder_type": reminder.reminder_type,
            }),
            Some(&reminder.lead_id),
            self.actor(),
            now,
        )?;
        tx.commit()?;
        Ok(reminder)
    }

    pub fn query_audit(&self, query: &AuditQuery) -> Result<Page<AuditEvent>, LifecycleError> {
        let store = lock_store(&self.store)?;
        Ok(self.audit.query(&store, query)?)
    }

    pub fn due_reminders(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<Reminder>, LifecycleError> {
        let store = lock_store(&self.store)?;
        Ok(store.due_reminders(now, limit)?)
    }

    pub fn pending_reminders(&self, lead_id: &str) -> Result<Vec<Reminder>, LifecycleError> {
        let store = lock_store(&self.store)?;
        load_lead(&store, lead_id)?;
        Ok(store.pending_reminders_for_lead(lead_id)?)
    }

    fn actor(&self) -> Option<&str> {
        self.actor_id.as_deref()
    }
}

fn load_lead(store: &LeadStore, lead_id: &str) -> Result<Lead, LifecycleError> {
    store
        .lead(lead_id)?
        .ok_or_else(|| LifecycleError::lead_not_found(lead_id))
}

fn next_action_text(stage_definition: &StageDefinition) -> String {
    format!(
        "{} (via {})",
        stage_definition.next_action, stage_definition.touchpoint
    )
}

fn cadence(stage_definition: &StageDefinition) -> Duration {
    Duration::hours(i64::from(stage_definition.cadence_hours))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::automation::automation_channel;
    use crate::validator::DecisionKind;
    use chrono::TimeZone;
    use leadflow_core::RiskLevel;
    use leadflow_storage::shared;
    use serde_json::{Map, Value};

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 9, 21, 8, 0, 0)
            .single()
            .expect("valid timestamp")
    }

    fn orchestrator() -> LifecycleOrchestrator {
        let store = shared(LeadStore::open_in_memory().expect("db"));
        LifecycleOrchestrator::new(store, EngineConfig::default()).with_actor("coach-1")
    }

    fn new_lead(name: &str) -> NewLead {
        NewLead {
            name: name.to_string(),
            ..NewLead::default()
        }
    }

    fn full_qualification() -> QualificationBlob {
        let mut blob = Map::new();
        blob.insert("core_motivation".to_string(), Value::from("more time with family"));
        blob.insert("desired_outcome".to_string(), Value::from("replace salary"));
        blob.insert("timeline".to_string(), Value::from("6 months"));
        blob.insert("is_decision_maker".to_string(), Value::from(true));
        blob
    }

    fn events_of(
        orchestrator: &LifecycleOrchestrator,
        lead_id: &str,
        event_type: &str,
    ) -> Vec<AuditEvent> {
        orchestrator
            .query_audit(&AuditQuery {
                lead_id: Some(lead_id.to_string()),
                event_type: Some(event_type.to_string()),
                ..AuditQuery::default()
            })
            .expect("audit")
            .items
    }

    #[test]
    fn create_lead_sets_next_action_and_initial_reminder() {
        let orchestrator = orchestrator();
        let lead = orchestrator.create_lead_at(new_lead("Avery"), ts()).expect("create");

        assert_eq!(lead.stage, Stage::NewLead);
        assert_eq!(lead.next_action_date, Some(ts() + Duration::hours(24)));
        assert!(lead
            .next_action
            .as_deref()
            .is_some_and(|action| action.ends_with("(via message)")));

        let pending = orchestrator.pending_reminders(&lead.id).expect("pending");
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].reminder_type, "new_lead_follow_up");

        let created = events_of(&orchestrator, &lead.id, "lead_created");
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].actor_id.as_deref(), Some("coach-1"));
    }

    #[test]
    fn blank_name_is_rejected() {
        let err = orchestrator()
            .create_lead_at(new_lead("  "), ts())
            .expect_err("blank name");
        assert!(matches!(err, LifecycleError::ValidationDenied { .. }));
    }

    #[test]
    fn transition_writes_stage_reminders_and_audit_trail() {
        let orchestrator = orchestrator();
        let lead = orchestrator.create_lead_at(new_lead("Blair"), ts()).expect("create");

        let moved = orchestrator
            .transition_at(&lead.id, Stage::WarmingUp, ts() + Duration::hours(6))
            .expect("transition");
        assert_eq!(moved.stage, Stage::WarmingUp);
        assert_eq!(moved.stage_entered_at, ts() + Duration::hours(6));

        let pending = orchestrator.pending_reminders(&lead.id).expect("pending");
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].reminder_type, "warming_up_follow_up");

        let status = events_of(&orchestrator, &lead.id, "status_changed");
        assert_eq!(status.len(), 1);
        assert_eq!(status[0].payload["from"], "new_lead");
        assert_eq!(status[0].payload["to"], "warming_up");
        assert_eq!(status[0].payload["kind"], "forward");

        let transitions = events_of(&orchestrator, &lead.id, "stage_transition");
        assert_eq!(transitions.len(), 1);
        let payload = &transitions[0].payload;
        assert_eq!(payload["cadence_hours"], 24);
        assert_eq!(payload["touchpoints"], 0);
        // 40 + 40 * (1 - 6/24) + 0
        assert_eq!(payload["score"], 70);
        assert_eq!(payload["risk_level"], "healthy");
        assert!(transitions[0].ts > status[0].ts);
    }

    #[test]
    fn overdue_transition_is_flagged_at_risk() {
        let orchestrator = orchestrator();
        let lead = orchestrator.create_lead_at(new_lead("Casey"), ts()).expect("create");
        orchestrator
            .transition_at(&lead.id, Stage::NotNow, ts() + Duration::hours(30))
            .expect("transition");

        let transitions = events_of(&orchestrator, &lead.id, "stage_transition");
        assert_eq!(transitions[0].payload["risk_level"], RiskLevel::AtRisk.as_str());
        assert_eq!(transitions[0].payload["score"], 40);
    }

    #[test]
    fn same_stage_transition_has_no_side_effects() {
        let orchestrator = orchestrator();
        let lead = orchestrator.create_lead_at(new_lead("Devon"), ts()).expect("create");
        let unchanged = orchestrator
            .transition_at(&lead.id, Stage::NewLead, ts() + Duration::hours(1))
            .expect("same stage");

        assert_eq!(unchanged, lead);
        assert!(events_of(&orchestrator, &lead.id, "status_changed").is_empty());
        assert_eq!(orchestrator.pending_reminders(&lead.id).expect("pending").len(), 1);
    }

    #[test]
    fn denied_transition_leaves_no_writes() {
        let orchestrator = orchestrator();
        let lead = orchestrator.create_lead_at(new_lead("Emery"), ts()).expect("create");

        let err = orchestrator
            .transition_at(&lead.id, Stage::Qualified, ts())
            .expect_err("skip");
        match err {
            LifecycleError::ValidationDenied { required_path, .. } => assert_eq!(
                required_path,
                vec![Stage::WarmingUp, Stage::Invited, Stage::Qualified]
            ),
            other => panic!("unexpected error: {other:?}"),
        }

        assert_eq!(orchestrator.lead(&lead.id).expect("lead").stage, Stage::NewLead);
        assert!(events_of(&orchestrator, &lead.id, "status_changed").is_empty());
        assert!(events_of(&orchestrator, &lead.id, "stage_transition").is_empty());
    }

    #[test]
    fn gated_stage_requires_qualification_until_fields_are_recorded() {
        let orchestrator = orchestrator();
        let lead = orchestrator.create_lead_at(new_lead("Finley"), ts()).expect("create");
        orchestrator.advance_at(&lead.id, ts()).expect("warming up");
        orchestrator.advance_at(&lead.id, ts()).expect("invited");

        let err = orchestrator.advance_at(&lead.id, ts()).expect_err("gated");
        match err {
            LifecycleError::QualificationIncomplete { missing_fields, suggestions, .. } => {
                assert_eq!(missing_fields.len(), 4);
                assert_eq!(suggestions.len(), 3);
            }
            other => panic!("unexpected error: {other:?}"),
        }

        orchestrator
            .update_qualification_at(&lead.id, &full_qualification(), ts())
            .expect("qualify");
        let qualified = orchestrator.advance_at(&lead.id, ts()).expect("qualified");
        assert_eq!(qualified.stage, Stage::Qualified);
        assert_eq!(events_of(&orchestrator, &lead.id, "qualification_updated").len(), 1);
    }

    #[test]
    fn stale_stage_read_is_refused_without_writes() {
        let orchestrator = orchestrator();
        let lead = orchestrator.create_lead_at(new_lead("Gray"), ts()).expect("create");
        {
            let store = lock_store(orchestrator.store()).expect("lock");
            store
                .update_lead_stage(
                    &lead.id,
                    Stage::NewLead,
                    Stage::NotNow,
                    "parked",
                    ts(),
                    ts(),
                )
                .expect("external write");
        }

        // The lead read here is stale; the conditional write must refuse it.
        let store = lock_store(orchestrator.store()).expect("lock");
        let err = orchestrator
            .apply_transition(&store, lead.clone(), Stage::WarmingUp, ts())
            .expect_err("conflict");
        drop(store);

        assert!(matches!(err, LifecycleError::StageConflict { expected: Stage::NewLead, .. }));
        assert!(err.is_retryable());
        assert_eq!(orchestrator.lead(&lead.id).expect("lead").stage, Stage::NotNow);
        assert!(events_of(&orchestrator, &lead.id, "status_changed").is_empty());
    }

    #[test]
    fn recommendations_report_score_and_next_stages() {
        let orchestrator = orchestrator();
        let lead = orchestrator.create_lead_at(new_lead("Harper"), ts()).expect("create");

        let cold = orchestrator.get_stage_recommendations(&lead.id).expect("recommend");
        assert_eq!(cold.qualification_score, 0);
        assert_eq!(cold.recommended.stage, Stage::LongTermNurture);
        assert_eq!(cold.recommended.confidence, 100);
        assert_eq!(
            cold.next_valid_stages,
            vec![Stage::WarmingUp, Stage::LongTermNurture, Stage::NotNow]
        );

        orchestrator
            .update_qualification_at(&lead.id, &full_qualification(), ts())
            .expect("qualify");
        let warm = orchestrator.get_stage_recommendations(&lead.id).expect("recommend");
        assert_eq!(warm.qualification_score, 100);
        assert_eq!(warm.recommended.stage, Stage::WarmingUp);
    }

    #[test]
    fn validate_is_a_dry_run() {
        let orchestrator = orchestrator();
        let lead = orchestrator.create_lead_at(new_lead("Indy"), ts()).expect("create");
        let decision = orchestrator.validate(&lead.id, Stage::LongTermNurture).expect("validate");
        assert!(decision.allowed);
        assert_eq!(decision.kind, DecisionKind::Alternate);
        assert_eq!(orchestrator.lead(&lead.id).expect("lead").stage, Stage::NewLead);
    }

    #[test]
    fn completing_a_reminder_is_audited() {
        let orchestrator = orchestrator();
        let lead = orchestrator.create_lead_at(new_lead("Jules"), ts()).expect("create");
        let pending = orchestrator.pending_reminders(&lead.id).expect("pending");

        let completed = orchestrator
            .complete_reminder_at(&pending[0].id, ts())
            .expect("complete");
        assert!(completed.completed);
        assert_eq!(events_of(&orchestrator, &lead.id, "reminder_completed").len(), 1);
        assert!(orchestrator.pending_reminders(&lead.id).expect("pending").is_empty());

        let err = orchestrator.complete_reminder_at("missing", ts()).expect_err("missing");
        assert!(matches!(err, LifecycleError::NotFound { entity: "reminder", .. }));
    }

    #[test]
    fn interactions_feed_the_next_activity_snapshot() {
        let orchestrator = orchestrator();
        let lead = orchestrator.create_lead_at(new_lead("Kai"), ts()).expect("create");
        for hour in 1..=3 {
            orchestrator
                .record_interaction_at(&lead.id, "message", "follow-up", ts() + Duration::hours(hour))
                .expect("interaction");
        }
        orchestrator
            .transition_at(&lead.id, Stage::WarmingUp, ts() + Duration::hours(4))
            .expect("transition");

        let transitions = events_of(&orchestrator, &lead.id, "stage_transition");
        assert_eq!(transitions[0].payload["touchpoints"], 3);
        assert_eq!(transitions[0].payload["activity_score"], 100);
    }

    #[test]
    fn unknown_lead_is_not_found() {
        let orchestrator = orchestrator();
        for err in [
            orchestrator.advance_at("nope", ts()).expect_err("advance"),
            orchestrator
                .transition_at("nope", Stage::Invited, ts())
                .expect_err("transition"),
            orchestrator.check_qualification("nope").expect_err("check"),
        ] {
            assert!(matches!(err, LifecycleError::NotFound { entity: "lead", .. }));
        }
    }

    #[test]
    fn entering_presentation_sent_queues_video_sent() {
        let (dispatcher, mut inbox) = automation_channel();
        let orchestrator = orchestrator().with_automation(dispatcher);
        let lead = orchestrator
            .create_lead_at(
                NewLead {
                    name: "Lane".to_string(),
                    stage: Some(Stage::Qualified),
                    qualification: full_qualification(),
                    ..NewLead::default()
                },
                ts(),
            )
            .expect("create");

        orchestrator.advance_at(&lead.id, ts()).expect("presentation");
        let request = inbox.try_next().expect("queued request");
        assert_eq!(request.event_name, "VIDEO_SENT");
        assert_eq!(request.lead_id.as_deref(), Some(lead.id.as_str()));
    }

    #[test]
    fn closed_automation_queue_does_not_fail_transition() {
        let (dispatcher, inbox) = automation_channel();
        drop(inbox);
        let orchestrator = orchestrator().with_automation(dispatcher);
        let lead = orchestrator
            .create_lead_at(
                NewLead {
                    name: "Morgan".to_string(),
                    stage: Some(Stage::Qualified),
                    qualification: full_qualification(),
                    ..NewLead::default()
                },
                ts(),
            )
            .expect("create");

        let moved = orchestrator.advance_at(&lead.id, ts()).expect("presentation");
        assert_eq!(moved.stage, Stage::PresentationSent);
    }
}
