use crate::qualification::{QualificationGate, QualificationReport};
use crate::{EngineConfig, LifecycleError, QUALIFICATION_SUGGESTIONS};
use leadflow_core::stage::{LINEAR_STAGES, RESUME_STAGE};
use leadflow_core::Stage;
use leadflow_storage::LeadStore;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionKind {
    Unchanged,
    Forward,
    Backward,
    Alternate,
    Resume,
    Skipped,
    QualificationBlocked,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransitionDecision {
    pub allowed: bool,
    pub kind: DecisionKind,
    pub reason: Option<String>,
    pub suggestions: Vec<String>,
    pub required_path: Vec<Stage>,
    pub missing_fields: Vec<String>,
}

impl TransitionDecision {
    fn allow(kind: DecisionKind, reason: Option<String>) -> Self {
        Self {
            allowed: true,
            kind,
            reason,
            suggestions: Vec::new(),
            required_path: Vec::new(),
            missing_fields: Vec::new(),
        }
    }

    /// Error surfaced to the caller of a denied transition.
    pub fn into_error(self) -> LifecycleError {
        let reason = self
            .reason
            .unwrap_or_else(|| "transition not permitted".to_string());
        match self.kind {
            DecisionKind::QualificationBlocked => LifecycleError::QualificationIncomplete {
                reason,
                missing_fields: self.missing_fields,
                suggestions: self.suggestions,
            },
            _ => LifecycleError::ValidationDenied {
                reason,
                suggestions: self.suggestions,
                required_path: self.required_path,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageRecommendation {
    pub stage: Stage,
    pub confidence: u8,
    pub reasoning: Vec<String>,
}

/// Decides whether a stage change is allowed: one step forward along the
/// linear order, any step back, or a jump to an alternate.
#[derive(Debug, Clone)]
pub struct StageTransitionValidator {
    gate: QualificationGate,
    advance_threshold: u8,
    nurture_threshold: u8,
}

impl StageTransitionValidator {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            gate: QualificationGate::from_config(config),
            advance_threshold: config.advance_threshold,
            nurture_threshold: config.nurture_threshold,
        }
    }

    pub fn gate(&self) -> &QualificationGate {
        &self.gate
    }

    pub fn validate(
        &self,
        store: &LeadStore,
        lead_id: &str,
        from: Stage,
        to: Stage,
    ) -> Result<TransitionDecision, LifecycleError> {
        if from == to {
            return Ok(TransitionDecision::allow(
                DecisionKind::Unchanged,
                Some(format!("lead is already in {}", to.label())),
            ));
        }

        if from.alternates().contains(&to) {
            return Ok(TransitionDecision::allow(
                DecisionKind::Alternate,
                Some(format!("{} is always available", to.label())),
            ));
        }

        let Some(to_index) = to.linear_index() else {
            return Ok(self.deny_unreachable(from, to));
        };

        let Some(from_index) = from.linear_index() else {
            return self.gated(
                store,
                lead_id,
                to,
                DecisionKind::Resume,
                format!("re-engaging lead from {} into {}", from.label(), to.label()),
            );
        };

        if to_index < from_index {
            return Ok(TransitionDecision::allow(
                DecisionKind::Backward,
                Some(format!(
                    "moving back from {} to {} (correction)",
                    from.label(),
                    to.label()
                )),
            ));
        }

        if to_index > from_index + 1 {
            let required_path = LINEAR_STAGES[from_index + 1..=to_index].to_vec();
            let path = required_path
                .iter()
                .map(|stage| stage.label())
                .collect::<Vec<_>>()
                .join(" -> ");
            return Ok(TransitionDecision {
                allowed: false,
                kind: DecisionKind::Skipped,
                reason: Some(format!(
                    "cannot skip from {} to {}; required path: {}",
                    from.label(),
                    to.label(),
                    path
                )),
                suggestions: vec![format!(
                    "Move to {} first",
                    required_path[0].label()
                )],
                required_path,
                missing_fields: Vec::new(),
            });
        }

        self.gated(
            store,
            lead_id,
            to,
            DecisionKind::Forward,
            format!("advancing from {} to {}", from.label(), to.label()),
        )
    }

    fn gated(
        &self,
        store: &LeadStore,
        lead_id: &str,
        to: Stage,
        kind: DecisionKind,
        reason: String,
    ) -> Result<TransitionDecision, LifecycleError> {
        let check = self.gate.can_move_to_stage(store, lead_id, to)?;
        if check.allowed {
            return Ok(TransitionDecision::allow(kind, Some(reason)));
        }

        Ok(TransitionDecision {
            allowed: false,
            kind: DecisionKind::QualificationBlocked,
            reason: check.reason,
            suggestions: QUALIFICATION_SUGGESTIONS
                .iter()
                .map(|suggestion| suggestion.to_string())
                .collect(),
            required_path: Vec::new(),
            missing_fields: check.missing_fields,
        })
    }

    fn deny_unreachable(&self, from: Stage, to: Stage) -> TransitionDecision {
        TransitionDecision {
            allowed: false,
            kind: DecisionKind::Skipped,
            reason: Some(format!(
                "{} is not reachable from {}",
                to.label(),
                from.label()
            )),
            suggestions: self
                .next_valid_stages(from)
                .iter()
                .map(|stage| format!("Move to {}", stage.label()))
                .collect(),
            required_path: Vec::new(),
            missing_fields: Vec::new(),
        }
    }

    /// Next linear stage (if any) followed by the alternates. `advance`
    /// always takes index 0, so the order matters.
    pub fn next_valid_stages(&self, current: Stage) -> Vec<Stage> {
        let mut stages = Vec::new();
        match current.linear_index() {
            Some(_) => stages.extend(current.next_linear()),
            None => stages.push(RESUME_STAGE),
        }
        stages.extend(current.alternates());
        stages
    }

    pub fn recommend(&self, current: Stage, report: &QualificationReport) -> StageRecommendation {
        let score = report.score;
        let next = current.next_linear();
        let early = matches!(
            current,
            Stage::NewLead | Stage::WarmingUp | Stage::Invited
        );

        if current.is_alternate() {
            if score >= self.advance_threshold {
                return StageRecommendation {
                    stage: RESUME_STAGE,
                    confidence: score,
                    reasoning: vec![
                        format!("qualification score {score} is strong"),
                        format!("re-engage the lead in {}", RESUME_STAGE.label()),
                    ],
                };
            }
            return StageRecommendation {
                stage: current,
                confidence: 60,
                reasoning: vec![format!(
                    "qualification score {score} is below {}; keep the lead parked",
                    self.advance_threshold
                )],
            };
        }

        if early {
            if score >= self.advance_threshold {
                if let Some(next) = next {
                    return StageRecommendation {
                        stage: next,
                        confidence: score,
                        reasoning: vec![
                            format!("qualification score {score} meets the advance threshold"),
                            format!("{} is the next step", next.label()),
                        ],
                    };
                }
            }
            if score < self.nurture_threshold {
                return StageRecommendation {
                    stage: Stage::LongTermNurture,
                    confidence: 100 - score,
                    reasoning: vec![
                        format!(
                            "qualification score {score} is below {}",
                            self.nurture_threshold
                        ),
                        "not enough information to pursue actively".to_string(),
                    ],
                };
            }
            return StageRecommendation {
                stage: current,
                confidence: 60,
                reasoning: missing_reasoning(report),
            };
        }

        match next {
            Some(next) if report.is_qualified => StageRecommendation {
                stage: next,
                confidence: 80,
                reasoning: vec![
                    "lead is fully qualified".to_string(),
                    format!("{} is the next step", next.label()),
                ],
            },
            None if report.is_qualified => StageRecommendation {
                stage: current,
                confidence: 80,
                reasoning: vec![format!("{} is the final stage", current.label())],
            },
            _ => StageRecommendation {
                stage: current,
                confidence: 70,
                reasoning: missing_reasoning(report),
            },
        }
    }
}

fn missing_reasoning(report: &QualificationReport) -> Vec<String> {
    let mut reasoning = vec![format!("qualification score is {}", report.score)];
    if !report.missing_fields.is_empty() {
        reasoning.push(format!(
            "gather missing fields: {}",
            report.missing_fields.join(", ")
        ));
    }
    reasoning
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use leadflow_core::stage::{ALL_STAGES, ALTERNATE_STAGES};
    use leadflow_core::NewLead;
    use serde_json::json;

    fn validator() -> StageTransitionValidator {
        StageTransitionValidator::new(&EngineConfig::default())
    }

    fn store_with_lead(qualified: bool) -> (LeadStore, String) {
        let store = LeadStore::open_in_memory().expect("db");
        let qualification = if qualified {
            json!({
                "core_motivation": "time freedom",
                "desired_outcome": "side income",
                "timeline": "this quarter",
                "is_decision_maker": true,
            })
        } else {
            json!({})
        };
        let lead = store
            .insert_lead(
                &NewLead {
                    name: "Morgan".to_string(),
                    qualification: qualification.as_object().cloned().expect("object"),
                    ..NewLead::default()
                },
                Utc.with_ymd_and_hms(2026, 4, 2, 8, 0, 0)
                    .single()
                    .expect("ts"),
            )
            .expect("lead");
        (store, lead.id)
    }

    #[test]
    fn skipping_stages_is_rejected_with_required_path() {
        let (store, lead_id) = store_with_lead(true);
        let validator = validator();

        for (from_index, from) in LINEAR_STAGES.iter().enumerate() {
            for (to_index, to) in LINEAR_STAGES.iter().enumerate() {
                if to_index <= from_index + 1 {
                    continue;
                }
                let decision = validator
                    .validate(&store, &lead_id, *from, *to)
                    .expect("validate");
                assert!(!decision.allowed, "{from} -> {to} should be denied");
                assert_eq!(decision.required_path.len(), to_index - from_index);
                assert_eq!(decision.required_path.last(), Some(to));
            }
        }

        let decision = validator
            .validate(&store, &lead_id, Stage::NewLead, Stage::Qualified)
            .expect("validate");
        assert_eq!(
            decision.reason.as_deref(),
            Some("cannot skip from New Lead to Qualified; required path: Warming Up -> Invited -> Qualified")
        );
    }

    #[test]
    fn backward_moves_are_always_allowed() {
        let (store, lead_id) = store_with_lead(false);
        let validator = validator();

        for (from_index, from) in LINEAR_STAGES.iter().enumerate() {
            for to in &LINEAR_STAGES[..from_index] {
                let decision = validator
                    .validate(&store, &lead_id, *from, *to)
                    .expect("validate");
                assert!(decision.allowed, "{from} -> {to} should be allowed");
                assert_eq!(decision.kind, DecisionKind::Backward);
            }
        }
    }

    #[test]
    fn alternates_are_reachable_from_every_stage() {
        let (store, lead_id) = store_with_lead(false);
        let validator = validator();

        for from in ALL_STAGES {
            for to in ALTERNATE_STAGES {
                if from == to {
                    continue;
                }
                let decision = validator
                    .validate(&store, &lead_id, from, to)
                    .expect("validate");
                assert!(decision.allowed);
                assert_eq!(decision.kind, DecisionKind::Alternate);
            }
        }
    }

    #[test]
    fn gated_forward_move_requires_qualification() {
        let (store, lead_id) = store_with_lead(false);
        let decision = validator()
            .validate(&store, &lead_id, Stage::Invited, Stage::Qualified)
            .expect("validate");

        assert!(!decision.allowed);
        assert_eq!(decision.kind, DecisionKind::QualificationBlocked);
        assert_eq!(decision.missing_fields.len(), 4);
        assert_eq!(decision.suggestions.len(), QUALIFICATION_SUGGESTIONS.len());
        assert!(matches!(
            decision.into_error(),
            LifecycleError::QualificationIncomplete { .. }
        ));
    }

    #[test]
    fn parked_leads_resume_into_linear_stages() {
        let (store, lead_id) = store_with_lead(false);
        let validator = validator();

        let resume = validator
            .validate(&store, &lead_id, Stage::NotNow, Stage::WarmingUp)
            .expect("validate");
        assert!(resume.allowed);
        assert_eq!(resume.kind, DecisionKind::Resume);

        let gated = validator
            .validate(&store, &lead_id, Stage::LongTermNurture, Stage::Qualified)
            .expect("validate");
        assert!(!gated.allowed);
    }

    #[test]
    fn next_valid_stages_lists_linear_successor_first() {
        let validator = validator();
        assert_eq!(
            validator.next_valid_stages(Stage::NewLead),
            vec![Stage::WarmingUp, Stage::LongTermNurture, Stage::NotNow]
        );
        assert_eq!(
            validator.next_valid_stages(Stage::Enrolled),
            vec![Stage::LongTermNurture, Stage::NotNow]
        );
        assert_eq!(
            validator.next_valid_stages(Stage::NotNow),
            vec![Stage::WarmingUp, Stage::LongTermNurture]
        );
    }

    #[test]
    fn recommendations_follow_score_thresholds() {
        let validator = validator();
        let report = |score: u8, missing: usize| QualificationReport {
            is_qualified: missing == 0,
            score,
            missing_fields: (0..missing).map(|index| format!("field_{index}")).collect(),
        };

        let advance = validator.recommend(Stage::WarmingUp, &report(75, 1));
        assert_eq!(advance.stage, Stage::Invited);
        assert_eq!(advance.confidence, 75);

        let nurture = validator.recommend(Stage::NewLead, &report(25, 3));
        assert_eq!(nurture.stage, Stage::LongTermNurture);
        assert_eq!(nurture.confidence, 75);

        let hold = validator.recommend(Stage::Invited, &report(50, 2));
        assert_eq!(hold.stage, Stage::Invited);
        assert_eq!(hold.confidence, 60);

        let later = validator.recommend(Stage::Qualified, &report(100, 0));
        assert_eq!(later.stage, Stage::PresentationSent);
        assert_eq!(later.confidence, 80);

        let parked = validator.recommend(Stage::NotNow, &report(100, 0));
        assert_eq!(parked.stage, Stage::WarmingUp);
    }
}
