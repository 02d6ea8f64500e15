use chrono::{DateTime, Duration, Utc};
use leadflow_core::{ActivitySnapshot, RiskLevel, StageDefinition};
use leadflow_storage::{LeadStore, StorageError};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RiskWeights {
    pub base: f64,
    pub cadence: f64,
    pub activity: f64,
}

impl Default for RiskWeights {
    fn default() -> Self {
        Self {
            base: 40.0,
            cadence: 40.0,
            activity: 20.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TransitionScore {
    pub score: u8,
    pub risk_level: RiskLevel,
}

/// Counts touchpoints in `[now - cadence, now]` for the stage the lead is in.
pub fn snapshot(
    store: &LeadStore,
    lead_id: &str,
    stage_definition: &StageDefinition,
    target_touchpoints: u32,
    now: DateTime<Utc>,
) -> Result<ActivitySnapshot, StorageError> {
    let window_start = now - Duration::hours(i64::from(stage_definition.cadence_hours));
    let interactions = store.interactions_between(lead_id, window_start, now)?;
    let touchpoints = u32::try_from(interactions.len()).unwrap_or(u32::MAX);
    let target = target_touchpoints.max(1);
    let activity_score =
        ((f64::from(touchpoints) / f64::from(target)).min(1.0) * 100.0).round() as u8;

    let recommended_action = if touchpoints == 0 {
        format!("Reach out via {}", stage_definition.touchpoint)
    } else if touchpoints < target {
        format!("Schedule the next {}", stage_definition.touchpoint)
    } else {
        "Engagement on track".to_string()
    };

    Ok(ActivitySnapshot {
        window_hours: stage_definition.cadence_hours,
        touchpoints,
        activity_score,
        last_touch_at: interactions.last().map(|interaction| interaction.occurred_at),
        recommended_action,
    })
}

/// `clamp(0, 100, base + cadence * max(0, 1 - hours / expected) + activity * score / 100)`;
/// the lead is at risk once it overstayed the expected cadence.
pub fn transition_score(
    hours_in_stage: f64,
    expected_cadence_hours: u32,
    activity_score: u8,
    weights: &RiskWeights,
) -> TransitionScore {
    let expected = f64::from(expected_cadence_hours.max(1));
    let freshness = (1.0 - hours_in_stage / expected).max(0.0);
    let raw = weights.base
        + weights.cadence * freshness
        + weights.activity * (f64::from(activity_score) / 100.0);
    let risk_level = if hours_in_stage > expected {
        RiskLevel::AtRisk
    } else {
        RiskLevel::Healthy
    };

    TransitionScore {
        score: raw.clamp(0.0, 100.0).round() as u8,
        risk_level,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use leadflow_core::stage::definition;
    use leadflow_core::{new_id, Interaction, NewLead, Stage};

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 7, 14, 18, 0, 0)
            .single()
            .expect("valid timestamp")
    }

    #[test]
    fn score_rewards_fast_and_active_transitions() {
        let weights = RiskWeights::default();

        let instant = transition_score(0.0, 24, 100, &weights);
        assert_eq!(instant.score, 100);
        assert_eq!(instant.risk_level, RiskLevel::Healthy);

        let halfway = transition_score(12.0, 24, 0, &weights);
        assert_eq!(halfway.score, 60);

        let overdue = transition_score(30.0, 24, 50, &weights);
        assert_eq!(overdue.score, 50);
        assert_eq!(overdue.risk_level, RiskLevel::AtRisk);

        let boundary = transition_score(24.0, 24, 0, &weights);
        assert_eq!(boundary.score, 40);
        assert_eq!(boundary.risk_level, RiskLevel::Healthy);
    }

    #[test]
    fn snapshot_counts_touchpoints_inside_cadence_window() {
        let store = LeadStore::open_in_memory().expect("db");
        let lead = store
            .insert_lead(
                &NewLead {
                    name: "Jo".to_string(),
                    ..NewLead::default()
                },
                ts() - Duration::days(3),
            )
            .expect("lead");
        let stage_definition = definition(Stage::NewLead);

        let empty = snapshot(&store, &lead.id, &stage_definition, 3, ts()).expect("snapshot");
        assert_eq!(empty.touchpoints, 0);
        assert_eq!(empty.activity_score, 0);
        assert_eq!(empty.recommended_action, "Reach out via message");

        for hours_ago in [30, 10, 2] {
            store
                .record_interaction(&Interaction {
                    id: new_id(),
                    lead_id: lead.id.clone(),
                    kind: "message".to_string(),
                    stage: Stage::NewLead,
                    summary: "sent intro".to_string(),
                    occurred_at: ts() - Duration::hours(hours_ago),
                })
                .expect("interaction");
        }

        let partial = snapshot(&store, &lead.id, &stage_definition, 3, ts()).expect("snapshot");
        assert_eq!(partial.window_hours, 24);
        assert_eq!(partial.touchpoints, 2);
        assert_eq!(partial.activity_score, 67);
        assert_eq!(partial.last_touch_at, Some(ts() - Duration::hours(2)));
        assert_eq!(partial.recommended_action, "Schedule the next message");
    }
}
