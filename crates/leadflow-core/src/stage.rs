use crate::CoreError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Canonical pipeline stages. The first seven form the linear progression;
/// `NotNow` and `LongTermNurture` are alternate destinations outside it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    NewLead,
    WarmingUp,
    Invited,
    Qualified,
    PresentationSent,
    FollowUp,
    Enrolled,
    NotNow,
    LongTermNurture,
}

pub const LINEAR_STAGES: [Stage; 7] = [
    Stage::NewLead,
    Stage::WarmingUp,
    Stage::Invited,
    Stage::Qualified,
    Stage::PresentationSent,
    Stage::FollowUp,
    Stage::Enrolled,
];

pub const ALTERNATE_STAGES: [Stage; 2] = [Stage::LongTermNurture, Stage::NotNow];

pub const ALL_STAGES: [Stage; 9] = [
    Stage::NewLead,
    Stage::WarmingUp,
    Stage::Invited,
    Stage::Qualified,
    Stage::PresentationSent,
    Stage::FollowUp,
    Stage::Enrolled,
    Stage::NotNow,
    Stage::LongTermNurture,
];

/// Linear stage a parked lead re-enters through `next_valid_stages`.
pub const RESUME_STAGE: Stage = Stage::WarmingUp;

impl Default for Stage {
    fn default() -> Self {
        Self::NewLead
    }
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::NewLead => "new_lead",
            Stage::WarmingUp => "warming_up",
            Stage::Invited => "invited",
            Stage::Qualified => "qualified",
            Stage::PresentationSent => "presentation_sent",
            Stage::FollowUp => "follow_up",
            Stage::Enrolled => "enrolled",
            Stage::NotNow => "not_now",
            Stage::LongTermNurture => "long_term_nurture",
        }
    }

    pub fn label(&self) -> &'static str {
        definition(*self).label
    }

    /// Position in the linear progression, `None` for alternates.
    pub fn linear_index(&self) -> Option<usize> {
        LINEAR_STAGES.iter().position(|stage| stage == self)
    }

    pub fn is_alternate(&self) -> bool {
        ALTERNATE_STAGES.contains(self)
    }

    pub fn next_linear(&self) -> Option<Stage> {
        self.linear_index()
            .and_then(|index| LINEAR_STAGES.get(index + 1))
            .copied()
    }

    /// Alternate destinations permitted from this stage regardless of order.
    pub fn alternates(&self) -> Vec<Stage> {
        ALTERNATE_STAGES
            .iter()
            .copied()
            .filter(|alternate| alternate != self)
            .collect()
    }

    /// Lenient parse used at storage and transport boundaries: unknown values
    /// collapse to the default stage instead of failing.
    pub fn parse_or_default(input: &str) -> Stage {
        input.parse().unwrap_or_default()
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = CoreError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let normalized = normalize_key(input);
        ALL_STAGES
            .iter()
            .copied()
            .find(|stage| {
                stage.as_str() == normalized || normalize_key(definition(*stage).label) == normalized
            })
            .ok_or_else(|| CoreError::UnknownStage(input.trim().to_string()))
    }
}

fn normalize_key(input: &str) -> String {
    input
        .trim()
        .to_lowercase()
        .chars()
        .map(|ch| if ch == ' ' || ch == '-' { '_' } else { ch })
        .collect()
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TouchpointKind {
    Message,
    Call,
    Video,
    Meeting,
}

impl TouchpointKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TouchpointKind::Message => "message",
            TouchpointKind::Call => "call",
            TouchpointKind::Video => "video",
            TouchpointKind::Meeting => "meeting",
        }
    }
}

impl fmt::Display for TouchpointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Static catalog entry describing the cadence and expectations of a stage.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct StageDefinition {
    pub key: &'static str,
    pub label: &'static str,
    pub cadence_hours: u32,
    pub touchpoint: TouchpointKind,
    pub reminder_type: &'static str,
    pub next_action: &'static str,
    pub signals: &'static [&'static str],
}

pub const DEFAULT_DEFINITION: StageDefinition = StageDefinition {
    key: "default",
    label: "Unknown",
    cadence_hours: 72,
    touchpoint: TouchpointKind::Message,
    reminder_type: "general_follow_up",
    next_action: "Check in with the lead",
    signals: &[],
};

pub fn definition(stage: Stage) -> StageDefinition {
    match stage {
        Stage::NewLead => StageDefinition {
            key: "new_lead",
            label: "New Lead",
            cadence_hours: 24,
            touchpoint: TouchpointKind::Message,
            reminder_type: "new_lead_follow_up",
            next_action: "Send a first personal message",
            signals: &["first_contact", "profile_reviewed"],
        },
        Stage::WarmingUp => StageDefinition {
            key: "warming_up",
            label: "Warming Up",
            cadence_hours: 48,
            touchpoint: TouchpointKind::Message,
            reminder_type: "warming_up_follow_up",
            next_action: "Continue the conversation and build rapport",
            signals: &["reply_received", "rapport_built"],
        },
        Stage::Invited => StageDefinition {
            key: "invited",
            label: "Invited",
            cadence_hours: 24,
            touchpoint: TouchpointKind::Call,
            reminder_type: "invited_follow_up",
            next_action: "Confirm the qualification call",
            signals: &["invite_accepted", "call_booked"],
        },
        Stage::Qualified => StageDefinition {
            key: "qualified",
            label: "Qualified",
            cadence_hours: 24,
            touchpoint: TouchpointKind::Call,
            reminder_type: "qualified_follow_up",
            next_action: "Send the presentation",
            signals: &["motivation_confirmed", "decision_maker_confirmed"],
        },
        Stage::PresentationSent => StageDefinition {
            key: "presentation_sent",
            label: "Presentation Sent",
            cadence_hours: 48,
            touchpoint: TouchpointKind::Video,
            reminder_type: "presentation_follow_up",
            next_action: "Check whether the presentation was watched",
            signals: &["video_viewed", "questions_asked"],
        },
        Stage::FollowUp => StageDefinition {
            key: "follow_up",
            label: "Follow Up",
            cadence_hours: 72,
            touchpoint: TouchpointKind::Call,
            reminder_type: "follow_up_check_in",
            next_action: "Address open questions and agree on a decision date",
            signals: &["objections_addressed", "decision_date_set"],
        },
        Stage::Enrolled => StageDefinition {
            key: "enrolled",
            label: "Enrolled",
            cadence_hours: 168,
            touchpoint: TouchpointKind::Meeting,
            reminder_type: "onboarding_check_in",
            next_action: "Run the onboarding session",
            signals: &["onboarding_started"],
        },
        Stage::NotNow => StageDefinition {
            key: "not_now",
            label: "Not Now",
            cadence_hours: 720,
            touchpoint: TouchpointKind::Message,
            reminder_type: "not_now_check_in",
            next_action: "Revisit timing with the lead",
            signals: &["timing_revisited"],
        },
        Stage::LongTermNurture => StageDefinition {
            key: "long_term_nurture",
            label: "Long-term Nurture",
            cadence_hours: 2160,
            touchpoint: TouchpointKind::Message,
            reminder_type: "nurture_check_in",
            next_action: "Share relevant content",
            signals: &["content_engaged"],
        },
    }
}

/// Catalog lookup by raw key; unknown keys resolve to [`DEFAULT_DEFINITION`].
pub fn definition_for_key(key: &str) -> StageDefinition {
    key.parse::<Stage>()
        .map(definition)
        .unwrap_or(DEFAULT_DEFINITION)
}

pub fn catalog() -> Vec<StageDefinition> {
    ALL_STAGES.iter().copied().map(definition).collect()
}
