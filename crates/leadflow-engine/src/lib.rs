pub mod activity;
pub mod audit;
pub mod automation;
pub mod orchestrator;
pub mod qualification;
pub mod scheduler;
pub mod validator;

use leadflow_core::qualification::DEFAULT_REQUIRED_FIELDS;
use leadflow_core::{AutomationEvent, Stage};
use leadflow_storage::StorageError;
use thiserror::Error;

pub use activity::{RiskWeights, TransitionScore};
pub use audit::{AuditLog, AuditQuery};
pub use automation::{
    automation_channel, spawn_automation_worker, AutomationDispatcher, AutomationError,
    AutomationInbox, AutomationReport, AutomationRequest, AutomationTriggerEngine,
    AutomationWorkerStats,
};
pub use orchestrator::{LifecycleOrchestrator, StageRecommendations};
pub use qualification::{MoveCheck, QualificationGate, QualificationReport};
pub use scheduler::{ReminderScheduler, ScheduleOptions, ScheduledReminder};
pub use validator::{DecisionKind, StageRecommendation, StageTransitionValidator, TransitionDecision};

const DEFAULT_ADVANCE_THRESHOLD: u8 = 75;
const DEFAULT_NURTURE_THRESHOLD: u8 = 50;
const DEFAULT_AUDIT_MAX_PAGE_SIZE: u32 = 250;
const DEFAULT_AUDIT_PAGE_SIZE: u32 = 50;
const DEFAULT_ACTIVITY_TARGET_TOUCHPOINTS: u32 = 3;

pub const QUALIFICATION_SUGGESTIONS: [&str; 3] = [
    "Complete the qualification call",
    "Record the lead's core motivation and desired outcome",
    "Confirm timeline and decision-making authority",
];

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },
    #[error("transition denied: {reason}")]
    ValidationDenied {
        reason: String,
        suggestions: Vec<String>,
        required_path: Vec<Stage>,
    },
    #[error("qualification incomplete: {reason}")]
    QualificationIncomplete {
        reason: String,
        missing_fields: Vec<String>,
        suggestions: Vec<String>,
    },
    #[error("lead {lead_id} left stage {expected} before the transition was written")]
    StageConflict { lead_id: String, expected: Stage },
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl LifecycleError {
    pub fn lead_not_found(lead_id: &str) -> Self {
        LifecycleError::NotFound {
            entity: "lead",
            id: lead_id.to_string(),
        }
    }

    /// Infrastructure faults are safe to retry; business-rule rejections are not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LifecycleError::Storage(_) | LifecycleError::StageConflict { .. }
        )
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub required_fields: Vec<String>,
    pub gated_stages: Vec<Stage>,
    pub advance_threshold: u8,
    pub nurture_threshold: u8,
    pub audit_max_page_size: u32,
    pub audit_default_page_size: u32,
    pub activity_target_touchpoints: u32,
    pub risk: RiskWeights,
    /// Automation events fired after a lead enters the given stage.
    pub entry_events: Vec<(Stage, AutomationEvent)>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            required_fields: DEFAULT_REQUIRED_FIELDS
                .iter()
                .map(|field| field.to_string())
                .collect(),
            gated_stages: vec![Stage::Qualified, Stage::PresentationSent],
            advance_threshold: DEFAULT_ADVANCE_THRESHOLD,
            nurture_threshold: DEFAULT_NURTURE_THRESHOLD,
            audit_max_page_size: DEFAULT_AUDIT_MAX_PAGE_SIZE,
            audit_default_page_size: DEFAULT_AUDIT_PAGE_SIZE,
            activity_target_touchpoints: DEFAULT_ACTIVITY_TARGET_TOUCHPOINTS,
            risk: RiskWeights::default(),
            entry_events: vec![(Stage::PresentationSent, AutomationEvent::VideoSent)],
        }
    }
}
