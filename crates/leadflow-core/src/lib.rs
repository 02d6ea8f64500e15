pub mod qualification;
pub mod stage;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub use qualification::QualificationBlob;
pub use stage::{Stage, StageDefinition, TouchpointKind};

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("unknown stage: {0}")]
    UnknownStage(String),
    #[error("unknown automation event: {0}")]
    UnknownAutomationEvent(String),
}

pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Lead {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    pub stage: Stage,
    pub stage_entered_at: DateTime<Utc>,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub next_action: Option<String>,
    #[serde(default)]
    pub next_action_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub qualification: QualificationBlob,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields accepted when a lead is first recorded.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewLead {
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub stage: Option<Stage>,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub qualification: QualificationBlob,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Reminder {
    pub id: String,
    pub lead_id: String,
    pub reminder_type: String,
    pub message: String,
    pub scheduled_for: DateTime<Utc>,
    pub completed: bool,
    #[serde(default)]
    pub repeat_interval_hours: Option<u32>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub cancelled_at: Option<DateTime<Utc>>,
}

/// Audit event types the engine writes itself. Anything else is carried
/// through as `Custom`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AuditEventType {
    LeadCreated,
    StatusChanged,
    StageTransition,
    QualificationUpdated,
    ReminderCompleted,
    Custom(String),
}

impl AuditEventType {
    pub fn as_str(&self) -> &str {
        match self {
            AuditEventType::LeadCreated => "lead_created",
            AuditEventType::StatusChanged => "status_changed",
            AuditEventType::StageTransition => "stage_transition",
            AuditEventType::QualificationUpdated => "qualification_updated",
            AuditEventType::ReminderCompleted => "reminder_completed",
            AuditEventType::Custom(value) => value,
        }
    }

    pub fn parse(value: &str) -> Self {
        match value.trim() {
            "lead_created" => AuditEventType::LeadCreated,
            "status_changed" => AuditEventType::StatusChanged,
            "stage_transition" => AuditEventType::StageTransition,
            "qualification_updated" => AuditEventType::QualificationUpdated,
            "reminder_completed" => AuditEventType::ReminderCompleted,
            other => AuditEventType::Custom(other.to_string()),
        }
    }
}

impl fmt::Display for AuditEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for AuditEventType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for AuditEventType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        Ok(AuditEventType::parse(&value))
    }
}

/// Append-only record of something that happened to a lead or the system.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditEvent {
    pub seq: i64,
    pub id: String,
    #[serde(default)]
    pub lead_id: Option<String>,
    pub event_type: AuditEventType,
    pub payload: Value,
    pub ts: DateTime<Utc>,
    #[serde(default)]
    pub actor_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Interaction {
    pub id: String,
    pub lead_id: String,
    pub kind: String,
    pub stage: Stage,
    pub summary: String,
    pub occurred_at: DateTime<Utc>,
}

/// Touchpoint summary over one cadence window. Derived on demand, never stored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActivitySnapshot {
    pub window_hours: u32,
    pub touchpoints: u32,
    pub activity_score: u8,
    #[serde(default)]
    pub last_touch_at: Option<DateTime<Utc>>,
    pub recommended_action: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Healthy,
    AtRisk,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Healthy => "healthy",
            RiskLevel::AtRisk => "at_risk",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inbound domain events the automation engine knows how to map to reminders.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AutomationEvent {
    VideoSent,
    NoShow,
}

impl AutomationEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            AutomationEvent::VideoSent => "VIDEO_SENT",
            AutomationEvent::NoShow => "NO_SHOW",
        }
    }
}

impl fmt::Display for AutomationEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AutomationEvent {
    type Err = CoreError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let normalized = input
            .trim()
            .to_uppercase()
            .replace(|ch: char| ch == '-' || ch == ' ', "_");
        match normalized.as_str() {
            "VIDEO_SENT" => Ok(AutomationEvent::VideoSent),
            "NO_SHOW" => Ok(AutomationEvent::NoShow),
            _ => Err(CoreError::UnknownAutomationEvent(input.trim().to_string())),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
    pub has_more: bool,
}
