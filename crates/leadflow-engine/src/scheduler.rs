use crate::LifecycleError;
use chrono::{DateTime, Duration, Utc};
use leadflow_core::stage::definition;
use leadflow_core::{new_id, Reminder, Stage};
use leadflow_storage::LeadStore;
use serde::Serialize;
use tracing::debug;

#[derive(Debug, Clone, Default)]
pub struct ScheduleOptions {
    /// Overrides the catalog cadence for the stage.
    pub cadence_hours: Option<u32>,
    pub context: Option<String>,
    pub skip_if_exists: bool,
    pub repeat_interval_hours: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScheduledReminder {
    pub reminder: Reminder,
    /// `false` when an uncompleted reminder of the same type already existed
    /// and was returned instead.
    pub created: bool,
}

/// Creates and cancels cadence reminders. Callers are expected to have
/// confirmed the lead exists.
#[derive(Debug, Clone, Default)]
pub struct ReminderScheduler;

impl ReminderScheduler {
    pub fn new() -> Self {
        Self
    }

    /// Schedules the follow-up for `stage`. The reminder type comes from the
    /// stage catalog, so re-entering a stage always hits the same dedup key.
    pub fn schedule(
        &self,
        store: &LeadStore,
        lead_id: &str,
        stage: Stage,
        options: ScheduleOptions,
        now: DateTime<Utc>,
    ) -> Result<ScheduledReminder, LifecycleError> {
        let stage_definition = definition(stage);
        let cadence_hours = options
            .cadence_hours
            .unwrap_or(stage_definition.cadence_hours);
        let mut message = format!(
            "{}: {}",
            stage_definition.label, stage_definition.next_action
        );
        if let Some(context) = options
            .context
            .as_deref()
            .map(str::trim)
            .filter(|context| !context.is_empty())
        {
            message.push_str(&format!(" ({context})"));
        }

        let reminder = Reminder {
            id: new_id(),
            lead_id: lead_id.to_string(),
            reminder_type: stage_definition.reminder_type.to_string(),
            message,
            scheduled_for: now + Duration::hours(i64::from(cadence_hours)),
            completed: false,
            repeat_interval_hours: options.repeat_interval_hours,
            created_at: now,
            cancelled_at: None,
        };
        self.insert(store, reminder, options.skip_if_exists)
    }

    /// Schedules a reminder with a caller-chosen type, used by automation rules.
    pub fn schedule_typed(
        &self,
        store: &LeadStore,
        lead_id: &str,
        reminder_type: &str,
        message: &str,
        delay_hours: u32,
        skip_if_exists: bool,
        now: DateTime<Utc>,
    ) -> Result<ScheduledReminder, LifecycleError> {
        let reminder = Reminder {
            id: new_id(),
            lead_id: lead_id.to_string(),
            reminder_type: reminder_type.to_string(),
            message: message.to_string(),
            scheduled_for: now + Duration::hours(i64::from(delay_hours)),
            completed: false,
            repeat_interval_hours: None,
            created_at: now,
            cancelled_at: None,
        };
        self.insert(store, reminder, skip_if_exists)
    }

    fn insert(
        &self,
        store: &LeadStore,
        reminder: Reminder,
        skip_if_exists: bool,
    ) -> Result<ScheduledReminder, LifecycleError> {
        if !skip_if_exists {
            store.insert_reminder(&reminder)?;
            return Ok(ScheduledReminder {
                reminder,
                created: true,
            });
        }

        if store.insert_reminder_if_absent(&reminder)? {
            return Ok(ScheduledReminder {
                reminder,
                created: true,
            });
        }

        match store.pending_reminder(&reminder.lead_id, &reminder.reminder_type)? {
            Some(existing) => {
                debug!(
                    event = "reminder_skipped",
                    lead_id = %reminder.lead_id,
                    reminder_type = %reminder.reminder_type,
                    existing_id = %existing.id
                );
                Ok(ScheduledReminder {
                    reminder: existing,
                    created: false,
                })
            }
            None => {
                store.insert_reminder(&reminder)?;
                Ok(ScheduledReminder {
                    reminder,
                    created: true,
                })
            }
        }
    }

    pub fn cancel_pending(
        &self,
        store: &LeadStore,
        lead_id: &str,
        reminder_type: &str,
        now: DateTime<Utc>,
    ) -> Result<usize, LifecycleError> {
        Ok(store.cancel_pending_reminders(lead_id, reminder_type, now)?)
    }

    /// Flips `completed` on a reminder. Nothing else is scheduled in response.
    pub fn mark_completed(
        &self,
        store: &LeadStore,
        reminder_id: &str,
    ) -> Result<Reminder, LifecycleError> {
        if !store.complete_reminder(reminder_id)? {
            return Err(LifecycleError::NotFound {
                entity: "reminder",
                id: reminder_id.to_string(),
            });
        }
        store
            .reminder(reminder_id)?
            .ok_or_else(|| LifecycleError::NotFound {
                entity: "reminder",
                id: reminder_id.to_string(),
            })
    }
}
