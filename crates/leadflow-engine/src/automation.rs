use crate::scheduler::ReminderScheduler;
use chrono::{DateTime, Utc};
use leadflow_core::AutomationEvent;
use leadflow_storage::{lock_store, SharedStore};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum AutomationError {
    #[error("automation worker is not running")]
    WorkerGone,
    #[error("automation handler panicked: {0}")]
    Handler(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutomationRule {
    pub reminder_type: &'static str,
    pub delay_hours: u32,
    pub message: &'static str,
}

const VIDEO_SENT_RULES: [AutomationRule; 2] = [
    AutomationRule {
        reminder_type: "follow_up_24h",
        delay_hours: 24,
        message: "Check in on the video sent yesterday",
    },
    AutomationRule {
        reminder_type: "follow_up_48h",
        delay_hours: 48,
        message: "Second follow-up on the video",
    },
];

const NO_SHOW_RULES: [AutomationRule; 2] = [
    AutomationRule {
        reminder_type: "no_show_2h",
        delay_hours: 2,
        message: "Reach out after the missed call",
    },
    AutomationRule {
        reminder_type: "no_show_1d",
        delay_hours: 24,
        message: "Offer a new time for the missed call",
    },
];

pub fn rules_for(event: AutomationEvent) -> &'static [AutomationRule] {
    match event {
        AutomationEvent::VideoSent => &VIDEO_SENT_RULES,
        AutomationEvent::NoShow => &NO_SHOW_RULES,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutomationRequest {
    pub event_name: String,
    #[serde(default)]
    pub lead_id: Option<String>,
}

impl AutomationRequest {
    pub fn new(event: AutomationEvent, lead_id: impl Into<String>) -> Self {
        Self {
            event_name: event.as_str().to_string(),
            lead_id: Some(lead_id.into()),
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct AutomationReport {
    pub event: Option<AutomationEvent>,
    pub ignored: bool,
    pub scheduled: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Maps inbound events to reminder schedules. Best effort: failures are
/// logged and counted, never returned.
#[derive(Clone)]
pub struct AutomationTriggerEngine {
    store: SharedStore,
    scheduler: ReminderScheduler,
}

impl AutomationTriggerEngine {
    pub fn new(store: SharedStore) -> Self {
        Self {
            store,
            scheduler: ReminderScheduler::new(),
        }
    }

    pub fn handle_event(&self, request: &AutomationRequest) -> AutomationReport {
        self.handle_event_at(request, Utc::now())
    }

    pub fn handle_event_at(
        &self,
        request: &AutomationRequest,
        now: DateTime<Utc>,
    ) -> AutomationReport {
        let mut report = AutomationReport::default();

        let Ok(event) = request.event_name.parse::<AutomationEvent>() else {
            debug!(event = "automation_unmapped", name = %request.event_name);
            report.ignored = true;
            return report;
        };
        report.event = Some(event);

        let Some(lead_id) = request
            .lead_id
            .as_deref()
            .filter(|lead_id| !lead_id.trim().is_empty())
        else {
            debug!(event = "automation_without_lead", name = %event);
            report.ignored = true;
            return report;
        };

        let rules = rules_for(event);
        let store = match lock_store(&self.store) {
            Ok(store) => store,
            Err(err) => {
                warn!(event = "automation_failed", name = %event, lead_id = %lead_id, error = %err);
                report.failed = rules.len();
                return report;
            }
        };

        for rule in rules {
            match self.scheduler.schedule_typed(
                &store,
                lead_id,
                rule.reminder_type,
                rule.message,
                rule.delay_hours,
                true,
                now,
            ) {
                Ok(scheduled) if scheduled.created => report.scheduled += 1,
                Ok(_) => report.skipped += 1,
                Err(err) => {
                    warn!(
                        event = "automation_failed",
                        name = %event,
                        lead_id = %lead_id,
                        reminder_type = rule.reminder_type,
                        error = %err
                    );
                    report.failed += 1;
                }
            }
        }

        info!(
            event = "automation_handled",
            name = %event,
            lead_id = %lead_id,
            scheduled = report.scheduled,
            skipped = report.skipped,
            failed = report.failed
        );
        report
    }
}

/// Sending half of the automation queue. Cheap to clone; the worker stops once
/// every dispatcher is dropped.
#[derive(Debug, Clone)]
pub struct AutomationDispatcher {
    sender: mpsc::UnboundedSender<AutomationRequest>,
}

impl AutomationDispatcher {
    pub fn dispatch(&self, request: AutomationRequest) -> Result<(), AutomationError> {
        self.sender
            .send(request)
            .map_err(|_| AutomationError::WorkerGone)
    }
}

pub struct AutomationInbox {
    receiver: mpsc::UnboundedReceiver<AutomationRequest>,
}

impl AutomationInbox {
    /// Pops a queued request without waiting. Used by callers that drain the
    /// queue inline instead of running a worker.
    pub fn try_next(&mut self) -> Option<AutomationRequest> {
        self.receiver.try_recv().ok()
    }
}

pub fn automation_channel() -> (AutomationDispatcher, AutomationInbox) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (
        AutomationDispatcher { sender },
        AutomationInbox { receiver },
    )
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AutomationWorkerStats {
    pub requests: usize,
    pub scheduled: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Drains the inbox on a tokio task, running each request on the blocking
/// pool. Returns totals once the queue closes.
pub fn spawn_automation_worker(
    engine: AutomationTriggerEngine,
    mut inbox: AutomationInbox,
) -> JoinHandle<AutomationWorkerStats> {
    tokio::spawn(async move {
        let mut stats = AutomationWorkerStats::default();
        while let Some(request) = inbox.receiver.recv().await {
            stats.requests += 1;
            let engine = engine.clone();
            let name = request.event_name.clone();
            match tokio::task::spawn_blocking(move || engine.handle_event(&request)).await {
                Ok(report) => {
                    stats.scheduled += report.scheduled;
                    stats.skipped += report.skipped;
                    stats.failed += report.failed;
                }
                Err(err) => {
                    let err = AutomationError::Handler(err.to_string());
                    warn!(event = "automation_failed", name = %name, error = %err);
                    stats.failed += 1;
                }
            }
        }
        debug!(event = "automation_worker_stopped", requests = stats.requests);
        stats
    })
}
