use crate::EngineConfig;
use chrono::{DateTime, Duration, Utc};
use leadflow_core::{AuditEvent, AuditEventType, Page};
use leadflow_storage::{AuditFilter, LeadStore, StorageError};
use serde_json::Value;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuditQuery {
    pub lead_id: Option<String>,
    pub event_type: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    /// 1-based; 0 is read as 1.
    pub page: u32,
    pub page_size: Option<u32>,
}

/// Append-only event log. There is no update or delete path.
#[derive(Debug, Clone)]
pub struct AuditLog {
    max_page_size: u32,
    default_page_size: u32,
}

impl AuditLog {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            max_page_size: config.audit_max_page_size.max(1),
            default_page_size: config.audit_default_page_size.max(1),
        }
    }

    /// Appends an event. Per-lead timestamps are kept strictly increasing so
    /// events written in the same instant still read back in write order.
    pub fn record(
        &self,
        store: &LeadStore,
        event_type: AuditEventType,
        payload: Value,
        lead_id: Option<&str>,
        actor_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<AuditEvent, StorageError> {
        let mut ts = now;
        if let Some(lead_id) = lead_id {
            if let Some(latest) = store.latest_audit_ts(lead_id)? {
                if latest >= ts {
                    ts = latest + Duration::microseconds(1);
                }
            }
        }
        store.append_audit_event(lead_id, &event_type, &payload, ts, actor_id)
    }

    pub fn query(
        &self,
        store: &LeadStore,
        query: &AuditQuery,
    ) -> Result<Page<AuditEvent>, StorageError> {
        let page = query.page.max(1);
        let page_size = query
            .page_size
            .unwrap_or(self.default_page_size)
            .clamp(1, self.max_page_size);
        let filter = AuditFilter {
            lead_id: query.lead_id.clone(),
            event_type: query.event_type.clone(),
            from: query.from,
            to: query.to,
        };

        let offset = u64::from(page - 1) * u64::from(page_size);
        let total = store.audit_event_count(&filter)?;
        let items = store.audit_events(&filter, page_size, offset)?;
        let has_more = offset + (items.len() as u64) < total;

        Ok(Page {
            items,
            total,
            page,
            page_size,
            has_more,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 1, 10, 0, 0)
            .single()
            .expect("valid timestamp")
    }

    #[test]
    fn same_instant_events_get_increasing_timestamps() {
        let store = LeadStore::open_in_memory().expect("db");
        let log = AuditLog::new(&EngineConfig::default());

        let first = log
            .record(
                &store,
                AuditEventType::StatusChanged,
                json!({}),
                Some("lead-1"),
                None,
                ts(),
            )
            .expect("record");
        let second = log
            .record(
                &store,
                AuditEventType::StageTransition,
                json!({}),
                Some("lead-1"),
                None,
                ts(),
            )
            .expect("record");
        assert!(second.ts > first.ts);

        let page = log
            .query(
                &store,
                &AuditQuery {
                    lead_id: Some("lead-1".to_string()),
                    ..AuditQuery::default()
                },
            )
            .expect("query");
        assert_eq!(page.items[0].event_type, AuditEventType::StageTransition);
        assert_eq!(page.items[1].event_type, AuditEventType::StatusChanged);
    }

    #[test]
    fn system_events_without_lead_are_recorded() {
        let store = LeadStore::open_in_memory().expect("db");
        let log = AuditLog::new(&EngineConfig::default());
        let event = log
            .record(
                &store,
                AuditEventType::Custom("catalog_reloaded".to_string()),
                json!({"stages": 9}),
                None,
                Some("system"),
                ts(),
            )
            .expect("record");
        assert!(event.lead_id.is_none());
        assert_eq!(event.ts, ts());
    }

    #[test]
    fn page_size_is_clamped_to_ceiling() {
        let store = LeadStore::open_in_memory().expect("db");
        let log = AuditLog::new(&EngineConfig::default());
        for index in 0..260 {
            log.record(
                &store,
                AuditEventType::Custom("bulk".to_string()),
                json!({ "index": index }),
                Some("lead-bulk"),
                None,
                ts(),
            )
            .expect("record");
        }

        let first = log
            .query(
                &store,
                &AuditQuery {
                    page: 0,
                    page_size: Some(1_000),
                    ..AuditQuery::default()
                },
            )
            .expect("query");
        assert_eq!(first.page, 1);
        assert_eq!(first.page_size, 250);
        assert_eq!(first.items.len(), 250);
        assert_eq!(first.total, 260);
        assert!(first.has_more);
        assert_eq!(first.items[0].payload, json!({ "index": 259 }));

        let second = log
            .query(
                &store,
                &AuditQuery {
                    page: 2,
                    page_size: Some(1_000),
                    ..AuditQuery::default()
                },
            )
            .expect("query");
        assert_eq!(second.items.len(), 10);
        assert!(!second.has_more);
    }
}
