use chrono::{DateTime, SecondsFormat, Utc};
use leadflow_core::{
    new_id, AuditEvent, AuditEventType, Interaction, Lead, NewLead, QualificationBlob, Reminder,
    Stage,
};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row, Transaction};
use serde_json::Value;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

pub const LEADFLOW_SCHEMA_VERSION: i64 = 1;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("timestamp parse error: {0}")]
    Timestamp(String),
    #[error("unsupported schema version {found}, max supported {supported}")]
    UnsupportedSchemaVersion { found: i64, supported: i64 },
    #[error("store lock poisoned")]
    LockPoisoned,
}

/// Store handle shared between the orchestrator and the automation worker.
pub type SharedStore = Arc<Mutex<LeadStore>>;

pub fn shared(store: LeadStore) -> SharedStore {
    Arc::new(Mutex::new(store))
}

pub fn lock_store(store: &SharedStore) -> Result<MutexGuard<'_, LeadStore>, StorageError> {
    store.lock().map_err(|_| StorageError::LockPoisoned)
}

/// Filters accepted by [`LeadStore::audit_events`]. Bounds are inclusive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuditFilter {
    pub lead_id: Option<String>,
    pub event_type: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

/// Open transaction on the store connection. Statements issued through the
/// owning [`LeadStore`] while this is alive join it; dropping without
/// [`StoreTransaction::commit`] rolls everything back.
pub struct StoreTransaction<'a> {
    tx: Transaction<'a>,
}

impl StoreTransaction<'_> {
    pub fn commit(self) -> Result<(), StorageError> {
        self.tx.commit()?;
        Ok(())
    }

    pub fn rollback(self) -> Result<(), StorageError> {
        self.tx.rollback()?;
        Ok(())
    }
}

pub struct LeadStore {
    conn: Connection,
}

impl LeadStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    pub fn schema_version(&self) -> Result<i64, StorageError> {
        Ok(self
            .conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))?)
    }

    pub fn migrate(&self) -> Result<(), StorageError> {
        let current = self.schema_version()?;
        if current > LEADFLOW_SCHEMA_VERSION {
            return Err(StorageError::UnsupportedSchemaVersion {
                found: current,
                supported: LEADFLOW_SCHEMA_VERSION,
            });
        }

        if current < 1 {
            let sql = include_str!("../migrations/0001_leadflow_schema.sql");
            self.conn.execute_batch(sql)?;
            self.conn
                .execute("PRAGMA user_version = 1", [])
                .map(|_| ())?;
        }

        Ok(())
    }

    pub fn begin(&self) -> Result<StoreTransaction<'_>, StorageError> {
        let tx = self.conn.unchecked_transaction()?;
        Ok(StoreTransaction { tx })
    }

    pub fn insert_lead(&self, input: &NewLead, now: DateTime<Utc>) -> Result<Lead, StorageError> {
        let lead = Lead {
            id: new_id(),
            name: input.name.trim().to_string(),
            email: input.email.clone(),
            phone: input.phone.clone(),
            stage: input.stage.unwrap_or_default(),
            stage_entered_at: now,
            notes: input.notes.clone(),
            next_action: None,
            next_action_date: None,
            qualification: input.qualification.clone(),
            created_at: now,
            updated_at: now,
        };
        let qualification_json = to_json(&lead.qualification)?;

        self.conn.execute(
            "
            INSERT INTO leads (
                id,
                name,
                email,
                phone,
                stage,
                stage_entered_at,
                notes,
                next_action,
                next_action_date,
                qualification_json,
                created_at,
                updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, NULL, NULL, ?8, ?9, ?10)
            ",
            params![
                lead.id,
                lead.name,
                lead.email,
                lead.phone,
                lead.stage.as_str(),
                format_timestamp(lead.stage_entered_at),
                lead.notes,
                qualification_json,
                format_timestamp(lead.created_at),
                format_timestamp(lead.updated_at),
            ],
        )?;

        Ok(lead)
    }

    pub fn lead(&self, lead_id: &str) -> Result<Option<Lead>, StorageError> {
        let lead = self
            .conn
            .query_row(
                "
                SELECT id, name, email, phone, stage, stage_entered_at, notes, next_action,
                       next_action_date, qualification_json, created_at, updated_at
                FROM leads
                WHERE id = ?1
                ",
                [lead_id],
                lead_from_row,
            )
            .optional()?;

        Ok(lead)
    }

    /// Writes a new stage only if the stored stage still equals `expected`.
    /// Returns `false` when another writer moved the lead first.
    pub fn update_lead_stage(
        &self,
        lead_id: &str,
        expected: Stage,
        stage: Stage,
        next_action: &str,
        next_action_date: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool, StorageError> {
        let changes = self.conn.execute(
            "
            UPDATE leads
            SET stage = ?3,
                stage_entered_at = ?4,
                next_action = ?5,
                next_action_date = ?6,
                updated_at = ?4
            WHERE id = ?1 AND stage = ?2
            ",
            params![
                lead_id,
                expected.as_str(),
                stage.as_str(),
                format_timestamp(now),
                next_action,
                format_timestamp(next_action_date),
            ],
        )?;

        Ok(changes > 0)
    }

    /// Merges `patch` into the stored qualification blob. `null` values remove keys.
    pub fn merge_qualification(
        &self,
        lead_id: &str,
        patch: &QualificationBlob,
        now: DateTime<Utc>,
    ) -> Result<Option<Lead>, StorageError> {
        let Some(mut lead) = self.lead(lead_id)? else {
            return Ok(None);
        };

        for (key, value) in patch {
            if value.is_null() {
                lead.qualification.remove(key);
            } else {
                lead.qualification.insert(key.clone(), value.clone());
            }
        }
        lead.updated_at = now;

        self.conn.execute(
            "UPDATE leads SET qualification_json = ?2, updated_at = ?3 WHERE id = ?1",
            params![
                lead_id,
                to_json(&lead.qualification)?,
                format_timestamp(now)
            ],
        )?;

        Ok(Some(lead))
    }

    pub fn insert_reminder(&self, reminder: &Reminder) -> Result<(), StorageError> {
        self.conn.execute(
            "
            INSERT INTO reminders (
                id,
                lead_id,
                reminder_type,
                message,
                scheduled_for,
                completed,
                repeat_interval_hours,
                created_at,
                cancelled_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ",
            params![
                reminder.id,
                reminder.lead_id,
                reminder.reminder_type,
                reminder.message,
                format_timestamp(reminder.scheduled_for),
                reminder.completed,
                reminder.repeat_interval_hours.map(i64::from),
                format_timestamp(reminder.created_at),
                reminder.cancelled_at.map(format_timestamp),
            ],
        )?;
        Ok(())
    }

    /// Inserts `reminder` unless an uncompleted reminder of the same type
    /// already exists for the lead. The existence check and the insert are one
    /// statement, so concurrent writers on the same database cannot both win.
    pub fn insert_reminder_if_absent(&self, reminder: &Reminder) -> Result<bool, StorageError> {
        let changes = self.conn.execute(
            "
            INSERT INTO reminders (
                id,
                lead_id,
                reminder_type,
                message,
                scheduled_for,
                completed,
                repeat_interval_hours,
                created_at,
                cancelled_at
            )
            SELECT ?1, ?2, ?3, ?4, ?5, 0, ?6, ?7, NULL
            WHERE NOT EXISTS (
                SELECT 1 FROM reminders
                WHERE lead_id = ?2 AND reminder_type = ?3 AND completed = 0
            )
            ",
            params![
                reminder.id,
                reminder.lead_id,
                reminder.reminder_type,
                reminder.message,
                format_timestamp(reminder.scheduled_for),
                reminder.repeat_interval_hours.map(i64::from),
                format_timestamp(reminder.created_at),
            ],
        )?;

        Ok(changes > 0)
    }

    pub fn reminder(&self, reminder_id: &str) -> Result<Option<Reminder>, StorageError> {
        let reminder = self
            .conn
            .query_row(
                &format!("{REMINDER_SELECT} WHERE id = ?1"),
                [reminder_id],
                reminder_from_row,
            )
            .optional()?;
        Ok(reminder)
    }

    pub fn pending_reminder(
        &self,
        lead_id: &str,
        reminder_type: &str,
    ) -> Result<Option<Reminder>, StorageError> {
        let reminder = self
            .conn
            .query_row(
                &format!(
                    "{REMINDER_SELECT}
                    WHERE lead_id = ?1 AND reminder_type = ?2 AND completed = 0
                    ORDER BY scheduled_for ASC
                    LIMIT 1"
                ),
                params![lead_id, reminder_type],
                reminder_from_row,
            )
            .optional()?;
        Ok(reminder)
    }

    pub fn pending_reminders_for_lead(&self, lead_id: &str) -> Result<Vec<Reminder>, StorageError> {
        let mut statement = self.conn.prepare(&format!(
            "{REMINDER_SELECT}
            WHERE lead_id = ?1 AND completed = 0
            ORDER BY scheduled_for ASC, created_at ASC"
        ))?;
        let rows = statement.query_map([lead_id], reminder_from_row)?;

        let mut reminders = Vec::new();
        for row in rows {
            reminders.push(row?);
        }
        Ok(reminders)
    }

    pub fn due_reminders(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<Reminder>, StorageError> {
        let mut statement = self.conn.prepare(&format!(
            "{REMINDER_SELECT}
            WHERE completed = 0 AND scheduled_for <= ?1
            ORDER BY scheduled_for ASC
            LIMIT ?2"
        ))?;
        let rows = statement.query_map(
            params![format_timestamp(now), i64::from(limit)],
            reminder_from_row,
        )?;

        let mut reminders = Vec::new();
        for row in rows {
            reminders.push(row?);
        }
        Ok(reminders)
    }

    /// Closes every uncompleted reminder of `reminder_type` for the lead,
    /// stamping `cancelled_at`. Returns the number of reminders closed.
    pub fn cancel_pending_reminders(
        &self,
        lead_id: &str,
        reminder_type: &str,
        now: DateTime<Utc>,
    ) -> Result<usize, StorageError> {
        let changes = self.conn.execute(
            "
            UPDATE reminders
            SET completed = 1, cancelled_at = ?3
            WHERE lead_id = ?1 AND reminder_type = ?2 AND completed = 0
            ",
            params![lead_id, reminder_type, format_timestamp(now)],
        )?;
        Ok(changes)
    }

    pub fn complete_reminder(&self, reminder_id: &str) -> Result<bool, StorageError> {
        let changes = self.conn.execute(
            "UPDATE reminders SET completed = 1 WHERE id = ?1",
            [reminder_id],
        )?;
        Ok(changes > 0)
    }

    pub fn append_audit_event(
        &self,
        lead_id: Option<&str>,
        event_type: &AuditEventType,
        payload: &Value,
        ts: DateTime<Utc>,
        actor_id: Option<&str>,
    ) -> Result<AuditEvent, StorageError> {
        let id = new_id();
        self.conn.execute(
            "
            INSERT INTO audit_events (
                id,
                lead_id,
                event_type,
                payload_json,
                ts,
                actor_id
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ",
            params![
                id,
                lead_id,
                event_type.as_str(),
                to_json(payload)?,
                format_timestamp(ts),
                actor_id,
            ],
        )?;
        let seq = self.conn.last_insert_rowid();

        Ok(AuditEvent {
            seq,
            id,
            lead_id: lead_id.map(str::to_string),
            event_type: event_type.clone(),
            payload: payload.clone(),
            ts,
            actor_id: actor_id.map(str::to_string),
        })
    }

    pub fn latest_audit_ts(&self, lead_id: &str) -> Result<Option<DateTime<Utc>>, StorageError> {
        let ts = self
            .conn
            .query_row(
                "
                SELECT ts FROM audit_events
                WHERE lead_id = ?1
                ORDER BY ts DESC, seq DESC
                LIMIT 1
                ",
                [lead_id],
                |row| row.get::<_, String>(0),
            )
            .optional()?;

        ts.map(parse_timestamp).transpose()
    }

    /// Most-recent-first page of audit events.
    pub fn audit_events(
        &self,
        filter: &AuditFilter,
        limit: u32,
        offset: u64,
    ) -> Result<Vec<AuditEvent>, StorageError> {
        let (where_clause, mut values) = audit_where_clause(filter);
        values.push(SqlValue::Integer(i64::from(limit)));
        values.push(SqlValue::Integer(i64::try_from(offset).unwrap_or(i64::MAX)));

        let sql = format!(
            "
            SELECT seq, id, lead_id, event_type, payload_json, ts, actor_id
            FROM audit_events
            {where_clause}
            ORDER BY ts DESC, seq DESC
            LIMIT ? OFFSET ?
            "
        );
        let mut statement = self.conn.prepare(&sql)?;
        let rows = statement.query_map(params_from_iter(values.iter()), audit_event_from_row)?;

        let mut events = Vec::new();
        for row in rows {
            events.push(row?);
        }
        Ok(events)
    }

    pub fn audit_event_count(&self, filter: &AuditFilter) -> Result<u64, StorageError> {
        let (where_clause, values) = audit_where_clause(filter);
        let count: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM audit_events {where_clause}"),
            params_from_iter(values.iter()),
            |row| row.get(0),
        )?;
        Ok(count.max(0) as u64)
    }

    pub fn record_interaction(&self, interaction: &Interaction) -> Result<(), StorageError> {
        self.conn.execute(
            "
            INSERT INTO interactions (id, lead_id, kind, stage, summary, occurred_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ",
            params![
                interaction.id,
                interaction.lead_id,
                interaction.kind,
                interaction.stage.as_str(),
                interaction.summary,
                format_timestamp(interaction.occurred_at),
            ],
        )?;
        Ok(())
    }

    /// Interactions for a lead with `from <= occurred_at <= to`, oldest first.
    pub fn interactions_between(
        &self,
        lead_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Interaction>, StorageError> {
        let mut statement = self.conn.prepare(
            "
            SELECT id, lead_id, kind, stage, summary, occurred_at
            FROM interactions
            WHERE lead_id = ?1 AND occurred_at >= ?2 AND occurred_at <= ?3
            ORDER BY occurred_at ASC
            ",
        )?;
        let rows = statement.query_map(
            params![lead_id, format_timestamp(from), format_timestamp(to)],
            |row| {
                Ok(Interaction {
                    id: row.get(0)?,
                    lead_id: row.get(1)?,
                    kind: row.get(2)?,
                    stage: Stage::parse_or_default(&row.get::<_, String>(3)?),
                    summary: row.get(4)?,
                    occurred_at: column_timestamp(row, 5)?,
                })
            },
        )?;

        let mut interactions = Vec::new();
        for row in rows {
            interactions.push(row?);
        }
        Ok(interactions)
    }

    pub fn table_exists(&self, table_name: &str) -> Result<bool, StorageError> {
        let exists = self
            .conn
            .query_row(
                "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
                [table_name],
                |_| Ok(()),
            )
            .optional()?
            .is_some();
        Ok(exists)
    }
}

const REMINDER_SELECT: &str = "
    SELECT id, lead_id, reminder_type, message, scheduled_for, completed,
           repeat_interval_hours, created_at, cancelled_at
    FROM reminders";

fn audit_where_clause(filter: &AuditFilter) -> (String, Vec<SqlValue>) {
    let mut clauses = Vec::new();
    let mut values = Vec::new();

    if let Some(lead_id) = &filter.lead_id {
        clauses.push("lead_id = ?");
        values.push(SqlValue::Text(lead_id.clone()));
    }
    if let Some(event_type) = &filter.event_type {
        clauses.push("event_type = ?");
        values.push(SqlValue::Text(event_type.clone()));
    }
    if let Some(from) = filter.from {
        clauses.push("ts >= ?");
        values.push(SqlValue::Text(format_timestamp(from)));
    }
    if let Some(to) = filter.to {
        clauses.push("ts <= ?");
        values.push(SqlValue::Text(format_timestamp(to)));
    }

    if clauses.is_empty() {
        (String::new(), values)
    } else {
        (format!("WHERE {}", clauses.join(" AND ")), values)
    }
}

fn lead_from_row(row: &Row<'_>) -> rusqlite::Result<Lead> {
    let qualification_json: String = row.get(9)?;
    let qualification = match serde_json::from_str::<Value>(&qualification_json)
        .map_err(|err| conversion_failure(9, err))?
    {
        Value::Object(map) => map,
        _ => QualificationBlob::new(),
    };

    Ok(Lead {
        id: row.get(0)?,
        name: row.get(1)?,
        email: row.get(2)?,
        phone: row.get(3)?,
        stage: Stage::parse_or_default(&row.get::<_, String>(4)?),
        stage_entered_at: column_timestamp(row, 5)?,
        notes: row.get(6)?,
        next_action: row.get(7)?,
        next_action_date: optional_column_timestamp(row, 8)?,
        qualification,
        created_at: column_timestamp(row, 10)?,
        updated_at: column_timestamp(row, 11)?,
    })
}

fn reminder_from_row(row: &Row<'_>) -> rusqlite::Result<Reminder> {
    let repeat_interval_hours: Option<i64> = row.get(6)?;
    Ok(Reminder {
        id: row.get(0)?,
        lead_id: row.get(1)?,
        reminder_type: row.get(2)?,
        message: row.get(3)?,
        scheduled_for: column_timestamp(row, 4)?,
        completed: row.get(5)?,
        repeat_interval_hours: repeat_interval_hours.and_then(|hours| u32::try_from(hours).ok()),
        created_at: column_timestamp(row, 7)?,
        cancelled_at: optional_column_timestamp(row, 8)?,
    })
}

fn audit_event_from_row(row: &Row<'_>) -> rusqlite::Result<AuditEvent> {
    let payload_json: String = row.get(4)?;
    let payload = serde_json::from_str(&payload_json).map_err(|err| conversion_failure(4, err))?;
    Ok(AuditEvent {
        seq: row.get(0)?,
        id: row.get(1)?,
        lead_id: row.get(2)?,
        event_type: AuditEventType::parse(&row.get::<_, String>(3)?),
        payload,
        ts: column_timestamp(row, 5)?,
        actor_id: row.get(6)?,
    })
}

fn column_timestamp(row: &Row<'_>, index: usize) -> rusqlite::Result<DateTime<Utc>> {
    let value: String = row.get(index)?;
    DateTime::parse_from_rfc3339(&value)
        .map(|timestamp| timestamp.with_timezone(&Utc))
        .map_err(|err| conversion_failure(index, err))
}

fn optional_column_timestamp(
    row: &Row<'_>,
    index: usize,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let value: Option<String> = row.get(index)?;
    value
        .map(|value| {
            DateTime::parse_from_rfc3339(&value)
                .map(|timestamp| timestamp.with_timezone(&Utc))
                .map_err(|err| conversion_failure(index, err))
        })
        .transpose()
}

fn conversion_failure<E>(index: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(index, rusqlite::types::Type::Text, Box::new(err))
}

fn to_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<String, StorageError> {
    serde_json::to_string(value).map_err(|err| StorageError::Serialization(err.to_string()))
}

/// Fixed-width RFC 3339 so lexical order in SQLite matches chronological order.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(value: String) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(&value)
        .map(|timestamp| timestamp.with_timezone(&Utc))
        .map_err(|err| StorageError::Timestamp(err.to_string()))
}
