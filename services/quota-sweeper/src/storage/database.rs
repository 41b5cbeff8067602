use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use reseller_quota_ledger::{
    AccountStore, ChildAccount, EventQuery, Quota, Reseller, StoreError, UsageEvent,
};
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

use super::error::StorageError;
use super::schema::init_database;
use super::ACCOUNT_DB_FILENAME;

struct ResellerRow {
    id: String,
    name: String,
    parent_id: Option<String>,
    quota_bytes: Option<i64>,
}

impl ResellerRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            parent_id: row.get(2)?,
            quota_bytes: row.get(3)?,
        })
    }

    fn into_reseller(self) -> Result<Reseller, StoreError> {
        let quota = match self.quota_bytes {
            Some(value) if value < 0 => {
                return Err(StoreError::InvalidQuota {
                    reseller_id: self.id,
                    value,
                })
            }
            Some(value) => Some(Quota::from_bytes(value.unsigned_abs())),
            None => None,
        };

        Ok(Reseller {
            id: self.id,
            name: self.name,
            parent_id: self.parent_id,
            quota,
        })
    }
}

struct EventRow {
    id: String,
    child_id: String,
    reseller_id: Option<String>,
    delta_bytes: i64,
    recorded_at: String,
    note: String,
}

impl EventRow {
    fn into_event(self) -> Result<UsageEvent, StorageError> {
        let id = Uuid::parse_str(&self.id)
            .map_err(|err| StorageError::InvalidValue(format!("event id {}: {err}", self.id)))?;
        let recorded_at = DateTime::parse_from_rfc3339(&self.recorded_at)
            .map_err(|err| {
                StorageError::InvalidValue(format!("event timestamp {}: {err}", self.recorded_at))
            })?
            .with_timezone(&Utc);

        let delta_bytes = loaded_bytes("delta_bytes", &self.child_id, self.delta_bytes)?;

        Ok(UsageEvent {
            id,
            child_id: self.child_id,
            reseller_id: self.reseller_id,
            delta_bytes,
            recorded_at,
            note: self.note,
        })
    }
}

struct ChildRow {
    id: String,
    reseller_id: Option<String>,
    consumed_bytes: i64,
    usage_limit: Option<i64>,
    enabled: bool,
}

impl ChildRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            reseller_id: row.get(1)?,
            consumed_bytes: row.get(2)?,
            usage_limit: row.get(3)?,
            enabled: row.get(4)?,
        })
    }

    fn into_child(self) -> Result<ChildAccount, StorageError> {
        let consumed_bytes = loaded_bytes("consumed_bytes", &self.id, self.consumed_bytes)?;
        let usage_limit = self
            .usage_limit
            .map(|limit| loaded_bytes("usage_limit_bytes", &self.id, limit))
            .transpose()?;

        Ok(ChildAccount {
            id: self.id,
            reseller_id: self.reseller_id,
            consumed_bytes,
            usage_limit,
            enabled: self.enabled,
        })
    }
}

/// Byte counts live in signed INTEGER columns.
fn stored_bytes(field: &str, owner: &str, value: u64) -> Result<i64, StorageError> {
    i64::try_from(value).map_err(|_| {
        StorageError::InvalidValue(format!("{field} for {owner} out of range: {value}"))
    })
}

fn loaded_bytes(field: &str, owner: &str, value: i64) -> Result<u64, StorageError> {
    u64::try_from(value)
        .map_err(|_| StorageError::InvalidValue(format!("{field} for {owner} is negative: {value}")))
}

fn stored_quota(reseller_id: &str, quota: Option<Quota>) -> Result<Option<i64>, StorageError> {
    quota
        .map(|quota| stored_bytes("quota_bytes", reseller_id, quota.bytes()))
        .transpose()
}

/// Fixed-width UTC timestamps so that text comparison orders chronologically.
fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// SQLite-backed [`AccountStore`].
pub struct AccountDatabase {
    data_dir: PathBuf,
    conn: Mutex<Connection>,
}

impl AccountDatabase {
    pub fn new(data_dir: PathBuf) -> Result<Self, StorageError> {
        std::fs::create_dir_all(&data_dir)?;
        let db_path = data_dir.join(ACCOUNT_DB_FILENAME);
        let conn = Connection::open(&db_path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        init_database(&conn)?;

        Ok(Self {
            data_dir,
            conn: Mutex::new(conn),
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Inserts or replaces a reseller record. Intended for the host's
    /// provisioning path.
    pub fn upsert_reseller(&self, reseller: &Reseller) -> Result<(), StorageError> {
        let conn = self.conn()?;
        let now = timestamp(Utc::now());
        let quota = stored_quota(&reseller.id, reseller.quota)?;

        conn.execute(
            r#"
            INSERT INTO resellers (id, name, parent_id, quota_bytes, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                parent_id = excluded.parent_id,
                quota_bytes = excluded.quota_bytes,
                updated_at = excluded.updated_at
            "#,
            params![reseller.id, reseller.name, reseller.parent_id, quota, now, now],
        )?;
        Ok(())
    }

    pub fn upsert_child(&self, child: &ChildAccount) -> Result<(), StorageError> {
        let consumed = stored_bytes("consumed_bytes", &child.id, child.consumed_bytes)?;
        let usage_limit = child
            .usage_limit
            .map(|limit| stored_bytes("usage_limit_bytes", &child.id, limit))
            .transpose()?;
        let conn = self.conn()?;
        let now = timestamp(Utc::now());

        conn.execute(
            r#"
            INSERT INTO child_accounts (id, reseller_id, consumed_bytes, usage_limit_bytes, enabled, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(id) DO UPDATE SET
                reseller_id = excluded.reseller_id,
                consumed_bytes = excluded.consumed_bytes,
                usage_limit_bytes = excluded.usage_limit_bytes,
                enabled = excluded.enabled,
                updated_at = excluded.updated_at
            "#,
            params![
                child.id,
                child.reseller_id,
                consumed,
                usage_limit,
                child.enabled,
                now
            ],
        )?;
        Ok(())
    }

    /// Metering entry point: overwrites a child's consumed-bytes counter.
    pub fn set_consumed_bytes(&self, child_id: &str, bytes: u64) -> Result<(), StorageError> {
        let bytes = stored_bytes("consumed_bytes", child_id, bytes)?;
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE child_accounts SET consumed_bytes = ?2, updated_at = ?3 WHERE id = ?1",
            params![child_id, bytes, timestamp(Utc::now())],
        )?;
        if updated == 0 {
            return Err(StorageError::NotFound(child_id.to_string()));
        }
        Ok(())
    }

    /// Administrative re-enable. Not reachable from the ledger.
    pub fn enable_child(&self, child_id: &str) -> Result<(), StorageError> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE child_accounts SET enabled = 1, updated_at = ?2 WHERE id = ?1",
            params![child_id, timestamp(Utc::now())],
        )?;
        if updated == 0 {
            return Err(StorageError::NotFound(child_id.to_string()));
        }
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StorageError> {
        self.conn.lock().map_err(|_| StorageError::Poisoned)
    }

    fn load_reseller(&self, reseller_id: &str) -> Result<Option<ResellerRow>, StorageError> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT id, name, parent_id, quota_bytes FROM resellers WHERE id = ?1",
                params![reseller_id],
                ResellerRow::from_row,
            )
            .optional()?;
        Ok(row)
    }

    fn load_reseller_ids(&self) -> Result<Vec<String>, StorageError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT id FROM resellers ORDER BY id")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut ids = Vec::new();
        for row in rows {
            ids.push(row?);
        }
        Ok(ids)
    }

    fn load_sub_resellers(&self, reseller_id: &str) -> Result<Vec<String>, StorageError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT id FROM resellers WHERE parent_id = ?1 ORDER BY id")?;
        let rows = stmt.query_map(params![reseller_id], |row| row.get::<_, String>(0))?;

        let mut ids = Vec::new();
        for row in rows {
            ids.push(row?);
        }
        Ok(ids)
    }

    fn load_children(&self, reseller_id: &str) -> Result<Vec<ChildAccount>, StorageError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT id, reseller_id, consumed_bytes, usage_limit_bytes, enabled
            FROM child_accounts
            WHERE reseller_id = ?1
            ORDER BY id
            "#,
        )?;
        let rows = stmt.query_map(params![reseller_id], ChildRow::from_row)?;

        let mut children = Vec::new();
        for row in rows {
            children.push(row?.into_child()?);
        }
        Ok(children)
    }

    fn load_child(&self, child_id: &str) -> Result<Option<ChildAccount>, StorageError> {
        let conn = self.conn()?;
        let child = conn
            .query_row(
                r#"
                SELECT id, reseller_id, consumed_bytes, usage_limit_bytes, enabled
                FROM child_accounts
                WHERE id = ?1
                "#,
                params![child_id],
                ChildRow::from_row,
            )
            .optional()?;
        child.map(ChildRow::into_child).transpose()
    }

    fn write_disable(&self, child_id: &str) -> Result<bool, StorageError> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE child_accounts SET enabled = 0, updated_at = ?2 WHERE id = ?1 AND enabled = 1",
            params![child_id, timestamp(Utc::now())],
        )?;
        if updated > 0 {
            return Ok(true);
        }

        let exists = conn
            .query_row(
                "SELECT 1 FROM child_accounts WHERE id = ?1",
                params![child_id],
                |_| Ok(()),
            )
            .optional()?
            .is_some();
        if exists {
            Ok(false)
        } else {
            Err(StorageError::NotFound(child_id.to_string()))
        }
    }

    fn write_quota(&self, reseller_id: &str, quota: Option<Quota>) -> Result<(), StorageError> {
        let quota = stored_quota(reseller_id, quota)?;
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE resellers SET quota_bytes = ?2, updated_at = ?3 WHERE id = ?1",
            params![reseller_id, quota, timestamp(Utc::now())],
        )?;
        if updated == 0 {
            return Err(StorageError::NotFound(reseller_id.to_string()));
        }
        Ok(())
    }

    fn write_event(&self, event: &UsageEvent) -> Result<(), StorageError> {
        let delta = stored_bytes("delta_bytes", &event.child_id, event.delta_bytes)?;
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO usage_events (id, child_id, reseller_id, delta_bytes, recorded_at, note)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                event.id.to_string(),
                event.child_id,
                event.reseller_id,
                delta,
                timestamp(event.recorded_at),
                event.note
            ],
        )?;
        Ok(())
    }

    /// `owner_column` is one of the fixed event columns, never caller input.
    fn load_events(
        &self,
        owner_column: &str,
        owner_id: &str,
        query: &EventQuery,
    ) -> Result<Vec<UsageEvent>, StorageError> {
        let conn = self.conn()?;
        let since = query.since.map(timestamp);
        let until = query.until.map(timestamp);
        let limit = i64::try_from(query.limit).unwrap_or(i64::MAX);

        let mut stmt = conn.prepare(&format!(
            r#"
            SELECT id, child_id, reseller_id, delta_bytes, recorded_at, note
            FROM usage_events
            WHERE {owner_column} = ?1
              AND (?2 IS NULL OR recorded_at >= ?2)
              AND (?3 IS NULL OR recorded_at <= ?3)
            ORDER BY recorded_at DESC, rowid DESC
            LIMIT ?4
            "#
        ))?;
        let rows = stmt.query_map(params![owner_id, since, until, limit], |row| {
            Ok(EventRow {
                id: row.get(0)?,
                child_id: row.get(1)?,
                reseller_id: row.get(2)?,
                delta_bytes: row.get(3)?,
                recorded_at: row.get(4)?,
                note: row.get(5)?,
            })
        })?;

        let mut events = Vec::new();
        for row in rows {
            events.push(row?.into_event()?);
        }
        Ok(events)
    }
}

impl AccountStore for AccountDatabase {
    fn reseller(&self, reseller_id: &str) -> Result<Option<Reseller>, StoreError> {
        self.load_reseller(reseller_id)?
            .map(ResellerRow::into_reseller)
            .transpose()
    }

    fn reseller_ids(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.load_reseller_ids()?)
    }

    fn sub_resellers(&self, reseller_id: &str) -> Result<Vec<String>, StoreError> {
        Ok(self.load_sub_resellers(reseller_id)?)
    }

    fn children_of(&self, reseller_id: &str) -> Result<Vec<ChildAccount>, StoreError> {
        Ok(self.load_children(reseller_id)?)
    }

    fn child(&self, child_id: &str) -> Result<Option<ChildAccount>, StoreError> {
        Ok(self.load_child(child_id)?)
    }

    fn disable_child(&self, child_id: &str) -> Result<bool, StoreError> {
        Ok(self.write_disable(child_id)?)
    }

    fn set_quota(&self, reseller_id: &str, quota: Option<Quota>) -> Result<(), StoreError> {
        Ok(self.write_quota(reseller_id, quota)?)
    }

    fn append_usage_event(&self, event: &UsageEvent) -> Result<(), StoreError> {
        Ok(self.write_event(event)?)
    }

    fn usage_events(
        &self,
        reseller_id: &str,
        query: &EventQuery,
    ) -> Result<Vec<UsageEvent>, StoreError> {
        Ok(self.load_events("reseller_id", reseller_id, query)?)
    }

    fn child_usage_events(
        &self,
        child_id: &str,
        query: &EventQuery,
    ) -> Result<Vec<UsageEvent>, StoreError> {
        Ok(self.load_events("child_id", child_id, query)?)
    }
}
