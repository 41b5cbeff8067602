use rusqlite::Connection;

use super::StorageError;

pub const RESELLERS_TABLE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS resellers (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    parent_id TEXT,
    quota_bytes INTEGER,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
"#;

pub const CHILD_ACCOUNTS_TABLE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS child_accounts (
    id TEXT PRIMARY KEY,
    reseller_id TEXT,
    consumed_bytes INTEGER NOT NULL DEFAULT 0,
    usage_limit_bytes INTEGER,
    enabled INTEGER NOT NULL DEFAULT 1,
    updated_at TEXT NOT NULL
);
"#;

pub const USAGE_EVENTS_TABLE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS usage_events (
    id TEXT PRIMARY KEY,
    child_id TEXT NOT NULL,
    reseller_id TEXT,
    delta_bytes INTEGER NOT NULL,
    recorded_at TEXT NOT NULL,
    note TEXT NOT NULL
);
"#;

pub const ACCOUNT_INDEXES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_resellers_parent ON resellers(parent_id);
CREATE INDEX IF NOT EXISTS idx_children_reseller ON child_accounts(reseller_id);
CREATE INDEX IF NOT EXISTS idx_events_reseller_time ON usage_events(reseller_id, recorded_at);
CREATE INDEX IF NOT EXISTS idx_events_child_time ON usage_events(child_id, recorded_at);
"#;

pub fn init_database(conn: &Connection) -> Result<(), StorageError> {
    conn.execute_batch(RESELLERS_TABLE_SCHEMA)?;
    conn.execute_batch(CHILD_ACCOUNTS_TABLE_SCHEMA)?;
    conn.execute_batch(USAGE_EVENTS_TABLE_SCHEMA)?;
    conn.execute_batch(ACCOUNT_INDEXES)?;
    Ok(())
}
