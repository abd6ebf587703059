//! Database schema definitions

use rusqlite::Connection;
use tracing::info;

use crate::error::LedgerError;

/// Current schema version for migrations
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize the database schema
pub fn init_schema(conn: &Connection) -> Result<(), LedgerError> {
    let current_version = get_schema_version(conn)?;

    if current_version == 0 {
        info!("Creating new ledger schema v{}", SCHEMA_VERSION);
        conn.execute_batch(LEDGER_SCHEMA)?;
        set_schema_version(conn, SCHEMA_VERSION)?;
    } else {
        info!("Ledger schema is up to date (v{})", current_version);
    }

    Ok(())
}

/// Get current schema version (0 if not initialized)
fn get_schema_version(conn: &Connection) -> Result<i32, LedgerError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)",
        [],
    )?;

    let version: Option<i32> = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| row.get(0))
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(other),
        })?;

    Ok(version.unwrap_or(0))
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<(), LedgerError> {
    conn.execute("DELETE FROM schema_version", [])?;
    conn.execute("INSERT INTO schema_version (version) VALUES (?)", [version])?;
    Ok(())
}

/// Ledger tables. CHECK constraints back the counting invariants so a bug in
/// the service layer fails the transaction instead of corrupting counts.
const LEDGER_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS wealth (
    id TEXT PRIMARY KEY,
    community_id TEXT NOT NULL,
    owner_user_id TEXT,
    source_pool_id TEXT,
    item_id TEXT NOT NULL,
    title TEXT NOT NULL,
    total_units INTEGER NOT NULL CHECK (total_units > 0),
    reserved_units INTEGER NOT NULL DEFAULT 0 CHECK (reserved_units >= 0),
    consumed_units INTEGER NOT NULL DEFAULT 0 CHECK (consumed_units >= 0),
    status TEXT NOT NULL,
    sharing_target TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    CHECK (reserved_units + consumed_units <= total_units),
    CHECK ((owner_user_id IS NULL) <> (source_pool_id IS NULL))
);

CREATE TABLE IF NOT EXISTS wealth_requests (
    id TEXT PRIMARY KEY,
    wealth_id TEXT NOT NULL REFERENCES wealth(id),
    requester_id TEXT NOT NULL,
    units_requested INTEGER NOT NULL CHECK (units_requested > 0),
    status TEXT NOT NULL,
    version INTEGER NOT NULL DEFAULT 0,
    message TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS pools (
    id TEXT PRIMARY KEY,
    community_id TEXT NOT NULL,
    council_id TEXT NOT NULL,
    item_id TEXT NOT NULL,
    name TEXT NOT NULL,
    per_user_cap INTEGER CHECK (per_user_cap IS NULL OR per_user_cap > 0),
    minimum_contribution INTEGER CHECK (minimum_contribution IS NULL OR minimum_contribution > 0),
    created_by TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS pool_allowed_items (
    pool_id TEXT NOT NULL REFERENCES pools(id),
    item_id TEXT NOT NULL,
    PRIMARY KEY (pool_id, item_id)
);

CREATE TABLE IF NOT EXISTS pool_inventory (
    pool_id TEXT NOT NULL REFERENCES pools(id),
    item_id TEXT NOT NULL,
    confirmed_units INTEGER NOT NULL DEFAULT 0 CHECK (confirmed_units >= 0),
    reserved_units INTEGER NOT NULL DEFAULT 0 CHECK (reserved_units >= 0),
    distributed_units INTEGER NOT NULL DEFAULT 0 CHECK (distributed_units >= 0),
    consumed_units INTEGER NOT NULL DEFAULT 0 CHECK (consumed_units >= 0),
    version INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (pool_id, item_id),
    CHECK (reserved_units + distributed_units + consumed_units <= confirmed_units)
);

CREATE TABLE IF NOT EXISTS pool_contributions (
    id TEXT PRIMARY KEY,
    pool_id TEXT NOT NULL REFERENCES pools(id),
    wealth_id TEXT NOT NULL UNIQUE REFERENCES wealth(id),
    contributor_id TEXT NOT NULL,
    item_id TEXT NOT NULL,
    units_offered INTEGER NOT NULL CHECK (units_offered > 0),
    status TEXT NOT NULL,
    resolved_by TEXT,
    created_at TEXT NOT NULL,
    resolved_at TEXT
);

CREATE TABLE IF NOT EXISTS pool_distributions (
    id TEXT PRIMARY KEY,
    pool_id TEXT NOT NULL REFERENCES pools(id),
    item_id TEXT NOT NULL,
    recipient_user_id TEXT NOT NULL,
    units_granted INTEGER NOT NULL CHECK (units_granted > 0),
    strategy TEXT NOT NULL,
    wealth_id TEXT NOT NULL REFERENCES wealth(id),
    request_id TEXT NOT NULL REFERENCES wealth_requests(id),
    distributed_by TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'active',
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS pool_consumptions (
    id TEXT PRIMARY KEY,
    pool_id TEXT NOT NULL REFERENCES pools(id),
    council_id TEXT NOT NULL,
    item_id TEXT NOT NULL,
    units INTEGER NOT NULL CHECK (units > 0),
    description TEXT NOT NULL,
    consumed_by TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS needs (
    id TEXT PRIMARY KEY,
    community_id TEXT NOT NULL,
    user_id TEXT NOT NULL,
    item_id TEXT NOT NULL,
    priority TEXT NOT NULL,
    quantity_desired INTEGER NOT NULL,
    recurrence TEXT NOT NULL,
    status TEXT NOT NULL,
    last_fulfilled_at TEXT,
    next_fulfillment_at TEXT,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_requests_wealth ON wealth_requests(wealth_id, status);
CREATE INDEX IF NOT EXISTS idx_contributions_pool ON pool_contributions(pool_id, status);
CREATE INDEX IF NOT EXISTS idx_distributions_pool ON pool_distributions(pool_id, created_at);
CREATE INDEX IF NOT EXISTS idx_distributions_request ON pool_distributions(request_id);
CREATE INDEX IF NOT EXISTS idx_consumptions_pool ON pool_consumptions(pool_id, created_at);
CREATE INDEX IF NOT EXISTS idx_needs_item ON needs(community_id, item_id, status);
CREATE INDEX IF NOT EXISTS idx_needs_due ON needs(next_fulfillment_at);
"#;
