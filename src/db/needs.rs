//! Declared member needs

use chrono::Utc;
use rusqlite::{params, Connection, Row};
use serde::Deserialize;

use super::models::{format_timestamp, Need, NeedPriority, NeedStatus, Recurrence};
use super::{new_id, not_found};
use crate::error::LedgerError;

const NEED_COLUMNS: &str = "id, community_id, user_id, item_id, priority, quantity_desired, recurrence, \
     status, last_fulfilled_at, next_fulfillment_at, created_at";

/// Input for declaring a need
#[derive(Debug, Clone, Deserialize)]
pub struct DeclareNeedInput {
    pub community_id: String,
    pub item_id: String,
    pub priority: NeedPriority,
    pub quantity_desired: i64,
    #[serde(default = "default_recurrence")]
    pub recurrence: Recurrence,
}

fn default_recurrence() -> Recurrence {
    Recurrence::OneTime
}

/// Filter for listing needs
#[derive(Debug, Clone, Default)]
pub struct NeedQuery {
    pub community_id: Option<String>,
    pub item_id: Option<String>,
    pub status: Option<NeedStatus>,
}

fn need_from_row(row: &Row) -> rusqlite::Result<Need> {
    Ok(Need {
        id: row.get(0)?,
        community_id: row.get(1)?,
        user_id: row.get(2)?,
        item_id: row.get(3)?,
        priority: row.get(4)?,
        quantity_desired: row.get(5)?,
        recurrence: row.get(6)?,
        status: row.get(7)?,
        last_fulfilled_at: row.get(8)?,
        next_fulfillment_at: row.get(9)?,
        created_at: row.get(10)?,
    })
}

pub fn insert_need(
    conn: &Connection,
    user_id: &str,
    input: &DeclareNeedInput,
) -> Result<Need, LedgerError> {
    let id = new_id();
    let now = Utc::now();
    let next_fulfillment_at = input.recurrence.next_after(now).map(format_timestamp);
    conn.execute(
        r#"
        INSERT INTO needs (
            id, community_id, user_id, item_id, priority, quantity_desired, recurrence, status,
            next_fulfillment_at, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
        params![
            id,
            input.community_id,
            user_id,
            input.item_id,
            input.priority,
            input.quantity_desired,
            input.recurrence,
            NeedStatus::Active,
            next_fulfillment_at,
            format_timestamp(now),
        ],
    )?;
    get_need(conn, &id)
}

pub fn get_need(conn: &Connection, id: &str) -> Result<Need, LedgerError> {
    let sql = format!("SELECT {} FROM needs WHERE id = ?", NEED_COLUMNS);
    not_found(conn.query_row(&sql, [id], need_from_row), "need", id)
}

pub fn set_need_status(conn: &Connection, id: &str, status: NeedStatus) -> Result<Need, LedgerError> {
    let changed = conn.execute(
        "UPDATE needs SET status = ? WHERE id = ? AND status = 'active'",
        params![status, id],
    )?;
    if changed == 0 {
        let need = get_need(conn, id)?;
        return Err(LedgerError::InvalidState(format!("need {} is {}", id, need.status)));
    }
    get_need(conn, id)
}

/// List needs in a stable order (created_at, then id).
pub fn list_needs(conn: &Connection, query: &NeedQuery) -> Result<Vec<Need>, LedgerError> {
    let sql = format!(
        "SELECT {} FROM needs
         WHERE (?1 IS NULL OR community_id = ?1)
           AND (?2 IS NULL OR item_id = ?2)
           AND (?3 IS NULL OR status = ?3)
         ORDER BY created_at, id",
        NEED_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(
        params![query.community_id, query.item_id, query.status],
        need_from_row,
    )?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

/// Recurring needs whose next fulfillment date is at or before `now`.
/// Cancelled needs never come due.
pub fn list_due_needs(conn: &Connection, now: &str) -> Result<Vec<Need>, LedgerError> {
    let sql = format!(
        "SELECT {} FROM needs
         WHERE recurrence != 'one_time' AND status != 'cancelled'
           AND next_fulfillment_at IS NOT NULL AND next_fulfillment_at <= ?
         ORDER BY next_fulfillment_at, id",
        NEED_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([now], need_from_row)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

/// Start a new period for a recurring need: it is active again and its
/// fulfillment dates move forward.
pub fn replenish_need(
    conn: &Connection,
    id: &str,
    replenished_at: &str,
    next_fulfillment_at: Option<&str>,
) -> Result<Need, LedgerError> {
    let changed = conn.execute(
        "UPDATE needs SET status = 'active', last_fulfilled_at = ?1, next_fulfillment_at = ?2
         WHERE id = ?3 AND status != 'cancelled'",
        params![replenished_at, next_fulfillment_at, id],
    )?;
    if changed == 0 {
        let need = get_need(conn, id)?;
        return Err(LedgerError::InvalidState(format!("need {} is {}", id, need.status)));
    }
    get_need(conn, id)
}
