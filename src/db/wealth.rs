//! Wealth and wealth-request rows
//!
//! Counter updates are expressed as guarded SQL (`WHERE ... AND remaining >= ?`)
//! so a stale read can never push a share past its total.

use rusqlite::{params, Connection, Row};
use serde::Deserialize;

use super::models::{
    current_timestamp, RequestStatus, SharingTarget, Wealth, WealthOwner, WealthRequest,
    WealthStatus,
};
use super::{new_id, not_found};
use crate::error::LedgerError;

const WEALTH_COLUMNS: &str = "id, community_id, owner_user_id, source_pool_id, item_id, title, \
     total_units, reserved_units, consumed_units, status, sharing_target, created_at, updated_at";

const REQUEST_COLUMNS: &str =
    "id, wealth_id, requester_id, units_requested, status, version, message, created_at, updated_at";

// ============================================================================
// Input Types
// ============================================================================

/// Input for creating a wealth share
#[derive(Debug, Clone, Deserialize)]
pub struct CreateWealthInput {
    pub community_id: String,
    pub item_id: String,
    pub title: String,
    pub units: i64,
    #[serde(default = "default_sharing_target")]
    pub sharing_target: SharingTarget,
}

fn default_sharing_target() -> SharingTarget {
    SharingTarget::Direct
}

fn wealth_from_row(row: &Row) -> rusqlite::Result<Wealth> {
    let owner_user: Option<String> = row.get(2)?;
    let source_pool: Option<String> = row.get(3)?;
    let owner = match (owner_user, source_pool) {
        (Some(user), _) => WealthOwner::User(user),
        (None, Some(pool)) => WealthOwner::Pool(pool),
        (None, None) => {
            return Err(rusqlite::Error::InvalidColumnType(
                2,
                "owner_user_id".into(),
                rusqlite::types::Type::Null,
            ))
        }
    };

    Ok(Wealth {
        id: row.get(0)?,
        community_id: row.get(1)?,
        owner,
        item_id: row.get(4)?,
        title: row.get(5)?,
        total_units: row.get(6)?,
        reserved_units: row.get(7)?,
        consumed_units: row.get(8)?,
        status: row.get(9)?,
        sharing_target: row.get(10)?,
        created_at: row.get(11)?,
        updated_at: row.get(12)?,
    })
}

fn request_from_row(row: &Row) -> rusqlite::Result<WealthRequest> {
    Ok(WealthRequest {
        id: row.get(0)?,
        wealth_id: row.get(1)?,
        requester_id: row.get(2)?,
        units_requested: row.get(3)?,
        status: row.get(4)?,
        version: row.get(5)?,
        message: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

/// Status implied by the counters; `cancelled` is never derived.
pub fn derive_status(total: i64, reserved: i64, consumed: i64) -> WealthStatus {
    if consumed >= total {
        WealthStatus::Fulfilled
    } else if reserved + consumed > 0 {
        WealthStatus::PartiallyAllocated
    } else {
        WealthStatus::Open
    }
}

// ============================================================================
// Wealth
// ============================================================================

pub fn insert_wealth(
    conn: &Connection,
    owner: &WealthOwner,
    input: &CreateWealthInput,
) -> Result<Wealth, LedgerError> {
    let id = new_id();
    let now = current_timestamp();
    let (owner_user, source_pool) = match owner {
        WealthOwner::User(user) => (Some(user.as_str()), None),
        WealthOwner::Pool(pool) => (None, Some(pool.as_str())),
    };

    conn.execute(
        r#"
        INSERT INTO wealth (
            id, community_id, owner_user_id, source_pool_id, item_id, title,
            total_units, reserved_units, consumed_units, status, sharing_target,
            created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, 0, 0, ?, ?, ?, ?)
        "#,
        params![
            id,
            input.community_id,
            owner_user,
            source_pool,
            input.item_id,
            input.title,
            input.units,
            WealthStatus::Open,
            input.sharing_target,
            now,
            now,
        ],
    )?;

    get_wealth(conn, &id)
}

pub fn get_wealth(conn: &Connection, id: &str) -> Result<Wealth, LedgerError> {
    let sql = format!("SELECT {} FROM wealth WHERE id = ?", WEALTH_COLUMNS);
    not_found(conn.query_row(&sql, [id], wealth_from_row), "wealth", id)
}

/// Move `units` from remaining into reserved. Fails with `InsufficientUnits`
/// when the guarded update matches no row.
pub fn reserve_units(conn: &Connection, wealth_id: &str, units: i64) -> Result<Wealth, LedgerError> {
    let changed = conn.execute(
        r#"
        UPDATE wealth
        SET reserved_units = reserved_units + ?1, updated_at = ?2
        WHERE id = ?3
          AND status IN ('open', 'partially_allocated')
          AND total_units - reserved_units - consumed_units >= ?1
        "#,
        params![units, current_timestamp(), wealth_id],
    )?;

    if changed == 0 {
        let wealth = get_wealth(conn, wealth_id)?;
        if matches!(wealth.status, WealthStatus::Cancelled | WealthStatus::Fulfilled) {
            return Err(LedgerError::InvalidState(format!(
                "wealth {} is {}",
                wealth_id, wealth.status
            )));
        }
        return Err(LedgerError::InsufficientUnits {
            requested: units,
            remaining: wealth.remaining_units(),
        });
    }

    refresh_status(conn, wealth_id)
}

/// Return reserved units to remaining (reject, cancel, fail).
pub fn release_units(conn: &Connection, wealth_id: &str, units: i64) -> Result<Wealth, LedgerError> {
    let changed = conn.execute(
        "UPDATE wealth SET reserved_units = reserved_units - ?1, updated_at = ?2
         WHERE id = ?3 AND reserved_units >= ?1",
        params![units, current_timestamp(), wealth_id],
    )?;
    if changed == 0 {
        return Err(LedgerError::Internal(format!(
            "wealth {} holds fewer than {} reserved units",
            wealth_id, units
        )));
    }
    refresh_status(conn, wealth_id)
}

/// Convert a reservation into permanent consumption (confirm).
pub fn consume_units(conn: &Connection, wealth_id: &str, units: i64) -> Result<Wealth, LedgerError> {
    let changed = conn.execute(
        "UPDATE wealth
         SET reserved_units = reserved_units - ?1, consumed_units = consumed_units + ?1, updated_at = ?2
         WHERE id = ?3 AND reserved_units >= ?1",
        params![units, current_timestamp(), wealth_id],
    )?;
    if changed == 0 {
        return Err(LedgerError::Internal(format!(
            "wealth {} holds fewer than {} reserved units",
            wealth_id, units
        )));
    }
    refresh_status(conn, wealth_id)
}

/// Recompute status from counters, leaving `cancelled` untouched.
fn refresh_status(conn: &Connection, wealth_id: &str) -> Result<Wealth, LedgerError> {
    let mut wealth = get_wealth(conn, wealth_id)?;
    if wealth.status == WealthStatus::Cancelled {
        return Ok(wealth);
    }
    let status = derive_status(wealth.total_units, wealth.reserved_units, wealth.consumed_units);
    if status != wealth.status {
        conn.execute(
            "UPDATE wealth SET status = ? WHERE id = ?",
            params![status, wealth_id],
        )?;
        wealth.status = status;
    }
    Ok(wealth)
}

pub fn set_wealth_status(
    conn: &Connection,
    wealth_id: &str,
    status: WealthStatus,
) -> Result<Wealth, LedgerError> {
    conn.execute(
        "UPDATE wealth SET status = ?, updated_at = ? WHERE id = ?",
        params![status, current_timestamp(), wealth_id],
    )?;
    get_wealth(conn, wealth_id)
}

// ============================================================================
// Requests
// ============================================================================

pub fn insert_request(
    conn: &Connection,
    wealth_id: &str,
    requester_id: &str,
    units: i64,
    status: RequestStatus,
    message: Option<&str>,
) -> Result<WealthRequest, LedgerError> {
    let id = new_id();
    let now = current_timestamp();

    conn.execute(
        r#"
        INSERT INTO wealth_requests (
            id, wealth_id, requester_id, units_requested, status, version, message, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, 0, ?, ?, ?)
        "#,
        params![id, wealth_id, requester_id, units, status, message, now, now],
    )?;

    get_request(conn, &id)
}

pub fn get_request(conn: &Connection, id: &str) -> Result<WealthRequest, LedgerError> {
    let sql = format!("SELECT {} FROM wealth_requests WHERE id = ?", REQUEST_COLUMNS);
    not_found(conn.query_row(&sql, [id], request_from_row), "request", id)
}

pub fn list_requests(conn: &Connection, wealth_id: &str) -> Result<Vec<WealthRequest>, LedgerError> {
    let sql = format!(
        "SELECT {} FROM wealth_requests WHERE wealth_id = ? ORDER BY created_at, id",
        REQUEST_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([wealth_id], request_from_row)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub fn count_open_requests(conn: &Connection, wealth_id: &str) -> Result<i64, LedgerError> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM wealth_requests WHERE wealth_id = ? AND status IN ('pending', 'accepted')",
        [wealth_id],
        |row| row.get(0),
    )?)
}

/// Compare-and-swap a request's status. Succeeds only if the row still has
/// `expected` status at `expected_version`; otherwise `InvalidState` with the
/// status actually found.
pub fn transition_request(
    conn: &Connection,
    request: &WealthRequest,
    expected: RequestStatus,
    next: RequestStatus,
) -> Result<WealthRequest, LedgerError> {
    let changed = conn.execute(
        r#"
        UPDATE wealth_requests
        SET status = ?1, version = version + 1, updated_at = ?2
        WHERE id = ?3 AND status = ?4 AND version = ?5
        "#,
        params![next, current_timestamp(), request.id, expected, request.version],
    )?;

    if changed == 0 {
        let current = get_request(conn, &request.id)?;
        return Err(LedgerError::InvalidState(format!(
            "request {} is {}, expected {}",
            request.id, current.status, expected
        )));
    }

    get_request(conn, &request.id)
}
