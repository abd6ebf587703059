//! Pools, contributions and distributions

use rusqlite::{params, Connection, Row};
use serde::Deserialize;

use super::models::{
    current_timestamp, ContributionStatus, DistributionStatus, DistributionStrategy, Pool,
    PoolConsumption, PoolContribution, PoolDistribution,
};
use super::{new_id, not_found};
use crate::error::LedgerError;

const CONTRIBUTION_COLUMNS: &str = "id, pool_id, wealth_id, contributor_id, item_id, units_offered, \
     status, resolved_by, created_at, resolved_at";

const DISTRIBUTION_COLUMNS: &str = "id, pool_id, item_id, recipient_user_id, units_granted, strategy, \
     wealth_id, request_id, distributed_by, status, created_at";

const CONSUMPTION_COLUMNS: &str =
    "id, pool_id, council_id, item_id, units, description, consumed_by, created_at";

/// Input for creating a pool
#[derive(Debug, Clone, Deserialize)]
pub struct CreatePoolInput {
    pub community_id: String,
    pub council_id: String,
    pub item_id: String,
    pub name: String,
    #[serde(default)]
    pub per_user_cap: Option<i64>,
    #[serde(default)]
    pub minimum_contribution: Option<i64>,
    #[serde(default)]
    pub allowed_item_ids: Vec<String>,
}

/// Partial update of a pool's settings; `None` leaves a field unchanged.
/// The caps use a nested option so they can also be cleared.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdatePoolInput {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub per_user_cap: Option<Option<i64>>,
    #[serde(default)]
    pub minimum_contribution: Option<Option<i64>>,
    #[serde(default)]
    pub allowed_item_ids: Option<Vec<String>>,
}

/// Input for recording pool consumption
#[derive(Debug, Clone, Deserialize)]
pub struct RecordConsumptionInput {
    pub item_id: String,
    pub units: i64,
    pub description: String,
}

/// Fields of a distribution row decided by the allocation engine
#[derive(Debug, Clone)]
pub struct NewDistribution<'a> {
    pub pool_id: &'a str,
    pub item_id: &'a str,
    pub recipient_user_id: &'a str,
    pub units_granted: i64,
    pub strategy: DistributionStrategy,
    pub wealth_id: &'a str,
    pub request_id: &'a str,
    pub distributed_by: &'a str,
}

fn contribution_from_row(row: &Row) -> rusqlite::Result<PoolContribution> {
    Ok(PoolContribution {
        id: row.get(0)?,
        pool_id: row.get(1)?,
        wealth_id: row.get(2)?,
        contributor_id: row.get(3)?,
        item_id: row.get(4)?,
        units_offered: row.get(5)?,
        status: row.get(6)?,
        resolved_by: row.get(7)?,
        created_at: row.get(8)?,
        resolved_at: row.get(9)?,
    })
}

fn distribution_from_row(row: &Row) -> rusqlite::Result<PoolDistribution> {
    Ok(PoolDistribution {
        id: row.get(0)?,
        pool_id: row.get(1)?,
        item_id: row.get(2)?,
        recipient_user_id: row.get(3)?,
        units_granted: row.get(4)?,
        strategy: row.get(5)?,
        wealth_id: row.get(6)?,
        request_id: row.get(7)?,
        distributed_by: row.get(8)?,
        status: row.get(9)?,
        created_at: row.get(10)?,
    })
}

fn consumption_from_row(row: &Row) -> rusqlite::Result<PoolConsumption> {
    Ok(PoolConsumption {
        id: row.get(0)?,
        pool_id: row.get(1)?,
        council_id: row.get(2)?,
        item_id: row.get(3)?,
        units: row.get(4)?,
        description: row.get(5)?,
        consumed_by: row.get(6)?,
        created_at: row.get(7)?,
    })
}

// ============================================================================
// Pools
// ============================================================================

pub fn insert_pool(
    conn: &Connection,
    input: &CreatePoolInput,
    created_by: &str,
) -> Result<Pool, LedgerError> {
    let id = new_id();

    conn.execute(
        r#"
        INSERT INTO pools (
            id, community_id, council_id, item_id, name, per_user_cap, minimum_contribution,
            created_by, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
        params![
            id,
            input.community_id,
            input.council_id,
            input.item_id,
            input.name,
            input.per_user_cap,
            input.minimum_contribution,
            created_by,
            current_timestamp(),
        ],
    )?;

    set_allowed_items(conn, &id, &input.allowed_item_ids)?;
    get_pool(conn, &id)
}

fn set_allowed_items(conn: &Connection, pool_id: &str, item_ids: &[String]) -> Result<(), LedgerError> {
    conn.execute("DELETE FROM pool_allowed_items WHERE pool_id = ?", [pool_id])?;
    for item_id in item_ids {
        conn.execute(
            "INSERT OR IGNORE INTO pool_allowed_items (pool_id, item_id) VALUES (?, ?)",
            params![pool_id, item_id],
        )?;
    }
    Ok(())
}

pub fn update_pool(conn: &Connection, id: &str, input: &UpdatePoolInput) -> Result<Pool, LedgerError> {
    let current = get_pool(conn, id)?;
    let name = input.name.as_deref().unwrap_or(&current.name);
    let per_user_cap = input.per_user_cap.unwrap_or(current.per_user_cap);
    let minimum_contribution = input.minimum_contribution.unwrap_or(current.minimum_contribution);

    conn.execute(
        "UPDATE pools SET name = ?1, per_user_cap = ?2, minimum_contribution = ?3 WHERE id = ?4",
        params![name, per_user_cap, minimum_contribution, id],
    )?;
    if let Some(item_ids) = &input.allowed_item_ids {
        set_allowed_items(conn, id, item_ids)?;
    }

    get_pool(conn, id)
}

/// Pools of one community, oldest first.
pub fn list_pools(conn: &Connection, community_id: &str) -> Result<Vec<Pool>, LedgerError> {
    let mut stmt =
        conn.prepare("SELECT id FROM pools WHERE community_id = ? ORDER BY created_at, id")?;
    let ids = stmt
        .query_map([community_id], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    ids.iter().map(|id| get_pool(conn, id)).collect()
}

pub fn get_pool(conn: &Connection, id: &str) -> Result<Pool, LedgerError> {
    let mut pool = not_found(
        conn.query_row(
            "SELECT id, community_id, council_id, item_id, name, per_user_cap, minimum_contribution,
                    created_by, created_at
             FROM pools WHERE id = ?",
            [id],
            |row| {
                Ok(Pool {
                    id: row.get(0)?,
                    community_id: row.get(1)?,
                    council_id: row.get(2)?,
                    item_id: row.get(3)?,
                    name: row.get(4)?,
                    per_user_cap: row.get(5)?,
                    minimum_contribution: row.get(6)?,
                    allowed_item_ids: Vec::new(),
                    created_by: row.get(7)?,
                    created_at: row.get(8)?,
                })
            },
        ),
        "pool",
        id,
    )?;

    let mut stmt =
        conn.prepare("SELECT item_id FROM pool_allowed_items WHERE pool_id = ? ORDER BY item_id")?;
    pool.allowed_item_ids = stmt
        .query_map([id], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;

    Ok(pool)
}

// ============================================================================
// Contributions
// ============================================================================

pub fn insert_contribution(
    conn: &Connection,
    pool_id: &str,
    wealth_id: &str,
    contributor_id: &str,
    item_id: &str,
    units: i64,
) -> Result<PoolContribution, LedgerError> {
    let id = new_id();

    let inserted = conn.execute(
        r#"
        INSERT INTO pool_contributions (
            id, pool_id, wealth_id, contributor_id, item_id, units_offered, status, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
        params![
            id,
            pool_id,
            wealth_id,
            contributor_id,
            item_id,
            units,
            ContributionStatus::Pending,
            current_timestamp(),
        ],
    );

    match inserted {
        Ok(_) => get_contribution(conn, &id),
        Err(rusqlite::Error::SqliteFailure(err, _))
            if err.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            Err(LedgerError::InvalidState(format!(
                "wealth {} has already been contributed",
                wealth_id
            )))
        }
        Err(e) => Err(e.into()),
    }
}

pub fn get_contribution(conn: &Connection, id: &str) -> Result<PoolContribution, LedgerError> {
    let sql = format!("SELECT {} FROM pool_contributions WHERE id = ?", CONTRIBUTION_COLUMNS);
    not_found(conn.query_row(&sql, [id], contribution_from_row), "contribution", id)
}

pub fn count_pending_contributions_for_wealth(
    conn: &Connection,
    wealth_id: &str,
) -> Result<i64, LedgerError> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM pool_contributions WHERE wealth_id = ? AND status = 'pending'",
        [wealth_id],
        |row| row.get(0),
    )?)
}

pub fn list_contributions(
    conn: &Connection,
    pool_id: &str,
    status: Option<ContributionStatus>,
) -> Result<Vec<PoolContribution>, LedgerError> {
    let sql = format!(
        "SELECT {} FROM pool_contributions WHERE pool_id = ?1 AND (?2 IS NULL OR status = ?2)
         ORDER BY created_at, id",
        CONTRIBUTION_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![pool_id, status], contribution_from_row)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

/// Resolve a pending contribution exactly once.
pub fn resolve_contribution(
    conn: &Connection,
    id: &str,
    status: ContributionStatus,
    resolved_by: &str,
) -> Result<PoolContribution, LedgerError> {
    let changed = conn.execute(
        "UPDATE pool_contributions SET status = ?1, resolved_by = ?2, resolved_at = ?3
         WHERE id = ?4 AND status = 'pending'",
        params![status, resolved_by, current_timestamp(), id],
    )?;

    if changed == 0 {
        let current = get_contribution(conn, id)?;
        return Err(LedgerError::InvalidState(format!(
            "contribution {} has already been {}",
            id, current.status
        )));
    }

    get_contribution(conn, id)
}

pub fn sum_confirmed_contributions(
    conn: &Connection,
    pool_id: &str,
    item_id: &str,
) -> Result<i64, LedgerError> {
    Ok(conn.query_row(
        "SELECT COALESCE(SUM(units_offered), 0) FROM pool_contributions
         WHERE pool_id = ? AND item_id = ? AND status = 'confirmed'",
        params![pool_id, item_id],
        |row| row.get(0),
    )?)
}

// ============================================================================
// Distributions
// ============================================================================

pub fn insert_distribution(
    conn: &Connection,
    new: &NewDistribution<'_>,
) -> Result<PoolDistribution, LedgerError> {
    let id = new_id();

    conn.execute(
        r#"
        INSERT INTO pool_distributions (
            id, pool_id, item_id, recipient_user_id, units_granted, strategy,
            wealth_id, request_id, distributed_by, status, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
        params![
            id,
            new.pool_id,
            new.item_id,
            new.recipient_user_id,
            new.units_granted,
            new.strategy,
            new.wealth_id,
            new.request_id,
            new.distributed_by,
            DistributionStatus::Active,
            current_timestamp(),
        ],
    )?;

    let sql = format!("SELECT {} FROM pool_distributions WHERE id = ?", DISTRIBUTION_COLUMNS);
    not_found(conn.query_row(&sql, [&id], distribution_from_row), "distribution", &id)
}

pub fn list_distributions(
    conn: &Connection,
    pool_id: &str,
) -> Result<Vec<PoolDistribution>, LedgerError> {
    let sql = format!(
        "SELECT {} FROM pool_distributions WHERE pool_id = ? ORDER BY created_at, id",
        DISTRIBUTION_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([pool_id], distribution_from_row)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

/// Move the distribution behind a pool grant's request out of `active`.
/// Requests that are not pool grants have no row and are left alone.
pub fn settle_distribution_for_request(
    conn: &Connection,
    request_id: &str,
    status: DistributionStatus,
) -> Result<usize, LedgerError> {
    Ok(conn.execute(
        "UPDATE pool_distributions SET status = ?1 WHERE request_id = ?2 AND status = 'active'",
        params![status, request_id],
    )?)
}

// ============================================================================
// Consumptions
// ============================================================================

pub fn insert_consumption(
    conn: &Connection,
    pool: &Pool,
    input: &RecordConsumptionInput,
    consumed_by: &str,
) -> Result<PoolConsumption, LedgerError> {
    let id = new_id();
    conn.execute(
        r#"
        INSERT INTO pool_consumptions (
            id, pool_id, council_id, item_id, units, description, consumed_by, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
        params![
            id,
            pool.id,
            pool.council_id,
            input.item_id,
            input.units,
            input.description,
            consumed_by,
            current_timestamp(),
        ],
    )?;
    get_consumption(conn, &id)
}

pub fn get_consumption(conn: &Connection, id: &str) -> Result<PoolConsumption, LedgerError> {
    let sql = format!("SELECT {} FROM pool_consumptions WHERE id = ?", CONSUMPTION_COLUMNS);
    not_found(conn.query_row(&sql, [id], consumption_from_row), "consumption", id)
}

pub fn list_consumptions(conn: &Connection, pool_id: &str) -> Result<Vec<PoolConsumption>, LedgerError> {
    let sql = format!(
        "SELECT {} FROM pool_consumptions WHERE pool_id = ? ORDER BY created_at, id",
        CONSUMPTION_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([pool_id], consumption_from_row)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub fn delete_consumption(conn: &Connection, id: &str) -> Result<(), LedgerError> {
    let changed = conn.execute("DELETE FROM pool_consumptions WHERE id = ?", [id])?;
    if changed == 0 {
        return Err(LedgerError::NotFound(format!("consumption {}", id)));
    }
    Ok(())
}
