//! Pool inventory ledger
//!
//! One row per (pool, item) with `confirmed`, `reserved`, `distributed` and
//! `consumed` counters; `available` is what confirmed leaves after the other
//! three. Every function
//! here expects to run inside the caller's `LedgerDb::with_tx` so the read of
//! `available` and the write that depends on it share one transaction.

use rusqlite::{params, Connection, OptionalExtension};
use tracing::trace;

use super::models::{InventoryCounts, InventorySnapshot};
use crate::error::LedgerError;

/// Read the counters for (pool, item); a missing row is all zeros.
pub fn get_counts(conn: &Connection, pool_id: &str, item_id: &str) -> Result<InventoryCounts, LedgerError> {
    let counts = conn
        .query_row(
            "SELECT confirmed_units, reserved_units, distributed_units, consumed_units
             FROM pool_inventory WHERE pool_id = ? AND item_id = ?",
            params![pool_id, item_id],
            |row| {
                Ok(InventoryCounts {
                    confirmed_units: row.get(0)?,
                    reserved_units: row.get(1)?,
                    distributed_units: row.get(2)?,
                    consumed_units: row.get(3)?,
                })
            },
        )
        .optional()?;
    Ok(counts.unwrap_or_default())
}

/// Snapshot of every item row held by a pool
pub fn list_inventory(conn: &Connection, pool_id: &str) -> Result<Vec<InventorySnapshot>, LedgerError> {
    let mut stmt = conn.prepare(
        "SELECT item_id, confirmed_units, reserved_units, distributed_units, consumed_units
         FROM pool_inventory WHERE pool_id = ? ORDER BY item_id",
    )?;
    let rows = stmt.query_map([pool_id], |row| {
        let counts = InventoryCounts {
            confirmed_units: row.get(1)?,
            reserved_units: row.get(2)?,
            distributed_units: row.get(3)?,
            consumed_units: row.get(4)?,
        };
        Ok(InventorySnapshot {
            pool_id: pool_id.to_string(),
            item_id: row.get(0)?,
            available: counts.available(),
            confirmed: counts.confirmed_units,
            reserved: counts.reserved_units,
            distributed: counts.distributed_units,
            consumed: counts.consumed_units,
        })
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

/// Add confirmed units from an accepted contribution.
pub fn confirm_contribution(
    conn: &Connection,
    pool_id: &str,
    item_id: &str,
    amount: i64,
) -> Result<InventoryCounts, LedgerError> {
    ensure_positive(amount)?;
    conn.execute(
        r#"
        INSERT INTO pool_inventory (pool_id, item_id, confirmed_units)
        VALUES (?1, ?2, ?3)
        ON CONFLICT (pool_id, item_id) DO UPDATE
        SET confirmed_units = confirmed_units + ?3, version = version + 1
        "#,
        params![pool_id, item_id, amount],
    )?;
    trace!(pool = %pool_id, item = %item_id, amount, "Inventory confirmed");
    get_counts(conn, pool_id, item_id)
}

/// Hold `amount` units against availability.
pub fn reserve(
    conn: &Connection,
    pool_id: &str,
    item_id: &str,
    amount: i64,
) -> Result<InventoryCounts, LedgerError> {
    ensure_positive(amount)?;
    let changed = conn.execute(
        r#"
        UPDATE pool_inventory
        SET reserved_units = reserved_units + ?1, version = version + 1
        WHERE pool_id = ?2 AND item_id = ?3
          AND confirmed_units - reserved_units - distributed_units - consumed_units >= ?1
        "#,
        params![amount, pool_id, item_id],
    )?;

    if changed == 0 {
        return Err(insufficient(conn, pool_id, item_id, amount)?);
    }
    trace!(pool = %pool_id, item = %item_id, amount, "Inventory reserved");
    get_counts(conn, pool_id, item_id)
}

/// Use up `amount` available units inside the pool itself.
pub fn consume(
    conn: &Connection,
    pool_id: &str,
    item_id: &str,
    amount: i64,
) -> Result<InventoryCounts, LedgerError> {
    ensure_positive(amount)?;
    let changed = conn.execute(
        r#"
        UPDATE pool_inventory
        SET consumed_units = consumed_units + ?1, version = version + 1
        WHERE pool_id = ?2 AND item_id = ?3
          AND confirmed_units - reserved_units - distributed_units - consumed_units >= ?1
        "#,
        params![amount, pool_id, item_id],
    )?;

    if changed == 0 {
        return Err(insufficient(conn, pool_id, item_id, amount)?);
    }
    trace!(pool = %pool_id, item = %item_id, amount, "Inventory consumed");
    get_counts(conn, pool_id, item_id)
}

/// Put back units recorded by a consumption that was withdrawn.
pub fn restore_consumption(
    conn: &Connection,
    pool_id: &str,
    item_id: &str,
    amount: i64,
) -> Result<InventoryCounts, LedgerError> {
    ensure_positive(amount)?;
    let changed = conn.execute(
        r#"
        UPDATE pool_inventory
        SET consumed_units = consumed_units - ?1, version = version + 1
        WHERE pool_id = ?2 AND item_id = ?3 AND consumed_units >= ?1
        "#,
        params![amount, pool_id, item_id],
    )?;
    if changed == 0 {
        return Err(LedgerError::InvalidState(format!(
            "pool {} item {} has fewer than {} consumed units",
            pool_id, item_id, amount
        )));
    }
    get_counts(conn, pool_id, item_id)
}

/// Turn a reservation into a permanent distribution.
pub fn commit_distribution(
    conn: &Connection,
    pool_id: &str,
    item_id: &str,
    amount: i64,
) -> Result<InventoryCounts, LedgerError> {
    ensure_positive(amount)?;
    let changed = conn.execute(
        r#"
        UPDATE pool_inventory
        SET reserved_units = reserved_units - ?1,
            distributed_units = distributed_units + ?1,
            version = version + 1
        WHERE pool_id = ?2 AND item_id = ?3 AND reserved_units >= ?1
        "#,
        params![amount, pool_id, item_id],
    )?;
    if changed == 0 {
        return Err(LedgerError::InvalidState(format!(
            "pool {} item {} has fewer than {} reserved units",
            pool_id, item_id, amount
        )));
    }
    get_counts(conn, pool_id, item_id)
}

/// Return distributed units whose grant failed or was cancelled before the
/// recipient confirmed receipt.
pub fn restore_distribution(
    conn: &Connection,
    pool_id: &str,
    item_id: &str,
    amount: i64,
) -> Result<InventoryCounts, LedgerError> {
    ensure_positive(amount)?;
    let changed = conn.execute(
        r#"
        UPDATE pool_inventory
        SET distributed_units = distributed_units - ?1, version = version + 1
        WHERE pool_id = ?2 AND item_id = ?3 AND distributed_units >= ?1
        "#,
        params![amount, pool_id, item_id],
    )?;
    if changed == 0 {
        return Err(LedgerError::InvalidState(format!(
            "pool {} item {} has fewer than {} distributed units",
            pool_id, item_id, amount
        )));
    }
    trace!(pool = %pool_id, item = %item_id, amount, "Distribution restored");
    get_counts(conn, pool_id, item_id)
}

fn insufficient(
    conn: &Connection,
    pool_id: &str,
    item_id: &str,
    requested: i64,
) -> Result<LedgerError, LedgerError> {
    let counts = get_counts(conn, pool_id, item_id)?;
    Ok(LedgerError::InsufficientInventory {
        requested,
        available: counts.available(),
    })
}

fn ensure_positive(amount: i64) -> Result<(), LedgerError> {
    if amount <= 0 {
        return Err(LedgerError::InvalidInput(format!(
            "amount must be positive, got {}",
            amount
        )));
    }
    Ok(())
}
