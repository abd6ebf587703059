//! SQLite ledger database
//!
//! One database holds every wealth share, request, pool, contribution,
//! distribution and need. It is the single source of truth for the pool
//! inventory counters.
//!
//! ## Tables
//!
//! - `wealth` / `wealth_requests` - direct shares and their request lifecycle
//! - `pools` / `pool_allowed_items` - council-managed pools
//! - `pool_inventory` - confirmed/reserved/distributed counters per (pool, item)
//! - `pool_contributions` / `pool_distributions` - ledger inputs and outputs
//! - `needs` - declared member needs, the allocation signal
//!
//! ## Locking
//!
//! Every write runs as one `BEGIN IMMEDIATE` transaction while holding the
//! connection mutex. Acquisition is bounded by [`LockPolicy`]: the mutex is
//! polled with exponential backoff and SQLite's busy timeout covers writers in
//! other processes. Running out of time is reported as `Conflict`.

pub mod schema;
pub mod models;
pub mod wealth;
pub mod pools;
pub mod inventory;
pub mod needs;

use std::path::Path;
use std::sync::{Mutex, MutexGuard, TryLockError};
use std::time::Instant;

use rusqlite::{Connection, Transaction, TransactionBehavior};
use tracing::{debug, info, warn};

use crate::config::LockPolicy;
use crate::error::LedgerError;

/// SQLite database for the allocation ledger
pub struct LedgerDb {
    conn: Mutex<Connection>,
    lock_policy: LockPolicy,
}

impl LedgerDb {
    /// Open or create the ledger database at `db_path`
    pub fn open(db_path: &Path, lock_policy: LockPolicy) -> Result<Self, LedgerError> {
        info!("Opening ledger database at {:?}", db_path);

        let conn = Connection::open(db_path)?;

        // WAL for concurrent readers; writers serialize on the immediate lock
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL; PRAGMA foreign_keys=ON;")?;
        conn.busy_timeout(lock_policy.max_wait)?;

        Self::from_connection(conn, lock_policy)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self, LedgerError> {
        debug!("Opening in-memory ledger database");
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Self::from_connection(conn, LockPolicy::default())
    }

    fn from_connection(conn: Connection, lock_policy: LockPolicy) -> Result<Self, LedgerError> {
        schema::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            lock_policy,
        })
    }

    /// Acquire the connection, retrying with backoff until the policy's
    /// deadline.
    fn lock(&self) -> Result<MutexGuard<'_, Connection>, LedgerError> {
        let started = Instant::now();
        let mut backoff = self.lock_policy.initial_backoff;
        let mut attempts = 0u32;

        loop {
            match self.conn.try_lock() {
                Ok(guard) => return Ok(guard),
                Err(TryLockError::Poisoned(poisoned)) => {
                    // A panicking holder never commits: its transaction rolled
                    // back on drop, so the connection is still consistent.
                    warn!("Ledger lock was poisoned by a panic; recovering");
                    self.conn.clear_poison();
                    return Ok(poisoned.into_inner());
                }
                Err(TryLockError::WouldBlock) => {
                    attempts += 1;
                    let elapsed = started.elapsed();
                    if elapsed >= self.lock_policy.max_wait {
                        warn!(attempts, waited_ms = elapsed.as_millis() as u64, "Ledger lock wait exhausted");
                        return Err(LedgerError::Conflict(format!(
                            "ledger busy after {} attempts",
                            attempts
                        )));
                    }
                    let sleep_for = backoff.min(self.lock_policy.max_wait - elapsed);
                    std::thread::sleep(sleep_for);
                    backoff = backoff.saturating_mul(2);
                }
            }
        }
    }

    /// Run a read against a consistent view. The lock is released on return.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, LedgerError>
    where
        F: FnOnce(&Connection) -> Result<T, LedgerError>,
    {
        let conn = self.lock()?;
        f(&conn)
    }

    /// Run `f` inside one immediate transaction. `Ok` commits; `Err` rolls
    /// back so the ledger is left exactly as it was.
    pub fn with_tx<F, T>(&self, f: F) -> Result<T, LedgerError>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T, LedgerError>,
    {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }
}

/// Fresh row id
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Map "no row" to a `NotFound` naming the entity.
pub(crate) fn not_found<T>(
    result: rusqlite::Result<T>,
    what: &str,
    id: &str,
) -> Result<T, LedgerError> {
    result.map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => LedgerError::NotFound(format!("{} {}", what, id)),
        other => LedgerError::from(other),
    })
}

// Re-exports
pub use models::*;
