//! Commons Ledger - community wealth sharing and pooled distribution
//!
//! Members pledge shares of goods ("wealth"). Others request units of a direct
//! share and move the request through a small lifecycle, or the share is
//! contributed to a council-managed pool. Pools hand units out again, either
//! one grant at a time or as a needs-based mass distribution that is previewed
//! before it is committed.
//!
//! ## Architecture
//!
//! - **`db`**: SQLite repositories; the pool inventory ledger lives here
//! - **`allocation`**: pure planning for mass distribution (no I/O)
//! - **`services`**: business rules, trust checks, transactions and events
//! - **`trust`**: the external authorization oracle and a static grant table
//!
//! ## Ledger Invariants
//!
//! | Row | Invariant |
//! |-----|-----------|
//! | wealth | `reserved + consumed <= total` |
//! | pool inventory | `reserved + distributed + consumed <= confirmed` |
//! | pool inventory | `confirmed` equals the sum of confirmed contributions |
//!
//! Every mutation is a single transaction; a failed operation leaves the
//! ledger exactly as it found it.
//!
//! ## Storage Layout
//!
//! ```text
//! ~/.local/share/commons-ledger/
//! ├── ledger.db              # SQLite ledger
//! └── config.toml            # Configuration and static trust grants
//! ```

pub mod allocation;
pub mod config;
pub mod db;
pub mod error;
pub mod services;
pub mod trust;

// Re-exports
pub use allocation::{AllocationPlan, MassStrategy, ProposedGrant, Recipient};
pub use config::{Config, GrantConfig, LockPolicy};
pub use db::LedgerDb;
pub use error::LedgerError;
pub use services::{
    AllocationService, EventBus, LedgerEvent, MassDistributionPreview, MassDistributionRequest,
    NeedsService, PoolService, Services, WealthService,
};
pub use trust::{Action, AuthContext, StaticTrustGate, TrustGate};
