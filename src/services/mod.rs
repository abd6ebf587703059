//! Service layer for commons-ledger
//!
//! Services encapsulate business rules between callers and the repository
//! functions in `db`. Each service wraps database operations with:
//! - Input validation
//! - Trust gate checks
//! - Transaction boundaries
//! - Event emission for audit/notifications
//!
//! ## Architecture
//!
//! ```text
//! Callers (CLI, embedding application)
//!     ↓
//! Service Layer (business rules, TrustGate)
//!     ↓
//! Repository Layer (db/*.rs)
//!     ↓
//! SQLite Database
//! ```

pub mod events;
pub mod wealth_service;
pub mod pool_service;
pub mod allocation_service;
pub mod needs_service;

// Re-exports
pub use events::{spawn_logging_listener, EventBus, EventListener, LedgerEvent};
pub use wealth_service::WealthService;
pub use pool_service::PoolService;
pub use allocation_service::{AllocationService, MassDistributionPreview, MassDistributionRequest};
pub use needs_service::{ItemNeedSummary, NeedsService, PoolItemNeeds, PoolNeeds, ReplenishmentReport};

use std::sync::Arc;

use crate::db::LedgerDb;
use crate::trust::TrustGate;

/// Service container for dependency injection
///
/// Holds all services over one shared database, trust gate and event bus.
pub struct Services {
    pub wealth: Arc<WealthService>,
    pub pools: Arc<PoolService>,
    pub allocation: Arc<AllocationService>,
    pub needs: Arc<NeedsService>,
    pub events: Arc<EventBus>,
}

impl Services {
    /// Create all services with a fresh event bus
    pub fn new(db: Arc<LedgerDb>, gate: Arc<dyn TrustGate>) -> Self {
        Self::with_events(db, gate, Arc::new(EventBus::new()))
    }

    /// Create all services publishing to `events`
    pub fn with_events(db: Arc<LedgerDb>, gate: Arc<dyn TrustGate>, events: Arc<EventBus>) -> Self {
        Self {
            wealth: Arc::new(WealthService::new(db.clone(), gate.clone(), events.clone())),
            pools: Arc::new(PoolService::new(db.clone(), gate.clone(), events.clone())),
            allocation: Arc::new(AllocationService::new(db.clone(), gate.clone(), events.clone())),
            needs: Arc::new(NeedsService::new(db, gate, events.clone())),
            events,
        }
    }
}
