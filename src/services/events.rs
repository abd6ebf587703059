//! Event system for ledger transitions
//!
//! Every state transition emits one [`LedgerEvent`] on the bus. Delivery is
//! best-effort: emitting never blocks and never fails the operation that
//! produced the event. Notification and audit consumers subscribe here.

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, trace};

use crate::db::models::{ContributionStatus, DistributionStrategy, NeedStatus, RequestStatus};

/// Ledger events emitted by services
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerEvent {
    // Wealth events
    WealthCreated {
        wealth_id: String,
        owner_id: String,
        units: i64,
    },
    WealthCancelled {
        wealth_id: String,
    },

    // Request events
    RequestCreated {
        request_id: String,
        wealth_id: String,
        requester_id: String,
        units: i64,
    },
    RequestTransitioned {
        request_id: String,
        wealth_id: String,
        from: RequestStatus,
        to: RequestStatus,
        acting_user_id: String,
    },

    // Pool events
    PoolCreated {
        pool_id: String,
        council_id: String,
    },
    ContributionSubmitted {
        contribution_id: String,
        pool_id: String,
        units: i64,
    },
    ContributionResolved {
        contribution_id: String,
        pool_id: String,
        status: ContributionStatus,
        acting_user_id: String,
    },
    UnitsDistributed {
        distribution_id: String,
        pool_id: String,
        recipient_user_id: String,
        units: i64,
        strategy: DistributionStrategy,
    },
    MassDistributionCommitted {
        pool_id: String,
        item_id: String,
        recipients: usize,
        units: i64,
    },
    DistributionRestored {
        pool_id: String,
        item_id: String,
        units: i64,
    },
    PoolUpdated {
        pool_id: String,
        acting_user_id: String,
    },
    PoolConsumed {
        consumption_id: String,
        pool_id: String,
        item_id: String,
        units: i64,
    },
    ConsumptionWithdrawn {
        consumption_id: String,
        pool_id: String,
        units: i64,
    },

    // Need events
    NeedDeclared {
        need_id: String,
        user_id: String,
        item_id: String,
        quantity: i64,
    },
    NeedClosed {
        need_id: String,
        status: NeedStatus,
    },
    NeedReplenished {
        need_id: String,
    },
}

/// Trait for event listeners
pub trait EventListener: Send + Sync {
    /// Handle an event
    fn on_event(&self, event: &LedgerEvent);
}

/// Event bus for broadcasting ledger events
pub struct EventBus {
    sender: broadcast::Sender<LedgerEvent>,
}

impl EventBus {
    /// Create a new event bus with default capacity
    pub fn new() -> Self {
        Self::with_capacity(1024)
    }

    /// Create a new event bus with specified capacity
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Emit an event to all subscribers
    pub fn emit(&self, event: LedgerEvent) {
        trace!(event = ?event, "Emitting ledger event");
        // No subscribers is fine
        let _ = self.sender.send(event);
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<LedgerEvent> {
        self.sender.subscribe()
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Logging event listener for audit trails
pub struct LoggingEventListener;

impl EventListener for LoggingEventListener {
    fn on_event(&self, event: &LedgerEvent) {
        match event {
            LedgerEvent::RequestTransitioned { request_id, from, to, acting_user_id, .. } => {
                debug!(request = %request_id, from = %from, to = %to, by = %acting_user_id, "Request transitioned");
            }
            LedgerEvent::ContributionResolved { contribution_id, status, acting_user_id, .. } => {
                info!(contribution = %contribution_id, status = %status, by = %acting_user_id, "Contribution resolved");
            }
            LedgerEvent::MassDistributionCommitted { pool_id, item_id, recipients, units } => {
                info!(pool = %pool_id, item = %item_id, recipients, units, "Mass distribution committed");
            }
            LedgerEvent::PoolConsumed { pool_id, item_id, units, .. } => {
                info!(pool = %pool_id, item = %item_id, units, "Pool units consumed");
            }
            _ => {
                trace!(event = ?event, "Ledger event");
            }
        }
    }
}

/// Spawn a background task that logs all events
pub fn spawn_logging_listener(event_bus: Arc<EventBus>) -> tokio::task::JoinHandle<()> {
    let mut receiver = event_bus.subscribe();
    let listener = LoggingEventListener;

    tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(event) => listener.on_event(&event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    debug!(skipped = n, "Event listener lagged, skipped events");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Event bus closed, stopping listener");
                    break;
                }
            }
        }
    })
}
