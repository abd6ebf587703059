//! Wealth service - the request lifecycle state machine
//!
//! ```text
//! pending ──accept──► accepted ──confirm──► confirmed
//!    │                   │
//!    ├──reject──► rejected └──fail──► failed
//!    └───────cancel (pending | accepted)──► cancelled
//! ```
//!
//! Creating a request reserves its units on the wealth row; reject, cancel
//! and fail release them, confirm turns them into consumption. Shares handed
//! out by a pool also return their units to the pool ledger when the grant is
//! cancelled or fails before the recipient confirms, and their distribution
//! record moves to `restored` (or `confirmed` on receipt) in the same
//! transaction.

use std::sync::Arc;

use tracing::{debug, info};

use crate::db::models::{
    validate_units, DistributionStatus, RequestStatus, SharingTarget, Wealth, WealthOwner, WealthRequest,
    WealthStatus,
};
use crate::db::wealth::{self, CreateWealthInput};
use crate::db::{inventory, pools, LedgerDb};
use crate::error::LedgerError;
use crate::trust::{ensure_authorized, Action, AuthContext, TrustGate};

use super::events::{EventBus, LedgerEvent};

/// Who is allowed to drive a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Actor {
    Owner,
    Requester,
    OwnerOrRequester,
}

pub struct WealthService {
    db: Arc<LedgerDb>,
    gate: Arc<dyn TrustGate>,
    events: Arc<EventBus>,
}

impl WealthService {
    pub fn new(db: Arc<LedgerDb>, gate: Arc<dyn TrustGate>, events: Arc<EventBus>) -> Self {
        Self { db, gate, events }
    }

    // =========================================================================
    // Read Operations
    // =========================================================================

    pub fn get_wealth(&self, wealth_id: &str) -> Result<Wealth, LedgerError> {
        self.db.with_conn(|conn| wealth::get_wealth(conn, wealth_id))
    }

    pub fn get_request(&self, request_id: &str) -> Result<WealthRequest, LedgerError> {
        self.db.with_conn(|conn| wealth::get_request(conn, request_id))
    }

    pub fn list_requests(&self, wealth_id: &str) -> Result<Vec<WealthRequest>, LedgerError> {
        self.db.with_conn(|conn| {
            wealth::get_wealth(conn, wealth_id)?;
            wealth::list_requests(conn, wealth_id)
        })
    }

    // =========================================================================
    // Wealth
    // =========================================================================

    /// Pledge a share owned by `owner_id`.
    pub fn create_wealth(
        &self,
        owner_id: &str,
        input: CreateWealthInput,
    ) -> Result<Wealth, LedgerError> {
        validate_units("units", input.units)?;
        if input.item_id.is_empty() {
            return Err(LedgerError::InvalidInput("item_id is required".into()));
        }

        ensure_authorized(
            self.gate.as_ref(),
            owner_id,
            &input.community_id,
            Action::CreateWealth,
            &AuthContext::default().with_item(&input.item_id),
        )?;

        let owner = WealthOwner::User(owner_id.to_string());
        let created = self.db.with_tx(|tx| wealth::insert_wealth(tx, &owner, &input))?;

        info!(wealth = %created.id, owner = %owner_id, units = created.total_units, target = %created.sharing_target, "Wealth created");
        self.events.emit(LedgerEvent::WealthCreated {
            wealth_id: created.id.clone(),
            owner_id: owner_id.to_string(),
            units: created.total_units,
        });

        Ok(created)
    }

    /// Soft-cancel a share. Only allowed while nothing is in flight against it.
    pub fn cancel_wealth(&self, wealth_id: &str, acting_user_id: &str) -> Result<Wealth, LedgerError> {
        let current = self.get_wealth(wealth_id)?;
        ensure_authorized(
            self.gate.as_ref(),
            acting_user_id,
            &current.community_id,
            Action::ManageWealth,
            &AuthContext::wealth(wealth_id),
        )?;
        if !current.owner.is_user(acting_user_id) {
            return Err(LedgerError::Forbidden("only the wealth owner can cancel it".into()));
        }

        let cancelled = self.db.with_tx(|tx| {
            let fresh = wealth::get_wealth(tx, wealth_id)?;
            if matches!(fresh.status, WealthStatus::Cancelled | WealthStatus::Fulfilled) {
                return Err(LedgerError::InvalidState(format!(
                    "wealth {} is already {}",
                    wealth_id, fresh.status
                )));
            }
            if wealth::count_open_requests(tx, wealth_id)? > 0 {
                return Err(LedgerError::InvalidState(format!(
                    "wealth {} has open requests",
                    wealth_id
                )));
            }
            if pools::count_pending_contributions_for_wealth(tx, wealth_id)? > 0 {
                return Err(LedgerError::InvalidState(format!(
                    "wealth {} has a pending pool contribution",
                    wealth_id
                )));
            }
            wealth::set_wealth_status(tx, wealth_id, WealthStatus::Cancelled)
        })?;

        info!(wealth = %wealth_id, "Wealth cancelled");
        self.events.emit(LedgerEvent::WealthCancelled {
            wealth_id: wealth_id.to_string(),
        });
        Ok(cancelled)
    }

    // =========================================================================
    // Requests
    // =========================================================================

    /// Claim `units` of a direct share. Reserves the units immediately; when
    /// they exceed what remains, no request is created.
    pub fn request_wealth(
        &self,
        wealth_id: &str,
        requester_id: &str,
        units: i64,
        message: Option<&str>,
    ) -> Result<WealthRequest, LedgerError> {
        validate_units("units", units)?;

        let target = self.get_wealth(wealth_id)?;
        ensure_authorized(
            self.gate.as_ref(),
            requester_id,
            &target.community_id,
            Action::RequestWealth,
            &AuthContext::wealth(wealth_id),
        )?;

        if target.sharing_target == SharingTarget::Pool {
            return Err(LedgerError::InvalidState(format!(
                "wealth {} is pledged to a pool",
                wealth_id
            )));
        }
        match &target.owner {
            WealthOwner::Pool(_) => {
                return Err(LedgerError::InvalidState(format!(
                    "wealth {} is a pool grant",
                    wealth_id
                )));
            }
            WealthOwner::User(owner) if owner == requester_id => {
                return Err(LedgerError::InvalidInput("owners cannot request their own wealth".into()));
            }
            WealthOwner::User(_) => {}
        }

        let request = self.db.with_tx(|tx| {
            wealth::reserve_units(tx, wealth_id, units)?;
            wealth::insert_request(tx, wealth_id, requester_id, units, RequestStatus::Pending, message)
        })?;

        debug!(request = %request.id, wealth = %wealth_id, requester = %requester_id, units, "Request created");
        self.events.emit(LedgerEvent::RequestCreated {
            request_id: request.id.clone(),
            wealth_id: wealth_id.to_string(),
            requester_id: requester_id.to_string(),
            units,
        });

        Ok(request)
    }

    /// Owner accepts a pending request. Exactly one of any concurrent accepts
    /// wins; the rest see `InvalidState`.
    pub fn accept_request(&self, request_id: &str, acting_user_id: &str) -> Result<WealthRequest, LedgerError> {
        self.transition(request_id, acting_user_id, Actor::Owner, &[RequestStatus::Pending], RequestStatus::Accepted)
    }

    pub fn reject_request(&self, request_id: &str, acting_user_id: &str) -> Result<WealthRequest, LedgerError> {
        self.transition(request_id, acting_user_id, Actor::Owner, &[RequestStatus::Pending], RequestStatus::Rejected)
    }

    pub fn cancel_request(&self, request_id: &str, acting_user_id: &str) -> Result<WealthRequest, LedgerError> {
        self.transition(
            request_id,
            acting_user_id,
            Actor::OwnerOrRequester,
            &[RequestStatus::Pending, RequestStatus::Accepted],
            RequestStatus::Cancelled,
        )
    }

    /// Requester confirms receipt; the reservation becomes permanent.
    pub fn confirm_request(&self, request_id: &str, acting_user_id: &str) -> Result<WealthRequest, LedgerError> {
        self.transition(request_id, acting_user_id, Actor::Requester, &[RequestStatus::Accepted], RequestStatus::Confirmed)
    }

    /// Requester reports the hand-over failed; the units become available again.
    pub fn fail_request(&self, request_id: &str, acting_user_id: &str) -> Result<WealthRequest, LedgerError> {
        self.transition(request_id, acting_user_id, Actor::Requester, &[RequestStatus::Accepted], RequestStatus::Failed)
    }

    fn transition(
        &self,
        request_id: &str,
        acting_user_id: &str,
        actor: Actor,
        from: &[RequestStatus],
        to: RequestStatus,
    ) -> Result<WealthRequest, LedgerError> {
        let (request, target) = self.db.with_conn(|conn| {
            let request = wealth::get_request(conn, request_id)?;
            let target = wealth::get_wealth(conn, &request.wealth_id)?;
            Ok((request, target))
        })?;

        let action = match actor {
            Actor::Owner => Action::ManageWealth,
            Actor::Requester | Actor::OwnerOrRequester => Action::RequestWealth,
        };
        let action = if actor == Actor::OwnerOrRequester && target.owner.is_user(acting_user_id) {
            Action::ManageWealth
        } else {
            action
        };
        ensure_authorized(
            self.gate.as_ref(),
            acting_user_id,
            &target.community_id,
            action,
            &AuthContext::request(&target.id, request_id),
        )?;

        let is_owner = target.owner.is_user(acting_user_id);
        let is_requester = request.requester_id == acting_user_id;
        let permitted = match actor {
            Actor::Owner => is_owner,
            Actor::Requester => is_requester,
            Actor::OwnerOrRequester => is_owner || is_requester,
        };
        if !permitted {
            return Err(LedgerError::Forbidden(format!(
                "{} may not move request {} to {}",
                acting_user_id, request_id, to
            )));
        }

        if !from.contains(&request.status) {
            return Err(LedgerError::InvalidState(format!(
                "request {} is {}, cannot move to {}",
                request_id, request.status, to
            )));
        }

        let restored_to_pool = to.is_terminal()
            && to != RequestStatus::Confirmed
            && request.status == RequestStatus::Accepted
            && target.source_pool_id().is_some();

        let updated = self.db.with_tx(|tx| {
            let updated = wealth::transition_request(tx, &request, request.status, to)?;
            match to {
                RequestStatus::Accepted => {}
                RequestStatus::Confirmed => {
                    wealth::consume_units(tx, &target.id, request.units_requested)?;
                    pools::settle_distribution_for_request(tx, request_id, DistributionStatus::Confirmed)?;
                }
                RequestStatus::Rejected | RequestStatus::Cancelled | RequestStatus::Failed => {
                    wealth::release_units(tx, &target.id, request.units_requested)?;
                    if restored_to_pool {
                        if let Some(pool_id) = target.source_pool_id() {
                            inventory::restore_distribution(tx, pool_id, &target.item_id, request.units_requested)?;
                            wealth::set_wealth_status(tx, &target.id, WealthStatus::Cancelled)?;
                            pools::settle_distribution_for_request(tx, request_id, DistributionStatus::Restored)?;
                        }
                    }
                }
                RequestStatus::Pending => {
                    return Err(LedgerError::InvalidState("requests cannot return to pending".into()));
                }
            }
            Ok(updated)
        })?;

        debug!(request = %request_id, from = %request.status, to = %to, by = %acting_user_id, "Request transitioned");
        self.events.emit(LedgerEvent::RequestTransitioned {
            request_id: request_id.to_string(),
            wealth_id: target.id.clone(),
            from: request.status,
            to,
            acting_user_id: acting_user_id.to_string(),
        });
        if restored_to_pool {
            if let Some(pool_id) = target.source_pool_id() {
                info!(pool = %pool_id, item = %target.item_id, units = request.units_requested, "Pool grant returned to inventory");
                self.events.emit(LedgerEvent::DistributionRestored {
                    pool_id: pool_id.to_string(),
                    item_id: target.item_id.clone(),
                    units: request.units_requested,
                });
            }
        }

        Ok(updated)
    }
}
