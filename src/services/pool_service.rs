//! Pool service - council-managed pools and their inbound contributions
//!
//! A contribution starts from a member's wealth share pledged with
//! `sharing_target = pool` and always offers the whole share. Submitting it
//! reserves the share's units; confirming consumes them and credits the pool
//! ledger, rejecting releases them and retires the share. Only confirmation
//! touches the ledger.
//!
//! Councils may also consume pool units themselves (a community meal, a
//! repair). A consumption leaves the pool through the same guarded ledger
//! update as a distribution and can be withdrawn to put the units back.

use std::sync::Arc;

use tracing::{debug, info};

use crate::db::models::{
    validate_units, ContributionStatus, InventorySnapshot, Pool, PoolConsumption, PoolContribution,
    SharingTarget, WealthStatus,
};
use crate::db::pools::{self, CreatePoolInput, RecordConsumptionInput, UpdatePoolInput};
use crate::db::{inventory, wealth, LedgerDb};
use crate::error::LedgerError;
use crate::trust::{ensure_authorized, Action, AuthContext, TrustGate};

use super::events::{EventBus, LedgerEvent};

pub struct PoolService {
    db: Arc<LedgerDb>,
    gate: Arc<dyn TrustGate>,
    events: Arc<EventBus>,
}

impl PoolService {
    pub fn new(db: Arc<LedgerDb>, gate: Arc<dyn TrustGate>, events: Arc<EventBus>) -> Self {
        Self { db, gate, events }
    }

    pub fn create_pool(&self, input: CreatePoolInput, acting_user_id: &str) -> Result<Pool, LedgerError> {
        if input.name.trim().is_empty() {
            return Err(LedgerError::InvalidInput("pool name is required".into()));
        }
        if input.item_id.is_empty() {
            return Err(LedgerError::InvalidInput("item_id is required".into()));
        }
        validate_limits(input.per_user_cap, input.minimum_contribution)?;

        ensure_authorized(
            self.gate.as_ref(),
            acting_user_id,
            &input.community_id,
            Action::ManagePool,
            &AuthContext {
                council_id: Some(input.council_id.clone()),
                item_id: Some(input.item_id.clone()),
                ..Default::default()
            },
        )?;

        let pool = self.db.with_tx(|tx| pools::insert_pool(tx, &input, acting_user_id))?;

        info!(pool = %pool.id, council = %pool.council_id, item = %pool.item_id, "Pool created");
        self.events.emit(LedgerEvent::PoolCreated {
            pool_id: pool.id.clone(),
            council_id: pool.council_id.clone(),
        });
        Ok(pool)
    }

    pub fn get_pool(&self, pool_id: &str) -> Result<Pool, LedgerError> {
        self.db.with_conn(|conn| pools::get_pool(conn, pool_id))
    }

    /// Every pool of a community, oldest first.
    pub fn list_pools(&self, community_id: &str, acting_user_id: &str) -> Result<Vec<Pool>, LedgerError> {
        ensure_authorized(
            self.gate.as_ref(),
            acting_user_id,
            community_id,
            Action::ViewPool,
            &AuthContext::default(),
        )?;
        self.db.with_conn(|conn| pools::list_pools(conn, community_id))
    }

    /// Change a pool's name, caps or accepted items. Inventory is untouched;
    /// items dropped from the allowed list keep their ledger rows.
    pub fn update_pool(
        &self,
        pool_id: &str,
        input: UpdatePoolInput,
        acting_user_id: &str,
    ) -> Result<Pool, LedgerError> {
        if input.name.as_deref().is_some_and(|name| name.trim().is_empty()) {
            return Err(LedgerError::InvalidInput("pool name is required".into()));
        }
        validate_limits(input.per_user_cap.flatten(), input.minimum_contribution.flatten())?;

        let pool = self.get_pool(pool_id)?;
        ensure_authorized(
            self.gate.as_ref(),
            acting_user_id,
            &pool.community_id,
            Action::ManagePool,
            &AuthContext::pool(&pool.id, &pool.council_id),
        )?;

        let updated = self.db.with_tx(|tx| pools::update_pool(tx, pool_id, &input))?;

        info!(pool = %pool_id, by = %acting_user_id, "Pool updated");
        self.events.emit(LedgerEvent::PoolUpdated {
            pool_id: pool_id.to_string(),
            acting_user_id: acting_user_id.to_string(),
        });
        Ok(updated)
    }

    /// Current ledger rows for every item the pool has received.
    pub fn get_inventory(&self, pool_id: &str) -> Result<Vec<InventorySnapshot>, LedgerError> {
        self.db.with_conn(|conn| {
            pools::get_pool(conn, pool_id)?;
            inventory::list_inventory(conn, pool_id)
        })
    }

    // =========================================================================
    // Contributions
    // =========================================================================

    /// Offer a pool-targeted share to the pool. `units` must be everything
    /// the share has left: a pledge is contributed once, whole.
    pub fn contribute_to_pool(
        &self,
        pool_id: &str,
        wealth_id: &str,
        units: i64,
        acting_user_id: &str,
    ) -> Result<PoolContribution, LedgerError> {
        validate_units("units", units)?;

        let (pool, share) = self.db.with_conn(|conn| {
            Ok((pools::get_pool(conn, pool_id)?, wealth::get_wealth(conn, wealth_id)?))
        })?;

        ensure_authorized(
            self.gate.as_ref(),
            acting_user_id,
            &pool.community_id,
            Action::ContributeToPool,
            &AuthContext::pool(&pool.id, &pool.council_id).with_item(&share.item_id),
        )?;

        if !share.owner.is_user(acting_user_id) {
            return Err(LedgerError::Forbidden(format!(
                "{} does not own wealth {}",
                acting_user_id, wealth_id
            )));
        }
        if share.sharing_target != SharingTarget::Pool {
            return Err(LedgerError::InvalidState(format!(
                "wealth {} is not pledged to a pool",
                wealth_id
            )));
        }
        if share.community_id != pool.community_id {
            return Err(LedgerError::InvalidInput(format!(
                "wealth {} belongs to another community",
                wealth_id
            )));
        }
        if !pool.allows_item(&share.item_id) {
            return Err(LedgerError::InvalidInput(format!(
                "pool {} does not accept item {}",
                pool_id, share.item_id
            )));
        }
        if let Some(minimum) = pool.minimum_contribution {
            if units < minimum {
                return Err(LedgerError::InvalidInput(format!(
                    "contribution of {} is below the pool minimum of {}",
                    units, minimum
                )));
            }
        }
        if units != share.remaining_units() {
            return Err(LedgerError::InvalidInput(format!(
                "wealth {} must be contributed whole ({} units left, {} offered)",
                wealth_id,
                share.remaining_units(),
                units
            )));
        }

        let contribution = self.db.with_tx(|tx| {
            wealth::reserve_units(tx, wealth_id, units)?;
            pools::insert_contribution(tx, pool_id, wealth_id, acting_user_id, &share.item_id, units)
        })?;

        debug!(contribution = %contribution.id, pool = %pool_id, wealth = %wealth_id, units, "Contribution submitted");
        self.events.emit(LedgerEvent::ContributionSubmitted {
            contribution_id: contribution.id.clone(),
            pool_id: pool_id.to_string(),
            units,
        });
        Ok(contribution)
    }

    /// Council confirms receipt; the units become pool inventory.
    pub fn confirm_contribution(
        &self,
        pool_id: &str,
        contribution_id: &str,
        acting_user_id: &str,
    ) -> Result<PoolContribution, LedgerError> {
        self.resolve(pool_id, contribution_id, acting_user_id, ContributionStatus::Confirmed)
    }

    /// Council declines; the contributor's share is released and retired.
    pub fn reject_contribution(
        &self,
        pool_id: &str,
        contribution_id: &str,
        acting_user_id: &str,
    ) -> Result<PoolContribution, LedgerError> {
        self.resolve(pool_id, contribution_id, acting_user_id, ContributionStatus::Rejected)
    }

    fn resolve(
        &self,
        pool_id: &str,
        contribution_id: &str,
        acting_user_id: &str,
        status: ContributionStatus,
    ) -> Result<PoolContribution, LedgerError> {
        let (contribution, pool) = self.db.with_conn(|conn| {
            let pool = pools::get_pool(conn, pool_id)?;
            let contribution = pools::get_contribution(conn, contribution_id)?;
            Ok((contribution, pool))
        })?;
        if contribution.pool_id != pool.id {
            return Err(LedgerError::NotFound(format!(
                "contribution {} in pool {}",
                contribution_id, pool_id
            )));
        }

        ensure_authorized(
            self.gate.as_ref(),
            acting_user_id,
            &pool.community_id,
            Action::ResolveContribution,
            &AuthContext::pool(&pool.id, &pool.council_id).with_item(&contribution.item_id),
        )?;

        let resolved = self.db.with_tx(|tx| {
            let resolved = pools::resolve_contribution(tx, contribution_id, status, acting_user_id)?;
            match status {
                ContributionStatus::Confirmed => {
                    wealth::consume_units(tx, &resolved.wealth_id, resolved.units_offered)?;
                    inventory::confirm_contribution(tx, &resolved.pool_id, &resolved.item_id, resolved.units_offered)?;
                }
                ContributionStatus::Rejected => {
                    wealth::release_units(tx, &resolved.wealth_id, resolved.units_offered)?;
                    wealth::set_wealth_status(tx, &resolved.wealth_id, WealthStatus::Cancelled)?;
                }
                ContributionStatus::Pending => {
                    return Err(LedgerError::InvalidInput("cannot resolve to pending".into()));
                }
            }
            Ok(resolved)
        })?;

        info!(contribution = %contribution_id, pool = %pool.id, status = %status, units = resolved.units_offered, "Contribution resolved");
        self.events.emit(LedgerEvent::ContributionResolved {
            contribution_id: contribution_id.to_string(),
            pool_id: pool.id.clone(),
            status,
            acting_user_id: acting_user_id.to_string(),
        });
        Ok(resolved)
    }

    /// Pending contributions. Council members allowed to resolve see all of
    /// them; other members see only their own.
    pub fn list_pending_contributions(
        &self,
        pool_id: &str,
        acting_user_id: &str,
    ) -> Result<Vec<PoolContribution>, LedgerError> {
        let pool = self.get_pool(pool_id)?;
        let ctx = AuthContext::pool(&pool.id, &pool.council_id);
        ensure_authorized(self.gate.as_ref(), acting_user_id, &pool.community_id, Action::ViewPool, &ctx)?;

        let manager = self.gate.is_authorized(
            acting_user_id,
            &pool.community_id,
            Action::ResolveContribution,
            &ctx,
        );

        let pending = self
            .db
            .with_conn(|conn| pools::list_contributions(conn, pool_id, Some(ContributionStatus::Pending)))?;

        Ok(if manager {
            pending
        } else {
            pending
                .into_iter()
                .filter(|c| c.contributor_id == acting_user_id)
                .collect()
        })
    }

    // =========================================================================
    // Consumption
    // =========================================================================

    /// Council uses up pool units itself. Fails with `InsufficientInventory`
    /// when the pool does not hold that many available units.
    pub fn record_consumption(
        &self,
        pool_id: &str,
        input: RecordConsumptionInput,
        acting_user_id: &str,
    ) -> Result<PoolConsumption, LedgerError> {
        validate_units("units", input.units)?;
        if input.description.trim().chars().count() < 3 {
            return Err(LedgerError::InvalidInput(
                "description must be at least 3 characters".into(),
            ));
        }

        let pool = self.get_pool(pool_id)?;
        ensure_authorized(
            self.gate.as_ref(),
            acting_user_id,
            &pool.community_id,
            Action::ManagePool,
            &AuthContext::pool(&pool.id, &pool.council_id).with_item(&input.item_id),
        )?;
        if !pool.allows_item(&input.item_id) {
            return Err(LedgerError::InvalidInput(format!(
                "pool {} does not hold item {}",
                pool_id, input.item_id
            )));
        }

        let consumption = self.db.with_tx(|tx| {
            inventory::consume(tx, &pool.id, &input.item_id, input.units)?;
            pools::insert_consumption(tx, &pool, &input, acting_user_id)
        })?;

        self.events.emit(LedgerEvent::PoolConsumed {
            consumption_id: consumption.id.clone(),
            pool_id: pool.id.clone(),
            item_id: consumption.item_id.clone(),
            units: consumption.units,
        });
        Ok(consumption)
    }

    pub fn list_consumptions(
        &self,
        pool_id: &str,
        acting_user_id: &str,
    ) -> Result<Vec<PoolConsumption>, LedgerError> {
        let pool = self.get_pool(pool_id)?;
        ensure_authorized(
            self.gate.as_ref(),
            acting_user_id,
            &pool.community_id,
            Action::ViewPool,
            &AuthContext::pool(&pool.id, &pool.council_id),
        )?;
        self.db.with_conn(|conn| pools::list_consumptions(conn, pool_id))
    }

    /// Undo a consumption recorded in error; its units become available again.
    pub fn withdraw_consumption(
        &self,
        pool_id: &str,
        consumption_id: &str,
        acting_user_id: &str,
    ) -> Result<PoolConsumption, LedgerError> {
        let pool = self.get_pool(pool_id)?;
        ensure_authorized(
            self.gate.as_ref(),
            acting_user_id,
            &pool.community_id,
            Action::ManagePool,
            &AuthContext::pool(&pool.id, &pool.council_id),
        )?;

        let withdrawn = self.db.with_tx(|tx| {
            let consumption = pools::get_consumption(tx, consumption_id)?;
            if consumption.pool_id != pool.id {
                return Err(LedgerError::NotFound(format!(
                    "consumption {} in pool {}",
                    consumption_id, pool_id
                )));
            }
            inventory::restore_consumption(tx, &pool.id, &consumption.item_id, consumption.units)?;
            pools::delete_consumption(tx, consumption_id)?;
            Ok(consumption)
        })?;

        info!(consumption = %consumption_id, pool = %pool_id, units = withdrawn.units, "Consumption withdrawn");
        self.events.emit(LedgerEvent::ConsumptionWithdrawn {
            consumption_id: consumption_id.to_string(),
            pool_id: pool.id.clone(),
            units: withdrawn.units,
        });
        Ok(withdrawn)
    }
}

fn validate_limits(per_user_cap: Option<i64>, minimum_contribution: Option<i64>) -> Result<(), LedgerError> {
    if let Some(cap) = per_user_cap {
        validate_units("per_user_cap", cap)?;
    }
    if let Some(minimum) = minimum_contribution {
        validate_units("minimum_contribution", minimum)?;
    }
    Ok(())
}
