//! Allocation service - moving units out of a pool
//!
//! Every grant, manual or mass, is written the same way inside one
//! transaction:
//!
//! 1. reserve on the pool ledger (fails if the pool is short)
//! 2. create a pool-owned wealth share holding the units
//! 3. create an `accepted` request for the recipient against it
//! 4. commit the reservation as distributed and record the distribution
//!
//! The recipient then confirms or fails the request through the wealth
//! service like any other hand-over.
//!
//! Mass distribution is two-phase. `preview_mass_distribution` plans over a
//! snapshot and returns a token; `distribute_mass` re-plans inside the write
//! transaction and refuses to commit unless the token still matches.

use std::sync::Arc;

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::allocation::{self, AllocationPlan, MassStrategy, PlanScope};
use crate::db::models::{
    validate_units, DistributionStrategy, Pool, PoolDistribution, RequestStatus, SharingTarget, WealthOwner,
};
use crate::db::pools::{self, NewDistribution};
use crate::db::wealth::{self, CreateWealthInput};
use crate::db::{inventory, LedgerDb};
use crate::error::LedgerError;
use crate::trust::{ensure_authorized, Action, AuthContext, TrustGate};

use super::events::{EventBus, LedgerEvent};
use super::needs_service::collect_recipients;

/// Parameters of a needs-based mass distribution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MassDistributionRequest {
    pub pool_id: String,
    pub item_id: String,
    pub strategy: MassStrategy,
    /// Overrides the pool's `per_user_cap` when set
    #[serde(default)]
    pub max_units_per_user: Option<i64>,
    /// Restrict candidates to these users
    #[serde(default)]
    pub selected_user_ids: Option<Vec<String>>,
}

impl MassDistributionRequest {
    fn scope(&self) -> PlanScope<'_> {
        PlanScope {
            pool_id: &self.pool_id,
            item_id: &self.item_id,
            max_units_per_user: self.max_units_per_user,
            selected_user_ids: self.selected_user_ids.as_deref(),
        }
    }
}

/// Dry-run result handed back to the council
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MassDistributionPreview {
    pub pool_id: String,
    pub item_id: String,
    pub plan: AllocationPlan,
    pub preview_token: String,
}

pub struct AllocationService {
    db: Arc<LedgerDb>,
    gate: Arc<dyn TrustGate>,
    events: Arc<EventBus>,
}

impl AllocationService {
    pub fn new(db: Arc<LedgerDb>, gate: Arc<dyn TrustGate>, events: Arc<EventBus>) -> Self {
        Self { db, gate, events }
    }

    /// Grant `units` of `item_id` from the pool to one recipient.
    pub fn distribute_manually(
        &self,
        pool_id: &str,
        item_id: &str,
        recipient_user_id: &str,
        units: i64,
        acting_user_id: &str,
    ) -> Result<PoolDistribution, LedgerError> {
        validate_units("units", units)?;

        let pool = self.db.with_conn(|conn| pools::get_pool(conn, pool_id))?;
        self.authorize(&pool, item_id, acting_user_id, Action::DistributeFromPool)?;
        ensure_item(&pool, item_id)?;

        let distribution = self.db.with_tx(|tx| {
            grant_units(
                tx,
                &pool,
                Grant {
                    item_id,
                    recipient_user_id,
                    units,
                    strategy: DistributionStrategy::Manual,
                    distributed_by: acting_user_id,
                },
            )
        })?;

        info!(pool = %pool_id, item = %item_id, recipient = %recipient_user_id, units, "Manual distribution");
        self.emit_distributed(&distribution);
        Ok(distribution)
    }

    /// Plan a mass distribution without touching the ledger.
    pub fn preview_mass_distribution(
        &self,
        request: &MassDistributionRequest,
        acting_user_id: &str,
    ) -> Result<MassDistributionPreview, LedgerError> {
        validate_request(request)?;
        let pool = self.db.with_conn(|conn| pools::get_pool(conn, &request.pool_id))?;
        self.authorize(&pool, &request.item_id, acting_user_id, Action::PreviewDistribution)?;
        ensure_item(&pool, &request.item_id)?;

        let plan = self.db.with_conn(|conn| plan_for(conn, &pool, request))?;
        let preview_token = allocation::plan_token(&request.scope(), &plan);

        debug!(
            pool = %request.pool_id,
            item = %request.item_id,
            strategy = %request.strategy,
            available = plan.available,
            granted = plan.total_granted,
            recipients = plan.grants.len(),
            "Mass distribution previewed"
        );

        Ok(MassDistributionPreview {
            pool_id: request.pool_id.clone(),
            item_id: request.item_id.clone(),
            plan,
            preview_token,
        })
    }

    /// Commit a previously previewed plan. If inventory or needs moved since
    /// the preview, nothing is written and `Conflict` is returned.
    pub fn distribute_mass(
        &self,
        request: &MassDistributionRequest,
        preview_token: &str,
        acting_user_id: &str,
    ) -> Result<Vec<PoolDistribution>, LedgerError> {
        validate_request(request)?;
        let pool = self.db.with_conn(|conn| pools::get_pool(conn, &request.pool_id))?;
        self.authorize(&pool, &request.item_id, acting_user_id, Action::DistributeFromPool)?;
        ensure_item(&pool, &request.item_id)?;

        let strategy = DistributionStrategy::from(request.strategy);
        let distributions = self.db.with_tx(|tx| {
            let plan = plan_for(tx, &pool, request)?;
            let token = allocation::plan_token(&request.scope(), &plan);
            if token != preview_token {
                warn!(pool = %request.pool_id, item = %request.item_id, "Preview is stale");
                return Err(LedgerError::Conflict(
                    "pool inventory or needs changed since preview".into(),
                ));
            }
            if plan.total_granted == 0 {
                return Err(LedgerError::InvalidInput("plan grants no units".into()));
            }

            plan.grants
                .iter()
                .filter(|g| g.granted > 0)
                .map(|g| {
                    grant_units(
                        tx,
                        &pool,
                        Grant {
                            item_id: &request.item_id,
                            recipient_user_id: &g.user_id,
                            units: g.granted,
                            strategy,
                            distributed_by: acting_user_id,
                        },
                    )
                })
                .collect::<Result<Vec<_>, _>>()
        })?;

        let units: i64 = distributions.iter().map(|d| d.units_granted).sum();
        info!(
            pool = %request.pool_id,
            item = %request.item_id,
            strategy = %request.strategy,
            recipients = distributions.len(),
            units,
            "Mass distribution committed"
        );
        for distribution in &distributions {
            self.emit_distributed(distribution);
        }
        self.events.emit(LedgerEvent::MassDistributionCommitted {
            pool_id: request.pool_id.clone(),
            item_id: request.item_id.clone(),
            recipients: distributions.len(),
            units,
        });

        Ok(distributions)
    }

    pub fn list_distributions(
        &self,
        pool_id: &str,
        acting_user_id: &str,
    ) -> Result<Vec<PoolDistribution>, LedgerError> {
        let pool = self.db.with_conn(|conn| pools::get_pool(conn, pool_id))?;
        ensure_authorized(
            self.gate.as_ref(),
            acting_user_id,
            &pool.community_id,
            Action::ViewPool,
            &AuthContext::pool(&pool.id, &pool.council_id),
        )?;
        self.db.with_conn(|conn| pools::list_distributions(conn, pool_id))
    }

    fn authorize(&self, pool: &Pool, item_id: &str, user_id: &str, action: Action) -> Result<(), LedgerError> {
        ensure_authorized(
            self.gate.as_ref(),
            user_id,
            &pool.community_id,
            action,
            &AuthContext::pool(&pool.id, &pool.council_id).with_item(item_id),
        )
    }

    fn emit_distributed(&self, distribution: &PoolDistribution) {
        self.events.emit(LedgerEvent::UnitsDistributed {
            distribution_id: distribution.id.clone(),
            pool_id: distribution.pool_id.clone(),
            recipient_user_id: distribution.recipient_user_id.clone(),
            units: distribution.units_granted,
            strategy: distribution.strategy,
        });
    }
}

struct Grant<'a> {
    item_id: &'a str,
    recipient_user_id: &'a str,
    units: i64,
    strategy: DistributionStrategy,
    distributed_by: &'a str,
}

/// Write one grant. Must run inside the caller's transaction.
fn grant_units(conn: &Connection, pool: &Pool, grant: Grant<'_>) -> Result<PoolDistribution, LedgerError> {
    inventory::reserve(conn, &pool.id, grant.item_id, grant.units)?;

    let share = wealth::insert_wealth(
        conn,
        &WealthOwner::Pool(pool.id.clone()),
        &CreateWealthInput {
            community_id: pool.community_id.clone(),
            item_id: grant.item_id.to_string(),
            title: format!("{} grant", pool.name),
            units: grant.units,
            sharing_target: SharingTarget::Direct,
        },
    )?;
    wealth::reserve_units(conn, &share.id, grant.units)?;
    let request = wealth::insert_request(
        conn,
        &share.id,
        grant.recipient_user_id,
        grant.units,
        RequestStatus::Accepted,
        None,
    )?;

    inventory::commit_distribution(conn, &pool.id, grant.item_id, grant.units)?;
    pools::insert_distribution(
        conn,
        &NewDistribution {
            pool_id: &pool.id,
            item_id: grant.item_id,
            recipient_user_id: grant.recipient_user_id,
            units_granted: grant.units,
            strategy: grant.strategy,
            wealth_id: &share.id,
            request_id: &request.id,
            distributed_by: grant.distributed_by,
        },
    )
}

/// Plan over the current state. Called under `with_conn` for previews and
/// under `with_tx` for commits so both see a consistent snapshot.
fn plan_for(conn: &Connection, pool: &Pool, request: &MassDistributionRequest) -> Result<AllocationPlan, LedgerError> {
    let available = inventory::get_counts(conn, &pool.id, &request.item_id)?.available();
    let recipients = collect_recipients(
        conn,
        &pool.community_id,
        &request.item_id,
        request.selected_user_ids.as_deref(),
    )?;
    let cap = request.max_units_per_user.or(pool.per_user_cap);
    Ok(allocation::plan(available, recipients, request.strategy, cap))
}

fn validate_request(request: &MassDistributionRequest) -> Result<(), LedgerError> {
    if let Some(cap) = request.max_units_per_user {
        validate_units("max_units_per_user", cap)?;
    }
    Ok(())
}

fn ensure_item(pool: &Pool, item_id: &str) -> Result<(), LedgerError> {
    if !pool.allows_item(item_id) {
        return Err(LedgerError::InvalidInput(format!(
            "pool {} does not hold item {}",
            pool.id, item_id
        )));
    }
    Ok(())
}
