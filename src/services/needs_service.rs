//! Needs service - declared demand and its aggregation
//!
//! Active needs are the input signal for mass distribution. Aggregations are
//! read-only views; `collect_recipients` is the per-user collapse the
//! allocation engine plans over. Recurring needs come back each period via
//! [`NeedsService::replenish_due_needs`].
//!
//! Sums saturate at `i64::MAX`; declared quantities are bounded by
//! [`MAX_UNITS`](crate::db::models::MAX_UNITS) but rows written by other tools are not.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::allocation::Recipient;
use crate::db::models::{format_timestamp, validate_units, Need, NeedPriority, NeedStatus, Recurrence};
use crate::db::needs::{self, DeclareNeedInput, NeedQuery};
use crate::db::{inventory, pools, LedgerDb};
use crate::error::LedgerError;
use crate::trust::{ensure_authorized, Action, AuthContext, TrustGate};

use super::events::{EventBus, LedgerEvent};

/// Demand for one priority level
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PriorityBucket {
    pub total_desired: i64,
    pub requester_count: usize,
}

/// Desired units by recurrence
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecurrenceBreakdown {
    pub one_time: i64,
    pub daily: i64,
    pub weekly: i64,
    pub monthly: i64,
}

impl RecurrenceBreakdown {
    fn add(&mut self, recurrence: Recurrence, quantity: i64) {
        let slot = match recurrence {
            Recurrence::OneTime => &mut self.one_time,
            Recurrence::Daily => &mut self.daily,
            Recurrence::Weekly => &mut self.weekly,
            Recurrence::Monthly => &mut self.monthly,
        };
        *slot = slot.saturating_add(quantity);
    }
}

/// Active demand for one item across a community
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemNeedSummary {
    pub item_id: String,
    pub total_desired: i64,
    pub requester_count: usize,
    pub need: PriorityBucket,
    pub want: PriorityBucket,
    pub recurrence: RecurrenceBreakdown,
}

impl ItemNeedSummary {
    fn empty(item_id: &str) -> Self {
        Self {
            item_id: item_id.to_string(),
            total_desired: 0,
            requester_count: 0,
            need: PriorityBucket::default(),
            want: PriorityBucket::default(),
            recurrence: RecurrenceBreakdown::default(),
        }
    }
}

/// Demand for an item a pool can hand out, next to what it holds
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolItemNeeds {
    pub available: i64,
    #[serde(flatten)]
    pub summary: ItemNeedSummary,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolNeeds {
    pub pool_id: String,
    pub items: Vec<PoolItemNeeds>,
}

/// Outcome of one replenishment sweep
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReplenishmentReport {
    pub replenished: Vec<String>,
    pub failed: Vec<ReplenishmentFailure>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReplenishmentFailure {
    pub need_id: String,
    pub error: String,
}

/// Summarize `needs` by item, in item id order.
pub fn summarize(needs: &[Need]) -> Vec<ItemNeedSummary> {
    #[derive(Default)]
    struct Acc {
        users: BTreeSet<String>,
        need_users: BTreeSet<String>,
        want_users: BTreeSet<String>,
    }

    let mut by_item: BTreeMap<&str, (ItemNeedSummary, Acc)> = BTreeMap::new();
    for need in needs {
        let (summary, acc) = by_item
            .entry(need.item_id.as_str())
            .or_insert_with(|| (ItemNeedSummary::empty(&need.item_id), Acc::default()));

        summary.total_desired = summary.total_desired.saturating_add(need.quantity_desired);
        summary.recurrence.add(need.recurrence, need.quantity_desired);
        acc.users.insert(need.user_id.clone());
        let (bucket, users) = match need.priority {
            NeedPriority::Need => (&mut summary.need, &mut acc.need_users),
            NeedPriority::Want => (&mut summary.want, &mut acc.want_users),
        };
        bucket.total_desired = bucket.total_desired.saturating_add(need.quantity_desired);
        users.insert(need.user_id.clone());
    }

    by_item
        .into_values()
        .map(|(mut summary, acc)| {
            summary.requester_count = acc.users.len();
            summary.need.requester_count = acc.need_users.len();
            summary.want.requester_count = acc.want_users.len();
            summary
        })
        .collect()
}

/// Collapse active needs for (community, item) into one recipient per user:
/// desired summed, highest priority, earliest declaration. When
/// `selected_user_ids` is given, only those users are considered; users with
/// no active need are never recipients.
pub fn collect_recipients(
    conn: &Connection,
    community_id: &str,
    item_id: &str,
    selected_user_ids: Option<&[String]>,
) -> Result<Vec<Recipient>, LedgerError> {
    let active = needs::list_needs(
        conn,
        &NeedQuery {
            community_id: Some(community_id.to_string()),
            item_id: Some(item_id.to_string()),
            status: Some(NeedStatus::Active),
        },
    )?;

    let mut by_user: BTreeMap<String, Recipient> = BTreeMap::new();
    for need in active {
        if let Some(selected) = selected_user_ids {
            if !selected.iter().any(|u| u == &need.user_id) {
                continue;
            }
        }
        by_user
            .entry(need.user_id.clone())
            .and_modify(|r| {
                r.desired = r.desired.saturating_add(need.quantity_desired);
                r.priority = r.priority.max(need.priority);
                if need.created_at < r.created_at {
                    r.created_at = need.created_at.clone();
                }
            })
            .or_insert_with(|| Recipient {
                user_id: need.user_id.clone(),
                priority: need.priority,
                created_at: need.created_at.clone(),
                desired: need.quantity_desired,
            });
    }

    Ok(by_user.into_values().collect())
}

pub struct NeedsService {
    db: Arc<LedgerDb>,
    gate: Arc<dyn TrustGate>,
    events: Arc<EventBus>,
}

impl NeedsService {
    pub fn new(db: Arc<LedgerDb>, gate: Arc<dyn TrustGate>, events: Arc<EventBus>) -> Self {
        Self { db, gate, events }
    }

    pub fn declare_need(&self, user_id: &str, input: DeclareNeedInput) -> Result<Need, LedgerError> {
        validate_units("quantity_desired", input.quantity_desired)?;
        ensure_authorized(
            self.gate.as_ref(),
            user_id,
            &input.community_id,
            Action::DeclareNeed,
            &AuthContext::default().with_item(&input.item_id),
        )?;

        let need = self.db.with_tx(|tx| needs::insert_need(tx, user_id, &input))?;
        debug!(need = %need.id, user = %user_id, item = %need.item_id, priority = %need.priority, "Need declared");
        self.events.emit(LedgerEvent::NeedDeclared {
            need_id: need.id.clone(),
            user_id: user_id.to_string(),
            item_id: need.item_id.clone(),
            quantity: need.quantity_desired,
        });
        Ok(need)
    }

    /// Mark one of the caller's active needs as fulfilled or cancelled.
    pub fn close_need(&self, need_id: &str, user_id: &str, status: NeedStatus) -> Result<Need, LedgerError> {
        if status == NeedStatus::Active {
            return Err(LedgerError::InvalidInput("a need can only be closed as fulfilled or cancelled".into()));
        }
        let need = self.db.with_conn(|conn| needs::get_need(conn, need_id))?;
        ensure_authorized(
            self.gate.as_ref(),
            user_id,
            &need.community_id,
            Action::DeclareNeed,
            &AuthContext::default().with_item(&need.item_id),
        )?;
        if need.user_id != user_id {
            return Err(LedgerError::Forbidden(format!("need {} belongs to another user", need_id)));
        }

        let closed = self.db.with_tx(|tx| needs::set_need_status(tx, need_id, status))?;
        info!(need = %need_id, status = %status, "Need closed");
        self.events.emit(LedgerEvent::NeedClosed {
            need_id: need_id.to_string(),
            status,
        });
        Ok(closed)
    }

    /// Start the next period for every recurring need due at `now`.
    ///
    /// Fulfilled recurring needs become active again and the next fulfillment
    /// date moves one period past `now`. Each need is its own transaction; a
    /// failure is reported and the sweep carries on.
    pub fn replenish_due_needs(&self, now: DateTime<Utc>) -> Result<ReplenishmentReport, LedgerError> {
        let stamp = format_timestamp(now);
        let due = self.db.with_conn(|conn| needs::list_due_needs(conn, &stamp))?;

        let mut report = ReplenishmentReport::default();
        for need in due {
            let outcome = match need.recurrence.next_after(now) {
                Some(next) => {
                    let next = format_timestamp(next);
                    self.db
                        .with_tx(|tx| needs::replenish_need(tx, &need.id, &stamp, Some(&next)))
                }
                None => Err(LedgerError::InvalidState(format!(
                    "need {} has no recurrence",
                    need.id
                ))),
            };

            match outcome {
                Ok(_) => {
                    self.events.emit(LedgerEvent::NeedReplenished {
                        need_id: need.id.clone(),
                    });
                    report.replenished.push(need.id);
                }
                Err(e) => {
                    warn!(need = %need.id, error = %e, "Failed to replenish need");
                    report.failed.push(ReplenishmentFailure {
                        need_id: need.id,
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(replenished = report.replenished.len(), failed = report.failed.len(), "Need replenishment finished");
        Ok(report)
    }

    pub fn list_needs(&self, query: &NeedQuery) -> Result<Vec<Need>, LedgerError> {
        self.db.with_conn(|conn| needs::list_needs(conn, query))
    }

    /// Active demand across a community, one summary per item.
    pub fn aggregate_community(&self, community_id: &str) -> Result<Vec<ItemNeedSummary>, LedgerError> {
        let active = self.db.with_conn(|conn| {
            needs::list_needs(
                conn,
                &NeedQuery {
                    community_id: Some(community_id.to_string()),
                    item_id: None,
                    status: Some(NeedStatus::Active),
                },
            )
        })?;
        Ok(summarize(&active))
    }

    /// Active demand for the items a pool handles, with the pool's available
    /// units per item. Items nobody needs are still listed.
    pub fn pool_needs(&self, pool_id: &str) -> Result<PoolNeeds, LedgerError> {
        self.db.with_conn(|conn| {
            let pool = pools::get_pool(conn, pool_id)?;
            let active = needs::list_needs(
                conn,
                &NeedQuery {
                    community_id: Some(pool.community_id.clone()),
                    item_id: None,
                    status: Some(NeedStatus::Active),
                },
            )?;
            let relevant: Vec<Need> = active.into_iter().filter(|n| pool.allows_item(&n.item_id)).collect();
            let mut summaries: BTreeMap<String, ItemNeedSummary> = summarize(&relevant)
                .into_iter()
                .map(|s| (s.item_id.clone(), s))
                .collect();

            let mut item_ids: BTreeSet<&str> = pool.allowed_item_ids.iter().map(String::as_str).collect();
            item_ids.insert(pool.item_id.as_str());

            let mut items = Vec::with_capacity(item_ids.len());
            for item_id in item_ids {
                let counts = inventory::get_counts(conn, &pool.id, item_id)?;
                let summary = summaries
                    .remove(item_id)
                    .unwrap_or_else(|| ItemNeedSummary::empty(item_id));
                items.push(PoolItemNeeds {
                    available: counts.available(),
                    summary,
                });
            }

            Ok(PoolNeeds {
                pool_id: pool.id.clone(),
                items,
            })
        })
    }

    /// Allocation candidates for (community, item).
    pub fn recipients_for(
        &self,
        community_id: &str,
        item_id: &str,
        selected_user_ids: Option<&[String]>,
    ) -> Result<Vec<Recipient>, LedgerError> {
        self.db
            .with_conn(|conn| collect_recipients(conn, community_id, item_id, selected_user_ids))
    }
}
