//! Shared fixtures for integration tests

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use commons_ledger::db::models::{NeedPriority, Pool, Recurrence, SharingTarget, Wealth};
use commons_ledger::db::needs::DeclareNeedInput;
use commons_ledger::db::pools::CreatePoolInput;
use commons_ledger::db::wealth::CreateWealthInput;
use commons_ledger::{LedgerDb, LockPolicy, Services, StaticTrustGate};
use tempfile::TempDir;

pub const COMMUNITY: &str = "garden";
pub const COUNCIL_MEMBER: &str = "cora";

pub struct Ledger {
    pub services: Services,
    pub gate: Arc<StaticTrustGate>,
    pub db: Arc<LedgerDb>,
    _dir: Option<TempDir>,
}

fn build(db: LedgerDb, dir: Option<TempDir>) -> Ledger {
    let db = Arc::new(db);
    let gate = Arc::new(StaticTrustGate::new());
    for user in [COUNCIL_MEMBER, "ana", "ben", "cai", "dee"] {
        gate.grant_all(user, COMMUNITY);
    }
    Ledger {
        services: Services::new(db.clone(), gate.clone()),
        gate,
        db,
        _dir: dir,
    }
}

/// In-memory ledger where cora, ana, ben, cai and dee hold every grant.
pub fn ledger() -> Ledger {
    build(LedgerDb::open_in_memory().unwrap(), None)
}

/// File-backed ledger in a temporary directory.
pub fn file_ledger() -> Ledger {
    let dir = TempDir::new().unwrap();
    let db = LedgerDb::open(
        &dir.path().join("ledger.db"),
        LockPolicy {
            max_wait: Duration::from_secs(10),
            initial_backoff: Duration::from_millis(1),
        },
    )
    .unwrap();
    build(db, Some(dir))
}

pub fn share(item: &str, units: i64, target: SharingTarget) -> CreateWealthInput {
    CreateWealthInput {
        community_id: COMMUNITY.into(),
        item_id: item.into(),
        title: format!("{} share", item),
        units,
        sharing_target: target,
    }
}

pub fn direct_share(ledger: &Ledger, owner: &str, units: i64) -> Wealth {
    ledger
        .services
        .wealth
        .create_wealth(owner, share("tools", units, SharingTarget::Direct))
        .unwrap()
}

pub fn rice_pool(ledger: &Ledger, per_user_cap: Option<i64>) -> Pool {
    ledger
        .services
        .pools
        .create_pool(
            CreatePoolInput {
                community_id: COMMUNITY.into(),
                council_id: "food-council".into(),
                item_id: "rice".into(),
                name: "Rice pool".into(),
                per_user_cap,
                minimum_contribution: None,
                allowed_item_ids: vec![],
            },
            COUNCIL_MEMBER,
        )
        .unwrap()
}

/// Pledge, contribute and confirm `units` of the pool's item.
pub fn fund(ledger: &Ledger, pool: &Pool, contributor: &str, units: i64) {
    let pledged = ledger
        .services
        .wealth
        .create_wealth(contributor, share(&pool.item_id, units, SharingTarget::Pool))
        .unwrap();
    let contribution = ledger
        .services
        .pools
        .contribute_to_pool(&pool.id, &pledged.id, units, contributor)
        .unwrap();
    ledger
        .services
        .pools
        .confirm_contribution(&pool.id, &contribution.id, COUNCIL_MEMBER)
        .unwrap();
}

pub fn declare(ledger: &Ledger, user: &str, item: &str, priority: NeedPriority, quantity: i64) {
    ledger
        .services
        .needs
        .declare_need(
            user,
            DeclareNeedInput {
                community_id: COMMUNITY.into(),
                item_id: item.into(),
                priority,
                quantity_desired: quantity,
                recurrence: Recurrence::OneTime,
            },
        )
        .unwrap();
}
