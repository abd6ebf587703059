//! Integration tests for pool contributions, the inventory ledger and
//! allocation (manual and needs-based mass distribution)

mod common;

use commons_ledger::db::models::{
    ContributionStatus, DistributionStatus, DistributionStrategy, NeedPriority, RequestStatus,
    SharingTarget, WealthStatus, MAX_UNITS,
};
use commons_ledger::db::pools::{self, CreatePoolInput, RecordConsumptionInput, UpdatePoolInput};
use commons_ledger::db::inventory;
use commons_ledger::{Action, LedgerError, LedgerEvent, MassDistributionRequest, MassStrategy};
use common::{declare, fund, ledger, rice_pool, share, Ledger, COMMUNITY, COUNCIL_MEMBER};

fn mass(pool_id: &str, strategy: MassStrategy) -> MassDistributionRequest {
    MassDistributionRequest {
        pool_id: pool_id.into(),
        item_id: "rice".into(),
        strategy,
        max_units_per_user: None,
        selected_user_ids: None,
    }
}

fn available(ledger: &Ledger, pool_id: &str) -> i64 {
    ledger
        .services
        .pools
        .get_inventory(pool_id)
        .unwrap()
        .iter()
        .find(|row| row.item_id == "rice")
        .map(|row| row.available)
        .unwrap_or(0)
}

/// `confirmed` always equals the confirmed contributions, and nothing is
/// reserved or distributed beyond it.
fn assert_ledger_consistent(ledger: &Ledger, pool_id: &str) {
    ledger
        .db
        .with_conn(|conn| {
            let counts = inventory::get_counts(conn, pool_id, "rice")?;
            let confirmed = pools::sum_confirmed_contributions(conn, pool_id, "rice")?;
            assert_eq!(counts.confirmed_units, confirmed);
            assert!(counts.available() >= 0);
            Ok(())
        })
        .unwrap();
}

// ============================================================================
// Contributions
// ============================================================================

#[test]
fn test_confirmed_contribution_credits_inventory() {
    let ledger = ledger();
    let pool = rice_pool(&ledger, None);

    let pledged = ledger
        .services
        .wealth
        .create_wealth("ana", share("rice", 6, SharingTarget::Pool))
        .unwrap();
    let contribution = ledger
        .services
        .pools
        .contribute_to_pool(&pool.id, &pledged.id, 6, "ana")
        .unwrap();
    assert_eq!(contribution.status, ContributionStatus::Pending);
    assert_eq!(available(&ledger, &pool.id), 0);

    let pending = ledger.services.pools.list_pending_contributions(&pool.id, COUNCIL_MEMBER).unwrap();
    assert_eq!(pending.len(), 1);

    let confirmed = ledger
        .services
        .pools
        .confirm_contribution(&pool.id, &contribution.id, COUNCIL_MEMBER)
        .unwrap();
    assert_eq!(confirmed.status, ContributionStatus::Confirmed);
    assert_eq!(confirmed.resolved_by.as_deref(), Some(COUNCIL_MEMBER));
    assert_eq!(available(&ledger, &pool.id), 6);
    assert_eq!(
        ledger.services.wealth.get_wealth(&pledged.id).unwrap().status,
        WealthStatus::Fulfilled
    );

    // Resolved exactly once
    let err = ledger
        .services
        .pools
        .reject_contribution(&pool.id, &contribution.id, COUNCIL_MEMBER)
        .unwrap_err();
    assert!(matches!(err, LedgerError::InvalidState(_)));
    assert_ledger_consistent(&ledger, &pool.id);
}

#[test]
fn test_rejected_contribution_has_no_ledger_effect() {
    let ledger = ledger();
    let pool = rice_pool(&ledger, None);
    fund(&ledger, &pool, "ben", 4);

    let pledged = ledger
        .services
        .wealth
        .create_wealth("ana", share("rice", 3, SharingTarget::Pool))
        .unwrap();
    let contribution = ledger
        .services
        .pools
        .contribute_to_pool(&pool.id, &pledged.id, 3, "ana")
        .unwrap();
    ledger
        .services
        .pools
        .reject_contribution(&pool.id, &contribution.id, COUNCIL_MEMBER)
        .unwrap();

    assert_eq!(available(&ledger, &pool.id), 4);
    let after = ledger.services.wealth.get_wealth(&pledged.id).unwrap();
    assert_eq!(after.status, WealthStatus::Cancelled);
    assert_eq!(after.reserved_units, 0);
    assert_ledger_consistent(&ledger, &pool.id);
}

#[test]
fn test_contribution_rules() {
    let ledger = ledger();
    let pool = ledger
        .services
        .pools
        .create_pool(
            CreatePoolInput {
                community_id: COMMUNITY.into(),
                council_id: "food-council".into(),
                item_id: "rice".into(),
                name: "Staples".into(),
                per_user_cap: None,
                minimum_contribution: Some(2),
                allowed_item_ids: vec!["beans".into()],
            },
            COUNCIL_MEMBER,
        )
        .unwrap();
    let pools = &ledger.services.pools;
    let wealth = &ledger.services.wealth;

    let small = wealth.create_wealth("ana", share("rice", 5, SharingTarget::Pool)).unwrap();
    let err = pools.contribute_to_pool(&pool.id, &small.id, 1, "ana").unwrap_err();
    assert!(matches!(err, LedgerError::InvalidInput(_)));

    let err = pools.contribute_to_pool(&pool.id, &small.id, 2, "ben").unwrap_err();
    assert!(matches!(err, LedgerError::Forbidden(_)));

    let salt = wealth.create_wealth("ana", share("salt", 5, SharingTarget::Pool)).unwrap();
    let err = pools.contribute_to_pool(&pool.id, &salt.id, 5, "ana").unwrap_err();
    assert!(matches!(err, LedgerError::InvalidInput(_)));

    let direct = wealth.create_wealth("ana", share("rice", 5, SharingTarget::Direct)).unwrap();
    let err = pools.contribute_to_pool(&pool.id, &direct.id, 5, "ana").unwrap_err();
    assert!(matches!(err, LedgerError::InvalidState(_)));

    let beans = wealth.create_wealth("ana", share("beans", 5, SharingTarget::Pool)).unwrap();
    pools.contribute_to_pool(&pool.id, &beans.id, 5, "ana").unwrap();
    let err = pools.contribute_to_pool(&pool.id, &beans.id, 5, "ana").unwrap_err();
    assert!(matches!(err, LedgerError::InvalidInput(_)));
    assert_eq!(pools.list_pending_contributions(&pool.id, COUNCIL_MEMBER).unwrap().len(), 1);

    // A pledged share with a pending contribution cannot be withdrawn
    let err = wealth.cancel_wealth(&beans.id, "ana").unwrap_err();
    assert!(matches!(err, LedgerError::InvalidState(_)));
}

#[test]
fn test_pledge_must_be_contributed_whole() {
    let ledger = ledger();
    let pool = rice_pool(&ledger, None);
    let pledged = ledger
        .services
        .wealth
        .create_wealth("ana", share("rice", 5, SharingTarget::Pool))
        .unwrap();

    let err = ledger
        .services
        .pools
        .contribute_to_pool(&pool.id, &pledged.id, 2, "ana")
        .unwrap_err();
    assert!(matches!(err, LedgerError::InvalidInput(_)));
    assert_eq!(ledger.services.wealth.get_wealth(&pledged.id).unwrap().reserved_units, 0);

    let contribution = ledger
        .services
        .pools
        .contribute_to_pool(&pool.id, &pledged.id, 5, "ana")
        .unwrap();
    ledger
        .services
        .pools
        .confirm_contribution(&pool.id, &contribution.id, COUNCIL_MEMBER)
        .unwrap();
    let after = ledger.services.wealth.get_wealth(&pledged.id).unwrap();
    assert_eq!(after.remaining_units(), 0);
    assert_eq!(after.status, WealthStatus::Fulfilled);
    assert_eq!(available(&ledger, &pool.id), 5);
}

#[test]
fn test_resolving_through_another_pool_is_not_found() {
    let ledger = ledger();
    let rice = rice_pool(&ledger, None);
    let other = rice_pool(&ledger, None);
    let pledged = ledger
        .services
        .wealth
        .create_wealth("ana", share("rice", 4, SharingTarget::Pool))
        .unwrap();
    let contribution = ledger
        .services
        .pools
        .contribute_to_pool(&rice.id, &pledged.id, 4, "ana")
        .unwrap();

    let err = ledger
        .services
        .pools
        .confirm_contribution(&other.id, &contribution.id, COUNCIL_MEMBER)
        .unwrap_err();
    assert!(matches!(err, LedgerError::NotFound(_)));
    let err = ledger
        .services
        .pools
        .reject_contribution(&other.id, &contribution.id, COUNCIL_MEMBER)
        .unwrap_err();
    assert!(matches!(err, LedgerError::NotFound(_)));
    assert_eq!(available(&ledger, &other.id), 0);
    assert_eq!(available(&ledger, &rice.id), 0);

    ledger
        .services
        .pools
        .confirm_contribution(&rice.id, &contribution.id, COUNCIL_MEMBER)
        .unwrap();
    assert_eq!(available(&ledger, &rice.id), 4);
    assert_ledger_consistent(&ledger, &rice.id);
}

#[test]
fn test_members_see_only_their_own_pending_contributions() {
    let ledger = ledger();
    let pool = rice_pool(&ledger, None);
    for (user, units) in [("ana", 2), ("ben", 3)] {
        let pledged = ledger
            .services
            .wealth
            .create_wealth(user, share("rice", units, SharingTarget::Pool))
            .unwrap();
        ledger
            .services
            .pools
            .contribute_to_pool(&pool.id, &pledged.id, units, user)
            .unwrap();
    }
    ledger.gate.revoke("ana", COMMUNITY, Action::ResolveContribution);

    let own = ledger.services.pools.list_pending_contributions(&pool.id, "ana").unwrap();
    assert_eq!(own.len(), 1);
    assert_eq!(own[0].contributor_id, "ana");

    let all = ledger.services.pools.list_pending_contributions(&pool.id, COUNCIL_MEMBER).unwrap();
    assert_eq!(all.len(), 2);
}

// ============================================================================
// Manual distribution
// ============================================================================

#[test]
fn test_manual_grant_then_recipient_confirms() {
    let ledger = ledger();
    let pool = rice_pool(&ledger, None);
    fund(&ledger, &pool, "ana", 10);

    let distribution = ledger
        .services
        .allocation
        .distribute_manually(&pool.id, "rice", "ben", 4, COUNCIL_MEMBER)
        .unwrap();
    assert_eq!(distribution.strategy, DistributionStrategy::Manual);
    assert_eq!(distribution.units_granted, 4);
    assert_eq!(available(&ledger, &pool.id), 6);

    let request = ledger.services.wealth.get_request(&distribution.request_id).unwrap();
    assert_eq!(request.status, RequestStatus::Accepted);
    assert_eq!(request.requester_id, "ben");

    ledger.services.wealth.confirm_request(&request.id, "ben").unwrap();
    let granted = ledger.services.wealth.get_wealth(&distribution.wealth_id).unwrap();
    assert_eq!(granted.status, WealthStatus::Fulfilled);
    assert_eq!(granted.source_pool_id(), Some(pool.id.as_str()));

    // Confirmed grants stay distributed
    assert_eq!(available(&ledger, &pool.id), 6);
    assert_ledger_consistent(&ledger, &pool.id);
}

#[test]
fn test_failed_pool_grant_returns_units() {
    let ledger = ledger();
    let pool = rice_pool(&ledger, None);
    fund(&ledger, &pool, "ana", 10);
    let mut events = ledger.services.events.subscribe();

    let distribution = ledger
        .services
        .allocation
        .distribute_manually(&pool.id, "rice", "ben", 4, COUNCIL_MEMBER)
        .unwrap();
    ledger.services.wealth.fail_request(&distribution.request_id, "ben").unwrap();

    assert_eq!(available(&ledger, &pool.id), 10);
    let granted = ledger.services.wealth.get_wealth(&distribution.wealth_id).unwrap();
    assert_eq!(granted.status, WealthStatus::Cancelled);

    let mut restored = false;
    while let Ok(event) = events.try_recv() {
        if let LedgerEvent::DistributionRestored { units, .. } = event {
            assert_eq!(units, 4);
            restored = true;
        }
    }
    assert!(restored);
    assert_ledger_consistent(&ledger, &pool.id);
}

#[test]
fn test_cancelled_pool_grant_returns_units() {
    let ledger = ledger();
    let pool = rice_pool(&ledger, None);
    fund(&ledger, &pool, "ana", 10);

    let distribution = ledger
        .services
        .allocation
        .distribute_manually(&pool.id, "rice", "ben", 4, COUNCIL_MEMBER)
        .unwrap();
    assert_eq!(distribution.status, DistributionStatus::Active);
    assert_eq!(available(&ledger, &pool.id), 6);

    // The pool owns the grant's share, so only the recipient can cancel it
    let err = ledger
        .services
        .wealth
        .cancel_request(&distribution.request_id, COUNCIL_MEMBER)
        .unwrap_err();
    assert!(matches!(err, LedgerError::Forbidden(_)));

    let cancelled = ledger
        .services
        .wealth
        .cancel_request(&distribution.request_id, "ben")
        .unwrap();
    assert_eq!(cancelled.status, RequestStatus::Cancelled);
    assert_eq!(available(&ledger, &pool.id), 10);

    let listed = ledger
        .services
        .allocation
        .list_distributions(&pool.id, COUNCIL_MEMBER)
        .unwrap();
    assert_eq!(listed[0].status, DistributionStatus::Restored);
    assert_ledger_consistent(&ledger, &pool.id);
}

#[test]
fn test_distribution_status_follows_request() {
    let ledger = ledger();
    let pool = rice_pool(&ledger, None);
    fund(&ledger, &pool, "ana", 10);
    let allocation = &ledger.services.allocation;

    let failed = allocation
        .distribute_manually(&pool.id, "rice", "ben", 4, COUNCIL_MEMBER)
        .unwrap();
    let kept = allocation
        .distribute_manually(&pool.id, "rice", "cai", 3, COUNCIL_MEMBER)
        .unwrap();
    ledger.services.wealth.fail_request(&failed.request_id, "ben").unwrap();
    ledger.services.wealth.confirm_request(&kept.request_id, "cai").unwrap();

    let listed = allocation.list_distributions(&pool.id, COUNCIL_MEMBER).unwrap();
    let status_of = |id: &str| listed.iter().find(|d| d.id == id).map(|d| d.status);
    assert_eq!(status_of(&failed.id), Some(DistributionStatus::Restored));
    assert_eq!(status_of(&kept.id), Some(DistributionStatus::Confirmed));
    assert_eq!(available(&ledger, &pool.id), 7);
    assert_ledger_consistent(&ledger, &pool.id);
}

#[test]
fn test_manual_grant_beyond_available_changes_nothing() {
    let ledger = ledger();
    let pool = rice_pool(&ledger, None);
    fund(&ledger, &pool, "ana", 3);

    let err = ledger
        .services
        .allocation
        .distribute_manually(&pool.id, "rice", "ben", 4, COUNCIL_MEMBER)
        .unwrap_err();
    assert!(matches!(err, LedgerError::InsufficientInventory { requested: 4, available: 3 }));
    assert_eq!(available(&ledger, &pool.id), 3);
    assert!(ledger
        .services
        .allocation
        .list_distributions(&pool.id, COUNCIL_MEMBER)
        .unwrap()
        .is_empty());
}

#[test]
fn test_distribution_requires_grant() {
    let ledger = ledger();
    let pool = rice_pool(&ledger, None);
    fund(&ledger, &pool, "ana", 3);
    ledger.gate.revoke("dee", COMMUNITY, Action::DistributeFromPool);

    let err = ledger
        .services
        .allocation
        .distribute_manually(&pool.id, "rice", "ben", 1, "dee")
        .unwrap_err();
    assert!(matches!(err, LedgerError::Forbidden(_)));
    assert_eq!(available(&ledger, &pool.id), 3);
}

// ============================================================================
// Mass distribution
// ============================================================================

#[test]
fn test_equal_split_preview_matches_commit() {
    let ledger = ledger();
    let pool = rice_pool(&ledger, None);
    fund(&ledger, &pool, "dee", 10);
    declare(&ledger, "ana", "rice", NeedPriority::Need, 5);
    declare(&ledger, "ben", "rice", NeedPriority::Need, 3);
    declare(&ledger, "cai", "rice", NeedPriority::Need, 4);

    let request = mass(&pool.id, MassStrategy::Equal);
    let preview = ledger
        .services
        .allocation
        .preview_mass_distribution(&request, COUNCIL_MEMBER)
        .unwrap();

    let proposed: Vec<(&str, i64)> = preview
        .plan
        .grants
        .iter()
        .map(|g| (g.user_id.as_str(), g.granted))
        .collect();
    assert_eq!(proposed, vec![("ana", 4), ("ben", 3), ("cai", 3)]);
    assert_eq!(preview.plan.remainder, 0);
    assert_eq!(preview.plan.unmet, 2);

    // Preview does not touch the ledger
    assert_eq!(available(&ledger, &pool.id), 10);

    let committed = ledger
        .services
        .allocation
        .distribute_mass(&request, &preview.preview_token, COUNCIL_MEMBER)
        .unwrap();
    let granted: Vec<(&str, i64)> = committed
        .iter()
        .map(|d| (d.recipient_user_id.as_str(), d.units_granted))
        .collect();
    assert_eq!(granted, proposed);
    assert!(committed.iter().all(|d| d.strategy == DistributionStrategy::Equal));

    assert_eq!(available(&ledger, &pool.id), 0);
    assert_eq!(
        ledger.services.allocation.list_distributions(&pool.id, COUNCIL_MEMBER).unwrap().len(),
        3
    );
    assert_ledger_consistent(&ledger, &pool.id);
}

#[test]
fn test_stale_preview_is_rejected() {
    let ledger = ledger();
    let pool = rice_pool(&ledger, None);
    fund(&ledger, &pool, "dee", 10);
    declare(&ledger, "ana", "rice", NeedPriority::Need, 8);
    declare(&ledger, "ben", "rice", NeedPriority::Want, 8);

    let request = mass(&pool.id, MassStrategy::Partial);
    let preview = ledger
        .services
        .allocation
        .preview_mass_distribution(&request, COUNCIL_MEMBER)
        .unwrap();

    // Inventory moves between preview and commit
    fund(&ledger, &pool, "cai", 5);

    let err = ledger
        .services
        .allocation
        .distribute_mass(&request, &preview.preview_token, COUNCIL_MEMBER)
        .unwrap_err();
    assert!(matches!(err, LedgerError::Conflict(_)));
    assert!(err.is_transient());
    assert_eq!(available(&ledger, &pool.id), 15);
    assert!(ledger
        .services
        .allocation
        .list_distributions(&pool.id, COUNCIL_MEMBER)
        .unwrap()
        .is_empty());

    // A fresh preview commits
    let fresh = ledger
        .services
        .allocation
        .preview_mass_distribution(&request, COUNCIL_MEMBER)
        .unwrap();
    let committed = ledger
        .services
        .allocation
        .distribute_mass(&request, &fresh.preview_token, COUNCIL_MEMBER)
        .unwrap();
    assert_eq!(committed.iter().map(|d| d.units_granted).sum::<i64>(), 15);
}

#[test]
fn test_full_and_partial_strategies() {
    let ledger = ledger();
    let pool = rice_pool(&ledger, None);
    fund(&ledger, &pool, "dee", 10);
    declare(&ledger, "ana", "rice", NeedPriority::Need, 7);
    declare(&ledger, "ben", "rice", NeedPriority::Need, 6);

    let full = ledger
        .services
        .allocation
        .preview_mass_distribution(&mass(&pool.id, MassStrategy::Full), COUNCIL_MEMBER)
        .unwrap();
    let grants: Vec<i64> = full.plan.grants.iter().map(|g| g.granted).collect();
    assert_eq!(grants, vec![7, 0]);
    assert_eq!(full.plan.remainder, 3);

    let partial = ledger
        .services
        .allocation
        .preview_mass_distribution(&mass(&pool.id, MassStrategy::Partial), COUNCIL_MEMBER)
        .unwrap();
    let grants: Vec<i64> = partial.plan.grants.iter().map(|g| g.granted).collect();
    assert_eq!(grants, vec![7, 3]);
    assert_eq!(partial.plan.remainder, 0);

    // Only recipients with a non-zero grant get a distribution
    let committed = ledger
        .services
        .allocation
        .distribute_mass(&mass(&pool.id, MassStrategy::Full), &full.preview_token, COUNCIL_MEMBER)
        .unwrap();
    assert_eq!(committed.len(), 1);
    assert_eq!(committed[0].recipient_user_id, "ana");
    assert_eq!(available(&ledger, &pool.id), 3);
}

#[test]
fn test_caps_and_selection() {
    let ledger = ledger();
    let pool = rice_pool(&ledger, Some(2));
    fund(&ledger, &pool, "dee", 10);
    declare(&ledger, "ana", "rice", NeedPriority::Need, 5);
    declare(&ledger, "ben", "rice", NeedPriority::Want, 5);
    declare(&ledger, "cai", "rice", NeedPriority::Need, 5);

    let pool_cap = ledger
        .services
        .allocation
        .preview_mass_distribution(&mass(&pool.id, MassStrategy::Partial), COUNCIL_MEMBER)
        .unwrap();
    assert!(pool_cap.plan.grants.iter().all(|g| g.granted == 2));
    assert_eq!(pool_cap.plan.remainder, 4);

    let mut request = mass(&pool.id, MassStrategy::Partial);
    request.max_units_per_user = Some(4);
    request.selected_user_ids = Some(vec!["ben".into(), "cai".into()]);
    let selected = ledger
        .services
        .allocation
        .preview_mass_distribution(&request, COUNCIL_MEMBER)
        .unwrap();
    let grants: Vec<(&str, i64)> = selected
        .plan
        .grants
        .iter()
        .map(|g| (g.user_id.as_str(), g.granted))
        .collect();
    // Need outranks want
    assert_eq!(grants, vec![("cai", 4), ("ben", 4)]);
    assert_ne!(selected.preview_token, pool_cap.preview_token);
}

#[test]
fn test_mass_distribution_with_no_demand_is_rejected() {
    let ledger = ledger();
    let pool = rice_pool(&ledger, None);
    fund(&ledger, &pool, "dee", 5);

    let request = mass(&pool.id, MassStrategy::Equal);
    let preview = ledger
        .services
        .allocation
        .preview_mass_distribution(&request, COUNCIL_MEMBER)
        .unwrap();
    assert!(preview.plan.grants.is_empty());
    assert_eq!(preview.plan.remainder, 5);

    let err = ledger
        .services
        .allocation
        .distribute_mass(&request, &preview.preview_token, COUNCIL_MEMBER)
        .unwrap_err();
    assert!(matches!(err, LedgerError::InvalidInput(_)));
    assert_eq!(available(&ledger, &pool.id), 5);
}

#[test]
fn test_oversized_need_rows_do_not_break_planning() {
    let ledger = ledger();
    let pool = rice_pool(&ledger, None);
    fund(&ledger, &pool, "dee", 10);
    ledger
        .db
        .with_conn(|conn| {
            for (id, user, quantity) in [("n1", "ana", i64::MAX), ("n2", "ana", 1), ("n3", "ben", 3)] {
                conn.execute(
                    "INSERT INTO needs (id, community_id, user_id, item_id, priority, quantity_desired, recurrence, status, created_at)
                     VALUES (?1, ?2, ?3, 'rice', 'need', ?4, 'one_time', 'active', ?5)",
                    rusqlite::params![id, COMMUNITY, user, quantity, format!("2026-01-01T00:00:0{}.000Z", &id[1..])],
                )?;
            }
            Ok(())
        })
        .unwrap();

    let request = mass(&pool.id, MassStrategy::Equal);
    let preview = ledger
        .services
        .allocation
        .preview_mass_distribution(&request, COUNCIL_MEMBER)
        .unwrap();
    assert_eq!(preview.plan.total_desired, i64::MAX);
    assert_eq!(preview.plan.total_granted, 10);

    // The ledger stays usable afterwards
    let summary = ledger.services.needs.aggregate_community(COMMUNITY).unwrap();
    assert_eq!(summary[0].total_desired, i64::MAX);
    ledger
        .services
        .allocation
        .distribute_mass(&request, &preview.preview_token, COUNCIL_MEMBER)
        .unwrap();
    assert_eq!(available(&ledger, &pool.id), 0);
    assert_ledger_consistent(&ledger, &pool.id);
}

#[test]
fn test_unit_counts_above_bound_are_rejected() {
    let ledger = ledger();
    let pool = rice_pool(&ledger, None);
    fund(&ledger, &pool, "dee", 5);

    let err = ledger
        .services
        .wealth
        .create_wealth("ana", share("rice", MAX_UNITS + 1, SharingTarget::Pool))
        .unwrap_err();
    assert!(matches!(err, LedgerError::InvalidInput(_)));

    let err = ledger
        .services
        .allocation
        .distribute_manually(&pool.id, "rice", "ben", i64::MAX, COUNCIL_MEMBER)
        .unwrap_err();
    assert!(matches!(err, LedgerError::InvalidInput(_)));

    let mut request = mass(&pool.id, MassStrategy::Equal);
    request.max_units_per_user = Some(i64::MAX);
    let err = ledger
        .services
        .allocation
        .preview_mass_distribution(&request, COUNCIL_MEMBER)
        .unwrap_err();
    assert!(matches!(err, LedgerError::InvalidInput(_)));
    assert_eq!(available(&ledger, &pool.id), 5);
}

// ============================================================================
// Pool management and consumption
// ============================================================================

#[test]
fn test_list_and_update_pools() {
    let ledger = ledger();
    let first = rice_pool(&ledger, None);
    let second = rice_pool(&ledger, Some(3));
    let pools = &ledger.services.pools;

    let listed = pools.list_pools(COMMUNITY, "ana").unwrap();
    assert_eq!(listed.len(), 2);
    assert!(listed.iter().any(|p| p.id == first.id));
    assert!(listed.iter().any(|p| p.id == second.id && p.per_user_cap == Some(3)));
    assert!(pools.list_pools("elsewhere", "ana").is_err());

    let updated = pools
        .update_pool(
            &second.id,
            UpdatePoolInput {
                name: Some("Grains".into()),
                per_user_cap: Some(None),
                minimum_contribution: Some(Some(2)),
                allowed_item_ids: Some(vec!["oats".into()]),
            },
            COUNCIL_MEMBER,
        )
        .unwrap();
    assert_eq!(updated.name, "Grains");
    assert_eq!(updated.per_user_cap, None);
    assert_eq!(updated.minimum_contribution, Some(2));
    assert!(updated.allows_item("oats"));
    assert!(updated.allows_item("rice"));

    // Untouched fields keep their values
    let renamed = pools
        .update_pool(&second.id, UpdatePoolInput { name: Some("Cereal".into()), ..Default::default() }, COUNCIL_MEMBER)
        .unwrap();
    assert_eq!(renamed.minimum_contribution, Some(2));
    assert_eq!(renamed.allowed_item_ids, vec!["oats".to_string()]);

    let err = pools
        .update_pool(&second.id, UpdatePoolInput { per_user_cap: Some(Some(0)), ..Default::default() }, COUNCIL_MEMBER)
        .unwrap_err();
    assert!(matches!(err, LedgerError::InvalidInput(_)));

    ledger.gate.revoke("dee", COMMUNITY, Action::ManagePool);
    let err = pools
        .update_pool(&second.id, UpdatePoolInput { name: Some("Mine".into()), ..Default::default() }, "dee")
        .unwrap_err();
    assert!(matches!(err, LedgerError::Forbidden(_)));
    assert_eq!(pools.get_pool(&second.id).unwrap().name, "Cereal");
}

fn consumption(units: i64) -> RecordConsumptionInput {
    RecordConsumptionInput {
        item_id: "rice".into(),
        units,
        description: "harvest supper".into(),
    }
}

#[test]
fn test_council_consumption_moves_through_ledger() {
    let ledger = ledger();
    let pool = rice_pool(&ledger, None);
    fund(&ledger, &pool, "dee", 10);
    let pools = &ledger.services.pools;
    let mut events = ledger.services.events.subscribe();

    let used = pools.record_consumption(&pool.id, consumption(3), COUNCIL_MEMBER).unwrap();
    assert_eq!(used.council_id, "food-council");
    assert_eq!(available(&ledger, &pool.id), 7);
    let row = &pools.get_inventory(&pool.id).unwrap()[0];
    assert_eq!(row.consumed, 3);
    assert!(matches!(events.try_recv().unwrap(), LedgerEvent::PoolConsumed { units: 3, .. }));

    // Consumption and grants draw on the same available units
    let err = pools.record_consumption(&pool.id, consumption(8), COUNCIL_MEMBER).unwrap_err();
    assert!(matches!(err, LedgerError::InsufficientInventory { requested: 8, available: 7 }));
    let err = ledger
        .services
        .allocation
        .distribute_manually(&pool.id, "rice", "ben", 8, COUNCIL_MEMBER)
        .unwrap_err();
    assert!(matches!(err, LedgerError::InsufficientInventory { requested: 8, available: 7 }));
    assert_eq!(pools.list_consumptions(&pool.id, "ana").unwrap().len(), 1);

    let withdrawn = pools.withdraw_consumption(&pool.id, &used.id, COUNCIL_MEMBER).unwrap();
    assert_eq!(withdrawn.units, 3);
    assert_eq!(available(&ledger, &pool.id), 10);
    assert!(pools.list_consumptions(&pool.id, "ana").unwrap().is_empty());
    let err = pools.withdraw_consumption(&pool.id, &used.id, COUNCIL_MEMBER).unwrap_err();
    assert!(matches!(err, LedgerError::NotFound(_)));
    assert_ledger_consistent(&ledger, &pool.id);
}

#[test]
fn test_consumption_rules() {
    let ledger = ledger();
    let pool = rice_pool(&ledger, None);
    let other = rice_pool(&ledger, None);
    fund(&ledger, &pool, "dee", 5);
    let pools = &ledger.services.pools;

    let mut short = consumption(1);
    short.description = "ok".into();
    assert!(matches!(
        pools.record_consumption(&pool.id, short, COUNCIL_MEMBER).unwrap_err(),
        LedgerError::InvalidInput(_)
    ));
    assert!(matches!(
        pools.record_consumption(&pool.id, consumption(0), COUNCIL_MEMBER).unwrap_err(),
        LedgerError::InvalidInput(_)
    ));
    let mut salt = consumption(1);
    salt.item_id = "salt".into();
    assert!(matches!(
        pools.record_consumption(&pool.id, salt, COUNCIL_MEMBER).unwrap_err(),
        LedgerError::InvalidInput(_)
    ));

    ledger.gate.revoke("dee", COMMUNITY, Action::ManagePool);
    assert!(matches!(
        pools.record_consumption(&pool.id, consumption(1), "dee").unwrap_err(),
        LedgerError::Forbidden(_)
    ));

    let used = pools.record_consumption(&pool.id, consumption(2), COUNCIL_MEMBER).unwrap();
    let err = pools.withdraw_consumption(&other.id, &used.id, COUNCIL_MEMBER).unwrap_err();
    assert!(matches!(err, LedgerError::NotFound(_)));
    assert_eq!(available(&ledger, &pool.id), 3);
}

#[test]
fn test_pool_needs_report_available_units() {
    let ledger = ledger();
    let pool = rice_pool(&ledger, None);
    fund(&ledger, &pool, "dee", 6);
    declare(&ledger, "ana", "rice", NeedPriority::Need, 2);
    declare(&ledger, "ben", "salt", NeedPriority::Need, 9);

    let report = ledger.services.needs.pool_needs(&pool.id).unwrap();
    assert_eq!(report.items.len(), 1);
    assert_eq!(report.items[0].available, 6);
    assert_eq!(report.items[0].summary.item_id, "rice");
    assert_eq!(report.items[0].summary.total_desired, 2);
}
