//! Allocation planning - pure functions, no I/O
//!
//! `plan` turns an available unit count and a set of recipients into per-user
//! grants. It is deterministic: the same inputs always produce the same grants
//! in the same order, which is what lets a preview be re-run and compared at
//! commit time.
//!
//! ## Ordering
//!
//! Recipients are ranked by need priority (descending), then by when the need
//! was declared (ascending), then by user id (ascending) as a total tie-break.
//!
//! ## Strategies
//!
//! | Strategy | Behavior |
//! |----------|----------|
//! | `full` | Grant whole desired amounts in order; stop at the first recipient that no longer fits |
//! | `partial` | Like `full`, but the recipient at the exhaustion boundary gets what is left |
//! | `equal` | `floor(available / eligible)` each, capped by desire; leftovers re-shared in rounds, then one unit at a time in order |

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::db::models::{DistributionStrategy, NeedPriority};
use crate::error::LedgerError;

/// Strategy for needs-based mass distribution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MassStrategy {
    Full,
    Partial,
    Equal,
}

impl MassStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            MassStrategy::Full => "full",
            MassStrategy::Partial => "partial",
            MassStrategy::Equal => "equal",
        }
    }
}

impl From<MassStrategy> for DistributionStrategy {
    fn from(strategy: MassStrategy) -> Self {
        match strategy {
            MassStrategy::Full => DistributionStrategy::Full,
            MassStrategy::Partial => DistributionStrategy::Partial,
            MassStrategy::Equal => DistributionStrategy::Equal,
        }
    }
}

impl fmt::Display for MassStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MassStrategy {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "full" => Ok(MassStrategy::Full),
            "partial" => Ok(MassStrategy::Partial),
            "equal" => Ok(MassStrategy::Equal),
            other => Err(LedgerError::InvalidInput(format!("unknown strategy: {}", other))),
        }
    }
}

/// A candidate recipient and how much they want
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub user_id: String,
    pub priority: NeedPriority,
    /// Earliest declaration time among the user's needs (ISO 8601, sortable)
    pub created_at: String,
    pub desired: i64,
}

/// One user's proposed grant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposedGrant {
    pub user_id: String,
    pub priority: NeedPriority,
    /// Desired quantity as declared
    pub desired: i64,
    /// Desired quantity after the per-user cap
    pub eligible: i64,
    pub granted: i64,
}

/// Outcome of a dry run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationPlan {
    pub strategy: MassStrategy,
    pub available: i64,
    pub grants: Vec<ProposedGrant>,
    pub total_desired: i64,
    pub total_granted: i64,
    /// Eligible demand left unserved
    pub unmet: i64,
    /// Units left in the pool after the plan
    pub remainder: i64,
}

/// Priority desc, created_at asc, user id asc
pub fn rank(a: &Recipient, b: &Recipient) -> Ordering {
    b.priority
        .cmp(&a.priority)
        .then_with(|| a.created_at.cmp(&b.created_at))
        .then_with(|| a.user_id.cmp(&b.user_id))
}

/// Compute grants for `recipients` out of `available` units.
///
/// Recipients whose capped desire is not positive are dropped before any
/// counting, so they neither receive units nor dilute an equal share.
pub fn plan(
    available: i64,
    mut recipients: Vec<Recipient>,
    strategy: MassStrategy,
    per_user_cap: Option<i64>,
) -> AllocationPlan {
    let available = available.max(0);
    recipients.sort_by(rank);

    let mut grants: Vec<ProposedGrant> = recipients
        .into_iter()
        .filter_map(|r| {
            let eligible = match per_user_cap {
                Some(cap) => r.desired.min(cap),
                None => r.desired,
            };
            (eligible > 0).then(|| ProposedGrant {
                user_id: r.user_id,
                priority: r.priority,
                desired: r.desired,
                eligible,
                granted: 0,
            })
        })
        .collect();

    match strategy {
        MassStrategy::Full => grant_in_order(&mut grants, available, false),
        MassStrategy::Partial => grant_in_order(&mut grants, available, true),
        MassStrategy::Equal => grant_equally(&mut grants, available),
    }

    // Desire is unbounded input; grants never exceed `available`.
    let total_desired = saturating_sum(grants.iter().map(|g| g.eligible));
    let total_granted: i64 = grants.iter().map(|g| g.granted).sum();

    AllocationPlan {
        strategy,
        available,
        unmet: saturating_sum(grants.iter().map(|g| g.eligible - g.granted)),
        remainder: available - total_granted,
        total_desired,
        total_granted,
        grants,
    }
}

fn saturating_sum(values: impl Iterator<Item = i64>) -> i64 {
    values.fold(0i64, i64::saturating_add)
}

fn grant_in_order(grants: &mut [ProposedGrant], available: i64, allow_partial: bool) {
    let mut remaining = available;
    for grant in grants.iter_mut() {
        if remaining == 0 {
            break;
        }
        if grant.eligible <= remaining {
            grant.granted = grant.eligible;
            remaining -= grant.eligible;
        } else {
            if allow_partial {
                grant.granted = remaining;
            }
            // Lower-ranked recipients never jump ahead of an unsatisfied one.
            break;
        }
    }
}

fn grant_equally(grants: &mut [ProposedGrant], available: i64) {
    let mut remaining = available;

    loop {
        let under: Vec<usize> = grants
            .iter()
            .enumerate()
            .filter(|(_, g)| g.granted < g.eligible)
            .map(|(i, _)| i)
            .collect();

        if under.is_empty() || remaining == 0 {
            return;
        }

        let share = remaining / under.len() as i64;
        if share == 0 {
            // Fewer units than claimants: one each, in rank order.
            for i in under {
                if remaining == 0 {
                    break;
                }
                grants[i].granted += 1;
                remaining -= 1;
            }
            return;
        }

        for i in under {
            let give = share.min(grants[i].eligible - grants[i].granted);
            grants[i].granted += give;
            remaining -= give;
        }
    }
}

/// Inputs a preview token commits to
#[derive(Debug, Clone)]
pub struct PlanScope<'a> {
    pub pool_id: &'a str,
    pub item_id: &'a str,
    pub max_units_per_user: Option<i64>,
    pub selected_user_ids: Option<&'a [String]>,
}

/// Fingerprint of a plan and the scope it was computed for. Any change in
/// available units or in the resulting grants changes the token.
pub fn plan_token(scope: &PlanScope<'_>, plan: &AllocationPlan) -> String {
    let mut hasher = Sha256::new();
    hasher.update(scope.pool_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(scope.item_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(plan.strategy.as_str().as_bytes());
    hasher.update(scope.max_units_per_user.unwrap_or(-1).to_le_bytes());
    if let Some(selected) = scope.selected_user_ids {
        let mut selected: Vec<&String> = selected.iter().collect();
        selected.sort();
        for user in selected {
            hasher.update(user.as_bytes());
            hasher.update([0u8]);
        }
    }
    hasher.update([1u8]);
    hasher.update(plan.available.to_le_bytes());
    for grant in &plan.grants {
        hasher.update(grant.user_id.as_bytes());
        hasher.update([0u8]);
        hasher.update(grant.eligible.to_le_bytes());
        hasher.update(grant.granted.to_le_bytes());
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recipient(user: &str, priority: NeedPriority, created_at: &str, desired: i64) -> Recipient {
        Recipient {
            user_id: user.to_string(),
            priority,
            created_at: created_at.to_string(),
            desired,
        }
    }

    fn granted(plan: &AllocationPlan) -> Vec<(&str, i64)> {
        plan.grants.iter().map(|g| (g.user_id.as_str(), g.granted)).collect()
    }

    fn three() -> Vec<Recipient> {
        vec![
            recipient("a", NeedPriority::Need, "2026-01-01T00:00:00.000Z", 5),
            recipient("b", NeedPriority::Need, "2026-01-02T00:00:00.000Z", 3),
            recipient("c", NeedPriority::Need, "2026-01-03T00:00:00.000Z", 4),
        ]
    }

    #[test]
    fn test_huge_desires_saturate_totals() {
        let recipients = vec![
            recipient("a", NeedPriority::Need, "2026-01-01T00:00:00.000Z", i64::MAX),
            recipient("b", NeedPriority::Need, "2026-01-02T00:00:00.000Z", 3),
        ];
        for strategy in [MassStrategy::Full, MassStrategy::Partial, MassStrategy::Equal] {
            let plan = plan(10, recipients.clone(), strategy, None);
            assert_eq!(plan.total_desired, i64::MAX);
            assert!(plan.unmet > i64::MAX - 10);
            assert!(plan.total_granted <= 10);
        }
    }

    #[test]
    fn test_equal_redistributes_leftover_by_rank() {
        let plan = plan(10, three(), MassStrategy::Equal, None);
        assert_eq!(granted(&plan), vec![("a", 4), ("b", 3), ("c", 3)]);
        assert_eq!(plan.remainder, 0);
        assert_eq!(plan.unmet, 2);
    }

    #[test]
    fn test_equal_reshares_units_from_small_desires() {
        // b only wants 1, so the other two split what b leaves behind.
        let recipients = vec![
            recipient("a", NeedPriority::Need, "t1", 10),
            recipient("b", NeedPriority::Need, "t2", 1),
            recipient("c", NeedPriority::Need, "t3", 10),
        ];
        let plan = plan(9, recipients, MassStrategy::Equal, None);
        assert_eq!(granted(&plan), vec![("a", 4), ("b", 1), ("c", 4)]);
        assert_eq!(plan.remainder, 0);
    }

    #[test]
    fn test_equal_respects_cap() {
        let plan = plan(10, three(), MassStrategy::Equal, Some(2));
        assert_eq!(granted(&plan), vec![("a", 2), ("b", 2), ("c", 2)]);
        assert_eq!(plan.remainder, 4);
        assert_eq!(plan.unmet, 0);
    }

    #[test]
    fn test_equal_is_deterministic() {
        let mut shuffled = three();
        shuffled.reverse();
        let first = plan(10, three(), MassStrategy::Equal, None);
        let second = plan(10, shuffled, MassStrategy::Equal, None);
        assert_eq!(first, second);
    }

    #[test]
    fn test_full_stops_at_first_unsatisfiable() {
        let recipients = vec![
            recipient("a", NeedPriority::Need, "t1", 7),
            recipient("b", NeedPriority::Need, "t2", 6),
        ];
        let plan = plan(10, recipients, MassStrategy::Full, None);
        assert_eq!(granted(&plan), vec![("a", 7), ("b", 0)]);
        assert_eq!(plan.remainder, 3);
    }

    #[test]
    fn test_partial_grants_boundary_remainder() {
        let recipients = vec![
            recipient("a", NeedPriority::Need, "t1", 7),
            recipient("b", NeedPriority::Need, "t2", 6),
            recipient("c", NeedPriority::Need, "t3", 2),
        ];
        let plan = plan(10, recipients, MassStrategy::Partial, None);
        assert_eq!(granted(&plan), vec![("a", 7), ("b", 3), ("c", 0)]);
        assert_eq!(plan.remainder, 0);
    }

    #[test]
    fn test_priority_outranks_age() {
        let recipients = vec![
            recipient("early-want", NeedPriority::Want, "t1", 5),
            recipient("late-need", NeedPriority::Need, "t9", 5),
        ];
        let plan = plan(5, recipients, MassStrategy::Full, None);
        assert_eq!(granted(&plan), vec![("late-need", 5), ("early-want", 0)]);
    }

    #[test]
    fn test_user_id_breaks_full_ties() {
        let recipients = vec![
            recipient("zed", NeedPriority::Need, "t1", 4),
            recipient("amy", NeedPriority::Need, "t1", 4),
        ];
        let plan = plan(4, recipients, MassStrategy::Full, None);
        assert_eq!(granted(&plan), vec![("amy", 4), ("zed", 0)]);
    }

    #[test]
    fn test_non_positive_desires_are_excluded() {
        let mut recipients = three();
        recipients.push(recipient("d", NeedPriority::Need, "t0", 0));
        let plan = plan(10, recipients, MassStrategy::Equal, None);
        assert_eq!(plan.grants.len(), 3);
        assert_eq!(granted(&plan), vec![("a", 4), ("b", 3), ("c", 3)]);
    }

    #[test]
    fn test_empty_pool_grants_nothing() {
        for strategy in [MassStrategy::Full, MassStrategy::Partial, MassStrategy::Equal] {
            let plan = plan(0, three(), strategy, None);
            assert_eq!(plan.total_granted, 0);
            assert_eq!(plan.unmet, 12);
        }
    }

    #[test]
    fn test_token_changes_with_available() {
        let scope = PlanScope {
            pool_id: "p",
            item_id: "rice",
            max_units_per_user: None,
            selected_user_ids: None,
        };
        let a = plan_token(&scope, &plan(10, three(), MassStrategy::Equal, None));
        let b = plan_token(&scope, &plan(10, three(), MassStrategy::Equal, None));
        let c = plan_token(&scope, &plan(11, three(), MassStrategy::Equal, None));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
