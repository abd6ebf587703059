//! Row models and status enums for the ledger tables
//!
//! Statuses are stored as TEXT; each enum round-trips through `as_str` /
//! `parse` so an unknown value in the database surfaces as an error instead of
//! being silently mapped.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Months, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};

use crate::error::LedgerError;

// ============================================================================
// Timestamp Helpers (SQLite stores timestamps as TEXT)
// ============================================================================

/// Current UTC timestamp, millisecond precision so ordering by created_at is
/// stable for rows written in quick succession.
pub fn current_timestamp() -> String {
    format_timestamp(Utc::now())
}

pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

// ============================================================================
// Status Enums
// ============================================================================

macro_rules! text_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = LedgerError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(LedgerError::InvalidInput(format!(
                        "invalid {}: {}",
                        stringify!($name),
                        other
                    ))),
                }
            }
        }

        impl ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.as_str()))
            }
        }

        impl FromSql for $name {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                let text = value.as_str()?;
                text.parse()
                    .map_err(|e: LedgerError| FromSqlError::Other(Box::new(e)))
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WealthStatus {
    Open,
    PartiallyAllocated,
    Fulfilled,
    Cancelled,
}

text_enum!(WealthStatus {
    Open => "open",
    PartiallyAllocated => "partially_allocated",
    Fulfilled => "fulfilled",
    Cancelled => "cancelled",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SharingTarget {
    Direct,
    Pool,
}

text_enum!(SharingTarget {
    Direct => "direct",
    Pool => "pool",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Accepted,
    Rejected,
    Cancelled,
    Confirmed,
    Failed,
}

text_enum!(RequestStatus {
    Pending => "pending",
    Accepted => "accepted",
    Rejected => "rejected",
    Cancelled => "cancelled",
    Confirmed => "confirmed",
    Failed => "failed",
});

impl RequestStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RequestStatus::Pending | RequestStatus::Accepted)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContributionStatus {
    Pending,
    Confirmed,
    Rejected,
}

text_enum!(ContributionStatus {
    Pending => "pending",
    Confirmed => "confirmed",
    Rejected => "rejected",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistributionStrategy {
    Manual,
    Full,
    Partial,
    Equal,
}

text_enum!(DistributionStrategy {
    Manual => "manual",
    Full => "full",
    Partial => "partial",
    Equal => "equal",
});

/// Lifecycle of a pool grant, following its wealth request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistributionStatus {
    /// Handed out, recipient has not confirmed yet
    Active,
    Confirmed,
    /// Cancelled or failed; units went back to the pool
    Restored,
}

text_enum!(DistributionStatus {
    Active => "active",
    Confirmed => "confirmed",
    Restored => "restored",
});

/// Need priority; `Need` outranks `Want`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NeedPriority {
    Want,
    Need,
}

text_enum!(NeedPriority {
    Want => "want",
    Need => "need",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recurrence {
    OneTime,
    Daily,
    Weekly,
    Monthly,
}

text_enum!(Recurrence {
    OneTime => "one_time",
    Daily => "daily",
    Weekly => "weekly",
    Monthly => "monthly",
});

impl Recurrence {
    /// When a need with this recurrence comes due again after `from`.
    /// `None` for one-time needs.
    pub fn next_after(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Recurrence::OneTime => None,
            Recurrence::Daily => from.checked_add_signed(Duration::days(1)),
            Recurrence::Weekly => from.checked_add_signed(Duration::weeks(1)),
            Recurrence::Monthly => from.checked_add_months(Months::new(1)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NeedStatus {
    Active,
    Fulfilled,
    Cancelled,
}

text_enum!(NeedStatus {
    Active => "active",
    Fulfilled => "fulfilled",
    Cancelled => "cancelled",
});

// ============================================================================
// Wealth Models
// ============================================================================

/// Upper bound on any single unit count a caller supplies (a share, a
/// contribution, a grant, a need). Keeps every ledger sum far from `i64::MAX`.
pub const MAX_UNITS: i64 = 1_000_000_000;

/// Check a caller-supplied unit count lies in `1..=MAX_UNITS`.
pub fn validate_units(field: &str, units: i64) -> Result<(), LedgerError> {
    if units < 1 {
        return Err(LedgerError::InvalidInput(format!("{} must be a positive integer", field)));
    }
    if units > MAX_UNITS {
        return Err(LedgerError::InvalidInput(format!(
            "{} must not exceed {}",
            field, MAX_UNITS
        )));
    }
    Ok(())
}

/// Who holds a wealth share: a member, or a pool handing out granted units
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum WealthOwner {
    User(String),
    Pool(String),
}

impl WealthOwner {
    pub fn is_user(&self, user_id: &str) -> bool {
        matches!(self, WealthOwner::User(id) if id == user_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wealth {
    pub id: String,
    pub community_id: String,
    pub owner: WealthOwner,
    pub item_id: String,
    pub title: String,
    pub total_units: i64,
    pub reserved_units: i64,
    pub consumed_units: i64,
    pub status: WealthStatus,
    pub sharing_target: SharingTarget,
    pub created_at: String,
    pub updated_at: String,
}

impl Wealth {
    pub fn remaining_units(&self) -> i64 {
        self.total_units - self.reserved_units - self.consumed_units
    }

    pub fn source_pool_id(&self) -> Option<&str> {
        match &self.owner {
            WealthOwner::Pool(id) => Some(id),
            WealthOwner::User(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WealthRequest {
    pub id: String,
    pub wealth_id: String,
    pub requester_id: String,
    pub units_requested: i64,
    pub status: RequestStatus,
    pub version: i64,
    pub message: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

// ============================================================================
// Pool Models
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pool {
    pub id: String,
    pub community_id: String,
    pub council_id: String,
    pub item_id: String,
    pub name: String,
    pub per_user_cap: Option<i64>,
    pub minimum_contribution: Option<i64>,
    pub allowed_item_ids: Vec<String>,
    pub created_by: String,
    pub created_at: String,
}

impl Pool {
    pub fn allows_item(&self, item_id: &str) -> bool {
        self.item_id == item_id || self.allowed_item_ids.iter().any(|i| i == item_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolContribution {
    pub id: String,
    pub pool_id: String,
    pub wealth_id: String,
    pub contributor_id: String,
    pub item_id: String,
    pub units_offered: i64,
    pub status: ContributionStatus,
    pub resolved_by: Option<String>,
    pub created_at: String,
    pub resolved_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolDistribution {
    pub id: String,
    pub pool_id: String,
    pub item_id: String,
    pub recipient_user_id: String,
    pub units_granted: i64,
    pub strategy: DistributionStrategy,
    pub wealth_id: String,
    pub request_id: String,
    pub distributed_by: String,
    pub status: DistributionStatus,
    pub created_at: String,
}

/// Units a council used up from its pool (e.g. cooked for a community meal)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConsumption {
    pub id: String,
    pub pool_id: String,
    pub council_id: String,
    pub item_id: String,
    pub units: i64,
    pub description: String,
    pub consumed_by: String,
    pub created_at: String,
}

/// Ledger counters for one (pool, item)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct InventoryCounts {
    pub confirmed_units: i64,
    pub reserved_units: i64,
    pub distributed_units: i64,
    pub consumed_units: i64,
}

impl InventoryCounts {
    pub fn available(&self) -> i64 {
        self.confirmed_units - self.reserved_units - self.distributed_units - self.consumed_units
    }
}

/// Inventory row as reported to callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventorySnapshot {
    pub pool_id: String,
    pub item_id: String,
    pub available: i64,
    pub confirmed: i64,
    pub reserved: i64,
    pub distributed: i64,
    pub consumed: i64,
}

// ============================================================================
// Need Models
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Need {
    pub id: String,
    pub community_id: String,
    pub user_id: String,
    pub item_id: String,
    pub priority: NeedPriority,
    pub quantity_desired: i64,
    pub recurrence: Recurrence,
    pub status: NeedStatus,
    pub last_fulfilled_at: Option<String>,
    pub next_fulfillment_at: Option<String>,
    pub created_at: String,
}
