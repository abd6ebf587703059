//! Trust gate - the authorization oracle consulted before every mutation
//!
//! Trust scores, membership and council roles are computed elsewhere. The
//! ledger only ever asks a yes/no question through [`TrustGate`] and treats a
//! "no" as a terminal `Forbidden`.

use std::fmt;

use dashmap::DashSet;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::GrantConfig;
use crate::error::LedgerError;

/// Actions the ledger asks the oracle about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    CreateWealth,
    RequestWealth,
    ManageWealth,
    ContributeToPool,
    ManagePool,
    ResolveContribution,
    DistributeFromPool,
    PreviewDistribution,
    ViewPool,
    DeclareNeed,
}

impl Action {
    pub const ALL: [Action; 10] = [
        Action::CreateWealth,
        Action::RequestWealth,
        Action::ManageWealth,
        Action::ContributeToPool,
        Action::ManagePool,
        Action::ResolveContribution,
        Action::DistributeFromPool,
        Action::PreviewDistribution,
        Action::ViewPool,
        Action::DeclareNeed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::CreateWealth => "create_wealth",
            Action::RequestWealth => "request_wealth",
            Action::ManageWealth => "manage_wealth",
            Action::ContributeToPool => "contribute_to_pool",
            Action::ManagePool => "manage_pool",
            Action::ResolveContribution => "resolve_contribution",
            Action::DistributeFromPool => "distribute_from_pool",
            Action::PreviewDistribution => "preview_distribution",
            Action::ViewPool => "view_pool",
            Action::DeclareNeed => "declare_need",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resource identifiers handed to the oracle alongside the action
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthContext {
    pub wealth_id: Option<String>,
    pub request_id: Option<String>,
    pub pool_id: Option<String>,
    pub council_id: Option<String>,
    pub item_id: Option<String>,
}

impl AuthContext {
    pub fn wealth(wealth_id: &str) -> Self {
        Self {
            wealth_id: Some(wealth_id.to_string()),
            ..Default::default()
        }
    }

    pub fn request(wealth_id: &str, request_id: &str) -> Self {
        Self {
            wealth_id: Some(wealth_id.to_string()),
            request_id: Some(request_id.to_string()),
            ..Default::default()
        }
    }

    pub fn pool(pool_id: &str, council_id: &str) -> Self {
        Self {
            pool_id: Some(pool_id.to_string()),
            council_id: Some(council_id.to_string()),
            ..Default::default()
        }
    }

    pub fn with_item(mut self, item_id: &str) -> Self {
        self.item_id = Some(item_id.to_string());
        self
    }
}

/// External authorization oracle
pub trait TrustGate: Send + Sync {
    fn is_authorized(
        &self,
        user_id: &str,
        community_id: &str,
        action: Action,
        context: &AuthContext,
    ) -> bool;
}

/// Ask the gate and turn a denial into `Forbidden`. Denials are never retried.
pub fn ensure_authorized(
    gate: &dyn TrustGate,
    user_id: &str,
    community_id: &str,
    action: Action,
    context: &AuthContext,
) -> Result<(), LedgerError> {
    if gate.is_authorized(user_id, community_id, action, context) {
        return Ok(());
    }
    debug!(user = %user_id, community = %community_id, action = %action, "Trust gate denied");
    Err(LedgerError::Forbidden(format!(
        "{} may not {} in community {}",
        user_id, action, community_id
    )))
}

/// Grant-table oracle: a user is authorized for exactly the (community, action)
/// pairs granted to them.
#[derive(Debug, Default)]
pub struct StaticTrustGate {
    grants: DashSet<(String, String, Action)>,
}

impl StaticTrustGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from config grants; a grant with no actions covers all of them.
    pub fn from_grants(grants: &[GrantConfig]) -> Self {
        let gate = Self::new();
        for grant in grants {
            if grant.actions.is_empty() {
                gate.grant_all(&grant.user_id, &grant.community_id);
            } else {
                for action in &grant.actions {
                    gate.grant(&grant.user_id, &grant.community_id, *action);
                }
            }
        }
        gate
    }

    pub fn grant(&self, user_id: &str, community_id: &str, action: Action) {
        self.grants
            .insert((user_id.to_string(), community_id.to_string(), action));
    }

    pub fn grant_all(&self, user_id: &str, community_id: &str) {
        for action in Action::ALL {
            self.grant(user_id, community_id, action);
        }
    }

    pub fn revoke(&self, user_id: &str, community_id: &str, action: Action) {
        self.grants
            .remove(&(user_id.to_string(), community_id.to_string(), action));
    }
}

impl TrustGate for StaticTrustGate {
    fn is_authorized(
        &self,
        user_id: &str,
        community_id: &str,
        action: Action,
        _context: &AuthContext,
    ) -> bool {
        self.grants
            .contains(&(user_id.to_string(), community_id.to_string(), action))
    }
}
