use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

/// Generate a unique wallet address for a new account
/// Format: OB_[32 hex characters]
pub fn generate_wallet_address(seed: &str) -> String {
    let mut hasher = Sha256::new();

    // Combine seed and timestamp for uniqueness
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);

    hasher.update(format!("{}{}", seed, timestamp).as_bytes());
    let result = hasher.finalize();
    let hex_hash = format!("{:x}", result);

    format!("OB_{}", hex_hash[..32].to_uppercase())
}

/// Capabilities consumed at the engine boundary. Claiming a payout needs no
/// role at all, only ticket ownership.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// May grant and revoke roles
    Admin,
    /// May create markets
    MarketMaker,
    /// May report winning outcomes (initiate settlement)
    OutcomeReporter,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::MarketMaker => "market_maker",
            Role::OutcomeReporter => "outcome_reporter",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Authorization errors (role administration)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    NotAdmin(String),
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthError::NotAdmin(account) => write!(f, "Account {} lacks the admin role", account),
        }
    }
}

impl std::error::Error for AuthError {}

/// Capability queries the engine makes before touching any state. The engine
/// has no knowledge of how roles are granted or stored.
pub trait RoleAuthority: Send {
    fn has_role(&self, account: &str, role: Role) -> bool;
}

/// In-memory role store. The bootstrap admin receives all three roles so a
/// fresh deployment can create and settle markets immediately.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoleRegistry {
    roles: HashMap<String, HashSet<Role>>,
}

impl RoleRegistry {
    pub fn new(admin: &str) -> Self {
        let mut roles = HashMap::new();
        let mut granted = HashSet::new();
        granted.insert(Role::Admin);
        granted.insert(Role::MarketMaker);
        granted.insert(Role::OutcomeReporter);
        roles.insert(admin.to_string(), granted);
        Self { roles }
    }

    pub fn has_role(&self, account: &str, role: Role) -> bool {
        self.roles
            .get(account)
            .map(|set| set.contains(&role))
            .unwrap_or(false)
    }

    /// Grant a role. Only admins may grant.
    pub fn grant_role(&mut self, caller: &str, account: &str, role: Role) -> Result<(), AuthError> {
        if !self.has_role(caller, Role::Admin) {
            return Err(AuthError::NotAdmin(caller.to_string()));
        }
        self.roles
            .entry(account.to_string())
            .or_insert_with(HashSet::new)
            .insert(role);
        Ok(())
    }

    /// Revoke a role. Only admins may revoke.
    pub fn revoke_role(&mut self, caller: &str, account: &str, role: Role) -> Result<(), AuthError> {
        if !self.has_role(caller, Role::Admin) {
            return Err(AuthError::NotAdmin(caller.to_string()));
        }
        if let Some(set) = self.roles.get_mut(account) {
            set.remove(&role);
        }
        Ok(())
    }

    pub fn roles_of(&self, account: &str) -> Vec<Role> {
        let mut list: Vec<Role> = self
            .roles
            .get(account)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        list.sort_by_key(|r| r.as_str());
        list
    }
}

impl RoleAuthority for RoleRegistry {
    fn has_role(&self, account: &str, role: Role) -> bool {
        RoleRegistry::has_role(self, account, role)
    }
}

/// Shared handle so the service can administer roles while the engine keeps
/// an injected read-only view.
pub type SharedRoles = Arc<Mutex<RoleRegistry>>;

impl RoleAuthority for SharedRoles {
    fn has_role(&self, account: &str, role: Role) -> bool {
        self.lock().unwrap().has_role(account, role)
    }
}
