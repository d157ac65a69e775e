//! Role extraction and the authorization decision.
//!
//! Keycloak places roles in different claims depending on realm and client
//! configuration. Each location is a [`RoleClaim`] strategy; the roles a user
//! holds are the union over every configured strategy.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;

use crate::token::Claims;

/// One place in a token's claims where roles may live.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RoleClaim {
    /// `realm_access.roles`
    RealmRoles,
    /// `resource_access.<client_id>.roles`
    ClientRoles(String),
    /// A flat top-level `roles` array.
    TopLevelRoles,
}

impl RoleClaim {
    /// The default strategies: realm, this client, and top-level.
    #[must_use]
    pub fn defaults(client_id: &str) -> Vec<Self> {
        vec![
            Self::RealmRoles,
            Self::ClientRoles(client_id.to_string()),
            Self::TopLevelRoles,
        ]
    }

    /// Parses one configuration entry.
    ///
    /// Accepts `realm`, `top_level`, `client` (meaning `own_client_id`), and
    /// `client:<id>` for another client's roles.
    #[must_use]
    pub fn parse(raw: &str, own_client_id: &str) -> Option<Self> {
        match raw.trim() {
            "realm" => Some(Self::RealmRoles),
            "top_level" | "roles" => Some(Self::TopLevelRoles),
            "client" => Some(Self::ClientRoles(own_client_id.to_string())),
            other => other
                .strip_prefix("client:")
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(|id| Self::ClientRoles(id.to_string())),
        }
    }

    /// Parses a comma-separated list of strategies.
    ///
    /// # Errors
    ///
    /// Returns the first entry that is not a known strategy.
    pub fn parse_list(raw: &str, own_client_id: &str) -> Result<Vec<Self>, String> {
        raw.split(',')
            .filter(|entry| !entry.trim().is_empty())
            .map(|entry| Self::parse(entry, own_client_id).ok_or_else(|| entry.trim().to_string()))
            .collect()
    }

    /// Returns the configuration form of this strategy.
    #[must_use]
    pub fn config_key(&self) -> String {
        match self {
            Self::RealmRoles => "realm".to_string(),
            Self::ClientRoles(client_id) => format!("client:{client_id}"),
            Self::TopLevelRoles => "top_level".to_string(),
        }
    }

    /// Returns the roles found at this strategy's location.
    #[must_use]
    pub fn extract(&self, claims: &Claims) -> BTreeSet<String> {
        let roles = match self {
            Self::RealmRoles => claims.get("realm_access").and_then(|v| v.get("roles")),
            Self::ClientRoles(client_id) => claims
                .get("resource_access")
                .and_then(|v| v.get(client_id))
                .and_then(|v| v.get("roles")),
            Self::TopLevelRoles => claims.get("roles"),
        };

        roles
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// A deduplicated set of role names.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoleSet {
    roles: BTreeSet<String>,
}

impl RoleSet {
    /// Creates an empty role set.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Unions the roles found by every strategy.
    #[must_use]
    pub fn from_claims(claims: &Claims, strategies: &[RoleClaim]) -> Self {
        let roles = strategies
            .iter()
            .flat_map(|strategy| strategy.extract(claims))
            .collect();
        Self { roles }
    }

    /// Adds every role from `other`.
    pub fn extend(&mut self, other: RoleSet) {
        self.roles.extend(other.roles);
    }

    /// Returns true if the set contains `role`.
    #[must_use]
    pub fn contains(&self, role: &str) -> bool {
        self.roles.contains(role)
    }

    /// Returns true if no roles were found.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
    }

    /// Returns the number of distinct roles.
    #[must_use]
    pub fn len(&self) -> usize {
        self.roles.len()
    }

    /// Iterates roles in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.roles.iter().map(String::as_str)
    }
}

impl<S: Into<String>> FromIterator<S> for RoleSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            roles: iter.into_iter().map(Into::into).collect(),
        }
    }
}

impl fmt::Display for RoleSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.roles.is_empty() {
            return f.write_str("(none)");
        }
        let joined: Vec<&str> = self.iter().collect();
        f.write_str(&joined.join(", "))
    }
}

/// The outcome of checking a role set against the required role.
///
/// Recomputed on every check and never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthorizationDecision {
    roles: RoleSet,
    required_role: String,
    granted: bool,
}

impl AuthorizationDecision {
    /// Grants access iff `roles` contains `required_role`.
    #[must_use]
    pub fn evaluate(roles: RoleSet, required_role: &str) -> Self {
        let granted = roles.contains(required_role);
        Self {
            roles,
            required_role: required_role.to_string(),
            granted,
        }
    }

    /// Returns a copy of this decision with access withheld.
    #[must_use]
    pub fn withheld(mut self) -> Self {
        self.granted = false;
        self
    }

    /// Returns the roles the user holds.
    #[must_use]
    pub fn roles(&self) -> &RoleSet {
        &self.roles
    }

    /// Returns the role that was required.
    #[must_use]
    pub fn required_role(&self) -> &str {
        &self.required_role
    }

    /// Returns true if access was granted.
    #[must_use]
    pub fn granted(&self) -> bool {
        self.granted
    }
}
