//! Identity provider configuration.
//!
//! The dashboard authenticates against a Keycloak realm. All endpoints are
//! derived from the server URL and realm name, so no discovery round trip is
//! needed at startup.

use oauth2::url::Url;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::error::AuthError;
use crate::role::RoleClaim;

/// How strictly the callback `state` is bound to the session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateValidation {
    /// Refuse any callback whose state cannot be matched.
    #[default]
    Strict,
    /// Tolerate a session that lost its pending login during the redirect.
    /// A present-but-different state is still refused.
    Degraded,
}

/// Configuration for the Keycloak identity provider.
///
/// Fields with defaults can be omitted when loading from environment
/// variables. `Debug` output never includes the client secret.
#[derive(Clone, Serialize, Deserialize)]
pub struct OidcConfig {
    /// Base URL of the Keycloak server (e.g., "https://sso.example.com").
    server_url: String,
    /// Realm name.
    realm: String,
    /// The OAuth2 client ID registered in the realm.
    client_id: String,
    /// Client secret for confidential clients; public clients omit it.
    #[serde(default)]
    client_secret: Option<String>,
    /// Where the provider sends the browser after login.
    /// Default: "http://localhost:3000/"
    #[serde(default = "default_redirect_uri")]
    redirect_uri: String,
    /// OAuth2 scopes to request as a comma-separated string.
    /// Default: "openid,profile,email"
    #[serde(default = "default_scopes")]
    scopes: String,
    /// The role a user must hold to see the dashboard.
    /// Default: "gist-analyst"
    #[serde(default = "default_required_role")]
    required_role: String,
    /// Role claim strategies as a comma-separated string.
    /// Default: "realm,client,top_level"
    #[serde(default = "default_role_claims")]
    role_claims: String,
    #[serde(default)]
    state_validation: StateValidation,
    /// Retry a token exchange once without the verifier when the provider
    /// rejects PKCE specifically.
    #[serde(default = "default_pkce_fallback")]
    pkce_fallback: bool,
    /// Timeout for every call to the provider, in seconds.
    #[serde(default = "default_request_timeout_seconds")]
    request_timeout_seconds: u64,
}

fn default_redirect_uri() -> String {
    "http://localhost:3000/".to_string()
}

fn default_scopes() -> String {
    "openid,profile,email".to_string()
}

fn default_required_role() -> String {
    "gist-analyst".to_string()
}

fn default_role_claims() -> String {
    "realm,client,top_level".to_string()
}

fn default_pkce_fallback() -> bool {
    true
}

fn default_request_timeout_seconds() -> u64 {
    10
}

impl OidcConfig {
    /// Creates a new configuration with defaults for optional fields.
    #[must_use]
    pub fn new(server_url: String, realm: String, client_id: String) -> Self {
        OidcConfigBuilder::new(server_url, realm, client_id).build()
    }

    /// Creates a configuration builder for more customization.
    #[must_use]
    pub fn builder(server_url: String, realm: String, client_id: String) -> OidcConfigBuilder {
        OidcConfigBuilder::new(server_url, realm, client_id)
    }

    /// Checks every setting that would otherwise fail at login time.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Configuration`] naming the first invalid setting.
    pub fn validate(&self) -> Result<(), AuthError> {
        let invalid = |details: String| Err(AuthError::Configuration { details });

        if self.server_url.trim().is_empty() {
            return invalid("server_url is required".to_string());
        }
        if self.realm.trim().is_empty() {
            return invalid("realm is required".to_string());
        }
        if self.client_id.trim().is_empty() {
            return invalid("client_id is required".to_string());
        }
        if let Err(e) = Url::parse(self.server_url()) {
            return invalid(format!("server_url is not a valid URL: {e}"));
        }
        if let Err(e) = Url::parse(&self.redirect_uri) {
            return invalid(format!("redirect_uri is not a valid URL: {e}"));
        }
        if self.required_role.trim().is_empty() {
            return invalid("required_role must not be empty".to_string());
        }
        if self.scopes().is_empty() {
            return invalid("at least one scope is required".to_string());
        }
        match RoleClaim::parse_list(&self.role_claims, &self.client_id) {
            Ok(claims) if claims.is_empty() => {
                return invalid("at least one role claim strategy is required".to_string());
            }
            Ok(_) => {}
            Err(entry) => {
                return invalid(format!("unknown role claim strategy '{entry}'"));
            }
        }
        if self.request_timeout_seconds == 0 {
            return invalid("request_timeout_seconds must be positive".to_string());
        }
        Ok(())
    }

    /// Returns the server URL without a trailing slash.
    #[must_use]
    pub fn server_url(&self) -> &str {
        self.server_url.trim_end_matches('/')
    }

    /// Returns the realm name.
    #[must_use]
    pub fn realm(&self) -> &str {
        &self.realm
    }

    /// Returns the OAuth2 client ID.
    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Returns the client secret, if this is a confidential client.
    #[must_use]
    pub fn client_secret(&self) -> Option<&str> {
        self.client_secret.as_deref().filter(|s| !s.is_empty())
    }

    /// Returns the OAuth2 redirect URI.
    #[must_use]
    pub fn redirect_uri(&self) -> &str {
        &self.redirect_uri
    }

    /// Returns the OAuth2 scopes to request, parsed from comma-separated string.
    #[must_use]
    pub fn scopes(&self) -> Vec<&str> {
        self.scopes
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect()
    }

    /// Returns the role required for dashboard access.
    #[must_use]
    pub fn required_role(&self) -> &str {
        &self.required_role
    }

    /// Returns the configured role claim strategies.
    ///
    /// Unknown entries are skipped; [`validate`](Self::validate) reports them.
    #[must_use]
    pub fn role_claims(&self) -> Vec<RoleClaim> {
        self.role_claims
            .split(',')
            .filter_map(|entry| RoleClaim::parse(entry, &self.client_id))
            .collect()
    }

    /// Returns how strictly callback state is validated.
    #[must_use]
    pub fn state_validation(&self) -> StateValidation {
        self.state_validation
    }

    /// Returns true if a PKCE-specific rejection may be retried once.
    #[must_use]
    pub fn pkce_fallback(&self) -> bool {
        self.pkce_fallback
    }

    /// Returns the timeout for provider calls.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    /// Returns `{server}/realms/{realm}`, which is also the token issuer.
    #[must_use]
    pub fn realm_url(&self) -> String {
        format!("{}/realms/{}", self.server_url(), self.realm)
    }

    fn openid_endpoint(&self, name: &str) -> String {
        format!("{}/protocol/openid-connect/{name}", self.realm_url())
    }

    /// Browser redirect target for login.
    #[must_use]
    pub fn authorization_endpoint(&self) -> String {
        self.openid_endpoint("auth")
    }

    /// Server-to-server code exchange endpoint.
    #[must_use]
    pub fn token_endpoint(&self) -> String {
        self.openid_endpoint("token")
    }

    /// Bearer-authenticated identity endpoint.
    #[must_use]
    pub fn userinfo_endpoint(&self) -> String {
        self.openid_endpoint("userinfo")
    }

    /// Browser redirect target for logout.
    #[must_use]
    pub fn end_session_endpoint(&self) -> String {
        self.openid_endpoint("logout")
    }
}

impl fmt::Debug for OidcConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OidcConfig")
            .field("server_url", &self.server_url)
            .field("realm", &self.realm)
            .field("client_id", &self.client_id)
            .field(
                "client_secret",
                &self.client_secret.as_ref().map(|_| "<redacted>"),
            )
            .field("redirect_uri", &self.redirect_uri)
            .field("scopes", &self.scopes)
            .field("required_role", &self.required_role)
            .field("role_claims", &self.role_claims)
            .field("state_validation", &self.state_validation)
            .field("pkce_fallback", &self.pkce_fallback)
            .field("request_timeout_seconds", &self.request_timeout_seconds)
            .finish()
    }
}

/// Builder for `OidcConfig`.
#[derive(Debug)]
pub struct OidcConfigBuilder {
    server_url: String,
    realm: String,
    client_id: String,
    client_secret: Option<String>,
    redirect_uri: String,
    scopes: Vec<String>,
    required_role: String,
    role_claims: Vec<RoleClaim>,
    state_validation: StateValidation,
    pkce_fallback: bool,
    request_timeout_seconds: u64,
}

impl OidcConfigBuilder {
    /// Creates a new builder with required fields.
    #[must_use]
    pub fn new(server_url: String, realm: String, client_id: String) -> Self {
        let role_claims = RoleClaim::defaults(&client_id);
        Self {
            server_url,
            realm,
            client_id,
            client_secret: None,
            redirect_uri: default_redirect_uri(),
            scopes: default_scopes().split(',').map(str::to_string).collect(),
            required_role: default_required_role(),
            role_claims,
            state_validation: StateValidation::default(),
            pkce_fallback: default_pkce_fallback(),
            request_timeout_seconds: default_request_timeout_seconds(),
        }
    }

    /// Sets the client secret for a confidential client.
    #[must_use]
    pub fn client_secret(mut self, secret: String) -> Self {
        self.client_secret = Some(secret);
        self
    }

    /// Sets the redirect URI.
    #[must_use]
    pub fn redirect_uri(mut self, redirect_uri: String) -> Self {
        self.redirect_uri = redirect_uri;
        self
    }

    /// Adds a scope to the list of scopes to request.
    #[must_use]
    pub fn add_scope(mut self, scope: String) -> Self {
        if !self.scopes.contains(&scope) {
            self.scopes.push(scope);
        }
        self
    }

    /// Sets the role required for access.
    #[must_use]
    pub fn required_role(mut self, role: String) -> Self {
        self.required_role = role;
        self
    }

    /// Replaces the role claim strategies.
    #[must_use]
    pub fn role_claims(mut self, claims: Vec<RoleClaim>) -> Self {
        self.role_claims = claims;
        self
    }

    /// Sets the state validation mode.
    #[must_use]
    pub fn state_validation(mut self, mode: StateValidation) -> Self {
        self.state_validation = mode;
        self
    }

    /// Enables or disables the single PKCE fallback retry.
    #[must_use]
    pub fn pkce_fallback(mut self, enabled: bool) -> Self {
        self.pkce_fallback = enabled;
        self
    }

    /// Sets the provider request timeout.
    #[must_use]
    pub fn request_timeout_seconds(mut self, seconds: u64) -> Self {
        self.request_timeout_seconds = seconds;
        self
    }

    /// Builds the `OidcConfig`.
    #[must_use]
    pub fn build(self) -> OidcConfig {
        let role_claims: Vec<String> = self.role_claims.iter().map(RoleClaim::config_key).collect();
        OidcConfig {
            server_url: self.server_url,
            realm: self.realm,
            client_id: self.client_id,
            client_secret: self.client_secret,
            redirect_uri: self.redirect_uri,
            scopes: self.scopes.join(","),
            required_role: self.required_role,
            role_claims: role_claims.join(","),
            state_validation: self.state_validation,
            pkce_fallback: self.pkce_fallback,
            request_timeout_seconds: self.request_timeout_seconds,
        }
    }
}
