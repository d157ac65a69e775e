//! The OAuth2 authorization-code state machine for one session.
//!
//! `AuthSession` borrows the session for the duration of one request and
//! drives it through login redirect, code exchange, identity fetch, and
//! role check. Every network call goes through an [`IdentityProvider`].

use chrono::{DateTime, Utc};
use oauth2::basic::BasicClient;
use oauth2::url::Url;
use oauth2::{AuthUrl, ClientId, CsrfToken, PkceCodeChallenge, RedirectUrl, Scope};
use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};

use crate::error::{AuthError, StateMismatchKind};
use crate::identity::Identity;
use crate::oidc::{OidcConfig, StateValidation};
use crate::provider::{CodeExchange, IdentityProvider};
use crate::role::{AuthorizationDecision, RoleSet};
use crate::session::{CodeOutcome, PendingLogin, Session};
use crate::token::{self, TokenSet};

/// The identity and roles handed to protected handlers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthenticatedUser {
    identity: Identity,
    roles: RoleSet,
}

impl AuthenticatedUser {
    /// Creates an authenticated user context.
    #[must_use]
    pub fn new(identity: Identity, roles: RoleSet) -> Self {
        Self { identity, roles }
    }

    /// Returns the cached identity.
    #[must_use]
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Returns the roles extracted on this request.
    #[must_use]
    pub fn roles(&self) -> &RoleSet {
        &self.roles
    }
}

/// Drives one session through the login lifecycle.
pub struct AuthSession<'a, P: IdentityProvider + ?Sized> {
    config: &'a OidcConfig,
    provider: &'a P,
    session: &'a mut Session,
    now: DateTime<Utc>,
}

impl<'a, P: IdentityProvider + ?Sized> AuthSession<'a, P> {
    /// Wraps a session for one request.
    pub fn new(config: &'a OidcConfig, provider: &'a P, session: &'a mut Session) -> Self {
        Self {
            config,
            provider,
            session,
            now: Utc::now(),
        }
    }

    /// Uses `now` as the current time for timestamps and expiry.
    #[must_use]
    pub fn at(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }

    /// Returns the wrapped session.
    #[must_use]
    pub fn session(&self) -> &Session {
        &*self.session
    }

    /// Builds the provider authorization URL for a fresh login.
    ///
    /// Generates a random state and PKCE verifier and stores both in the
    /// session before returning, after clearing any partial state from an
    /// earlier attempt.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Configuration`] if the endpoint or redirect URI
    /// is not a valid URL.
    pub fn build_login_redirect(&mut self) -> Result<Url, AuthError> {
        let auth_url = AuthUrl::new(self.config.authorization_endpoint()).map_err(|e| {
            AuthError::Configuration {
                details: format!("invalid authorization endpoint: {e}"),
            }
        })?;
        let redirect_url =
            RedirectUrl::new(self.config.redirect_uri().to_string()).map_err(|e| {
                AuthError::Configuration {
                    details: format!("invalid redirect URI: {e}"),
                }
            })?;

        let client = BasicClient::new(ClientId::new(self.config.client_id().to_string()))
            .set_auth_uri(auth_url)
            .set_redirect_uri(redirect_url);

        let (pkce_challenge, pkce_verifier) = PkceCodeChallenge::new_random_sha256();

        let mut auth_request = client
            .authorize_url(CsrfToken::new_random)
            .set_pkce_challenge(pkce_challenge);
        for scope in self.config.scopes() {
            auth_request = auth_request.add_scope(Scope::new(scope.to_string()));
        }

        let (url, csrf_token) = auth_request.url();

        self.session.begin_login(PendingLogin::new(
            csrf_token.secret().clone(),
            pkce_verifier.secret().clone(),
            self.now,
        ));
        info!(session_id = %self.session.id(), "login redirect issued");

        Ok(url)
    }

    /// Exchanges a callback code for tokens.
    ///
    /// A code seen before returns its memoized outcome without another
    /// token request. A new code is recorded whatever the outcome, and a
    /// failure returns the session to `Unauthenticated`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::MissingCode`] for an empty code,
    /// [`AuthError::StateMismatch`] if the callback cannot be bound to this
    /// session's login, and the provider's classified error otherwise.
    #[instrument(skip_all, fields(session_id = %self.session.id()))]
    pub async fn exchange_code(
        &mut self,
        code: &str,
        returned_state: Option<&str>,
    ) -> Result<TokenSet, AuthError> {
        if code.trim().is_empty() {
            return Err(AuthError::MissingCode);
        }

        if let Some(outcome) = self.session.processed_outcome(code) {
            debug!("authorization code already processed, returning memoized outcome");
            return match outcome {
                CodeOutcome::Failed(err) => Err(err.clone()),
                CodeOutcome::Exchanged => self
                    .session
                    .tokens()
                    .cloned()
                    .ok_or(AuthError::CodeReplayed),
            };
        }

        let verifier = match self.bind_state(returned_state) {
            Ok(verifier) => verifier,
            Err(err) => {
                self.session.record_code(code, CodeOutcome::Failed(err.clone()));
                self.session.reset_credentials();
                return Err(err);
            }
        };

        self.session.accept_code();
        let request = CodeExchange::new(
            code.to_string(),
            self.config.redirect_uri().to_string(),
            verifier,
        );

        match self.request_tokens(&request).await {
            Ok(tokens) => {
                self.session.record_code(code, CodeOutcome::Exchanged);
                self.session.set_tokens(tokens.clone(), self.now);
                info!(
                    has_refresh_token = tokens.refresh_token().is_some(),
                    "authorization code exchanged"
                );
                Ok(tokens)
            }
            Err(err) => {
                if err.is_operator_facing() {
                    error!(error = %err, "token exchange rejected, check client configuration");
                } else {
                    warn!(error = %err, "token exchange failed");
                }
                self.session.record_code(code, CodeOutcome::Failed(err.clone()));
                self.session.reset_credentials();
                Err(err)
            }
        }
    }

    /// Consumes the pending login and checks the echoed state against it.
    ///
    /// Returns the PKCE verifier to send, if any.
    fn bind_state(&mut self, returned_state: Option<&str>) -> Result<Option<String>, AuthError> {
        match self.session.take_pending() {
            Some(pending) => {
                if returned_state == Some(pending.state()) {
                    Ok(Some(pending.verifier().to_string()))
                } else {
                    warn!(
                        state_present = returned_state.is_some(),
                        "callback state does not match pending login, refusing exchange"
                    );
                    Err(AuthError::StateMismatch {
                        kind: StateMismatchKind::Mismatched,
                    })
                }
            }
            None => match self.config.state_validation() {
                StateValidation::Strict => {
                    warn!("callback arrived with no pending login, refusing exchange");
                    Err(AuthError::StateMismatch {
                        kind: StateMismatchKind::Missing,
                    })
                }
                StateValidation::Degraded => {
                    warn!(
                        "SECURITY: no pending login for callback; exchanging without state \
                         or PKCE validation because state_validation=degraded"
                    );
                    Ok(None)
                }
            },
        }
    }

    /// Calls the token endpoint, retrying once without the verifier if the
    /// provider rejects PKCE itself.
    async fn request_tokens(&self, request: &CodeExchange) -> Result<TokenSet, AuthError> {
        match self.provider.exchange_code(request).await {
            Err(err)
                if err.is_pkce_rejection()
                    && request.verifier().is_some()
                    && self.config.pkce_fallback() =>
            {
                warn!(error = %err, "provider rejected PKCE, retrying once without verifier");
                self.provider
                    .exchange_code(&request.without_verifier())
                    .await
            }
            result => result,
        }
    }

    /// Fetches and caches the user's identity.
    ///
    /// Returns the cached identity without a network call if one is held.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::IdentityFetch`] if userinfo fails or its payload
    /// is unusable, or [`AuthError::Network`] for transport failures. The
    /// session's credentials are cleared on failure.
    #[instrument(skip_all, fields(session_id = %self.session.id()))]
    pub async fn fetch_identity(&mut self, access_token: &str) -> Result<Identity, AuthError> {
        if let Some(identity) = self.session.identity() {
            return Ok(identity.clone());
        }

        let result = match self.provider.fetch_userinfo(access_token).await {
            Ok(payload) => Identity::from_userinfo(payload),
            Err(err) => Err(err),
        };

        match result {
            Ok(identity) => {
                debug!(user = identity.label(), "identity fetched");
                self.session.set_identity(identity.clone());
                Ok(identity)
            }
            Err(err) => {
                warn!(error = %err, "identity fetch failed");
                self.session.reset_credentials();
                Err(err)
            }
        }
    }

    /// Returns the union of roles found in the token's claims and the
    /// cached userinfo claims.
    ///
    /// The token is decoded without verification. An undecodable token
    /// contributes no roles.
    #[must_use]
    pub fn extract_roles(&self, access_token: &str) -> RoleSet {
        let strategies = self.config.role_claims();

        let mut roles = match token::decode_claims(access_token) {
            Ok(claims) => RoleSet::from_claims(&claims, &strategies),
            Err(err) => {
                warn!(error = %err, "access token claims could not be decoded");
                RoleSet::none()
            }
        };
        if let Some(identity) = self.session.identity() {
            roles.extend(RoleSet::from_claims(identity.claims(), &strategies));
        }
        roles
    }

    /// Checks the user's roles against `required_role`.
    ///
    /// A grant marks the session authorized. A denial clears the session's
    /// token and identity so a retried login starts fresh.
    pub fn authorize(&mut self, access_token: &str, required_role: &str) -> AuthorizationDecision {
        let decision = AuthorizationDecision::evaluate(self.extract_roles(access_token), required_role);

        let decision = if decision.granted() {
            match self.session.mark_authorized() {
                Ok(()) => decision,
                Err(phase) => {
                    warn!(%phase, "role granted but session is incomplete, withholding access");
                    decision.withheld()
                }
            }
        } else {
            decision
        };

        if decision.granted() {
            info!(
                session_id = %self.session.id(),
                required_role,
                "access granted"
            );
        } else {
            info!(
                session_id = %self.session.id(),
                required_role,
                roles = %decision.roles(),
                "access denied"
            );
            self.session.deny();
        }
        decision
    }

    /// Builds the provider logout URL. Has no effect on the session.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Configuration`] if the endpoint is not a URL.
    pub fn build_logout_redirect(&self) -> Result<Url, AuthError> {
        build_logout_redirect(self.config)
    }
}

/// Builds the provider end-session URL, returning to the redirect URI.
///
/// # Errors
///
/// Returns [`AuthError::Configuration`] if the endpoint is not a URL.
pub fn build_logout_redirect(config: &OidcConfig) -> Result<Url, AuthError> {
    Url::parse_with_params(
        &config.end_session_endpoint(),
        &[
            ("client_id", config.client_id()),
            ("post_logout_redirect_uri", config.redirect_uri()),
        ],
    )
    .map_err(|e| AuthError::Configuration {
        details: format!("invalid end-session endpoint: {e}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NetworkErrorKind;
    use crate::testing::ScriptedProvider;
    use crate::token::unsigned_jwt;
    use gist_analytics_core::SessionId;
    use serde_json::json;
    use std::collections::HashMap;

    fn config() -> OidcConfig {
        OidcConfig::new(
            "https://sso.example.com".into(),
            "gist".into(),
            "gist-dashboard".into(),
        )
    }

    fn degraded_config() -> OidcConfig {
        OidcConfig::builder(
            "https://sso.example.com".into(),
            "gist".into(),
            "gist-dashboard".into(),
        )
        .state_validation(StateValidation::Degraded)
        .build()
    }

    fn session() -> Session {
        Session::new(SessionId::new(), Utc::now())
    }

    fn query(url: &Url) -> HashMap<String, String> {
        url.query_pairs().into_owned().collect()
    }

    fn tokens(access: &str) -> TokenSet {
        TokenSet::new(access.to_string(), None)
    }

    fn grant_error(description: &str) -> AuthError {
        AuthError::from_provider_error("invalid_grant", Some(description.into()))
    }

    /// Runs a login redirect and returns the state it stored.
    fn start_login(config: &OidcConfig, provider: &ScriptedProvider, session: &mut Session) -> String {
        let url = AuthSession::new(config, provider, session)
            .build_login_redirect()
            .expect("login url");
        query(&url)["state"].clone()
    }

    #[test]
    fn login_redirect_carries_pkce_and_state() {
        let config = config();
        let provider = ScriptedProvider::new();
        let mut session = session();

        let url = AuthSession::new(&config, &provider, &mut session)
            .build_login_redirect()
            .expect("login url");

        assert!(
            url.as_str()
                .starts_with("https://sso.example.com/realms/gist/protocol/openid-connect/auth?")
        );
        let params = query(&url);
        assert_eq!(params["client_id"], "gist-dashboard");
        assert_eq!(params["redirect_uri"], "http://localhost:3000/");
        assert_eq!(params["response_type"], "code");
        assert_eq!(params["scope"], "openid profile email");
        assert_eq!(params["code_challenge_method"], "S256");
        assert!(!params["code_challenge"].is_empty());

        let pending = session.pending().expect("pending login");
        assert_eq!(pending.state(), params["state"]);
        assert_ne!(pending.verifier(), params["code_challenge"]);
        assert_eq!(provider.total_calls(), 0);
    }

    #[test]
    fn each_login_redirect_uses_fresh_state() {
        let config = config();
        let provider = ScriptedProvider::new();
        let mut session = session();

        let first = start_login(&config, &provider, &mut session);
        let second = start_login(&config, &provider, &mut session);
        assert_ne!(first, second);
        assert_eq!(session.pending().map(PendingLogin::state), Some(second.as_str()));
    }

    #[tokio::test]
    async fn exchange_sends_stored_verifier() {
        let config = config();
        let provider = ScriptedProvider::new().on_exchange(Ok(tokens("T1")));
        let mut session = session();
        let state = start_login(&config, &provider, &mut session);
        let verifier = session.pending().map(|p| p.verifier().to_string());

        let result = AuthSession::new(&config, &provider, &mut session)
            .exchange_code("abc123", Some(&state))
            .await
            .expect("tokens");

        assert_eq!(result.access_token(), "T1");
        let requests = provider.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].code(), "abc123");
        assert_eq!(requests[0].verifier().map(str::to_string), verifier);
        assert_eq!(session.access_token(), Some("T1"));
        assert!(session.pending().is_none());
    }

    #[tokio::test]
    async fn replayed_code_calls_token_endpoint_once() {
        let config = config();
        let provider = ScriptedProvider::new().on_exchange(Ok(tokens("T1")));
        let mut session = session();
        let state = start_login(&config, &provider, &mut session);

        let first = AuthSession::new(&config, &provider, &mut session)
            .exchange_code("abc123", Some(&state))
            .await;
        let second = AuthSession::new(&config, &provider, &mut session)
            .exchange_code("abc123", Some(&state))
            .await;

        assert_eq!(provider.exchange_calls(), 1);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn replayed_failure_returns_memoized_error() {
        let config = config();
        let provider = ScriptedProvider::new().on_exchange(Err(grant_error("Code not found")));
        let mut session = session();
        let state = start_login(&config, &provider, &mut session);

        let first = AuthSession::new(&config, &provider, &mut session)
            .exchange_code("abc123", Some(&state))
            .await
            .unwrap_err();
        let second = AuthSession::new(&config, &provider, &mut session)
            .exchange_code("abc123", None)
            .await
            .unwrap_err();

        assert!(matches!(first, AuthError::Grant { .. }));
        assert_eq!(first, second);
        assert_eq!(provider.exchange_calls(), 1);
        assert!(session.is_code_processed("abc123"));
    }

    #[tokio::test]
    async fn replay_after_tokens_cleared_is_reported() {
        let config = config();
        let provider = ScriptedProvider::new().on_exchange(Ok(tokens("T1")));
        let mut session = session();
        let state = start_login(&config, &provider, &mut session);

        AuthSession::new(&config, &provider, &mut session)
            .exchange_code("abc123", Some(&state))
            .await
            .expect("tokens");
        session.deny();

        let err = AuthSession::new(&config, &provider, &mut session)
            .exchange_code("abc123", Some(&state))
            .await
            .unwrap_err();
        assert_eq!(err, AuthError::CodeReplayed);
        assert_eq!(provider.exchange_calls(), 1);
    }

    #[tokio::test]
    async fn mismatched_state_is_refused_without_network() {
        let config = config();
        let provider = ScriptedProvider::new().on_exchange(Ok(tokens("T1")));
        let mut session = session();
        start_login(&config, &provider, &mut session);

        let err = AuthSession::new(&config, &provider, &mut session)
            .exchange_code("abc123", Some("S2"))
            .await
            .unwrap_err();

        assert_eq!(
            err,
            AuthError::StateMismatch {
                kind: StateMismatchKind::Mismatched
            }
        );
        assert_eq!(provider.exchange_calls(), 0);
        assert!(session.pending().is_none());
        assert!(session.is_code_processed("abc123"));
    }

    #[tokio::test]
    async fn absent_state_is_refused() {
        let config = config();
        let provider = ScriptedProvider::new();
        let mut session = session();
        start_login(&config, &provider, &mut session);

        let err = AuthSession::new(&config, &provider, &mut session)
            .exchange_code("abc123", None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AuthError::StateMismatch {
                kind: StateMismatchKind::Mismatched
            }
        ));
        assert_eq!(provider.exchange_calls(), 0);
    }

    #[tokio::test]
    async fn strict_mode_refuses_lost_pending_login() {
        let config = config();
        let provider = ScriptedProvider::new();
        let mut session = session();

        let err = AuthSession::new(&config, &provider, &mut session)
            .exchange_code("abc123", Some("S1"))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            AuthError::StateMismatch {
                kind: StateMismatchKind::Missing
            }
        );
        assert_eq!(provider.exchange_calls(), 0);
    }

    #[tokio::test]
    async fn degraded_mode_exchanges_without_verifier() {
        let config = degraded_config();
        let provider = ScriptedProvider::new().on_exchange(Ok(tokens("T1")));
        let mut session = session();

        AuthSession::new(&config, &provider, &mut session)
            .exchange_code("abc123", Some("S1"))
            .await
            .expect("tokens");

        assert_eq!(provider.requests()[0].verifier(), None);
    }

    #[tokio::test]
    async fn degraded_mode_still_refuses_mismatched_state() {
        let config = degraded_config();
        let provider = ScriptedProvider::new();
        let mut session = session();
        start_login(&config, &provider, &mut session);

        let err = AuthSession::new(&config, &provider, &mut session)
            .exchange_code("abc123", Some("S2"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::StateMismatch { .. }));
        assert_eq!(provider.exchange_calls(), 0);
    }

    #[tokio::test]
    async fn empty_code_is_rejected_and_not_recorded() {
        let config = config();
        let provider = ScriptedProvider::new();
        let mut session = session();

        let err = AuthSession::new(&config, &provider, &mut session)
            .exchange_code("  ", None)
            .await
            .unwrap_err();
        assert_eq!(err, AuthError::MissingCode);
        assert_eq!(session.processed_count(), 0);
    }

    #[tokio::test]
    async fn pkce_rejection_retries_once_without_verifier() {
        let config = config();
        let provider = ScriptedProvider::new()
            .on_exchange(Err(grant_error("PKCE verification failed")))
            .on_exchange(Ok(tokens("T1")));
        let mut session = session();
        let state = start_login(&config, &provider, &mut session);

        let result = AuthSession::new(&config, &provider, &mut session)
            .exchange_code("abc123", Some(&state))
            .await;

        assert!(result.is_ok());
        let requests = provider.requests();
        assert_eq!(requests.len(), 2);
        assert!(requests[0].verifier().is_some());
        assert!(requests[1].verifier().is_none());
    }

    #[tokio::test]
    async fn pkce_fallback_happens_at_most_once() {
        let config = config();
        let provider = ScriptedProvider::new()
            .on_exchange(Err(grant_error("PKCE verification failed")))
            .on_exchange(Err(grant_error("PKCE verification failed")))
            .on_exchange(Ok(tokens("T1")));
        let mut session = session();
        let state = start_login(&config, &provider, &mut session);

        let err = AuthSession::new(&config, &provider, &mut session)
            .exchange_code("abc123", Some(&state))
            .await
            .unwrap_err();

        assert!(err.is_pkce_rejection());
        assert_eq!(provider.exchange_calls(), 2);
    }

    #[tokio::test]
    async fn pkce_fallback_can_be_disabled() {
        let config = OidcConfig::builder("https://sso".into(), "gist".into(), "c".into())
            .pkce_fallback(false)
            .build();
        let provider = ScriptedProvider::new()
            .on_exchange(Err(grant_error("PKCE verification failed")))
            .on_exchange(Ok(tokens("T1")));
        let mut session = session();
        let state = start_login(&config, &provider, &mut session);

        let result = AuthSession::new(&config, &provider, &mut session)
            .exchange_code("abc123", Some(&state))
            .await;
        assert!(result.is_err());
        assert_eq!(provider.exchange_calls(), 1);
    }

    #[tokio::test]
    async fn non_pkce_grant_error_is_not_retried() {
        let config = config();
        let provider = ScriptedProvider::new()
            .on_exchange(Err(grant_error("Code not found")))
            .on_exchange(Ok(tokens("T1")));
        let mut session = session();
        let state = start_login(&config, &provider, &mut session);

        let _ = AuthSession::new(&config, &provider, &mut session)
            .exchange_code("abc123", Some(&state))
            .await;
        assert_eq!(provider.exchange_calls(), 1);
    }

    #[tokio::test]
    async fn network_failure_resets_session() {
        let config = config();
        let provider = ScriptedProvider::new().on_exchange(Err(AuthError::Network {
            kind: NetworkErrorKind::Timeout,
            details: "10s".into(),
        }));
        let mut session = session();
        let state = start_login(&config, &provider, &mut session);

        let err = AuthSession::new(&config, &provider, &mut session)
            .exchange_code("abc123", Some(&state))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Network { .. }));
        assert_eq!(session.phase(), crate::session::AuthPhase::Unauthenticated);
        assert!(session.is_code_processed("abc123"));
    }

    #[tokio::test]
    async fn fetch_identity_caches_result() {
        let config = config();
        let provider = ScriptedProvider::new()
            .on_userinfo(Ok(json!({"sub": "1", "preferred_username": "alice"})));
        let mut session = session();
        session.set_tokens(tokens("T1"), Utc::now());

        let mut auth = AuthSession::new(&config, &provider, &mut session);
        let first = auth.fetch_identity("T1").await.expect("identity");
        let second = auth.fetch_identity("T1").await.expect("identity");

        assert_eq!(first, second);
        assert_eq!(first.preferred_username(), Some("alice"));
        assert_eq!(provider.userinfo_calls(), 1);
    }

    #[tokio::test]
    async fn fetch_identity_failure_clears_session() {
        let config = config();
        let provider = ScriptedProvider::new().on_userinfo(Err(AuthError::IdentityFetch {
            details: "HTTP 401".into(),
        }));
        let mut session = session();
        session.set_tokens(tokens("T1"), Utc::now());

        let err = AuthSession::new(&config, &provider, &mut session)
            .fetch_identity("T1")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::IdentityFetch { .. }));
        assert!(session.access_token().is_none());
    }

    #[tokio::test]
    async fn malformed_userinfo_is_identity_error() {
        let config = config();
        let provider = ScriptedProvider::new().on_userinfo(Ok(json!("alice")));
        let mut session = session();
        session.set_tokens(tokens("T1"), Utc::now());

        let err = AuthSession::new(&config, &provider, &mut session)
            .fetch_identity("T1")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::IdentityFetch { .. }));
    }

    #[test]
    fn extract_roles_unions_realm_and_client_roles() {
        let config = config();
        let provider = ScriptedProvider::new();
        let mut session = session();
        let token = unsigned_jwt(&json!({
            "realm_access": {"roles": ["a", "b"]},
            "resource_access": {"gist-dashboard": {"roles": ["b", "c"]}}
        }));

        let roles = AuthSession::new(&config, &provider, &mut session).extract_roles(&token);
        let names: Vec<&str> = roles.iter().collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn extract_roles_reads_cached_userinfo_claims() {
        let config = config();
        let provider = ScriptedProvider::new();
        let mut session = session();
        session.set_tokens(tokens("T1"), Utc::now());
        session.set_identity(
            Identity::from_userinfo(json!({
                "preferred_username": "alice",
                "realm_access": {"roles": ["gist-analyst"]}
            }))
            .expect("identity"),
        );

        let roles = AuthSession::new(&config, &provider, &mut session).extract_roles("T1");
        assert!(roles.contains("gist-analyst"));
    }

    #[test]
    fn undecodable_token_yields_no_roles() {
        let config = config();
        let provider = ScriptedProvider::new();
        let mut session = session();
        let roles = AuthSession::new(&config, &provider, &mut session).extract_roles("not.a-jwt");
        assert!(roles.is_empty());
    }

    #[test]
    fn authorize_grants_with_required_role() {
        let config = config();
        let provider = ScriptedProvider::new();
        let mut session = session();
        let token = unsigned_jwt(&json!({"realm_access": {"roles": ["gist-analyst"]}}));
        session.set_tokens(tokens(&token), Utc::now());
        session.set_identity(Identity::new("sub"));

        let decision =
            AuthSession::new(&config, &provider, &mut session).authorize(&token, "gist-analyst");

        assert!(decision.granted());
        assert!(session.is_authorized());
    }

    #[test]
    fn authorize_denial_fails_closed_and_clears_session() {
        let config = config();
        let provider = ScriptedProvider::new();
        let mut session = session();
        let token = unsigned_jwt(&json!({"realm_access": {"roles": ["guest"]}}));
        session.set_tokens(tokens(&token), Utc::now());
        session.set_identity(Identity::new("sub"));

        let decision =
            AuthSession::new(&config, &provider, &mut session).authorize(&token, "gist-analyst");

        assert!(!decision.granted());
        assert!(!session.is_authorized());
        assert!(session.access_token().is_none());
        assert!(session.identity().is_none());
        assert!(!session.is_authenticated(Utc::now()));
    }

    #[test]
    fn authorize_withholds_access_from_incomplete_session() {
        let config = config();
        let provider = ScriptedProvider::new();
        let mut session = session();
        let token = unsigned_jwt(&json!({"roles": ["gist-analyst"]}));

        let decision =
            AuthSession::new(&config, &provider, &mut session).authorize(&token, "gist-analyst");

        assert!(!decision.granted());
        assert!(!session.is_authorized());
    }

    #[test]
    fn logout_redirect_is_pure() {
        let config = config();
        let provider = ScriptedProvider::new();
        let mut session = session();

        let auth = AuthSession::new(&config, &provider, &mut session);
        let first = auth.build_logout_redirect().expect("logout url");
        let second = auth.build_logout_redirect().expect("logout url");
        assert_eq!(first, second);

        let params = query(&first);
        assert!(first.as_str().starts_with(
            "https://sso.example.com/realms/gist/protocol/openid-connect/logout?"
        ));
        assert_eq!(params["client_id"], "gist-dashboard");
        assert_eq!(params["post_logout_redirect_uri"], "http://localhost:3000/");
        assert_eq!(session.phase(), crate::session::AuthPhase::Unauthenticated);
        assert_eq!(provider.total_calls(), 0);
    }
}
