//! Server-side session state for one browser.
//!
//! A session is created empty at first contact and filled in across the
//! login phases: code to token, token to identity, identity to
//! authorization. The phase is tracked explicitly so that `authorized`
//! can only be reached with both an identity and an access token present.

use chrono::{DateTime, Duration, Utc};
use gist_analytics_core::SessionId;
use std::collections::{HashMap, VecDeque};
use std::fmt;

use crate::error::AuthError;
use crate::identity::Identity;
use crate::token::{self, TokenSet};

/// How many callback codes a session remembers. The oldest is forgotten first.
pub const MAX_PROCESSED_CODES: usize = 64;

/// Where a session is in the login lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthPhase {
    /// No credentials. A login may be pending.
    Unauthenticated,
    /// A callback code was accepted and is being exchanged.
    CodeReceived,
    /// Tokens are held but the identity has not been fetched yet.
    TokenExchanged,
    /// Tokens and identity are held; roles have not been checked.
    IdentityFetched,
    /// The user holds the required role.
    Authorized,
    /// The user authenticated but lacks the required role.
    Denied,
}

impl AuthPhase {
    /// Returns the phase name for logging.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unauthenticated => "unauthenticated",
            Self::CodeReceived => "code_received",
            Self::TokenExchanged => "token_exchanged",
            Self::IdentityFetched => "identity_fetched",
            Self::Authorized => "authorized",
            Self::Denied => "denied",
        }
    }
}

impl fmt::Display for AuthPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The state and PKCE verifier stored before redirecting to the provider.
#[derive(Clone, PartialEq, Eq)]
pub struct PendingLogin {
    state: String,
    verifier: String,
    started_at: DateTime<Utc>,
}

impl PendingLogin {
    /// Creates a pending login.
    #[must_use]
    pub fn new(state: String, verifier: String, started_at: DateTime<Utc>) -> Self {
        Self {
            state,
            verifier,
            started_at,
        }
    }

    /// Returns the anti-CSRF state value.
    #[must_use]
    pub fn state(&self) -> &str {
        &self.state
    }

    /// Returns the PKCE code verifier.
    #[must_use]
    pub fn verifier(&self) -> &str {
        &self.verifier
    }

    /// Returns when the redirect was built.
    #[must_use]
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }
}

impl fmt::Debug for PendingLogin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingLogin")
            .field("state", &"<redacted>")
            .field("verifier", &"<redacted>")
            .field("started_at", &self.started_at)
            .finish()
    }
}

/// The memoized result of exchanging one authorization code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodeOutcome {
    /// The provider issued tokens for this code.
    Exchanged,
    /// The exchange failed with this error.
    Failed(AuthError),
}

/// One browser's authentication state.
#[derive(Clone)]
pub struct Session {
    id: SessionId,
    created_at: DateTime<Utc>,
    phase: AuthPhase,
    pending: Option<PendingLogin>,
    tokens: Option<TokenSet>,
    tokens_obtained_at: Option<DateTime<Utc>>,
    identity: Option<Identity>,
    processed_codes: HashMap<String, CodeOutcome>,
    processed_order: VecDeque<String>,
}

impl Session {
    /// Creates an empty session.
    #[must_use]
    pub fn new(id: SessionId, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            created_at,
            phase: AuthPhase::Unauthenticated,
            pending: None,
            tokens: None,
            tokens_obtained_at: None,
            identity: None,
            processed_codes: HashMap::new(),
            processed_order: VecDeque::new(),
        }
    }

    /// Returns the session ID.
    #[must_use]
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Returns when the session was created.
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Returns the current lifecycle phase.
    #[must_use]
    pub fn phase(&self) -> AuthPhase {
        self.phase
    }

    /// Returns true once the role check has passed.
    #[must_use]
    pub fn is_authorized(&self) -> bool {
        self.phase == AuthPhase::Authorized
    }

    /// Returns true if an access token is held and has not expired.
    ///
    /// Expiry comes from the token's `exp` claim, or failing that from the
    /// provider's `expires_in`. Opaque tokens without either never expire
    /// here; the session store's idle TTL bounds them instead.
    #[must_use]
    pub fn is_authenticated(&self, now: DateTime<Utc>) -> bool {
        if self.tokens.is_none() {
            return false;
        }
        self.token_expiry().is_none_or(|expiry| expiry > now)
    }

    /// Returns when the held access token expires, if that is known.
    #[must_use]
    pub fn token_expiry(&self) -> Option<DateTime<Utc>> {
        let tokens = self.tokens.as_ref()?;
        if let Ok(claims) = token::decode_claims(tokens.access_token())
            && let Some(exp) = token::expires_at(&claims)
        {
            return Some(exp);
        }
        let lifetime = i64::try_from(tokens.expires_in()?).ok()?;
        Some(self.tokens_obtained_at? + Duration::seconds(lifetime))
    }

    /// Returns the pending login, if a redirect was built and not yet consumed.
    #[must_use]
    pub fn pending(&self) -> Option<&PendingLogin> {
        self.pending.as_ref()
    }

    /// Returns the held tokens.
    #[must_use]
    pub fn tokens(&self) -> Option<&TokenSet> {
        self.tokens.as_ref()
    }

    /// Returns the bearer access token.
    #[must_use]
    pub fn access_token(&self) -> Option<&str> {
        self.tokens.as_ref().map(TokenSet::access_token)
    }

    /// Returns the cached identity.
    #[must_use]
    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    /// Starts a fresh login.
    ///
    /// Clears tokens, identity, and any previous pending login, but keeps
    /// processed codes so replay protection survives re-login.
    pub fn begin_login(&mut self, pending: PendingLogin) {
        self.reset_credentials();
        self.pending = Some(pending);
    }

    /// Removes and returns the pending login. State is single-use.
    pub fn take_pending(&mut self) -> Option<PendingLogin> {
        self.pending.take()
    }

    /// Marks a callback code as accepted for exchange.
    pub fn accept_code(&mut self) {
        self.phase = AuthPhase::CodeReceived;
    }

    /// Returns the memoized outcome for `code`, if it was exchanged before.
    #[must_use]
    pub fn processed_outcome(&self, code: &str) -> Option<&CodeOutcome> {
        self.processed_codes.get(code)
    }

    /// Returns true if `code` was exchanged before.
    #[must_use]
    pub fn is_code_processed(&self, code: &str) -> bool {
        self.processed_codes.contains_key(code)
    }

    /// Returns the number of distinct codes this session remembers.
    #[must_use]
    pub fn processed_count(&self) -> usize {
        self.processed_codes.len()
    }

    /// Records the outcome of exchanging `code`.
    ///
    /// At most [`MAX_PROCESSED_CODES`] codes are kept; recording a new code
    /// beyond that evicts the oldest one.
    pub fn record_code(&mut self, code: &str, outcome: CodeOutcome) {
        if let Some(existing) = self.processed_codes.get_mut(code) {
            *existing = outcome;
            return;
        }
        self.processed_codes.insert(code.to_string(), outcome);
        self.processed_order.push_back(code.to_string());
        while self.processed_order.len() > MAX_PROCESSED_CODES {
            if let Some(oldest) = self.processed_order.pop_front() {
                self.processed_codes.remove(&oldest);
            }
        }
    }

    /// Moves the session to a new ID. Only the store may rekey a session.
    pub(crate) fn rekey(&mut self, id: SessionId) {
        self.id = id;
    }

    /// Stores freshly exchanged tokens.
    pub fn set_tokens(&mut self, tokens: TokenSet, obtained_at: DateTime<Utc>) {
        self.tokens = Some(tokens);
        self.tokens_obtained_at = Some(obtained_at);
        self.identity = None;
        self.phase = AuthPhase::TokenExchanged;
    }

    /// Caches the fetched identity.
    pub fn set_identity(&mut self, identity: Identity) {
        self.identity = Some(identity);
        self.phase = AuthPhase::IdentityFetched;
    }

    /// Marks the session authorized.
    ///
    /// # Errors
    ///
    /// Returns the current phase if the identity or access token is missing.
    pub fn mark_authorized(&mut self) -> Result<(), AuthPhase> {
        if self.identity.is_none() || self.tokens.is_none() {
            return Err(self.phase);
        }
        self.phase = AuthPhase::Authorized;
        Ok(())
    }

    /// Records an authorization denial and drops the authenticated artifacts,
    /// so a retried login starts from scratch.
    pub fn deny(&mut self) {
        self.tokens = None;
        self.tokens_obtained_at = None;
        self.identity = None;
        self.phase = AuthPhase::Denied;
    }

    /// Returns the session to `Unauthenticated`, keeping processed codes.
    pub fn reset_credentials(&mut self) {
        self.pending = None;
        self.tokens = None;
        self.tokens_obtained_at = None;
        self.identity = None;
        self.phase = AuthPhase::Unauthenticated;
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("created_at", &self.created_at)
            .field("phase", &self.phase)
            .field("pending", &self.pending)
            .field("tokens", &self.tokens)
            .field("identity", &self.identity)
            .field("processed_codes", &self.processed_codes.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::unsigned_jwt;
    use serde_json::json;

    fn session() -> Session {
        Session::new(SessionId::new(), Utc::now())
    }

    fn pending() -> PendingLogin {
        PendingLogin::new("S1".into(), "V1".into(), Utc::now())
    }

    #[test]
    fn new_session_is_unauthenticated() {
        let session = session();
        assert_eq!(session.phase(), AuthPhase::Unauthenticated);
        assert!(!session.is_authorized());
        assert!(!session.is_authenticated(Utc::now()));
        assert!(session.access_token().is_none());
        assert!(session.identity().is_none());
    }

    #[test]
    fn phases_advance_in_order() {
        let mut session = session();
        session.begin_login(pending());
        session.take_pending();
        session.accept_code();
        assert_eq!(session.phase(), AuthPhase::CodeReceived);

        session.set_tokens(TokenSet::new("T1".into(), None), Utc::now());
        assert_eq!(session.phase(), AuthPhase::TokenExchanged);

        session.set_identity(Identity::new("sub"));
        assert_eq!(session.phase(), AuthPhase::IdentityFetched);

        session.mark_authorized().expect("authorize");
        assert!(session.is_authorized());
    }

    #[test]
    fn authorization_requires_identity_and_token() {
        let mut session = session();
        assert_eq!(session.mark_authorized(), Err(AuthPhase::Unauthenticated));

        session.set_tokens(TokenSet::new("T1".into(), None), Utc::now());
        assert_eq!(session.mark_authorized(), Err(AuthPhase::TokenExchanged));
        assert!(!session.is_authorized());
    }

    #[test]
    fn deny_clears_authenticated_artifacts() {
        let mut session = session();
        session.set_tokens(TokenSet::new("T1".into(), None), Utc::now());
        session.set_identity(Identity::new("sub"));

        session.deny();

        assert_eq!(session.phase(), AuthPhase::Denied);
        assert!(session.access_token().is_none());
        assert!(session.identity().is_none());
        assert!(!session.is_authenticated(Utc::now()));
        assert!(!session.is_authorized());
    }

    #[test]
    fn begin_login_clears_partial_state_but_keeps_codes() {
        let mut session = session();
        session.record_code("abc", CodeOutcome::Exchanged);
        session.set_tokens(TokenSet::new("T1".into(), None), Utc::now());
        session.set_identity(Identity::new("sub"));
        session.mark_authorized().expect("authorize");

        session.begin_login(pending());

        assert_eq!(session.phase(), AuthPhase::Unauthenticated);
        assert!(session.tokens().is_none());
        assert!(session.identity().is_none());
        assert_eq!(session.pending().map(PendingLogin::state), Some("S1"));
        assert!(session.is_code_processed("abc"));
    }

    #[test]
    fn pending_login_is_single_use() {
        let mut session = session();
        session.begin_login(pending());
        assert!(session.take_pending().is_some());
        assert!(session.take_pending().is_none());
    }

    #[test]
    fn processed_codes_memoize_outcomes() {
        let mut session = session();
        let err = AuthError::Grant {
            description: "Code not found".into(),
        };
        session.record_code("bad", CodeOutcome::Failed(err.clone()));
        session.record_code("good", CodeOutcome::Exchanged);

        assert_eq!(
            session.processed_outcome("bad"),
            Some(&CodeOutcome::Failed(err))
        );
        assert_eq!(
            session.processed_outcome("good"),
            Some(&CodeOutcome::Exchanged)
        );
        assert!(session.processed_outcome("new").is_none());
        assert_eq!(session.processed_count(), 2);
    }

    #[test]
    fn processed_codes_forget_the_oldest_beyond_the_cap() {
        let mut session = session();
        for i in 0..MAX_PROCESSED_CODES + 10 {
            session.record_code(&format!("code-{i}"), CodeOutcome::Exchanged);
        }

        assert_eq!(session.processed_count(), MAX_PROCESSED_CODES);
        assert!(!session.is_code_processed("code-0"));
        assert!(!session.is_code_processed("code-9"));
        assert!(session.is_code_processed("code-10"));
        assert!(session.is_code_processed(&format!("code-{}", MAX_PROCESSED_CODES + 9)));
    }

    #[test]
    fn rerecording_a_code_updates_it_in_place() {
        let mut session = session();
        let err = AuthError::Grant {
            description: "Code not found".into(),
        };
        session.record_code("abc", CodeOutcome::Exchanged);
        session.record_code("abc", CodeOutcome::Failed(err.clone()));

        assert_eq!(session.processed_count(), 1);
        assert_eq!(session.processed_outcome("abc"), Some(&CodeOutcome::Failed(err)));
    }

    #[test]
    fn expiry_is_read_from_exp_claim() {
        let now = Utc::now();
        let mut session = session();

        let expired = unsigned_jwt(&json!({"exp": (now - Duration::minutes(1)).timestamp()}));
        session.set_tokens(TokenSet::new(expired, None), now);
        assert!(!session.is_authenticated(now));

        let live = unsigned_jwt(&json!({"exp": (now + Duration::minutes(5)).timestamp()}));
        session.set_tokens(TokenSet::new(live, None), now);
        assert!(session.is_authenticated(now));
    }

    #[test]
    fn expiry_falls_back_to_expires_in() {
        let now = Utc::now();
        let mut session = session();
        session.set_tokens(
            TokenSet::new("opaque".into(), None).with_expires_in(Some(300)),
            now,
        );

        assert!(session.is_authenticated(now + Duration::seconds(299)));
        assert!(!session.is_authenticated(now + Duration::seconds(300)));
    }

    #[test]
    fn opaque_token_without_lifetime_does_not_expire() {
        let now = Utc::now();
        let mut session = session();
        session.set_tokens(TokenSet::new("T1".into(), None), now);
        assert!(session.token_expiry().is_none());
        assert!(session.is_authenticated(now + Duration::days(1)));
    }

    #[test]
    fn debug_hides_secrets() {
        let mut session = session();
        session.begin_login(PendingLogin::new(
            "state-value".into(),
            "verifier-value".into(),
            Utc::now(),
        ));
        session.record_code("code-value", CodeOutcome::Exchanged);
        let debug = format!("{session:?}");
        assert!(!debug.contains("state-value"));
        assert!(!debug.contains("verifier-value"));
        assert!(!debug.contains("code-value"));
    }
}
