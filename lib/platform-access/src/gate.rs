//! Per-request enforcement in front of every protected handler.
//!
//! The gate never writes an HTTP response itself. It returns a
//! [`GateDecision`] and the web layer turns that into a redirect, an error
//! page, or a call into the protected handler.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::fmt;
use tracing::{debug, info, instrument};

use crate::auth::{AuthSession, AuthenticatedUser};
use crate::error::{AuthError, Recovery};
use crate::oidc::OidcConfig;
use crate::provider::IdentityProvider;
use crate::role::AuthorizationDecision;
use crate::session::Session;

/// Path of the login entry page.
pub const DEFAULT_LOGIN_PATH: &str = "/login";

/// Query parameters the provider may append when redirecting back.
#[derive(Clone, Default, PartialEq, Eq, Deserialize)]
pub struct CallbackParams {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_description: Option<String>,
}

impl CallbackParams {
    /// Callback parameters carrying a code and state.
    #[must_use]
    pub fn with_code(code: impl Into<String>, state: Option<String>) -> Self {
        Self {
            code: Some(code.into()),
            state,
            ..Self::default()
        }
    }

    /// Returns true if this request is a provider callback.
    #[must_use]
    pub fn is_callback(&self) -> bool {
        self.code.is_some() || self.error.is_some()
    }
}

impl fmt::Debug for CallbackParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackParams")
            .field("code", &self.code.as_ref().map(|_| "<redacted>"))
            .field("state", &self.state.as_ref().map(|_| "<redacted>"))
            .field("error", &self.error)
            .field("error_description", &self.error_description)
            .finish()
    }
}

/// Which step of the callback sequence failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateStage {
    /// The provider redirected back with an error instead of a code.
    Callback,
    /// Exchanging the code for tokens.
    Exchange,
    /// Fetching the userinfo identity.
    Identity,
}

impl fmt::Display for GateStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Callback => "callback",
            Self::Exchange => "token exchange",
            Self::Identity => "identity fetch",
        };
        f.write_str(label)
    }
}

/// Why a request was stopped at the gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenyReason {
    /// The user authenticated but lacks the required role.
    Unauthorized(AuthorizationDecision),
    /// A login step failed.
    Failed { stage: GateStage, error: AuthError },
}

impl DenyReason {
    /// Returns how the user should proceed, or `None` for a role denial.
    #[must_use]
    pub fn recovery(&self) -> Option<Recovery> {
        match self {
            Self::Unauthorized(_) => None,
            Self::Failed { error, .. } => Some(error.recovery()),
        }
    }
}

/// What the web layer should do with a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    /// Run the protected handler for this user.
    Proceed(AuthenticatedUser),
    /// Send the browser to this URL or path.
    RedirectTo(String),
    /// Stop and explain.
    Deny(DenyReason),
}

/// Drives a session through the gate algorithm on each request.
pub struct RequestGate<'a, P: IdentityProvider + ?Sized> {
    config: &'a OidcConfig,
    provider: &'a P,
    login_path: &'a str,
}

impl<'a, P: IdentityProvider + ?Sized> RequestGate<'a, P> {
    /// Creates a gate that sends unauthenticated users to [`DEFAULT_LOGIN_PATH`].
    pub fn new(config: &'a OidcConfig, provider: &'a P) -> Self {
        Self {
            config,
            provider,
            login_path: DEFAULT_LOGIN_PATH,
        }
    }

    /// Overrides the login entry path.
    #[must_use]
    pub fn with_login_path(mut self, login_path: &'a str) -> Self {
        self.login_path = login_path;
        self
    }

    /// Decides what to do with one request.
    ///
    /// `landing` is the request path without callback parameters; after a
    /// successful callback the browser is redirected there so a refresh does
    /// not resubmit the code.
    #[instrument(skip_all, fields(session_id = %session.id(), phase = %session.phase()))]
    pub async fn evaluate(
        &self,
        session: &mut Session,
        params: &CallbackParams,
        landing: &str,
        now: DateTime<Utc>,
    ) -> GateDecision {
        if let Some(error) = &params.error {
            info!(error = %error, "provider returned an error to the callback");
            session.reset_credentials();
            return GateDecision::Deny(DenyReason::Failed {
                stage: GateStage::Callback,
                error: AuthError::from_provider_error(error, params.error_description.clone()),
            });
        }

        if let Some(code) = &params.code {
            if session.is_authorized() && session.is_code_processed(code) {
                debug!("callback code already handled for this session");
                return GateDecision::RedirectTo(landing.to_string());
            }
            return self
                .complete_login(session, code, params.state.as_deref(), landing, now)
                .await;
        }

        if !session.is_authorized() {
            return GateDecision::RedirectTo(self.login_path.to_string());
        }

        if !session.is_authenticated(now) {
            info!("access token expired, restarting login");
            session.reset_credentials();
            return GateDecision::RedirectTo(self.login_path.to_string());
        }

        self.proceed(session, now)
    }

    async fn complete_login(
        &self,
        session: &mut Session,
        code: &str,
        state: Option<&str>,
        landing: &str,
        now: DateTime<Utc>,
    ) -> GateDecision {
        let mut auth = AuthSession::new(self.config, self.provider, session).at(now);

        let tokens = match auth.exchange_code(code, state).await {
            Ok(tokens) => tokens,
            Err(error) => {
                return GateDecision::Deny(DenyReason::Failed {
                    stage: GateStage::Exchange,
                    error,
                });
            }
        };

        if let Err(error) = auth.fetch_identity(tokens.access_token()).await {
            return GateDecision::Deny(DenyReason::Failed {
                stage: GateStage::Identity,
                error,
            });
        }

        let decision = auth.authorize(tokens.access_token(), self.config.required_role());
        if decision.granted() {
            GateDecision::RedirectTo(landing.to_string())
        } else {
            GateDecision::Deny(DenyReason::Unauthorized(decision))
        }
    }

    /// Re-checks roles for an authorized session and hands over the identity.
    fn proceed(&self, session: &mut Session, now: DateTime<Utc>) -> GateDecision {
        let Some(access_token) = session.access_token().map(str::to_string) else {
            session.reset_credentials();
            return GateDecision::RedirectTo(self.login_path.to_string());
        };

        let mut auth = AuthSession::new(self.config, self.provider, session).at(now);
        let decision = auth.authorize(&access_token, self.config.required_role());
        if !decision.granted() {
            return GateDecision::Deny(DenyReason::Unauthorized(decision));
        }

        match session.identity() {
            Some(identity) => {
                GateDecision::Proceed(AuthenticatedUser::new(identity.clone(), decision.roles().clone()))
            }
            None => GateDecision::RedirectTo(self.login_path.to_string()),
        }
    }
}
