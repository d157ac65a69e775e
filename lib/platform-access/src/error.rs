//! Error types for the platform-access crate.
//!
//! - `AuthError`: every way a login attempt can fail, from startup
//!   configuration through token exchange and identity lookup.
//! - `ClaimsError`: an access token whose payload could not be decoded.
//!
//! Authorization denial is deliberately absent here. A user without the
//! required role is a normal outcome, modelled by
//! [`AuthorizationDecision`](crate::role::AuthorizationDecision).

use std::fmt;

/// Why an echoed `state` parameter was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateMismatchKind {
    /// The session holds no pending login, so there is nothing to compare.
    Missing,
    /// The callback carried a different value, or none at all.
    Mismatched,
}

/// Transport-level failure classes when talking to the identity provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkErrorKind {
    /// The request exceeded its timeout.
    Timeout,
    /// The TCP/TLS connection could not be established.
    Connect,
    /// The provider answered with a 5xx status.
    Unavailable,
    /// The provider answered, but the body was not the expected JSON.
    Malformed,
    /// Any other transport failure.
    Other,
}

impl fmt::Display for NetworkErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Timeout => "timed out",
            Self::Connect => "connection failed",
            Self::Unavailable => "provider unavailable",
            Self::Malformed => "malformed response",
            Self::Other => "transport error",
        };
        f.write_str(label)
    }
}

/// What the user can do about a failed login attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// Start a fresh login; the failed code is gone for good.
    RestartLogin,
    /// A transient failure; the same action may succeed shortly.
    TryAgain,
    /// Nothing the user can fix. Operators must act.
    ContactAdministrator,
}

/// Errors from the authentication state machine.
///
/// Values are `Clone` so the replay guard can hand back the exact outcome
/// of a code that was already exchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// Provider or client settings are missing or invalid.
    Configuration { details: String },
    /// The callback `state` could not be bound to this session's login.
    StateMismatch { kind: StateMismatchKind },
    /// The callback carried an empty authorization code.
    MissingCode,
    /// `invalid_grant`: the code expired, was reused, or its redirect or
    /// verifier did not match.
    Grant { description: String },
    /// `invalid_client`: client id or secret rejected by the provider.
    Client { description: String },
    /// `invalid_request`: typically a redirect URI the provider rejects.
    InvalidRequest { description: String },
    /// Any other provider error code, including `error=` on the callback.
    ProviderRejected {
        error: String,
        description: Option<String>,
    },
    /// The provider could not be reached or answered garbage.
    Network {
        kind: NetworkErrorKind,
        details: String,
    },
    /// The token was issued but the userinfo call failed.
    IdentityFetch { details: String },
    /// The code was exchanged before and its tokens have since been cleared.
    CodeReplayed,
}

impl AuthError {
    /// Classifies an OAuth2 error response body.
    #[must_use]
    pub fn from_provider_error(error: &str, description: Option<String>) -> Self {
        let text = || description.clone().unwrap_or_default();
        match error {
            "invalid_grant" => Self::Grant {
                description: text(),
            },
            "invalid_client" | "unauthorized_client" => Self::Client {
                description: text(),
            },
            "invalid_request" => Self::InvalidRequest {
                description: text(),
            },
            other => Self::ProviderRejected {
                error: other.to_string(),
                description,
            },
        }
    }

    /// Returns how the user should proceed after this failure.
    #[must_use]
    pub fn recovery(&self) -> Recovery {
        match self {
            Self::Network { .. } => Recovery::TryAgain,
            Self::Configuration { .. } | Self::Client { .. } | Self::InvalidRequest { .. } => {
                Recovery::ContactAdministrator
            }
            Self::StateMismatch { .. }
            | Self::MissingCode
            | Self::Grant { .. }
            | Self::ProviderRejected { .. }
            | Self::IdentityFetch { .. }
            | Self::CodeReplayed => Recovery::RestartLogin,
        }
    }

    /// Returns true if operators need to know about this failure.
    #[must_use]
    pub fn is_operator_facing(&self) -> bool {
        self.recovery() == Recovery::ContactAdministrator
    }

    /// Returns true if the provider rejected the PKCE verifier itself.
    ///
    /// Keycloak reports these as `invalid_grant` or `invalid_request` with a
    /// description naming PKCE or the code verifier.
    #[must_use]
    pub fn is_pkce_rejection(&self) -> bool {
        let description = match self {
            Self::Grant { description } | Self::InvalidRequest { description } => {
                description.as_str()
            }
            Self::ProviderRejected {
                description: Some(description),
                ..
            } => description.as_str(),
            _ => return false,
        };
        let lowered = description.to_ascii_lowercase();
        lowered.contains("pkce")
            || lowered.contains("code_verifier")
            || lowered.contains("code verifier")
    }

    /// A short, user-safe explanation.
    ///
    /// Never includes provider descriptions verbatim; those go to the logs.
    #[must_use]
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Configuration { .. } => "Sign-in is not configured correctly on this server.",
            Self::StateMismatch { .. } => {
                "The login response could not be matched to your login request. \
                 This can happen if the login was started in another tab or the \
                 session expired. For your safety the login was refused."
            }
            Self::MissingCode => "The login response did not include an authorization code.",
            Self::Grant { .. } => {
                "The authorization code expired or was already used. \
                 Authorization codes are single-use; please log in again."
            }
            Self::Client { .. } => {
                "The identity provider rejected this application's credentials."
            }
            Self::InvalidRequest { .. } => {
                "The identity provider rejected the login request as malformed."
            }
            Self::ProviderRejected { .. } => "The identity provider declined the login.",
            Self::Network { .. } => {
                "The identity provider could not be reached. Please try again in a moment."
            }
            Self::IdentityFetch { .. } => "Your user profile could not be retrieved.",
            Self::CodeReplayed => "This login link was already used. Please log in again.",
        }
    }
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration { details } => {
                write!(f, "configuration error: {details}")
            }
            Self::StateMismatch {
                kind: StateMismatchKind::Missing,
            } => write!(f, "state mismatch: no pending login in session"),
            Self::StateMismatch {
                kind: StateMismatchKind::Mismatched,
            } => write!(f, "state mismatch: callback state does not match"),
            Self::MissingCode => write!(f, "authorization code missing"),
            Self::Grant { description } => {
                write!(f, "grant rejected (invalid_grant): {description}")
            }
            Self::Client { description } => {
                write!(f, "client rejected (invalid_client): {description}")
            }
            Self::InvalidRequest { description } => {
                write!(f, "request rejected (invalid_request): {description}")
            }
            Self::ProviderRejected { error, description } => match description {
                Some(description) => write!(f, "provider error '{error}': {description}"),
                None => write!(f, "provider error '{error}'"),
            },
            Self::Network { kind, details } => {
                write!(f, "network error ({kind}): {details}")
            }
            Self::IdentityFetch { details } => {
                write!(f, "identity fetch failed: {details}")
            }
            Self::CodeReplayed => write!(f, "authorization code already consumed"),
        }
    }
}

impl std::error::Error for AuthError {}

/// Errors decoding a JWT payload without verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimsError {
    /// The token is not three dot-separated segments.
    NotAJwt { segments: usize },
    /// The payload segment is not base64url.
    Encoding { details: String },
    /// The payload is not a JSON object.
    Payload { details: String },
}

impl fmt::Display for ClaimsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotAJwt { segments } => {
                write!(f, "token is not a JWT ({segments} segments)")
            }
            Self::Encoding { details } => write!(f, "token payload is not base64url: {details}"),
            Self::Payload { details } => write!(f, "token payload is not a JSON object: {details}"),
        }
    }
}

impl std::error::Error for ClaimsError {}
