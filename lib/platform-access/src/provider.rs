//! The seam between the login state machine and the identity provider's
//! HTTP endpoints.

use async_trait::async_trait;
use serde_json::Value;
use std::fmt;

use crate::error::AuthError;
use crate::token::TokenSet;

/// One authorization-code grant request.
#[derive(Clone, PartialEq, Eq)]
pub struct CodeExchange {
    code: String,
    redirect_uri: String,
    verifier: Option<String>,
}

impl CodeExchange {
    /// Creates a grant request.
    #[must_use]
    pub fn new(code: String, redirect_uri: String, verifier: Option<String>) -> Self {
        Self {
            code,
            redirect_uri,
            verifier,
        }
    }

    /// Returns the same request without the PKCE verifier.
    #[must_use]
    pub fn without_verifier(&self) -> Self {
        Self {
            verifier: None,
            ..self.clone()
        }
    }

    /// Returns the authorization code.
    #[must_use]
    pub fn code(&self) -> &str {
        &self.code
    }

    /// Returns the redirect URI the code was issued for.
    #[must_use]
    pub fn redirect_uri(&self) -> &str {
        &self.redirect_uri
    }

    /// Returns the PKCE verifier, if one is sent.
    #[must_use]
    pub fn verifier(&self) -> Option<&str> {
        self.verifier.as_deref()
    }
}

impl fmt::Debug for CodeExchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodeExchange")
            .field("code", &"<redacted>")
            .field("redirect_uri", &self.redirect_uri)
            .field("verifier", &self.verifier.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Server-to-server calls to the identity provider.
///
/// Implementations classify failures into [`AuthError`]: provider error
/// bodies through [`AuthError::from_provider_error`], transport failures
/// and unparsable responses as [`AuthError::Network`].
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Exchanges an authorization code at the token endpoint.
    ///
    /// # Errors
    ///
    /// Returns the classified provider or transport error.
    async fn exchange_code(&self, request: &CodeExchange) -> Result<TokenSet, AuthError>;

    /// Fetches the userinfo claims for a bearer token.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::IdentityFetch`] for a non-2xx answer and
    /// [`AuthError::Network`] for transport failures.
    async fn fetch_userinfo(&self, access_token: &str) -> Result<Value, AuthError>;
}
