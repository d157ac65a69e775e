//! The identity of a signed-in analyst.
//!
//! Built once per session from the provider's userinfo response and cached
//! on the [`Session`](crate::session::Session) until logout or denial.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::AuthError;
use crate::token::Claims;

/// Identity claims returned by the provider's userinfo endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// OIDC subject claim. Some provider mappers omit it from userinfo.
    subject_id: Option<String>,
    /// Human-readable name (from `name`, or `given_name` + `family_name`).
    display_name: Option<String>,
    /// Email address, if the `email` scope was granted.
    email: Option<String>,
    /// Login name at the provider.
    preferred_username: Option<String>,
    /// The full userinfo payload, kept for role extraction.
    #[serde(skip)]
    claims: Claims,
}

impl Identity {
    /// Creates an identity from a subject identifier.
    #[must_use]
    pub fn new(subject_id: impl Into<String>) -> Self {
        Self {
            subject_id: Some(subject_id.into()),
            display_name: None,
            email: None,
            preferred_username: None,
            claims: Claims::new(),
        }
    }

    /// Builds an identity from a userinfo JSON payload.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::IdentityFetch`] if the payload is not an object or
    /// carries none of `sub`, `preferred_username`, or `email`.
    pub fn from_userinfo(payload: Value) -> Result<Self, AuthError> {
        let Value::Object(claims) = payload else {
            return Err(AuthError::IdentityFetch {
                details: "userinfo payload is not a JSON object".to_string(),
            });
        };

        let text = |key: &str| {
            claims
                .get(key)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };

        let subject_id = text("sub");
        let preferred_username = text("preferred_username");
        let email = text("email");
        if subject_id.is_none() && preferred_username.is_none() && email.is_none() {
            return Err(AuthError::IdentityFetch {
                details: "userinfo payload has no subject, username, or email".to_string(),
            });
        }

        let display_name = text("name").or_else(|| {
            match (text("given_name"), text("family_name")) {
                (Some(given), Some(family)) => Some(format!("{given} {family}")),
                (given, family) => given.or(family),
            }
        });

        Ok(Self {
            subject_id,
            display_name,
            email,
            preferred_username,
            claims,
        })
    }

    /// Sets the display name.
    #[must_use]
    pub fn with_display_name(mut self, display_name: Option<String>) -> Self {
        self.display_name = display_name;
        self
    }

    /// Sets the email address.
    #[must_use]
    pub fn with_email(mut self, email: Option<String>) -> Self {
        self.email = email;
        self
    }

    /// Sets the preferred username.
    #[must_use]
    pub fn with_preferred_username(mut self, preferred_username: Option<String>) -> Self {
        self.preferred_username = preferred_username;
        self
    }

    /// Returns the OIDC subject, if the provider sent one.
    #[must_use]
    pub fn subject_id(&self) -> Option<&str> {
        self.subject_id.as_deref()
    }

    /// Returns the display name.
    #[must_use]
    pub fn display_name(&self) -> Option<&str> {
        self.display_name.as_deref()
    }

    /// Returns the email address.
    #[must_use]
    pub fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }

    /// Returns the provider login name.
    #[must_use]
    pub fn preferred_username(&self) -> Option<&str> {
        self.preferred_username.as_deref()
    }

    /// Returns the raw userinfo claims.
    #[must_use]
    pub fn claims(&self) -> &Claims {
        &self.claims
    }

    /// The best available label for greeting the user.
    #[must_use]
    pub fn label(&self) -> &str {
        self.display_name()
            .or_else(|| self.preferred_username())
            .or_else(|| self.email())
            .or_else(|| self.subject_id())
            .unwrap_or("analyst")
    }
}
