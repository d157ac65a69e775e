//! Authentication module for the Gist analytics server.
//!
//! This module provides:
//! - The Keycloak HTTP client behind [`IdentityProvider`]
//! - Login and logout routes
//! - The [`RequireAuth`] extractor, which runs the request gate
//!
//! # Authorization Model
//!
//! The dashboard has a single access level: a user either holds the
//! configured role or sees nothing. Roles are re-read from the session's
//! token and userinfo claims on every request, so a session whose token
//! loses the role is refused without waiting for it to expire.

pub mod keycloak;
pub mod middleware;
pub mod routes;

use gist_analytics_platform_access::{IdentityProvider, OidcConfig, SessionStore};
use gist_analytics_query::AnalyticsRepository;
use std::sync::Arc;

use crate::config::SessionConfig;

pub use keycloak::KeycloakClient;
pub use middleware::{AuthRejection, RequireAuth};
pub use routes::{login, login_page, logout};

/// Shared application state.
pub struct AppState {
    /// Keycloak configuration.
    pub oidc: OidcConfig,
    /// Token and userinfo calls.
    pub provider: Arc<dyn IdentityProvider>,
    /// Server-side sessions keyed by cookie.
    pub sessions: Arc<dyn SessionStore>,
    /// Dashboard queries.
    pub analytics: AnalyticsRepository,
    /// Session configuration.
    pub session_config: SessionConfig,
}

impl AppState {
    /// Creates a new application state.
    pub fn new(
        oidc: OidcConfig,
        provider: Arc<dyn IdentityProvider>,
        sessions: Arc<dyn SessionStore>,
        analytics: AnalyticsRepository,
        session_config: SessionConfig,
    ) -> Self {
        Self {
            oidc,
            provider,
            sessions,
            analytics,
            session_config,
        }
    }
}
