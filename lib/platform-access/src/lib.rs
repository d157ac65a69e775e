//! Sign-in and access control for the Gist analytics dashboard.
//!
//! This crate provides:
//! - Keycloak provider configuration (`OidcConfig`)
//! - The per-browser `Session` and its login phases
//! - The OAuth2 code-exchange state machine (`AuthSession`) with PKCE,
//!   state binding, and a replay guard on authorization codes
//! - Role extraction from token and userinfo claims (`RoleClaim`, `RoleSet`)
//! - The per-request `RequestGate` returning a `GateDecision`
//! - Session storage (`SessionStore`, `InMemorySessionStore`)
//!
//! Network calls go through the [`IdentityProvider`] trait; the server
//! binary supplies the HTTP implementation.
//!
//! # Example
//!
//! ```
//! use gist_analytics_platform_access::{AuthorizationDecision, RoleSet};
//!
//! let roles: RoleSet = ["gist-analyst", "offline_access"].into_iter().collect();
//! let decision = AuthorizationDecision::evaluate(roles, "gist-analyst");
//! assert!(decision.granted());
//! ```

pub mod auth;
pub mod error;
pub mod gate;
pub mod identity;
pub mod oidc;
pub mod provider;
pub mod role;
pub mod session;
pub mod store;
pub mod token;

#[cfg(test)]
mod testing;

// Re-export main types at crate root
pub use auth::{AuthSession, AuthenticatedUser, build_logout_redirect};
pub use error::{AuthError, ClaimsError, NetworkErrorKind, Recovery, StateMismatchKind};
pub use gate::{
    CallbackParams, DEFAULT_LOGIN_PATH, DenyReason, GateDecision, GateStage, RequestGate,
};
pub use identity::Identity;
pub use oidc::{OidcConfig, OidcConfigBuilder, StateValidation};
pub use provider::{CodeExchange, IdentityProvider};
pub use role::{AuthorizationDecision, RoleClaim, RoleSet};
pub use session::{AuthPhase, CodeOutcome, MAX_PROCESSED_CODES, PendingLogin, Session};
pub use store::{InMemorySessionStore, SessionStore, SharedSession};
pub use token::{Claims, TokenSet};
