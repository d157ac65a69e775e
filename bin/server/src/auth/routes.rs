//! Authentication routes for the login page, login, and logout.
//!
//! The provider redirects back to the configured redirect URI, which is an
//! ordinary protected page. The callback itself is completed by the
//! [`RequireAuth`](super::RequireAuth) extractor.

use axum::{
    extract::State,
    response::{Html, IntoResponse, Redirect, Response},
};
use axum_extra::extract::cookie::CookieJar;
use gist_analytics_platform_access::{AuthSession, DEFAULT_LOGIN_PATH, build_logout_redirect};
use std::sync::Arc;

use super::AppState;
use super::middleware::{
    failure_response, presented_session, removed_session_cookie, session_cookie,
};
use crate::pages;

/// Renders the login page.
pub async fn login_page() -> Html<String> {
    pages::login()
}

/// Starts a login by redirecting to Keycloak.
///
/// Each call issues a fresh state and PKCE verifier, replacing any login
/// the session had pending.
pub async fn login(State(state): State<Arc<AppState>>, jar: CookieJar) -> Response {
    let (session_id, shared) = state
        .sessions
        .load_or_create(presented_session(&jar))
        .await;

    let redirect = {
        let mut session = shared.lock().await;
        AuthSession::new(&state.oidc, state.provider.as_ref(), &mut session).build_login_redirect()
    };

    match redirect {
        Ok(url) => {
            let jar = jar.add(session_cookie(session_id, &state.session_config));
            (jar, Redirect::to(url.as_str())).into_response()
        }
        Err(error) => {
            tracing::error!(error = %error, "cannot build login redirect");
            failure_response(&error)
        }
    }
}

/// Ends the session and signs out at Keycloak.
pub async fn logout(State(state): State<Arc<AppState>>, jar: CookieJar) -> Response {
    if let Some(session_id) = presented_session(&jar)
        && state.sessions.remove(session_id).await
    {
        tracing::info!(session_id = %session_id, "session ended");
    }

    let jar = jar.add(removed_session_cookie());

    match build_logout_redirect(&state.oidc) {
        Ok(url) => (jar, Redirect::to(url.as_str())).into_response(),
        Err(error) => {
            tracing::error!(error = %error, "cannot build logout redirect");
            (jar, Redirect::to(DEFAULT_LOGIN_PATH)).into_response()
        }
    }
}
