//! Authentication extractor for Axum.

use axum::{
    extract::{FromRef, FromRequestParts, Query},
    http::{StatusCode, request::Parts},
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::CookieJar;
use axum_extra::extract::cookie::{Cookie, SameSite};
use chrono::Utc;
use gist_analytics_core::SessionId;
use gist_analytics_platform_access::{
    AuthError, AuthenticatedUser, CallbackParams, DenyReason, GateDecision, Recovery,
    RequestGate,
};
use std::sync::Arc;
use time::Duration as TimeDuration;

use super::AppState;
use crate::config::SessionConfig;
use crate::pages;

/// Session cookie name.
pub(crate) const SESSION_COOKIE: &str = "session";

/// Builds the cookie carrying a session ID.
pub(crate) fn session_cookie(id: SessionId, config: &SessionConfig) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, id.to_string()))
        .path("/")
        .http_only(true)
        .secure(config.secure_cookies)
        .same_site(SameSite::Lax)
        .max_age(TimeDuration::minutes(config.idle_minutes))
        .build()
}

/// Builds a cookie that clears the session cookie.
pub(crate) fn removed_session_cookie() -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, ""))
        .path("/")
        .max_age(TimeDuration::ZERO)
        .build()
}

/// Reads the session ID from the cookie, ignoring malformed values.
pub(crate) fn presented_session(jar: &CookieJar) -> Option<SessionId> {
    jar.get(SESSION_COOKIE)
        .and_then(|cookie| cookie.value().parse().ok())
}

/// Extractor for requiring an authorized user.
///
/// Runs the request gate against the browser's session. Provider
/// callbacks (`?code=` or `?error=`) are completed here, on whatever path
/// the provider redirected to.
pub struct RequireAuth(pub AuthenticatedUser);

impl<S> FromRequestParts<S> for RequireAuth
where
    Arc<AppState>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AuthRejection;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let app_state = Arc::<AppState>::from_ref(state);
        let jar = CookieJar::from_request_parts(parts, state)
            .await
            .map_err(|_| AuthRejection::InternalError)?;

        let presented = presented_session(&jar);
        let params = Query::<CallbackParams>::try_from_uri(&parts.uri)
            .map(|Query(params)| params)
            .unwrap_or_default();
        let landing = parts.uri.path().to_string();

        let (session_id, shared) = app_state.sessions.load_or_create(presented).await;
        let mut issued = (presented != Some(session_id))
            .then(|| session_cookie(session_id, &app_state.session_config));

        // Held for the whole gate run so a resubmitted callback waits for
        // the first one and sees its recorded outcome.
        let mut session = shared.lock().await;
        let was_authorized = session.is_authorized();
        let gate = RequestGate::new(&app_state.oidc, app_state.provider.as_ref());
        let decision = gate
            .evaluate(&mut session, &params, &landing, Utc::now())
            .await;

        // The pre-login ID must not survive sign-in.
        if !was_authorized
            && session.is_authorized()
            && let Some(rotated) = app_state.sessions.rotate(&mut session).await
        {
            issued = Some(session_cookie(rotated, &app_state.session_config));
        }

        match decision {
            GateDecision::Proceed(user) => Ok(RequireAuth(user)),
            GateDecision::RedirectTo(to) => Err(AuthRejection::Redirect { to, cookie: issued }),
            GateDecision::Deny(reason) => Err(AuthRejection::Denied {
                reason,
                cookie: issued,
            }),
        }
    }
}

/// Rejection type for [`RequireAuth`].
#[derive(Debug)]
pub enum AuthRejection {
    /// Send the browser elsewhere, issuing a session cookie if one was created.
    Redirect {
        to: String,
        cookie: Option<Cookie<'static>>,
    },
    /// The gate refused the request.
    Denied {
        reason: DenyReason,
        cookie: Option<Cookie<'static>>,
    },
    InternalError,
}

impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        match self {
            Self::Redirect { to, cookie } => {
                (with_cookie(cookie), Redirect::to(&to)).into_response()
            }
            Self::Denied {
                reason: DenyReason::Unauthorized(decision),
                cookie,
            } => {
                tracing::info!(
                    required_role = decision.required_role(),
                    roles = %decision.roles(),
                    "access denied"
                );
                (
                    StatusCode::FORBIDDEN,
                    with_cookie(cookie),
                    pages::denied(&decision),
                )
                    .into_response()
            }
            Self::Denied {
                reason: DenyReason::Failed { stage, error },
                cookie,
            } => {
                if error.is_operator_facing() {
                    tracing::error!(stage = %stage, error = %error, "sign-in failed");
                } else {
                    tracing::info!(stage = %stage, error = %error, "sign-in failed");
                }
                (with_cookie(cookie), failure_response(&error)).into_response()
            }
            Self::InternalError => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response()
            }
        }
    }
}

fn with_cookie(cookie: Option<Cookie<'static>>) -> CookieJar {
    match cookie {
        Some(cookie) => CookieJar::new().add(cookie),
        None => CookieJar::new(),
    }
}

/// Renders the failure page for `error` with the status its recovery implies.
pub(crate) fn failure_response(error: &AuthError) -> Response {
    let recovery = error.recovery();
    let status = match recovery {
        Recovery::RestartLogin => StatusCode::BAD_REQUEST,
        Recovery::TryAgain => StatusCode::SERVICE_UNAVAILABLE,
        Recovery::ContactAdministrator => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, pages::failure(error.user_message(), recovery)).into_response()
}
