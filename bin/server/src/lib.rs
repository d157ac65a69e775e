//! Gist analytics web server.
//!
//! This crate wires Keycloak sign-in and the ClickHouse-backed analytics
//! queries into an Axum router with server-rendered Leptos pages.

#![allow(non_snake_case)]

pub mod analytics;
pub mod auth;
pub mod config;
pub mod error;
pub mod pages;

use axum::{Router, body::Body, http::Request, routing::get};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::auth::AppState;

/// Builds the application router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(analytics::dashboard))
        .route("/login", get(auth::login_page))
        .route("/auth/login", get(auth::login))
        .route("/auth/logout", get(auth::logout))
        .route("/api/me", get(analytics::me))
        .route("/api/turns", get(analytics::turns))
        .route("/api/metrics/daily", get(analytics::daily))
        .route("/api/metrics/distributions", get(analytics::distributions))
        .route("/api/metrics/trends", get(analytics::trends))
        .route("/health", get(analytics::health))
        // Spans carry the path only; callback query strings hold codes.
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
                tracing::info_span!(
                    "request",
                    method = %request.method(),
                    path = %request.uri().path(),
                )
            }),
        )
        .with_state(state)
}
