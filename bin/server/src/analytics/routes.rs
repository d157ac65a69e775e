//! Dashboard page and JSON API routes.

use axum::{
    Json,
    extract::{Query, State},
    response::Html,
};
use chrono::Utc;
use gist_analytics_platform_access::AuthenticatedUser;
use gist_analytics_query::{
    DEFAULT_DAILY_WINDOW_DAYS, DEFAULT_PAGE_SIZE, DailyCount, DistributionRow, ListingPeriod,
    PageRequest, ResponseTypeCount, TrendPeriod, TurnsPage, WeeklyTrend,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::auth::{AppState, RequireAuth};
use crate::error::ApiError;
use crate::pages;

/// Query parameters for the turn listing.
#[derive(Debug, Deserialize)]
pub struct TurnsParams {
    #[serde(default)]
    period: ListingPeriod,
    #[serde(default = "first_page")]
    page: u64,
    #[serde(default = "default_page_size")]
    page_size: u64,
}

fn first_page() -> u64 {
    1
}

fn default_page_size() -> u64 {
    DEFAULT_PAGE_SIZE
}

#[derive(Debug, Deserialize)]
pub struct ListingParams {
    #[serde(default)]
    period: ListingPeriod,
}

#[derive(Debug, Deserialize)]
pub struct TrendParams {
    #[serde(default)]
    period: TrendPeriod,
}

/// Every distribution chart in one response.
#[derive(Debug, Serialize)]
pub struct Distributions {
    pub response_types: Vec<ResponseTypeCount>,
    pub citations_per_prompt: Vec<DistributionRow>,
    pub sections_per_prompt: Vec<DistributionRow>,
    pub turns_per_thread: Vec<DistributionRow>,
    pub response_length: Vec<DistributionRow>,
}

/// Dashboard landing page.
pub async fn dashboard(RequireAuth(user): RequireAuth) -> Html<String> {
    pages::dashboard(&user)
}

/// The signed-in user's identity and roles.
pub async fn me(RequireAuth(user): RequireAuth) -> Json<AuthenticatedUser> {
    Json(user)
}

/// One page of turns with their citations.
pub async fn turns(
    State(state): State<Arc<AppState>>,
    RequireAuth(_): RequireAuth,
    Query(params): Query<TurnsParams>,
) -> Result<Json<TurnsPage>, ApiError> {
    let request = PageRequest::new(params.page, params.page_size)?;
    let filter = params.period.filter(Utc::now());
    let page = state.analytics.turns_with_citations(filter, request).await?;
    Ok(Json(page))
}

/// Turns per day.
pub async fn daily(
    State(state): State<Arc<AppState>>,
    RequireAuth(_): RequireAuth,
    Query(params): Query<ListingParams>,
) -> Result<Json<Vec<DailyCount>>, ApiError> {
    let filter = params.period.filter(Utc::now());
    let days = state
        .analytics
        .daily_counts(filter, DEFAULT_DAILY_WINDOW_DAYS)
        .await?;
    Ok(Json(days))
}

/// All distribution charts.
pub async fn distributions(
    State(state): State<Arc<AppState>>,
    RequireAuth(_): RequireAuth,
) -> Result<Json<Distributions>, ApiError> {
    let repo = &state.analytics;
    let (response_types, citations_per_prompt, sections_per_prompt, turns_per_thread, response_length) =
        tokio::try_join!(
            repo.response_type_distribution(),
            repo.citations_per_prompt_distribution(),
            repo.sections_per_prompt_distribution(),
            repo.turns_per_thread_distribution(),
            repo.length_distribution(),
        )?;

    Ok(Json(Distributions {
        response_types,
        citations_per_prompt,
        sections_per_prompt,
        turns_per_thread,
        response_length,
    }))
}

/// Weekly trend averages.
pub async fn trends(
    State(state): State<Arc<AppState>>,
    RequireAuth(_): RequireAuth,
    Query(params): Query<TrendParams>,
) -> Result<Json<Vec<WeeklyTrend>>, ApiError> {
    let filter = params.period.filter(Utc::now());
    Ok(Json(state.analytics.weekly_trends(filter).await?))
}

/// Liveness probe.
pub async fn health() -> &'static str {
    "ok"
}
