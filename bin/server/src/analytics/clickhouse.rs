//! ClickHouse HTTP interface adapter.
//!
//! Statements are sent as the request body with bound values as
//! `param_<name>` URL parameters, and rows come back as `JSONEachRow`.

use async_trait::async_trait;
use gist_analytics_query::{EventStore, Query, QueryError};
use rootcause::prelude::Report;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::config::ClickHouseConfig;
use crate::error::StartupError;

/// Longest server error message kept in a [`QueryError::Server`].
const MAX_ERROR_DETAILS: usize = 512;

/// An [`EventStore`] backed by the ClickHouse HTTP interface.
pub struct ClickHouseStore {
    http: reqwest::Client,
    url: String,
    database: String,
    user: Option<String>,
    password: Option<String>,
}

impl ClickHouseStore {
    /// Creates a store from connection settings.
    ///
    /// # Errors
    ///
    /// Returns [`StartupError::HttpClient`] if the HTTP client cannot be built.
    pub fn new(config: &ClickHouseConfig) -> Result<Self, StartupError> {
        let http = reqwest::Client::builder()
            .timeout(config.query_timeout())
            .build()
            .map_err(|e| StartupError::HttpClient {
                details: e.to_string(),
            })?;

        Ok(Self {
            http,
            url: config.url.trim_end_matches('/').to_string(),
            database: config.database.clone(),
            user: config.user.clone(),
            password: config.password.clone(),
        })
    }

    async fn send(&self, query: &Query) -> Result<Vec<Value>, QueryError> {
        let mut params: Vec<(String, &str)> = vec![
            ("database".to_string(), self.database.as_str()),
            ("default_format".to_string(), "JSONEachRow"),
            ("output_format_json_quote_64bit_integers".to_string(), "0"),
        ];
        params.extend(
            query
                .params()
                .iter()
                .map(|p| (format!("param_{}", p.name()), p.value())),
        );

        let mut request = self
            .http
            .post(format!("{}/", self.url))
            .query(&params)
            .body(query.sql().to_string());
        if let Some(user) = &self.user {
            request = request.header("X-ClickHouse-User", user);
        }
        if let Some(password) = &self.password {
            request = request.header("X-ClickHouse-Key", password);
        }

        let response = request.send().await.map_err(|e| QueryError::Transport {
            details: e.without_url().to_string(),
        })?;
        let status = response.status();
        let body = response.text().await.map_err(|e| QueryError::Transport {
            details: e.without_url().to_string(),
        })?;

        if !status.is_success() {
            let mut details = body.trim().to_string();
            if details.len() > MAX_ERROR_DETAILS {
                let cut = (0..=MAX_ERROR_DETAILS)
                    .rev()
                    .find(|&i| details.is_char_boundary(i))
                    .unwrap_or(0);
                details.truncate(cut);
            }
            return Err(QueryError::Server {
                status: status.as_u16(),
                details,
            });
        }

        body.lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| {
                serde_json::from_str(line).map_err(|e| QueryError::Decode {
                    query: query.name(),
                    details: e.to_string(),
                })
            })
            .collect()
    }
}

#[async_trait]
impl EventStore for ClickHouseStore {
    /// Runs `query`, retrying once if the store could not be reached.
    #[instrument(skip_all, fields(query = query.name()))]
    async fn fetch(&self, query: &Query) -> Result<Vec<Value>, Report<QueryError>> {
        match self.send(query).await {
            Err(e) if e.is_transient() => {
                warn!(error = %e, "retrying query once");
                Ok(self.send(query).await?)
            }
            Err(e) => Err(e.into()),
            Ok(rows) => {
                debug!(rows = rows.len(), "rows received");
                Ok(rows)
            }
        }
    }
}
