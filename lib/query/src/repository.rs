//! Dashboard queries over turn, thread, and citation events.

use chrono::{Duration, Utc};
use gist_analytics_core::Result;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, instrument, warn};

use crate::bucket::BucketScheme;
use crate::error::QueryError;
use crate::event::{
    CitationDetail, DailyCount, DistributionRow, ResponseTypeCount, TurnKey, TurnRow,
    TurnWithCitations, TurnsPage, WeeklyTrend,
};
use crate::filter::{DateFilter, Page, PageRequest};
use crate::query::{KEYS_TYPE, Query, SINCE_TYPE};
use crate::store::EventStore;

/// Days covered by the daily chart when no date filter is set.
pub const DEFAULT_DAILY_WINDOW_DAYS: i64 = 30;

const TURN_COLUMNS: &str = "te.thread_id AS thread_id, \
     te.turn_index AS turn_index, \
     toUnixTimestamp(te.created_at) AS created_unix, \
     te.user_id AS user_id, \
     te.redacted_user_prompt_text AS redacted_user_prompt_text, \
     te.response_length AS response_length, \
     te.response_type AS response_type, \
     te.response_has_markdown_list AS response_has_markdown_list, \
     te.response_has_markdown_table AS response_has_markdown_table, \
     te.time_to_full_response_ms AS time_to_full_response_ms, \
     thr.tile_prompt AS thread_title";

/// Read-only queries backing the analytics dashboard.
#[derive(Clone)]
pub struct AnalyticsRepository {
    store: Arc<dyn EventStore>,
}

impl AnalyticsRepository {
    /// Creates a repository over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self { store }
    }

    /// Counts turns created within `filter`.
    pub async fn turn_count(&self, filter: DateFilter) -> Result<u64, QueryError> {
        #[derive(Deserialize)]
        struct Row {
            count: u64,
        }

        let (clause, filter_param) = since_clause("created_at", filter);
        let query = with_since(
            Query::new(
                "turn_count",
                format!("SELECT count() AS count FROM turn_events{clause}"),
            ),
            filter_param,
        );
        let rows: Vec<Row> = self.run(&query).await?;
        Ok(rows.first().map_or(0, |row| row.count))
    }

    /// Returns one page of turns, newest first, with their thread titles.
    pub async fn turns_page(&self, filter: DateFilter, page: Page) -> Result<Vec<TurnRow>, QueryError> {
        let (clause, filter_param) = since_clause("te.created_at", filter);
        let sql = format!(
            "SELECT {TURN_COLUMNS} \
             FROM turn_events AS te \
             LEFT JOIN thread_events AS thr ON te.thread_id = thr.thread_id\
             {clause} \
             ORDER BY te.created_at DESC \
             LIMIT {limit} OFFSET {offset}",
            limit = page.limit(),
            offset = page.offset(),
        );
        let query = with_since(Query::new("turns_page", sql), filter_param);
        self.run(&query).await
    }

    /// Counts citations per turn. Turns without citations are absent from
    /// the result.
    pub async fn citation_counts(&self, keys: &[TurnKey]) -> Result<HashMap<TurnKey, u64>, QueryError> {
        #[derive(Deserialize)]
        struct Row {
            thread_id: String,
            turn_index: u32,
            count: u64,
        }

        let Some(keys) = distinct(keys) else {
            return Ok(HashMap::new());
        };
        let query = Query::new(
            "citation_counts",
            format!(
                "SELECT thread_id, toUInt32(turn_id) AS turn_index, count() AS count \
                 FROM citation_events \
                 WHERE has({{keys:{KEYS_TYPE}}}, (thread_id, toUInt32(turn_id))) \
                 GROUP BY thread_id, turn_index"
            ),
        )
        .bind_turn_keys("keys", &keys);

        let rows: Vec<Row> = self.run(&query).await?;
        Ok(rows
            .into_iter()
            .map(|row| (TurnKey::new(row.thread_id, row.turn_index), row.count))
            .collect())
    }

    /// Returns each turn's citations ordered by attribution rank.
    pub async fn citations_for(
        &self,
        keys: &[TurnKey],
    ) -> Result<BTreeMap<TurnKey, Vec<CitationDetail>>, QueryError> {
        #[derive(Deserialize)]
        struct Row {
            thread_id: String,
            turn_index: u32,
            #[serde(flatten)]
            detail: CitationDetail,
        }

        let Some(keys) = distinct(keys) else {
            return Ok(BTreeMap::new());
        };
        let query = Query::new(
            "citations_for",
            format!(
                "SELECT thread_id, toUInt32(turn_id) AS turn_index, domain, url, title, \
                 attribution_score, attribution_rank, was_clicked \
                 FROM citation_events \
                 WHERE has({{keys:{KEYS_TYPE}}}, (thread_id, toUInt32(turn_id))) \
                 ORDER BY thread_id, turn_index, attribution_rank"
            ),
        )
        .bind_turn_keys("keys", &keys);

        let rows: Vec<Row> = self.run(&query).await?;
        let mut by_turn: BTreeMap<TurnKey, Vec<CitationDetail>> = BTreeMap::new();
        for row in rows {
            by_turn
                .entry(TurnKey::new(row.thread_id, row.turn_index))
                .or_default()
                .push(row.detail);
        }
        Ok(by_turn)
    }

    /// Returns the requested page of turns with citation counts and details.
    ///
    /// The page number is clamped against the filtered turn count, so an
    /// out-of-range request is served the last page.
    #[instrument(skip(self), fields(page = request.number(), size = request.size()))]
    pub async fn turns_with_citations(
        &self,
        filter: DateFilter,
        request: PageRequest,
    ) -> Result<TurnsPage, QueryError> {
        let total = self.turn_count(filter).await?;
        let page = request.resolve(total);
        let rows = if total == 0 {
            Vec::new()
        } else {
            self.turns_page(filter, page).await?
        };

        let keys: Vec<TurnKey> = rows.iter().map(TurnRow::key).collect();
        let counts = self.citation_counts(&keys).await?;
        let cited: Vec<TurnKey> = keys.into_iter().filter(|key| counts.contains_key(key)).collect();
        let mut details = self.citations_for(&cited).await?;

        let turns = rows
            .into_iter()
            .map(|turn| {
                let key = turn.key();
                TurnWithCitations {
                    citation_count: counts.get(&key).copied().unwrap_or(0),
                    citations: details.remove(&key).unwrap_or_default(),
                    turn,
                }
            })
            .collect();

        Ok(TurnsPage {
            total,
            page: page.number(),
            page_size: page.limit(),
            max_pages: page.max_pages(),
            turns,
        })
    }

    /// Counts turns per day. Without a date filter the last
    /// `default_days` days are counted.
    pub async fn daily_counts(
        &self,
        filter: DateFilter,
        default_days: i64,
    ) -> Result<Vec<DailyCount>, QueryError> {
        let since = filter
            .floor()
            .unwrap_or_else(|| Utc::now() - Duration::days(default_days));
        let query = Query::new(
            "daily_counts",
            format!(
                "SELECT toDate(created_at) AS day, count() AS count \
                 FROM turn_events \
                 WHERE created_at >= toDateTime({{since:{SINCE_TYPE}}}) \
                 GROUP BY day \
                 ORDER BY day"
            ),
        )
        .bind_timestamp("since", since);
        self.run(&query).await
    }

    /// Counts turns per response type, most frequent first.
    ///
    /// Stored values this dashboard does not recognize are merged into
    /// [`ResponseType::Unknown`](crate::event::ResponseType::Unknown).
    pub async fn response_type_distribution(&self) -> Result<Vec<ResponseTypeCount>, QueryError> {
        let query = Query::new(
            "response_type_distribution",
            "SELECT toString(response_type) AS response_type, count() AS count \
             FROM turn_events \
             GROUP BY response_type \
             ORDER BY count DESC",
        );
        let rows: Vec<ResponseTypeCount> = self.run(&query).await?;

        let mut merged: Vec<ResponseTypeCount> = Vec::with_capacity(rows.len());
        for row in rows {
            match merged.iter_mut().find(|m| m.response_type == row.response_type) {
                Some(existing) => existing.count += row.count,
                None => merged.push(row),
            }
        }
        merged.sort_by(|a, b| b.count.cmp(&a.count));
        Ok(merged)
    }

    /// Distribution of citations per turn.
    pub async fn citations_per_prompt_distribution(&self) -> Result<Vec<DistributionRow>, QueryError> {
        self.distribution(
            "citations_per_prompt",
            &BucketScheme::citations_per_prompt(),
            "SELECT count(ce.thread_id) AS citation_count \
             FROM turn_events AS te \
             LEFT JOIN citation_events AS ce \
             ON te.thread_id = ce.thread_id AND te.turn_index = ce.turn_id \
             GROUP BY te.thread_id, te.turn_index",
            "citation_count",
        )
        .await
    }

    /// Distribution of markdown sections per response.
    pub async fn sections_per_prompt_distribution(&self) -> Result<Vec<DistributionRow>, QueryError> {
        self.distribution(
            "sections_per_prompt",
            &BucketScheme::sections_per_prompt(),
            "SELECT response_num_sections FROM turn_events",
            "response_num_sections",
        )
        .await
    }

    /// Distribution of turns per thread.
    pub async fn turns_per_thread_distribution(&self) -> Result<Vec<DistributionRow>, QueryError> {
        self.distribution(
            "turns_per_thread",
            &BucketScheme::turns_per_thread(),
            "SELECT thread_id, count() AS turn_count FROM turn_events GROUP BY thread_id",
            "turn_count",
        )
        .await
    }

    /// Distribution of response lengths.
    ///
    /// The classes depend on the longest response: a fixed scheme up to
    /// 1000 characters, otherwise cuts scaled to the maximum. Returns no
    /// rows only when there are no turns at all; turns that all have empty
    /// responses still produce a `No Response` row.
    pub async fn length_distribution(&self) -> Result<Vec<DistributionRow>, QueryError> {
        #[derive(Deserialize)]
        struct Stats {
            count: u64,
            max_length: u64,
        }

        let query = Query::new(
            "length_stats",
            "SELECT count() AS count, max(response_length) AS max_length \
             FROM turn_events",
        );
        let stats: Vec<Stats> = self.run(&query).await?;
        let Some(stats) = stats.first().filter(|stats| stats.count > 0) else {
            return Ok(Vec::new());
        };

        let scheme = BucketScheme::response_length(stats.max_length);
        self.distribution(
            "response_length",
            &scheme,
            "SELECT response_length FROM turn_events",
            "response_length",
        )
        .await
    }

    /// Weekly averages of response length, turns per thread, citations
    /// per turn, and sections per turn.
    pub async fn weekly_trends(&self, filter: DateFilter) -> Result<Vec<WeeklyTrend>, QueryError> {
        let (clause, filter_param) = since_clause("te.created_at", filter);
        let sql = format!(
            "WITH weekly AS ( \
                 SELECT toStartOfWeek(te.created_at) AS week, \
                        te.thread_id AS thread_id, \
                        te.response_length AS response_length, \
                        te.response_num_sections AS response_num_sections, \
                        count(ce.thread_id) AS citation_count \
                 FROM turn_events AS te \
                 LEFT JOIN citation_events AS ce \
                 ON te.thread_id = ce.thread_id AND te.turn_index = ce.turn_id\
                 {clause} \
                 GROUP BY week, te.thread_id, te.turn_index, te.response_length, te.response_num_sections \
             ), \
             thread_turns AS ( \
                 SELECT week, thread_id, count() AS turns_in_thread \
                 FROM weekly \
                 GROUP BY week, thread_id \
             ) \
             SELECT toString(w.week) AS week, \
                    round(avg(w.response_length), 1) AS avg_response_length, \
                    round(avg(tt.turns_in_thread), 2) AS avg_turns_per_thread, \
                    round(avg(w.citation_count), 2) AS avg_citations_per_prompt, \
                    round(avg(w.response_num_sections), 2) AS avg_sections_per_prompt \
             FROM weekly AS w \
             INNER JOIN thread_turns AS tt ON w.week = tt.week AND w.thread_id = tt.thread_id \
             GROUP BY w.week \
             ORDER BY w.week \
             SETTINGS join_use_nulls = 1"
        );
        let query = with_since(Query::new("weekly_trends", sql), filter_param);
        self.run(&query).await
    }

    /// Buckets the `column` values produced by `source` and attaches labels.
    async fn distribution(
        &self,
        name: &'static str,
        scheme: &BucketScheme,
        source: &str,
        column: &str,
    ) -> Result<Vec<DistributionRow>, QueryError> {
        #[derive(Deserialize)]
        struct Row {
            sort_order: u32,
            count: u64,
        }

        let sql = format!(
            "SELECT {sort} AS sort_order, count() AS count \
             FROM ({source}) \
             GROUP BY sort_order \
             ORDER BY sort_order \
             SETTINGS join_use_nulls = 1",
            sort = scheme.sql_sort_order(column),
        );
        let rows: Vec<Row> = self.run(&Query::new(name, sql)).await?;

        Ok(rows
            .into_iter()
            .filter_map(|row| match scheme.label(row.sort_order) {
                Some(label) => Some(DistributionRow {
                    label: label.to_string(),
                    sort_order: row.sort_order,
                    count: row.count,
                }),
                None => {
                    debug!(query = name, count = row.count, "dropping unclassified values");
                    None
                }
            })
            .collect())
    }

    /// Runs `query` and decodes every row as `T`.
    #[instrument(skip_all, fields(query = query.name()))]
    async fn run<T: DeserializeOwned>(&self, query: &Query) -> Result<Vec<T>, QueryError> {
        let started = Instant::now();
        let rows = self.store.fetch(query).await.inspect_err(|e| {
            warn!(error = %e, "query failed");
        })?;
        debug!(
            rows = rows.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "query finished"
        );
        rows.into_iter().map(|row| decode(query, row)).collect()
    }
}

fn decode<T: DeserializeOwned>(query: &Query, row: Value) -> Result<T, QueryError> {
    serde_json::from_value(row).map_err(|e| {
        QueryError::Decode {
            query: query.name(),
            details: e.to_string(),
        }
        .into()
    })
}

/// Returns the `WHERE` clause for `filter` on `column`, with a leading
/// space, and the bound floor if there is one.
fn since_clause(column: &str, filter: DateFilter) -> (String, Option<chrono::DateTime<Utc>>) {
    match filter.floor() {
        Some(since) => (
            format!(" WHERE {column} >= toDateTime({{since:{SINCE_TYPE}}})"),
            Some(since),
        ),
        None => (String::new(), None),
    }
}

fn with_since(query: Query, since: Option<chrono::DateTime<Utc>>) -> Query {
    match since {
        Some(since) => query.bind_timestamp("since", since),
        None => query,
    }
}

/// Sorted, deduplicated keys, or `None` if there are none.
fn distinct(keys: &[TurnKey]) -> Option<Vec<TurnKey>> {
    let keys: BTreeSet<&TurnKey> = keys.iter().collect();
    if keys.is_empty() {
        return None;
    }
    Some(keys.into_iter().cloned().collect())
}
