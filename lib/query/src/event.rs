//! Row types returned by analytics queries.
//!
//! Rows arrive as ClickHouse `JSONEachRow` objects. Timestamps are selected
//! as Unix seconds (`created_unix`) and flags may be `UInt8` or `Bool`
//! columns, so both shapes are accepted.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// How the assistant answered a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(from = "String")]
pub enum ResponseType {
    BlockedByGuardrail,
    NoRagReturned,
    AnswerButNoCitations,
    AnswerWithCitations,
    /// Any value this dashboard does not recognize.
    Unknown,
    Other,
}

impl ResponseType {
    /// Returns the stored string form.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BlockedByGuardrail => "BlockedByGuardrail",
            Self::NoRagReturned => "NoRAGReturned",
            Self::AnswerButNoCitations => "AnswerButNoCitations",
            Self::AnswerWithCitations => "AnswerWithCitations",
            Self::Unknown => "Unknown",
            Self::Other => "Other",
        }
    }
}

impl From<&str> for ResponseType {
    fn from(s: &str) -> Self {
        match s {
            "BlockedByGuardrail" => Self::BlockedByGuardrail,
            "NoRAGReturned" => Self::NoRagReturned,
            "AnswerButNoCitations" => Self::AnswerButNoCitations,
            "AnswerWithCitations" => Self::AnswerWithCitations,
            "Other" => Self::Other,
            _ => Self::Unknown,
        }
    }
}

impl From<String> for ResponseType {
    fn from(s: String) -> Self {
        Self::from(s.as_str())
    }
}

impl Serialize for ResponseType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl fmt::Display for ResponseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies one turn: a thread and the turn's index within it.
///
/// Citation events refer to the turn index as `turn_id`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TurnKey {
    pub thread_id: String,
    pub turn_index: u32,
}

impl TurnKey {
    /// Creates a turn key.
    #[must_use]
    pub fn new(thread_id: impl Into<String>, turn_index: u32) -> Self {
        Self {
            thread_id: thread_id.into(),
            turn_index,
        }
    }
}

impl fmt::Display for TurnKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.thread_id, self.turn_index)
    }
}

/// One row of the turn listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnRow {
    pub thread_id: String,
    pub turn_index: u32,
    #[serde(
        rename(deserialize = "created_unix"),
        deserialize_with = "chrono::serde::ts_seconds::deserialize"
    )]
    pub created_at: DateTime<Utc>,
    pub user_id: String,
    #[serde(rename(deserialize = "redacted_user_prompt_text"))]
    pub prompt_text: String,
    pub response_length: u64,
    pub response_type: ResponseType,
    #[serde(rename(deserialize = "response_has_markdown_list"), deserialize_with = "flag")]
    pub has_markdown_list: bool,
    #[serde(rename(deserialize = "response_has_markdown_table"), deserialize_with = "flag")]
    pub has_markdown_table: bool,
    #[serde(rename(deserialize = "time_to_full_response_ms"))]
    pub response_time_ms: u64,
    /// The thread's tile prompt, empty when the thread has none.
    #[serde(default)]
    pub thread_title: String,
}

impl TurnRow {
    /// Returns this turn's key.
    #[must_use]
    pub fn key(&self) -> TurnKey {
        TurnKey::new(self.thread_id.clone(), self.turn_index)
    }
}

/// One citation attached to a turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CitationDetail {
    pub domain: String,
    pub url: String,
    pub title: String,
    #[serde(rename(deserialize = "attribution_score"))]
    pub score: i64,
    #[serde(rename(deserialize = "attribution_rank"))]
    pub rank: u32,
    #[serde(deserialize_with = "flag")]
    pub was_clicked: bool,
}

/// A turn with its citation count and, when it has any, its citations.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TurnWithCitations {
    #[serde(flatten)]
    pub turn: TurnRow,
    pub citation_count: u64,
    pub citations: Vec<CitationDetail>,
}

/// One page of the turn listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TurnsPage {
    /// Turns matching the filter, across all pages.
    pub total: u64,
    /// The 1-based page number actually served.
    pub page: u64,
    pub page_size: u64,
    pub max_pages: u64,
    pub turns: Vec<TurnWithCitations>,
}

/// Turns created on one day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyCount {
    pub day: NaiveDate,
    pub count: u64,
}

/// Turns answered with one response type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseTypeCount {
    pub response_type: ResponseType,
    pub count: u64,
}

/// The number of values falling into one bucket class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DistributionRow {
    pub label: String,
    pub sort_order: u32,
    pub count: u64,
}

/// Weekly averages for the trend charts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeeklyTrend {
    pub week: NaiveDate,
    pub avg_response_length: f64,
    pub avg_turns_per_thread: f64,
    pub avg_citations_per_prompt: f64,
    pub avg_sections_per_prompt: f64,
}

/// Accepts a boolean flag stored as `Bool` or as `UInt8`.
fn flag<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Int(u8),
    }

    match Flag::deserialize(deserializer)? {
        Flag::Bool(b) => Ok(b),
        Flag::Int(n) => Ok(n != 0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn response_type_decodes_known_and_unknown_values() {
        let known: ResponseType = serde_json::from_value(json!("NoRAGReturned")).expect("decode");
        assert_eq!(known, ResponseType::NoRagReturned);

        let other: ResponseType = serde_json::from_value(json!("Other")).expect("decode");
        assert_eq!(other, ResponseType::Other);

        let unknown: ResponseType = serde_json::from_value(json!("Hallucinated")).expect("decode");
        assert_eq!(unknown, ResponseType::Unknown);

        assert_eq!(
            serde_json::to_value(ResponseType::NoRagReturned).expect("encode"),
            json!("NoRAGReturned")
        );
    }

    #[test]
    fn turn_row_decodes_clickhouse_json() {
        let row: TurnRow = serde_json::from_value(json!({
            "thread_id": "t1",
            "turn_index": 2,
            "created_unix": 1_700_000_000,
            "user_id": "u1",
            "redacted_user_prompt_text": "what is rust",
            "response_length": 512,
            "response_type": "AnswerWithCitations",
            "response_has_markdown_list": 1,
            "response_has_markdown_table": false,
            "time_to_full_response_ms": 1830,
            "thread_title": ""
        }))
        .expect("decode");

        assert_eq!(row.key(), TurnKey::new("t1", 2));
        assert_eq!(row.created_at.timestamp(), 1_700_000_000);
        assert_eq!(row.prompt_text, "what is rust");
        assert!(row.has_markdown_list);
        assert!(!row.has_markdown_table);
        assert_eq!(row.response_time_ms, 1830);

        let encoded = serde_json::to_value(&row).expect("encode");
        assert_eq!(encoded["prompt_text"], "what is rust");
        assert_eq!(encoded["response_type"], "AnswerWithCitations");
    }

    #[test]
    fn citation_detail_decodes() {
        let detail: CitationDetail = serde_json::from_value(json!({
            "domain": "example.com",
            "url": "https://example.com/a",
            "title": "A",
            "attribution_score": 87,
            "attribution_rank": 1,
            "was_clicked": 0
        }))
        .expect("decode");
        assert_eq!(detail.rank, 1);
        assert!(!detail.was_clicked);
    }

    #[test]
    fn daily_count_decodes_date() {
        let row: DailyCount =
            serde_json::from_value(json!({"day": "2024-03-01", "count": 14})).expect("decode");
        assert_eq!(row.day, NaiveDate::from_ymd_opt(2024, 3, 1).expect("date"));
    }

    #[test]
    fn turn_key_orders_by_thread_then_index() {
        let mut keys = vec![TurnKey::new("b", 1), TurnKey::new("a", 2), TurnKey::new("a", 1)];
        keys.sort();
        assert_eq!(keys[0], TurnKey::new("a", 1));
        assert_eq!(keys[2].to_string(), "b#1");
    }
}
