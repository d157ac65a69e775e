//! Parameterized SQL statements.
//!
//! Values are never spliced into SQL text. Each statement names its
//! parameters as `{name:Type}` placeholders, and the bound values travel
//! alongside it for the store to send as ClickHouse query parameters.

use chrono::{DateTime, Utc};
use std::fmt;

use crate::event::TurnKey;

/// One bound query parameter.
#[derive(Clone, PartialEq, Eq)]
pub struct Param {
    name: &'static str,
    clickhouse_type: &'static str,
    value: String,
}

impl Param {
    /// Returns the placeholder name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.name
    }

    /// Returns the declared ClickHouse type.
    #[must_use]
    pub fn clickhouse_type(&self) -> &str {
        self.clickhouse_type
    }

    /// Returns the value in ClickHouse text format.
    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Returns the `{name:Type}` placeholder.
    #[must_use]
    pub fn placeholder(&self) -> String {
        format!("{{{}:{}}}", self.name, self.clickhouse_type)
    }
}

impl fmt::Debug for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}={}", self.name, self.clickhouse_type, self.value)
    }
}

/// A named SQL statement with its bound parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    name: &'static str,
    sql: String,
    params: Vec<Param>,
}

/// Type of the `since` parameter.
pub(crate) const SINCE_TYPE: &str = "Int64";

/// Type of the `keys` parameter.
pub(crate) const KEYS_TYPE: &str = "Array(Tuple(String, UInt32))";

impl Query {
    /// Creates a statement with no parameters.
    #[must_use]
    pub fn new(name: &'static str, sql: impl Into<String>) -> Self {
        Self {
            name,
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    /// Binds a timestamp as Unix seconds.
    #[must_use]
    pub fn bind_timestamp(self, name: &'static str, value: DateTime<Utc>) -> Self {
        self.bind(name, SINCE_TYPE, value.timestamp().to_string())
    }

    /// Binds a list of turn keys as an array of `(thread_id, turn_index)`
    /// tuples.
    #[must_use]
    pub fn bind_turn_keys(self, name: &'static str, keys: &[TurnKey]) -> Self {
        let tuples: Vec<String> = keys
            .iter()
            .map(|key| format!("({},{})", quote(&key.thread_id), key.turn_index))
            .collect();
        self.bind(name, KEYS_TYPE, format!("[{}]", tuples.join(",")))
    }

    fn bind(mut self, name: &'static str, clickhouse_type: &'static str, value: String) -> Self {
        self.params.push(Param {
            name,
            clickhouse_type,
            value,
        });
        self
    }

    /// Returns the statement name, used in logs and errors.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Returns the SQL text.
    #[must_use]
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Returns the bound parameters.
    #[must_use]
    pub fn params(&self) -> &[Param] {
        &self.params
    }

    /// Returns the bound value for `name`.
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|p| p.name == name)
            .map(Param::value)
    }
}

/// Quotes a string for a ClickHouse literal.
fn quote(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('\'');
    for c in value.chars() {
        match c {
            '\\' => quoted.push_str("\\\\"),
            '\'' => quoted.push_str("\\'"),
            _ => quoted.push(c),
        }
    }
    quoted.push('\'');
    quoted
}
