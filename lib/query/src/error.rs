//! Query error types.

use std::fmt;

/// Errors from running analytics queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    /// The event store could not be reached.
    Transport {
        /// Error details.
        details: String,
    },
    /// The event store rejected the query.
    Server {
        /// HTTP status returned by the store.
        status: u16,
        /// The store's error message.
        details: String,
    },
    /// A returned row did not have the expected shape.
    Decode {
        /// Which query produced the row.
        query: &'static str,
        /// Error details.
        details: String,
    },
    /// A caller-supplied value was out of range.
    InvalidInput {
        /// Error details.
        details: String,
    },
}

impl QueryError {
    /// Returns true if running the same query again may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport { details } => {
                write!(f, "event store unreachable: {}", details)
            }
            Self::Server { status, details } => {
                write!(f, "event store rejected query (HTTP {}): {}", status, details)
            }
            Self::Decode { query, details } => {
                write!(f, "unexpected row from '{}': {}", query, details)
            }
            Self::InvalidInput { details } => {
                write!(f, "invalid query input: {}", details)
            }
        }
    }
}

impl std::error::Error for QueryError {}
