//! Analytics queries over Gist turn, thread, and citation events.
//!
//! [`AnalyticsRepository`] builds parameterized ClickHouse statements and
//! decodes their rows. Running a statement is delegated to an
//! [`EventStore`]; the server binary supplies the HTTP implementation.

mod bucket;
mod error;
mod event;
mod filter;
mod query;
mod repository;
mod store;

pub use bucket::{Bound, BucketClass, BucketScheme, FIXED_LENGTH_MAX};
pub use error::QueryError;
pub use event::{
    CitationDetail, DailyCount, DistributionRow, ResponseType, ResponseTypeCount, TurnKey,
    TurnRow, TurnWithCitations, TurnsPage, WeeklyTrend,
};
pub use filter::{
    DEFAULT_PAGE_SIZE, DateFilter, ListingPeriod, PAGE_SIZES, Page, PageRequest, TrendPeriod,
};
pub use query::{Param, Query};
pub use repository::{AnalyticsRepository, DEFAULT_DAILY_WINDOW_DAYS};
pub use store::EventStore;
