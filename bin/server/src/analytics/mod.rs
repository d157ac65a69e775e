//! Analytics storage adapter and dashboard routes.

pub mod clickhouse;
pub mod routes;

pub use clickhouse::ClickHouseStore;
pub use routes::{daily, dashboard, distributions, health, me, trends, turns};
