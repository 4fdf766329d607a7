/// PostgreSQL persistence for job records.
///
/// This module provides `PostgresJobStore`, a PostgreSQL-backed
/// implementation of the [`JobStore`](crate::store::JobStore) trait.
pub mod postgres;

pub use postgres::PostgresJobStore;
