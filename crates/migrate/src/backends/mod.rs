//! Database Client Abstractions
//!
//! The engine is written against `MigrationClient`; `PostgresClient` is the
//! production implementation.

pub mod core;
pub mod postgres;

pub use self::core::*;
pub use postgres::PostgresClient;
