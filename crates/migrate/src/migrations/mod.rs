//! Migration System
//!
//! Statement splitting, the migration source, the ledger protocol, ghost
//! repair and the runner that ties them together.

pub mod checksum;
pub mod definitions;
pub mod ledger;
pub mod repair;
pub mod runner;
pub mod source;
pub mod splitter;

pub use checksum::{checksum, new_record_id};
pub use definitions::*;
pub use ledger::MigrationLedger;
pub use repair::{expected_tables, repair_ghost_migrations};
pub use runner::MigrationRunner;
pub use source::{DirectorySource, MigrationSource, StaticSource};
pub use splitter::split_statements;
