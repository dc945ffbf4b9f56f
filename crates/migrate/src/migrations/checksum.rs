//! Record identifiers and content checksums

use sha2::{Digest, Sha256};

/// Hex encoded SHA-256 of the migration SQL text
pub fn checksum(sql: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(sql.as_bytes());
    hex::encode(hasher.finalize())
}

/// Fresh identifier for a ledger record
pub fn new_record_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
