//! Deterministic names for generated database objects.
//!
//! Postgres identifiers are capped at 63 bytes, so generated names embed a
//! truncated SHA-256 of their identity instead of the raw identity. The same
//! inputs always produce the same name, which is what lets every operation
//! here recognize an existing object instead of re-creating it.

use sha2::{Digest, Sha256};

/// Suffix appended to a table name to form its partitioned sibling.
pub const PARTITIONED_SUFFIX: &str = "_part";

/// Suffix appended to a table name when it is archived at cutover.
pub const ARCHIVED_SUFFIX: &str = "_archived";

/// First 10 hex chars of the SHA-256 of an identity string.
pub fn hashed_identifier(identity: &str) -> String {
    let digest = Sha256::digest(identity.as_bytes());
    hex::encode(digest)[..10].to_string()
}

/// Name of the partitioned sibling for a source table.
pub fn partitioned_table_name(table: &str) -> String {
    format!("{}{}", table, PARTITIONED_SUFFIX)
}

/// Name the source table takes when replaced at cutover.
pub fn archived_table_name(table: &str) -> String {
    format!("{}{}", table, ARCHIVED_SUFFIX)
}

/// Name of the dual-write sync function for a source table.
pub fn sync_function_name(table: &str) -> String {
    format!("table_sync_function_{}", hashed_identifier(table))
}

/// Name of the dual-write sync trigger for a source table.
pub fn sync_trigger_name(table: &str) -> String {
    format!("table_sync_trigger_{}", hashed_identifier(table))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hashed_identifier_is_deterministic() {
        assert_eq!(hashed_identifier("events"), hashed_identifier("events"));
        assert_ne!(hashed_identifier("events"), hashed_identifier("uploads"));
        assert_eq!(hashed_identifier("events").len(), 10);
    }

    #[test]
    fn test_generated_names() {
        assert_eq!(partitioned_table_name("events"), "events_part");
        assert_eq!(archived_table_name("events"), "events_archived");
        assert!(sync_function_name("events").starts_with("table_sync_function_"));
        assert!(sync_trigger_name("events").starts_with("table_sync_trigger_"));
        assert_ne!(sync_function_name("events"), sync_function_name("uploads"));
    }
}
