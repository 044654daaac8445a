//! redb table definitions for the attempt ledger.

use redb::TableDefinition;

/// Graded versions keyed by submitter name; values are JSON-serialized
/// `BTreeSet<u64>`.
pub const ATTEMPTS: TableDefinition<&str, &[u8]> = TableDefinition::new("attempts");
