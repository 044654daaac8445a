//! gradeflow-state — the durable attempt ledger.
//!
//! Backed by [redb](https://docs.rs/redb): one table mapping submitter
//! name to the JSON-serialized set of graded version numbers. The
//! ledger is held in memory as the source of truth during a run and
//! flushed after every scheduling cycle, so a committed
//! `record_graded` survives a crash while an in-flight grading run is
//! simply retried on the next scan.
//!
//! A cooperative exclusive file lock (`ProcessLock`) keeps two
//! scheduler instances from mutating the same ledger; the second
//! instance fails fast instead of corrupting state.

pub mod error;
pub mod ledger;
pub mod lock;
pub mod tables;

pub use error::{StateError, StateResult};
pub use ledger::AttemptLedger;
pub use lock::ProcessLock;
