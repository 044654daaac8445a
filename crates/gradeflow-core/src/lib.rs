//! gradeflow-core — shared domain types and configuration.
//!
//! Everything the scheduler, state store, and dashboard agree on lives
//! here: the queue entry and its priority key, the version-marker and
//! grading-report formats, and the TOML configuration.

pub mod config;
pub mod types;

pub use config::{ContainerConfig, GraderConfig, ScenarioConfig};
pub use types::{
    ATTEMPT_COST_CAP, QueueEntry, VersionMarker, artifact_name, failed_tests,
};
