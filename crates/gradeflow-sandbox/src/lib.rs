//! gradeflow-sandbox — isolated Docker sandboxes for test scenarios.
//!
//! One `SandboxSession` per test scenario: an optional isolated
//! network plus an ordered group of containers. Containers start in
//! declaration order with a fixed inter-start delay, waits are bounded
//! by a per-container timeout (timeout is an outcome, not an error),
//! and `cleanup` tears down every provisioned resource no matter how
//! the run ended.
//!
//! Every container and network carries a `gradeflow.session` label so
//! resources orphaned by a killed process can be swept at startup.

pub mod compile;
pub mod error;
pub mod session;
pub mod sweep;

pub use bollard::Docker;
pub use compile::compile;
pub use error::{SandboxError, SandboxResult};
pub use session::{
    ContainerOutcome, ContainerSpec, SandboxSession, SESSION_LABEL, TIMEOUT_EXIT_CODE, connect,
};
pub use sweep::sweep_orphans;
