//! gradeflow-scheduler — the continuous grading core.
//!
//! Submissions flow: the scanner turns VERSION markers into
//! `GradingQueue` entries, the queue orders them by the fairness key,
//! the `WorkerPool` runs a bounded number of `GradingHarness` jobs,
//! and the `ControlLoop` drives the whole cycle until the stop file
//! appears. VCS access and report production sit behind the `Vcs` and
//! `GradingHarness` traits so the daemon decides the concrete backends.

pub mod control;
pub mod harness;
pub mod pool;
pub mod queue;
pub mod scanner;
pub mod vcs;

pub use control::ControlLoop;
pub use harness::{CommandHarness, GradingHarness, ScenarioHarness};
pub use pool::WorkerPool;
pub use queue::GradingQueue;
pub use scanner::scan;
pub use vcs::{NoVcs, SvnClient, Vcs};
