//! ControlLoop — the scheduling cycle that ties everything together.
//!
//! Each tick: sync the watch tree (throttled), reclaim finished worker
//! slots, scan for new submissions, admit queue entries into free
//! slots, regenerate the dashboard if anything changed, and flush the
//! ledger. The loop runs until the stop file appears, then drains
//! in-flight jobs and exits.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use gradeflow_core::GraderConfig;
use gradeflow_state::AttemptLedger;
use tracing::{error, info, warn};

use crate::harness::GradingHarness;
use crate::pool::WorkerPool;
use crate::queue::GradingQueue;
use crate::scanner;
use crate::vcs::Vcs;

pub struct ControlLoop<H, V> {
    config: GraderConfig,
    queue: GradingQueue,
    pool: WorkerPool<H, V>,
    ledger: AttemptLedger,
    vcs: Arc<tokio::sync::Mutex<V>>,
    stop_path: PathBuf,
    last_sync: Option<Instant>,
}

impl<H: GradingHarness, V: Vcs> ControlLoop<H, V> {
    pub fn new(config: GraderConfig, harness: H, vcs: V, ledger: AttemptLedger) -> Self {
        let vcs = Arc::new(tokio::sync::Mutex::new(vcs));
        let pool = WorkerPool::new(
            harness,
            Arc::clone(&vcs),
            ledger.clone(),
            config.outfile_prefix.clone(),
            config.publish,
            config.max_concurrency,
        );
        // A relative stop file lives in the watch tree, so submitting
        // it through the VCS stops the daemon remotely.
        let stop_path = if config.stop_file.is_absolute() {
            config.stop_file.clone()
        } else {
            config.watch_dir.join(&config.stop_file)
        };
        Self {
            config,
            queue: GradingQueue::new(),
            pool,
            ledger,
            vcs,
            stop_path,
            last_sync: None,
        }
    }

    /// Run until the stop file appears, then drain and flush.
    pub async fn run(&mut self) -> anyhow::Result<()> {
        info!(watch_dir = ?self.config.watch_dir, task = %self.config.task,
            max_concurrency = self.config.max_concurrency, "scheduler started");

        // A stop file left by the previous graceful shutdown would
        // stop this run before it starts.
        if self.stop_path.exists() {
            info!(stop_file = ?self.stop_path, "deleting stale stop file");
            if let Err(e) = std::fs::remove_file(&self.stop_path) {
                warn!(stop_file = ?self.stop_path, error = %e, "failed to delete stale stop file");
            }
        }

        loop {
            if self.stop_path.exists() {
                info!(stop_file = ?self.stop_path, "stop file found, shutting down");
                break;
            }
            self.tick().await;

            let idle = self.queue.is_empty() && self.pool.active() == 0;
            let secs = if idle {
                self.config.idle_interval_secs
            } else {
                self.config.tick_interval_secs
            };
            tokio::time::sleep(Duration::from_secs(secs)).await;
        }

        self.pool.drain().await;
        self.ledger.flush()?;
        self.write_dashboard();
        info!("scheduler stopped");
        Ok(())
    }

    async fn tick(&mut self) {
        self.maybe_sync().await;

        let reclaimed = self.pool.reconcile();
        let in_flight = self.pool.active_submitters();
        let queued = scanner::scan(
            &self.config.watch_dir,
            &self.config.task,
            &self.config.outfile_prefix,
            &self.ledger,
            &in_flight,
            &mut self.queue,
        );

        let mut dirty = reclaimed > 0 || queued > 0;
        while self.pool.has_capacity() {
            let Some(entry) = self.queue.pop() else { break };
            self.pool.spawn(entry);
            // Each admission gets its own snapshot, which also covers
            // any scan changes still marked dirty.
            self.write_dashboard();
            dirty = false;
        }
        if dirty {
            self.write_dashboard();
        }
        if let Err(e) = self.ledger.flush() {
            error!(error = %e, "ledger flush failed");
        }
    }

    /// Sync the watch tree, at most once per configured interval.
    /// Failures are logged and retried next interval; the previous
    /// working copy keeps getting scanned meanwhile.
    async fn maybe_sync(&mut self) {
        let due = self
            .last_sync
            .is_none_or(|at| at.elapsed() >= Duration::from_secs(self.config.sync_interval_secs));
        if !due {
            return;
        }
        {
            let vcs = self.vcs.lock().await;
            if let Err(e) = vcs.sync(&self.config.watch_dir).await {
                warn!(error = %e, "watch tree sync failed");
            }
        }
        self.last_sync = Some(Instant::now());
    }

    fn write_dashboard(&self) {
        let active = self.pool.active_entries();
        let queued = self.queue.sorted();
        if let Err(e) = gradeflow_dashboard::write_page(
            &self.config.dashboard_path,
            &active,
            &queued,
            self.config.idle_interval_secs,
        ) {
            error!(path = ?self.config.dashboard_path, error = %e, "dashboard write failed");
        }
    }
}
