//! WorkerPool — bounded set of concurrent grading tasks.
//!
//! Each admitted entry becomes one tokio task that runs the harness,
//! records the result in the ledger, writes the output artifact, and
//! publishes it. Slots are reclaimed by `reconcile`, called from the
//! control loop; a crashed task simply frees its slot and the entry is
//! re-queued by the next scan.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use gradeflow_core::{QueueEntry, artifact_name};
use gradeflow_state::AttemptLedger;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::harness::GradingHarness;
use crate::vcs::Vcs;

struct GraderJob {
    entry: QueueEntry,
    handle: JoinHandle<()>,
}

/// Shared pieces every grading task needs.
struct PoolShared<H, V> {
    harness: H,
    vcs: Arc<tokio::sync::Mutex<V>>,
    ledger: AttemptLedger,
    outfile_prefix: String,
    publish: bool,
}

pub struct WorkerPool<H, V> {
    shared: Arc<PoolShared<H, V>>,
    jobs: Vec<GraderJob>,
    capacity: usize,
}

impl<H: GradingHarness, V: Vcs> WorkerPool<H, V> {
    pub fn new(
        harness: H,
        vcs: Arc<tokio::sync::Mutex<V>>,
        ledger: AttemptLedger,
        outfile_prefix: impl Into<String>,
        publish: bool,
        capacity: usize,
    ) -> Self {
        Self {
            shared: Arc::new(PoolShared {
                harness,
                vcs,
                ledger,
                outfile_prefix: outfile_prefix.into(),
                publish,
            }),
            jobs: Vec::new(),
            capacity,
        }
    }

    pub fn active(&self) -> usize {
        self.jobs.len()
    }

    pub fn has_capacity(&self) -> bool {
        self.jobs.len() < self.capacity
    }

    /// Submitters with a grading task in flight; the scanner must not
    /// re-queue them.
    pub fn active_submitters(&self) -> HashSet<String> {
        self.jobs
            .iter()
            .map(|job| job.entry.submitter.clone())
            .collect()
    }

    /// Entries currently being graded, for the dashboard.
    pub fn active_entries(&self) -> Vec<QueueEntry> {
        self.jobs.iter().map(|job| job.entry.clone()).collect()
    }

    /// Drop finished jobs and return how many slots were reclaimed.
    pub fn reconcile(&mut self) -> usize {
        let before = self.jobs.len();
        self.jobs.retain(|job| !job.handle.is_finished());
        before - self.jobs.len()
    }

    /// Start grading an entry. The caller checks `has_capacity` first;
    /// admitting over capacity is a scheduling bug.
    pub fn spawn(&mut self, entry: QueueEntry) {
        debug_assert!(self.has_capacity());
        let shared = Arc::clone(&self.shared);
        let task_entry = entry.clone();
        let handle = tokio::spawn(async move {
            grade_one(shared, task_entry).await;
        });
        self.jobs.push(GraderJob { entry, handle });
    }

    /// Wait for every in-flight job to finish.
    pub async fn drain(&mut self) {
        info!(in_flight = self.jobs.len(), "draining worker pool");
        for job in self.jobs.drain(..) {
            if let Err(e) = job.handle.await {
                error!(submitter = %job.entry.submitter, error = %e, "grading task panicked");
            }
        }
    }
}

async fn grade_one<H: GradingHarness, V: Vcs>(shared: Arc<PoolShared<H, V>>, entry: QueueEntry) {
    info!(submitter = %entry.submitter, version = entry.version,
        subset = ?entry.test_subset, "grading started");

    let report = match shared.harness.grade(&entry).await {
        Ok(report) => report,
        Err(e) => {
            // No ledger record: the next scan re-queues this version.
            error!(submitter = %entry.submitter, version = entry.version,
                error = %e, "grading crashed, will retry");
            return;
        }
    };

    shared.ledger.record_graded(&entry.submitter, entry.version);

    let artifact = entry
        .source_dir
        .join(artifact_name(&shared.outfile_prefix, entry.version));
    if let Err(e) = write_artifact(&artifact, &report).await {
        error!(submitter = %entry.submitter, ?artifact, error = %e,
            "failed to write output artifact");
        return;
    }

    if shared.publish {
        let message = format!(
            "Autograder output for {} version {}",
            entry.submitter, entry.version
        );
        let vcs = shared.vcs.lock().await;
        if let Err(e) = vcs.publish(&artifact, &message).await {
            error!(submitter = %entry.submitter, ?artifact, error = %e,
                "failed to publish output artifact");
        }
    }

    info!(submitter = %entry.submitter, version = entry.version, "grading finished");
}

async fn write_artifact(path: &Path, report: &[u8]) -> std::io::Result<()> {
    if tokio::fs::try_exists(path).await.unwrap_or(false) {
        warn!(?path, "overwriting existing output artifact");
    }
    tokio::fs::write(path, report).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::path::{Path, PathBuf};
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    struct FakeHarness {
        reports: StdMutex<Vec<(String, anyhow::Result<Vec<u8>>)>>,
        delay: Duration,
    }

    impl FakeHarness {
        fn new(delay: Duration) -> Self {
            Self {
                reports: StdMutex::new(Vec::new()),
                delay,
            }
        }

        fn respond(&self, submitter: &str, result: anyhow::Result<Vec<u8>>) {
            self.reports
                .lock()
                .unwrap()
                .push((submitter.to_string(), result));
        }
    }

    impl GradingHarness for Arc<FakeHarness> {
        async fn grade(&self, entry: &QueueEntry) -> anyhow::Result<Vec<u8>> {
            tokio::time::sleep(self.delay).await;
            let mut reports = self.reports.lock().unwrap();
            let index = reports
                .iter()
                .position(|(name, _)| name == &entry.submitter)
                .expect("unexpected grade call");
            reports.remove(index).1
        }
    }

    #[derive(Default)]
    struct FakeVcs {
        published: StdMutex<Vec<(PathBuf, String)>>,
    }

    impl Vcs for Arc<FakeVcs> {
        async fn sync(&self, _path: &Path) -> anyhow::Result<()> {
            Ok(())
        }

        async fn publish(&self, path: &Path, message: &str) -> anyhow::Result<()> {
            self.published
                .lock()
                .unwrap()
                .push((path.to_path_buf(), message.to_string()));
            Ok(())
        }
    }

    fn entry(submitter: &str, version: u64, source_dir: &Path) -> QueueEntry {
        QueueEntry {
            submitter: submitter.to_string(),
            version,
            submitted_at: Utc::now(),
            attempts: 0,
            test_subset: Vec::new(),
            source_dir: source_dir.to_path_buf(),
        }
    }

    fn pool(
        harness: Arc<FakeHarness>,
        vcs: Arc<FakeVcs>,
        ledger: AttemptLedger,
        publish: bool,
        capacity: usize,
    ) -> WorkerPool<Arc<FakeHarness>, Arc<FakeVcs>> {
        WorkerPool::new(
            harness,
            Arc::new(tokio::sync::Mutex::new(vcs)),
            ledger,
            "OUT",
            publish,
            capacity,
        )
    }

    #[tokio::test]
    async fn success_records_writes_and_publishes() {
        let dir = tempfile::tempdir().unwrap();
        let harness = Arc::new(FakeHarness::new(Duration::ZERO));
        harness.respond("alice", Ok(b"Test alpha Passed\n".to_vec()));
        let vcs = Arc::new(FakeVcs::default());
        let ledger = AttemptLedger::open_in_memory().unwrap();

        let mut pool = pool(Arc::clone(&harness), Arc::clone(&vcs), ledger.clone(), true, 2);
        pool.spawn(entry("alice", 3, dir.path()));
        pool.drain().await;

        assert!(ledger.is_graded("alice", 3));
        let artifact = dir.path().join("OUT.3");
        assert_eq!(std::fs::read(&artifact).unwrap(), b"Test alpha Passed\n");

        let published = vcs.published.lock().unwrap();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, artifact);
        assert_eq!(published[0].1, "Autograder output for alice version 3");
    }

    #[tokio::test]
    async fn crash_leaves_no_record_and_no_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let harness = Arc::new(FakeHarness::new(Duration::ZERO));
        harness.respond("bob", Err(anyhow::anyhow!("docker daemon unreachable")));
        let vcs = Arc::new(FakeVcs::default());
        let ledger = AttemptLedger::open_in_memory().unwrap();

        let mut pool = pool(Arc::clone(&harness), Arc::clone(&vcs), ledger.clone(), true, 2);
        pool.spawn(entry("bob", 1, dir.path()));
        pool.drain().await;

        assert!(!ledger.is_graded("bob", 1));
        assert!(!dir.path().join("OUT.1").exists());
        assert!(vcs.published.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn publish_disabled_still_writes_the_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let harness = Arc::new(FakeHarness::new(Duration::ZERO));
        harness.respond("carol", Ok(b"ok\n".to_vec()));
        let vcs = Arc::new(FakeVcs::default());
        let ledger = AttemptLedger::open_in_memory().unwrap();

        let mut pool = pool(Arc::clone(&harness), Arc::clone(&vcs), ledger.clone(), false, 1);
        pool.spawn(entry("carol", 2, dir.path()));
        pool.drain().await;

        assert!(dir.path().join("OUT.2").exists());
        assert!(vcs.published.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn capacity_and_reconcile_track_slots() {
        let dir = tempfile::tempdir().unwrap();
        let harness = Arc::new(FakeHarness::new(Duration::from_millis(50)));
        harness.respond("dave", Ok(b"r\n".to_vec()));
        harness.respond("erin", Ok(b"r\n".to_vec()));
        let vcs = Arc::new(FakeVcs::default());
        let ledger = AttemptLedger::open_in_memory().unwrap();

        let mut pool = pool(Arc::clone(&harness), vcs, ledger, false, 2);
        pool.spawn(entry("dave", 1, dir.path()));
        pool.spawn(entry("erin", 1, dir.path()));

        assert!(!pool.has_capacity());
        assert_eq!(
            pool.active_submitters(),
            HashSet::from(["dave".to_string(), "erin".to_string()])
        );

        pool.drain().await;
        assert_eq!(pool.reconcile(), 0);
        assert!(pool.has_capacity());
        assert_eq!(pool.active(), 0);
    }

    #[tokio::test]
    async fn reconcile_reclaims_finished_slots() {
        let dir = tempfile::tempdir().unwrap();
        let harness = Arc::new(FakeHarness::new(Duration::ZERO));
        harness.respond("frank", Ok(b"r\n".to_vec()));
        let vcs = Arc::new(FakeVcs::default());
        let ledger = AttemptLedger::open_in_memory().unwrap();

        let mut pool = pool(Arc::clone(&harness), vcs, ledger.clone(), false, 1);
        pool.spawn(entry("frank", 1, dir.path()));

        // Poll until the task finishes, then reconcile must free it.
        for _ in 0..100 {
            if ledger.is_graded("frank", 1) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        tokio::task::yield_now().await;
        while pool.reconcile() == 0 && pool.active() > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(pool.active(), 0);
    }
}
