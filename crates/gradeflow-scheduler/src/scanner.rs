//! Submission scanner — turns VERSION markers on disk into queue entries.
//!
//! Layout watched: `<watch_dir>/<submitter>/<task>/VERSION`. Each scan
//! re-reads every marker; the queue's per-submitter dedup makes
//! rescanning an unchanged marker free.

use std::collections::HashSet;
use std::path::Path;

use chrono::Utc;
use gradeflow_core::{QueueEntry, VersionMarker, artifact_name, failed_tests};
use gradeflow_state::AttemptLedger;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::queue::GradingQueue;

/// One pass over the watch tree. Returns how many entries were queued
/// or superseded.
///
/// Skipped: submitters currently being graded (`in_flight`), versions
/// already in the ledger, and unparseable markers (logged, never
/// fatal). For a marker with no explicit subset, the failing tests of
/// the previous version's report become the subset; the literal `all`
/// marker suppresses that and forces a full run.
pub fn scan(
    watch_dir: &Path,
    task: &str,
    outfile_prefix: &str,
    ledger: &AttemptLedger,
    in_flight: &HashSet<String>,
    queue: &mut GradingQueue,
) -> usize {
    let mut queued = 0;

    for dir_entry in WalkDir::new(watch_dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_dir())
    {
        let Some(submitter) = dir_entry.file_name().to_str().map(str::to_string) else {
            continue;
        };
        let task_dir = dir_entry.path().join(task);
        let marker_path = task_dir.join("VERSION");
        if !marker_path.is_file() {
            continue;
        }

        let marker = match std::fs::read_to_string(&marker_path) {
            Ok(contents) => match VersionMarker::parse(&contents) {
                Ok(marker) => marker,
                Err(e) => {
                    warn!(%submitter, ?marker_path, error = %e, "unparseable version marker");
                    continue;
                }
            },
            Err(e) => {
                warn!(%submitter, ?marker_path, error = %e, "unreadable version marker");
                continue;
            }
        };

        if in_flight.contains(&submitter) {
            debug!(%submitter, "skipped, grading in flight");
            continue;
        }
        if ledger.is_graded(&submitter, marker.version) {
            continue;
        }

        let test_subset = resolve_subset(&marker, &task_dir, outfile_prefix, &submitter);
        let entry = QueueEntry {
            submitter: submitter.clone(),
            version: marker.version,
            submitted_at: Utc::now(),
            attempts: ledger.attempts(&submitter),
            test_subset,
            source_dir: task_dir,
        };
        if queue.push(entry) {
            queued += 1;
        }
    }

    queued
}

/// Decide which tests the entry should run.
///
/// Priority: an explicit subset in the marker wins; `all` forces a
/// full run; otherwise failures scraped from the previous version's
/// report become the subset, and a full run is the fallback.
fn resolve_subset(
    marker: &VersionMarker,
    task_dir: &Path,
    outfile_prefix: &str,
    submitter: &str,
) -> Vec<String> {
    if marker.all || !marker.tests.is_empty() {
        return marker.tests.clone();
    }
    let Some(previous) = marker.version.checked_sub(1) else {
        return Vec::new();
    };
    let report_path = task_dir.join(artifact_name(outfile_prefix, previous));
    match std::fs::read_to_string(&report_path) {
        Ok(report) => {
            let failed = failed_tests(&report);
            if !failed.is_empty() {
                debug!(%submitter, version = marker.version, subset = failed.len(),
                    "subset derived from previous failures");
            }
            failed
        }
        // No previous report (first submission, or artifact pruned).
        Err(_) => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    struct Tree {
        _dir: tempfile::TempDir,
        root: std::path::PathBuf,
    }

    fn tree() -> Tree {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        Tree { _dir: dir, root }
    }

    fn write_marker(tree: &Tree, submitter: &str, contents: &str) {
        let task_dir = tree.root.join(submitter).join("mp1");
        fs::create_dir_all(&task_dir).unwrap();
        fs::write(task_dir.join("VERSION"), contents).unwrap();
    }

    fn scan_once(
        tree: &Tree,
        ledger: &AttemptLedger,
        in_flight: &HashSet<String>,
        queue: &mut GradingQueue,
    ) -> usize {
        scan(&tree.root, "mp1", "OUT", ledger, in_flight, queue)
    }

    #[test]
    fn new_submission_is_queued_with_ledger_attempts() {
        let tree = tree();
        write_marker(&tree, "alice", "3\n");
        let ledger = AttemptLedger::open_in_memory().unwrap();
        ledger.record_graded("alice", 1);
        ledger.record_graded("alice", 2);

        let mut queue = GradingQueue::new();
        assert_eq!(scan_once(&tree, &ledger, &HashSet::new(), &mut queue), 1);

        let entry = queue.pop().unwrap();
        assert_eq!(entry.submitter, "alice");
        assert_eq!(entry.version, 3);
        assert_eq!(entry.attempts, 2);
        assert!(entry.test_subset.is_empty());
        assert_eq!(entry.source_dir, tree.root.join("alice/mp1"));
    }

    #[test]
    fn graded_version_is_skipped() {
        let tree = tree();
        write_marker(&tree, "bob", "2\n");
        let ledger = AttemptLedger::open_in_memory().unwrap();
        ledger.record_graded("bob", 2);

        let mut queue = GradingQueue::new();
        assert_eq!(scan_once(&tree, &ledger, &HashSet::new(), &mut queue), 0);
        assert!(queue.is_empty());
    }

    #[test]
    fn in_flight_submitter_is_skipped() {
        let tree = tree();
        write_marker(&tree, "carol", "5\n");
        let ledger = AttemptLedger::open_in_memory().unwrap();
        let in_flight = HashSet::from(["carol".to_string()]);

        let mut queue = GradingQueue::new();
        assert_eq!(scan_once(&tree, &ledger, &in_flight, &mut queue), 0);
    }

    #[test]
    fn subset_derived_from_previous_report_failures() {
        let tree = tree();
        write_marker(&tree, "dave", "4\n");
        fs::write(
            tree.root.join("dave/mp1/OUT.3"),
            "Test alpha Passed\nTest beta Failed\nTest gamma Failed\n",
        )
        .unwrap();
        let ledger = AttemptLedger::open_in_memory().unwrap();

        let mut queue = GradingQueue::new();
        scan_once(&tree, &ledger, &HashSet::new(), &mut queue);
        assert_eq!(queue.pop().unwrap().test_subset, vec!["beta", "gamma"]);
    }

    #[test]
    fn explicit_subset_wins_over_derivation() {
        let tree = tree();
        write_marker(&tree, "erin", "4 only_this\n");
        fs::write(tree.root.join("erin/mp1/OUT.3"), "Test beta Failed\n").unwrap();
        let ledger = AttemptLedger::open_in_memory().unwrap();

        let mut queue = GradingQueue::new();
        scan_once(&tree, &ledger, &HashSet::new(), &mut queue);
        assert_eq!(queue.pop().unwrap().test_subset, vec!["only_this"]);
    }

    #[test]
    fn all_marker_forces_full_run_despite_previous_failures() {
        let tree = tree();
        write_marker(&tree, "frank", "4 all\n");
        fs::write(tree.root.join("frank/mp1/OUT.3"), "Test beta Failed\n").unwrap();
        let ledger = AttemptLedger::open_in_memory().unwrap();

        let mut queue = GradingQueue::new();
        scan_once(&tree, &ledger, &HashSet::new(), &mut queue);
        assert!(queue.pop().unwrap().test_subset.is_empty());
    }

    #[test]
    fn clean_previous_report_means_full_run() {
        let tree = tree();
        write_marker(&tree, "grace", "2\n");
        fs::write(tree.root.join("grace/mp1/OUT.1"), "Test alpha Passed\n").unwrap();
        let ledger = AttemptLedger::open_in_memory().unwrap();

        let mut queue = GradingQueue::new();
        scan_once(&tree, &ledger, &HashSet::new(), &mut queue);
        assert!(queue.pop().unwrap().test_subset.is_empty());
    }

    #[test]
    fn malformed_marker_is_skipped_not_fatal() {
        let tree = tree();
        write_marker(&tree, "heidi", "not-a-version\n");
        write_marker(&tree, "ivan", "1\n");
        let ledger = AttemptLedger::open_in_memory().unwrap();

        let mut queue = GradingQueue::new();
        assert_eq!(scan_once(&tree, &ledger, &HashSet::new(), &mut queue), 1);
        assert_eq!(queue.pop().unwrap().submitter, "ivan");
    }

    #[test]
    fn rescan_of_unchanged_marker_is_a_noop() {
        let tree = tree();
        write_marker(&tree, "judy", "1\n");
        let ledger = AttemptLedger::open_in_memory().unwrap();

        let mut queue = GradingQueue::new();
        assert_eq!(scan_once(&tree, &ledger, &HashSet::new(), &mut queue), 1);
        assert_eq!(scan_once(&tree, &ledger, &HashSet::new(), &mut queue), 0);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn crashed_run_is_requeued_with_attempts_unchanged() {
        let tree = tree();
        write_marker(&tree, "lena", "3\n");
        let ledger = AttemptLedger::open_in_memory().unwrap();
        ledger.record_graded("lena", 1);
        ledger.record_graded("lena", 2);

        let mut queue = GradingQueue::new();
        scan_once(&tree, &ledger, &HashSet::new(), &mut queue);
        let first = queue.pop().unwrap();
        assert_eq!(first.attempts, 2);

        // The grading task crashed: version 3 never reached the
        // ledger, so the next scan queues it again at the same cost.
        let second_pass = scan_once(&tree, &ledger, &HashSet::new(), &mut queue);
        assert_eq!(second_pass, 1);
        let retry = queue.pop().unwrap();
        assert_eq!(retry.version, 3);
        assert_eq!(retry.attempts, 2);
    }

    #[test]
    fn directories_without_the_task_are_ignored() {
        let tree = tree();
        fs::create_dir_all(tree.root.join("stray/otherdir")).unwrap();
        write_marker(&tree, "kate", "1\n");
        let ledger = AttemptLedger::open_in_memory().unwrap();

        let mut queue = GradingQueue::new();
        assert_eq!(scan_once(&tree, &ledger, &HashSet::new(), &mut queue), 1);
    }
}
