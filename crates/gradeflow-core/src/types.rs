//! Queue entries, version markers, and grading-report parsing.

use std::cmp::Ordering;
use std::path::PathBuf;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;

/// Upper bound on how many attempt units a single request can cost.
///
/// A targeted re-run of `s` tests costs `min(s, CAP)` units; a full run
/// costs the full `CAP`. Raw attempts dominate over time, so fairness
/// still converges.
pub const ATTEMPT_COST_CAP: u32 = 10;

/// One pending grading request for a single submitter.
///
/// Ordering (and equality) follow the priority key
/// `(adjusted_attempts, submitted_at, version, submitter, test_subset)`,
/// ascending — lower sorts first and gets graded first.
#[derive(Debug, Clone)]
pub struct QueueEntry {
    /// Identity key for dedup and fairness; one live entry per submitter.
    pub submitter: String,
    /// Monotonically increasing snapshot number for this submitter.
    pub version: u64,
    /// When the entry was queued; tie-break and dashboard display.
    pub submitted_at: DateTime<Utc>,
    /// Versions already graded for this submitter, the fairness signal.
    pub attempts: u32,
    /// Tests to run; empty means run everything.
    pub test_subset: Vec<String>,
    /// Working-copy directory holding this version's code.
    pub source_dir: PathBuf,
}

impl QueueEntry {
    /// Attempts adjusted for how much work this request asks for.
    pub fn adjusted_attempts(&self) -> u32 {
        if self.test_subset.is_empty() {
            self.attempts + ATTEMPT_COST_CAP
        } else {
            self.attempts + (self.test_subset.len() as u32).min(ATTEMPT_COST_CAP)
        }
    }

    fn sort_key(&self) -> (u32, DateTime<Utc>, u64, &str, &[String]) {
        (
            self.adjusted_attempts(),
            self.submitted_at,
            self.version,
            &self.submitter,
            &self.test_subset,
        )
    }
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.sort_key() == other.sort_key()
    }
}

impl Eq for QueueEntry {}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}

/// Parsed first line of a submission's VERSION file.
///
/// Format: `<version:int> [testName ...]`. The literal single test name
/// `all` clears the subset, meaning "run everything" — and, unlike an
/// absent subset, suppresses deriving a subset from previous failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionMarker {
    pub version: u64,
    pub tests: Vec<String>,
    /// The marker explicitly said `all`.
    pub all: bool,
}

impl VersionMarker {
    /// Parse the marker from file contents. Only the first line matters.
    pub fn parse(contents: &str) -> anyhow::Result<Self> {
        let line = contents.lines().next().unwrap_or("");
        let mut tokens = line.split_whitespace();
        let version = tokens
            .next()
            .ok_or_else(|| anyhow::anyhow!("empty version marker"))?
            .parse::<u64>()
            .map_err(|e| anyhow::anyhow!("bad version number: {e}"))?;
        let mut tests: Vec<String> = tokens.map(str::to_string).collect();
        let all = tests == ["all"];
        if all {
            tests.clear();
        }
        Ok(Self {
            version,
            tests,
            all,
        })
    }
}

/// Output artifact name for a graded version, written beside the
/// submission: `<prefix>.<version>`.
pub fn artifact_name(prefix: &str, version: u64) -> String {
    format!("{prefix}.{version}")
}

static FAILED_LINE: OnceLock<Regex> = OnceLock::new();

/// Scrape the failing test names out of a grading report.
///
/// The harness emits one `Test <name> Failed` line per failing test;
/// the scanner feeds these back as the next version's targeted subset.
pub fn failed_tests(report: &str) -> Vec<String> {
    let re = FAILED_LINE
        .get_or_init(|| Regex::new(r"Test ([\w_.]+) Failed").expect("static regex is valid"));
    report
        .lines()
        .filter_map(|line| re.captures(line))
        .map(|caps| caps[1].to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(attempts: u32, at: i64, version: u64, name: &str, tests: &[&str]) -> QueueEntry {
        QueueEntry {
            submitter: name.to_string(),
            version,
            submitted_at: DateTime::from_timestamp(at, 0).unwrap(),
            attempts,
            test_subset: tests.iter().map(|t| t.to_string()).collect(),
            source_dir: PathBuf::from("/dev/null"),
        }
    }

    #[test]
    fn time_is_the_tiebreak_of_last_resort() {
        assert!(entry(0, 0, 0, "foo", &[]) < entry(0, 10, 0, "bar", &[]));
    }

    #[test]
    fn attempts_trump_time() {
        assert!(entry(0, 10, 0, "foo", &[]) < entry(1, 0, 0, "bar", &[]));
    }

    #[test]
    fn short_subset_beats_full_run() {
        let targeted = entry(1, 0, 0, "foo", &["one"]);
        let full = entry(0, 0, 0, "bar", &[]);
        assert!(targeted.adjusted_attempts() < full.adjusted_attempts());
        assert!(targeted < full);
    }

    #[test]
    fn short_subset_beats_long_subset() {
        assert!(entry(0, 0, 0, "foo", &["one"]) < entry(0, 0, 0, "bar", &["a", "b", "c", "d"]));
    }

    #[test]
    fn subset_cost_is_capped() {
        let names: Vec<String> = (0..50).map(|i| format!("t{i}")).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let huge = entry(0, 0, 0, "foo", &refs);
        let full = entry(0, 0, 0, "bar", &[]);
        assert_eq!(huge.adjusted_attempts(), full.adjusted_attempts());
    }

    #[test]
    fn fresh_submitter_sorts_before_veteran() {
        let a = entry(0, 5, 3, "a", &[]);
        let b = entry(3, 5, 3, "b", &[]);
        assert!(a < b);
    }

    #[test]
    fn marker_with_tests() {
        let m = VersionMarker::parse("7 testA testB\n").unwrap();
        assert_eq!(m.version, 7);
        assert_eq!(m.tests, vec!["testA", "testB"]);
        assert!(!m.all);
    }

    #[test]
    fn marker_all_means_no_subset() {
        let m = VersionMarker::parse("7 all").unwrap();
        assert_eq!(m.version, 7);
        assert!(m.tests.is_empty());
        assert!(m.all);
    }

    #[test]
    fn marker_bare_version() {
        let m = VersionMarker::parse("12\n").unwrap();
        assert_eq!(m.version, 12);
        assert!(m.tests.is_empty());
        assert!(!m.all);
    }

    #[test]
    fn marker_all_among_others_is_a_plain_name() {
        // Only the sole token `all` is special.
        let m = VersionMarker::parse("3 all extra").unwrap();
        assert_eq!(m.tests, vec!["all", "extra"]);
        assert!(!m.all);
    }

    #[test]
    fn marker_rejects_garbage() {
        assert!(VersionMarker::parse("").is_err());
        assert!(VersionMarker::parse("not-a-number tests").is_err());
        assert!(VersionMarker::parse("-3").is_err());
    }

    #[test]
    fn marker_ignores_later_lines() {
        let m = VersionMarker::parse("4 t1\nthis line is noise\n").unwrap();
        assert_eq!(m.version, 4);
        assert_eq!(m.tests, vec!["t1"]);
    }

    #[test]
    fn failed_tests_scraped_from_report() {
        let report = "Test alpha Passed\nTest beta_2 Failed\nnoise\nTest g.amma Failed\n";
        assert_eq!(failed_tests(report), vec!["beta_2", "g.amma"]);
    }

    #[test]
    fn failed_tests_empty_when_all_pass() {
        assert!(failed_tests("Test alpha Passed\n").is_empty());
    }

    #[test]
    fn artifact_naming() {
        assert_eq!(artifact_name("GRADING_OUTPUTv1", 9), "GRADING_OUTPUTv1.9");
    }
}
