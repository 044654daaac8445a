//! gradeflow-dashboard — the static queue status page.
//!
//! Regenerated by the control loop whenever the queue or the worker
//! pool changes: active jobs first (highlighted), then waiting entries
//! in priority order. The page self-refreshes via a meta tag; no
//! server involved, the file is typically committed or served as-is.

use std::path::Path;

use askama::Template;
use chrono::Utc;
use gradeflow_core::QueueEntry;
use tracing::{debug, error};

#[derive(Template)]
#[template(path = "queue.html")]
struct QueuePage {
    generated_at: String,
    refresh_secs: u64,
    rows: Vec<Row>,
}

struct Row {
    submitter: String,
    version: u64,
    tests: String,
    since: String,
    attempts: u32,
    active: bool,
}

impl Row {
    fn from_entry(entry: &QueueEntry, active: bool) -> Self {
        Self {
            submitter: entry.submitter.clone(),
            version: entry.version,
            tests: if entry.test_subset.is_empty() {
                "all".to_string()
            } else {
                entry.test_subset.join(" ")
            },
            since: entry.submitted_at.format("%H:%M:%S").to_string(),
            attempts: entry.attempts,
            active,
        }
    }
}

/// Render the page: active jobs first, then queued entries, which the
/// caller supplies already in priority order.
pub fn render(active: &[QueueEntry], queued: &[QueueEntry], refresh_secs: u64) -> String {
    let rows = active
        .iter()
        .map(|e| Row::from_entry(e, true))
        .chain(queued.iter().map(|e| Row::from_entry(e, false)))
        .collect();
    let page = QueuePage {
        generated_at: Utc::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        refresh_secs,
        rows,
    };
    page.render().unwrap_or_else(|e| {
        error!(error = %e, "failed to render queue page");
        format!("queue page render error: {e}")
    })
}

/// Render and write the page to its configured location.
pub fn write_page(
    path: &Path,
    active: &[QueueEntry],
    queued: &[QueueEntry],
    refresh_secs: u64,
) -> std::io::Result<()> {
    let html = render(active, queued, refresh_secs);
    std::fs::write(path, html)?;
    debug!(?path, active = active.len(), queued = queued.len(), "queue page written");
    Ok(())
}
