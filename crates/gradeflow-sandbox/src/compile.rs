//! Single-container compile convenience operation.
//!
//! Copies a submission tree into a work area, bind-mounts it into the
//! task's compile image, and reports whether compilation exited 0.
//! Layered on the session primitive; not part of the scheduling core.

use std::path::Path;
use std::time::Duration;

use bollard::Docker;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::error::SandboxResult;
use crate::session::{ContainerOutcome, ContainerSpec, SandboxSession};

/// Mount point the compile image expects the sources under.
const COMPILE_MOUNT: &str = "/compile";

/// Compile a submission with the given image.
///
/// `src` is copied to `dst/compile` (created fresh) and bind-mounted
/// read-write at `/compile`. A timeout counts as a failed compile, not
/// an error.
pub async fn compile(
    docker: Docker,
    image: &str,
    src: &Path,
    dst: &Path,
    timeout: Duration,
) -> SandboxResult<bool> {
    let work = dst.join("compile");
    copy_tree(src, &work)?;

    let mut session = SandboxSession::new(docker, "compile", Duration::ZERO);
    session.add_container(
        ContainerSpec::new("compile", image)
            .bind(format!("{}:{COMPILE_MOUNT}:rw", work.display())),
    )?;

    let run_result = session.run(Some(timeout), &[]).await;
    let passed = matches!(session.outcome("compile"), Some(o) if o.passed());
    let timed_out = matches!(
        session.outcome("compile"),
        Some(ContainerOutcome::Exited(code)) if *code == crate::session::TIMEOUT_EXIT_CODE
    );
    session.cleanup().await?;
    run_result?;

    if timed_out {
        warn!(?src, "compilation timed out");
    } else {
        info!(?src, passed, "compilation finished");
    }
    Ok(passed)
}

/// Recursively copy a directory tree, replacing any existing target.
fn copy_tree(src: &Path, dst: &Path) -> std::io::Result<()> {
    if dst.exists() {
        std::fs::remove_dir_all(dst)?;
    }
    for entry in WalkDir::new(src) {
        let entry = entry.map_err(std::io::Error::other)?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(std::io::Error::other)?;
        let target = dst.join(rel);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)?;
        } else if entry.file_type().is_file() {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}
