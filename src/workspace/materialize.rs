//! Materializers populate a fresh workspace directory from a source ref.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;
use walkdir::WalkDir;

use crate::error::WorkspaceError;

/// Fills `target` (which does not exist yet) with the content behind `source_ref`.
///
/// Implementations must leave partial output in `target` on failure; the
/// workspace manager removes it.
#[async_trait]
pub trait Materializer: Send + Sync {
    /// Materializes `source_ref` into `target`.
    async fn materialize(&self, source_ref: &str, target: &Path) -> Result<(), WorkspaceError>;
}

/// Shallow single-branch `git clone`.
#[derive(Debug, Clone)]
pub struct GitMaterializer {
    git_binary: PathBuf,
}

impl Default for GitMaterializer {
    fn default() -> Self {
        Self {
            git_binary: PathBuf::from("git"),
        }
    }
}

impl GitMaterializer {
    /// Creates a materializer using `git` from `PATH`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses a specific git executable.
    pub fn with_git_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.git_binary = binary.into();
        self
    }
}

#[async_trait]
impl Materializer for GitMaterializer {
    async fn materialize(&self, source_ref: &str, target: &Path) -> Result<(), WorkspaceError> {
        debug!(source = source_ref, target = %target.display(), "Cloning");

        // The child is killed if the manager's timeout drops this future.
        let output = Command::new(&self.git_binary)
            .args(["clone", "--depth", "1", "--single-branch", "--quiet", "--"])
            .arg(source_ref)
            .arg(target)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| WorkspaceError::MaterializeFailed {
                source_ref: source_ref.to_string(),
                reason: format!("failed to run git: {}", e),
            })?;

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let reason = stderr
            .lines()
            .rev()
            .find(|l| !l.trim().is_empty())
            .map(|l| l.trim().to_string())
            .unwrap_or_else(|| format!("git exited with {}", output.status));
        Err(WorkspaceError::MaterializeFailed {
            source_ref: source_ref.to_string(),
            reason,
        })
    }
}

/// Copies a local directory tree. Symlinks are not followed or copied.
#[derive(Debug, Clone, Default)]
pub struct DirectoryMaterializer;

impl DirectoryMaterializer {
    /// Creates a directory materializer.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Materializer for DirectoryMaterializer {
    async fn materialize(&self, source_ref: &str, target: &Path) -> Result<(), WorkspaceError> {
        let source = PathBuf::from(source_ref);
        let target = target.to_path_buf();
        let source_label = source_ref.to_string();

        // The copy runs on a blocking thread that a timeout cannot abort, so
        // dropping this future flags it to stop.
        let cancel = CancelOnDrop::default();
        let cancelled = cancel.flag.clone();

        let copied = tokio::task::spawn_blocking(move || {
            let copied = copy_tree(&source, &target, &cancelled);
            if cancelled.load(Ordering::SeqCst) {
                let _ = fs::remove_dir_all(&target);
            }
            copied
        })
        .await;
        drop(cancel);

        copied
            .map_err(|e| WorkspaceError::Join(e.to_string()))?
            .map_err(|e| WorkspaceError::MaterializeFailed {
                source_ref: source_label,
                reason: e.to_string(),
            })
    }
}

/// Sets its flag when dropped.
#[derive(Default)]
struct CancelOnDrop {
    flag: Arc<AtomicBool>,
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.flag.store(true, Ordering::SeqCst);
    }
}

fn copy_tree(source: &Path, target: &Path, cancelled: &AtomicBool) -> std::io::Result<()> {
    if !source.is_dir() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("{} is not a directory", source.display()),
        ));
    }

    fs::create_dir_all(target)?;
    for entry in WalkDir::new(source).follow_links(false) {
        if cancelled.load(Ordering::SeqCst) {
            return Err(std::io::Error::new(
                std::io::ErrorKind::Interrupted,
                "copy cancelled",
            ));
        }
        let entry = entry.map_err(std::io::Error::other)?;
        let rel = match entry.path().strip_prefix(source) {
            Ok(rel) if !rel.as_os_str().is_empty() => rel,
            _ => continue,
        };
        let dest = target.join(rel);
        let file_type = entry.file_type();
        if file_type.is_dir() {
            fs::create_dir_all(&dest)?;
        } else if file_type.is_file() {
            fs::copy(entry.path(), &dest)?;
        }
    }
    Ok(())
}
