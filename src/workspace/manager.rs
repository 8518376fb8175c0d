//! Acquisition, extraction, release and sweeping of workspaces.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use tracing::{debug, info, warn};
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use crate::error::WorkspaceError;
use crate::utils::{format_mb, sanitize_component};

use super::extract::{build_digest, IgnoreRules};
use super::materialize::{GitMaterializer, Materializer};
use super::types::{ContentDigest, WorkspaceConfig};

/// Hex characters of the name digest appended to each directory name.
const NAME_DIGEST_CHARS: usize = 8;

/// A materialized working directory owned by one item execution.
///
/// Pass it to [`WorkspaceManager::release`] when done. If it is dropped
/// without being released (early return, panic), the directory is removed
/// synchronously on drop.
#[derive(Debug)]
pub struct Workspace {
    name: String,
    path: PathBuf,
    source_ref: String,
    size_bytes: u64,
    released: bool,
}

impl Workspace {
    /// Sanitized directory name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Absolute path of the workspace directory.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// What the workspace was materialized from.
    pub fn source_ref(&self) -> &str {
        &self.source_ref
    }

    /// Size measured right after materializing.
    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        match std::fs::remove_dir_all(&self.path) {
            Ok(()) => debug!(workspace = %self.name, "Removed unreleased workspace on drop"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(workspace = %self.name, error = %e, "Failed to remove workspace on drop"),
        }
    }
}

/// Manages the quota-bounded workspaces under one root directory.
pub struct WorkspaceManager {
    config: WorkspaceConfig,
    materializer: Arc<dyn Materializer>,
    rules: IgnoreRules,
}

impl WorkspaceManager {
    /// Creates a manager that materializes with a shallow `git clone`.
    pub fn new(config: WorkspaceConfig) -> Result<Self, WorkspaceError> {
        Self::with_materializer(config, Arc::new(GitMaterializer::new()))
    }

    /// Creates a manager with a custom materializer.
    pub fn with_materializer(
        config: WorkspaceConfig,
        materializer: Arc<dyn Materializer>,
    ) -> Result<Self, WorkspaceError> {
        Ok(Self {
            config,
            materializer,
            rules: IgnoreRules::new()?,
        })
    }

    /// Get the configuration.
    pub fn config(&self) -> &WorkspaceConfig {
        &self.config
    }

    /// Maps an item name to a directory name using only `[A-Za-z0-9_-]`.
    ///
    /// The readable part is suffixed with a short digest of the raw name, so
    /// names that sanitize alike (`org/p.x`, `org/p_x`) still get distinct
    /// directories.
    ///
    /// # Errors
    ///
    /// Returns `WorkspaceError::InvalidName` for an empty name.
    pub fn sanitize_name(item_name: &str) -> Result<String, WorkspaceError> {
        let safe = sanitize_component(item_name);
        if safe.is_empty() {
            return Err(WorkspaceError::InvalidName(item_name.to_string()));
        }
        let digest = Sha256::digest(item_name.as_bytes());
        Ok(format!("{}-{}", safe, &hex::encode(digest)[..NAME_DIGEST_CHARS]))
    }

    /// Materializes `source_ref` into a fresh workspace for `item_name`.
    ///
    /// Any existing directory with the same name is removed first. On a
    /// materialize failure, timeout or size-quota violation the directory is
    /// removed before the error is returned.
    pub async fn acquire(&self, source_ref: &str, item_name: &str) -> Result<Workspace, WorkspaceError> {
        let name = Self::sanitize_name(item_name)?;
        let path = self.config.root.join(&name);

        tokio::fs::create_dir_all(&self.config.root).await?;
        remove_if_exists(&path).await?;

        // From here on the guard owns the directory.
        let mut workspace = Workspace {
            name,
            path,
            source_ref: source_ref.to_string(),
            size_bytes: 0,
            released: false,
        };

        let started = Instant::now();
        let materialized = tokio::time::timeout(
            self.config.clone_timeout,
            self.materializer.materialize(source_ref, &workspace.path),
        )
        .await;
        match materialized {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                self.release(workspace).await;
                return Err(e);
            }
            Err(_) => {
                self.release(workspace).await;
                return Err(WorkspaceError::MaterializeTimeout {
                    source_ref: source_ref.to_string(),
                    timeout_ms: self.config.clone_timeout.as_millis() as u64,
                });
            }
        }

        let size = match directory_size(workspace.path.clone()).await {
            Ok(size) => size,
            Err(e) => {
                self.release(workspace).await;
                return Err(e);
            }
        };
        let limit = self.config.max_size_bytes();
        if size > limit {
            warn!(
                workspace = %workspace.name,
                size = %format_mb(size),
                limit = %format_mb(limit),
                "Workspace exceeds size quota"
            );
            let name = workspace.name.clone();
            self.release(workspace).await;
            return Err(WorkspaceError::QuotaExceeded {
                name,
                actual: size,
                limit,
                unit: "bytes",
            });
        }

        workspace.size_bytes = size;
        info!(
            workspace = %workspace.name,
            size = %format_mb(size),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Workspace acquired"
        );
        Ok(workspace)
    }

    /// Builds a bounded content digest of the workspace.
    ///
    /// Individual unreadable files are skipped.
    pub async fn extract(
        &self,
        workspace: &Workspace,
        max_content_bytes: usize,
    ) -> Result<ContentDigest, WorkspaceError> {
        let root = workspace.path.clone();
        let rules = self.rules.clone();
        let config = self.config.clone();

        tokio::task::spawn_blocking(move || build_digest(&root, &rules, &config, max_content_bytes))
            .await
            .map_err(|e| WorkspaceError::Join(e.to_string()))
    }

    /// Removes the workspace directory. Never fails; problems are logged.
    pub async fn release(&self, mut workspace: Workspace) {
        workspace.released = true;
        match tokio::fs::remove_dir_all(&workspace.path).await {
            Ok(()) => debug!(workspace = %workspace.name, "Workspace released"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                let err = WorkspaceError::Cleanup {
                    path: workspace.path.clone(),
                    source: e,
                };
                warn!(workspace = %workspace.name, error = %err, "Workspace release failed");
            }
        }
    }

    /// Force-deletes every entry under the root older than `max_age`.
    ///
    /// Entries whose age cannot be determined are deleted too. Returns the
    /// number of entries removed.
    pub async fn sweep(&self, max_age: Duration) -> usize {
        let mut dir = match tokio::fs::read_dir(&self.config.root).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return 0,
            Err(e) => {
                warn!(root = %self.config.root.display(), error = %e, "Workspace sweep failed to list root");
                return 0;
            }
        };

        let now = SystemTime::now();
        let mut removed = 0usize;
        loop {
            let entry = match dir.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "Workspace sweep stopped early");
                    break;
                }
            };
            let path = entry.path();

            let stale = match entry.metadata().await.and_then(|m| m.modified()) {
                Ok(modified) => now.duration_since(modified).unwrap_or(Duration::ZERO) > max_age,
                Err(_) => true,
            };
            if !stale {
                continue;
            }

            if force_remove(&path).await {
                removed += 1;
                debug!(path = %path.display(), "Reclaimed stale workspace");
            }
        }

        if removed > 0 {
            info!(removed, "Swept stale workspaces");
        }
        removed
    }

    /// Sweeps with the configured staleness threshold.
    pub async fn sweep_stale(&self) -> usize {
        self.sweep(self.config.stale_after).await
    }
}

async fn remove_if_exists(path: &Path) -> Result<(), WorkspaceError> {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => {
            debug!(path = %path.display(), "Removed pre-existing workspace");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(WorkspaceError::Cleanup {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

async fn force_remove(path: &Path) -> bool {
    let result = match tokio::fs::symlink_metadata(path).await {
        Ok(meta) if meta.is_dir() => tokio::fs::remove_dir_all(path).await,
        _ => tokio::fs::remove_file(path).await,
    };
    match result {
        Ok(()) => true,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to remove stale workspace");
            false
        }
    }
}

async fn directory_size(path: PathBuf) -> Result<u64, WorkspaceError> {
    tokio::task::spawn_blocking(move || {
        WalkDir::new(&path)
            .follow_links(false)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file())
            .filter_map(|e| e.metadata().ok())
            .map(|m| m.len())
            .sum()
    })
    .await
    .map_err(|e| WorkspaceError::Join(e.to_string()))
}
