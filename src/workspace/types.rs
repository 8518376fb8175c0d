//! Core types for ephemeral workspaces.
//!
//! Configuration for the workspace manager and the bounded content digest
//! extracted from a materialized workspace.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default workspace size quota in megabytes.
pub const DEFAULT_MAX_SIZE_MB: u64 = 50;

/// Default cap on candidate files collected during extraction.
pub const DEFAULT_MAX_FILE_COUNT: usize = 500;

/// Default per-file size ceiling (100 KiB).
pub const DEFAULT_MAX_FILE_BYTES: u64 = 100 * 1024;

/// Default per-file preview length in characters.
pub const DEFAULT_PREVIEW_CHARS: usize = 500;

/// Configuration for the workspace manager.
#[derive(Debug, Clone)]
pub struct WorkspaceConfig {
    /// Parent directory of every workspace.
    pub root: PathBuf,
    /// Size quota checked right after materializing.
    pub max_size_mb: u64,
    /// Maximum candidate files collected by `extract`.
    pub max_file_count: usize,
    /// Files at or above this size are never previewed.
    pub max_file_bytes: u64,
    /// Upper bound on a single materialize call.
    pub clone_timeout: Duration,
    /// Age after which `sweep` reclaims a leftover workspace.
    pub stale_after: Duration,
    /// Per-file preview length in characters.
    pub preview_chars: usize,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            root: std::env::temp_dir().join("digest-forge-workspaces"),
            max_size_mb: DEFAULT_MAX_SIZE_MB,
            max_file_count: DEFAULT_MAX_FILE_COUNT,
            max_file_bytes: DEFAULT_MAX_FILE_BYTES,
            clone_timeout: Duration::from_secs(60),
            stale_after: Duration::from_secs(3600), // 1 hour
            preview_chars: DEFAULT_PREVIEW_CHARS,
        }
    }
}

impl WorkspaceConfig {
    /// Creates a configuration rooted at `root` with default quotas.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Default::default()
        }
    }

    /// Sets the size quota in megabytes.
    pub fn with_max_size_mb(mut self, mb: u64) -> Self {
        self.max_size_mb = mb;
        self
    }

    /// Sets the candidate file cap.
    pub fn with_max_file_count(mut self, count: usize) -> Self {
        self.max_file_count = count;
        self
    }

    /// Sets the per-file size ceiling.
    pub fn with_max_file_bytes(mut self, bytes: u64) -> Self {
        self.max_file_bytes = bytes;
        self
    }

    /// Sets the materialize timeout.
    pub fn with_clone_timeout(mut self, timeout: Duration) -> Self {
        self.clone_timeout = timeout;
        self
    }

    /// Sets the staleness threshold used by sweeps.
    pub fn with_stale_after(mut self, age: Duration) -> Self {
        self.stale_after = age;
        self
    }

    /// Sets the per-file preview length.
    pub fn with_preview_chars(mut self, chars: usize) -> Self {
        self.preview_chars = chars;
        self
    }

    /// Size quota in bytes.
    pub fn max_size_bytes(&self) -> u64 {
        self.max_size_mb.saturating_mul(1024 * 1024)
    }
}

/// Structural preview of one source file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilePreview {
    /// Path relative to the workspace root, `/`-separated.
    pub path: String,
    /// Preview text with blank, comment and import/export lines removed.
    pub preview: String,
    /// Size of the file on disk.
    pub size: u64,
}

/// Bounded summary of a workspace handed to deep analysis.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentDigest {
    /// Indented directory tree of the candidate files.
    pub summary: String,
    /// Previews in priority order, within the content budget.
    pub files: Vec<FilePreview>,
    /// Candidate files found before the budget was applied.
    pub candidate_files: usize,
    /// Sum of the on-disk sizes of the previewed files.
    pub total_size: u64,
}

impl ContentDigest {
    /// Total bytes of preview text.
    pub fn preview_bytes(&self) -> usize {
        self.files.iter().map(|f| f.preview.len()).sum()
    }

    /// Whether nothing could be previewed.
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Renders the digest as plain text for an analyzer prompt.
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str("Directory structure:\n");
        out.push_str(&self.summary);
        out.push_str(&format!(
            "\n\nKey files ({} of {} candidates):\n",
            self.files.len(),
            self.candidate_files
        ));
        for file in &self.files {
            out.push_str(&format!("\n--- {} ({} bytes) ---\n", file.path, file.size));
            out.push_str(&file.preview);
            out.push('\n');
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = WorkspaceConfig::default();
        assert_eq!(config.max_size_mb, 50);
        assert_eq!(config.max_file_count, 500);
        assert_eq!(config.max_file_bytes, 102_400);
        assert_eq!(config.clone_timeout, Duration::from_secs(60));
        assert_eq!(config.stale_after, Duration::from_secs(3600));
        assert_eq!(config.max_size_bytes(), 50 * 1024 * 1024);
    }

    #[test]
    fn test_digest_render() {
        let digest = ContentDigest {
            summary: "src/\n  main.rs".to_string(),
            files: vec![FilePreview {
                path: "src/main.rs".to_string(),
                preview: "fn main() {}".to_string(),
                size: 12,
            }],
            candidate_files: 3,
            total_size: 12,
        };
        let text = digest.render();
        assert!(text.contains("Key files (1 of 3 candidates)"));
        assert!(text.contains("--- src/main.rs (12 bytes) ---\nfn main() {}"));
        assert_eq!(digest.preview_bytes(), 12);
        assert!(!digest.is_empty());
    }
}
