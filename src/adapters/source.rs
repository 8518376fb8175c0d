//! Item source backed by a JSON file.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::ExternalError;
use crate::pipeline::{ItemSource, WorkItem};
use crate::utils::truncate_chars;

/// README file names probed in a local `source_ref` directory, in order.
const README_NAMES: [&str; 4] = ["README.md", "README", "readme.md", "README.rst"];

/// Supplementary text is cut to this many characters.
const MAX_SUPPLEMENTARY_CHARS: usize = 4000;

/// Reads a JSON array of [`WorkItem`]s from disk.
///
/// Supplementary text is the README of the item's `source_ref` when that is
/// a local directory, and empty otherwise.
#[derive(Debug, Clone)]
pub struct JsonFileSource {
    path: PathBuf,
}

impl JsonFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Get the items file path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ItemSource for JsonFileSource {
    async fn collect_items(&self) -> Result<Vec<WorkItem>, ExternalError> {
        let raw = tokio::fs::read_to_string(&self.path).await?;
        let items: Vec<WorkItem> = serde_json::from_str(&raw)
            .map_err(|e| ExternalError::Parse(format!("{}: {}", self.path.display(), e)))?;
        info!(path = %self.path.display(), count = items.len(), "Loaded items");
        Ok(items)
    }

    async fn supplementary_text(&self, item: &WorkItem) -> Result<String, ExternalError> {
        let dir = Path::new(&item.source_ref);
        if !tokio::fs::metadata(dir).await.map(|m| m.is_dir()).unwrap_or(false) {
            return Ok(String::new());
        }

        for name in README_NAMES {
            match tokio::fs::read_to_string(dir.join(name)).await {
                Ok(text) => {
                    debug!(item = %item.name, file = name, "Read supplementary text");
                    return Ok(truncate_chars(&text, MAX_SUPPLEMENTARY_CHARS).to_string());
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(String::new())
    }
}
