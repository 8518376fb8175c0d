//! Sink that writes each aggregate to a JSON file.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tracing::info;

use crate::error::ExternalError;
use crate::pipeline::{Aggregate, Sink};

/// Writes `digest-<date>-<run>.json` into an output directory and returns
/// its `file://` URL.
#[derive(Debug, Clone)]
pub struct JsonFileSink {
    output_dir: PathBuf,
}

impl JsonFileSink {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    /// Get the output directory.
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    fn file_name(aggregate: &Aggregate) -> String {
        let run = aggregate.run_id.simple().to_string();
        format!("digest-{}-{}.json", aggregate.date, &run[..8])
    }
}

#[async_trait]
impl Sink for JsonFileSink {
    async fn dispatch(&self, aggregate: &Aggregate) -> Result<String, ExternalError> {
        tokio::fs::create_dir_all(&self.output_dir).await?;
        let path = self.output_dir.join(Self::file_name(aggregate));

        let body = serde_json::to_vec_pretty(aggregate)?;
        let mut file = tokio::fs::File::create(&path).await?;
        file.write_all(&body).await?;
        file.sync_all().await?;

        let absolute = tokio::fs::canonicalize(&path).await.unwrap_or(path);
        info!(path = %absolute.display(), bytes = body.len(), "Aggregate written");
        Ok(format!("file://{}", absolute.display()))
    }
}
