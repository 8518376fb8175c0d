//! Boundaries to the external systems a pipeline run drives.
//!
//! Every method may fail with [`ExternalError`]; the orchestrator retries
//! calls whose error is transient and degrades per item otherwise. Analyzer
//! and source calls may be repeated, so implementations should be idempotent.

use async_trait::async_trait;

use crate::error::ExternalError;
use crate::workspace::ContentDigest;

use super::types::{Aggregate, AnalysisPayload, Snapshot, WorkItem};

/// Enumerates the items of a run and their supplementary text.
#[async_trait]
pub trait ItemSource: Send + Sync {
    /// Collects this run's items. A failure aborts the run.
    async fn collect_items(&self) -> Result<Vec<WorkItem>, ExternalError>;

    /// Extra context for an item, such as its README.
    async fn supplementary_text(&self, item: &WorkItem) -> Result<String, ExternalError>;
}

/// Produces analysis payloads.
#[async_trait]
pub trait Analyzer: Send + Sync {
    /// Analysis over a workspace digest plus supplementary text.
    async fn deep_analyze(
        &self,
        item: &WorkItem,
        digest: &ContentDigest,
        supplementary: &str,
    ) -> Result<AnalysisPayload, ExternalError>;

    /// Cheaper analysis when no workspace is available.
    async fn fallback_analyze(
        &self,
        item: &WorkItem,
        supplementary: &str,
    ) -> Result<AnalysisPayload, ExternalError>;
}

/// Durable run history.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// The most recent snapshot from an earlier day, if any.
    async fn load_prior(&self) -> Result<Option<Snapshot>, ExternalError>;

    /// Records this run's snapshot.
    async fn save(&self, snapshot: &Snapshot) -> Result<(), ExternalError>;
}

/// Destination for the aggregate, such as a document store.
#[async_trait]
pub trait Sink: Send + Sync {
    /// Publishes the aggregate and returns where it can be found.
    async fn dispatch(&self, aggregate: &Aggregate) -> Result<String, ExternalError>;
}

/// A messaging channel for the run summary.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Channel name used in logs.
    fn name(&self) -> &str;

    /// Sends `text`.
    async fn notify(&self, text: &str) -> Result<(), ExternalError>;
}
