//! Pipeline orchestration for recurring repository digests.
//!
//! A run enumerates work items, analyzes each one with bounded concurrency,
//! aggregates the results against the previous run's snapshot and
//! publishes the aggregate.
//!
//! # Architecture
//!
//! - **Orchestrator**: sequences the stages of a run and owns the per-item
//!   degradation ladder
//! - **Collaborators**: traits for the external systems a run drives (item
//!   source, analyzer, snapshot store, sink, notifiers)
//! - **Trends**: run-over-run deltas and language statistics
//! - **Report**: the per-run report and notification text
//! - **Config**: configuration for all pipeline components
//!
//! # Degradation Ladder
//!
//! Every collected item ends with exactly one result, tagged with the tier
//! that produced it:
//!
//! 1. **Cache hit**: a live cached deep analysis for the same item revision
//! 2. **Deep**: workspace acquired, content extracted, analyzer succeeded
//! 3. **Fallback**: analysis of the supplementary text only
//! 4. **Stub**: built from item metadata when every tier failed
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use digest_forge::adapters::{DigestAnalyzer, JsonFileSource, JsonSnapshotStore};
//! use digest_forge::pipeline::{Pipeline, PipelineConfig};
//!
//! let config = PipelineConfig::load(None)?;
//! let pipeline = Pipeline::builder(config.clone())
//!     .source(Arc::new(JsonFileSource::new("items.json")))
//!     .analyzer(Arc::new(DigestAnalyzer::new()))
//!     .snapshots(Arc::new(JsonSnapshotStore::new(&config.snapshot_path)))
//!     .build()?;
//!
//! let report = pipeline.run().await?;
//! println!("{} deep, {} fallback", report.deep.len(), report.fallback.len());
//! ```
//!
//! # Configuration
//!
//! ```rust,ignore
//! // Via builder pattern
//! let config = PipelineConfig::new()
//!     .with_max_concurrency(4)
//!     .with_max_content_bytes(8000);
//!
//! // Via environment variables
//! let config = PipelineConfig::from_env()?;
//! ```

pub mod collaborators;
pub mod config;
pub mod orchestrator;
pub mod report;
pub mod trends;
pub mod types;

// Re-export main types for convenience
pub use collaborators::{Analyzer, ItemSource, Notifier, Sink, SnapshotStore};
pub use config::{ConfigError, PipelineConfig, PipelineFileConfig, RetryConfig};
pub use orchestrator::{Pipeline, PipelineBuilder, ANALYSIS_NAMESPACE};
pub use report::{notification_text, render_summary, ItemError, ItemStage, RunReport};
pub use trends::{compute_trends, tech_stack, LanguageShare, TechStackStats, TrendReport};
pub use types::{
    Aggregate, AnalysisPayload, AnalysisResult, Provenance, Snapshot, SnapshotEntry, WorkItem,
};
