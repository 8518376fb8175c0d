//! digest-forge: recurring repository digest pipeline.
//!
//! This library collects a batch of work items, analyzes each one inside a
//! bounded ephemeral workspace with retries, caching and bounded
//! concurrency, degrades per item instead of failing the run, and publishes
//! an aggregate with run-over-run trends.

// Core modules
pub mod adapters;
pub mod cache;
pub mod cli;
pub mod concurrency;
pub mod error;
pub mod pipeline;
pub mod retry;
pub mod utils;
pub mod workspace;

// Re-export commonly used types
pub use cache::{CacheConfig, CacheStats, Fingerprint, ResultCache};
pub use concurrency::{ConcurrentProcessor, ProcessOptions, ProcessOutcome};
pub use error::{CacheError, ExternalError, PipelineError, WorkspaceError};
pub use pipeline::{Pipeline, PipelineBuilder, PipelineConfig, RunReport};
pub use retry::{with_default_retry, with_retry, RetryError, RetryPolicy, Transient};
pub use workspace::{Workspace, WorkspaceConfig, WorkspaceManager};
