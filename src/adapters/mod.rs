//! File-backed and local implementations of the pipeline collaborators.
//!
//! These back the command-line front end and let a run work fully offline:
//! items come from a JSON file, analysis is a deterministic summary of the
//! workspace digest, and results land in JSON files.

pub mod analyzer;
pub mod notifier;
pub mod sink;
pub mod snapshot;
pub mod source;

pub use analyzer::DigestAnalyzer;
pub use notifier::{LogNotifier, WebhookNotifier};
pub use sink::JsonFileSink;
pub use snapshot::{JsonSnapshotStore, HISTORY_DAYS};
pub use source::JsonFileSource;
