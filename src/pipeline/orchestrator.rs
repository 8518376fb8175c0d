//! The pipeline orchestrator.
//!
//! A run moves through strictly ordered stages:
//!
//! 1. sweep stale workspaces
//! 2. collect items (the only stage whose failure aborts the run)
//! 3. analyze every item with bounded concurrency
//! 4. aggregate and compute deltas against the prior snapshot
//! 5. persist the new snapshot
//! 6. dispatch to the sink
//! 7. dispatch notifications
//! 8. sweep workspaces and purge expired cache entries
//!
//! Each item walks a degradation ladder: cache hit, else deep analysis in a
//! workspace, else fallback analysis, else a stub. Every collected item gets
//! exactly one result.

use std::any::Any;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::Utc;
use futures::FutureExt;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::cache::{CacheStats, Fingerprint, ResultCache, SharedResultCache};
use crate::concurrency::{ConcurrentProcessor, ProcessOptions, ProcessOutcome};
use crate::error::PipelineError;
use crate::retry::with_default_retry;
use crate::workspace::{Materializer, Workspace, WorkspaceManager};

use super::collaborators::{Analyzer, ItemSource, Notifier, Sink, SnapshotStore};
use super::config::PipelineConfig;
use super::report::{notification_text, partition_by_provenance, render_summary, ItemError, ItemStage, RunReport};
use super::trends::{compute_trends, tech_stack};
use super::types::{Aggregate, AnalysisPayload, AnalysisResult, Provenance, Snapshot, WorkItem};

/// Cache namespace for per-item analyses.
pub const ANALYSIS_NAMESPACE: &str = "analysis";

/// Builder for [`Pipeline`].
pub struct PipelineBuilder {
    config: PipelineConfig,
    source: Option<Arc<dyn ItemSource>>,
    analyzer: Option<Arc<dyn Analyzer>>,
    snapshots: Option<Arc<dyn SnapshotStore>>,
    sink: Option<Arc<dyn Sink>>,
    notifiers: Vec<Arc<dyn Notifier>>,
    materializer: Option<Arc<dyn Materializer>>,
    cache: Option<SharedResultCache<AnalysisResult>>,
}

impl PipelineBuilder {
    /// Starts a builder with the given configuration.
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            source: None,
            analyzer: None,
            snapshots: None,
            sink: None,
            notifiers: Vec::new(),
            materializer: None,
            cache: None,
        }
    }

    /// Sets the item source (required).
    pub fn source(mut self, source: Arc<dyn ItemSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Sets the analyzer (required).
    pub fn analyzer(mut self, analyzer: Arc<dyn Analyzer>) -> Self {
        self.analyzer = Some(analyzer);
        self
    }

    /// Sets the snapshot store. Without one, trends have no prior data.
    pub fn snapshots(mut self, store: Arc<dyn SnapshotStore>) -> Self {
        self.snapshots = Some(store);
        self
    }

    /// Sets the sink.
    pub fn sink(mut self, sink: Arc<dyn Sink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Adds a notifier.
    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifiers.push(notifier);
        self
    }

    /// Replaces the default `git clone` materializer.
    pub fn materializer(mut self, materializer: Arc<dyn Materializer>) -> Self {
        self.materializer = Some(materializer);
        self
    }

    /// Shares an existing cache instead of building one from the config.
    pub fn cache(mut self, cache: SharedResultCache<AnalysisResult>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Validates the configuration and assembles the pipeline.
    pub fn build(self) -> Result<Pipeline, PipelineError> {
        self.config.validate()?;

        let source = self.source.ok_or(PipelineError::MissingCollaborator("item source"))?;
        let analyzer = self.analyzer.ok_or(PipelineError::MissingCollaborator("analyzer"))?;

        let workspaces = match self.materializer {
            Some(materializer) => {
                WorkspaceManager::with_materializer(self.config.workspace.clone(), materializer)?
            }
            None => WorkspaceManager::new(self.config.workspace.clone())?,
        };
        let cache = self
            .cache
            .unwrap_or_else(|| Arc::new(ResultCache::with_config(self.config.cache.clone())));

        Ok(Pipeline {
            processor: ConcurrentProcessor::new(self.config.max_concurrency),
            config: self.config,
            source,
            analyzer,
            snapshots: self.snapshots,
            sink: self.sink,
            notifiers: self.notifiers,
            workspaces,
            cache,
        })
    }
}

/// A configured pipeline. Each call to [`Pipeline::run`] is one run.
pub struct Pipeline {
    config: PipelineConfig,
    source: Arc<dyn ItemSource>,
    analyzer: Arc<dyn Analyzer>,
    snapshots: Option<Arc<dyn SnapshotStore>>,
    sink: Option<Arc<dyn Sink>>,
    notifiers: Vec<Arc<dyn Notifier>>,
    workspaces: WorkspaceManager,
    cache: SharedResultCache<AnalysisResult>,
    processor: ConcurrentProcessor,
}

impl Pipeline {
    /// Starts a builder.
    pub fn builder(config: PipelineConfig) -> PipelineBuilder {
        PipelineBuilder::new(config)
    }

    /// Get the configuration.
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Get the shared result cache.
    pub fn cache(&self) -> &SharedResultCache<AnalysisResult> {
        &self.cache
    }

    /// Drops every cached analysis, including persisted entries.
    pub fn clear_cache(&self) -> usize {
        self.cache.clear()
    }

    /// Current cache counters.
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Executes one run.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::Collection` if collection fails after its
    /// retries and `PipelineError::NoItems` if it yields nothing. The final
    /// cleanup still runs in both cases. Every later failure is reflected in
    /// the report instead.
    pub async fn run(&self) -> Result<RunReport, PipelineError> {
        let run_id = Uuid::new_v4();
        let span = info_span!("pipeline_run", run_id = %run_id);
        self.execute(run_id).instrument(span).await
    }

    async fn execute(&self, run_id: Uuid) -> Result<RunReport, PipelineError> {
        let started_at = Utc::now();
        info!("Pipeline run started");

        let mut reclaimed = self.workspaces.sweep_stale().await;

        let items = match self.collect().await {
            Ok(items) => items,
            Err(e) => {
                error!(error = %e, "Collection failed, aborting run");
                self.final_cleanup().await;
                return Err(e);
            }
        };
        info!(items = items.len(), "Collected items");

        let (results, item_errors) = self.analyze_all(&items).await;

        let aggregate = self.aggregate(run_id, results).await;
        let snapshot_saved = self.save_snapshot(&aggregate).await;
        let sink_url = self.dispatch_sink(&aggregate).await;
        let notifications_sent = self
            .dispatch_notifications(&notification_text(&aggregate.summary_text, sink_url.as_deref()))
            .await;

        let (swept, expired_cache_entries) = self.final_cleanup().await;
        reclaimed += swept;

        let [cache_hits, deep, fallback, stub] = partition_by_provenance(&aggregate.results);
        let report = RunReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            total_items: items.len(),
            results: aggregate.results,
            cache_hits,
            deep,
            fallback,
            stub,
            item_errors,
            trends_summary: aggregate.trends.summary,
            snapshot_saved,
            sink_dispatched: sink_url.is_some(),
            sink_url,
            notifications_sent,
            workspaces_reclaimed: reclaimed,
            expired_cache_entries,
        };

        info!(
            total = report.total_items,
            cached = report.cache_hits.len(),
            deep = report.deep.len(),
            fallback = report.fallback.len(),
            stub = report.stub.len(),
            sink = report.sink_dispatched,
            notified = report.notifications_sent,
            elapsed_ms = (report.finished_at - report.started_at).num_milliseconds(),
            "Pipeline run finished"
        );
        Ok(report)
    }

    async fn collect(&self) -> Result<Vec<WorkItem>, PipelineError> {
        let policy = self.config.retry.policy("collect items");
        let items = with_default_retry(&policy, || self.source.collect_items())
            .await
            .map_err(PipelineError::Collection)?;

        // Workspaces are keyed by item name, so names must be unique.
        let mut seen = HashSet::new();
        let mut unique = Vec::with_capacity(items.len());
        for item in items {
            if seen.insert(item.name.clone()) {
                unique.push(item);
            } else {
                warn!(item = %item.name, "Dropping duplicate item");
            }
        }

        if unique.is_empty() {
            return Err(PipelineError::NoItems);
        }
        Ok(unique)
    }

    async fn analyze_all(&self, items: &[WorkItem]) -> (Vec<AnalysisResult>, Vec<ItemError>) {
        let options = ProcessOptions::new().with_progress(|done, total| {
            info!(done, total, "Item finished");
        });

        let outcome = self
            .processor
            .process(
                items,
                |item, _| async move {
                    // A panic is contained to its item. Dropping the unwound
                    // future releases any workspace it held.
                    AssertUnwindSafe(self.analyze_item(item))
                        .catch_unwind()
                        .await
                        .map_err(|payload| {
                            let message = panic_message(payload.as_ref());
                            error!(item = %item.name, panic = %message, "Item analysis panicked");
                            ItemError {
                                name: item.name.clone(),
                                stage: ItemStage::Panicked,
                                message,
                            }
                        })
                },
                options,
            )
            .await;
        let outcome = match outcome {
            Ok(outcome) => outcome,
            // Only returned with stop_on_error, which is never set here.
            Err(failure) => ProcessOutcome {
                results: items.iter().map(|_| None).collect(),
                errors: vec![failure],
            },
        };

        let mut results = Vec::with_capacity(items.len());
        let mut errors = Vec::new();
        for (slot, item) in outcome.results.into_iter().zip(items) {
            match slot {
                Some((result, item_errors)) => {
                    results.push(result);
                    errors.extend(item_errors);
                }
                None => results.push(AnalysisResult::stub(item)),
            }
        }
        errors.extend(outcome.errors.into_iter().map(|failure| failure.error));
        (results, errors)
    }

    /// Runs one item down the degradation ladder.
    async fn analyze_item(&self, item: &WorkItem) -> (AnalysisResult, Vec<ItemError>) {
        let mut errors = Vec::new();

        let key = match Fingerprint::generate(ANALYSIS_NAMESPACE, &item.fingerprint_fields()) {
            Ok(key) => Some(key),
            Err(e) => {
                warn!(item = %item.name, error = %e, "Could not fingerprint item, skipping cache");
                None
            }
        };

        if let Some(key) = &key {
            if let Some(cached) = self.cache.get(key.as_str()) {
                info!(item = %item.name, "Cache hit");
                return (AnalysisResult::from_cache(item, cached), errors);
            }
        }

        // Concurrent misses on the same key wait here and reuse the result.
        let _claim = match &key {
            Some(key) => {
                let claim = self.cache.lock_key(key.as_str()).await;
                if let Some(cached) = self.cache.recheck(key.as_str()) {
                    info!(item = %item.name, "Cache hit after waiting on in-flight analysis");
                    return (AnalysisResult::from_cache(item, cached), errors);
                }
                Some(claim)
            }
            None => None,
        };

        let policy = self.config.retry.policy(format!("supplementary text for {}", item.name));
        let supplementary = match with_default_retry(&policy, || self.source.supplementary_text(item)).await {
            Ok(text) => text,
            Err(e) => {
                warn!(item = %item.name, error = %e, "Continuing without supplementary text");
                errors.push(item_error(item, ItemStage::SupplementaryText, &e));
                String::new()
            }
        };

        match self.deep_tier(item, &supplementary).await {
            Ok((payload, files_analyzed)) => {
                let result = AnalysisResult::from_payload(item, payload, Provenance::Deep, files_analyzed);
                if let Some(key) = &key {
                    self.cache.store(key.as_str(), result.clone()).await;
                }
                info!(item = %item.name, files = files_analyzed, "Deep analysis complete");
                return (result, errors);
            }
            Err(e) => {
                warn!(item = %item.name, stage = %e.stage, error = %e.message, "Deep analysis unavailable, falling back");
                errors.push(e);
            }
        }

        let policy = self.config.retry.policy(format!("fallback analysis of {}", item.name));
        match with_default_retry(&policy, || self.analyzer.fallback_analyze(item, &supplementary)).await {
            Ok(payload) => {
                info!(item = %item.name, "Fallback analysis complete");
                (AnalysisResult::from_payload(item, payload, Provenance::Fallback, 0), errors)
            }
            Err(e) => {
                warn!(item = %item.name, error = %e, "Fallback analysis failed, producing stub");
                errors.push(item_error(item, ItemStage::FallbackAnalysis, &e));
                (AnalysisResult::stub(item), errors)
            }
        }
    }

    /// Acquire, extract and analyze. The workspace is released on every path.
    async fn deep_tier(&self, item: &WorkItem, supplementary: &str) -> Result<(AnalysisPayload, usize), ItemError> {
        let workspace = self
            .workspaces
            .acquire(&item.source_ref, &item.name)
            .await
            .map_err(|e| item_error(item, ItemStage::Acquire, &e))?;

        let outcome = self.analyze_workspace(item, &workspace, supplementary).await;
        self.workspaces.release(workspace).await;
        outcome
    }

    async fn analyze_workspace(
        &self,
        item: &WorkItem,
        workspace: &Workspace,
        supplementary: &str,
    ) -> Result<(AnalysisPayload, usize), ItemError> {
        let digest = self
            .workspaces
            .extract(workspace, self.config.max_content_bytes)
            .await
            .map_err(|e| item_error(item, ItemStage::Extract, &e))?;
        debug!(
            item = %item.name,
            candidates = digest.candidate_files,
            previewed = digest.files.len(),
            "Extracted workspace digest"
        );

        let policy = self.config.retry.policy(format!("deep analysis of {}", item.name));
        let payload = with_default_retry(&policy, || self.analyzer.deep_analyze(item, &digest, supplementary))
            .await
            .map_err(|e| item_error(item, ItemStage::DeepAnalysis, &e))?;
        Ok((payload, digest.files.len()))
    }

    async fn aggregate(&self, run_id: Uuid, results: Vec<AnalysisResult>) -> Aggregate {
        let prior = match &self.snapshots {
            Some(store) => {
                let policy = self.config.retry.policy("load prior snapshot");
                match with_default_retry(&policy, || store.load_prior()).await {
                    Ok(prior) => prior,
                    Err(e) => {
                        warn!(error = %e, "Prior snapshot unavailable, trends skip deltas");
                        None
                    }
                }
            }
            None => None,
        };

        let mut aggregate = Aggregate {
            run_id,
            date: Utc::now().date_naive(),
            tech_stack: tech_stack(&results),
            trends: compute_trends(&results, prior.as_ref()),
            summary_text: String::new(),
            results,
        };
        aggregate.summary_text = render_summary(&aggregate);
        info!(trends = %aggregate.trends.summary, "Aggregated results");
        aggregate
    }

    async fn save_snapshot(&self, aggregate: &Aggregate) -> bool {
        let Some(store) = &self.snapshots else {
            return false;
        };
        let snapshot = Snapshot::from_results(&aggregate.results);
        match store.save(&snapshot).await {
            Ok(()) => {
                debug!(entries = snapshot.entries.len(), "Snapshot saved");
                true
            }
            Err(e) => {
                warn!(error = %e, "Failed to save snapshot");
                false
            }
        }
    }

    async fn dispatch_sink(&self, aggregate: &Aggregate) -> Option<String> {
        let sink = self.sink.as_ref()?;
        match sink.dispatch(aggregate).await {
            Ok(url) => {
                info!(url = %url, "Aggregate dispatched to sink");
                Some(url)
            }
            Err(e) => {
                warn!(error = %e, "Sink dispatch failed");
                None
            }
        }
    }

    async fn dispatch_notifications(&self, text: &str) -> bool {
        if self.notifiers.is_empty() {
            debug!("No notifiers configured");
            return false;
        }

        let mut all_sent = true;
        for notifier in &self.notifiers {
            match notifier.notify(text).await {
                Ok(()) => info!(channel = notifier.name(), "Notification sent"),
                Err(e) => {
                    warn!(channel = notifier.name(), error = %e, "Notification failed");
                    all_sent = false;
                }
            }
        }
        all_sent
    }

    async fn final_cleanup(&self) -> (usize, usize) {
        let swept = self.workspaces.sweep_stale().await;
        let expired = self.cache.cleanup();
        (swept, expired)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

fn item_error(item: &WorkItem, stage: ItemStage, err: &dyn std::fmt::Display) -> ItemError {
    ItemError {
        name: item.name.clone(),
        stage,
        message: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheConfig;
    use crate::error::ExternalError;
    use crate::workspace::{ContentDigest, WorkspaceConfig};
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::TempDir;

    struct StaticSource {
        items: Vec<WorkItem>,
        fail: bool,
    }

    #[async_trait]
    impl ItemSource for StaticSource {
        async fn collect_items(&self) -> Result<Vec<WorkItem>, ExternalError> {
            if self.fail {
                return Err(ExternalError::http(401, "bad token"));
            }
            Ok(self.items.clone())
        }

        async fn supplementary_text(&self, item: &WorkItem) -> Result<String, ExternalError> {
            Ok(format!("README of {}", item.name))
        }
    }

    #[derive(Default)]
    struct CountingAnalyzer {
        deep_calls: AtomicUsize,
        fallback_calls: AtomicUsize,
    }

    #[async_trait]
    impl Analyzer for CountingAnalyzer {
        async fn deep_analyze(
            &self,
            item: &WorkItem,
            digest: &ContentDigest,
            _supplementary: &str,
        ) -> Result<AnalysisPayload, ExternalError> {
            self.deep_calls.fetch_add(1, Ordering::SeqCst);
            Ok(AnalysisPayload::new(format!("{} has {} files", item.name, digest.files.len())))
        }

        async fn fallback_analyze(&self, item: &WorkItem, _supplementary: &str) -> Result<AnalysisPayload, ExternalError> {
            self.fallback_calls.fetch_add(1, Ordering::SeqCst);
            Ok(AnalysisPayload::new(format!("{} from readme", item.name)))
        }
    }

    /// Writes one source file; fails for names listed in `broken`.
    struct FixtureMaterializer {
        broken: Vec<String>,
    }

    #[async_trait]
    impl Materializer for FixtureMaterializer {
        async fn materialize(&self, source_ref: &str, target: &Path) -> Result<(), crate::error::WorkspaceError> {
            if self.broken.iter().any(|b| b == source_ref) {
                return Err(crate::error::WorkspaceError::MaterializeFailed {
                    source_ref: source_ref.to_string(),
                    reason: "repository not found".to_string(),
                });
            }
            std::fs::create_dir_all(target)?;
            std::fs::write(target.join("main.rs"), "fn main() {}")?;
            Ok(())
        }
    }

    struct RecordingNotifier {
        messages: Mutex<Vec<String>>,
        fail: bool,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        fn name(&self) -> &str {
            "recording"
        }

        async fn notify(&self, text: &str) -> Result<(), ExternalError> {
            self.messages.lock().unwrap().push(text.to_string());
            if self.fail {
                Err(ExternalError::http(500, "down"))
            } else {
                Ok(())
            }
        }
    }

    struct FailingSink;

    #[async_trait]
    impl Sink for FailingSink {
        async fn dispatch(&self, _aggregate: &Aggregate) -> Result<String, ExternalError> {
            Err(ExternalError::http(400, "rejected"))
        }
    }

    fn items(n: usize) -> Vec<WorkItem> {
        (1..=n)
            .map(|i| WorkItem::new(format!("owner/repo{}", i), "rev1", format!("repo{}", i)))
            .collect()
    }

    fn config(root: &Path) -> PipelineConfig {
        PipelineConfig::default()
            .with_workspace(WorkspaceConfig::new(root.join("ws")))
            .with_cache(CacheConfig::new(100))
            .with_retry(crate::pipeline::config::RetryConfig {
                max_retries: 1,
                base_delay: Duration::from_millis(1),
            })
    }

    #[test]
    fn test_builder_requires_collaborators() {
        let err = Pipeline::builder(PipelineConfig::default()).build().err().unwrap();
        assert!(matches!(err, PipelineError::MissingCollaborator("item source")));

        let err = Pipeline::builder(PipelineConfig::default().with_max_concurrency(0))
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, PipelineError::Config(_)));
    }

    #[tokio::test]
    async fn test_acquire_failure_falls_back() {
        let dir = TempDir::new().unwrap();
        let analyzer = Arc::new(CountingAnalyzer::default());
        let pipeline = Pipeline::builder(config(dir.path()))
            .source(Arc::new(StaticSource { items: items(3), fail: false }))
            .analyzer(analyzer.clone())
            .materializer(Arc::new(FixtureMaterializer {
                broken: vec!["repo2".to_string()],
            }))
            .build()
            .unwrap();

        let report = pipeline.run().await.unwrap();
        assert_eq!(report.total_items, 3);
        assert_eq!(report.deep, vec!["owner/repo1".to_string(), "owner/repo3".to_string()]);
        assert_eq!(report.fallback, vec!["owner/repo2".to_string()]);
        assert_eq!(report.item_errors.len(), 1);
        assert_eq!(report.item_errors[0].stage, ItemStage::Acquire);
        assert_eq!(analyzer.deep_calls.load(Ordering::SeqCst), 2);
        assert_eq!(analyzer.fallback_calls.load(Ordering::SeqCst), 1);
        assert!(!report.fully_succeeded());
    }

    #[tokio::test]
    async fn test_collection_failure_aborts() {
        let dir = TempDir::new().unwrap();
        let pipeline = Pipeline::builder(config(dir.path()))
            .source(Arc::new(StaticSource { items: items(2), fail: true }))
            .analyzer(Arc::new(CountingAnalyzer::default()))
            .build()
            .unwrap();

        let err = pipeline.run().await.unwrap_err();
        match err {
            PipelineError::Collection(retry) => {
                assert_eq!(retry.attempts, 1, "4xx must not be retried");
            }
            other => panic!("expected collection error, got {}", other),
        }
    }

    #[tokio::test]
    async fn test_empty_collection_aborts() {
        let dir = TempDir::new().unwrap();
        let pipeline = Pipeline::builder(config(dir.path()))
            .source(Arc::new(StaticSource { items: Vec::new(), fail: false }))
            .analyzer(Arc::new(CountingAnalyzer::default()))
            .build()
            .unwrap();

        assert!(matches!(pipeline.run().await, Err(PipelineError::NoItems)));
    }

    #[tokio::test]
    async fn test_duplicate_items_are_dropped() {
        let dir = TempDir::new().unwrap();
        let mut list = items(2);
        list.push(list[0].clone());
        let pipeline = Pipeline::builder(config(dir.path()))
            .source(Arc::new(StaticSource { items: list, fail: false }))
            .analyzer(Arc::new(CountingAnalyzer::default()))
            .materializer(Arc::new(FixtureMaterializer { broken: Vec::new() }))
            .build()
            .unwrap();

        let report = pipeline.run().await.unwrap();
        assert_eq!(report.total_items, 2);
        assert_eq!(report.results.len(), 2);
    }

    #[tokio::test]
    async fn test_second_run_hits_cache() {
        let dir = TempDir::new().unwrap();
        let analyzer = Arc::new(CountingAnalyzer::default());
        let pipeline = Pipeline::builder(config(dir.path()))
            .source(Arc::new(StaticSource { items: items(2), fail: false }))
            .analyzer(analyzer.clone())
            .materializer(Arc::new(FixtureMaterializer { broken: Vec::new() }))
            .build()
            .unwrap();

        pipeline.run().await.unwrap();
        let report = pipeline.run().await.unwrap();
        assert_eq!(report.cache_hits.len(), 2);
        assert_eq!(analyzer.deep_calls.load(Ordering::SeqCst), 2);
        assert_eq!(pipeline.cache_stats().hits, 2);

        assert_eq!(pipeline.clear_cache(), 2);
        assert_eq!(pipeline.cache_stats().size, 0);
    }

    #[tokio::test]
    async fn test_sink_failure_does_not_block_notifications() {
        let dir = TempDir::new().unwrap();
        let good = Arc::new(RecordingNotifier {
            messages: Mutex::new(Vec::new()),
            fail: false,
        });
        let bad = Arc::new(RecordingNotifier {
            messages: Mutex::new(Vec::new()),
            fail: true,
        });
        let pipeline = Pipeline::builder(config(dir.path()))
            .source(Arc::new(StaticSource { items: items(1), fail: false }))
            .analyzer(Arc::new(CountingAnalyzer::default()))
            .materializer(Arc::new(FixtureMaterializer { broken: Vec::new() }))
            .sink(Arc::new(FailingSink))
            .notifier(good.clone())
            .notifier(bad.clone())
            .build()
            .unwrap();

        let report = pipeline.run().await.unwrap();
        assert!(!report.sink_dispatched);
        assert!(report.sink_url.is_none());
        assert!(!report.notifications_sent);
        assert_eq!(good.messages.lock().unwrap().len(), 1);
        assert_eq!(bad.messages.lock().unwrap().len(), 1);
        assert!(good.messages.lock().unwrap()[0].contains("owner/repo1"));
    }
}
