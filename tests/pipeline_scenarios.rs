//! End-to-end runs of the pipeline against local fixture directories.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tempfile::TempDir;

use digest_forge::adapters::{JsonFileSink, JsonSnapshotStore};
use digest_forge::cache::{CacheConfig, Fingerprint};
use digest_forge::error::ExternalError;
use digest_forge::pipeline::{
    AnalysisPayload, AnalysisResult, Analyzer, ItemSource, ItemStage, Pipeline, PipelineConfig,
    Provenance, RetryConfig, Snapshot, SnapshotStore, WorkItem, ANALYSIS_NAMESPACE,
};
use digest_forge::workspace::{ContentDigest, DirectoryMaterializer, WorkspaceConfig, WorkspaceManager};

struct FixtureSource {
    items: Vec<WorkItem>,
}

#[async_trait]
impl ItemSource for FixtureSource {
    async fn collect_items(&self) -> Result<Vec<WorkItem>, ExternalError> {
        Ok(self.items.clone())
    }

    async fn supplementary_text(&self, item: &WorkItem) -> Result<String, ExternalError> {
        Ok(format!("# {}\n\nFixture project.", item.name))
    }
}

/// Analyzer that records calls and the peak number of concurrent deep calls.
#[derive(Default)]
struct ScriptedAnalyzer {
    /// Names whose deep analysis fails with a terminal error.
    deep_fails: Vec<String>,
    /// Names whose fallback analysis fails with a terminal error.
    fallback_fails: Vec<String>,
    /// Names whose deep analysis panics.
    deep_panics: Vec<String>,
    /// Workspace root probed during deep analysis.
    workspace_root: Option<PathBuf>,
    delay: Duration,
    deep_calls: AtomicUsize,
    fallback_calls: AtomicUsize,
    active: AtomicUsize,
    peak: AtomicUsize,
    saw_workspace: Mutex<Vec<String>>,
}

#[async_trait]
impl Analyzer for ScriptedAnalyzer {
    async fn deep_analyze(
        &self,
        item: &WorkItem,
        digest: &ContentDigest,
        _supplementary: &str,
    ) -> Result<AnalysisPayload, ExternalError> {
        self.deep_calls.fetch_add(1, Ordering::SeqCst);
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        if let Some(root) = &self.workspace_root {
            let dir = root.join(WorkspaceManager::sanitize_name(&item.name).unwrap());
            if dir.is_dir() {
                self.saw_workspace.lock().unwrap().push(item.name.clone());
            }
        }
        tokio::time::sleep(self.delay).await;
        self.active.fetch_sub(1, Ordering::SeqCst);

        if self.deep_panics.contains(&item.name) {
            panic!("analyzer crashed on {}", item.name);
        }

        if self.deep_fails.contains(&item.name) {
            return Err(ExternalError::http(400, "model rejected the prompt"));
        }
        Ok(AnalysisPayload::new(format!(
            "## {}\n\nDeep look at {} files",
            item.name,
            digest.files.len()
        )))
    }

    async fn fallback_analyze(
        &self,
        item: &WorkItem,
        _supplementary: &str,
    ) -> Result<AnalysisPayload, ExternalError> {
        self.fallback_calls.fetch_add(1, Ordering::SeqCst);
        if self.fallback_fails.contains(&item.name) {
            return Err(ExternalError::Analysis("empty completion".to_string()));
        }
        Ok(AnalysisPayload::new(format!("Readme-only look at {}", item.name)))
    }
}

struct Harness {
    dir: TempDir,
    items: Vec<WorkItem>,
}

impl Harness {
    /// Creates `count` fixture projects named `org/projectN`.
    fn new(count: usize) -> Self {
        let dir = TempDir::new().unwrap();
        let mut items = Vec::new();
        for i in 1..=count {
            let project = dir.path().join("fixtures").join(format!("project{}", i));
            std::fs::create_dir_all(project.join("src")).unwrap();
            std::fs::write(project.join("README.md"), format!("# project{}\n\nDemo.", i)).unwrap();
            std::fs::write(
                project.join("src/main.rs"),
                "use std::io;\n\n// entry\nfn main() {\n    println!(\"hi\");\n}\n",
            )
            .unwrap();
            std::fs::write(project.join("src/lib.rs"), "pub fn answer() -> u32 {\n    42\n}\n").unwrap();

            items.push(
                WorkItem::new(format!("org/project{}", i), "2026-10-01", project.to_string_lossy())
                    .with_language(if i % 2 == 0 { "Go" } else { "Rust" })
                    .with_stars(100 * i as u64, i as f64),
            );
        }
        Self { dir, items }
    }

    fn workspace_root(&self) -> PathBuf {
        self.dir.path().join("workspaces")
    }

    fn config(&self, concurrency: usize) -> PipelineConfig {
        PipelineConfig::new()
            .with_max_concurrency(concurrency)
            .with_snapshot_path(self.dir.path().join("history.json"))
            .with_output_dir(self.dir.path().join("output"))
            .with_workspace(WorkspaceConfig::new(self.workspace_root()))
            .with_cache(CacheConfig::new(100))
            .with_retry(RetryConfig {
                max_retries: 2,
                base_delay: Duration::from_millis(1),
            })
    }

    fn pipeline(&self, config: PipelineConfig, analyzer: Arc<ScriptedAnalyzer>) -> Pipeline {
        Pipeline::builder(config)
            .source(Arc::new(FixtureSource {
                items: self.items.clone(),
            }))
            .analyzer(analyzer)
            .materializer(Arc::new(DirectoryMaterializer::new()))
            .build()
            .unwrap()
    }
}

fn residual_workspaces(root: &Path) -> usize {
    match std::fs::read_dir(root) {
        Ok(entries) => entries.count(),
        Err(_) => 0,
    }
}

#[tokio::test]
async fn test_all_items_deep_analyzed() {
    let harness = Harness::new(5);
    let analyzer = Arc::new(ScriptedAnalyzer {
        delay: Duration::from_millis(20),
        ..Default::default()
    });
    let pipeline = harness.pipeline(harness.config(2), analyzer.clone());

    let report = pipeline.run().await.unwrap();

    assert_eq!(report.total_items, 5);
    assert_eq!(report.results.len(), 5);
    assert_eq!(report.deep.len(), 5, "report: {:?}", report.item_errors);
    assert!(report.item_errors.is_empty());
    assert!(report.fully_succeeded());
    assert_eq!(residual_workspaces(&harness.workspace_root()), 0);

    let peak = analyzer.peak.load(Ordering::SeqCst);
    assert!(peak <= 2, "peak concurrency was {}", peak);

    // Results keep collection order.
    let names: Vec<&str> = report.results.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(
        names,
        vec!["org/project1", "org/project2", "org/project3", "org/project4", "org/project5"]
    );
    assert!(report.results.iter().all(|r| r.files_analyzed == 2));
}

#[tokio::test]
async fn test_failed_item_degrades_to_stub() {
    let harness = Harness::new(5);
    let analyzer = Arc::new(ScriptedAnalyzer {
        deep_fails: vec!["org/project3".to_string()],
        fallback_fails: vec!["org/project3".to_string()],
        ..Default::default()
    });
    let pipeline = harness.pipeline(harness.config(2), analyzer.clone());

    let report = pipeline.run().await.unwrap();

    assert_eq!(report.total_items, 5);
    assert_eq!(report.results.len(), 5);
    assert_eq!(report.stub, vec!["org/project3".to_string()]);
    assert_eq!(
        report.deep,
        vec!["org/project1", "org/project2", "org/project4", "org/project5"]
    );
    assert_eq!(report.results[2].provenance, Provenance::Stub);
    assert!(report.results[2].payload.content.contains("org/project3"));

    let stages: Vec<ItemStage> = report.item_errors.iter().map(|e| e.stage).collect();
    assert_eq!(stages, vec![ItemStage::DeepAnalysis, ItemStage::FallbackAnalysis]);

    // Terminal errors are not retried.
    assert_eq!(analyzer.deep_calls.load(Ordering::SeqCst), 5);
    assert_eq!(analyzer.fallback_calls.load(Ordering::SeqCst), 1);
    assert_eq!(residual_workspaces(&harness.workspace_root()), 0);
}

#[tokio::test]
async fn test_cached_item_skips_analysis() {
    let harness = Harness::new(1);
    let analyzer = Arc::new(ScriptedAnalyzer::default());
    let pipeline = harness.pipeline(harness.config(2), analyzer.clone());

    let item = &harness.items[0];
    let key = Fingerprint::generate(ANALYSIS_NAMESPACE, &item.fingerprint_fields()).unwrap();
    let cached = AnalysisResult::from_payload(item, AnalysisPayload::new("Cached insight"), Provenance::Deep, 7);
    pipeline.cache().set(key.as_str(), cached);

    let report = pipeline.run().await.unwrap();

    assert_eq!(report.cache_hits, vec!["org/project1".to_string()]);
    assert_eq!(report.results[0].provenance, Provenance::CacheHit);
    assert_eq!(report.results[0].summary, "Cached insight");
    assert_eq!(analyzer.deep_calls.load(Ordering::SeqCst), 0);
    assert_eq!(analyzer.fallback_calls.load(Ordering::SeqCst), 0);
    assert_eq!(pipeline.cache_stats().hits, 1);
}

#[tokio::test]
async fn test_new_revision_misses_cache() {
    let mut harness = Harness::new(1);
    let analyzer = Arc::new(ScriptedAnalyzer::default());
    let config = harness.config(1);

    let first = harness.pipeline(config.clone(), analyzer.clone());
    first.run().await.unwrap();

    harness.items[0].revision = "2026-10-02".to_string();
    let second = Pipeline::builder(config)
        .source(Arc::new(FixtureSource {
            items: harness.items.clone(),
        }))
        .analyzer(analyzer.clone())
        .materializer(Arc::new(DirectoryMaterializer::new()))
        .cache(first.cache().clone())
        .build()
        .unwrap();

    let report = second.run().await.unwrap();
    assert_eq!(report.deep.len(), 1);
    assert_eq!(analyzer.deep_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_workspace_released_after_deep_failure() {
    let harness = Harness::new(3);
    let analyzer = Arc::new(ScriptedAnalyzer {
        deep_fails: vec!["org/project1".to_string(), "org/project2".to_string(), "org/project3".to_string()],
        workspace_root: Some(harness.workspace_root()),
        ..Default::default()
    });
    let pipeline = harness.pipeline(harness.config(3), analyzer.clone());

    let report = pipeline.run().await.unwrap();

    assert_eq!(report.fallback.len(), 3);
    // The workspace existed while the analyzer ran and is gone afterwards.
    assert_eq!(analyzer.saw_workspace.lock().unwrap().len(), 3);
    assert_eq!(residual_workspaces(&harness.workspace_root()), 0);
}

#[tokio::test]
async fn test_oversized_workspace_falls_back() {
    let harness = Harness::new(2);
    let big = PathBuf::from(&harness.items[1].source_ref).join("assets.bin");
    std::fs::write(&big, vec![0u8; 1536 * 1024]).unwrap();

    let analyzer = Arc::new(ScriptedAnalyzer::default());
    let config = harness.config(2);
    let workspace = config.workspace.clone().with_max_size_mb(1);
    let pipeline_config = config.with_workspace(workspace);
    let pipeline = harness.pipeline(pipeline_config, analyzer.clone());

    let report = pipeline.run().await.unwrap();

    assert_eq!(report.deep, vec!["org/project1".to_string()]);
    assert_eq!(report.fallback, vec!["org/project2".to_string()]);
    let err = &report.item_errors[0];
    assert_eq!(err.stage, ItemStage::Acquire);
    assert!(err.message.contains("exceeds quota"), "message: {}", err.message);
    assert_eq!(residual_workspaces(&harness.workspace_root()), 0);
}

#[tokio::test]
async fn test_trends_and_outputs_across_runs() {
    let harness = Harness::new(3);
    let config = harness.config(2);
    let store = Arc::new(JsonSnapshotStore::new(&config.snapshot_path));

    // Yesterday only project1 was listed, with fewer stars.
    let yesterday_item = harness.items[0].clone().with_stars(40, 1.0);
    let mut yesterday = Snapshot::from_results(&[AnalysisResult::stub(&yesterday_item)]);
    yesterday.date = Utc::now().date_naive() - chrono::Duration::days(1);
    store.save(&yesterday).await.unwrap();

    let pipeline = Pipeline::builder(config.clone())
        .source(Arc::new(FixtureSource {
            items: harness.items.clone(),
        }))
        .analyzer(Arc::new(ScriptedAnalyzer::default()))
        .materializer(Arc::new(DirectoryMaterializer::new()))
        .snapshots(store.clone())
        .sink(Arc::new(JsonFileSink::new(&config.output_dir)))
        .build()
        .unwrap();

    let report = pipeline.run().await.unwrap();

    assert_eq!(
        report.trends_summary,
        "2 new, 1 returning, fastest riser org/project3 (+3.00/day)"
    );
    assert!(report.snapshot_saved);
    assert!(report.sink_dispatched);
    assert!(!report.notifications_sent, "no notifiers were configured");

    let url = report.sink_url.unwrap();
    let written = std::fs::read_to_string(url.trim_start_matches("file://")).unwrap();
    assert!(written.contains("org/project3"));

    let history = store.history().await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].entries.len(), 3);
}

#[tokio::test]
async fn test_lookalike_names_get_separate_workspaces() {
    let mut harness = Harness::new(2);
    harness.items[0].name = "org/p.x".to_string();
    harness.items[1].name = "org/p_x".to_string();
    let analyzer = Arc::new(ScriptedAnalyzer {
        workspace_root: Some(harness.workspace_root()),
        delay: Duration::from_millis(50),
        ..Default::default()
    });
    let pipeline = harness.pipeline(harness.config(2), analyzer.clone());

    let report = pipeline.run().await.unwrap();

    assert_eq!(report.deep, vec!["org/p.x".to_string(), "org/p_x".to_string()]);
    assert!(report.item_errors.is_empty(), "errors: {:?}", report.item_errors);
    assert!(report.results.iter().all(|r| r.files_analyzed == 2));
    assert_eq!(analyzer.saw_workspace.lock().unwrap().len(), 2);
    assert_eq!(residual_workspaces(&harness.workspace_root()), 0);
}

#[tokio::test]
async fn test_panicking_analyzer_only_loses_its_item() {
    let harness = Harness::new(3);
    let analyzer = Arc::new(ScriptedAnalyzer {
        deep_panics: vec!["org/project2".to_string()],
        workspace_root: Some(harness.workspace_root()),
        ..Default::default()
    });
    let pipeline = harness.pipeline(harness.config(2), analyzer.clone());

    let report = pipeline.run().await.unwrap();

    assert_eq!(report.results.len(), 3);
    assert_eq!(report.deep, vec!["org/project1".to_string(), "org/project3".to_string()]);
    assert_eq!(report.stub, vec!["org/project2".to_string()]);
    assert_eq!(report.results[1].provenance, Provenance::Stub);

    assert_eq!(report.item_errors.len(), 1);
    let err = &report.item_errors[0];
    assert_eq!(err.name, "org/project2");
    assert_eq!(err.stage, ItemStage::Panicked);
    assert!(err.message.contains("analyzer crashed"), "message: {}", err.message);

    // The workspace existed when the analyzer panicked and was still removed.
    assert!(analyzer
        .saw_workspace
        .lock()
        .unwrap()
        .contains(&"org/project2".to_string()));
    assert_eq!(residual_workspaces(&harness.workspace_root()), 0);
}
