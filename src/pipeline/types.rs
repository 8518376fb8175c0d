//! Data model flowing through a pipeline run.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::trends::{TechStackStats, TrendReport};

/// One candidate enumerated by the item source. Immutable for the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    /// Identity, e.g. `owner/repo`.
    pub name: String,
    /// Update marker, e.g. the last-push timestamp. Part of the cache key.
    pub revision: String,
    /// What the materializer fetches: a clone URL or a local path.
    pub source_ref: String,
    /// Human-facing link.
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub stars: u64,
    /// Stars gained per day.
    #[serde(default)]
    pub growth_rate: f64,
}

impl WorkItem {
    /// Creates an item with the required fields.
    pub fn new(
        name: impl Into<String>,
        revision: impl Into<String>,
        source_ref: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            revision: revision.into(),
            source_ref: source_ref.into(),
            url: String::new(),
            description: None,
            language: None,
            stars: 0,
            growth_rate: 0.0,
        }
    }

    /// Builder method to set the link.
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// Builder method to set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Builder method to set the primary language.
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    /// Builder method to set star metrics.
    pub fn with_stars(mut self, stars: u64, growth_rate: f64) -> Self {
        self.stars = stars;
        self.growth_rate = growth_rate;
        self
    }

    /// Fields that identify a cacheable analysis of this item.
    pub fn fingerprint_fields(&self) -> serde_json::Value {
        serde_json::json!({ "name": self.name, "revision": self.revision })
    }
}

/// Analyzer output: markdown text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisPayload {
    pub content: String,
}

impl AnalysisPayload {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
        }
    }

    /// First meaningful line, with heading and quote markers removed.
    pub fn headline(&self) -> String {
        self.content
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .map(|l| {
                l.trim_start_matches(['>', '*', '-', ' '])
                    .replace("**", "")
                    .trim()
                    .to_string()
            })
            .find(|l| !l.is_empty())
            .unwrap_or_default()
    }
}

/// Which degradation tier produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    /// Served from the result cache.
    CacheHit,
    /// Deep analysis over a workspace digest.
    Deep,
    /// Fallback analysis over the supplementary text only.
    Fallback,
    /// Minimal stub built from item metadata.
    Stub,
}

impl std::fmt::Display for Provenance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Provenance::CacheHit => "cache_hit",
            Provenance::Deep => "deep",
            Provenance::Fallback => "fallback",
            Provenance::Stub => "stub",
        };
        f.write_str(s)
    }
}

/// Per-item output record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub name: String,
    pub url: String,
    pub language: Option<String>,
    pub stars: u64,
    pub growth_rate: f64,
    pub description: Option<String>,
    pub payload: AnalysisPayload,
    /// Files previewed for deep analysis; 0 for other tiers.
    pub files_analyzed: usize,
    /// One-line headline of the payload.
    pub summary: String,
    pub provenance: Provenance,
    pub analyzed_at: DateTime<Utc>,
}

impl AnalysisResult {
    /// Builds a result for `item` from an analyzer payload.
    pub fn from_payload(
        item: &WorkItem,
        payload: AnalysisPayload,
        provenance: Provenance,
        files_analyzed: usize,
    ) -> Self {
        Self {
            name: item.name.clone(),
            url: item.url.clone(),
            language: item.language.clone(),
            stars: item.stars,
            growth_rate: item.growth_rate,
            description: item.description.clone(),
            summary: payload.headline(),
            payload,
            files_analyzed,
            provenance,
            analyzed_at: Utc::now(),
        }
    }

    /// Minimal result when every analysis tier failed.
    pub fn stub(item: &WorkItem) -> Self {
        let mut content = format!("## {}\n\n", item.name);
        content.push_str(&format!(
            "- Language: {}\n",
            item.language.as_deref().unwrap_or("Unknown")
        ));
        content.push_str(&format!("- Stars: {}\n", item.stars));
        content.push_str(&format!(
            "- Description: {}\n",
            item.description.as_deref().unwrap_or("No description")
        ));
        content.push_str("\nAnalysis unavailable for this run.\n");
        Self::from_payload(item, AnalysisPayload::new(content), Provenance::Stub, 0)
    }

    /// Re-tags a cached result for the current run, refreshing item metrics.
    pub fn from_cache(item: &WorkItem, cached: AnalysisResult) -> Self {
        Self {
            url: item.url.clone(),
            language: item.language.clone(),
            stars: item.stars,
            growth_rate: item.growth_rate,
            description: item.description.clone(),
            provenance: Provenance::CacheHit,
            ..cached
        }
    }
}

/// One row of a persisted run snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub name: String,
    pub url: String,
    pub language: Option<String>,
    pub stars: u64,
    pub growth_rate: f64,
    pub description: Option<String>,
    pub summary: String,
}

impl From<&AnalysisResult> for SnapshotEntry {
    fn from(result: &AnalysisResult) -> Self {
        Self {
            name: result.name.clone(),
            url: result.url.clone(),
            language: result.language.clone(),
            stars: result.stars,
            growth_rate: result.growth_rate,
            description: result.description.clone(),
            summary: result.summary.clone(),
        }
    }
}

/// Durable record of one run, read back by the next run for deltas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub date: NaiveDate,
    pub taken_at: DateTime<Utc>,
    pub entries: Vec<SnapshotEntry>,
}

impl Snapshot {
    /// Snapshot of `results` taken now.
    pub fn from_results(results: &[AnalysisResult]) -> Self {
        let taken_at = Utc::now();
        Self {
            date: taken_at.date_naive(),
            taken_at,
            entries: results.iter().map(SnapshotEntry::from).collect(),
        }
    }
}

/// Everything dispatched to the sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Aggregate {
    pub run_id: Uuid,
    pub date: NaiveDate,
    pub results: Vec<AnalysisResult>,
    pub tech_stack: TechStackStats,
    pub trends: TrendReport,
    /// Text sent to notifiers.
    pub summary_text: String,
}
