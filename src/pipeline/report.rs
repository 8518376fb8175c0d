//! Run report and notification text.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tera::{Context, Tera};
use tracing::warn;
use uuid::Uuid;

use super::types::{Aggregate, AnalysisResult, Provenance};

/// Per-item stage at which a degradation happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStage {
    SupplementaryText,
    Acquire,
    Extract,
    DeepAnalysis,
    FallbackAnalysis,
    /// A collaborator panicked while the item was being analyzed.
    Panicked,
}

impl std::fmt::Display for ItemStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ItemStage::SupplementaryText => "supplementary_text",
            ItemStage::Acquire => "acquire",
            ItemStage::Extract => "extract",
            ItemStage::DeepAnalysis => "deep_analysis",
            ItemStage::FallbackAnalysis => "fallback_analysis",
            ItemStage::Panicked => "panicked",
        };
        f.write_str(s)
    }
}

/// A handled per-item failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemError {
    pub name: String,
    pub stage: ItemStage,
    pub message: String,
}

impl std::fmt::Display for ItemError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} [{}]: {}", self.name, self.stage, self.message)
    }
}

/// Outcome of one pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub total_items: usize,
    /// One entry per collected item, in collection order.
    pub results: Vec<AnalysisResult>,
    /// Item names per provenance tier.
    pub cache_hits: Vec<String>,
    pub deep: Vec<String>,
    pub fallback: Vec<String>,
    pub stub: Vec<String>,
    pub item_errors: Vec<ItemError>,
    pub trends_summary: String,
    pub snapshot_saved: bool,
    pub sink_url: Option<String>,
    pub sink_dispatched: bool,
    /// True only if every notifier succeeded.
    pub notifications_sent: bool,
    pub workspaces_reclaimed: usize,
    pub expired_cache_entries: usize,
}

impl RunReport {
    /// Names of items produced by `provenance`, in collection order.
    pub fn names_with(&self, provenance: Provenance) -> &[String] {
        match provenance {
            Provenance::CacheHit => &self.cache_hits,
            Provenance::Deep => &self.deep,
            Provenance::Fallback => &self.fallback,
            Provenance::Stub => &self.stub,
        }
    }

    /// Whether every item got a cached or deep analysis.
    pub fn fully_succeeded(&self) -> bool {
        self.fallback.is_empty() && self.stub.is_empty()
    }
}

/// Item names grouped by tier.
pub(crate) fn partition_by_provenance(results: &[AnalysisResult]) -> [Vec<String>; 4] {
    let mut tiers: [Vec<String>; 4] = Default::default();
    for result in results {
        let slot = match result.provenance {
            Provenance::CacheHit => 0,
            Provenance::Deep => 1,
            Provenance::Fallback => 2,
            Provenance::Stub => 3,
        };
        tiers[slot].push(result.name.clone());
    }
    tiers
}

const SUMMARY_TEMPLATE: &str = r#"Repository digest {{ date }}
{% if trends %}{{ trends }}
{% endif %}
Highlights:
{% for item in items %}{{ loop.index }}. {{ item.name }} [{{ item.provenance }}]
   Language: {{ item.language }}, growth: +{{ item.growth }}/day
{% if item.headline %}   {{ item.headline }}
{% endif %}{% endfor %}
Tech stack:
{% for lang in languages %}- {{ lang.language }}: {{ lang.count }} ({{ lang.percentage }}%)
{% endfor %}
Tiers: {{ cached }} cached, {{ deep }} deep, {{ fallback }} fallback, {{ stub }} stub"#;

#[derive(Serialize)]
struct ItemView<'a> {
    name: &'a str,
    provenance: String,
    language: &'a str,
    growth: String,
    headline: &'a str,
}

/// Renders the notification text for an aggregate.
pub fn render_summary(aggregate: &Aggregate) -> String {
    let items: Vec<ItemView<'_>> = aggregate
        .results
        .iter()
        .map(|r| ItemView {
            name: &r.name,
            provenance: r.provenance.to_string(),
            language: r.language.as_deref().unwrap_or("Unknown"),
            growth: format!("{:.2}", r.growth_rate),
            headline: &r.summary,
        })
        .collect();
    let [cached, deep, fallback, stub] = partition_by_provenance(&aggregate.results);

    let mut context = Context::new();
    context.insert("date", &aggregate.date.to_string());
    context.insert("trends", &aggregate.trends.summary);
    context.insert("items", &items);
    context.insert("languages", &aggregate.tech_stack.languages);
    context.insert("cached", &cached.len());
    context.insert("deep", &deep.len());
    context.insert("fallback", &fallback.len());
    context.insert("stub", &stub.len());

    match Tera::one_off(SUMMARY_TEMPLATE, &context, false) {
        Ok(text) => text,
        Err(e) => {
            warn!(error = %e, "Summary template failed, using plain summary");
            format!(
                "Repository digest {}: {} items. {}",
                aggregate.date,
                aggregate.results.len(),
                aggregate.trends.summary
            )
        }
    }
}

/// Appends the sink link to the summary when the sink succeeded.
pub fn notification_text(summary: &str, sink_url: Option<&str>) -> String {
    match sink_url {
        Some(url) => format!("{}\n\nFull report: {}", summary, url),
        None => summary.to_string(),
    }
}
