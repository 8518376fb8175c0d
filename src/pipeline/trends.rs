//! Run-over-run deltas and technology statistics.

use std::collections::HashMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::types::{AnalysisResult, Snapshot};

/// Number of fastest-growing items reported.
const RISING_LIMIT: usize = 3;

/// Share of one language among the results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LanguageShare {
    pub language: String,
    pub count: usize,
    /// Percentage of all results, 0-100.
    pub percentage: f64,
}

/// Language distribution and average metrics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TechStackStats {
    pub total: usize,
    /// Most common first.
    pub languages: Vec<LanguageShare>,
    pub avg_stars: u64,
    pub avg_growth: f64,
}

/// An item present in both this run and the prior snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReturningEntry {
    pub name: String,
    pub previous_stars: u64,
    pub stars: u64,
    pub star_delta: i64,
}

/// An item ranked by growth rate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RisingEntry {
    pub name: String,
    pub growth_rate: f64,
}

/// Deltas against the prior snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrendReport {
    /// Date of the snapshot compared against, if there was one.
    pub prior_date: Option<NaiveDate>,
    /// Items absent from the prior snapshot. Empty without a prior snapshot.
    pub new_entries: Vec<String>,
    pub returning: Vec<ReturningEntry>,
    pub rising: Vec<RisingEntry>,
    /// One-line description of the above.
    pub summary: String,
}

/// Computes language distribution and averages.
pub fn tech_stack(results: &[AnalysisResult]) -> TechStackStats {
    let total = results.len();
    if total == 0 {
        return TechStackStats::default();
    }

    let mut counts: HashMap<&str, usize> = HashMap::new();
    let mut stars = 0u64;
    let mut growth = 0.0f64;
    for result in results {
        let language = result.language.as_deref().unwrap_or("Unknown");
        *counts.entry(language).or_default() += 1;
        stars += result.stars;
        growth += result.growth_rate;
    }

    let mut languages: Vec<LanguageShare> = counts
        .into_iter()
        .map(|(language, count)| LanguageShare {
            language: language.to_string(),
            count,
            percentage: round2(count as f64 * 100.0 / total as f64),
        })
        .collect();
    languages.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.language.cmp(&b.language)));

    TechStackStats {
        total,
        languages,
        avg_stars: (stars as f64 / total as f64).round() as u64,
        avg_growth: round2(growth / total as f64),
    }
}

/// Compares `results` with the prior run's snapshot.
pub fn compute_trends(results: &[AnalysisResult], prior: Option<&Snapshot>) -> TrendReport {
    let mut report = TrendReport {
        prior_date: prior.map(|s| s.date),
        ..Default::default()
    };

    if let Some(prior) = prior {
        let previous: HashMap<&str, u64> = prior
            .entries
            .iter()
            .map(|e| (e.name.as_str(), e.stars))
            .collect();
        for result in results {
            match previous.get(result.name.as_str()) {
                Some(&previous_stars) => report.returning.push(ReturningEntry {
                    name: result.name.clone(),
                    previous_stars,
                    stars: result.stars,
                    star_delta: result.stars as i64 - previous_stars as i64,
                }),
                None => report.new_entries.push(result.name.clone()),
            }
        }
    }

    let mut ranked: Vec<&AnalysisResult> = results.iter().collect();
    ranked.sort_by(|a, b| b.growth_rate.total_cmp(&a.growth_rate));
    report.rising = ranked
        .into_iter()
        .take(RISING_LIMIT)
        .map(|r| RisingEntry {
            name: r.name.clone(),
            growth_rate: r.growth_rate,
        })
        .collect();

    report.summary = trend_summary(&report, results.len());
    report
}

fn trend_summary(report: &TrendReport, total: usize) -> String {
    let mut parts = Vec::new();
    if !report.new_entries.is_empty() {
        parts.push(format!("{} new", report.new_entries.len()));
    }
    if !report.returning.is_empty() {
        parts.push(format!("{} returning", report.returning.len()));
    }
    if let Some(top) = report.rising.first() {
        parts.push(format!("fastest riser {} (+{:.2}/day)", top.name, top.growth_rate));
    }

    if parts.is_empty() {
        format!("Analyzed {} items", total)
    } else {
        parts.join(", ")
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::{AnalysisPayload, Provenance, WorkItem};
    use chrono::Utc;

    fn result(name: &str, language: Option<&str>, stars: u64, growth: f64) -> AnalysisResult {
        let mut item = WorkItem::new(name, "r1", "src").with_stars(stars, growth);
        if let Some(language) = language {
            item = item.with_language(language);
        }
        AnalysisResult::from_payload(&item, AnalysisPayload::new("x"), Provenance::Deep, 1)
    }

    #[test]
    fn test_tech_stack() {
        let results = vec![
            result("a", Some("Rust"), 100, 1.0),
            result("b", Some("Rust"), 200, 2.0),
            result("c", Some("Go"), 300, 3.0),
            result("d", None, 401, 0.0),
        ];
        let stats = tech_stack(&results);
        assert_eq!(stats.total, 4);
        assert_eq!(stats.avg_stars, 250);
        assert_eq!(stats.avg_growth, 1.5);
        assert_eq!(stats.languages[0].language, "Rust");
        assert_eq!(stats.languages[0].count, 2);
        assert_eq!(stats.languages[0].percentage, 50.0);
        let names: Vec<&str> = stats.languages.iter().map(|l| l.language.as_str()).collect();
        assert_eq!(names, vec!["Rust", "Go", "Unknown"]);
    }

    #[test]
    fn test_tech_stack_empty() {
        assert_eq!(tech_stack(&[]), TechStackStats::default());
    }

    #[test]
    fn test_trends_without_prior() {
        let results = vec![
            result("slow", None, 10, 0.5),
            result("fast", None, 10, 9.0),
            result("mid", None, 10, 3.0),
            result("tiny", None, 10, 0.1),
        ];
        let trends = compute_trends(&results, None);
        assert!(trends.prior_date.is_none());
        assert!(trends.new_entries.is_empty());
        let rising: Vec<&str> = trends.rising.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(rising, vec!["fast", "mid", "slow"]);
        assert_eq!(trends.summary, "fastest riser fast (+9.00/day)");
    }

    #[test]
    fn test_trends_against_prior() {
        let prior = Snapshot::from_results(&[result("kept", None, 100, 1.0), result("gone", None, 5, 0.0)]);
        let results = vec![result("kept", None, 150, 1.0), result("fresh", None, 20, 2.0)];

        let trends = compute_trends(&results, Some(&prior));
        assert_eq!(trends.prior_date, Some(Utc::now().date_naive()));
        assert_eq!(trends.new_entries, vec!["fresh".to_string()]);
        assert_eq!(trends.returning.len(), 1);
        assert_eq!(trends.returning[0].star_delta, 50);
        assert_eq!(trends.summary, "1 new, 1 returning, fastest riser fresh (+2.00/day)");
    }

    #[test]
    fn test_summary_for_empty_run() {
        assert_eq!(compute_trends(&[], None).summary, "Analyzed 0 items");
    }
}
