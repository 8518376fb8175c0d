//! Offline analyzer that summarizes a digest without calling a model.

use async_trait::async_trait;

use crate::error::ExternalError;
use crate::pipeline::{AnalysisPayload, Analyzer, WorkItem};
use crate::utils::truncate_chars;
use crate::workspace::ContentDigest;

/// Characters of the README paragraph quoted in a payload.
const OVERVIEW_CHARS: usize = 300;

/// Key files listed in a deep payload.
const MAX_KEY_FILES: usize = 8;

/// Builds markdown payloads from item metadata, the README and the digest.
///
/// Deterministic, so repeated calls are idempotent.
#[derive(Debug, Clone, Default)]
pub struct DigestAnalyzer;

impl DigestAnalyzer {
    pub fn new() -> Self {
        Self
    }

    fn overview(item: &WorkItem, supplementary: &str) -> Option<String> {
        item.description
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map(str::to_string)
            .or_else(|| first_paragraph(supplementary))
    }
}

#[async_trait]
impl Analyzer for DigestAnalyzer {
    async fn deep_analyze(
        &self,
        item: &WorkItem,
        digest: &ContentDigest,
        supplementary: &str,
    ) -> Result<AnalysisPayload, ExternalError> {
        if digest.is_empty() {
            return Err(ExternalError::Analysis(format!("{}: no readable source files", item.name)));
        }

        let mut out = format!("## {}\n\n", item.name);
        let overview = Self::overview(item, supplementary)
            .unwrap_or_else(|| format!("{} source files sampled", digest.files.len()));
        out.push_str(&overview);
        out.push_str("\n\n");

        out.push_str(&format!(
            "- Language: {}\n- Candidate files: {}\n- Previewed: {} ({} bytes)\n\n",
            item.language.as_deref().unwrap_or("Unknown"),
            digest.candidate_files,
            digest.files.len(),
            digest.preview_bytes()
        ));

        out.push_str("### Key files\n\n");
        for file in digest.files.iter().take(MAX_KEY_FILES) {
            out.push_str(&format!("- `{}` ({} bytes)\n", file.path, file.size));
        }

        out.push_str("\n### Layout\n\n```\n");
        out.push_str(&digest.summary);
        if !digest.summary.ends_with('\n') {
            out.push('\n');
        }
        out.push_str("```\n");
        Ok(AnalysisPayload::new(out))
    }

    async fn fallback_analyze(
        &self,
        item: &WorkItem,
        supplementary: &str,
    ) -> Result<AnalysisPayload, ExternalError> {
        let overview = Self::overview(item, supplementary)
            .ok_or_else(|| ExternalError::Analysis(format!("{}: nothing to analyze", item.name)))?;

        Ok(AnalysisPayload::new(format!(
            "## {}\n\n{}\n\n- Language: {}\n- Stars: {}\n",
            item.name,
            overview,
            item.language.as_deref().unwrap_or("Unknown"),
            item.stars
        )))
    }
}

/// First prose paragraph of a markdown document, skipping headings and badges.
fn first_paragraph(text: &str) -> Option<String> {
    let paragraph = text
        .split("\n\n")
        .map(str::trim)
        .find(|p| !p.is_empty() && !p.starts_with('#') && !p.starts_with("[![") && !p.starts_with("!["))?;
    let joined = paragraph.lines().map(str::trim).collect::<Vec<_>>().join(" ");
    Some(truncate_chars(&joined, OVERVIEW_CHARS).to_string())
}
