//! Bounded content extraction from a materialized workspace.
//!
//! Walks the tree depth-first, skipping dependency caches, build outputs,
//! tests and version-control metadata. Accepted source files are ranked by
//! entry-point name, then depth, then path, and their structural previews
//! are accumulated until the next one would exceed the content budget.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path};

use globset::{Glob, GlobSet, GlobSetBuilder};
use tracing::debug;
use walkdir::WalkDir;

use crate::error::WorkspaceError;

use super::types::{ContentDigest, FilePreview, WorkspaceConfig};

/// Directories never descended into.
const IGNORED_DIRS: &[&str] = &[
    "**/node_modules",
    "**/dist",
    "**/build",
    "**/out",
    "**/coverage",
    "**/.git",
    "**/vendor",
    "**/__tests__",
    "**/test",
    "**/tests",
    "**/.vscode",
    "**/.idea",
];

/// Files skipped even when their extension is accepted.
const IGNORED_FILES: &[&str] = &[
    "**/*.min.js",
    "**/*.min.css",
    "**/*.test.js",
    "**/*.test.ts",
    "**/*.spec.js",
    "**/*.spec.ts",
    "**/*.d.ts",
    "**/*.map",
];

/// Extensions treated as source code.
const CODE_EXTENSIONS: &[&str] = &[
    "js", "ts", "jsx", "tsx", "vue", "py", "go", "rs", "java", "c", "cpp", "h", "cs", "rb", "php",
    "swift", "kt",
];

/// Entry-point file stems and their ranking weight.
const PRIORITY_STEMS: &[(&str, u8)] = &[
    ("index", 10),
    ("main", 9),
    ("app", 8),
    ("core", 7),
    ("init", 6),
    ("utils", 5),
    ("package", 4),
];

/// Entries shown per directory level in the summary tree.
const SUMMARY_ENTRIES_PER_LEVEL: usize = 20;

/// Compiled ignore rules for extraction.
#[derive(Debug, Clone)]
pub struct IgnoreRules {
    dirs: GlobSet,
    files: GlobSet,
}

impl IgnoreRules {
    /// Builds the default rule set.
    pub fn new() -> Result<Self, WorkspaceError> {
        Ok(Self {
            dirs: build_set(IGNORED_DIRS)?,
            files: build_set(IGNORED_FILES)?,
        })
    }

    /// Whether a directory (relative path) is skipped along with its subtree.
    pub fn excludes_dir(&self, rel: &Path) -> bool {
        self.dirs.is_match(rel)
    }

    /// Whether a file (relative path) is skipped.
    pub fn excludes_file(&self, rel: &Path) -> bool {
        self.files.is_match(rel)
    }
}

fn build_set(patterns: &[&str]) -> Result<GlobSet, WorkspaceError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

/// A source file eligible for preview.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    /// `/`-separated path relative to the workspace root.
    pub rel_path: String,
    /// Size on disk.
    pub size: u64,
}

impl Candidate {
    fn priority(&self) -> u8 {
        let file_name = self.rel_path.rsplit('/').next().unwrap_or(&self.rel_path);
        let stem = match file_name.rfind('.') {
            Some(idx) if idx > 0 => &file_name[..idx],
            _ => file_name,
        };
        let stem = stem.to_ascii_lowercase();
        PRIORITY_STEMS
            .iter()
            .find(|(name, _)| *name == stem)
            .map(|(_, weight)| *weight)
            .unwrap_or(0)
    }

    fn depth(&self) -> usize {
        self.rel_path.split('/').count()
    }
}

fn is_code_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| CODE_EXTENSIONS.contains(&ext))
}

fn to_rel_string(rel: &Path) -> String {
    rel.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Collects candidate files, stopping once `max_file_count` are found.
///
/// Unreadable directories and entries are skipped.
pub fn collect_candidates(root: &Path, rules: &IgnoreRules, config: &WorkspaceConfig) -> Vec<Candidate> {
    let mut candidates = Vec::new();
    if config.max_file_count == 0 {
        return candidates;
    }

    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            if entry.depth() == 0 || !entry.file_type().is_dir() {
                return true;
            }
            match entry.path().strip_prefix(root) {
                Ok(rel) => !rules.excludes_dir(rel),
                Err(_) => false,
            }
        });

    for entry in walker.filter_map(Result::ok) {
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(rel) = entry.path().strip_prefix(root) else {
            continue;
        };
        if rules.excludes_file(rel) || !is_code_file(rel) {
            continue;
        }
        let Ok(metadata) = entry.metadata() else {
            continue;
        };
        if metadata.len() >= config.max_file_bytes {
            continue;
        }

        candidates.push(Candidate {
            rel_path: to_rel_string(rel),
            size: metadata.len(),
        });
        if candidates.len() >= config.max_file_count {
            debug!(limit = config.max_file_count, "File count cap reached");
            break;
        }
    }
    candidates
}

/// Orders candidates: entry-point names first, then shallower, then by path.
pub fn sort_by_priority(candidates: &mut [Candidate]) {
    candidates.sort_by(|a, b| {
        b.priority()
            .cmp(&a.priority())
            .then_with(|| a.depth().cmp(&b.depth()))
            .then_with(|| a.rel_path.cmp(&b.rel_path))
    });
}

/// Keeps at most `max_chars` characters of meaningful lines.
///
/// Blank lines, line comments, block comment openers and import/export
/// statements are dropped. Lines are kept whole; the first line that would
/// overflow the budget ends the preview.
pub fn structural_preview(content: &str, max_chars: usize) -> String {
    let mut kept: Vec<&str> = Vec::new();
    let mut used = 0usize;

    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty()
            || trimmed.starts_with("//")
            || trimmed.starts_with('#')
            || trimmed.starts_with("/*")
            || trimmed.starts_with("import ")
            || trimmed.starts_with("export ")
        {
            continue;
        }

        let len = line.chars().count();
        if used + len > max_chars {
            break;
        }
        kept.push(line);
        used += len + 1;
    }
    kept.join("\n")
}

#[derive(Default)]
struct TreeNode {
    children: BTreeMap<String, TreeNode>,
}

/// Renders candidate paths as an indented tree, directories suffixed `/`.
pub fn directory_summary(candidates: &[Candidate]) -> String {
    let mut root = TreeNode::default();
    for candidate in candidates {
        let mut node = &mut root;
        for part in candidate.rel_path.split('/') {
            node = node.children.entry(part.to_string()).or_default();
        }
    }

    let mut lines = Vec::new();
    format_tree(&root, 0, &mut lines);
    lines.join("\n")
}

fn format_tree(node: &TreeNode, indent: usize, lines: &mut Vec<String>) {
    for (name, child) in node.children.iter().take(SUMMARY_ENTRIES_PER_LEVEL) {
        let prefix = "  ".repeat(indent);
        if child.children.is_empty() {
            lines.push(format!("{}{}", prefix, name));
        } else {
            lines.push(format!("{}{}/", prefix, name));
            format_tree(child, indent + 1, lines);
        }
    }
}

/// Builds the content digest of the tree at `root`.
///
/// Files that cannot be read as UTF-8 text are skipped.
pub fn build_digest(
    root: &Path,
    rules: &IgnoreRules,
    config: &WorkspaceConfig,
    max_content_bytes: usize,
) -> ContentDigest {
    let mut candidates = collect_candidates(root, rules, config);
    sort_by_priority(&mut candidates);

    let mut digest = ContentDigest {
        summary: directory_summary(&candidates),
        files: Vec::new(),
        candidate_files: candidates.len(),
        total_size: 0,
    };

    let mut used = 0usize;
    for candidate in &candidates {
        if used >= max_content_bytes {
            break;
        }
        let content = match fs::read_to_string(root.join(&candidate.rel_path)) {
            Ok(content) => content,
            Err(e) => {
                debug!(path = %candidate.rel_path, error = %e, "Skipping unreadable file");
                continue;
            }
        };

        let preview = structural_preview(&content, config.preview_chars);
        if preview.is_empty() {
            continue;
        }
        if used + preview.len() > max_content_bytes {
            break;
        }
        used += preview.len();
        digest.total_size += candidate.size;
        digest.files.push(FilePreview {
            path: candidate.rel_path.clone(),
            preview,
            size: candidate.size,
        });
    }

    debug!(
        candidates = digest.candidate_files,
        previewed = digest.files.len(),
        preview_bytes = used,
        "Built content digest"
    );
    digest
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn paths(candidates: &[Candidate]) -> Vec<&str> {
        candidates.iter().map(|c| c.rel_path.as_str()).collect()
    }

    #[test]
    fn test_ignore_rules() {
        let rules = IgnoreRules::new().unwrap();
        assert!(rules.excludes_dir(Path::new("node_modules")));
        assert!(rules.excludes_dir(Path::new("packages/web/node_modules")));
        assert!(rules.excludes_dir(Path::new("tests")));
        assert!(rules.excludes_dir(Path::new(".git")));
        assert!(!rules.excludes_dir(Path::new("src")));
        assert!(!rules.excludes_dir(Path::new("latest")));

        assert!(rules.excludes_file(Path::new("lib/jquery.min.js")));
        assert!(rules.excludes_file(Path::new("types.d.ts")));
        assert!(rules.excludes_file(Path::new("src/app.spec.ts")));
        assert!(!rules.excludes_file(Path::new("src/app.ts")));
    }

    #[test]
    fn test_collect_skips_ignored_and_non_code() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        write(root, "src/main.rs", "fn main() {}");
        write(root, "node_modules/pkg/index.js", "module.exports = 1;");
        write(root, "tests/it.rs", "fn t() {}");
        write(root, "README.md", "# readme");
        write(root, "dist/bundle.min.js", "x");
        write(root, "web/app.test.js", "x");
        write(root, "web/app.js", "let a = 1;");

        let rules = IgnoreRules::new().unwrap();
        let mut found = collect_candidates(root, &rules, &WorkspaceConfig::new(root));
        sort_by_priority(&mut found);
        assert_eq!(paths(&found), vec!["src/main.rs", "web/app.js"]);
    }

    #[test]
    fn test_collect_respects_size_and_count_limits() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        write(root, "big.py", &"x = 1\n".repeat(100));
        for i in 0..5 {
            write(root, &format!("m{}.py", i), "y = 2");
        }

        let rules = IgnoreRules::new().unwrap();
        let config = WorkspaceConfig::new(root).with_max_file_bytes(100);
        let found = collect_candidates(root, &rules, &config);
        assert!(found.iter().all(|c| c.rel_path != "big.py"));
        assert_eq!(found.len(), 5);

        let config = config.with_max_file_count(3);
        assert_eq!(collect_candidates(root, &rules, &config).len(), 3);
    }

    #[test]
    fn test_priority_order() {
        let mut candidates: Vec<Candidate> = ["lib/zeta.rs", "src/deep/main.rs", "utils.js", "a.rs", "index.ts", "src/app.py"]
            .iter()
            .map(|p| Candidate {
                rel_path: p.to_string(),
                size: 1,
            })
            .collect();
        sort_by_priority(&mut candidates);
        assert_eq!(
            paths(&candidates),
            vec!["index.ts", "src/deep/main.rs", "src/app.py", "utils.js", "a.rs", "lib/zeta.rs"]
        );
    }

    #[test]
    fn test_structural_preview() {
        let source = "import os\n\n# comment\n// also\n/* block */\nexport default x\ndef run():\n    return 1\n";
        assert_eq!(structural_preview(source, 500), "def run():\n    return 1");

        // The second line would overflow: 10 + 1 + 12 > 20.
        assert_eq!(structural_preview("def run():\n    return 1\n", 20), "def run():");
    }

    #[test]
    fn test_directory_summary() {
        let candidates: Vec<Candidate> = ["src/main.rs", "src/lib/mod.rs", "build.rs"]
            .iter()
            .map(|p| Candidate {
                rel_path: p.to_string(),
                size: 1,
            })
            .collect();
        assert_eq!(
            directory_summary(&candidates),
            "build.rs\nsrc/\n  lib/\n    mod.rs\n  main.rs"
        );
    }

    #[test]
    fn test_summary_caps_entries_per_level() {
        let candidates: Vec<Candidate> = (0..30)
            .map(|i| Candidate {
                rel_path: format!("f{:02}.rs", i),
                size: 1,
            })
            .collect();
        assert_eq!(directory_summary(&candidates).lines().count(), 20);
    }

    #[test]
    fn test_digest_stops_at_budget() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        write(root, "index.js", "const a = 1;");
        write(root, "main.js", "const b = 2;");
        write(root, "other.js", "const c = 3;");

        let rules = IgnoreRules::new().unwrap();
        let config = WorkspaceConfig::new(root);

        let digest = build_digest(root, &rules, &config, 24);
        assert_eq!(digest.candidate_files, 3);
        let previewed: Vec<&str> = digest.files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(previewed, vec!["index.js", "main.js"]);
        assert_eq!(digest.total_size, 24);
        assert!(digest.preview_bytes() <= 24);

        let digest = build_digest(root, &rules, &config, 10_000);
        assert_eq!(digest.files.len(), 3);
    }

    #[test]
    fn test_digest_skips_binary_files() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        fs::write(root.join("blob.c"), [0xff, 0xfe, 0x00, 0x81]).unwrap();
        write(root, "ok.c", "int x = 1;");

        let rules = IgnoreRules::new().unwrap();
        let digest = build_digest(root, &rules, &WorkspaceConfig::new(root), 1000);
        assert_eq!(digest.files.len(), 1);
        assert_eq!(digest.files[0].path, "ok.c");
    }
}
