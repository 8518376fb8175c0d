//! Shared utility functions for digest-forge.
//!
//! Small helpers used by more than one subsystem: filesystem-safe naming
//! and byte/size formatting for logs.

/// Replaces every character outside `[A-Za-z0-9_-]` with `_`.
///
/// Used for workspace directory names and persisted cache file names, so a
/// name like `../../etc` can never escape its parent directory.
pub fn sanitize_component(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Formats a byte count as megabytes with two decimals.
pub fn format_mb(bytes: u64) -> String {
    format!("{:.2}MB", bytes as f64 / (1024.0 * 1024.0))
}

/// Truncates a string to at most `max_chars` characters on a char boundary.
pub fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_component() {
        assert_eq!(sanitize_component("owner/repo"), "owner_repo");
        assert_eq!(sanitize_component("../../etc/passwd"), "______etc_passwd");
        assert_eq!(sanitize_component("ok-name_1"), "ok-name_1");
        assert_eq!(sanitize_component("analysis:ab12"), "analysis_ab12");
    }

    #[test]
    fn test_format_mb() {
        assert_eq!(format_mb(1024 * 1024), "1.00MB");
        assert_eq!(format_mb(0), "0.00MB");
    }

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("hello", 3), "hel");
        assert_eq!(truncate_chars("hi", 10), "hi");
        assert_eq!(truncate_chars("héllo", 2), "hé");
    }
}
