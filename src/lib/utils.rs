//! Small path helpers shared by the gateway, discovery, and collector.
//!
//! Jenkins identifies a job by its full path: zero or more folder segments
//! and a leaf name, separated by `/`. The helpers here keep that format
//! canonical across the crate.

/// Trim whitespace and surrounding slashes from a raw job path.
///
/// Returns `None` when nothing is left, so callers can drop empty entries.
pub fn canonicalize_job_path(raw: &str) -> Option<String> {
    let trimmed = raw.trim().trim_matches('/');
    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed.to_string())
}

/// The first `/`-separated segment of a full job path.
///
/// For a top-level job the segment is the job name itself; exclusion
/// matching is exact on this value.
pub fn top_level_segment(path: &str) -> &str {
    path.split('/').next().unwrap_or(path)
}

/// Build the full path of a child node seen while walking a folder.
///
/// Jenkins may report a nested node under its leaf name only, so the
/// ancestor prefix has to be carried by the traversal. A name that already
/// contains the separator is taken as-is.
pub fn synthesize_child_path(parent_path: &str, child_name: &str) -> String {
    if parent_path.is_empty() || child_name.contains('/') {
        child_name.to_string()
    } else {
        format!("{parent_path}/{child_name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonicalize_strips_slashes_and_whitespace() {
        assert_eq!(
            canonicalize_job_path(" /release/api/ "),
            Some("release/api".to_string())
        );
        assert_eq!(canonicalize_job_path("job"), Some("job".to_string()));
        assert_eq!(canonicalize_job_path("  "), None);
        assert_eq!(canonicalize_job_path("//"), None);
    }

    #[test]
    fn top_level_segment_is_exact_first_segment() {
        assert_eq!(top_level_segment("release/api"), "release");
        assert_eq!(top_level_segment("solo-job"), "solo-job");
        assert_eq!(top_level_segment("a/b/c"), "a");
    }

    #[test]
    fn child_path_synthesis_preserves_existing_separators() {
        assert_eq!(synthesize_child_path("", "release"), "release");
        assert_eq!(synthesize_child_path("release", "api"), "release/api");
        // Jenkins sometimes reports the full path itself; keep it.
        assert_eq!(
            synthesize_child_path("release", "release/api"),
            "release/api"
        );
    }
}
