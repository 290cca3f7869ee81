//! Bucket path normalization.
//!
//! Bucket paths are slash-separated and relative to the bucket root. The same
//! logical file can be spelled several ways (`a/./b.proto`, `a/x/../b.proto`),
//! so every boundary that accepts a path runs it through [`normalize`] before
//! comparing or looking it up.
//!
//! The normalized form of the root itself is `"."`.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    #[error("{path}: expected a relative path")]
    Absolute { path: String },
    #[error("{path}: path is outside the bucket root")]
    OutsideRoot { path: String },
    #[error("{path}: path is not in normalized form")]
    NotNormalized { path: String },
}

/// Normalize a bucket path: resolve `.` and `..`, collapse repeated slashes and
/// strip trailing slashes.
///
/// Absolute paths and paths that escape the root are rejected.
pub fn normalize(path: &str) -> Result<String, PathError> {
    if path.starts_with('/') {
        return Err(PathError::Absolute {
            path: path.to_string(),
        });
    }
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if segments.pop().is_none() {
                    return Err(PathError::OutsideRoot {
                        path: path.to_string(),
                    });
                }
            }
            other => segments.push(other),
        }
    }
    if segments.is_empty() {
        return Ok(".".to_string());
    }
    Ok(segments.join("/"))
}

/// Join two bucket paths and normalize the result.
pub fn join(dir: &str, path: &str) -> Result<String, PathError> {
    if dir.is_empty() || dir == "." {
        return normalize(path);
    }
    normalize(&format!("{dir}/{path}"))
}

/// Whether `path` equals `dir` or lives below it, compared on segment
/// boundaries. Both arguments must already be normalized.
pub fn is_under(path: &str, dir: &str) -> bool {
    if dir == "." {
        return true;
    }
    path == dir
        || (path.len() > dir.len() && path.starts_with(dir) && path.as_bytes()[dir.len()] == b'/')
}

/// Strip `dir` from the front of `path`. Returns `None` when `path` is not
/// strictly below `dir`.
pub fn relative_to<'a>(path: &'a str, dir: &str) -> Option<&'a str> {
    if dir == "." {
        return if path == "." { None } else { Some(path) };
    }
    path.strip_prefix(dir)?.strip_prefix('/')
}

/// File extension including the dot, or `""`.
pub fn ext(path: &str) -> &str {
    let base = path.rsplit('/').next().unwrap_or(path);
    match base.rfind('.') {
        Some(idx) if idx > 0 => &base[idx..],
        _ => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_resolves_dot_segments() {
        assert_eq!(normalize("a/./b.proto").unwrap(), "a/b.proto");
        assert_eq!(normalize("google/../google/type/date.proto").unwrap(), "google/type/date.proto");
        assert_eq!(normalize("a//b/").unwrap(), "a/b");
        assert_eq!(normalize("./").unwrap(), ".");
        assert_eq!(normalize("").unwrap(), ".");
    }

    #[test]
    fn normalize_rejects_escapes_and_absolute_paths() {
        assert_eq!(
            normalize("a/../../b"),
            Err(PathError::OutsideRoot {
                path: "a/../../b".to_string()
            })
        );
        assert!(matches!(normalize("/etc/passwd"), Err(PathError::Absolute { .. })));
    }

    #[test]
    fn is_under_respects_segment_boundaries() {
        assert!(is_under("proto/a.proto", "proto"));
        assert!(is_under("proto", "proto"));
        assert!(!is_under("protos/a.proto", "proto"));
        assert!(is_under("anything", "."));
    }

    #[test]
    fn relative_to_strips_directory() {
        assert_eq!(relative_to("proto/a/b.proto", "proto"), Some("a/b.proto"));
        assert_eq!(relative_to("a.proto", "."), Some("a.proto"));
        assert_eq!(relative_to("proto", "proto"), None);
        assert_eq!(relative_to("other/a.proto", "proto"), None);
    }

    #[test]
    fn ext_returns_last_suffix() {
        assert_eq!(ext("a/b.proto"), ".proto");
        assert_eq!(ext("a.b/c"), "");
        assert_eq!(ext(".hidden"), "");
    }
}
