//! Glob pattern matching utilities for path filtering

use globset::{Glob, GlobSet, GlobSetBuilder};

/// A compiled set of ignore globs matched against workspace-relative paths
#[derive(Debug)]
pub struct IgnoreGlobs {
    set: GlobSet,
    /// Patterns that failed to compile fall back to substring matching
    fallback: Vec<String>,
}

impl IgnoreGlobs {
    /// Compile a list of double-star glob patterns
    ///
    /// Invalid patterns are not fatal: they degrade to substring matching,
    /// with a warning per pattern.
    pub fn compile(patterns: &[String]) -> Self {
        let mut builder = GlobSetBuilder::new();
        let mut fallback = Vec::new();

        for pattern in patterns {
            match Glob::new(pattern) {
                Ok(glob) => {
                    builder.add(glob);
                }
                Err(e) => {
                    tracing::warn!(
                        "Invalid glob pattern '{}', falling back to substring match: {}",
                        pattern,
                        e
                    );
                    fallback.push(pattern.clone());
                }
            }
        }

        let set = builder.build().unwrap_or_else(|e| {
            tracing::warn!("Failed to build glob set: {}", e);
            GlobSet::empty()
        });

        Self { set, fallback }
    }

    /// Whether the given workspace-relative path matches any ignore pattern
    pub fn is_ignored(&self, relative_path: &str) -> bool {
        let path = relative_path.trim_start_matches('/');
        if self.set.is_match(path) {
            return true;
        }
        self.fallback.iter().any(|p| path.contains(p.as_str()))
    }

    /// True when no patterns were supplied
    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.fallback.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn globs(patterns: &[&str]) -> IgnoreGlobs {
        IgnoreGlobs::compile(&patterns.iter().map(|s| s.to_string()).collect::<Vec<_>>())
    }

    #[test]
    fn test_directory_glob() {
        let ignore = globs(&["vendor/**"]);
        assert!(ignore.is_ignored("vendor/lib/util.go"));
        assert!(!ignore.is_ignored("src/main.go"));
    }

    #[test]
    fn test_extension_glob() {
        let ignore = globs(&["**/*.min.js"]);
        assert!(ignore.is_ignored("static/app.min.js"));
        assert!(ignore.is_ignored("a/b/c/lib.min.js"));
        assert!(!ignore.is_ignored("static/app.js"));
    }

    #[test]
    fn test_multiple_patterns() {
        let ignore = globs(&["**/generated/**", "**/*.pb.go"]);
        assert!(ignore.is_ignored("api/generated/client.ts"));
        assert!(ignore.is_ignored("proto/service.pb.go"));
        assert!(!ignore.is_ignored("api/client.ts"));
    }

    #[test]
    fn test_empty_patterns_match_nothing() {
        let ignore = globs(&[]);
        assert!(ignore.is_empty());
        assert!(!ignore.is_ignored("any/path.rs"));
    }

    #[test]
    fn test_invalid_pattern_substring_fallback() {
        let ignore = globs(&["[invalid"]);
        assert!(ignore.is_ignored("path/[invalid/file.rs"));
        assert!(!ignore.is_ignored("path/valid/file.rs"));
    }

    #[test]
    fn test_leading_slash_normalized() {
        let ignore = globs(&["docs/**"]);
        assert!(ignore.is_ignored("/docs/readme.md"));
        assert!(ignore.is_ignored("docs/readme.md"));
    }
}
