//! Source filters: which files an extension (or a query) claims.

use crate::error::Result;
use crate::glob::{parse_glob_expressions, GlobExpr};

/// A predicate over repo-relative paths.
///
/// Extension-list and file-list filters match with plain string operations;
/// glob filters compile through the interned glob cache.
#[derive(Clone)]
pub enum SourceFilter {
    /// Match by file extension suffix (e.g. `.js`, `.tsx`).
    Extensions(Vec<String>),
    /// Match by doublestar glob patterns.
    Globs(GlobExpr),
    /// Match exact relative paths.
    Files(Vec<String>),
}

impl SourceFilter {
    pub fn extensions(exts: &[&str]) -> Self {
        Self::Extensions(
            exts.iter()
                .map(|e| {
                    if e.starts_with('.') {
                        e.to_string()
                    } else {
                        format!(".{e}")
                    }
                })
                .collect(),
        )
    }

    pub fn globs(patterns: &[String]) -> Result<Self> {
        Ok(Self::Globs(parse_glob_expressions(patterns)?))
    }

    pub fn files(files: &[String]) -> Self {
        Self::Files(files.to_vec())
    }

    pub fn matches(&self, path: &str) -> bool {
        match self {
            SourceFilter::Extensions(exts) => exts.iter().any(|e| path.ends_with(e.as_str())),
            SourceFilter::Globs(expr) => expr.matches(path),
            SourceFilter::Files(files) => files.iter().any(|f| f == path),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_filter_normalizes_dots() {
        let f = SourceFilter::extensions(&["js", ".mjs"]);
        assert!(f.matches("src/a.js"));
        assert!(f.matches("b.mjs"));
        assert!(!f.matches("c.ts"));
    }

    #[test]
    fn glob_filter() {
        let f = SourceFilter::globs(&["**/*.py".to_string()]).unwrap();
        assert!(f.matches("pkg/mod/a.py"));
        assert!(!f.matches("pkg/mod/a.pyc"));
    }

    #[test]
    fn file_filter_is_exact() {
        let f = SourceFilter::files(&["package.json".to_string()]);
        assert!(f.matches("package.json"));
        assert!(!f.matches("sub/package.json"));
    }
}
