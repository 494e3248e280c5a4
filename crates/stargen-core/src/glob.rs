//! Shape-classified glob matching for source filters.
//!
//! Patterns are doublestar-style (`**`, `*`, `?`). Before compiling a full
//! matcher, each pattern is classified into the fastest shape that can match
//! it: an exact literal, a `prefix + ** + suffix` pair, a literal prefix or
//! suffix guard in front of the compiled matcher, or a fully generic glob.
//! A multi-pattern expression groups patterns into shape buckets and
//! short-circuits on the first hit.
//!
//! Compiled expressions are interned in a process-wide map keyed by the
//! pattern text, so repeated `prepare` calls across directories share work.

use crate::error::HostError;
use dashmap::DashMap;
use globset::{GlobBuilder, GlobMatcher};
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, OnceLock};

/// Expressions that are not even globs.
fn non_glob_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[\w./@-]+$").unwrap())
}

/// Doublestar globs that simplify to a literal prefix and suffix.
fn pre_post_glob_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([\w./@-]*)\*\*(/\*?)?([\w./@-]+)$").unwrap())
}

/// Globs with a literal prefix that can be checked before the full matcher.
fn pre_glob_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([\w./@-]+).*$").unwrap())
}

/// Globs with a literal suffix that can be checked before the full matcher.
fn post_glob_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^.*?([\w./@-]+)$").unwrap())
}

fn interned() -> &'static DashMap<String, GlobExpr> {
    static CACHE: OnceLock<DashMap<String, GlobExpr>> = OnceLock::new();
    CACHE.get_or_init(DashMap::new)
}

/// A compiled glob expression. Cheap to clone; the compiled form is shared.
#[derive(Clone)]
pub struct GlobExpr(Arc<Shape>);

/// A literal `prefix + ** + suffix` pattern.
///
/// `has_star` distinguishes `pre**/*suffix` (any parent directory) from
/// `pre**suffix` (suffix must be a whole trailing segment).
struct PrePost {
    pre: String,
    suffix: String,
    has_star: bool,
}

impl PrePost {
    fn matches(&self, p: &str) -> bool {
        if p.len() < self.pre.len() + self.suffix.len() || !p.starts_with(&self.pre) {
            return false;
        }
        p.ends_with(&self.suffix)
            && (self.has_star
                || p == self.suffix
                || p.as_bytes()[p.len() - self.suffix.len() - 1] == b'/')
    }
}

enum Shape {
    Exact(String),
    PrePost(PrePost),
    Prefix { pre: String, matcher: GlobMatcher },
    Suffix { post: String, matcher: GlobMatcher },
    Generic(GlobMatcher),
    Multi(MultiGlob),
}

/// Bucketed shapes for a multi-pattern expression.
#[derive(Default)]
struct MultiGlob {
    exacts: HashSet<String>,
    pre_posts: HashMap<String, Vec<PrePost>>,
    prefix_globs: HashMap<String, Vec<GlobMatcher>>,
    suffix_globs: HashMap<String, Vec<GlobMatcher>>,
    generics: Vec<GlobMatcher>,
}

impl MultiGlob {
    fn matches(&self, p: &str) -> bool {
        if self.exacts.contains(p) {
            return true;
        }
        for (pre, entries) in &self.pre_posts {
            if p.starts_with(pre.as_str()) && entries.iter().any(|e| e.matches(p)) {
                return true;
            }
        }
        for (pre, matchers) in &self.prefix_globs {
            if p.starts_with(pre.as_str()) && matchers.iter().any(|m| m.is_match(p)) {
                return true;
            }
        }
        for (post, matchers) in &self.suffix_globs {
            if p.ends_with(post.as_str()) && matchers.iter().any(|m| m.is_match(p)) {
                return true;
            }
        }
        self.generics.iter().any(|m| m.is_match(p))
    }
}

impl GlobExpr {
    pub fn matches(&self, p: &str) -> bool {
        match self.0.as_ref() {
            Shape::Exact(lit) => p == lit,
            Shape::PrePost(pp) => pp.matches(p),
            Shape::Prefix { pre, matcher } => p.starts_with(pre.as_str()) && matcher.is_match(p),
            Shape::Suffix { post, matcher } => p.ends_with(post.as_str()) && matcher.is_match(p),
            Shape::Generic(matcher) => matcher.is_match(p),
            Shape::Multi(multi) => multi.matches(p),
        }
    }
}

/// Compile the reference doublestar matcher for a pattern.
///
/// `literal_separator` keeps `*`/`?` from crossing `/`, matching doublestar
/// semantics; `**` still spans path segments.
pub fn reference_matcher(exp: &str) -> Result<GlobMatcher, HostError> {
    GlobBuilder::new(exp)
        .literal_separator(true)
        .build()
        .map(|g| g.compile_matcher())
        .map_err(|e| HostError::misconfigured(format!("invalid glob pattern {exp:?}: {e}")))
}

/// Parse a single pattern into its fastest matcher shape, interned by the
/// pattern text.
pub fn parse_glob_expression(exp: &str) -> Result<GlobExpr, HostError> {
    if let Some(cached) = interned().get(exp) {
        return Ok(cached.clone());
    }

    let expr = GlobExpr(Arc::new(classify(exp)?));
    Ok(interned()
        .entry(exp.to_string())
        .or_insert(expr)
        .clone())
}

fn classify(exp: &str) -> Result<Shape, HostError> {
    // An empty pattern only matches the empty path.
    if exp.is_empty() || non_glob_re().is_match(exp) {
        return Ok(Shape::Exact(exp.to_string()));
    }

    if let Some(caps) = pre_post_glob_re().captures(exp) {
        return Ok(Shape::PrePost(PrePost {
            pre: caps[1].to_string(),
            suffix: caps[3].to_string(),
            has_star: caps.get(2).map(|m| m.as_str()) == Some("/*"),
        }));
    }

    if let Some(caps) = pre_glob_re().captures(exp) {
        return Ok(Shape::Prefix {
            pre: caps[1].to_string(),
            matcher: reference_matcher(exp)?,
        });
    }

    if let Some(caps) = post_glob_re().captures(exp) {
        return Ok(Shape::Suffix {
            post: caps[1].to_string(),
            matcher: reference_matcher(exp)?,
        });
    }

    Ok(Shape::Generic(reference_matcher(exp)?))
}

/// Parse a set of patterns into a single bucketed matcher, interned by the
/// joined pattern text.
pub fn parse_glob_expressions(exps: &[String]) -> Result<GlobExpr, HostError> {
    if exps.len() == 1 {
        return parse_glob_expression(&exps[0]);
    }

    let key = exps.join(",");
    if let Some(cached) = interned().get(&key) {
        return Ok(cached.clone());
    }

    let mut multi = MultiGlob::default();
    for exp in exps {
        match classify(exp)? {
            Shape::Exact(lit) => {
                multi.exacts.insert(lit);
            }
            Shape::PrePost(pp) => {
                multi.pre_posts.entry(pp.pre.clone()).or_default().push(pp);
            }
            Shape::Prefix { pre, matcher } => {
                multi.prefix_globs.entry(pre).or_default().push(matcher);
            }
            Shape::Suffix { post, matcher } => {
                multi.suffix_globs.entry(post).or_default().push(matcher);
            }
            Shape::Generic(matcher) => multi.generics.push(matcher),
            Shape::Multi(_) => unreachable!("classify never returns Multi"),
        }
    }

    let expr = GlobExpr(Arc::new(Shape::Multi(multi)));
    Ok(interned().entry(key).or_insert(expr).clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_literal_shape() {
        let e = parse_glob_expression("path/to/file.txt").unwrap();
        assert!(e.matches("path/to/file.txt"));
        assert!(!e.matches("a/path/to/file.txt"));
        assert!(!e.matches("path/to/file.txt2"));
    }

    #[test]
    fn pre_post_shape() {
        let e = parse_glob_expression("src/**/*.go").unwrap();
        assert!(e.matches("src/main.go"));
        assert!(e.matches("src/deep/nested/file.go"));
        assert!(!e.matches("other/main.go"));

        let whole_segment = parse_glob_expression("**/WORKSPACE").unwrap();
        assert!(whole_segment.matches("WORKSPACE"));
        assert!(whole_segment.matches("a/WORKSPACE"));
        assert!(!whole_segment.matches("notWORKSPACE"));
    }

    #[test]
    fn empty_pattern_matches_only_empty_path() {
        let e = parse_glob_expression("").unwrap();
        assert!(e.matches(""));
        assert!(!e.matches("a"));
    }

    #[test]
    fn multi_pattern_short_circuits() {
        let patterns = vec![
            "BUILD".to_string(),
            "**/*.ts".to_string(),
            "src/*/lib.rs".to_string(),
        ];
        let e = parse_glob_expressions(&patterns).unwrap();
        assert!(e.matches("BUILD"));
        assert!(e.matches("deep/path/index.ts"));
        assert!(e.matches("src/app/lib.rs"));
        assert!(!e.matches("src/app/deep/lib.rs"));
        assert!(!e.matches("README.md"));
    }

    #[test]
    fn invalid_pattern_is_misconfiguration() {
        assert!(parse_glob_expression("a[").is_err());
    }

    #[test]
    fn interning_returns_shared_expression() {
        let a = parse_glob_expression("**/*.kt").unwrap();
        let b = parse_glob_expression("**/*.kt").unwrap();
        assert!(Arc::ptr_eq(&a.0, &b.0));
    }
}
