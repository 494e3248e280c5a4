//! Build target labels: `@repo//package:name`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A stable identifier for a build target.
///
/// Relative labels have an empty `repo` and an empty `package`; equality is
/// component-wise.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Label {
    pub repo: String,
    pub package: String,
    pub name: String,
    /// True when the label was written without a leading `//` (e.g. `:lib`).
    #[serde(default)]
    pub relative: bool,
}

impl Label {
    pub fn new(repo: &str, package: &str, name: &str) -> Self {
        Self {
            repo: repo.to_string(),
            package: package.to_string(),
            name: name.to_string(),
            relative: false,
        }
    }

    /// A label relative to the package it appears in (`:name`).
    pub fn relative(name: &str) -> Self {
        Self {
            repo: String::new(),
            package: String::new(),
            name: name.to_string(),
            relative: true,
        }
    }

    /// Parse a label string: `@repo//pkg:name`, `//pkg:name`, `//pkg`
    /// (implying `:pkg-basename`), `:name`, or a bare `name`.
    pub fn parse(s: &str) -> Option<Self> {
        if s.is_empty() {
            return None;
        }

        let (repo, rest) = if let Some(stripped) = s.strip_prefix('@') {
            let slash = stripped.find("//")?;
            (&stripped[..slash], &stripped[slash..])
        } else {
            ("", s)
        };

        if let Some(pkg_and_name) = rest.strip_prefix("//") {
            let (package, name) = match pkg_and_name.split_once(':') {
                Some((pkg, name)) => (pkg, name),
                // `//foo/bar` implies `//foo/bar:bar`
                None => (
                    pkg_and_name,
                    pkg_and_name.rsplit('/').next().unwrap_or(pkg_and_name),
                ),
            };
            if name.is_empty() {
                return None;
            }
            return Some(Self::new(repo, package, name));
        }

        if !repo.is_empty() {
            return None;
        }

        let name = rest.strip_prefix(':').unwrap_or(rest);
        if name.is_empty() || name.contains(':') {
            return None;
        }
        Some(Self::relative(name))
    }

    /// Rewrite this label relative to the given package: a label in the same
    /// repo and package collapses to `:name`.
    pub fn rel(&self, repo: &str, package: &str) -> Self {
        if self.relative {
            return self.clone();
        }
        if self.repo == repo && self.package == package {
            return Self::relative(&self.name);
        }
        self.clone()
    }

    /// True when `other` names the same target as `self` viewed from
    /// `from_package` (used to filter self-imports).
    pub fn is_self_reference(&self, from_package: &str, from_name: &str) -> bool {
        if self.relative {
            return self.name == from_name;
        }
        self.repo.is_empty() && self.package == from_package && self.name == from_name
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.relative {
            return write!(f, ":{}", self.name);
        }
        if !self.repo.is_empty() {
            write!(f, "@{}", self.repo)?;
        }
        // `//foo/bar:bar` prints as `//foo/bar`
        if !self.package.is_empty() && self.package.rsplit('/').next() == Some(self.name.as_str()) {
            write!(f, "//{}", self.package)
        } else {
            write!(f, "//{}:{}", self.package, self.name)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_full_label() {
        let l = Label::parse("@deps//lib/util:util_lib").unwrap();
        assert_eq!(l.repo, "deps");
        assert_eq!(l.package, "lib/util");
        assert_eq!(l.name, "util_lib");
        assert!(!l.relative);
    }

    #[test]
    fn parse_shorthand_package_name() {
        let l = Label::parse("//lib/util").unwrap();
        assert_eq!(l.name, "util");
        assert_eq!(l.to_string(), "//lib/util");
    }

    #[test]
    fn parse_relative() {
        let l = Label::parse(":b").unwrap();
        assert!(l.relative);
        assert_eq!(l.to_string(), ":b");

        let bare = Label::parse("b").unwrap();
        assert_eq!(bare.name, "b");
    }

    #[test]
    fn parse_rejects_malformed() {
        assert!(Label::parse("").is_none());
        assert!(Label::parse("@repo").is_none());
        assert!(Label::parse("//pkg:").is_none());
        assert!(Label::parse("a:b").is_none());
    }

    #[test]
    fn rel_collapses_same_package() {
        let l = Label::new("", "app", "b");
        assert_eq!(l.rel("", "app").to_string(), ":b");
        assert_eq!(l.rel("", "lib").to_string(), "//app:b");
    }

    #[test]
    fn self_reference() {
        let l = Label::new("", "app", "a");
        assert!(l.is_self_reference("app", "a"));
        assert!(!l.is_self_reference("app", "b"));
        assert!(Label::relative("a").is_self_reference("anything", "a"));
    }
}
