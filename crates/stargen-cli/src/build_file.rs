//! Minimal BUILD-file reading and rendering.
//!
//! The host proper treats the BUILD writer as an external collaborator;
//! this module gives the binary just enough of one: directives and existing
//! rule names are read line-wise, generated rules are rendered from their
//! merged attributes, and list items marked `# keep` in the existing file
//! survive regeneration.

use regex::Regex;
use stargen_core::target::AttrValue;
use stargen_host::generate::{ExistingRule, GeneratedRule};
use stargen_host::registry::LoadInfo;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// The directive prefix recognized in BUILD-file comments:
/// `# stargen:<key> <value...>`.
const DIRECTIVE_PREFIX: &str = "# stargen:";

fn rule_start_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([A-Za-z_][A-Za-z0-9_]*)\s*\(").unwrap())
}

fn name_attr_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"name\s*=\s*"([^"]+)""#).unwrap())
}

fn attr_list_start_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*([A-Za-z_][A-Za-z0-9_]*)\s*=\s*\[").unwrap())
}

fn keep_item_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#""([^"]+)"\s*,?\s*#\s*keep"#).unwrap())
}

/// What the binary needs to know about a directory's existing BUILD file.
#[derive(Debug, Default)]
pub struct BuildFile {
    pub path: Option<PathBuf>,
    pub directives: Vec<(String, String)>,
    pub rules: Vec<ExistingRule>,
    /// (rule name, attr) → items the user marked with `# keep`.
    pub keep_items: BTreeMap<(String, String), Vec<String>>,
    pub content: String,
}

impl BuildFile {
    pub fn exists(&self) -> bool {
        self.path.is_some()
    }
}

/// Read `BUILD.bazel` (preferred) or `BUILD` from a directory.
pub fn read_build_file(dir: &Path) -> BuildFile {
    for candidate in ["BUILD.bazel", "BUILD"] {
        let path = dir.join(candidate);
        if let Ok(content) = std::fs::read_to_string(&path) {
            let mut file = parse_build_file(&content);
            file.path = Some(path);
            file.content = content;
            return file;
        }
    }
    BuildFile::default()
}

fn parse_build_file(content: &str) -> BuildFile {
    let mut file = BuildFile::default();

    let mut current_rule: Option<(String, Option<String>)> = None; // (kind, name)
    let mut current_attr: Option<String> = None;

    for line in content.lines() {
        let trimmed = line.trim();

        if let Some(rest) = trimmed.strip_prefix(DIRECTIVE_PREFIX) {
            let mut parts = rest.splitn(2, char::is_whitespace);
            if let Some(key) = parts.next() {
                let value = parts.next().unwrap_or("").trim();
                file.directives.push((key.to_string(), value.to_string()));
            }
            continue;
        }

        if let Some(caps) = rule_start_re().captures(trimmed) {
            let kind = caps[1].to_string();
            if kind != "load" {
                current_rule = Some((kind, None));
                current_attr = None;
            }
        }

        if let Some((kind, name_slot)) = &mut current_rule {
            if name_slot.is_none() {
                if let Some(caps) = name_attr_re().captures(line) {
                    let name = caps[1].to_string();
                    file.rules.push(ExistingRule {
                        name: name.clone(),
                        kind: kind.clone(),
                    });
                    *name_slot = Some(name);
                }
            }

            if let Some(caps) = attr_list_start_re().captures(line) {
                current_attr = Some(caps[1].to_string());
            }

            if let (Some(name), Some(attr)) = (name_slot.as_ref(), current_attr.as_ref()) {
                if let Some(caps) = keep_item_re().captures(line) {
                    file.keep_items
                        .entry((name.clone(), attr.clone()))
                        .or_default()
                        .push(caps[1].to_string());
                }
            }

            if trimmed == ")" {
                current_rule = None;
                current_attr = None;
            }
        }
    }

    file
}

/// Render a directory's generated rules into BUILD-file text: load
/// statements for the kinds in use, then the rules in generation order.
pub fn render(rules: &[GeneratedRule], loads: &[LoadInfo], existing: &BuildFile) -> String {
    let mut out = String::new();

    let used_kinds: Vec<&str> = rules.iter().map(|r| r.kind.as_str()).collect();
    for load in loads {
        let symbols: Vec<&str> = load
            .symbols
            .iter()
            .map(String::as_str)
            .filter(|s| used_kinds.contains(s))
            .collect();
        if symbols.is_empty() {
            continue;
        }
        out.push_str(&format!("load(\"{}\"", load.name));
        for symbol in symbols {
            out.push_str(&format!(", \"{symbol}\""));
        }
        out.push_str(")\n");
    }

    for rule in rules {
        if !out.is_empty() {
            out.push('\n');
        }
        render_rule(&mut out, rule, existing);
    }

    out
}

fn render_rule(out: &mut String, rule: &GeneratedRule, existing: &BuildFile) {
    out.push_str(&format!("{}(\n", rule.kind));
    out.push_str(&format!("    name = \"{}\",\n", rule.name));

    for (attr, value) in rule.merged_attrs() {
        if attr == "name" {
            continue;
        }
        let keep_key = (rule.name.clone(), attr.clone());
        let keeps = existing.keep_items.get(&keep_key);
        out.push_str(&format!(
            "    {attr} = {},\n",
            render_value(&value, keeps.map(Vec::as_slice).unwrap_or(&[]))
        ));
    }

    out.push_str(")\n");
}

fn render_value(value: &AttrValue, keeps: &[String]) -> String {
    match value {
        AttrValue::String(s) => format!("\"{s}\""),
        AttrValue::Bool(b) => if *b { "True" } else { "False" }.to_string(),
        AttrValue::Number(n) => n.to_string(),
        AttrValue::Label(l) => format!("\"{l}\""),
        AttrValue::Import(import) => format!("\"{}\"", import.symbol.id),
        AttrValue::List(items) => {
            let mut rendered: Vec<String> = items
                .iter()
                .map(|item| format!("        {},", render_value(item, &[])))
                .collect();
            for keep in keeps {
                let line = format!("        \"{keep}\",  # keep");
                let plain = format!("        \"{keep}\",");
                if !rendered.contains(&plain) && !rendered.contains(&line) {
                    rendered.push(line);
                }
            }
            if rendered.is_empty() {
                "[]".to_string()
            } else {
                format!("[\n{}\n    ]", rendered.join("\n"))
            }
        }
    }
}

/// A minimal block diff: old lines prefixed `-`, new lines `+`.
pub fn diff(path: &Path, old: &str, new: &str) -> Option<String> {
    if old == new {
        return None;
    }
    let mut out = String::new();
    out.push_str(&format!("--- {}\n+++ {}\n", path.display(), path.display()));
    for line in old.lines() {
        out.push_str(&format!("-{line}\n"));
    }
    for line in new.lines() {
        out.push_str(&format!("+{line}\n"));
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"load("@aspect_rules_js//js:defs.bzl", "js_library")

# stargen:js disabled
# stargen:resolve py foo //lib:foo

js_library(
    name = "a",
    srcs = [
        "a.js",
    ],
    deps = [
        ":b",
        "//vendored:thing",  # keep
    ],
)
"#;

    #[test]
    fn parses_directives_rules_and_keeps() {
        let file = parse_build_file(SAMPLE);

        assert_eq!(
            file.directives,
            vec![
                ("js".to_string(), "disabled".to_string()),
                ("resolve".to_string(), "py foo //lib:foo".to_string()),
            ]
        );
        assert_eq!(
            file.rules,
            vec![ExistingRule {
                name: "a".to_string(),
                kind: "js_library".to_string()
            }]
        );
        assert_eq!(
            file.keep_items[&("a".to_string(), "deps".to_string())],
            vec!["//vendored:thing"]
        );
    }

    #[test]
    fn keep_items_survive_rendering() {
        let existing = parse_build_file(SAMPLE);

        let mut rule = GeneratedRule {
            extension: "js".to_string(),
            name: "a".to_string(),
            kind: "js_library".to_string(),
            package: String::new(),
            attr_values: BTreeMap::new(),
            attr_imports: BTreeMap::new(),
            symbols: Vec::new(),
            resolved_attrs: BTreeMap::new(),
        };
        rule.attr_values.insert(
            "srcs".to_string(),
            AttrValue::List(vec![AttrValue::from("a.js")]),
        );
        rule.resolved_attrs
            .insert("deps".to_string(), vec![":b".to_string()]);

        let loads = vec![LoadInfo {
            name: "@aspect_rules_js//js:defs.bzl".to_string(),
            symbols: vec!["js_library".to_string()],
        }];

        let rendered = render(&[rule], &loads, &existing);
        assert!(rendered.starts_with("load(\"@aspect_rules_js//js:defs.bzl\", \"js_library\")"));
        assert!(rendered.contains("\":b\","));
        assert!(rendered.contains("\"//vendored:thing\",  # keep"));
    }

    #[test]
    fn unused_loads_are_dropped() {
        let loads = vec![LoadInfo {
            name: "@x//y:defs.bzl".to_string(),
            symbols: vec!["unused_rule".to_string()],
        }];
        let rendered = render(&[], &loads, &BuildFile::default());
        assert!(rendered.is_empty());
    }

    #[test]
    fn diff_reports_changes_only() {
        let path = Path::new("BUILD.bazel");
        assert!(diff(path, "same\n", "same\n").is_none());
        let d = diff(path, "old\n", "new\n").unwrap();
        assert!(d.contains("-old"));
        assert!(d.contains("+new"));
    }
}
