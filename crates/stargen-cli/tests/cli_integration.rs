//! Integration tests for stargen CLI functionality.
//! Tests the underlying library pipeline that the CLI commands invoke.

use stargen_cache::IncrementalCache;
use stargen_core::error::CancelToken;
use stargen_host::config::BuildConfig;
use stargen_host::defs::{parse_def_file, DefExtension};
use stargen_host::generate::GenerateArgs;
use stargen_host::registry::ExtensionRegistry;
use stargen_host::resolver::RuleIndex;
use stargen_host::Host;
use stargen_query::QueryResults;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

const JSON_DEF: &str = r#"
schema_version = 1

[extension]
id = "npm"

[extension.sources]
default = { files = ["package.json"] }

[extension.queries.deps]
type = "json"
query = ".dependencies | keys[]"

[[extension.targets]]
per = "directory"
kind = "npm_package"
name = "{dir}"

[extension.targets.attrs]
srcs = "{files}"

[[extension.targets.import_attrs]]
attr = "deps"
query = "deps"
provider = "npm"
optional = true

[[kinds]]
name = "npm_package"
load_from = "@npm_rules//npm:defs.bzl"
resolve_attrs = ["deps"]
"#;

fn write_file(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, content).unwrap();
}

fn host_from_dir(dir: &Path) -> Host {
    let mut registry = ExtensionRegistry::new();
    registry.load_dir(dir).unwrap();
    Host::new(registry).with_cancel(CancelToken::new())
}

#[test]
fn json_extension_end_to_end() {
    let defs = TempDir::new().unwrap();
    write_file(defs.path(), "npm.toml", JSON_DEF);

    let tmp = TempDir::new().unwrap();
    write_file(
        tmp.path(),
        "pkg/package.json",
        r#"{"name": "pkg", "dependencies": {"react": "18.0.0"}}"#,
    );

    let host = host_from_dir(defs.path());
    assert_eq!(host.registry().extension_ids(), ["npm"]);

    let root = BuildConfig::new_root("repo");
    let config = root.new_child("pkg");
    let cache: IncrementalCache<QueryResults> = IncrementalCache::in_memory();

    let files = vec!["package.json".to_string()];
    let mut result = host
        .generate_rules(
            &GenerateArgs {
                root: tmp.path(),
                rel: "pkg",
                config: &config,
                files: &files,
                existing_rules: &[],
            },
            &cache,
        )
        .unwrap();

    assert_eq!(result.rules.len(), 1);
    let rule = &result.rules[0];
    assert_eq!(rule.name, "pkg");
    assert_eq!(rule.kind, "npm_package");
    assert_eq!(rule.attr_imports["deps"].len(), 1);
    assert_eq!(rule.attr_imports["deps"][0].symbol.id, "react");

    // The react import is optional and unresolvable: silently dropped.
    let index = RuleIndex::build(result.rules.iter());
    let rule = &mut result.rules[0];
    host.resolve_rule(rule, &config, &index).unwrap();
    assert_eq!(rule.resolved_attrs["deps"], Vec::<String>::new());
}

#[test]
fn loads_reflect_used_kinds() {
    let defs = TempDir::new().unwrap();
    write_file(defs.path(), "npm.toml", JSON_DEF);

    let host = host_from_dir(defs.path());
    let loads = host.registry().apparent_loads(&|_| None);

    let npm_load = loads
        .iter()
        .find(|l| l.name == "@npm_rules//npm:defs.bzl")
        .expect("npm load info");
    assert_eq!(npm_load.symbols, ["npm_package"]);
}

#[test]
fn generation_skips_unclaimed_directories() {
    let defs = TempDir::new().unwrap();
    write_file(defs.path(), "npm.toml", JSON_DEF);

    let tmp = TempDir::new().unwrap();
    write_file(tmp.path(), "docs/readme.md", "# nothing to claim");

    let host = host_from_dir(defs.path());
    let root = BuildConfig::new_root("repo");
    let config = root.new_child("docs");
    let cache: IncrementalCache<QueryResults> = IncrementalCache::in_memory();

    let files = vec!["readme.md".to_string()];
    let result = host
        .generate_rules(
            &GenerateArgs {
                root: tmp.path(),
                rel: "docs",
                config: &config,
                files: &files,
                existing_rules: &[],
            },
            &cache,
        )
        .unwrap();

    assert!(result.rules.is_empty());
    assert!(result.removals.is_empty());
}
