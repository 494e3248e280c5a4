//! Dispatch a file's query set across the query flavours.
//!
//! Each file is read once; its queries are bucketed by type and the buckets
//! run concurrently on the enclosing rayon pool. Expensive intermediates
//! (the parsed AST, the decoded JSON/YAML document) are built once per file
//! and shared by every query in the bucket, then dropped.

use crate::ast;
use crate::defs::{NamedQueries, QueryDefinition, QueryMatch, QueryParams, QueryResult,
    QueryResults, QueryType};
use crate::grammars;
use crate::jq;
use dashmap::DashMap;
use rayon::prelude::*;
use serde_json::Value;
use stargen_core::error::{HostError, Result};
use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};
use tracing::{debug, trace};

fn regex_cache() -> &'static DashMap<String, Arc<regex::bytes::Regex>> {
    static CACHE: OnceLock<DashMap<String, Arc<regex::bytes::Regex>>> = OnceLock::new();
    CACHE.get_or_init(DashMap::new)
}

fn get_regex(expression: &str) -> Result<Arc<regex::bytes::Regex>> {
    if let Some(re) = regex_cache().get(expression) {
        return Ok(re.clone());
    }

    let compiled = regex::bytes::Regex::new(expression)
        .map_err(|e| HostError::misconfigured(format!("invalid regex {expression:?}: {e}")))?;
    Ok(regex_cache()
        .entry(expression.to_string())
        .or_insert(Arc::new(compiled))
        .clone())
}

/// Run every query against one file's bytes, returning results keyed by
/// query name. Match order within a result preserves source-scan order.
pub fn run_queries(path: &str, source: &[u8], queries: &NamedQueries) -> Result<QueryResults> {
    let mut buckets: BTreeMap<QueryType, Vec<(&String, &QueryDefinition)>> = BTreeMap::new();
    for (name, query) in queries {
        buckets.entry(query.query_type).or_default().push((name, query));
    }

    let bucket_results: Vec<Result<Vec<(String, QueryResult)>>> = buckets
        .par_iter()
        .map(|(query_type, bucket)| match query_type {
            QueryType::Ast => run_ast_bucket(path, source, bucket),
            QueryType::Regex => run_regex_bucket(source, bucket),
            QueryType::Json => run_json_bucket(path, source, bucket),
            QueryType::Yaml => run_yaml_bucket(path, source, bucket),
            QueryType::Raw => run_raw_bucket(source, bucket),
        })
        .collect();

    let mut results = QueryResults::new();
    for bucket in bucket_results {
        for (name, result) in bucket? {
            results.insert(name, result);
        }
    }

    Ok(results)
}

/// Pick the grammar for a file's AST bucket: the first query naming a
/// grammar wins, otherwise the grammar derives from the file extension.
/// Conflicting grammars in one bucket are tolerated; the first wins.
fn select_grammar<'q>(
    path: &str,
    bucket: &[(&String, &'q QueryDefinition)],
) -> Result<&'q str> {
    let mut selected: Option<&str> = None;
    for (name, query) in bucket {
        if let QueryParams::Ast {
            grammar: Some(grammar),
            ..
        } = &query.params
        {
            match selected {
                None => selected = Some(grammar),
                Some(prev) if prev != grammar => {
                    debug!(
                        "query {name:?} wants grammar {grammar:?} but {prev:?} was already \
                         selected for {path:?}; first wins"
                    );
                }
                Some(_) => {}
            }
        }
    }

    if let Some(grammar) = selected {
        return Ok(grammar);
    }

    grammars::path_grammar(path).ok_or_else(|| {
        HostError::misconfigured(format!(
            "no grammar given and none derivable from {path:?}"
        ))
    })
}

fn run_ast_bucket(
    path: &str,
    source: &[u8],
    bucket: &[(&String, &QueryDefinition)],
) -> Result<Vec<(String, QueryResult)>> {
    let grammar = select_grammar(path, bucket)?;
    let tree = ast::parse_source(grammar, path, source)?;

    if tracing::enabled!(tracing::Level::TRACE) {
        for err in tree.errors() {
            trace!("parse error in {path}:\n{err}");
        }
    }

    let mut results = Vec::with_capacity(bucket.len());
    for (name, query) in bucket {
        let QueryParams::Ast { query: pattern, .. } = &query.params else {
            continue;
        };
        let compiled = grammars::get_query(grammar, pattern)?;
        results.push(((*name).clone(), QueryResult::Matches(tree.query(&compiled))));
    }

    Ok(results)
}

fn run_regex_bucket(
    source: &[u8],
    bucket: &[(&String, &QueryDefinition)],
) -> Result<Vec<(String, QueryResult)>> {
    let mut results = Vec::with_capacity(bucket.len());

    for (name, query) in bucket {
        let QueryParams::Regex(expression) = &query.params else {
            continue;
        };
        let re = get_regex(expression)?;

        let names: Vec<Option<&str>> = re.capture_names().collect();
        let mut matches = Vec::new();
        for caps in re.captures_iter(source) {
            let mut captures = BTreeMap::new();
            for (i, group) in names.iter().enumerate().skip(1) {
                if let Some(group_name) = group {
                    let text = caps
                        .get(i)
                        .map(|m| String::from_utf8_lossy(m.as_bytes()).into_owned())
                        .unwrap_or_default();
                    captures.insert(group_name.to_string(), text);
                }
            }
            let full = String::from_utf8_lossy(&caps[0]).into_owned();
            matches.push(QueryMatch {
                captures,
                result: Some(Value::String(full)),
            });
        }

        results.push(((*name).clone(), QueryResult::Matches(matches)));
    }

    Ok(results)
}

fn run_json_bucket(
    path: &str,
    source: &[u8],
    bucket: &[(&String, &QueryDefinition)],
) -> Result<Vec<(String, QueryResult)>> {
    let doc: Value = serde_json::from_slice(source)
        .map_err(|e| HostError::misconfigured(format!("invalid JSON in {path}: {e}")))?;

    let mut results = Vec::with_capacity(bucket.len());
    for (name, query) in bucket {
        let QueryParams::Json(expression) = &query.params else {
            continue;
        };
        results.push(((*name).clone(), QueryResult::Values(jq::eval(expression, &doc)?)));
    }

    Ok(results)
}

fn run_yaml_bucket(
    path: &str,
    source: &[u8],
    bucket: &[(&String, &QueryDefinition)],
) -> Result<Vec<(String, QueryResult)>> {
    let raw: serde_yaml::Value = serde_yaml::from_slice(source)
        .map_err(|e| HostError::misconfigured(format!("invalid YAML in {path}: {e}")))?;
    let doc = yaml_to_json(raw);

    let mut results = Vec::with_capacity(bucket.len());
    for (name, query) in bucket {
        let QueryParams::Yaml(expression) = &query.params else {
            continue;
        };
        results.push(((*name).clone(), QueryResult::Values(jq::eval(expression, &doc)?)));
    }

    Ok(results)
}

fn run_raw_bucket(
    source: &[u8],
    bucket: &[(&String, &QueryDefinition)],
) -> Result<Vec<(String, QueryResult)>> {
    // One decode shared by every raw query on the file.
    let text = String::from_utf8_lossy(source).into_owned();
    Ok(bucket
        .iter()
        .map(|(name, _)| ((*name).clone(), QueryResult::Raw(text.clone())))
        .collect())
}

/// Normalize a decoded YAML tree into JSON values: numbers, booleans, and
/// strings keep their scalar types; mapping keys are stringified; tags are
/// stripped.
fn yaml_to_json(value: serde_yaml::Value) -> Value {
    match value {
        serde_yaml::Value::Null => Value::Null,
        serde_yaml::Value::Bool(b) => Value::Bool(b),
        serde_yaml::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::from(i)
            } else if let Some(u) = n.as_u64() {
                Value::from(u)
            } else {
                n.as_f64().map(Value::from).unwrap_or(Value::Null)
            }
        }
        serde_yaml::Value::String(s) => Value::String(s),
        serde_yaml::Value::Sequence(items) => {
            Value::Array(items.into_iter().map(yaml_to_json).collect())
        }
        serde_yaml::Value::Mapping(map) => {
            let mut obj = serde_json::Map::new();
            for (k, v) in map {
                let key = match k {
                    serde_yaml::Value::String(s) => s,
                    other => serde_yaml::to_string(&other)
                        .map(|s| s.trim_end().to_string())
                        .unwrap_or_default(),
                };
                obj.insert(key, yaml_to_json(v));
            }
            Value::Object(obj)
        }
        serde_yaml::Value::Tagged(tagged) => yaml_to_json(tagged.value),
    }
}
