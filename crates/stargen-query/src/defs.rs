//! Query definitions and result shapes.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use stargen_core::error::Result;
use stargen_core::glob::{parse_glob_expressions, GlobExpr};
use std::collections::BTreeMap;

/// The content query flavours the engine can dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum QueryType {
    Ast,
    Regex,
    Json,
    Yaml,
    Raw,
}

impl QueryType {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ast => "ast",
            Self::Regex => "regex",
            Self::Json => "json",
            Self::Yaml => "yaml",
            Self::Raw => "raw",
        }
    }
}

/// Per-type query parameters.
#[derive(Debug, Clone)]
pub enum QueryParams {
    /// A tree query, optionally pinned to a grammar instead of deriving it
    /// from the file extension.
    Ast {
        grammar: Option<String>,
        query: String,
    },
    /// A regular expression with named capture groups.
    Regex(String),
    /// A jq-like path expression over the parsed JSON document.
    Json(String),
    /// A jq-like path expression over the decoded YAML document.
    Yaml(String),
    /// The raw source bytes as a string.
    Raw,
}

/// A query to run on source files claimed by an extension.
#[derive(Clone)]
pub struct QueryDefinition {
    pub query_type: QueryType,
    /// Glob patterns restricting which claimed files this query runs on.
    /// Empty means every claimed file.
    pub filter: Vec<String>,
    pub params: QueryParams,
    filter_expr: Option<GlobExpr>,
}

impl std::fmt::Debug for QueryDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryDefinition")
            .field("query_type", &self.query_type)
            .field("filter", &self.filter)
            .field("params", &self.params)
            .finish()
    }
}

impl QueryDefinition {
    pub fn new(query_type: QueryType, filter: Vec<String>, params: QueryParams) -> Result<Self> {
        let filter_expr = if filter.is_empty() {
            None
        } else {
            Some(parse_glob_expressions(&filter)?)
        };
        Ok(Self {
            query_type,
            filter,
            params,
            filter_expr,
        })
    }

    pub fn ast(query: &str, grammar: Option<&str>, filter: Vec<String>) -> Result<Self> {
        Self::new(
            QueryType::Ast,
            filter,
            QueryParams::Ast {
                grammar: grammar.map(str::to_string),
                query: query.to_string(),
            },
        )
    }

    pub fn regex(expression: &str, filter: Vec<String>) -> Result<Self> {
        Self::new(
            QueryType::Regex,
            filter,
            QueryParams::Regex(expression.to_string()),
        )
    }

    pub fn json(expression: &str, filter: Vec<String>) -> Result<Self> {
        Self::new(
            QueryType::Json,
            filter,
            QueryParams::Json(expression.to_string()),
        )
    }

    pub fn yaml(expression: &str, filter: Vec<String>) -> Result<Self> {
        Self::new(
            QueryType::Yaml,
            filter,
            QueryParams::Yaml(expression.to_string()),
        )
    }

    pub fn raw(filter: Vec<String>) -> Result<Self> {
        Self::new(QueryType::Raw, filter, QueryParams::Raw)
    }

    /// Whether this query applies to a claimed file.
    pub fn applies_to(&self, path: &str) -> bool {
        match &self.filter_expr {
            None => true,
            Some(expr) => expr.matches(path),
        }
    }

    /// Feed a stable encoding of this definition into an op-key digest.
    fn hash_into(&self, digest: &mut Sha256) {
        digest.update(self.query_type.name().as_bytes());
        for f in &self.filter {
            digest.update([0u8]);
            digest.update(f.as_bytes());
        }
        digest.update([1u8]);
        match &self.params {
            QueryParams::Ast { grammar, query } => {
                digest.update(grammar.as_deref().unwrap_or("").as_bytes());
                digest.update([0u8]);
                digest.update(query.as_bytes());
            }
            QueryParams::Regex(e) | QueryParams::Json(e) | QueryParams::Yaml(e) => {
                digest.update(e.as_bytes());
            }
            QueryParams::Raw => {}
        }
        digest.update([2u8]);
    }
}

/// A set of queries keyed by name.
pub type NamedQueries = BTreeMap<String, QueryDefinition>;

/// A single match: named captures plus an optional whole-match result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryMatch {
    pub captures: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub result: Option<serde_json::Value>,
}

impl QueryMatch {
    pub fn capture(&self, name: &str) -> Option<&str> {
        self.captures.get(name).map(String::as_str)
    }
}

/// The result of one query over one file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum QueryResult {
    /// Ordered matches, in source-scan order.
    Matches(Vec<QueryMatch>),
    /// Collected values from a JSON/YAML path program.
    Values(Vec<serde_json::Value>),
    /// The raw source text.
    Raw(String),
}

impl QueryResult {
    pub fn matches(&self) -> &[QueryMatch] {
        match self {
            QueryResult::Matches(m) => m,
            _ => &[],
        }
    }

    pub fn values(&self) -> &[serde_json::Value] {
        match self {
            QueryResult::Values(v) => v,
            _ => &[],
        }
    }
}

/// All results for one file, keyed by query name.
pub type QueryResults = BTreeMap<String, QueryResult>;

/// A stable hash identifying a computation over one file: the source
/// content plus the canonical encoding of every query that ran. Used as the
/// cache key alongside the file's realpath.
pub fn op_key(source: &[u8], queries: &NamedQueries) -> String {
    let mut digest = Sha256::new();
    digest.update(source);
    for (name, query) in queries {
        digest.update(name.as_bytes());
        query.hash_into(&mut digest);
    }
    hex::encode(digest.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_restricts_files() {
        let q = QueryDefinition::regex("import", vec!["**/*.js".to_string()]).unwrap();
        assert!(q.applies_to("src/a.js"));
        assert!(!q.applies_to("src/a.ts"));

        let unfiltered = QueryDefinition::raw(vec![]).unwrap();
        assert!(unfiltered.applies_to("anything"));
    }

    #[test]
    fn op_key_is_stable_and_content_sensitive() {
        let mut queries = NamedQueries::new();
        queries.insert(
            "imports".to_string(),
            QueryDefinition::regex("import", vec![]).unwrap(),
        );

        let a = op_key(b"source", &queries);
        let b = op_key(b"source", &queries);
        assert_eq!(a, b);

        assert_ne!(a, op_key(b"other source", &queries));

        queries.insert(
            "exports".to_string(),
            QueryDefinition::regex("export", vec![]).unwrap(),
        );
        assert_ne!(a, op_key(b"source", &queries));
    }
}
