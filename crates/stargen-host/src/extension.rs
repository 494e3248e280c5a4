//! The extension SDK: the contract between the host and the code that
//! decides which targets exist.
//!
//! An extension is created at load time and immutable afterwards; the host
//! invokes its hooks many times per run with differing contexts. The shipped
//! loader builds extensions from declarative TOML definitions ([`crate::defs`]),
//! but anything implementing [`Extension`] can be registered.

use crate::database::SymbolDatabase;
use stargen_core::error::Result;
use stargen_core::filter::SourceFilter;
use stargen_core::label::Label;
use stargen_core::rules::Property;
use stargen_core::target::{AttrValue, TargetAction, TargetDeclaration};
use stargen_query::{NamedQueries, QueryResult, QueryResults};
use std::collections::BTreeMap;

/// The source group used when an extension does not name one.
pub const DEFAULT_SOURCE_GROUP: &str = "default";

/// A user-supplied extension hosted by the generator.
pub trait Extension: Send + Sync {
    /// Unique id; also the directive key that enables/disables it.
    fn id(&self) -> &str;

    /// Directive-tunable properties.
    fn properties(&self) -> &[Property];

    /// Decide which sources this extension claims in a directory and which
    /// queries to run over them. Called at most once per (extension,
    /// directory); the result is cached on the directory's config node.
    fn prepare(&self, ctx: &PrepareContext) -> Result<PrepareResult>;

    /// Inspect one claimed file's query results and publish exported
    /// symbols. Calls run concurrently across files.
    fn analyze(&self, ctx: &AnalyzeContext<'_>) -> Result<()>;

    /// Emit target actions for the directory from the grouped sources.
    fn declare_targets(&self, ctx: &mut DeclareTargetsContext<'_>) -> Result<()>;
}

/// Input to [`Extension::prepare`].
#[derive(Debug, Clone, Default)]
pub struct PrepareContext {
    pub repo_name: String,
    /// Directory path relative to the repo root (empty at the root).
    pub rel: String,
    /// Typed property values resolved from the nearest directives.
    pub properties: BTreeMap<String, AttrValue>,
}

/// The result of an extension preparing for a directory.
#[derive(Default)]
pub struct PrepareResult {
    /// Source filters per group; the first matching group claims a file.
    pub sources: BTreeMap<String, Vec<SourceFilter>>,
    /// Queries to run over claimed files, keyed by query name.
    pub queries: NamedQueries,
}

impl PrepareResult {
    /// Whether any group's filters claim the path.
    pub fn claims(&self, path: &str) -> Option<&str> {
        self.sources
            .iter()
            .find(|(_, filters)| filters.iter().any(|f| f.matches(path)))
            .map(|(group, _)| group.as_str())
    }

    /// The queries applicable to one claimed file.
    pub fn queries_for_file<'a>(
        &'a self,
        path: &'a str,
    ) -> impl Iterator<Item = (&'a String, &'a stargen_query::QueryDefinition)> {
        self.queries.iter().filter(move |(_, q)| q.applies_to(path))
    }
}

/// One claimed file with its query results, as seen by `analyze` and
/// `declare_targets`.
#[derive(Debug, Clone, Default)]
pub struct TargetSource {
    /// Path relative to the directory being generated.
    pub path: String,
    pub query_results: QueryResults,
}

impl TargetSource {
    pub fn query(&self, name: &str) -> Option<&QueryResult> {
        self.query_results.get(name)
    }
}

/// Input to [`Extension::analyze`].
pub struct AnalyzeContext<'a> {
    pub prepare: &'a PrepareContext,
    pub source: &'a TargetSource,
    database: &'a SymbolDatabase,
}

impl<'a> AnalyzeContext<'a> {
    pub fn new(
        prepare: &'a PrepareContext,
        source: &'a TargetSource,
        database: &'a SymbolDatabase,
    ) -> Self {
        Self {
            prepare,
            source,
            database,
        }
    }

    /// Publish a symbol to the cross-extension database.
    pub fn add_symbol(&self, id: &str, provider: &str, label: Label) {
        self.database.add(id, provider, label);
    }
}

/// Input to [`Extension::declare_targets`].
pub struct DeclareTargetsContext<'a> {
    pub prepare: &'a PrepareContext,
    /// Claimed sources grouped by the extension's source groups.
    pub sources: &'a BTreeMap<String, Vec<TargetSource>>,
    actions: Vec<TargetAction>,
}

impl<'a> DeclareTargetsContext<'a> {
    pub fn new(
        prepare: &'a PrepareContext,
        sources: &'a BTreeMap<String, Vec<TargetSource>>,
    ) -> Self {
        Self {
            prepare,
            sources,
            actions: Vec::new(),
        }
    }

    /// Sources in a named group.
    pub fn group(&self, name: &str) -> &[TargetSource] {
        self.sources.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn add(&mut self, target: TargetDeclaration) {
        self.actions.push(TargetAction::Add(target));
    }

    pub fn remove(&mut self, name: &str, kind: Option<&str>) {
        self.actions.push(TargetAction::Remove {
            name: name.to_string(),
            kind: kind.map(str::to_string),
        });
    }

    pub fn into_actions(self) -> Vec<TargetAction> {
        self.actions
    }
}
