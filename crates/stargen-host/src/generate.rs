//! The per-directory scheduler: Prepare → classify → query → Analyze →
//! Declare → lower.
//!
//! Extensions are driven in registration order and files in sorted order,
//! so the emitted rule set is deterministic regardless of how the query and
//! analyze fan-outs interleave.

use crate::config::{BuildConfig, PreparedExtension};
use crate::extension::{AnalyzeContext, DeclareTargetsContext, TargetSource};
use crate::Host;
use rayon::prelude::*;
use stargen_cache::IncrementalCache;
use stargen_core::error::{HostError, Result};
use stargen_core::label::Label;
use stargen_core::target::{AttrValue, Symbol, TargetAction, TargetDeclaration, TargetImport};
use stargen_query::{op_key, NamedQueries, QueryResults};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, trace};

/// A rule already present in the directory's BUILD file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExistingRule {
    pub name: String,
    pub kind: String,
}

/// Inputs for generating one directory.
pub struct GenerateArgs<'a> {
    pub root: &'a Path,
    /// Directory path relative to the repo root (empty at the root).
    pub rel: &'a str,
    pub config: &'a Arc<BuildConfig>,
    /// Candidate files, relative to the directory.
    pub files: &'a [String],
    pub existing_rules: &'a [ExistingRule],
}

impl GenerateArgs<'_> {
    fn repo_path(&self, file: &str) -> String {
        if self.rel.is_empty() {
            file.to_string()
        } else {
            format!("{}/{}", self.rel, file)
        }
    }
}

/// A lowered rule: the declaration's constant attribute values plus the
/// imports stripped out of each attribute, awaiting resolution.
#[derive(Debug, Clone)]
pub struct GeneratedRule {
    pub extension: String,
    pub name: String,
    pub kind: String,
    /// The generating package (directory rel).
    pub package: String,
    /// Constant attribute values, labels normalized to the package.
    pub attr_values: BTreeMap<String, AttrValue>,
    /// Imports by attribute, to be replaced with labels by the resolver.
    pub attr_imports: BTreeMap<String, Vec<TargetImport>>,
    /// Symbols this rule exports (feeds the rule index).
    pub symbols: Vec<Symbol>,
    /// Resolved label lists per attribute, filled by the resolver.
    pub resolved_attrs: BTreeMap<String, Vec<String>>,
}

impl GeneratedRule {
    pub fn label(&self) -> Label {
        Label::new("", &self.package, &self.name)
    }
}

/// The output of one directory's generation.
#[derive(Debug, Default)]
pub struct GenerateResult {
    pub rules: Vec<GeneratedRule>,
    /// Rules in the on-disk file marked for deletion.
    pub removals: Vec<ExistingRule>,
}

impl Host {
    /// Prepare every enabled extension for a directory, caching the result
    /// on the config node. Computed at most once per (extension, directory);
    /// a failing hook substitutes an empty result and does not poison the
    /// other extensions.
    pub fn prepare_extensions(&self, config: &Arc<BuildConfig>) {
        for id in self.registry.extension_ids() {
            if !config.is_extension_enabled(id) || config.get_prepared(id).is_some() {
                continue;
            }
            let Some(extension) = self.registry.get(id) else {
                continue;
            };

            let context = config.prepare_context(extension.as_ref());
            let result = match extension.prepare(&context) {
                Ok(result) => result,
                Err(e) => {
                    let err = HostError::extension(id.clone(), format!("prepare failed: {e}"));
                    error!("{err}");
                    Default::default()
                }
            };
            config.insert_prepared(id, Arc::new(PreparedExtension { context, result }));
        }
    }

    /// Generate rules for one directory.
    pub fn generate_rules(
        &self,
        args: &GenerateArgs<'_>,
        cache: &IncrementalCache<QueryResults>,
    ) -> Result<GenerateResult> {
        trace!("generate_rules({:?})", args.rel);
        self.check_cancelled()?;

        self.prepare_extensions(args.config);
        let prepared = args.config.prepared_in_order(self.registry.extension_ids());

        // Classify: the first matching source group of each extension claims
        // the file for that extension.
        let mut files = args.files.to_vec();
        files.sort();

        let mut srcs_by_ext: BTreeMap<&str, BTreeMap<String, Vec<String>>> = BTreeMap::new();
        let mut exts_by_file: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for file in &files {
            for (ext_id, prep) in &prepared {
                if let Some(group) = prep.result.claims(file) {
                    srcs_by_ext
                        .entry(ext_id.as_str())
                        .or_default()
                        .entry(group.to_string())
                        .or_default()
                        .push(file.clone());
                    exts_by_file.entry(file.as_str()).or_default().push(ext_id);
                }
            }
        }

        // Union each file's applicable queries across its extensions,
        // namespacing keys by extension id.
        let mut file_queries: Vec<(String, NamedQueries)> = Vec::new();
        for (file, ext_ids) in &exts_by_file {
            let mut queries = NamedQueries::new();
            for (ext_id, prep) in &prepared {
                if !ext_ids.contains(&ext_id.as_str()) {
                    continue;
                }
                for (name, query) in prep.result.queries_for_file(file) {
                    queries.insert(format!("{ext_id}|{name}"), query.clone());
                }
            }
            if !queries.is_empty() {
                file_queries.push((file.to_string(), queries));
            }
        }

        let query_results = self.run_file_queries(args, cache, &file_queries);
        self.check_cancelled()?;

        // Analyze, then declare, per extension in registration order.
        let mut actions_by_ext: Vec<(String, Vec<TargetAction>)> = Vec::new();
        for (ext_id, prep) in &prepared {
            let Some(extension) = self.registry.get(ext_id) else {
                continue;
            };
            let Some(groups) = srcs_by_ext.get(ext_id.as_str()) else {
                continue;
            };

            // Per-extension view of each claimed file's query results.
            let prefix = format!("{ext_id}|");
            let mut sources_by_group: BTreeMap<String, Vec<TargetSource>> = BTreeMap::new();
            for (group, group_files) in groups {
                let sources = group_files
                    .iter()
                    .map(|file| {
                        let mut results = QueryResults::new();
                        if let Some(all) = query_results.get(file) {
                            for (key, result) in all {
                                if let Some(stripped) = key.strip_prefix(&prefix) {
                                    results.insert(stripped.to_string(), result.clone());
                                }
                            }
                        }
                        TargetSource {
                            path: file.clone(),
                            query_results: results,
                        }
                    })
                    .collect::<Vec<_>>();
                sources_by_group.insert(group.clone(), sources);
            }

            // Analyze claimed files concurrently; failures substitute an
            // empty result for that file.
            let all_sources: Vec<&TargetSource> =
                sources_by_group.values().flatten().collect();
            all_sources.par_iter().for_each(|source| {
                if self.cancel.as_ref().is_some_and(|t| t.is_cancelled()) {
                    return;
                }
                let ctx = AnalyzeContext::new(&prep.context, source, &self.database);
                if let Err(e) = extension.analyze(&ctx) {
                    error!(
                        "{}",
                        HostError::extension(
                            ext_id.clone(),
                            format!("analyze failed for {:?}: {e}", source.path)
                        )
                    );
                }
            });
            self.check_cancelled()?;

            let mut ctx = DeclareTargetsContext::new(&prep.context, &sources_by_group);
            match extension.declare_targets(&mut ctx) {
                Ok(()) => actions_by_ext.push((ext_id.clone(), ctx.into_actions())),
                Err(e) => {
                    error!(
                        "{}",
                        HostError::extension(ext_id.clone(), format!("declare failed: {e}"))
                    );
                    actions_by_ext.push((ext_id.clone(), Vec::new()));
                }
            }
        }

        self.lower_actions(args, actions_by_ext)
    }

    /// Run each file's query union through the cache, fanned out across
    /// files. Query failures skip the file with a report; they do not abort
    /// the directory.
    fn run_file_queries(
        &self,
        args: &GenerateArgs<'_>,
        cache: &IncrementalCache<QueryResults>,
        file_queries: &[(String, NamedQueries)],
    ) -> BTreeMap<String, QueryResults> {
        let results: Vec<(String, Option<QueryResults>)> = file_queries
            .par_iter()
            .map(|(file, queries)| {
                if self.cancel.as_ref().is_some_and(|t| t.is_cancelled()) {
                    return (file.clone(), None);
                }

                let repo_path = args.repo_path(file);
                let outcome = std::fs::read(args.root.join(&repo_path))
                    .map_err(HostError::from)
                    .and_then(|source| {
                        let key = op_key(&source, queries);
                        cache.load_or_store_file(args.root, &repo_path, &key, &|rel, content| {
                            stargen_query::run_queries(rel, content, queries)
                        })
                    });

                match outcome {
                    Ok((results, was_cached)) => {
                        if was_cached {
                            trace!("query cache hit for {repo_path:?}");
                        }
                        (file.clone(), Some(results))
                    }
                    Err(e) => {
                        let msg = format!("querying source file {repo_path:?}: {e}");
                        error!("{msg}");
                        eprintln!("{msg}");
                        (file.clone(), None)
                    }
                }
            })
            .collect();

        results
            .into_iter()
            .filter_map(|(file, r)| r.map(|r| (file, r)))
            .collect()
    }

    /// Lower Add/Remove actions into generated rules and removals.
    fn lower_actions(
        &self,
        args: &GenerateArgs<'_>,
        actions_by_ext: Vec<(String, Vec<TargetAction>)>,
    ) -> Result<GenerateResult> {
        let mut result = GenerateResult::default();

        for (ext_id, actions) in actions_by_ext {
            for action in actions {
                match action {
                    TargetAction::Remove { name, kind } => {
                        let Some(existing) = args.existing_rules.iter().find(|r| {
                            r.name == name
                                && kind.as_ref().is_none_or(|k| *k == r.kind)
                        }) else {
                            continue;
                        };
                        debug!("remove target: {} {}({:?})", args.rel, existing.kind, name);
                        result.removals.push(existing.clone());
                    }
                    TargetAction::Add(target) => {
                        self.check_add_collision(args, &result, &target)?;
                        let rule = lower_declaration(&ext_id, args.rel, target);
                        trace!("add target: {} {}({:?})", args.rel, rule.kind, rule.name);
                        result.rules.push(rule);
                    }
                }
            }
        }

        Ok(result)
    }

    /// Two Add actions sharing a name, where at least one kind is
    /// host-managed, abort the run before anything is written.
    fn check_add_collision(
        &self,
        args: &GenerateArgs<'_>,
        result: &GenerateResult,
        target: &TargetDeclaration,
    ) -> Result<()> {
        let Some(other) = result.rules.iter().find(|r| r.name == target.name) else {
            return Ok(());
        };

        if self.registry.is_managed_kind(&target.kind) || self.registry.is_managed_kind(&other.kind)
        {
            let msg = format!(
                "target {:?} declared twice in //{}: {} by extension {:?} collides with {}",
                target.name, args.rel, other.kind, other.extension, target.kind
            );
            self.cancel_with(HostError::generation(msg.clone()));
            return Err(HostError::generation(msg));
        }

        Ok(())
    }
}

/// Copy the declaration's attrs with two parallel derivations: constant
/// values (labels normalized to the generating package) and per-attribute
/// import lists.
fn lower_declaration(ext_id: &str, rel: &str, target: TargetDeclaration) -> GeneratedRule {
    let mut attr_values = BTreeMap::new();
    let mut attr_imports: BTreeMap<String, Vec<TargetImport>> = BTreeMap::new();

    for (attr, value) in &target.attrs {
        let (constant, imports) = lower_attr(value, rel);
        if !imports.is_empty() {
            attr_imports.insert(attr.clone(), imports);
        }
        if let Some(constant) = constant {
            attr_values.insert(attr.clone(), constant);
        }
    }

    GeneratedRule {
        extension: ext_id.to_string(),
        name: target.name,
        kind: target.kind,
        package: rel.to_string(),
        attr_values,
        attr_imports,
        symbols: target.symbols,
        resolved_attrs: BTreeMap::new(),
    }
}

fn lower_attr(value: &AttrValue, rel: &str) -> (Option<AttrValue>, Vec<TargetImport>) {
    match value {
        AttrValue::List(items) => {
            let mut constants = Vec::new();
            let mut imports = Vec::new();
            for item in items {
                let (c, mut i) = lower_attr(item, rel);
                if let Some(c) = c {
                    constants.push(c);
                }
                imports.append(&mut i);
            }
            if constants.is_empty() && !imports.is_empty() {
                (None, imports)
            } else {
                (Some(AttrValue::List(constants)), imports)
            }
        }
        AttrValue::Import(import) => (None, vec![import.clone()]),
        AttrValue::Label(label) => (Some(AttrValue::Label(label.rel("", rel))), Vec::new()),
        other => (Some(other.clone()), Vec::new()),
    }
}
