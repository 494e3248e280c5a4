//! Declarative extension definitions, deserialized from TOML files.
//!
//! Each TOML file in the extensions directory defines one extension: the
//! sources it claims, the queries it runs, the symbols it publishes, and
//! the targets it declares. Adding an extension = drop a TOML file; no host
//! edits needed. Definitions compile into [`DefExtension`], the host's
//! standard [`Extension`] implementation; test fixtures and embedders can
//! still implement the trait directly.
//!
//! Template strings in names, attrs, symbol ids, and labels expand
//! per-invocation variables:
//!
//! - `{file}` / `{stem}` / `{filename}`: the claimed file's path (relative
//!   to its directory), stem, and basename
//! - `{rel}` / `{dir}`: the directory's repo-relative path and basename
//!   (the repo name at the root)
//! - `{prop.<name>}`: a string property value
//! - query capture names, inside import rules

use crate::extension::{
    AnalyzeContext, DeclareTargetsContext, Extension, PrepareContext, PrepareResult, TargetSource,
    DEFAULT_SOURCE_GROUP,
};
use serde::Deserialize;
use stargen_core::error::{HostError, Result};
use stargen_core::filter::SourceFilter;
use stargen_core::label::Label;
use stargen_core::rules::{Property, PropertyType, RuleKind};
use stargen_core::target::{AttrValue, TargetDeclaration, TargetImport};
use stargen_query::{QueryDefinition, QueryResult};
use std::collections::BTreeMap;

// ---------------------------------------------------------------------------
// TOML schema
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct DefFile {
    pub schema_version: u32,
    #[serde(default)]
    pub extension: Option<ExtensionDef>,
    /// Deprecated alias for `[extension]`.
    #[serde(default)]
    pub orion_extension: Option<ExtensionDef>,
    #[serde(default)]
    pub kinds: Vec<KindDef>,
}

#[derive(Debug, Deserialize)]
pub struct ExtensionDef {
    pub id: String,
    #[serde(default)]
    pub properties: Vec<PropertyDef>,
    #[serde(default)]
    pub sources: BTreeMap<String, SourceSpec>,
    #[serde(default)]
    pub queries: BTreeMap<String, QueryDef>,
    /// Analyze-phase symbol exports into the cross-extension database.
    #[serde(default)]
    pub symbols: Vec<SymbolRule>,
    #[serde(default)]
    pub targets: Vec<TargetRule>,
}

#[derive(Debug, Deserialize)]
pub struct PropertyDef {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: PropertyType,
    #[serde(default)]
    pub default: Option<toml::Value>,
}

/// A source group: either a bare glob list or a detailed filter spec.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum SourceSpec {
    Globs(Vec<String>),
    Detailed {
        #[serde(default)]
        globs: Vec<String>,
        #[serde(default)]
        extensions: Vec<String>,
        #[serde(default)]
        files: Vec<String>,
    },
}

#[derive(Debug, Deserialize)]
pub struct QueryDef {
    #[serde(rename = "type")]
    pub ty: String,
    #[serde(default)]
    pub grammar: Option<String>,
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub filter: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct SymbolRule {
    pub provider: String,
    pub id: String,
    pub label: String,
}

#[derive(Debug, Deserialize)]
pub struct TargetRule {
    /// `file` emits one target per claimed file; `directory` one per
    /// directory.
    pub per: String,
    #[serde(default)]
    pub group: Option<String>,
    pub kind: String,
    pub name: String,
    #[serde(default)]
    pub attrs: BTreeMap<String, toml::Value>,
    #[serde(default)]
    pub import_attrs: Vec<ImportRule>,
    #[serde(default)]
    pub export_symbols: Vec<ExportRule>,
}

#[derive(Debug, Deserialize)]
pub struct ImportRule {
    pub attr: String,
    pub query: String,
    /// Capture holding the imported id; omit for value queries.
    #[serde(default)]
    pub capture: Option<String>,
    pub provider: String,
    #[serde(default)]
    pub optional: bool,
}

#[derive(Debug, Deserialize)]
pub struct ExportRule {
    pub provider: String,
    pub id: String,
}

#[derive(Debug, Deserialize)]
pub struct KindDef {
    pub name: String,
    #[serde(default)]
    pub load_from: Option<String>,
    #[serde(default)]
    pub match_any: bool,
    #[serde(default)]
    pub match_attrs: Vec<String>,
    #[serde(default)]
    pub non_empty_attrs: Vec<String>,
    #[serde(default)]
    pub mergeable_attrs: Vec<String>,
    #[serde(default)]
    pub resolve_attrs: Vec<String>,
}

impl KindDef {
    pub fn into_rule_kind(self) -> RuleKind {
        RuleKind {
            name: self.name,
            load_from: self.load_from,
            match_any: self.match_any,
            match_attrs: self.match_attrs,
            non_empty_attrs: self.non_empty_attrs,
            mergeable_attrs: self.mergeable_attrs,
            resolve_attrs: self.resolve_attrs,
        }
    }
}

/// Parse a definition file, forwarding the deprecated alias table.
pub fn parse_def_file(path_hint: &str, content: &str) -> Result<DefFile> {
    let mut def: DefFile = toml::from_str(content).map_err(|e| {
        HostError::misconfigured(format!("invalid extension definition {path_hint}: {e}"))
    })?;

    if def.schema_version != 1 {
        return Err(HostError::misconfigured(format!(
            "{path_hint}: unsupported schema_version {}; expected 1",
            def.schema_version
        )));
    }

    if let Some(legacy) = def.orion_extension.take() {
        println!("{path_hint}: [orion_extension] is deprecated, use [extension]");
        if def.extension.is_some() {
            return Err(HostError::misconfigured(format!(
                "{path_hint}: both [extension] and [orion_extension] given"
            )));
        }
        def.extension = Some(legacy);
    }

    Ok(def)
}

// ---------------------------------------------------------------------------
// DefExtension
// ---------------------------------------------------------------------------

/// The standard declarative [`Extension`] built from a TOML definition.
pub struct DefExtension {
    id: String,
    properties: Vec<Property>,
    def: ExtensionDef,
}

impl DefExtension {
    pub fn from_def(def: ExtensionDef) -> Result<Self> {
        let mut properties = Vec::with_capacity(def.properties.len());
        for p in &def.properties {
            properties.push(Property {
                name: p.name.clone(),
                ty: p.ty,
                default: p
                    .default
                    .as_ref()
                    .map(toml_to_attr)
                    .transpose()?
                    .unwrap_or_else(|| default_for(p.ty)),
            });
        }

        for target in &def.targets {
            if target.per != "file" && target.per != "directory" {
                return Err(HostError::misconfigured(format!(
                    "extension {:?}: target per must be \"file\" or \"directory\", got {:?}",
                    def.id, target.per
                )));
            }
            for import in &target.import_attrs {
                if !def.queries.contains_key(&import.query) {
                    return Err(HostError::misconfigured(format!(
                        "extension {:?}: import attr {:?} references unknown query {:?}",
                        def.id, import.attr, import.query
                    )));
                }
            }
        }

        Ok(Self {
            id: def.id.clone(),
            properties,
            def,
        })
    }
}

fn default_for(ty: PropertyType) -> AttrValue {
    match ty {
        PropertyType::String => AttrValue::String(String::new()),
        PropertyType::Strings => AttrValue::List(Vec::new()),
        PropertyType::Bool => AttrValue::Bool(false),
        PropertyType::Number => AttrValue::Number(0),
    }
}

fn toml_to_attr(value: &toml::Value) -> Result<AttrValue> {
    Ok(match value {
        toml::Value::String(s) => AttrValue::String(s.clone()),
        toml::Value::Boolean(b) => AttrValue::Bool(*b),
        toml::Value::Integer(n) => AttrValue::Number(*n),
        toml::Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(toml_to_attr(item)?);
            }
            AttrValue::List(out)
        }
        other => {
            return Err(HostError::misconfigured(format!(
                "unsupported attribute value {other:?}"
            )))
        }
    })
}

impl Extension for DefExtension {
    fn id(&self) -> &str {
        &self.id
    }

    fn properties(&self) -> &[Property] {
        &self.properties
    }

    fn prepare(&self, _ctx: &PrepareContext) -> Result<PrepareResult> {
        let mut sources: BTreeMap<String, Vec<SourceFilter>> = BTreeMap::new();
        for (group, spec) in &self.def.sources {
            let mut filters = Vec::new();
            match spec {
                SourceSpec::Globs(globs) => {
                    if !globs.is_empty() {
                        filters.push(SourceFilter::globs(globs)?);
                    }
                }
                SourceSpec::Detailed {
                    globs,
                    extensions,
                    files,
                } => {
                    if !globs.is_empty() {
                        filters.push(SourceFilter::globs(globs)?);
                    }
                    if !extensions.is_empty() {
                        let exts: Vec<&str> = extensions.iter().map(String::as_str).collect();
                        filters.push(SourceFilter::extensions(&exts));
                    }
                    if !files.is_empty() {
                        filters.push(SourceFilter::files(files));
                    }
                }
            }
            sources.insert(group.clone(), filters);
        }

        let mut queries = stargen_query::NamedQueries::new();
        for (name, q) in &self.def.queries {
            let query = match q.ty.as_str() {
                "ast" => QueryDefinition::ast(&q.query, q.grammar.as_deref(), q.filter.clone())?,
                "regex" => QueryDefinition::regex(&q.query, q.filter.clone())?,
                "json" => QueryDefinition::json(&q.query, q.filter.clone())?,
                "yaml" => QueryDefinition::yaml(&q.query, q.filter.clone())?,
                "raw" => QueryDefinition::raw(q.filter.clone())?,
                other => {
                    return Err(HostError::misconfigured(format!(
                        "extension {:?}: unknown query type {other:?} for query {name:?}",
                        self.id
                    )))
                }
            };
            queries.insert(name.clone(), query);
        }

        Ok(PrepareResult { sources, queries })
    }

    fn analyze(&self, ctx: &AnalyzeContext<'_>) -> Result<()> {
        if self.def.symbols.is_empty() {
            return Ok(());
        }

        let vars = file_vars(ctx.prepare, &ctx.source.path);
        for rule in &self.def.symbols {
            let id = expand(&rule.id, &vars);
            let label_text = expand(&rule.label, &vars);
            let label = parse_decl_label(&label_text, &ctx.prepare.rel)?;
            ctx.add_symbol(&id, &rule.provider, label);
        }

        Ok(())
    }

    fn declare_targets(&self, ctx: &mut DeclareTargetsContext<'_>) -> Result<()> {
        for rule in &self.def.targets {
            let group = rule.group.as_deref().unwrap_or(DEFAULT_SOURCE_GROUP);
            let sources = ctx.group(group).to_vec();

            if rule.per == "file" {
                for source in &sources {
                    let decl = self.build_target(ctx.prepare, rule, std::slice::from_ref(source))?;
                    ctx.add(decl);
                }
            } else if !sources.is_empty() {
                let decl = self.build_target(ctx.prepare, rule, &sources)?;
                ctx.add(decl);
            }
        }

        Ok(())
    }
}

impl DefExtension {
    fn build_target(
        &self,
        prepare: &PrepareContext,
        rule: &TargetRule,
        sources: &[TargetSource],
    ) -> Result<TargetDeclaration> {
        // Directory targets take their vars from the first source's dir.
        let vars = match rule.per.as_str() {
            "file" => file_vars(prepare, &sources[0].path),
            _ => dir_vars(prepare),
        };

        let mut decl = TargetDeclaration::new(&expand(&rule.name, &vars), &rule.kind);

        for (attr, value) in &rule.attrs {
            decl.attrs
                .insert(attr.clone(), expand_attr(value, &vars, sources)?);
        }

        for import in &rule.import_attrs {
            let mut imports = Vec::new();
            for source in sources {
                collect_imports(import, source, &mut imports);
            }
            if imports.is_empty() {
                continue;
            }
            let entry = decl
                .attrs
                .entry(import.attr.clone())
                .or_insert_with(|| AttrValue::List(Vec::new()));
            if let AttrValue::List(items) = entry {
                items.extend(imports.into_iter().map(AttrValue::Import));
            }
        }

        for export in &rule.export_symbols {
            for source in sources {
                let vars = file_vars(prepare, &source.path);
                decl.symbols.push(stargen_core::target::Symbol::new(
                    &expand(&export.id, &vars),
                    &export.provider,
                ));
            }
        }

        Ok(decl)
    }
}

fn collect_imports(rule: &ImportRule, source: &TargetSource, out: &mut Vec<TargetImport>) {
    let Some(result) = source.query(&rule.query) else {
        return;
    };

    match result {
        QueryResult::Matches(matches) => {
            for m in matches {
                let id = match &rule.capture {
                    Some(capture) => m.capture(capture).map(str::to_string),
                    None => m
                        .result
                        .as_ref()
                        .and_then(|v| v.as_str())
                        .map(str::to_string),
                };
                if let Some(id) = id {
                    out.push(build_import(rule, &id, &source.path));
                }
            }
        }
        QueryResult::Values(values) => {
            for v in values {
                if let Some(id) = v.as_str() {
                    out.push(build_import(rule, id, &source.path));
                }
            }
        }
        QueryResult::Raw(_) => {}
    }
}

fn build_import(rule: &ImportRule, id: &str, from: &str) -> TargetImport {
    let mut import = TargetImport::new(id, &rule.provider, from);
    import.optional = rule.optional;
    import
}

/// A label written in a definition: relative labels bind to the generating
/// package.
fn parse_decl_label(text: &str, rel: &str) -> Result<Label> {
    let mut label = Label::parse(text)
        .ok_or_else(|| HostError::misconfigured(format!("invalid label {text:?}")))?;
    if label.relative {
        label = Label::new("", rel, &label.name);
    }
    Ok(label)
}

// ---------------------------------------------------------------------------
// Template expansion
// ---------------------------------------------------------------------------

fn dir_vars(prepare: &PrepareContext) -> BTreeMap<String, String> {
    let mut vars = BTreeMap::new();
    vars.insert("rel".to_string(), prepare.rel.clone());
    let dir = prepare
        .rel
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or(&prepare.repo_name);
    vars.insert("dir".to_string(), dir.to_string());
    for (name, value) in &prepare.properties {
        if let AttrValue::String(s) = value {
            vars.insert(format!("prop.{name}"), s.clone());
        }
    }
    vars
}

fn file_vars(prepare: &PrepareContext, path: &str) -> BTreeMap<String, String> {
    let mut vars = dir_vars(prepare);
    let filename = path.rsplit('/').next().unwrap_or(path);
    let stem = filename
        .rsplit_once('.')
        .map(|(stem, _)| stem)
        .unwrap_or(filename);
    vars.insert("file".to_string(), path.to_string());
    vars.insert("filename".to_string(), filename.to_string());
    vars.insert("stem".to_string(), stem.to_string());
    vars
}

/// Replace `{var}` references; unknown variables are left in place.
fn expand(template: &str, vars: &BTreeMap<String, String>) -> String {
    let mut out = template.to_string();
    for (key, value) in vars {
        let needle = format!("{{{key}}}");
        if out.contains(&needle) {
            out = out.replace(&needle, value);
        }
    }
    out
}

fn expand_attr(
    value: &toml::Value,
    vars: &BTreeMap<String, String>,
    sources: &[TargetSource],
) -> Result<AttrValue> {
    Ok(match value {
        toml::Value::String(s) if s == "{files}" => AttrValue::List(
            sources
                .iter()
                .map(|src| AttrValue::String(src.path.clone()))
                .collect(),
        ),
        toml::Value::String(s) => AttrValue::String(expand(s, vars)),
        toml::Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                match expand_attr(item, vars, sources)? {
                    // `{files}` inside a list splices.
                    AttrValue::List(nested)
                        if matches!(item, toml::Value::String(s) if s == "{files}") =>
                    {
                        out.extend(nested)
                    }
                    other => out.push(other),
                }
            }
            AttrValue::List(out)
        }
        other => toml_to_attr(other)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const JS_DEF: &str = r#"
schema_version = 1

[extension]
id = "js"

[extension.sources]
default = ["**/*.js"]

[extension.queries.imports]
type = "regex"
query = 'import\s+"(?P<src>[^"]+)"'

[[extension.targets]]
per = "file"
kind = "js_library"
name = "{stem}"

[extension.targets.attrs]
srcs = ["{file}"]

[[extension.targets.import_attrs]]
attr = "deps"
query = "imports"
capture = "src"
provider = "js"

[[extension.targets.export_symbols]]
provider = "js"
id = "./{stem}"

[[kinds]]
name = "js_library"
load_from = "@aspect_rules_js//js:defs.bzl"
non_empty_attrs = ["srcs"]
resolve_attrs = ["deps"]
"#;

    #[test]
    fn parses_a_full_definition() {
        let def = parse_def_file("js.toml", JS_DEF).unwrap();
        let ext = def.extension.unwrap();
        assert_eq!(ext.id, "js");
        assert_eq!(ext.targets.len(), 1);
        assert_eq!(def.kinds.len(), 1);
        assert_eq!(
            def.kinds[0].load_from.as_deref(),
            Some("@aspect_rules_js//js:defs.bzl")
        );
    }

    #[test]
    fn deprecated_alias_forwards() {
        let legacy = r#"
schema_version = 1

[orion_extension]
id = "legacy"
"#;
        let def = parse_def_file("legacy.toml", legacy).unwrap();
        assert_eq!(def.extension.unwrap().id, "legacy");
    }

    #[test]
    fn schema_version_is_checked() {
        assert!(parse_def_file("x.toml", "schema_version = 2\n").is_err());
    }

    #[test]
    fn unknown_import_query_is_rejected() {
        let bad = r#"
schema_version = 1

[extension]
id = "bad"

[[extension.targets]]
per = "file"
kind = "lib"
name = "{stem}"

[[extension.targets.import_attrs]]
attr = "deps"
query = "nope"
provider = "x"
"#;
        let def = parse_def_file("bad.toml", bad).unwrap();
        assert!(DefExtension::from_def(def.extension.unwrap()).is_err());
    }

    #[test]
    fn prepare_builds_filters_and_queries() {
        let def = parse_def_file("js.toml", JS_DEF).unwrap();
        let ext = DefExtension::from_def(def.extension.unwrap()).unwrap();

        let prep = ext.prepare(&PrepareContext::default()).unwrap();
        assert_eq!(prep.claims("src/a.js"), Some(DEFAULT_SOURCE_GROUP));
        assert_eq!(prep.claims("src/a.ts"), None);
        assert!(prep.queries.contains_key("imports"));
    }

    #[test]
    fn template_expansion() {
        let prepare = PrepareContext {
            repo_name: "repo".to_string(),
            rel: "lib/util".to_string(),
            properties: BTreeMap::new(),
        };
        let vars = file_vars(&prepare, "sub/thing.test.js");
        assert_eq!(expand("{stem}_lib in {dir}", &vars), "thing.test_lib in util");
        assert_eq!(expand("{file}", &vars), "sub/thing.test.js");
        assert_eq!(expand("{unknown}", &vars), "{unknown}");
    }
}
