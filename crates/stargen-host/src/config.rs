//! Per-directory configuration nodes.
//!
//! Configs form a tree via parent pointers; children are created lazily by
//! the directory that owns them and inherit directive values by walking the
//! parent chain. Reads are concurrent; only the owning directory mutates a
//! node.

use crate::extension::{Extension, PrepareContext, PrepareResult};
use stargen_core::error::{HostError, Result};
use stargen_core::label::Label;
use stargen_core::rules::PropertyType;
use stargen_core::target::AttrValue;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use tracing::warn;

pub const DIRECTIVE_GENERATION_MODE: &str = "generation_mode";
pub const DIRECTIVE_RESOLVE: &str = "resolve";

/// How (and whether) BUILD files are generated for a directory subtree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GenerationMode {
    /// Create new BUILD files and update existing ones.
    #[default]
    Create,
    /// Only update directories that already have a BUILD file.
    Update,
    /// Generation disabled.
    Disabled,
}

impl GenerationMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "create" => Some(Self::Create),
            "update" => Some(Self::Update),
            "none" => Some(Self::Disabled),
            _ => None,
        }
    }
}

/// An extension's cached prepare invocation for one directory.
pub struct PreparedExtension {
    pub context: PrepareContext,
    pub result: PrepareResult,
}

/// One directory's configuration node.
pub struct BuildConfig {
    pub repo_name: String,
    pub rel: String,
    parent: Option<Arc<BuildConfig>>,

    /// All directives attached to this directory, in file order.
    directives: RwLock<BTreeMap<String, Vec<String>>>,

    /// Prepare results cached per extension id. Not inherited; each
    /// directory prepares its own view.
    prepared: RwLock<BTreeMap<String, Arc<PreparedExtension>>>,
}

impl BuildConfig {
    pub fn new_root(repo_name: &str) -> Arc<Self> {
        Arc::new(Self {
            repo_name: repo_name.to_string(),
            rel: String::new(),
            parent: None,
            directives: RwLock::new(BTreeMap::new()),
            prepared: RwLock::new(BTreeMap::new()),
        })
    }

    pub fn new_child(self: &Arc<Self>, rel: &str) -> Arc<Self> {
        Arc::new(Self {
            repo_name: self.repo_name.clone(),
            rel: rel.to_string(),
            parent: Some(self.clone()),
            directives: RwLock::new(BTreeMap::new()),
            prepared: RwLock::new(BTreeMap::new()),
        })
    }

    pub fn add_directive(&self, key: &str, value: &str) {
        let mut map = self.directives.write().unwrap_or_else(|e| e.into_inner());
        map.entry(key.to_string())
            .or_default()
            .push(value.to_string());
    }

    /// Raw directive values for a key, optionally inherited from the
    /// nearest ancestor that sets it.
    pub fn raw_value(&self, key: &str, inherit: bool) -> Option<Vec<String>> {
        if let Some(values) = self
            .directives
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
        {
            return Some(values.clone());
        }
        if inherit {
            if let Some(parent) = &self.parent {
                return parent.raw_value(key, true);
            }
        }
        None
    }

    /// Extensions are enabled unless the nearest `<id> disabled` directive
    /// says otherwise.
    pub fn is_extension_enabled(&self, id: &str) -> bool {
        match self.raw_value(id, true) {
            Some(values) => values.last().map(String::as_str) == Some("enabled"),
            None => true,
        }
    }

    pub fn generation_mode(&self) -> Result<GenerationMode> {
        let Some(values) = self.raw_value(DIRECTIVE_GENERATION_MODE, true) else {
            return Ok(GenerationMode::default());
        };
        let raw = values.last().map(String::as_str).unwrap_or_default();
        GenerationMode::parse(raw).ok_or_else(|| {
            HostError::misconfigured(format!(
                "invalid value for directive {DIRECTIVE_GENERATION_MODE:?}: {raw}"
            ))
        })
    }

    /// The nearest `resolve <provider> <id> <label>` override for a symbol.
    /// Within one directory the last matching directive wins.
    pub fn resolve_override(&self, provider: &str, id: &str) -> Result<Option<Label>> {
        if let Some(values) = self
            .directives
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(DIRECTIVE_RESOLVE)
        {
            for value in values.iter().rev() {
                let mut parts = value.split_whitespace();
                let (Some(p), Some(i), Some(l)) = (parts.next(), parts.next(), parts.next())
                else {
                    return Err(HostError::misconfigured(format!(
                        "invalid resolve directive {value:?}: expected `resolve <provider> <id> <label>`"
                    )));
                };
                if p == provider && i == id {
                    let label = Label::parse(l).ok_or_else(|| {
                        HostError::misconfigured(format!(
                            "invalid label {l:?} in resolve directive {value:?}"
                        ))
                    })?;
                    return Ok(Some(label));
                }
            }
        }

        match &self.parent {
            Some(parent) => parent.resolve_override(provider, id),
            None => Ok(None),
        }
    }

    /// Resolve an extension's properties to typed values from the nearest
    /// directives, falling back to declared defaults. Parse problems warn
    /// and keep the default; they never poison the run.
    pub fn prepare_context(&self, extension: &dyn Extension) -> PrepareContext {
        let mut properties = BTreeMap::new();

        for prop in extension.properties() {
            let mut value = prop.default.clone();

            if let Some(raw) = self.raw_value(&prop.name, true) {
                match parse_property_value(prop.ty, &prop.name, &raw) {
                    Some(parsed) => value = parsed,
                    None => warn!(
                        "failed to parse property {:?} from {:?}, keeping default",
                        prop.name, raw
                    ),
                }
            }

            properties.insert(prop.name.clone(), value);
        }

        PrepareContext {
            repo_name: self.repo_name.clone(),
            rel: self.rel.clone(),
            properties,
        }
    }

    pub fn get_prepared(&self, ext_id: &str) -> Option<Arc<PreparedExtension>> {
        self.prepared
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(ext_id)
            .cloned()
    }

    pub fn insert_prepared(&self, ext_id: &str, prepared: Arc<PreparedExtension>) {
        self.prepared
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(ext_id.to_string(), prepared);
    }

    /// Iterate prepared extensions in the given id order.
    pub fn prepared_in_order(&self, ids: &[String]) -> Vec<(String, Arc<PreparedExtension>)> {
        let map = self.prepared.read().unwrap_or_else(|e| e.into_inner());
        ids.iter()
            .filter_map(|id| map.get(id).map(|p| (id.clone(), p.clone())))
            .collect()
    }
}

fn only_value<'a>(name: &str, values: &'a [String]) -> Option<&'a str> {
    if values.len() > 1 {
        warn!("expected exactly one value for {name:?}, got {}", values.len());
    }
    values.last().map(String::as_str)
}

fn parse_property_value(ty: PropertyType, name: &str, values: &[String]) -> Option<AttrValue> {
    match ty {
        PropertyType::String => only_value(name, values).map(AttrValue::from),
        PropertyType::Strings => Some(AttrValue::from(values.to_vec())),
        PropertyType::Bool => only_value(name, values).map(|v| AttrValue::Bool(v == "true")),
        PropertyType::Number => only_value(name, values)
            .and_then(|v| v.parse::<i64>().ok())
            .map(AttrValue::Number),
    }
}
