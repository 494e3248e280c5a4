//! The extension registry: loads definitions, owns rule kinds, and freezes
//! once generation metadata has been queried.

use crate::defs::{parse_def_file, DefExtension};
use crate::extension::Extension;
use stargen_core::error::{HostError, Result};
use stargen_core::label::Label;
use stargen_core::rules::RuleKind;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, trace, warn};

/// A `.bzl` load statement needed by generated rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadInfo {
    pub name: String,
    pub symbols: Vec<String>,
}

/// Kinds every host recognizes before any extension loads; extensions may
/// overwrite them.
fn builtin_kinds() -> Vec<RuleKind> {
    vec![RuleKind {
        name: "copy_to_bin".to_string(),
        load_from: Some("@aspect_bazel_lib//lib:copy_to_bin.bzl".to_string()),
        non_empty_attrs: vec!["srcs".to_string()],
        ..Default::default()
    }]
}

#[derive(Default)]
pub struct ExtensionRegistry {
    /// Registration order; generation iterates extensions in this order.
    ids: Vec<String>,
    extensions: BTreeMap<String, Arc<dyn Extension>>,
    kinds: BTreeMap<String, RuleKind>,
    /// Set once `kinds()`/`apparent_loads()` has been queried; extensions
    /// can no longer be added.
    frozen: AtomicBool,
}

impl ExtensionRegistry {
    pub fn new() -> Self {
        let mut registry = Self::default();
        for kind in builtin_kinds() {
            registry.kinds.insert(kind.name.clone(), kind);
        }
        registry
    }

    pub fn add_extension(&mut self, extension: Arc<dyn Extension>) -> Result<()> {
        if self.frozen.load(Ordering::Acquire) {
            return Err(HostError::misconfigured(format!(
                "cannot add extension {:?} after configuration has started",
                extension.id()
            )));
        }
        let id = extension.id().to_string();
        if self.extensions.contains_key(&id) {
            return Err(HostError::generation(format!("duplicate extension {id:?}")));
        }

        info!("extension added: {id:?}");
        self.ids.push(id.clone());
        self.extensions.insert(id, extension);
        Ok(())
    }

    /// Register a rule kind. A duplicate name replaces the prior kind.
    pub fn add_kind(&mut self, kind: RuleKind) {
        if self.kinds.contains_key(&kind.name) {
            warn!("rule kind {:?} replaces a prior registration", kind.name);
        }
        self.kinds.insert(kind.name.clone(), kind);
    }

    /// Extension ids in registration order.
    pub fn extension_ids(&self) -> &[String] {
        &self.ids
    }

    pub fn get(&self, id: &str) -> Option<&Arc<dyn Extension>> {
        self.extensions.get(id)
    }

    /// All known kinds. Freezes the registry.
    pub fn kinds(&self) -> &BTreeMap<String, RuleKind> {
        self.frozen.store(true, Ordering::Release);
        &self.kinds
    }

    /// Whether the host manages rules of this kind (collision checks).
    pub fn is_managed_kind(&self, name: &str) -> bool {
        self.kinds.contains_key(name)
    }

    /// Load statements for generated rules, with external repo names
    /// rewritten through the caller's apparent-name mapper. Freezes the
    /// registry.
    pub fn apparent_loads(&self, map_repo: &dyn Fn(&str) -> Option<String>) -> Vec<LoadInfo> {
        self.frozen.store(true, Ordering::Release);

        let mut loads: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (name, kind) in &self.kinds {
            let Some(from) = &kind.load_from else { continue };
            let Some(mut label) = Label::parse(from) else {
                warn!("invalid load_from label {from:?} for kind {name:?}");
                continue;
            };
            if !label.repo.is_empty() {
                if let Some(apparent) = map_repo(&label.repo) {
                    label.repo = apparent;
                }
            }
            loads.entry(label.to_string()).or_default().push(name.clone());
        }

        loads
            .into_iter()
            .map(|(name, symbols)| LoadInfo { name, symbols })
            .collect()
    }

    /// Load every definition file in a directory, in sorted path order so
    /// registration does not depend on filesystem ordering. Individual
    /// definition failures are reported and skipped; they do not poison the
    /// other definitions.
    pub fn load_dir(&mut self, dir: &Path) -> Result<()> {
        self.load_dir_filtered(dir, None)
    }

    fn load_dir_filtered(&mut self, dir: &Path, allow: Option<&BTreeSet<String>>) -> Result<()> {
        let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|e| e == "toml"))
            .collect();
        paths.sort();

        if paths.is_empty() {
            warn!("no extension definitions found in {}", dir.display());
            return Ok(());
        }

        info!("loading {} extension definitions from {}", paths.len(), dir.display());

        for path in paths {
            if let Err(e) = self.load_def_file(&path, allow) {
                let hint = path.display();
                warn!("failed to load extension definition {hint}: {e}");
                eprintln!("Failed to load extension definition {hint:?}: {e}");
            }
        }

        Ok(())
    }

    fn load_def_file(&mut self, path: &Path, allow: Option<&BTreeSet<String>>) -> Result<()> {
        let content = std::fs::read_to_string(path)?;
        let def = parse_def_file(&path.display().to_string(), &content)?;

        for kind in def.kinds {
            self.add_kind(kind.into_rule_kind());
        }

        if let Some(ext_def) = def.extension {
            if let Some(allow) = allow {
                if !allow.contains(&ext_def.id) {
                    trace!("extension {:?} not enabled, skipping", ext_def.id);
                    return Ok(());
                }
            }
            self.add_extension(Arc::new(DefExtension::from_def(ext_def)?))?;
        }

        Ok(())
    }

    /// Load definitions from `$ORION_EXTENSIONS` (absolute), or from test
    /// runfiles under `BAZEL_TEST=1`, filtered by `$ENABLE_LANGUAGES`.
    pub fn load_from_env(&mut self) -> Result<()> {
        let mut dir = std::env::var("ORION_EXTENSIONS").unwrap_or_default();
        let mut subdir = ".".to_string();

        if dir.is_empty() {
            if std::env::var("BAZEL_TEST").as_deref() != Ok("1") {
                trace!("no ORION_EXTENSIONS environment variable set");
                return Ok(());
            }
            // Test-fixture definitions from runfiles.
            dir = format!(
                "{}/{}",
                std::env::var("RUNFILES_DIR").unwrap_or_default(),
                std::env::var("TEST_WORKSPACE").unwrap_or_default()
            );
            subdir = std::env::var("TEST_ORION_EXTENSIONS").unwrap_or_else(|_| ".".to_string());
        }

        let dir = PathBuf::from(dir);
        if !dir.is_absolute() {
            return Err(HostError::misconfigured(format!(
                "ORION_EXTENSIONS must be an absolute path, got {:?}",
                dir.display()
            )));
        }

        let allow: Option<BTreeSet<String>> = std::env::var("ENABLE_LANGUAGES")
            .ok()
            .filter(|v| !v.is_empty())
            .map(|v| v.split(',').map(|s| s.trim().to_string()).collect());

        self.load_dir_filtered(&dir.join(subdir), allow.as_ref())
    }
}
