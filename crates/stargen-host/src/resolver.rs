//! Resolve declared imports on generated rules into concrete labels.
//!
//! Resolution order per import: the nearest `resolve` override directive,
//! then the BUILD-wide rule index, then the cross-extension symbol database.
//! Non-optional imports that stay unresolved are reported with the directive
//! the user can add; optional ones are silently dropped.

use crate::config::BuildConfig;
use crate::generate::GeneratedRule;
use crate::Host;
use stargen_core::error::{HostError, Result};
use stargen_core::label::Label;
use stargen_core::target::{AttrValue, Symbol, TargetImport};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// BUILD-wide index of `(provider, id) → declaring rule labels`, populated
/// from the exported symbols of every generated rule.
#[derive(Default)]
pub struct RuleIndex {
    by_symbol: BTreeMap<Symbol, Vec<Label>>,
}

impl RuleIndex {
    pub fn build<'a>(rules: impl IntoIterator<Item = &'a GeneratedRule>) -> Self {
        let mut index = Self::default();
        for rule in rules {
            let label = rule.label();
            for symbol in &rule.symbols {
                index
                    .by_symbol
                    .entry(symbol.clone())
                    .or_default()
                    .push(label.clone());
            }
        }
        index
    }

    pub fn find(&self, symbol: &Symbol) -> &[Label] {
        self.by_symbol
            .get(symbol)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

enum Resolution {
    Label(Label),
    /// Every candidate was the importing rule itself; no edge is needed.
    SelfImport,
    NotFound,
}

impl Host {
    /// Resolve every import placeholder on a rule, writing sorted and
    /// deduplicated label lists into `resolved_attrs`. Idempotent: the
    /// output depends only on the imports, the index, and the database.
    pub fn resolve_rule(
        &self,
        rule: &mut GeneratedRule,
        config: &Arc<BuildConfig>,
        index: &RuleIndex,
    ) -> Result<()> {
        let from = rule.label();
        let mut resolved_attrs = BTreeMap::new();

        for (attr, imports) in &rule.attr_imports {
            let mut labels: Vec<String> = Vec::new();

            for import in imports {
                match self.resolve_import(config, index, &from, import)? {
                    Resolution::Label(label) => {
                        labels.push(label.rel("", &rule.package).to_string());
                    }
                    Resolution::SelfImport => {}
                    Resolution::NotFound => {
                        if import.optional {
                            continue;
                        }
                        let msg = format!(
                            "import {:?} from {:?} is an unknown dependency; resolve it with a \
                             directive:\n\t# stargen:resolve {} {} <label>",
                            import.symbol.id, import.from, import.symbol.provider, import.symbol.id,
                        );
                        if self.strict_imports {
                            self.cancel_with(HostError::import(msg.clone()));
                            return Err(HostError::import(msg));
                        }
                        eprintln!("Resolution error: {msg}");
                    }
                }
            }

            labels.sort();
            labels.dedup();
            // A rule never depends on itself.
            let self_label = from.rel("", &rule.package).to_string();
            labels.retain(|l| *l != self_label);

            resolved_attrs.insert(attr.clone(), labels);
        }

        rule.resolved_attrs = resolved_attrs;
        Ok(())
    }

    fn resolve_import(
        &self,
        config: &Arc<BuildConfig>,
        index: &RuleIndex,
        from: &Label,
        import: &TargetImport,
    ) -> Result<Resolution> {
        let symbol = &import.symbol;

        // 1. Override directive.
        if let Some(label) = config.resolve_override(&symbol.provider, &symbol.id)? {
            return Ok(Resolution::Label(label));
        }

        // 2. The rule index, with self-imports filtered.
        let matches = index.find(symbol);
        if !matches.is_empty() {
            let filtered: Vec<&Label> = matches
                .iter()
                .filter(|l| !l.is_self_reference(&from.package, &from.name))
                .collect();

            if filtered.len() > 1 {
                let listed = filtered
                    .iter()
                    .map(|l| l.to_string())
                    .collect::<Vec<_>>()
                    .join(", ");
                let msg = format!(
                    "import {:?} from {:?} resolved to multiple targets ({listed}); \
                     disambiguate with a `resolve` directive",
                    symbol.id, import.from,
                );
                self.cancel_with(HostError::generation(msg.clone()));
                return Err(HostError::generation(msg));
            }

            return Ok(match filtered.first() {
                Some(label) => Resolution::Label((*label).clone()),
                None => Resolution::SelfImport,
            });
        }

        // 3. Symbol database fallback across directories.
        let db_matches = self.database.find(symbol);
        if let Some(label) = db_matches.first() {
            return Ok(Resolution::Label(label.clone()));
        }

        debug!("import {:?} for target {from} not found", symbol.id);
        Ok(Resolution::NotFound)
    }

    /// Resolution entry point for other language handlers: consult only this
    /// host's index, never recurse into other hosts.
    pub fn cross_resolve(&self, index: &RuleIndex, symbol: &Symbol, from_lang: &str) -> Vec<Label> {
        if from_lang == crate::HOST_LANGUAGE_NAME {
            return Vec::new();
        }
        index.find(symbol).to_vec()
    }
}

impl GeneratedRule {
    /// Final attribute values for the writer: resolved labels first, then
    /// any explicit constants the extension placed on the same attribute.
    pub fn merged_attrs(&self) -> BTreeMap<String, AttrValue> {
        let mut attrs = self.attr_values.clone();

        for (attr, labels) in &self.resolved_attrs {
            let mut items: Vec<AttrValue> = labels
                .iter()
                .map(|l| AttrValue::String(l.clone()))
                .collect();

            match attrs.remove(attr) {
                Some(AttrValue::List(constants)) => items.extend(constants),
                Some(scalar) => items.push(scalar),
                None => {}
            }

            if !items.is_empty() {
                attrs.insert(attr.clone(), AttrValue::List(items));
            }
        }

        attrs
    }
}
