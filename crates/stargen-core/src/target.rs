//! Target declarations and their symbol-level import/export metadata.

use crate::label::Label;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// An exported name: a `(provider, id)` pair where the provider is an opaque
/// namespace string (e.g. `"js"`).
#[derive(
    Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct Symbol {
    pub id: String,
    pub provider: String,
}

impl Symbol {
    pub fn new(id: &str, provider: &str) -> Self {
        Self {
            id: id.to_string(),
            provider: provider.to_string(),
        }
    }
}

/// A declared need for a symbol, resolved to labels after generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetImport {
    pub symbol: Symbol,
    /// Optional imports are silently dropped when unresolved.
    pub optional: bool,
    /// Where the import came from (usually the importing file), for
    /// diagnostics only.
    pub from: String,
}

impl TargetImport {
    pub fn new(id: &str, provider: &str, from: &str) -> Self {
        Self {
            symbol: Symbol::new(id, provider),
            optional: false,
            from: from.to_string(),
        }
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }
}

/// An attribute value on a declared target.
///
/// Values may be scalars, labels, lists, or import placeholders; lowering
/// recurses over list structure to strip the placeholders out.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    String(String),
    Bool(bool),
    Number(i64),
    Label(Label),
    Import(TargetImport),
    List(Vec<AttrValue>),
}

impl AttrValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AttrValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<i64> {
        match self {
            AttrValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// String items of a list value (non-string items skipped).
    pub fn as_string_list(&self) -> Vec<&str> {
        match self {
            AttrValue::List(items) => items.iter().filter_map(|v| v.as_str()).collect(),
            _ => Vec::new(),
        }
    }
}

impl From<&str> for AttrValue {
    fn from(s: &str) -> Self {
        AttrValue::String(s.to_string())
    }
}

impl From<Vec<String>> for AttrValue {
    fn from(items: Vec<String>) -> Self {
        AttrValue::List(items.into_iter().map(AttrValue::String).collect())
    }
}

/// An extension's emitted target prior to resolution.
#[derive(Debug, Clone, Default)]
pub struct TargetDeclaration {
    pub name: String,
    pub kind: String,
    pub attrs: BTreeMap<String, AttrValue>,
    /// Symbols this target exports, indexed for import resolution.
    pub symbols: Vec<Symbol>,
}

impl TargetDeclaration {
    pub fn new(name: &str, kind: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: kind.to_string(),
            ..Default::default()
        }
    }

    pub fn attr(mut self, name: &str, value: AttrValue) -> Self {
        self.attrs.insert(name.to_string(), value);
        self
    }

    pub fn symbol(mut self, sym: Symbol) -> Self {
        self.symbols.push(sym);
        self
    }
}

/// An action an extension takes against the generated BUILD file.
#[derive(Debug, Clone)]
pub enum TargetAction {
    Add(TargetDeclaration),
    Remove {
        name: String,
        kind: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attr_value_accessors() {
        assert_eq!(AttrValue::from("x").as_str(), Some("x"));
        assert_eq!(AttrValue::Bool(true).as_bool(), Some(true));
        assert_eq!(AttrValue::Number(3).as_number(), Some(3));

        let list = AttrValue::from(vec!["a.js".to_string(), "b.js".to_string()]);
        assert_eq!(list.as_string_list(), vec!["a.js", "b.js"]);
    }

    #[test]
    fn declaration_builder() {
        let decl = TargetDeclaration::new("a", "js_library")
            .attr("srcs", AttrValue::from(vec!["a.js".to_string()]))
            .symbol(Symbol::new("./a", "js"));
        assert_eq!(decl.name, "a");
        assert_eq!(decl.kind, "js_library");
        assert_eq!(decl.symbols.len(), 1);
    }
}
