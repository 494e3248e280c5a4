//! The cross-extension symbol database.
//!
//! Append-only: populated during the Analyze phase, read by the resolver as
//! the fallback for imports the local rule index and overrides cannot place.

use stargen_core::label::Label;
use stargen_core::target::Symbol;
use std::collections::BTreeMap;
use std::sync::RwLock;

#[derive(Default)]
pub struct SymbolDatabase {
    symbols: RwLock<BTreeMap<Symbol, Vec<Label>>>,
}

impl SymbolDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, id: &str, provider: &str, label: Label) {
        let mut map = self.symbols.write().unwrap_or_else(|e| e.into_inner());
        map.entry(Symbol::new(id, provider)).or_default().push(label);
    }

    /// Labels declaring the symbol, in insertion order.
    pub fn find(&self, symbol: &Symbol) -> Vec<Label> {
        self.symbols
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(symbol)
            .cloned()
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.symbols
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_and_find() {
        let db = SymbolDatabase::new();
        db.add("foo", "py", Label::new("", "lib", "foo"));
        db.add("foo", "py", Label::new("", "other", "foo"));

        let found = db.find(&Symbol::new("foo", "py"));
        assert_eq!(found.len(), 2);
        assert_eq!(found[0], Label::new("", "lib", "foo"));

        assert!(db.find(&Symbol::new("foo", "js")).is_empty());
    }
}
