//! Grammar registry: map grammar names and file extensions to tree-sitter
//! languages, and intern compiled tree queries.

use dashmap::DashMap;
use stargen_core::error::{HostError, Result};
use std::sync::{Arc, OnceLock};

/// Resolve a grammar name to its tree-sitter language.
pub fn grammar_for(name: &str) -> Option<tree_sitter::Language> {
    match name {
        "python" => Some(tree_sitter_python::LANGUAGE.into()),
        "rust" => Some(tree_sitter_rust::LANGUAGE.into()),
        "javascript" => Some(tree_sitter_javascript::LANGUAGE.into()),
        "typescript" => Some(tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into()),
        "tsx" => Some(tree_sitter_typescript::LANGUAGE_TSX.into()),
        "go" => Some(tree_sitter_go::LANGUAGE.into()),
        "json" => Some(tree_sitter_json::LANGUAGE.into()),
        _ => None,
    }
}

/// Derive the default grammar name from a file extension.
///
/// Mirrors linguist-style extension mapping; plain JavaScript files parse
/// with the javascript grammar, `.tsx`/`.jsx` with the tsx grammar.
pub fn path_grammar(path: &str) -> Option<&'static str> {
    let ext = path.rsplit('.').next()?;
    match ext {
        "py" | "pyi" => Some("python"),
        "rs" => Some("rust"),
        "js" | "mjs" | "cjs" => Some("javascript"),
        "ts" | "mts" | "cts" => Some("typescript"),
        "tsx" | "jsx" => Some("tsx"),
        "go" => Some("go"),
        "json" => Some("json"),
        _ => None,
    }
}

/// Compiled tree queries, interned per `(grammar, query)` for the lifetime
/// of the run.
fn query_cache() -> &'static DashMap<(String, String), Arc<tree_sitter::Query>> {
    static CACHE: OnceLock<DashMap<(String, String), Arc<tree_sitter::Query>>> = OnceLock::new();
    CACHE.get_or_init(DashMap::new)
}

/// Compile (or fetch the interned) tree query for a grammar.
pub fn get_query(grammar: &str, query_str: &str) -> Result<Arc<tree_sitter::Query>> {
    let key = (grammar.to_string(), query_str.to_string());
    if let Some(q) = query_cache().get(&key) {
        return Ok(q.clone());
    }

    let lang = grammar_for(grammar)
        .ok_or_else(|| HostError::misconfigured(format!("unknown grammar {grammar:?}")))?;
    let compiled = tree_sitter::Query::new(&lang, query_str).map_err(|e| {
        HostError::misconfigured(format!("invalid tree query for grammar {grammar:?}: {e}"))
    })?;

    Ok(query_cache().entry(key).or_insert(Arc::new(compiled)).clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_grammars_resolve() {
        for name in ["python", "rust", "javascript", "typescript", "tsx", "go", "json"] {
            assert!(grammar_for(name).is_some(), "missing grammar {name}");
        }
        assert!(grammar_for("cobol").is_none());
    }

    #[test]
    fn extension_mapping() {
        assert_eq!(path_grammar("src/app.tsx"), Some("tsx"));
        assert_eq!(path_grammar("src/app.cjs"), Some("javascript"));
        assert_eq!(path_grammar("pkg/mod.rs"), Some("rust"));
        assert_eq!(path_grammar("Makefile"), None);
    }

    #[test]
    fn queries_are_interned() {
        let a = get_query("python", "(import_statement) @import").unwrap();
        let b = get_query("python", "(import_statement) @import").unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        assert!(get_query("python", "(((").is_err());
        assert!(get_query("nope", "(import_statement)").is_err());
    }
}
