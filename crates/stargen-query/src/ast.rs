//! One-shot tree-sitter parsing and tree-query execution.

use crate::defs::QueryMatch;
use crate::grammars;
use stargen_core::error::{HostError, Result};
use std::collections::BTreeMap;
use streaming_iterator::StreamingIterator;

const ERRORS_QUERY: &str = "(ERROR) @error";

/// A parsed syntax tree for one file. Trees are large; they are dropped as
/// soon as their queries have run.
pub struct Ast<'a> {
    grammar: String,
    path: String,
    source: &'a [u8],
    tree: tree_sitter::Tree,
}

/// Parse a source file with the named grammar.
///
/// A syntactically broken file still yields a (partial) tree; only parser
/// setup failures are errors.
pub fn parse_source<'a>(grammar: &str, path: &str, source: &'a [u8]) -> Result<Ast<'a>> {
    let lang = grammars::grammar_for(grammar)
        .ok_or_else(|| HostError::misconfigured(format!("unknown grammar {grammar:?}")))?;

    let mut parser = tree_sitter::Parser::new();
    parser
        .set_language(&lang)
        .map_err(|e| HostError::internal(format!("grammar {grammar:?} rejected: {e}")))?;

    let tree = parser
        .parse(source, None)
        .ok_or_else(|| HostError::internal(format!("failed to parse {path}")))?;

    Ok(Ast {
        grammar: grammar.to_string(),
        path: path.to_string(),
        source,
        tree,
    })
}

impl Ast<'_> {
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Run a compiled tree query, returning matches in source-scan order.
    pub fn query(&self, query: &tree_sitter::Query) -> Vec<QueryMatch> {
        let capture_names = query.capture_names();
        let mut results = Vec::new();

        let mut cursor = tree_sitter::QueryCursor::new();
        let mut matches = cursor.matches(query, self.tree.root_node(), self.source);
        while let Some(m) = matches.next() {
            let mut captures = BTreeMap::new();
            for cap in m.captures {
                let name = capture_names[cap.index as usize];
                let text = String::from_utf8_lossy(&self.source[cap.node.byte_range()]);
                captures.insert(name.to_string(), text.into_owned());
            }
            results.push(QueryMatch {
                captures,
                result: None,
            });
        }

        results
    }

    /// Human pointers (`line: text` plus a caret) for every parse error in
    /// the tree. Used only at trace level; the partial tree is still queried.
    pub fn errors(&self) -> Vec<String> {
        if !self.tree.root_node().has_error() {
            return Vec::new();
        }

        let Ok(query) = grammars::get_query(&self.grammar, ERRORS_QUERY) else {
            return Vec::new();
        };

        let text = String::from_utf8_lossy(self.source);
        let lines: Vec<&str> = text.split('\n').collect();
        let mut errors = Vec::new();

        let mut cursor = tree_sitter::QueryCursor::new();
        let mut matches = cursor.matches(&query, self.tree.root_node(), self.source);
        while let Some(m) = matches.next() {
            for cap in m.captures {
                let start = cap.node.start_position();
                let line = lines.get(start.row).copied().unwrap_or("");
                let prefix = format!("     {}: ", start.row + 1);
                let caret = " ".repeat(prefix.len() + start.column) + "^";
                errors.push(format!("{prefix}{line}\n{caret}"));
            }
        }

        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_captures_in_source_order() {
        let source = b"import \"./b\";\nimport \"./c\";\n";
        let ast = parse_source("javascript", "a.js", source).unwrap();
        let query = grammars::get_query(
            "javascript",
            "(import_statement source: (string (string_fragment) @src))",
        )
        .unwrap();

        let matches = ast.query(&query);
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].capture("src"), Some("./b"));
        assert_eq!(matches[1].capture("src"), Some("./c"));
    }

    #[test]
    fn broken_source_still_yields_partial_tree() {
        let source = b"def ok():\n    pass\n\ndef broken(:\n";
        let ast = parse_source("python", "a.py", source).unwrap();

        let query = grammars::get_query(
            "python",
            "(function_definition name: (identifier) @name)",
        )
        .unwrap();
        let matches = ast.query(&query);
        assert!(matches.iter().any(|m| m.capture("name") == Some("ok")));

        let errors = ast.errors();
        assert!(!errors.is_empty());
        assert!(errors[0].contains('^'));
    }
}
