//! Per-file content queries for the stargen host.
//!
//! A directory's extensions declare named queries (AST, regex, JSON, YAML,
//! raw); the engine reads each claimed file once and serves every query from
//! that single read. Compiled regexes, tree queries, and path programs are
//! interned for the lifetime of the run.

pub mod ast;
pub mod defs;
pub mod engine;
pub mod grammars;
pub mod jq;

pub use defs::{
    op_key, NamedQueries, QueryDefinition, QueryMatch, QueryParams, QueryResult, QueryResults,
    QueryType,
};
pub use engine::run_queries;
