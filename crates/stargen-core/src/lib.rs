//! Core data model for the stargen BUILD-file generator.
//!
//! Provides the label type ([`label::Label`]), the shape-classified glob
//! matcher ([`glob`]), rule kind and property metadata ([`rules`]), target
//! declarations with symbol-level import/export metadata ([`target`]), and
//! the error taxonomy plus cooperative cancellation ([`error`]).

pub mod error;
pub mod filter;
pub mod glob;
pub mod label;
pub mod rules;
pub mod target;

pub use error::{CancelToken, HostError};
pub use label::Label;
