//! The stargen extension host.
//!
//! Hosts user-supplied extensions and drives them per directory: classify
//! source files by which extensions claim them, run each file's content
//! queries through the incremental cache, invoke the prepare/analyze/declare
//! hooks, collect declared targets, and resolve their imports through the
//! cross-extension symbol database.

pub mod config;
pub mod database;
pub mod defs;
pub mod extension;
pub mod generate;
pub mod registry;
pub mod resolver;

use database::SymbolDatabase;
use registry::ExtensionRegistry;
use stargen_core::error::{cancel_or_exit, CancelToken, HostError, Result};

/// The language name this host registers under; cross-resolution requests
/// from the same name are skipped.
pub const HOST_LANGUAGE_NAME: &str = "stargen";

/// The extension host for one run.
pub struct Host {
    registry: ExtensionRegistry,
    database: SymbolDatabase,
    cancel: Option<CancelToken>,
    /// In strict mode an unresolved non-optional import cancels the run
    /// instead of only being reported.
    strict_imports: bool,
}

impl Host {
    pub fn new(registry: ExtensionRegistry) -> Self {
        Self {
            registry,
            database: SymbolDatabase::new(),
            cancel: None,
            strict_imports: false,
        }
    }

    /// Install the run's cancel token. Without one, fatal errors log to
    /// stderr and terminate the process.
    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn with_strict_imports(mut self, strict: bool) -> Self {
        self.strict_imports = strict;
        self
    }

    pub fn registry(&self) -> &ExtensionRegistry {
        &self.registry
    }

    pub fn database(&self) -> &SymbolDatabase {
        &self.database
    }

    pub(crate) fn cancel_with(&self, err: HostError) {
        cancel_or_exit(self.cancel.as_ref(), err);
    }

    pub(crate) fn check_cancelled(&self) -> Result<()> {
        match &self.cancel {
            Some(token) if token.is_cancelled() => {
                Err(HostError::internal("run cancelled"))
            }
            _ => Ok(()),
        }
    }
}
