//! Error taxonomy and cooperative cancellation.
//!
//! Errors are classified by who must act on them: the user fixing their
//! configuration, the extension author, or the host itself. Fatal classes
//! cancel the run through a shared [`CancelToken`]; recoverable classes are
//! logged and substituted with safe defaults at the call site.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Unified error type for the generator host.
#[derive(Error, Debug)]
pub enum HostError {
    /// A problem with directives, glob patterns, or property values that the
    /// user must fix in their setup.
    #[error("misconfiguration: {message}")]
    Misconfiguration { message: String },

    /// A problem producing targets, such as a name collision or a duplicate
    /// rule kind.
    #[error("generation error: {message}")]
    Generation { message: String },

    /// A declared import could not be resolved (or resolved ambiguously).
    #[error("import resolution: {message}")]
    Import { message: String },

    /// An extension hook failed or returned the wrong shape.
    #[error("extension {id}: {message}")]
    Extension { id: String, message: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {message}")]
    Internal { message: String },
}

impl HostError {
    pub fn misconfigured(message: impl Into<String>) -> Self {
        Self::Misconfiguration {
            message: message.into(),
        }
    }

    pub fn generation(message: impl Into<String>) -> Self {
        Self::Generation {
            message: message.into(),
        }
    }

    pub fn import(message: impl Into<String>) -> Self {
        Self::Import {
            message: message.into(),
        }
    }

    pub fn extension(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Extension {
            id: id.into(),
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, HostError>;

struct CancelState {
    cancelled: AtomicBool,
    cause: Mutex<Option<HostError>>,
}

/// A cancel-with-cause handle shared by every worker in a run.
///
/// The first cancellation wins; later causes are dropped. Workers observe
/// cancellation at pool boundaries and return promptly.
#[derive(Clone)]
pub struct CancelToken(Arc<CancelState>);

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        Self(Arc::new(CancelState {
            cancelled: AtomicBool::new(false),
            cause: Mutex::new(None),
        }))
    }

    pub fn cancel(&self, cause: HostError) {
        let mut slot = self.0.cause.lock().unwrap_or_else(|e| e.into_inner());
        if slot.is_none() {
            *slot = Some(cause);
        }
        self.0.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.cancelled.load(Ordering::Acquire)
    }

    /// The formatted cause, if the run was cancelled.
    pub fn cause(&self) -> Option<String> {
        self.0
            .cause
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|e| e.to_string())
    }

    /// Take ownership of the cause for final error reporting.
    pub fn take_cause(&self) -> Option<HostError> {
        self.0
            .cause
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
    }
}

/// Cancel the run with `err`. When no token is installed, log to stderr
/// and terminate the process.
pub fn cancel_or_exit(token: Option<&CancelToken>, err: HostError) {
    match token {
        Some(t) => t.cancel(err),
        None => {
            eprintln!("{err}");
            std::process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_cancel_cause_wins() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());

        token.cancel(HostError::generation("first"));
        token.cancel(HostError::generation("second"));

        assert!(token.is_cancelled());
        assert_eq!(token.cause().unwrap(), "generation error: first");
    }

    #[test]
    fn clones_share_state() {
        let token = CancelToken::new();
        let other = token.clone();
        other.cancel(HostError::misconfigured("bad directive"));
        assert!(token.is_cancelled());
    }
}
