//! Error types for reducers, agendas and the engine

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

/// Error returned by a reducer that cannot apply a step.
///
/// Returning this from a non-init step makes the engine roll back every
/// action of the agenda being folded.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct ReduceError {
    message: String,
    #[source]
    source: Option<Arc<dyn StdError + Send + Sync>>,
}

impl ReduceError {
    /// Create an error with a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Create an error wrapping an underlying cause.
    pub fn with_source<E>(message: impl Into<String>, source: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self {
            message: message.into(),
            source: Some(Arc::new(source)),
        }
    }

    /// The error message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Why an agenda terminated abnormally.
///
/// Cloneable because shared agendas replay their terminal notification to
/// late subscribers.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AgendaError {
    /// A reducer failed while folding one of the agenda's actions.
    #[error("reducer failed: {0}")]
    Reducer(#[from] ReduceError),

    /// The agenda's source failed (a rejected deferred value or a stream error).
    #[error("agenda source failed: {0}")]
    Source(String),

    /// The agenda needs an async runtime but none was reachable when it connected.
    #[error("no tokio runtime available to drive an async agenda")]
    NoRuntime,
}

impl AgendaError {
    /// Create a source error from anything displayable.
    pub fn failed(err: impl fmt::Display) -> Self {
        AgendaError::Source(err.to_string())
    }
}

/// Errors surfaced synchronously to callers of the engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The reducer failed while computing its genesis state; no store was created.
    #[error("reducer `{reducer}` failed to initialize: {source}")]
    Registration {
        reducer: String,
        #[source]
        source: ReduceError,
    },

    /// An async agenda was submitted with no tokio runtime configured or ambient.
    #[error("no tokio runtime available to drive an async agenda")]
    NoRuntime,

    /// Invalid engine configuration.
    #[error("invalid engine configuration: {0}")]
    Config(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_reduce_error_display_and_source() {
        let err = ReduceError::new("boom");
        assert_eq!(err.to_string(), "boom");
        assert!(err.source().is_none());

        let err = ReduceError::with_source("parse", io::Error::other("bad"));
        assert_eq!(err.message(), "parse");
        assert_eq!(err.source().map(|s| s.to_string()), Some("bad".to_string()));
    }

    #[test]
    fn test_agenda_error_from_reduce_error() {
        let err: AgendaError = ReduceError::new("boom").into();
        assert!(matches!(err, AgendaError::Reducer(_)));
        assert_eq!(err.to_string(), "reducer failed: boom");

        let err = AgendaError::failed("timeout");
        assert_eq!(err.to_string(), "agenda source failed: timeout");
    }

    #[test]
    fn test_registration_error_names_reducer() {
        let err = EngineError::Registration {
            reducer: "counter".to_string(),
            source: ReduceError::new("bad init"),
        };
        assert_eq!(
            err.to_string(),
            "reducer `counter` failed to initialize: bad init"
        );
    }
}
