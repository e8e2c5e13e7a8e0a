//! Errores semánticos del core de flujo.
//!
//! Todas las variantes transportan sólo datos serializables para poder
//! viajar dentro de un `AwaitableResult` y compararse en tests.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub enum FlowError {
    #[error("cannot build an empty flow")] EmptyFlow,
    #[error("step '{0}' is terminal and cannot be piped further")] TerminalStep(String),
    #[error("batch timeout cannot be zero or negative")] InvalidTimeout,
    #[error("table '{0}' cannot be resolved by name without a context")] MissingContext(String),
    #[error("table '{0}' is not registered in the context")] UnknownTable(String),
    #[error("missing key: {0}")] MissingKey(String),
    #[error("invalid state: {0}")] InvalidState(String),
    #[error("expected a JSON object: {0}")] NotAnObject(String),
    #[error("invalid table path '{0}': expected 'container/path'")] InvalidPath(String),
    #[error("concurrent execution worker has already terminated")] WorkerTerminated,
    #[error("backend error: {0}")] Backend(String),
    #[error("user function failed: {0}")] User(String),
    #[error("timed out waiting for a result")] Timeout,
    #[error("flow has terminated")] Terminated,
    #[error("internal: {0}")] Internal(String),
}

/// Alias de conveniencia usado en todo el crate.
pub type FlowResult<T> = Result<T, FlowError>;
