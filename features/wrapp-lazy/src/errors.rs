use std::sync::Arc;

use thiserror::Error;

use crate::types::{DynError, Key};

/// Errors while resolving a key
#[derive(Error, Debug, Clone)]
pub enum ResolveError {
    /// No provider for the key anywhere in the scope chain
    #[error("'{key}' is not registered (resolving {chain:?}){}", hint(.suggestion))]
    NotFound {
        key: Key,
        chain: Vec<Key>,
        /// Every key registered across the scope chain
        registered: Vec<Key>,
        suggestion: Option<String>,
    },
    /// The key is already being resolved further up the chain
    #[error("Circular dependency on '{key}' through {chain:?}")]
    Circular { key: Key, chain: Vec<Key> },
    /// The factory produced no value
    #[error("Factory for '{key}' returned no value (resolving {chain:?})")]
    UndefinedReturn { key: Key, chain: Vec<Key> },
    /// The factory itself failed
    #[error("Factory for '{key}' failed (resolving {chain:?}) - error: {error}")]
    FactoryFailure {
        key: Key,
        chain: Vec<Key>,
        error: Arc<DynError>,
    },
    #[error("Failed to downcast '{key}', required: '{required_type}' actual: '{actual_type}'")]
    TypeMismatch {
        key: Key,
        required_type: &'static str,
        actual_type: &'static str,
    },
}

fn hint(suggestion: &Option<String>) -> String {
    match suggestion {
        Some(suggestion) => format!(" - did you mean '{suggestion}'?"),
        None => String::new(),
    }
}

impl ResolveError {
    /// The key the failure is about
    pub fn key(&self) -> &Key {
        match self {
            ResolveError::NotFound { key, .. }
            | ResolveError::Circular { key, .. }
            | ResolveError::UndefinedReturn { key, .. }
            | ResolveError::FactoryFailure { key, .. }
            | ResolveError::TypeMismatch { key, .. } => key,
        }
    }

    /// Resolution chain leading to the failure
    pub fn chain(&self) -> &[Key] {
        match self {
            ResolveError::NotFound { chain, .. }
            | ResolveError::Circular { chain, .. }
            | ResolveError::UndefinedReturn { chain, .. }
            | ResolveError::FactoryFailure { chain, .. } => chain,
            ResolveError::TypeMismatch { key, .. } => std::slice::from_ref(key),
        }
    }
}

/// Errors of the async lifecycle phases, preload and dispose
#[derive(Error, Debug, Clone)]
pub enum LifecycleError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    /// Preload could not place every member of the closure into a layer
    #[error("Could not order {unplaced:?} for initialization - the dependency graph is inconsistent")]
    IncompleteTopologicalSort { unplaced: Vec<Key> },
    /// An init hook failed during preload
    #[error("Init of '{key}' failed - error: {error}")]
    InitFailed {
        key: Key,
        chain: Vec<Key>,
        error: Arc<DynError>,
    },
    /// A teardown hook failed during dispose
    #[error("Teardown of '{key}' failed - error: {error}")]
    TeardownFailed {
        key: Key,
        chain: Vec<Key>,
        error: Arc<DynError>,
    },
    #[error(transparent)]
    Aggregate(#[from] AggregateError),
}

impl LifecycleError {
    /// Collapses collected failures: none is Ok, one is itself, more are aggregated
    pub(crate) fn collect(mut errors: Vec<LifecycleError>) -> Result<(), LifecycleError> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(AggregateError { errors }.into()),
        }
    }
}

/// Two or more failures that settled together
#[derive(Error, Debug, Clone)]
pub struct AggregateError {
    pub errors: Vec<LifecycleError>,
}
impl std::fmt::Display for AggregateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut display = Vec::new();
        display.push(format!("{} lifecycle hooks failed:", self.errors.len()));
        for error in &self.errors {
            display.push(format!("- {}", error));
        }
        f.write_str(&display.join("\n"))
    }
}

/// Errors when registering providers
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("A key has been registered twice: '{0}'")]
    Duplicate(Key),
    #[error("'{0:?}' can not be used as a key")]
    ReservedKey(Key),
}
