use std::{cell::RefCell, sync::Arc};

use indexmap::{IndexMap, IndexSet};

use crate::{
    errors::ResolveError,
    types::{Injectable, Instance, Key},
};

/// Callback resolving a key on behalf of a [ResolveContext]
pub type ResolveFn<'a> = dyn Fn(&Key) -> Result<Instance, ResolveError> + 'a;

/// Dependency graph discovered while factories run
///
/// Every entry holds the keys a factory accessed during its last successful resolution.
#[derive(Debug, Default, Clone)]
pub struct DependencyTracker {
    graph: IndexMap<Key, Vec<Key>>,
}

impl DependencyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the capability handed to the factory of `key`
    ///
    /// Every access is appended to `accessed` and resolved through `resolve`.
    pub fn track<'a>(
        key: &'a Key,
        accessed: &'a RefCell<Vec<Key>>,
        resolve: &'a ResolveFn<'a>,
    ) -> ResolveContext<'a> {
        ResolveContext {
            key,
            accessed,
            resolve,
        }
    }

    /// Replaces the dependencies of `key`, keeping the first occurrence of repeated accesses
    pub fn record_deps(&mut self, key: Key, accessed: Vec<Key>) {
        let deps: IndexSet<Key> = accessed.into_iter().collect();
        tracing::trace!("'{key}' depends on {deps:?}");
        self.graph.insert(key, deps.into_iter().collect());
    }

    pub fn dependencies_of(&self, key: &str) -> Option<&[Key]> {
        self.graph.get(key).map(Vec::as_slice)
    }

    pub fn clear(&mut self, keys: &[Key]) {
        for key in keys {
            self.graph.shift_remove(key);
        }
    }

    pub fn clear_all(&mut self) {
        self.graph.clear();
    }

    pub fn graph(&self) -> &IndexMap<Key, Vec<Key>> {
        &self.graph
    }

    /// All keys reachable from `roots`, roots included, in discovery order
    pub fn closure<'k>(&self, roots: impl IntoIterator<Item = &'k Key>) -> IndexSet<Key> {
        let mut closure = IndexSet::new();
        let mut pending: Vec<Key> = roots.into_iter().cloned().collect();
        pending.reverse();

        while let Some(key) = pending.pop() {
            if !closure.insert(key.clone()) {
                continue;
            }
            if let Some(deps) = self.graph.get(&key) {
                pending.extend(deps.iter().rev().cloned());
            }
        }

        closure
    }

    /// All keys that reach any of `roots` through recorded dependencies, roots included
    pub fn dependents<'k>(&self, roots: impl IntoIterator<Item = &'k Key>) -> IndexSet<Key> {
        let mut reached: IndexSet<Key> = roots.into_iter().cloned().collect();
        loop {
            let before = reached.len();
            for (key, deps) in &self.graph {
                if !reached.contains(key) && deps.iter().any(|dep| reached.contains(dep)) {
                    reached.insert(key.clone());
                }
            }
            if reached.len() == before {
                return reached;
            }
        }
    }
}

/// Handle given to factories to access other keys
///
/// Accessed keys become dependencies of the key being produced.
pub struct ResolveContext<'a> {
    key: &'a Key,
    accessed: &'a RefCell<Vec<Key>>,
    resolve: &'a ResolveFn<'a>,
}

impl ResolveContext<'_> {
    /// The key currently being produced
    pub fn key(&self) -> &Key {
        self.key
    }

    /// Resolves another key, recording it as a dependency
    pub fn get(&self, key: impl Into<Key>) -> Result<Instance, ResolveError> {
        let key = key.into();
        self.accessed.borrow_mut().push(key.clone());
        (self.resolve)(&key)
    }

    /// Resolves another key and downcasts it to `T`
    pub fn require<T: Injectable>(&self, key: impl Into<Key>) -> Result<Arc<T>, ResolveError> {
        let key = key.into();
        let instance = self.get(&key)?;
        instance
            .downcast()
            .map_err(|actual_type| ResolveError::TypeMismatch {
                key,
                required_type: std::any::type_name::<T>(),
                actual_type,
            })
    }
}
