use std::{cell::RefCell, collections::HashSet, hash::Hash};

/// Set of entries currently being resolved
#[derive(Debug)]
pub struct CycleDetector<K> {
    resolving: HashSet<K>,
}
impl<K> Default for CycleDetector<K> {
    fn default() -> Self {
        Self {
            resolving: HashSet::new(),
        }
    }
}

impl<K: Hash + Eq> CycleDetector<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `key` as resolving
    ///
    /// Returns false if it already was
    pub fn enter(&mut self, key: K) -> bool {
        self.resolving.insert(key)
    }

    pub fn leave(&mut self, key: &K) {
        self.resolving.remove(key);
    }

    pub fn is_resolving(&self, key: &K) -> bool {
        self.resolving.contains(key)
    }

    pub fn is_empty(&self) -> bool {
        self.resolving.is_empty()
    }
}

/// Leaves the detector when dropped, on success, error return or unwind
pub struct ResolvingGuard<'a, K: Hash + Eq> {
    detector: &'a RefCell<CycleDetector<K>>,
    key: Option<K>,
}

impl<'a, K: Hash + Eq + Clone> ResolvingGuard<'a, K> {
    /// Enters `key`, or returns None if it is already resolving
    pub fn enter(detector: &'a RefCell<CycleDetector<K>>, key: K) -> Option<Self> {
        if !detector.borrow_mut().enter(key.clone()) {
            return None;
        }

        Some(Self {
            detector,
            key: Some(key),
        })
    }
}

impl<K: Hash + Eq> Drop for ResolvingGuard<'_, K> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.detector.borrow_mut().leave(&key);
        }
    }
}
