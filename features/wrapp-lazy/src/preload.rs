use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use futures::{stream::FuturesUnordered, StreamExt};
use indexmap::{IndexMap, IndexSet};

use crate::{
    errors::{LifecycleError, ResolveError},
    resolver::{Resolver, ResolverState},
    tracker::DependencyTracker,
    types::Key,
};

impl Resolver {
    /// Resolves `keys` (all local keys if empty), then initializes them layer by layer
    ///
    /// A layer only starts once every init of the previous layer has settled.
    /// Inits within a layer run concurrently. Keys served by a parent are
    /// initialized through the parent, once.
    pub async fn preload<K: Into<Key>>(
        &self,
        keys: impl IntoIterator<Item = K>,
    ) -> Result<(), LifecycleError> {
        let mut requested: Vec<Key> = keys.into_iter().map(Into::into).collect();
        if requested.is_empty() {
            requested = self.registered_keys();
        }
        tracing::debug!("Preloading {} keys", requested.len());

        self.resolve_deferred(&requested)?;

        let graph = self.chain_graph();
        let layers = topological_layers(&graph.closure(&requested), &graph)?;

        let mut failures = Vec::new();
        for (level, layer) in layers.iter().enumerate() {
            failures.extend(self.init_layer(level, layer).await);
        }

        if failures.is_empty() {
            tracing::debug!("Preload complete - {} layers", layers.len());
        }
        LifecycleError::collect(failures)
    }

    pub async fn preload_all(&self) -> Result<(), LifecycleError> {
        self.preload(Vec::<Key>::new()).await
    }

    /// Resolves every key without starting init hooks anywhere in the scope chain
    ///
    /// On failure, everything cached by this call is evicted again, parents included.
    fn resolve_deferred(&self, requested: &[Key]) -> Result<(), ResolveError> {
        let lineage = self.lineage();
        let snapshots: Vec<(HashSet<Key>, bool)> = lineage
            .iter()
            .map(|resolver| {
                let mut state = resolver.0.state.lock();
                let cached = state.cache.keys().cloned().collect();
                (cached, std::mem::replace(&mut state.deferred_init, true))
            })
            .collect();

        let result = requested
            .iter()
            .try_for_each(|key| self.resolve(key).map(drop));

        for (resolver, (cached_before, was_deferred)) in lineage.iter().zip(snapshots) {
            let mut state = resolver.0.state.lock();
            state.deferred_init = was_deferred;

            if let Err(error) = &result {
                let created = evict_created(&mut state, &cached_before);
                if !created.is_empty() {
                    tracing::warn!("Preload failed, evicting {created:?}: {error}");
                }
            }
        }

        result
    }

    /// Dependencies recorded across the scope chain, closer resolvers winning
    fn chain_graph(&self) -> DependencyTracker {
        let mut graph = DependencyTracker::new();
        for resolver in self.lineage().iter().rev() {
            let state = resolver.0.state.lock();
            for (key, deps) in state.tracker.graph() {
                graph.record_deps(key.clone(), deps.clone());
            }
        }
        graph
    }

    /// Runs the pending init hooks of one layer and waits for all of them
    async fn init_layer(&self, level: usize, layer: &[Key]) -> Vec<LifecycleError> {
        let mut inits = FuturesUnordered::new();

        for key in layer {
            let Some(owner) = self.owner_of(key) else {
                continue;
            };
            let Some(hook) = owner.0.registry.get(key).and_then(|p| p.init_hook()) else {
                continue;
            };

            let instance = {
                let mut state = owner.0.state.lock();
                let Some(instance) = state.cache.get(key).cloned() else {
                    continue;
                };
                if state.start_init(key).is_none() {
                    continue;
                }
                instance
            };

            let init = hook(instance);
            let key = key.clone();
            inits.push(async move { (key, init.await) });
        }

        tracing::debug!("Initializing layer {level} - {} hooks", inits.len());

        let mut failures = Vec::new();
        while let Some((key, result)) = inits.next().await {
            match result {
                Ok(()) => tracing::debug!("Initialized '{key}'"),
                Err(error) => {
                    tracing::warn!("Init of '{key}' failed: {error}");
                    failures.push(LifecycleError::InitFailed {
                        chain: vec![key.clone()],
                        key,
                        error: Arc::new(error),
                    });
                }
            }
        }
        failures
    }
}

/// Drops cache, graph and warning entries of keys not cached before, returning them
fn evict_created(state: &mut ResolverState, cached_before: &HashSet<Key>) -> Vec<Key> {
    let created: Vec<Key> = state
        .cache
        .keys()
        .filter(|key| !cached_before.contains(*key))
        .cloned()
        .collect();

    for key in &created {
        state.cache.shift_remove(key);
    }
    state.tracker.clear(&created);
    state
        .warnings
        .retain(|warning| !created.contains(&warning.subject));
    created
}

/// Splits `closure` into layers whose members only depend on earlier layers
///
/// Dependencies outside of `closure` are ignored.
pub fn topological_layers(
    closure: &IndexSet<Key>,
    tracker: &DependencyTracker,
) -> Result<Vec<Vec<Key>>, LifecycleError> {
    let mut in_degree: IndexMap<&Key, usize> = IndexMap::new();
    let mut dependents: HashMap<&Key, Vec<&Key>> = HashMap::new();

    for key in closure {
        let deps: IndexSet<&Key> = tracker
            .dependencies_of(key)
            .unwrap_or_default()
            .iter()
            .filter(|dependency| closure.contains(*dependency))
            .collect();

        in_degree.insert(key, deps.len());
        for dependency in deps {
            dependents.entry(dependency).or_default().push(key);
        }
    }

    let mut layer: Vec<&Key> = in_degree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(key, _)| *key)
        .collect();
    let mut layers = Vec::new();
    let mut placed = 0;

    while !layer.is_empty() {
        let mut next = Vec::new();
        for key in &layer {
            for dependent in dependents.get(key).into_iter().flatten() {
                if let Some(degree) = in_degree.get_mut(dependent) {
                    *degree -= 1;
                    if *degree == 0 {
                        next.push(*dependent);
                    }
                }
            }
        }
        next.sort_by_key(|key| closure.get_index_of(*key));

        placed += layer.len();
        layers.push(layer.into_iter().cloned().collect());
        layer = next;
    }

    if placed != closure.len() {
        let unplaced: Vec<Key> = in_degree
            .into_iter()
            .filter(|(_, degree)| *degree > 0)
            .map(|(key, _)| key.clone())
            .collect();
        return Err(LifecycleError::IncompleteTopologicalSort { unplaced });
    }

    Ok(layers)
}
