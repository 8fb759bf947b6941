use std::{
    cell::RefCell,
    collections::HashMap,
    fmt::Debug,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use futures::task::Spawn;
use indexmap::IndexMap;
use parking_lot::Mutex;

use crate::{
    builder::ResolverBuilder,
    cycle::{CycleDetector, ResolvingGuard},
    errors::{RegistryError, ResolveError},
    initiator::ThreadSpawner,
    provider::{Provider, Registry},
    tracker::DependencyTracker,
    types::{DynError, Injectable, Instance, Key, Warning, WarningKind},
};

/// Produces a "did you mean" hint from the missing key and every registered key
pub type Suggester = Arc<dyn Fn(&Key, &[Key]) -> Option<String> + Send + Sync>;

static NEXT_RESOLVER_ID: AtomicU64 = AtomicU64::new(0);

/// Lazily resolves registered providers into cached instances
///
/// Cloning is cheap and shares the same cache.
#[derive(Clone)]
pub struct Resolver(pub(crate) Arc<ResolverInner>);

pub(crate) struct ResolverInner {
    id: u64,
    pub(crate) registry: Registry,
    pub(crate) parent: Option<Resolver>,
    pub(crate) state: Mutex<ResolverState>,
    pub(crate) spawner: Arc<dyn Spawn + Send + Sync>,
    pub(crate) suggester: Option<Suggester>,
}

/// Everything a resolver mutates, owned by exactly one resolver
#[derive(Default)]
pub(crate) struct ResolverState {
    /// Singleton instances, in the order their resolution completed
    pub(crate) cache: IndexMap<Key, Instance>,
    /// Keys whose init hook has been started, with the launch that started it
    pub(crate) initialized: HashMap<Key, u64>,
    pub(crate) tracker: DependencyTracker,
    pub(crate) warnings: Vec<Warning>,
    pub(crate) deferred_init: bool,
    /// Last launch id handed out, never reset
    pub(crate) launches: u64,
}

impl ResolverState {
    /// Marks `key` as initialized and returns the new launch id, None if it already was
    pub(crate) fn start_init(&mut self, key: &Key) -> Option<u64> {
        if self.initialized.contains_key(key) {
            return None;
        }
        self.launches += 1;
        self.initialized.insert(key.clone(), self.launches);
        Some(self.launches)
    }
}

impl Debug for Resolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.0.state.lock();
        let mut map = f.debug_struct("Resolver");
        for key in self.0.registry.keys() {
            let val = if state.cache.contains_key(key) {
                "resolved"
            } else {
                "pending"
            };
            map.field(key.as_str(), &val);
        }
        if let Some(parent) = &self.0.parent {
            map.field("parent", &parent.0.id);
        }
        map.finish()
    }
}

/// Chain and resolving set of one top-level resolve call
#[derive(Default)]
pub(crate) struct ResolutionPass {
    chain: RefCell<Vec<Key>>,
    resolving: RefCell<CycleDetector<(u64, Key)>>,
}

impl ResolutionPass {
    fn chain(&self) -> Vec<Key> {
        self.chain.borrow().clone()
    }

    fn chain_to(&self, key: &Key) -> Vec<Key> {
        let mut chain = self.chain();
        chain.push(key.clone());
        chain
    }
}

/// Keeps `key` on the chain until dropped
struct ChainFrame<'a> {
    chain: &'a RefCell<Vec<Key>>,
}
impl<'a> ChainFrame<'a> {
    fn push(chain: &'a RefCell<Vec<Key>>, key: Key) -> Self {
        chain.borrow_mut().push(key);
        Self { chain }
    }
}
impl Drop for ChainFrame<'_> {
    fn drop(&mut self) {
        self.chain.borrow_mut().pop();
    }
}

impl Resolver {
    pub fn builder() -> ResolverBuilder {
        ResolverBuilder::new()
    }

    /// Resolver over `registry` with default settings
    pub fn new(registry: Registry) -> Self {
        Self::from_parts(
            registry,
            None,
            ResolverState::default(),
            Arc::new(ThreadSpawner),
            None,
        )
    }

    pub(crate) fn from_parts(
        registry: Registry,
        parent: Option<Resolver>,
        state: ResolverState,
        spawner: Arc<dyn Spawn + Send + Sync>,
        suggester: Option<Suggester>,
    ) -> Self {
        Resolver(Arc::new(ResolverInner {
            id: NEXT_RESOLVER_ID.fetch_add(1, Ordering::Relaxed),
            registry,
            parent,
            state: Mutex::new(state),
            spawner,
            suggester,
        }))
    }

    /// Resolves `key`, producing and caching it if needed
    pub fn resolve(&self, key: impl Into<Key>) -> Result<Instance, ResolveError> {
        let key = key.into();
        let pass = ResolutionPass::default();
        self.resolve_in(&key, &pass)
    }

    /// Resolves `key` and downcasts it to `T`
    pub fn get<T: Injectable>(&self, key: impl Into<Key>) -> Result<Arc<T>, ResolveError> {
        let key = key.into();
        let instance = self.resolve(&key)?;
        instance
            .downcast()
            .map_err(|actual_type| ResolveError::TypeMismatch {
                key,
                required_type: std::any::type_name::<T>(),
                actual_type,
            })
    }

    pub(crate) fn resolve_in(
        &self,
        key: &Key,
        pass: &ResolutionPass,
    ) -> Result<Instance, ResolveError> {
        let Some(provider) = self.0.registry.get(key) else {
            return match self.0.parent.as_ref().filter(|parent| parent.has(key)) {
                Some(parent) => {
                    tracing::trace!("'{key}' is not registered locally - asking parent");
                    parent.resolve_in(key, pass)
                }
                None => Err(self.not_found(key, pass)),
            };
        };

        if !provider.is_transient() {
            if let Some(instance) = self.0.state.lock().cache.get(key) {
                tracing::trace!("'{key}' served from cache");
                return Ok(instance.clone());
            }
        }

        let Some(_resolving) = ResolvingGuard::enter(&pass.resolving, (self.0.id, key.clone()))
        else {
            return Err(ResolveError::Circular {
                key: key.clone(),
                chain: pass.chain_to(key),
            });
        };
        let _frame = ChainFrame::push(&pass.chain, key.clone());

        let accessed = RefCell::new(Vec::new());
        let resolve = |dependency: &Key| self.resolve_in(dependency, pass);
        let ctx = DependencyTracker::track(key, &accessed, &resolve);

        tracing::debug!("Running factory for '{key}'");
        let produced = provider
            .produce(&ctx)
            .map_err(|error| factory_failure(key, pass, error))?;

        let Some(instance) = produced else {
            return Err(ResolveError::UndefinedReturn {
                key: key.clone(),
                chain: pass.chain(),
            });
        };

        let instance = self.store(provider, instance, accessed.into_inner());
        self.init_after_resolve(provider, &instance);
        Ok(instance)
    }

    /// Records the dependencies of a fresh instance and caches singletons
    fn store(&self, provider: &Provider, instance: Instance, accessed: Vec<Key>) -> Instance {
        let key = provider.key();
        let mut state = self.0.state.lock();
        state.tracker.record_deps(key.clone(), accessed);

        if provider.is_transient() {
            return instance;
        }

        let transient_deps: Vec<Key> = state
            .tracker
            .dependencies_of(key)
            .unwrap_or_default()
            .iter()
            .filter(|dependency| {
                self.provider_of(dependency)
                    .is_some_and(Provider::is_transient)
            })
            .cloned()
            .collect();

        for dependency in transient_deps {
            let warning = Warning {
                subject: key.clone(),
                kind: WarningKind::ScopeMismatch { dependency },
            };
            if !state.warnings.contains(&warning) {
                tracing::warn!("{warning}");
                state.warnings.push(warning);
            }
        }

        tracing::debug!("Cached instance of '{key}' ({})", instance.type_name());
        state.cache.entry(key.clone()).or_insert(instance).clone()
    }

    /// Starts the init hook of `provider` unless it already ran or init is deferred
    fn init_after_resolve(&self, provider: &Provider, instance: &Instance) {
        let Some(hook) = provider.init_hook() else {
            return;
        };
        let key = provider.key();

        let launch = {
            let mut state = self.0.state.lock();
            if state.deferred_init {
                return;
            }
            let Some(launch) = state.start_init(key) else {
                return;
            };
            launch
        };

        self.launch_init(key.clone(), hook, instance.clone(), launch);
    }

    fn not_found(&self, key: &Key, pass: &ResolutionPass) -> ResolveError {
        let registered = self.all_registered_keys();
        let suggestion = self
            .0
            .suggester
            .as_ref()
            .and_then(|suggest| suggest(key, &registered));

        tracing::debug!("'{key}' is not registered");
        ResolveError::NotFound {
            key: key.clone(),
            chain: pass.chain_to(key),
            registered,
            suggestion,
        }
    }

    /// Provider for `key` in this resolver or the closest parent holding it
    pub(crate) fn provider_of(&self, key: &str) -> Option<&Provider> {
        self.owner_of(key)?.0.registry.get(key)
    }

    /// This resolver or the closest parent whose registry holds `key`
    pub(crate) fn owner_of(&self, key: &str) -> Option<&Resolver> {
        if self.0.registry.contains(key) {
            return Some(self);
        }
        self.0.parent.as_ref()?.owner_of(key)
    }

    /// This resolver followed by its parents, closest first
    pub(crate) fn lineage(&self) -> Vec<Resolver> {
        let mut lineage = vec![self.clone()];
        let mut parent = self.0.parent.clone();
        while let Some(resolver) = parent {
            parent = resolver.0.parent.clone();
            lineage.push(resolver);
        }
        lineage
    }
}

/// Keeps resolution errors raised by nested lookups, wraps everything else
fn factory_failure(key: &Key, pass: &ResolutionPass, error: DynError) -> ResolveError {
    match error.downcast::<ResolveError>() {
        Ok(resolve_error) => *resolve_error,
        Err(error) => {
            tracing::debug!("Factory for '{key}' failed: {error}");
            ResolveError::FactoryFailure {
                key: key.clone(),
                chain: pass.chain(),
                error: Arc::new(error),
            }
        }
    }
}

// Read-only accessors
impl Resolver {
    /// True if a singleton for `key` is cached in this resolver
    pub fn is_resolved(&self, key: &str) -> bool {
        self.0.state.lock().cache.contains_key(key)
    }

    /// True if `key` is registered here or in any parent
    pub fn has(&self, key: &str) -> bool {
        self.provider_of(key).is_some()
    }

    /// Snapshot of the dependencies discovered so far
    pub fn dependency_graph(&self) -> IndexMap<Key, Vec<Key>> {
        self.0.state.lock().tracker.graph().clone()
    }

    /// Snapshot of the cached singletons, in resolution order
    pub fn cache(&self) -> IndexMap<Key, Instance> {
        self.0.state.lock().cache.clone()
    }

    pub fn warnings(&self) -> Vec<Warning> {
        self.0.state.lock().warnings.clone()
    }

    /// Keys of this resolver's own registry
    pub fn registered_keys(&self) -> Vec<Key> {
        self.0.registry.keys().cloned().collect()
    }

    /// Keys registered across the whole scope chain, closest first
    pub fn all_registered_keys(&self) -> Vec<Key> {
        let mut keys = self.registered_keys();
        let mut parent = self.0.parent.as_ref();
        while let Some(resolver) = parent {
            for key in resolver.0.registry.keys() {
                if !keys.contains(key) {
                    keys.push(key.clone());
                }
            }
            parent = resolver.0.parent.as_ref();
        }
        keys
    }

    pub fn registry(&self) -> &Registry {
        &self.0.registry
    }

    pub fn parent(&self) -> Option<&Resolver> {
        self.0.parent.as_ref()
    }

    pub fn is_deferred_init(&self) -> bool {
        self.0.state.lock().deferred_init
    }
}

// Mutation
impl Resolver {
    /// While deferred, resolving does not start init hooks
    pub fn set_deferred_init(&self, deferred: bool) {
        self.0.state.lock().deferred_init = deferred;
    }

    /// Forgets the given keys, or everything if none are given
    ///
    /// Parents are never touched.
    pub fn reset<K: Into<Key>>(&self, keys: impl IntoIterator<Item = K>) {
        let keys: Vec<Key> = keys.into_iter().map(Into::into).collect();
        let mut state = self.0.state.lock();

        if keys.is_empty() {
            tracing::debug!("Resetting all {} cached instances", state.cache.len());
            state.cache.clear();
            state.initialized.clear();
            state.tracker.clear_all();
            state.warnings.clear();
            return;
        }

        tracing::debug!("Resetting {keys:?}");
        for key in &keys {
            state.cache.shift_remove(key);
            state.initialized.remove(key);
        }
        state.tracker.clear(&keys);
        state.warnings.retain(|warning| !keys.contains(&warning.subject));
    }

    pub fn reset_all(&self) {
        self.reset(Vec::<Key>::new());
    }
}

// Composition
impl Resolver {
    /// Child resolver with its own cache, falling back to this one for unknown keys
    ///
    /// Providers given here shadow this resolver's providers of the same key.
    pub fn scope(
        &self,
        providers: impl IntoIterator<Item = Provider>,
    ) -> Result<Resolver, RegistryError> {
        let registry = Registry::from_providers(providers)?;
        tracing::debug!("Creating scope with {} providers", registry.len());

        Ok(Resolver::from_parts(
            registry,
            Some(self.clone()),
            ResolverState::default(),
            self.0.spawner.clone(),
            self.0.suggester.clone(),
        ))
    }

    /// Independent resolver with the merged registry and a copy of the current cache
    ///
    /// A scoped source is flattened: the providers and cached instances of its parents
    /// are folded in and the result has no parent. Cached instances of overridden keys
    /// and of everything depending on them are not carried over.
    pub fn extend(
        &self,
        providers: impl IntoIterator<Item = Provider>,
    ) -> Result<Resolver, RegistryError> {
        let overrides = Registry::from_providers(providers)?;
        let lineage = self.lineage();

        let registry = lineage
            .iter()
            .rev()
            .fold(Registry::new(), |merged, resolver| {
                merged.merged(&resolver.0.registry)
            })
            .merged(&overrides);

        let mut state = ResolverState::default();
        for resolver in lineage.iter().rev() {
            let source = resolver.0.state.lock();
            for (key, instance) in &source.cache {
                // shadowed entries are not what the source would serve
                if !self
                    .owner_of(key)
                    .is_some_and(|owner| Arc::ptr_eq(&owner.0, &resolver.0))
                {
                    continue;
                }
                state.cache.insert(key.clone(), instance.clone());
                if let Some(deps) = source.tracker.dependencies_of(key) {
                    state.tracker.record_deps(key.clone(), deps.to_vec());
                }
                if let Some(launch) = source.initialized.get(key) {
                    state.initialized.insert(key.clone(), *launch);
                }
            }
            state.launches = state.launches.max(source.launches);
        }

        let stale: Vec<Key> = state.tracker.dependents(overrides.keys()).into_iter().collect();
        for key in &stale {
            state.cache.shift_remove(key);
            state.initialized.remove(key);
        }
        state.tracker.clear(&stale);

        tracing::debug!(
            "Extending resolver with {} providers, reusing {} instances",
            overrides.len(),
            state.cache.len()
        );

        Ok(Resolver::from_parts(
            registry,
            None,
            state,
            self.0.spawner.clone(),
            self.0.suggester.clone(),
        ))
    }
}
