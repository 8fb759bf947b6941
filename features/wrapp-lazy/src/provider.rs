use std::{fmt::Debug, future::Future, sync::Arc};

use futures::{future::BoxFuture, FutureExt};
use indexmap::IndexMap;

use crate::{
    errors::RegistryError,
    tracker::ResolveContext,
    types::{DynError, Injectable, Instance, Key},
};

/// Produces the instance for a key, `Ok(None)` means the factory had no value
pub type Factory =
    Arc<dyn Fn(&ResolveContext<'_>) -> Result<Option<Instance>, DynError> + Send + Sync>;

/// Lifecycle hook run against a resolved instance
pub type Hook = Arc<dyn Fn(Instance) -> BoxFuture<'static, Result<(), DynError>> + Send + Sync>;

/// How long a resolved instance lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lifetime {
    /// Produced once, cached and shared
    Singleton,
    /// Produced anew on every resolution, never cached
    Transient,
}

/// A registered key together with the factory producing its value
#[derive(Clone)]
pub struct Provider {
    key: Key,
    lifetime: Lifetime,
    factory: Factory,
    on_init: Option<Hook>,
    on_dispose: Option<Hook>,
}
impl Debug for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provider")
            .field("key", &self.key)
            .field("lifetime", &self.lifetime)
            .field("on_init", &self.on_init.is_some())
            .field("on_dispose", &self.on_dispose.is_some())
            .finish()
    }
}

impl Provider {
    /// Provider with an untyped factory
    pub fn from_fn<F>(key: impl Into<Key>, lifetime: Lifetime, factory: F) -> Self
    where
        F: Fn(&ResolveContext<'_>) -> Result<Option<Instance>, DynError> + Send + Sync + 'static,
    {
        Provider {
            key: key.into(),
            lifetime,
            factory: Arc::new(factory),
            on_init: None,
            on_dispose: None,
        }
    }

    pub fn singleton<T, E, F>(key: impl Into<Key>, factory: F) -> Self
    where
        T: Injectable,
        E: Into<DynError>,
        F: Fn(&ResolveContext<'_>) -> Result<T, E> + Send + Sync + 'static,
    {
        Self::typed(key, Lifetime::Singleton, factory)
    }

    pub fn transient<T, E, F>(key: impl Into<Key>, factory: F) -> Self
    where
        T: Injectable,
        E: Into<DynError>,
        F: Fn(&ResolveContext<'_>) -> Result<T, E> + Send + Sync + 'static,
    {
        Self::typed(key, Lifetime::Transient, factory)
    }

    /// Singleton wrapping an already existing value
    pub fn value<T: Injectable>(key: impl Into<Key>, value: T) -> Self {
        let instance = Instance::new(value);
        Self::from_fn(key, Lifetime::Singleton, move |_| Ok(Some(instance.clone())))
    }

    fn typed<T, E, F>(key: impl Into<Key>, lifetime: Lifetime, factory: F) -> Self
    where
        T: Injectable,
        E: Into<DynError>,
        F: Fn(&ResolveContext<'_>) -> Result<T, E> + Send + Sync + 'static,
    {
        Self::from_fn(key, lifetime, move |ctx| {
            factory(ctx).map(|value| Some(Instance::new(value))).map_err(Into::into)
        })
    }

    /// Runs once the instance is produced, or during preload
    pub fn on_init<T, E, F, Fut>(mut self, hook: F) -> Self
    where
        T: Injectable,
        E: Into<DynError>,
        F: Fn(Arc<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
    {
        self.on_init = Some(typed_hook(hook));
        self
    }

    /// Runs when the owning resolver is disposed
    pub fn on_dispose<T, E, F, Fut>(mut self, hook: F) -> Self
    where
        T: Injectable,
        E: Into<DynError>,
        F: Fn(Arc<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
    {
        self.on_dispose = Some(typed_hook(hook));
        self
    }

    pub fn key(&self) -> &Key {
        &self.key
    }

    pub fn lifetime(&self) -> Lifetime {
        self.lifetime
    }

    pub fn is_transient(&self) -> bool {
        self.lifetime == Lifetime::Transient
    }

    pub(crate) fn produce(&self, ctx: &ResolveContext<'_>) -> Result<Option<Instance>, DynError> {
        (self.factory)(ctx)
    }

    pub(crate) fn init_hook(&self) -> Option<&Hook> {
        self.on_init.as_ref()
    }

    pub(crate) fn dispose_hook(&self) -> Option<&Hook> {
        self.on_dispose.as_ref()
    }
}

fn typed_hook<T, E, F, Fut>(hook: F) -> Hook
where
    T: Injectable,
    E: Into<DynError>,
    F: Fn(Arc<T>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
{
    Arc::new(move |instance: Instance| match instance.downcast::<T>() {
        Ok(value) => hook(value)
            .map(|res| res.map_err(Into::<DynError>::into))
            .boxed(),
        Err(actual_type) => {
            let error: DynError = format!(
                "hook expected '{}' but the instance is '{actual_type}'",
                std::any::type_name::<T>()
            )
            .into();
            futures::future::ready(Err(error)).boxed()
        }
    })
}

/// Providers by key, in registration order
#[derive(Debug, Clone, Default)]
pub struct Registry {
    providers: IndexMap<Key, Provider>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a provider, rejecting blank and duplicate keys
    pub fn register(&mut self, provider: Provider) -> Result<(), RegistryError> {
        if provider.key.as_str().trim().is_empty() {
            return Err(RegistryError::ReservedKey(provider.key));
        }
        if self.providers.contains_key(&provider.key) {
            return Err(RegistryError::Duplicate(provider.key));
        }

        self.providers.insert(provider.key.clone(), provider);
        Ok(())
    }

    pub fn from_providers(
        providers: impl IntoIterator<Item = Provider>,
    ) -> Result<Self, RegistryError> {
        let mut registry = Self::new();
        for provider in providers {
            registry.register(provider)?;
        }
        Ok(registry)
    }

    /// New registry holding both, `overrides` winning on collisions
    pub fn merged(&self, overrides: &Registry) -> Registry {
        let mut providers = self.providers.clone();
        for (key, provider) in &overrides.providers {
            providers.insert(key.clone(), provider.clone());
        }
        Registry { providers }
    }

    pub fn get(&self, key: &str) -> Option<&Provider> {
        self.providers.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.providers.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &Key> {
        self.providers.keys()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}
