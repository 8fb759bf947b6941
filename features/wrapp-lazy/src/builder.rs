use std::sync::Arc;

use futures::task::Spawn;

use crate::{
    errors::RegistryError,
    initiator::ThreadSpawner,
    provider::{Provider, Registry},
    resolver::{Resolver, ResolverState, Suggester},
    types::Key,
};

/// Collects providers and settings for a [Resolver]
///
/// The first registration error is kept and returned by [ResolverBuilder::build].
pub struct ResolverBuilder {
    registry: Registry,
    error: Option<RegistryError>,
    spawner: Arc<dyn Spawn + Send + Sync>,
    suggester: Option<Suggester>,
    deferred_init: bool,
}
impl Default for ResolverBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ResolverBuilder {
    pub fn new() -> Self {
        ResolverBuilder {
            registry: Registry::new(),
            error: None,
            spawner: Arc::new(ThreadSpawner),
            suggester: None,
            deferred_init: false,
        }
    }
}
impl ResolverBuilder {
    pub fn add(mut self, provider: Provider) -> Self {
        if self.error.is_none() {
            if let Err(error) = self.registry.register(provider) {
                tracing::debug!("Rejected provider: {error}");
                self.error = Some(error);
            }
        }
        self
    }

    pub fn add_all(self, providers: impl IntoIterator<Item = Provider>) -> Self {
        providers.into_iter().fold(self, Self::add)
    }

    /// Where init hooks still pending after their first poll keep running
    pub fn spawner(mut self, spawner: impl Spawn + Send + Sync + 'static) -> Self {
        self.spawner = Arc::new(spawner);
        self
    }

    /// Hint source for [crate::ResolveError::NotFound]
    pub fn suggester<F>(mut self, suggester: F) -> Self
    where
        F: Fn(&Key, &[Key]) -> Option<String> + Send + Sync + 'static,
    {
        self.suggester = Some(Arc::new(suggester));
        self
    }

    /// Start out with init hooks deferred
    pub fn deferred_init(mut self, deferred: bool) -> Self {
        self.deferred_init = deferred;
        self
    }

    pub fn build(self) -> Result<Resolver, RegistryError> {
        if let Some(error) = self.error {
            return Err(error);
        }

        tracing::debug!("Building resolver with {} providers", self.registry.len());
        Ok(Resolver::from_parts(
            self.registry,
            None,
            ResolverState {
                deferred_init: self.deferred_init,
                ..Default::default()
            },
            self.spawner,
            self.suggester,
        ))
    }
}
