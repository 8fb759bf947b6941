use std::sync::Arc;

use crate::{
    errors::LifecycleError,
    resolver::Resolver,
    types::{Instance, Key},
};

impl Resolver {
    /// Tears down every cached instance, most recently resolved first, then clears all state
    ///
    /// A failing teardown does not stop the remaining ones. Parents are never touched.
    pub async fn dispose(&self) -> Result<(), LifecycleError> {
        let instances: Vec<(Key, Instance)> = {
            let state = self.0.state.lock();
            state
                .cache
                .iter()
                .rev()
                .map(|(key, instance)| (key.clone(), instance.clone()))
                .collect()
        };
        tracing::debug!("Disposing {} instances", instances.len());

        let mut failures = Vec::new();
        for (key, instance) in instances {
            let Some(hook) = self.0.registry.get(&key).and_then(|p| p.dispose_hook()) else {
                continue;
            };

            match hook(instance).await {
                Ok(()) => tracing::debug!("Tore down '{key}'"),
                Err(error) => {
                    tracing::warn!("Teardown of '{key}' failed: {error}");
                    failures.push(LifecycleError::TeardownFailed {
                        chain: vec![key.clone()],
                        key,
                        error: Arc::new(error),
                    });
                }
            }
        }

        {
            let mut state = self.0.state.lock();
            state.cache.clear();
            state.initialized.clear();
            state.tracker.clear_all();
            state.warnings.clear();
        }

        LifecycleError::collect(failures)
    }
}
