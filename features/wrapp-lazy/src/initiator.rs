use std::{
    sync::Arc,
    task::{Context, Poll},
};

use futures::{
    task::{noop_waker_ref, FutureObj, Spawn, SpawnError, SpawnExt},
    FutureExt,
};

use crate::{
    provider::Hook,
    resolver::Resolver,
    types::{Instance, Key, Warning, WarningKind},
};

/// Drives every spawned future to completion on its own detached thread
///
/// Used for init hooks started outside of preload when no other spawner is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSpawner;

impl Spawn for ThreadSpawner {
    fn spawn_obj(&self, future: FutureObj<'static, ()>) -> Result<(), SpawnError> {
        std::thread::Builder::new()
            .name("wrapp-lazy-init".to_string())
            .spawn(move || futures::executor::block_on(future))
            .map(drop)
            .map_err(|_| SpawnError::shutdown())
    }
}

impl Resolver {
    /// Starts an init hook without waiting for it
    ///
    /// The hook is polled once right away, so hooks without suspension points finish
    /// before this returns. Anything still pending continues on the spawner.
    /// Failures only ever show up as [WarningKind::InitFailed].
    pub(crate) fn launch_init(&self, key: Key, hook: &Hook, instance: Instance, launch: u64) {
        let mut init = hook(instance);

        let mut cx = Context::from_waker(noop_waker_ref());
        match init.poll_unpin(&mut cx) {
            Poll::Ready(Ok(())) => {
                tracing::debug!("Initialized '{key}'");
                return;
            }
            Poll::Ready(Err(error)) => {
                self.record_init_failure(&key, launch, error.to_string());
                return;
            }
            Poll::Pending => {}
        }

        tracing::debug!("Init of '{key}' continues in background");
        let weak = Arc::downgrade(&self.0);
        let task_key = key.clone();
        let task = async move {
            let result = init.await;
            let Some(inner) = weak.upgrade() else {
                tracing::debug!("Resolver dropped before init of '{task_key}' settled");
                return;
            };
            match result {
                Ok(()) => tracing::debug!("Initialized '{task_key}'"),
                Err(error) => {
                    Resolver(inner).record_init_failure(&task_key, launch, error.to_string())
                }
            }
        };

        if let Err(error) = self.0.spawner.spawn(task) {
            self.record_init_failure(&key, launch, format!("could not spawn init: {error}"));
        }
    }

    /// Records a background init failure, unless its launch has since been reset or disposed
    fn record_init_failure(&self, key: &Key, launch: u64, message: String) {
        let mut state = self.0.state.lock();
        if state.initialized.get(key) != Some(&launch) {
            tracing::debug!("Dropping stale init failure of '{key}': {message}");
            return;
        }

        let warning = Warning {
            subject: key.clone(),
            kind: WarningKind::InitFailed { message },
        };
        tracing::warn!("{warning}");
        state.warnings.push(warning);
    }
}
