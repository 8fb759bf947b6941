#![allow(dead_code)]

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};

use futures::task::{FutureObj, Spawn, SpawnError};
use wrapp_lazy::{DynError, Provider};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Counts how often something ran
#[derive(Clone, Default)]
pub struct Counter(Arc<AtomicUsize>);
impl Counter {
    pub fn hit(&self) -> usize {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

/// Ordered log shared between hooks
#[derive(Clone, Default)]
pub struct Events(Arc<Mutex<Vec<String>>>);
impl Events {
    pub fn push(&self, event: impl Into<String>) {
        self.0.lock().unwrap().push(event.into());
    }

    pub fn all(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn position(&self, event: &str) -> usize {
        self.all()
            .iter()
            .position(|e| e == event)
            .unwrap_or_else(|| panic!("'{event}' never happened"))
    }
}

/// Keeps spawned futures until the test runs them
#[derive(Clone, Default)]
pub struct ManualSpawner {
    tasks: Arc<Mutex<Vec<FutureObj<'static, ()>>>>,
}
impl Spawn for ManualSpawner {
    fn spawn_obj(&self, future: FutureObj<'static, ()>) -> Result<(), SpawnError> {
        self.tasks.lock().unwrap().push(future);
        Ok(())
    }
}
impl ManualSpawner {
    pub fn pending(&self) -> usize {
        self.tasks.lock().unwrap().len()
    }

    pub fn run_all(&self) {
        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap());
        for task in tasks {
            futures::executor::block_on(task);
        }
    }
}

/// Singleton producing its own key, counting factory runs
pub fn counted(key: &'static str, runs: &Counter) -> Provider {
    let runs = runs.clone();
    Provider::singleton(key, move |_| {
        runs.hit();
        Ok::<_, DynError>(key.to_string())
    })
}

/// Singleton whose factory pulls every key in `deps`
pub fn depends_on(key: &'static str, deps: &'static [&'static str]) -> Provider {
    Provider::singleton(key, move |ctx| {
        for dep in deps {
            ctx.get(*dep)?;
        }
        Ok::<_, DynError>(key.to_string())
    })
}
