mod common;

use std::{
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use common::{depends_on, init_tracing, Counter, Events, ManualSpawner};
use futures_channel::oneshot;
use wrapp_lazy::{DynError, Key, LifecycleError, Provider, ResolveError, Resolver, WarningKind};

/// Singleton depending on `deps` whose init logs start and end around a sleep
fn service(
    key: &'static str,
    deps: &'static [&'static str],
    events: &Events,
    init_time: Duration,
) -> Provider {
    let events = events.clone();
    depends_on(key, deps).on_init(move |_: Arc<String>| {
        let events = events.clone();
        async move {
            events.push(format!("start:{key}"));
            tokio::time::sleep(init_time).await;
            events.push(format!("end:{key}"));
            Ok::<_, DynError>(())
        }
    })
}

/// Singleton whose init counts its runs and optionally fails
fn initialized(key: &'static str, runs: &Counter, fails: bool) -> Provider {
    let runs = runs.clone();
    depends_on(key, &[]).on_init(move |_: Arc<String>| {
        runs.hit();
        async move {
            if fails {
                return Err::<(), DynError>(format!("{key} failed").into());
            }
            Ok(())
        }
    })
}

/// Singleton whose teardown logs its key and optionally fails
fn disposable(key: &'static str, events: &Events, fails: bool) -> Provider {
    let events = events.clone();
    depends_on(key, &[]).on_dispose(move |_: Arc<String>| {
        events.push(key);
        async move {
            if fails {
                return Err::<(), DynError>(format!("{key} teardown failed").into());
            }
            Ok(())
        }
    })
}

#[tokio::test]
async fn preload_initializes_layer_by_layer() {
    init_tracing();
    let events = Events::default();
    let step = Duration::from_millis(10);
    let resolver = Resolver::builder()
        .add(service("api", &["db", "cache"], &events, step))
        .add(service("db", &["config"], &events, step * 3))
        .add(service("cache", &["config"], &events, step))
        .add(service("config", &[], &events, step))
        .build()
        .unwrap();

    resolver.preload(["api"]).await.unwrap();

    assert!(events.position("end:config") < events.position("start:db"));
    assert!(events.position("end:config") < events.position("start:cache"));
    assert!(events.position("end:db") < events.position("start:api"));
    assert!(events.position("end:cache") < events.position("start:api"));
    assert_eq!(events.all().len(), 8);
}

#[tokio::test]
async fn inits_of_one_layer_run_concurrently() {
    let events = Events::default();
    let init_time = Duration::from_millis(50);
    let resolver = Resolver::builder()
        .add(service("left", &[], &events, init_time))
        .add(service("right", &[], &events, init_time))
        .build()
        .unwrap();

    let started = Instant::now();
    resolver.preload_all().await.unwrap();
    let elapsed = started.elapsed();

    assert!(elapsed >= init_time);
    assert!(elapsed < init_time * 2, "took {elapsed:?}");
}

#[tokio::test]
async fn deferred_init_waits_for_preload() {
    let runs = Counter::default();
    let resolver = Resolver::builder()
        .add(depends_on("api", &["db"]))
        .add(initialized("db", &runs, false))
        .deferred_init(true)
        .build()
        .unwrap();

    resolver.resolve("api").unwrap();
    assert_eq!(runs.get(), 0);

    resolver.preload(["api"]).await.unwrap();
    assert_eq!(runs.get(), 1);
    assert!(resolver.is_deferred_init());
}

#[tokio::test]
async fn init_runs_once_across_preloads_and_lazy_resolution() {
    let runs = Counter::default();
    let resolver = Resolver::builder()
        .add(initialized("config", &runs, false))
        .add(depends_on("api", &["config"]))
        .build()
        .unwrap();

    resolver.resolve("api").unwrap();
    assert_eq!(runs.get(), 1);

    resolver.preload(["api"]).await.unwrap();
    resolver.preload_all().await.unwrap();
    assert_eq!(runs.get(), 1);
}

#[tokio::test]
async fn failed_preload_evicts_new_entries_and_runs_no_hooks() {
    let runs = Counter::default();
    let resolver = Resolver::builder()
        .add(initialized("config", &runs, false))
        .add(initialized("early", &runs, false))
        .add(depends_on("broken", &["config", "missing"]))
        .build()
        .unwrap();

    resolver.set_deferred_init(true);
    resolver.resolve("early").unwrap();
    resolver.set_deferred_init(false);

    let err = resolver.preload(["broken"]).await.unwrap_err();

    assert!(matches!(
        err,
        LifecycleError::Resolve(ResolveError::NotFound { .. })
    ));
    assert_eq!(runs.get(), 0);
    assert!(!resolver.is_resolved("config"));
    assert!(resolver.is_resolved("early"));
    assert!(!resolver.dependency_graph().contains_key("config"));
    assert!(!resolver.is_deferred_init());

    // config was never initialized, so a later resolve still runs its hook
    resolver.resolve("config").unwrap();
    assert_eq!(runs.get(), 1);
}

#[tokio::test]
async fn single_init_failure_is_surfaced_directly() {
    let runs = Counter::default();
    let resolver = Resolver::builder()
        .add(initialized("config", &runs, true))
        .add({
            let runs = runs.clone();
            Provider::singleton("api", |ctx| {
                ctx.get("config")?;
                Ok::<_, DynError>(String::new())
            })
            .on_init(move |_: Arc<String>| {
                runs.hit();
                async { Ok::<_, DynError>(()) }
            })
        })
        .build()
        .unwrap();

    let err = resolver.preload(["api"]).await.unwrap_err();

    match err {
        LifecycleError::InitFailed { key, chain, error } => {
            assert_eq!(key, "config");
            assert_eq!(chain, ["config"]);
            assert_eq!(error.to_string(), "config failed");
        }
        other => panic!("unexpected error: {other}"),
    }
    // later layers still ran
    assert_eq!(runs.get(), 2);
    assert!(resolver.is_resolved("api"));
}

#[tokio::test]
async fn multiple_init_failures_are_aggregated() {
    let runs = Counter::default();
    let resolver = Resolver::builder()
        .add(initialized("left", &runs, true))
        .add(initialized("right", &runs, true))
        .add(initialized("fine", &runs, false))
        .build()
        .unwrap();

    let err = resolver.preload_all().await.unwrap_err();

    match err {
        LifecycleError::Aggregate(aggregate) => {
            let mut failed: Vec<Key> = aggregate
                .errors
                .iter()
                .map(|error| match error {
                    LifecycleError::InitFailed { key, .. } => key.clone(),
                    other => panic!("unexpected error: {other}"),
                })
                .collect();
            failed.sort();
            assert_eq!(failed, ["left", "right"]);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(runs.get(), 3);
}

#[tokio::test]
async fn preload_skips_transient_instances() {
    let runs = Counter::default();
    let counter = runs.clone();
    let resolver = Resolver::builder()
        .add(
            Provider::transient("request", |_| Ok::<_, DynError>(String::new())).on_init(
                move |_: Arc<String>| {
                    counter.hit();
                    async { Ok::<_, DynError>(()) }
                },
            ),
        )
        .build()
        .unwrap();

    resolver.preload(["request"]).await.unwrap();
    assert_eq!(runs.get(), 0);

    // outside of preload the first instance gets initialized
    resolver.resolve("request").unwrap();
    resolver.resolve("request").unwrap();
    assert_eq!(runs.get(), 1);
}

#[tokio::test]
async fn dispose_runs_in_reverse_resolution_order() {
    let events = Events::default();
    let resolver = Resolver::builder()
        .add(disposable("third", &events, false))
        .add(disposable("first", &events, false))
        .add(disposable("second", &events, false))
        .build()
        .unwrap();

    for key in ["first", "second", "third"] {
        resolver.resolve(key).unwrap();
    }
    resolver.dispose().await.unwrap();

    assert_eq!(events.all(), ["third", "second", "first"]);
}

#[tokio::test]
async fn failing_teardown_does_not_stop_the_rest() {
    let events = Events::default();
    let resolver = Resolver::builder()
        .add(disposable("first", &events, true))
        .add(disposable("second", &events, false))
        .add(disposable("third", &events, false))
        .build()
        .unwrap();

    for key in ["first", "second", "third"] {
        resolver.resolve(key).unwrap();
    }
    let err = resolver.dispose().await.unwrap_err();

    assert!(matches!(err, LifecycleError::TeardownFailed { ref key, .. } if key == "first"));
    assert_eq!(events.all(), ["third", "second", "first"]);
    assert!(resolver.cache().is_empty());
}

#[tokio::test]
async fn multiple_teardown_failures_are_aggregated() {
    let events = Events::default();
    let resolver = Resolver::builder()
        .add(disposable("first", &events, true))
        .add(disposable("second", &events, true))
        .build()
        .unwrap();

    resolver.resolve("first").unwrap();
    resolver.resolve("second").unwrap();

    match resolver.dispose().await.unwrap_err() {
        LifecycleError::Aggregate(aggregate) => {
            assert_eq!(aggregate.errors.len(), 2);
            assert!(aggregate.to_string().starts_with("2 lifecycle hooks failed"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn dispose_clears_state_and_allows_fresh_start() {
    let runs = Counter::default();
    let resolver = Resolver::builder()
        .add(initialized("config", &runs, false))
        .add(Provider::transient("request", |_| Ok::<_, DynError>(())))
        .add(depends_on("api", &["config", "request"]))
        .build()
        .unwrap();

    resolver.preload(["api"]).await.unwrap();
    assert_eq!(runs.get(), 1);
    assert_eq!(resolver.warnings().len(), 1);

    resolver.dispose().await.unwrap();

    assert!(resolver.cache().is_empty());
    assert!(resolver.dependency_graph().is_empty());
    assert!(resolver.warnings().is_empty());

    resolver.resolve("config").unwrap();
    assert_eq!(runs.get(), 2);
}

#[test]
fn background_init_failure_becomes_warning() {
    let resolver = Resolver::builder()
        .add(initialized("config", &Counter::default(), true))
        .build()
        .unwrap();

    // completes on the first poll, no spawning needed
    resolver.resolve("config").unwrap();

    let warnings = resolver.warnings();
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].subject, "config");
    assert_eq!(
        warnings[0].kind,
        WarningKind::InitFailed {
            message: "config failed".to_string()
        }
    );
}

/// Singleton whose init waits for a message, failing with it
fn pending_init(key: &'static str) -> (Provider, oneshot::Sender<String>) {
    let (tx, rx) = oneshot::channel::<String>();
    let rx = Arc::new(Mutex::new(Some(rx)));
    let provider = depends_on(key, &[]).on_init(move |_: Arc<String>| {
        let rx = rx.lock().unwrap().take();
        async move {
            let Some(rx) = rx else {
                return Ok(());
            };
            match rx.await {
                Ok(message) => Err::<(), DynError>(message.into()),
                Err(_) => Ok(()),
            }
        }
    });
    (provider, tx)
}

#[test]
fn pending_init_continues_on_spawner() {
    let spawner = ManualSpawner::default();
    let (provider, tx) = pending_init("db");
    let resolver = Resolver::builder()
        .add(provider)
        .spawner(spawner.clone())
        .build()
        .unwrap();

    resolver.resolve("db").unwrap();
    assert_eq!(spawner.pending(), 1);
    assert!(resolver.warnings().is_empty());

    tx.send("connection refused".to_string()).unwrap();
    spawner.run_all();

    assert_eq!(
        resolver.warnings()[0].kind,
        WarningKind::InitFailed {
            message: "connection refused".to_string()
        }
    );
}

#[test]
fn late_init_failure_after_dispose_is_dropped() {
    let spawner = ManualSpawner::default();
    let (provider, tx) = pending_init("db");
    let resolver = Resolver::builder()
        .add(provider)
        .spawner(spawner.clone())
        .build()
        .unwrap();

    resolver.resolve("db").unwrap();
    futures::executor::block_on(resolver.dispose()).unwrap();

    tx.send("too late".to_string()).unwrap();
    spawner.run_all();

    assert!(resolver.warnings().is_empty());
}

#[test]
fn late_init_failure_after_reset_is_dropped() {
    let spawner = ManualSpawner::default();
    let (provider, tx) = pending_init("db");
    let resolver = Resolver::builder()
        .add(provider)
        .spawner(spawner.clone())
        .build()
        .unwrap();

    resolver.resolve("db").unwrap();
    resolver.reset(["db"]);

    tx.send("too late".to_string()).unwrap();
    spawner.run_all();

    assert!(resolver.warnings().is_empty());
}

#[test]
fn extended_resolver_does_not_rerun_init() {
    let runs = Counter::default();
    let source = Resolver::builder()
        .add(initialized("config", &runs, false))
        .build()
        .unwrap();
    source.resolve("config").unwrap();

    let extended = source.extend([depends_on("api", &["config"])]).unwrap();
    futures::executor::block_on(extended.preload_all()).unwrap();

    assert_eq!(runs.get(), 1);
}

#[test]
fn late_failure_of_a_reset_launch_spares_the_new_instance() {
    let spawner = ManualSpawner::default();
    let (provider, tx) = pending_init("db");
    let resolver = Resolver::builder()
        .add(provider)
        .spawner(spawner.clone())
        .build()
        .unwrap();

    resolver.resolve("db").unwrap();
    resolver.reset(["db"]);
    // the second init settles on its first poll
    resolver.resolve("db").unwrap();
    assert_eq!(spawner.pending(), 1);

    tx.send("too late".to_string()).unwrap();
    spawner.run_all();

    assert!(resolver.warnings().is_empty());
    assert!(resolver.is_resolved("db"));
}

#[tokio::test]
async fn scoped_preload_waits_for_parent_inits() {
    let events = Events::default();
    let parent = Resolver::builder()
        .add(service("db", &["config"], &events, Duration::from_millis(30)))
        .add(service("config", &[], &events, Duration::from_millis(10)))
        .build()
        .unwrap();
    let child = parent
        .scope([service("api", &["db"], &events, Duration::from_millis(10))])
        .unwrap();

    child.preload(["api"]).await.unwrap();

    assert!(events.position("end:config") < events.position("start:db"));
    assert!(events.position("end:db") < events.position("start:api"));
    assert!(parent.is_resolved("db"));
    assert!(!child.is_resolved("db"));
    assert!(!parent.is_deferred_init());

    // parent instances are not initialized a second time
    parent.preload(["db"]).await.unwrap();
    child.preload(["api"]).await.unwrap();
    assert_eq!(events.all().len(), 6);
}

#[tokio::test]
async fn failed_scoped_preload_runs_no_hooks_anywhere() {
    let runs = Counter::default();
    let parent = Resolver::builder()
        .add(initialized("db", &runs, false))
        .build()
        .unwrap();
    let child = parent
        .scope([depends_on("api", &["db", "missing"])])
        .unwrap();

    let err = child.preload(["api"]).await.unwrap_err();

    assert!(matches!(
        err,
        LifecycleError::Resolve(ResolveError::NotFound { .. })
    ));
    assert_eq!(runs.get(), 0);
    assert!(!parent.is_resolved("db"));
    assert!(parent.dependency_graph().is_empty());
    assert!(!parent.is_deferred_init());

    parent.resolve("db").unwrap();
    assert_eq!(runs.get(), 1);
}

#[tokio::test]
async fn scoped_dispose_leaves_parent_instances_alone() {
    let events = Events::default();
    let parent = Resolver::builder()
        .add(disposable("db", &events, false))
        .build()
        .unwrap();
    let child = parent
        .scope([disposable("session", &events, false)])
        .unwrap();

    child.resolve("db").unwrap();
    child.resolve("session").unwrap();
    child.dispose().await.unwrap();

    assert_eq!(events.all(), ["session"]);
    assert!(parent.is_resolved("db"));

    parent.dispose().await.unwrap();
    assert_eq!(events.all(), ["session", "db"]);
}
