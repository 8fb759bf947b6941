use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use wrapp_lazy::{DynError, Provider, Resolver};

fn main() {
    let resolver = Resolver::builder()
        .add(Provider::value("greeting", "hello".to_string()))
        .add(
            Provider::singleton("test", |ctx| {
                let greeting = ctx.require::<String>("greeting")?;
                Ok::<_, DynError>(Test {
                    a: greeting,
                    ready: AtomicBool::new(false),
                })
            })
            .on_init(|test: Arc<Test>| async move {
                test.ready.store(true, Ordering::SeqCst);
                Ok::<_, DynError>(())
            })
            .on_dispose(|test: Arc<Test>| async move {
                println!("Disposing test ({})", test.a);
                Ok::<_, DynError>(())
            }),
        )
        .build()
        .unwrap();

    futures::executor::block_on(resolver.preload(["test"])).unwrap();

    println!("{:?}", resolver);
    let t = resolver.get::<Test>("test").unwrap();
    println!("{:?}", t);
    println!("{:?}", resolver.dependency_graph());

    futures::executor::block_on(resolver.dispose()).unwrap();
}

#[derive(Debug)]
struct Test {
    a: Arc<String>,
    ready: AtomicBool,
}
