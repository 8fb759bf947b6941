//! Wrapp Lazy resolves a registry of providers into instances on demand.
//!
//! Providers are plain factories keyed by name. While a factory runs it pulls other keys
//! through its [ResolveContext], and every key it touches becomes one of its dependencies.
//! The dependency graph is therefore discovered, not declared.
//!
//! Wrapp Lazy consists of the following components:
//!
//! 1. Provider / Registry - the factories and their [Lifetime]
//! 2. Resolver - resolving, caching, cycle detection, scope and extend composition
//! 3. Preload - resolves a set of keys and runs their init hooks layer by layer
//! 4. Dispose - tears down cached instances in reverse resolution order
//!
//! # Examples
//!
//! ```rust
//! use wrapp_lazy::{DynError, Provider, Resolver};
//!
//! struct Config {
//!     url: String,
//! }
//! struct Database {
//!     url: String,
//! }
//!
//! let resolver = Resolver::builder()
//!     .add(Provider::singleton("config", |_| {
//!         Ok::<_, DynError>(Config {
//!             url: "postgres://localhost".to_string(),
//!         })
//!     }))
//!     .add(Provider::singleton("db", |ctx| {
//!         let config = ctx.require::<Config>("config")?;
//!         Ok::<_, DynError>(Database {
//!             url: config.url.clone(),
//!         })
//!     }))
//!     .build()
//!     .unwrap();
//!
//! let db = resolver.get::<Database>("db").unwrap();
//! assert_eq!(db.url, "postgres://localhost");
//! assert_eq!(resolver.dependency_graph()["db"], ["config"]);
//! ```

pub mod builder;
pub mod cycle;
mod dispose;
pub mod errors;
pub mod initiator;
pub mod preload;
pub mod provider;
pub mod resolver;
pub mod tracker;
pub mod types;

pub use builder::ResolverBuilder;
pub use errors::{AggregateError, LifecycleError, RegistryError, ResolveError};
pub use initiator::ThreadSpawner;
pub use provider::{Lifetime, Provider, Registry};
pub use resolver::{Resolver, Suggester};
pub use tracker::ResolveContext;
pub use types::{DynError, Injectable, Instance, Key, Warning, WarningKind};
