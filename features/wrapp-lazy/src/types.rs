use std::{
    any::Any,
    borrow::Borrow,
    fmt::{Debug, Display},
    ops::Deref,
    sync::Arc,
};

/// Error type produced by user code (factories, hooks)
pub type DynError = Box<dyn std::error::Error + Send + Sync>;

/// We assume that we are using a multithreaded async runtime
/// So anything injectable needs to be Send + Sync + 'static
pub trait Injectable: Send + Sync + 'static {}
impl<T: Send + Sync + 'static> Injectable for T {}

/// Name under which a provider is registered
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key(Arc<str>);

impl Key {
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Key(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}
impl Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
impl Debug for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Debug::fmt(&*self.0, f)
    }
}
impl Deref for Key {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}
impl Borrow<str> for Key {
    fn borrow(&self) -> &str {
        &self.0
    }
}
impl From<&str> for Key {
    fn from(value: &str) -> Self {
        Key(Arc::from(value))
    }
}
impl From<String> for Key {
    fn from(value: String) -> Self {
        Key(Arc::from(value))
    }
}
impl From<&Key> for Key {
    fn from(value: &Key) -> Self {
        value.clone()
    }
}
impl PartialEq<str> for Key {
    fn eq(&self, other: &str) -> bool {
        &*self.0 == other
    }
}
impl PartialEq<&str> for Key {
    fn eq(&self, other: &&str) -> bool {
        &*self.0 == *other
    }
}

/// Resolved value of a Provider
///
/// Cloning an instance shares the underlying value.
#[derive(Clone)]
pub struct Instance {
    type_name: &'static str,
    instance: Arc<dyn Any + Send + Sync + 'static>,
}
impl Debug for Instance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Instance").field(&self.type_name).finish()
    }
}

impl Instance {
    pub fn new<T: Injectable>(instance: T) -> Self {
        Self::from_arc(Arc::new(instance))
    }

    pub fn from_arc<T: Injectable>(instance: Arc<T>) -> Self {
        Instance {
            type_name: std::any::type_name::<T>(),
            instance,
        }
    }

    /// Name of the concrete type held
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Returns the typed value, or the actual type name if `T` does not match
    pub fn downcast<T: Injectable>(&self) -> Result<Arc<T>, &'static str> {
        match Arc::downcast::<T>(self.instance.clone()) {
            Ok(downcasted) => Ok(downcasted),
            Err(_) => Err(self.type_name),
        }
    }

    /// True if both point to the same value
    pub fn ptr_eq(&self, other: &Instance) -> bool {
        Arc::ptr_eq(&self.instance, &other.instance)
    }
}

/// Diagnostic produced as a side effect of resolution, never a failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Warning {
    /// Key the warning is about
    pub subject: Key,
    pub kind: WarningKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WarningKind {
    /// A singleton captured a transient dependency
    ScopeMismatch { dependency: Key },
    /// An init hook started outside of preload failed
    InitFailed { message: String },
}

impl Display for Warning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            WarningKind::ScopeMismatch { dependency } => write!(
                f,
                "singleton '{}' depends on transient '{}' - the transient is captured once",
                self.subject, dependency
            ),
            WarningKind::InitFailed { message } => {
                write!(f, "init of '{}' failed in background: {}", self.subject, message)
            }
        }
    }
}
