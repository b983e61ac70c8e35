//! Shared Context Store
//!
//! The engine-lifetime key/value store handed to modules, engine callbacks
//! and every request. Keys are typed tokens: a [`ContextKey<T>`] can only
//! ever read back a `T`, so there is no runtime type-check failure path.
//!
//! # Example
//!
//! ```rust
//! use tessera::context::{ContextKey, SharedContext};
//!
//! const GREETING: ContextKey<String> = ContextKey::new("greeting");
//!
//! let shared = SharedContext::new();
//! shared.set(&GREETING, "hello".to_string());
//! assert_eq!(shared.get(&GREETING).as_deref().map(String::as_str), Some("hello"));
//! ```

mod request;

pub use request::{RequestContext, ResponseBuffer};

use dashmap::DashMap;
use std::any::{Any, TypeId};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

pub(crate) type Value = Arc<dyn Any + Send + Sync>;

/// Storage slot: the key name together with its value type.
pub(crate) type Slot = (&'static str, TypeId);

/// A typed key into a [`SharedContext`] or a [`RequestContext`].
///
/// Two keys with the same name but different value types address
/// different slots.
pub struct ContextKey<T> {
    name: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T: 'static> ContextKey<T> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _marker: PhantomData,
        }
    }

    pub const fn name(&self) -> &'static str {
        self.name
    }

    pub(crate) fn slot(&self) -> Slot {
        (self.name, TypeId::of::<T>())
    }
}

impl<T> Clone for ContextKey<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for ContextKey<T> {}

impl<T> fmt::Debug for ContextKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextKey")
            .field("name", &self.name)
            .field("type", &std::any::type_name::<T>())
            .finish()
    }
}

/// Thread-safe, engine-lifetime key/value store.
///
/// Last write wins. A write that completes before a read begins is
/// observed by that read; values never expire.
#[derive(Default)]
pub struct SharedContext {
    values: DashMap<Slot, Value>,
}

impl SharedContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `value` under `key`, replacing any previous value.
    pub fn set<T: Send + Sync + 'static>(&self, key: &ContextKey<T>, value: T) {
        self.set_arc(key, Arc::new(value));
    }

    /// Store an already shared value under `key`.
    pub fn set_arc<T: Send + Sync + 'static>(&self, key: &ContextKey<T>, value: Arc<T>) {
        tracing::trace!(key = key.name(), "Shared context value set");
        self.values.insert(key.slot(), value);
    }

    pub fn get<T: Send + Sync + 'static>(&self, key: &ContextKey<T>) -> Option<Arc<T>> {
        let value = self.values.get(&key.slot())?.value().clone();
        value.downcast::<T>().ok()
    }

    pub fn contains<T: 'static>(&self, key: &ContextKey<T>) -> bool {
        self.values.contains_key(&key.slot())
    }

    pub fn remove<T: Send + Sync + 'static>(&self, key: &ContextKey<T>) -> Option<Arc<T>> {
        let (_, value) = self.values.remove(&key.slot())?;
        value.downcast::<T>().ok()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub(crate) fn get_slot(&self, slot: &Slot) -> Option<Value> {
        self.values.get(slot).map(|entry| entry.value().clone())
    }
}

impl fmt::Debug for SharedContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keys: Vec<&'static str> = self.values.iter().map(|entry| entry.key().0).collect();
        f.debug_struct("SharedContext").field("keys", &keys).finish()
    }
}
