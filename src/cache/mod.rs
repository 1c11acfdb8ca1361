//! The [`Cache`] handle — one namespaced store plus its TTL settings.
//!
//! `Cache` is cheap to clone; clones share the same store. Reads are plain
//! keyed lookups on the current snapshot and are safe to call from render or
//! computation code. Writes are spread over the rest of the crate:
//!
//! - [`registry`](crate::registry) — declared demand per requester.
//! - [`coordinator`](crate::coordinator) — fetch decisions and completion.
//! - [`control`](crate::control) — injection, invalidation, suspension.

use std::collections::BTreeSet;
use std::sync::{Arc, Weak};

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::watch;

use crate::error::CacheError;
use crate::store::{Action, CacheState, Command, Meta, Namespace, Requirement, ResourceKey, Store};

pub mod config;

pub use config::CacheConfig;

pub(crate) struct Inner {
    namespace: Namespace,
    config: CacheConfig,
    store: Store,
}

/// A namespaced fetch cache.
///
/// # Examples
///
/// ```
/// use demand_cache::Cache;
///
/// let cache = Cache::new("reconciliation");
/// assert_eq!(cache.namespace(), "reconciliation");
/// assert!(cache.get("/api/accounts").is_none());
/// ```
#[derive(Clone)]
pub struct Cache {
    inner: Arc<Inner>,
}

impl Cache {
    /// Creates a cache with the default TTLs.
    pub fn new(namespace: impl Into<Namespace>) -> Self {
        Self::build(namespace.into(), CacheConfig::default())
    }

    /// Creates a cache with custom TTLs.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::InvalidTtl`] if any TTL is zero.
    pub fn with_config(
        namespace: impl Into<Namespace>,
        config: CacheConfig,
    ) -> Result<Self, CacheError> {
        config.validate()?;
        Ok(Self::build(namespace.into(), config))
    }

    fn build(namespace: Namespace, config: CacheConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                store: Store::new(Arc::clone(&namespace)),
                namespace,
                config,
            }),
        }
    }

    /// The tag this cache answers to.
    pub fn namespace(&self) -> &str {
        &self.inner.namespace
    }

    /// TTLs this cache was built with.
    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// The current immutable state.
    pub fn snapshot(&self) -> Arc<CacheState> {
        self.inner.store.snapshot()
    }

    /// Observes every committed transition, suspension flips included.
    ///
    /// Components that declare demand should watch this and re-register when
    /// [`CacheState::is_suspended`] goes back to `false`.
    pub fn subscribe(&self) -> watch::Receiver<Arc<CacheState>> {
        self.inner.store.subscribe()
    }

    /// Last successfully received body for `key`.
    pub fn get(&self, key: &str) -> Option<Arc<Value>> {
        self.snapshot().body(key).cloned()
    }

    /// Decodes the cached body for `key` into `T`.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Decode`] if the body does not deserialize as `T`.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, CacheError> {
        self.get(key)
            .map(|body| {
                T::deserialize(body.as_ref()).map_err(|source| CacheError::Decode {
                    key: key.to_owned(),
                    source,
                })
            })
            .transpose()
    }

    /// Message of the last failed fetch, while that failure is the key's
    /// current state.
    pub fn get_error(&self, key: &str) -> Option<String> {
        self.snapshot().meta(key).and_then(Meta::error).map(str::to_owned)
    }

    /// Whether a fetch for `key` is outstanding.
    pub fn is_fetching(&self, key: &str) -> bool {
        matches!(self.snapshot().meta(key), Some(Meta::InFlight { .. }))
    }

    /// Whether the fetch pipeline is paused.
    pub fn is_suspended(&self) -> bool {
        self.snapshot().is_suspended()
    }

    /// Union of all requesters' current key lists.
    pub fn demand_set(&self) -> BTreeSet<ResourceKey> {
        self.snapshot().demand_set()
    }

    /// The keys and options `requester` last declared.
    pub fn requirement(&self, requester: &str) -> Option<Requirement> {
        self.snapshot().requirement(requester).cloned()
    }

    pub(crate) fn command(&self, action: Action) -> Command {
        Command::new(Arc::clone(&self.inner.namespace), action)
    }

    pub(crate) fn dispatch(&self, action: Action) -> bool {
        self.inner.store.dispatch(self.command(action))
    }

    pub(crate) fn dispatch_if(
        &self,
        action: Action,
        precondition: impl Fn(&CacheState) -> bool,
    ) -> bool {
        self.inner.store.dispatch_if(self.command(action), precondition)
    }

    pub(crate) fn downgrade(&self) -> Weak<Inner> {
        Arc::downgrade(&self.inner)
    }

    pub(crate) fn upgrade(inner: &Weak<Inner>) -> Option<Self> {
        inner.upgrade().map(|inner| Self { inner })
    }
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("namespace", &self.inner.namespace)
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}
