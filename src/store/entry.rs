//! Identifiers and per-key records held by the store.

use std::borrow::Borrow;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::time::Instant;
use uuid::Uuid;

/// Canonical URL (query included) identifying one cacheable resource.
///
/// Equality is exact string equality; no normalization is applied beyond
/// what the caller already did when building the URL.
///
/// # Examples
///
/// ```
/// use demand_cache::ResourceKey;
///
/// let key = ResourceKey::from("/api/accounts?page=2");
/// assert_eq!(key.as_str(), "/api/accounts?page=2");
/// assert_ne!(key, ResourceKey::from("/api/accounts?page=02"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKey(Arc<str>);

impl ResourceKey {
    /// The key as written.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ResourceKey {
    fn from(value: &str) -> Self {
        Self(Arc::from(value))
    }
}

impl From<String> for ResourceKey {
    fn from(value: String) -> Self {
        Self(Arc::from(value))
    }
}

impl From<&ResourceKey> for ResourceKey {
    fn from(value: &ResourceKey) -> Self {
        value.clone()
    }
}

impl Borrow<str> for ResourceKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for ResourceKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque identity of one mounted component that declares demand.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequesterId(Arc<str>);

impl RequesterId {
    /// The identity as written.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for RequesterId {
    fn from(value: &str) -> Self {
        Self(Arc::from(value))
    }
}

impl From<String> for RequesterId {
    fn from(value: String) -> Self {
        Self(Arc::from(value))
    }
}

impl Borrow<str> for RequesterId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequesterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Tag naming one cache instance. Commands carrying another tag are ignored.
pub type Namespace = Arc<str>;

/// Identifies a single fetch attempt.
///
/// Minted as a UUIDv7, i.e. a millisecond timestamp followed by random bits,
/// so two attempts for the same key never share a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FetchToken(Uuid);

impl FetchToken {
    /// Mints a fresh token for a new attempt.
    pub fn mint() -> Self {
        Self(Uuid::now_v7())
    }
}

impl fmt::Display for FetchToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Options attached to a requirement and to every fetch it triggers.
///
/// # Examples
///
/// ```
/// use demand_cache::FetchOptions;
///
/// let options = FetchOptions::default()
///     .keep_fresh(true)
///     .param("include", "balances");
/// assert!(options.keep_fresh);
/// assert_eq!(options.params["include"], "balances");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchOptions {
    /// Refetch stale keys on every registration, even ones this requester
    /// already held. Without it only keys new to the requester force a load.
    pub keep_fresh: bool,
    /// Drop the cached body when a fetch begins instead of keeping it visible
    /// until the new result lands.
    pub clear: bool,
    /// Transport options forwarded verbatim to [`Transport::fetch`](crate::Transport::fetch).
    pub params: Map<String, Value>,
}

impl FetchOptions {
    /// Sets whether held keys are refetched when stale.
    #[must_use]
    pub fn keep_fresh(mut self, keep_fresh: bool) -> Self {
        self.keep_fresh = keep_fresh;
        self
    }

    /// Sets whether a starting fetch drops the cached body.
    #[must_use]
    pub fn clear(mut self, clear: bool) -> Self {
        self.clear = clear;
        self
    }

    /// Adds one transport parameter.
    #[must_use]
    pub fn param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }
}

/// Freshness metadata for one key. Absence (`None` on the entry) means the
/// key was never fetched.
#[derive(Debug, Clone, PartialEq)]
pub enum Meta {
    /// A fetch is outstanding. Duplicate fetches are suppressed until
    /// `deadline`.
    InFlight { token: FetchToken, deadline: Instant },
    /// The body is valid until `expires_at`.
    Fresh {
        expires_at: Instant,
        options: FetchOptions,
    },
    /// The last attempt failed; not fetchable again until `expires_at`.
    Errored {
        message: String,
        expires_at: Instant,
        options: FetchOptions,
    },
}

impl Meta {
    /// The dog-pile deadline, set only while in flight.
    pub fn fetch_deadline(&self) -> Option<Instant> {
        match self {
            Meta::InFlight { deadline, .. } => Some(*deadline),
            _ => None,
        }
    }

    /// The success or error freshness deadline, unset while in flight.
    pub fn expires_at(&self) -> Option<Instant> {
        match self {
            Meta::Fresh { expires_at, .. } | Meta::Errored { expires_at, .. } => Some(*expires_at),
            Meta::InFlight { .. } => None,
        }
    }

    /// The in-flight attempt's token.
    pub fn token(&self) -> Option<FetchToken> {
        match self {
            Meta::InFlight { token, .. } => Some(*token),
            _ => None,
        }
    }

    /// The failure message, if the last attempt failed.
    pub fn error(&self) -> Option<&str> {
        match self {
            Meta::Errored { message, .. } => Some(message.as_str()),
            _ => None,
        }
    }
}

/// Everything the store knows about one key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Entry {
    /// Last successfully received payload. May outlive the meta it arrived
    /// with, e.g. while a refetch is in flight.
    pub body: Option<Arc<Value>>,
    /// Freshness of the key; `None` if never fetched.
    pub meta: Option<Meta>,
}

impl Entry {
    pub(crate) fn is_vacant(&self) -> bool {
        self.body.is_none() && self.meta.is_none()
    }
}

/// One requester's current demand: a sorted, de-duplicated key list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Requirement {
    pub(crate) keys: Vec<ResourceKey>,
    pub(crate) options: FetchOptions,
}

impl Requirement {
    /// Declared keys, sorted.
    pub fn keys(&self) -> &[ResourceKey] {
        &self.keys
    }

    /// Options the requester declared with its keys.
    pub fn options(&self) -> &FetchOptions {
        &self.options
    }

    /// Whether `key` is among the declared keys.
    pub fn contains(&self, key: &ResourceKey) -> bool {
        self.keys.binary_search(key).is_ok()
    }
}
