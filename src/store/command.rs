//! Typed commands accepted by the store.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use tokio::time::Instant;

use super::entry::{FetchOptions, FetchToken, Namespace, RequesterId, ResourceKey};

/// How an injected body combines with the body already cached.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MergeStrategy {
    /// The injected body replaces the old one.
    #[default]
    Replace,
    /// Top-level fields of the injected object overwrite the old object's
    /// fields; other old fields survive. Falls back to `Replace` unless both
    /// bodies are JSON objects.
    ShallowMerge,
}

impl MergeStrategy {
    pub(crate) fn combine(self, old: Option<&Value>, new: Value) -> Value {
        match (self, old, new) {
            (MergeStrategy::ShallowMerge, Some(Value::Object(old)), Value::Object(new)) => {
                let mut merged = old.clone();
                merged.extend(new);
                Value::Object(merged)
            }
            (_, _, new) => new,
        }
    }
}

/// Decides which keys survive an [`Action::Invalidate`].
///
/// # Examples
///
/// ```
/// use demand_cache::KeepPredicate;
///
/// let keep = KeepPredicate::new(|key| !key.starts_with("/api/matches"));
/// assert!(keep.keeps("/api/accounts"));
/// assert!(!keep.keeps("/api/matches?page=1"));
/// ```
#[derive(Clone)]
pub struct KeepPredicate(Arc<dyn Fn(&str) -> bool + Send + Sync>);

impl KeepPredicate {
    /// Wraps a closure returning `true` for keys to keep.
    ///
    /// The closure runs against a snapshot outside the store's write lock, so
    /// it may read the cache. It may run more than once per invalidation.
    pub fn new(predicate: impl Fn(&str) -> bool + Send + Sync + 'static) -> Self {
        Self(Arc::new(predicate))
    }

    /// Whether `key` survives.
    pub fn keeps(&self, key: &str) -> bool {
        (self.0)(key)
    }
}

impl fmt::Debug for KeepPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("KeepPredicate(..)")
    }
}

/// Guard for [`Action::InjectValue`]: receives the old body (if any) and
/// the candidate body, and the injection only applies when it returns `true`.
#[derive(Clone)]
pub struct InjectCondition(Arc<dyn Fn(Option<&Value>, &Value) -> bool + Send + Sync>);

impl InjectCondition {
    /// Wraps a closure over `(old, new)` bodies.
    ///
    /// Like [`KeepPredicate`], it may read the cache and may run more than
    /// once per injection.
    pub fn new(condition: impl Fn(Option<&Value>, &Value) -> bool + Send + Sync + 'static) -> Self {
        Self(Arc::new(condition))
    }

    /// Whether the injection should apply.
    pub fn holds(&self, old: Option<&Value>, new: &Value) -> bool {
        (self.0)(old, new)
    }
}

impl fmt::Debug for InjectCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("InjectCondition(..)")
    }
}

/// Which way a superseded fetch ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaleKind {
    /// The transport returned a body.
    Success,
    /// The transport returned an error.
    Failure,
}

/// A state transition request.
#[derive(Debug, Clone)]
pub enum Action {
    /// Replace a requester's demand list; an empty list removes the entry.
    RequireKeys {
        requester: RequesterId,
        keys: Vec<ResourceKey>,
        options: FetchOptions,
    },
    /// Marks `key` in flight under `token` until `deadline`.
    BeginFetch {
        key: ResourceKey,
        token: FetchToken,
        deadline: Instant,
        clear_body: bool,
    },
    /// Stores a fetched body and marks it fresh.
    CompleteFetch {
        key: ResourceKey,
        body: Value,
        expires_at: Instant,
        options: FetchOptions,
    },
    /// Stores a locally produced body, optionally merged and guarded.
    InjectValue {
        key: ResourceKey,
        body: Value,
        expires_at: Instant,
        options: FetchOptions,
        merge: MergeStrategy,
        condition: Option<InjectCondition>,
    },
    /// Records a failed attempt; the body is kept.
    FailFetch {
        key: ResourceKey,
        message: String,
        expires_at: Instant,
        options: FetchOptions,
    },
    /// Drops every key the predicate does not keep. `None` keeps nothing.
    Invalidate { keep: Option<KeepPredicate> },
    /// Drops every entry. Declared demand survives.
    ClearAll,
    /// Pauses or resumes the fetch pipeline.
    SetSuspended(bool),
    /// A completion arrived after a newer attempt took over. Informational,
    /// never changes state.
    DiscardStale {
        key: ResourceKey,
        token: FetchToken,
        kind: StaleKind,
    },
}

impl Action {
    /// Short name used in log records.
    pub fn name(&self) -> &'static str {
        match self {
            Action::RequireKeys { .. } => "require_keys",
            Action::BeginFetch { .. } => "begin_fetch",
            Action::CompleteFetch { .. } => "complete_fetch",
            Action::InjectValue { .. } => "inject_value",
            Action::FailFetch { .. } => "fail_fetch",
            Action::Invalidate { .. } => "invalidate",
            Action::ClearAll => "clear_all",
            Action::SetSuspended(_) => "set_suspended",
            Action::DiscardStale { .. } => "discard_stale",
        }
    }
}

/// An [`Action`] addressed to one cache namespace.
#[derive(Debug, Clone)]
pub struct Command {
    namespace: Namespace,
    action: Action,
}

impl Command {
    /// Addresses `action` to `namespace`.
    pub fn new(namespace: impl Into<Namespace>, action: Action) -> Self {
        Self {
            namespace: namespace.into(),
            action,
        }
    }

    /// The target namespace.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// The requested transition.
    pub fn action(&self) -> &Action {
        &self.action
    }
}
