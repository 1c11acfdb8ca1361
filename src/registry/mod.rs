//! Requirement registry — components declare which keys they currently need.
//!
//! A component calls [`Cache::register_requirement`] on mount and whenever its
//! wanted key list changes, and [`Cache::unregister_requirement`] on teardown.
//! Registration diffs the new list against the requester's previous one,
//! records the change, and dispatches fetches for keys that warrant one.
//!
//! Freshness policy per key:
//!
//! | `keep_fresh` | key in previous list | fetched when                        |
//! |--------------|----------------------|-------------------------------------|
//! | `false`      | no                   | absent, or stale and not in flight  |
//! | `false`      | yes                  | absent only                         |
//! | `true`       | either               | absent, or stale and not in flight  |
//!
//! Dropping a key from every list stops refetches on its behalf but does
//! not evict it; expiry and explicit invalidation handle that.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::debug;

use crate::cache::Cache;
use crate::coordinator::FetchHandle;
use crate::store::{Action, FetchOptions, RequesterId, ResourceKey};
use crate::transport::Transport;

/// What one registration call did.
#[derive(Debug, Default)]
pub struct Registration {
    /// Whether the requester's recorded demand changed.
    pub changed: bool,
    /// Fetches started on the requester's behalf.
    pub fetches: Vec<FetchHandle>,
}

/// Sorts and de-duplicates `keys`, dropping empty ones.
pub fn normalize_keys<I, K>(keys: I) -> Vec<ResourceKey>
where
    I: IntoIterator<Item = K>,
    K: AsRef<str>,
{
    keys.into_iter()
        .filter(|key| !key.as_ref().is_empty())
        .map(|key| ResourceKey::from(key.as_ref()))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

impl Cache {
    /// Declares that `requester` currently needs `keys`.
    ///
    /// While the cache is suspended a non-empty declaration is dropped
    /// outright: nothing is recorded and nothing is fetched. Requesters are
    /// expected to re-register once they observe the resume through
    /// [`Cache::subscribe`].
    ///
    /// Must be called from within a Tokio runtime.
    pub fn register_requirement<I, K>(
        &self,
        requester: impl Into<RequesterId>,
        transport: &Arc<dyn Transport>,
        keys: I,
        options: &FetchOptions,
    ) -> Registration
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        self.require(requester.into(), Some(transport), normalize_keys(keys), options)
    }

    /// Removes `requester`'s demand. Cached data stays in place.
    pub fn unregister_requirement(&self, requester: impl Into<RequesterId>) -> Registration {
        self.require(requester.into(), None, Vec::new(), &FetchOptions::default())
    }

    fn require(
        &self,
        requester: RequesterId,
        transport: Option<&Arc<dyn Transport>>,
        keys: Vec<ResourceKey>,
        options: &FetchOptions,
    ) -> Registration {
        let snapshot = self.snapshot();
        if snapshot.is_suspended() && !keys.is_empty() {
            debug!(namespace = %self.namespace(), %requester, "suspended — requirement dropped");
            return Registration::default();
        }

        let previous = snapshot.requirement(requester.as_str());
        let unchanged = match previous {
            Some(previous) => previous.keys() == keys.as_slice() && previous.options() == options,
            None => keys.is_empty(),
        };

        let mut registration = Registration::default();
        let owned = |key: &ResourceKey| previous.is_some_and(|previous| previous.contains(key));
        let wanted: Vec<(ResourceKey, bool)> = keys
            .iter()
            .map(|key| (key.clone(), !options.keep_fresh && owned(key)))
            .collect();

        if !unchanged {
            debug!(
                namespace = %self.namespace(),
                %requester,
                keys = keys.len(),
                "requirement changed"
            );
            registration.changed = self.dispatch(Action::RequireKeys {
                requester,
                keys,
                options: options.clone(),
            });
        }

        let Some(transport) = transport else {
            return registration;
        };
        if snapshot.is_suspended() {
            return registration;
        }
        for (key, ignore_expiration) in wanted {
            if !self.should_fetch(key.as_str(), ignore_expiration) {
                continue;
            }
            if let Some(handle) = self.dispatch_fetch(transport, key, options) {
                registration.fetches.push(handle);
            }
        }
        registration
    }
}
