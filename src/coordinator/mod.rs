//! Fetch coordinator — decides when to fetch, and reconciles results that
//! may arrive out of order.
//!
//! Each attempt mints a [`FetchToken`] and records it as the key's in-flight
//! marker. When the transport resolves, the result is committed only if that
//! marker still carries the same token; otherwise a newer attempt owns the
//! key and the result is dropped. There is no abort of in-flight network work,
//! only suppression of its effect on arrival.

use std::sync::{Arc, Weak};

use serde_json::Value;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::cache::{Cache, Inner};
use crate::store::{Action, FetchOptions, FetchToken, ResourceKey, StaleKind};
use crate::transport::{FetchRequest, Transport, TransportError};

/// Check telling whether one fetch attempt is still the newest for its key.
#[derive(Debug, Clone)]
pub struct IsCurrent {
    cache: Weak<Inner>,
    key: ResourceKey,
    token: FetchToken,
}

impl IsCurrent {
    /// True iff the key is still in flight under this attempt's token.
    /// Always false once the cache has been dropped.
    pub fn check(&self) -> bool {
        Cache::upgrade(&self.cache)
            .is_some_and(|cache| cache.snapshot().is_current(self.key.as_str(), self.token))
    }

    /// Token of the attempt this check belongs to.
    pub fn token(&self) -> FetchToken {
        self.token
    }
}

/// How a dispatched fetch ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The body was stored as the key's fresh value.
    Committed,
    /// The failure was stored against the key.
    Failed(String),
    /// Succeeded after a newer attempt took over; discarded.
    StaleSuccess,
    /// Failed after a newer attempt took over; discarded.
    StaleFailure,
}

/// Handle to a spawned fetch. Dropping it does not cancel the fetch.
#[derive(Debug)]
pub struct FetchHandle {
    key: ResourceKey,
    token: FetchToken,
    task: JoinHandle<FetchOutcome>,
}

impl FetchHandle {
    /// Key being fetched.
    pub fn key(&self) -> &ResourceKey {
        &self.key
    }

    /// Token minted for this attempt.
    pub fn token(&self) -> FetchToken {
        self.token
    }

    /// Waits for the fetch to settle. `None` if the task panicked or the
    /// runtime shut down first.
    pub async fn outcome(self) -> Option<FetchOutcome> {
        self.task.await.ok()
    }
}

impl Cache {
    /// Whether a network fetch for `key` is warranted now.
    ///
    /// See [`CacheState::should_fetch`](crate::CacheState::should_fetch).
    pub fn should_fetch(&self, key: &str, ignore_expiration: bool) -> bool {
        self.snapshot().should_fetch(key, ignore_expiration, Instant::now())
    }

    /// Starts a fetch for `key` through `transport`.
    ///
    /// Marks the key in flight, calls the transport, and spawns a task that
    /// commits the outcome once it arrives. Returns immediately.
    ///
    /// Returns `None` without touching the store while the cache is suspended,
    /// or when called outside a Tokio runtime.
    pub fn dispatch_fetch(
        &self,
        transport: &Arc<dyn Transport>,
        key: impl Into<ResourceKey>,
        options: &FetchOptions,
    ) -> Option<FetchHandle> {
        let key = key.into();
        if self.is_suspended() {
            debug!(namespace = %self.namespace(), %key, "suspended — fetch skipped");
            return None;
        }
        let Ok(runtime) = Handle::try_current() else {
            warn!(namespace = %self.namespace(), %key, "no Tokio runtime — fetch skipped");
            return None;
        };

        let token = FetchToken::mint();
        self.dispatch(Action::BeginFetch {
            key: key.clone(),
            token,
            deadline: Instant::now() + self.config().fetch_ttl,
            clear_body: options.clear,
        });
        debug!(namespace = %self.namespace(), %key, %token, "fetch dispatched");

        let is_current = IsCurrent {
            cache: self.downgrade(),
            key: key.clone(),
            token,
        };
        let fetch = transport.fetch(&key, FetchRequest::new(options.params.clone(), is_current));

        let cache = self.clone();
        let settle_key = key.clone();
        let options = options.clone();
        let task = runtime.spawn(async move {
            let result = fetch.await;
            cache.settle(settle_key, token, result, options)
        });

        Some(FetchHandle { key, token, task })
    }

    fn settle(
        &self,
        key: ResourceKey,
        token: FetchToken,
        result: Result<Value, TransportError>,
        options: FetchOptions,
    ) -> FetchOutcome {
        let now = Instant::now();
        let current = |state: &crate::CacheState| state.is_current(key.as_str(), token);

        match result {
            Ok(body) => {
                let committed = self.dispatch_if(
                    Action::CompleteFetch {
                        key: key.clone(),
                        body,
                        expires_at: now + self.config().success_ttl,
                        options,
                    },
                    current,
                );
                if committed {
                    debug!(namespace = %self.namespace(), %key, %token, "fetch committed");
                    return FetchOutcome::Committed;
                }
                self.discard(key, token, StaleKind::Success);
                FetchOutcome::StaleSuccess
            }
            Err(err) => {
                let message = err.to_string();
                let committed = self.dispatch_if(
                    Action::FailFetch {
                        key: key.clone(),
                        message: message.clone(),
                        expires_at: now + self.config().error_ttl,
                        options,
                    },
                    current,
                );
                if committed {
                    warn!(
                        namespace = %self.namespace(),
                        %key,
                        credential = err.is_credential_error(),
                        error = %message,
                        "fetch failed"
                    );
                    return FetchOutcome::Failed(message);
                }
                self.discard(key, token, StaleKind::Failure);
                FetchOutcome::StaleFailure
            }
        }
    }

    fn discard(&self, key: ResourceKey, token: FetchToken, kind: StaleKind) {
        debug!(namespace = %self.namespace(), %key, %token, ?kind, "stale result discarded");
        self.dispatch(Action::DiscardStale { key, token, kind });
    }
}
