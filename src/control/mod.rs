//! Cache control surface — writes that bypass the fetch path.
//!
//! - [`Cache::inject`] stores data obtained elsewhere, typically the response
//!   of a mutation call, optionally merged into the old body and guarded by a
//!   condition.
//! - [`Cache::invalidate`] / [`Cache::clear`] drop entries so that views
//!   demanding them refetch.
//! - [`Cache::suspend`] / [`Cache::resume`] quiesce the registration pipeline,
//!   e.g. while credentials are being switched.

use std::time::Duration;

use serde_json::Value;
use tokio::time::Instant;
use tracing::debug;

use crate::cache::Cache;
use crate::store::{
    Action, FetchOptions, InjectCondition, KeepPredicate, MergeStrategy, ResourceKey,
};

/// Options for [`Cache::inject`].
///
/// # Examples
///
/// ```
/// use demand_cache::{InjectOptions, MergeStrategy};
///
/// let options = InjectOptions::default()
///     .merge(MergeStrategy::ShallowMerge)
///     .condition(|old, _new| old.is_some());
/// assert_eq!(options.merge, MergeStrategy::ShallowMerge);
/// ```
#[derive(Debug, Clone, Default)]
pub struct InjectOptions {
    /// How the body combines with the one already cached.
    pub merge: MergeStrategy,
    /// Guard over `(old, new)` bodies; the injection is skipped when it fails.
    pub condition: Option<InjectCondition>,
    /// Freshness of the injected body. Defaults to the success TTL.
    pub ttl: Option<Duration>,
    /// Options recorded alongside the body.
    pub fetch: FetchOptions,
}

impl InjectOptions {
    /// Sets the merge strategy.
    #[must_use]
    pub fn merge(mut self, merge: MergeStrategy) -> Self {
        self.merge = merge;
        self
    }

    /// Sets the guard over `(old, new)` bodies.
    ///
    /// The guard runs outside the store's write lock and may read the cache,
    /// but it may be evaluated more than once if other writes race with it.
    #[must_use]
    pub fn condition(
        mut self,
        condition: impl Fn(Option<&Value>, &Value) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.condition = Some(InjectCondition::new(condition));
        self
    }

    /// Sets the freshness of the injected body.
    #[must_use]
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }
}

impl Cache {
    /// Stores `body` for `key` as fresh data. Returns `false` when the
    /// condition rejected the update and the store is unchanged.
    pub fn inject(&self, key: impl Into<ResourceKey>, body: Value, options: InjectOptions) -> bool {
        let key = key.into();
        let ttl = options.ttl.unwrap_or(self.config().success_ttl);
        let applied = self.dispatch(Action::InjectValue {
            key: key.clone(),
            body,
            expires_at: Instant::now() + ttl,
            options: options.fetch,
            merge: options.merge,
            condition: options.condition,
        });
        debug!(namespace = %self.namespace(), %key, applied, "value injected");
        applied
    }

    /// Drops body and metadata for every key `keep` rejects. `None` drops
    /// everything. Returns whether anything was removed.
    pub fn invalidate(&self, keep: Option<KeepPredicate>) -> bool {
        let changed = self.dispatch(Action::Invalidate { keep });
        debug!(namespace = %self.namespace(), changed, "cache invalidated");
        changed
    }

    /// Drops every key whose name does not satisfy `keep`.
    ///
    /// `keep` may read the cache. It sees the state as of the start of the
    /// attempt and is re-run if another write lands first.
    pub fn invalidate_where(&self, keep: impl Fn(&str) -> bool + Send + Sync + 'static) -> bool {
        self.invalidate(Some(KeepPredicate::new(keep)))
    }

    /// Drops every cached body and its metadata. Requirements and the
    /// suspension flag are kept.
    pub fn clear(&self) -> bool {
        let changed = self.dispatch(Action::ClearAll);
        debug!(namespace = %self.namespace(), changed, "cache cleared");
        changed
    }

    /// Stops registrations from recording demand and fetches from being
    /// dispatched. In-flight fetches still settle.
    pub fn suspend(&self) -> bool {
        self.set_suspended(true)
    }

    /// Lifts suspension. Subscribers observe the flip and are expected to
    /// re-register their demand.
    pub fn resume(&self) -> bool {
        self.set_suspended(false)
    }

    fn set_suspended(&self, suspended: bool) -> bool {
        let changed = self.dispatch(Action::SetSuspended(suspended));
        if changed {
            debug!(namespace = %self.namespace(), suspended, "suspension toggled");
        }
        changed
    }
}
