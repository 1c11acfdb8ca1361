//! Background revalidation of keep-fresh demand.
//!
//! Without a server push channel, a key only refetches when someone asks for
//! it. Requesters that registered with
//! [`FetchOptions::keep_fresh`](crate::FetchOptions::keep_fresh) want their
//! data refreshed on expiry even if they never re-render; [`Revalidator`]
//! re-evaluates their keys on a fixed period.

use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::debug;

use crate::cache::{Cache, Inner};
use crate::coordinator::FetchHandle;
use crate::transport::Transport;

impl Cache {
    /// Dispatches a fetch for every stale key demanded by a keep-fresh
    /// requester. Each key is fetched at most once per call even when several
    /// requesters share it. Does nothing while suspended.
    pub fn revalidate(&self, transport: &Arc<dyn Transport>) -> Vec<FetchHandle> {
        let snapshot = self.snapshot();
        if snapshot.is_suspended() {
            return Vec::new();
        }

        let mut fetches = Vec::new();
        for (requester, requirement) in snapshot.requirements() {
            if !requirement.options().keep_fresh {
                continue;
            }
            for key in requirement.keys() {
                if !self.should_fetch(key.as_str(), false) {
                    continue;
                }
                debug!(namespace = %self.namespace(), %requester, %key, "revalidating");
                if let Some(handle) = self.dispatch_fetch(transport, key, requirement.options()) {
                    fetches.push(handle);
                }
            }
        }
        fetches
    }
}

/// Periodically runs [`Cache::revalidate`]. Stops when dropped or when the
/// last [`Cache`] handle goes away.
#[derive(Debug)]
pub struct Revalidator {
    task: JoinHandle<()>,
}

impl Revalidator {
    /// Spawns the revalidation loop. The first pass runs after one `period`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn(cache: &Cache, transport: Arc<dyn Transport>, period: Duration) -> Self {
        let weak = cache.downgrade();
        let task = tokio::spawn(run(weak, transport, period));
        Self { task }
    }

    /// Whether the loop has stopped, e.g. because the cache was dropped.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for Revalidator {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run(cache: Weak<Inner>, transport: Arc<dyn Transport>, period: Duration) {
    let mut ticks = interval(period);
    ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticks.tick().await;

    loop {
        ticks.tick().await;
        let Some(cache) = Cache::upgrade(&cache) else {
            debug!("cache dropped — revalidator exiting");
            return;
        };
        cache.revalidate(&transport);
    }
}
