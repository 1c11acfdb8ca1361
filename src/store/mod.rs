//! Cache store — the single source of truth for cached bodies, freshness
//! metadata and declared demand.
//!
//! [`CacheState`] is an immutable value. [`CacheState::apply`] is a total
//! function from `(state, command)` to either a new state or "unchanged";
//! it never mutates its input. [`Store`] holds the current state behind a
//! [`tokio::sync::watch`] channel, applies commands one at a time, and lets
//! observers subscribe to every committed transition.
//!
//! Per key the metadata moves through
//!
//! ```text
//! absent ──► in-flight ──► fresh | errored ──► in-flight ──► …
//!    ▲                                              │
//!    └──────────── Invalidate / ClearAll ───────────┘
//! ```

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::trace;

pub mod command;
pub mod entry;

pub use command::{Action, Command, InjectCondition, KeepPredicate, MergeStrategy, StaleKind};
pub use entry::{
    Entry, FetchOptions, FetchToken, Meta, Namespace, Requirement, RequesterId, ResourceKey,
};

/// A snapshot of one cache namespace.
///
/// Cloning is cheap relative to the data held: bodies sit behind [`Arc`].
#[derive(Debug, Clone)]
pub struct CacheState {
    namespace: Namespace,
    entries: HashMap<ResourceKey, Entry>,
    requirements: BTreeMap<RequesterId, Requirement>,
    suspended: bool,
    // Bumped once per state-changing command.
    revision: u64,
}

impl CacheState {
    /// Creates an empty state for `namespace`.
    pub fn new(namespace: impl Into<Namespace>) -> Self {
        Self {
            namespace: namespace.into(),
            entries: HashMap::new(),
            requirements: BTreeMap::new(),
            suspended: false,
            revision: 0,
        }
    }

    /// The namespace this state belongs to.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Count of state-changing commands applied so far.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Whether new fetches are currently refused.
    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    /// Body and metadata for `key`.
    pub fn entry(&self, key: &str) -> Option<&Entry> {
        self.entries.get(key)
    }

    /// Every non-vacant entry, in no particular order.
    pub fn entries(&self) -> impl Iterator<Item = (&ResourceKey, &Entry)> {
        self.entries.iter()
    }

    /// Last received body for `key`.
    pub fn body(&self, key: &str) -> Option<&Arc<serde_json::Value>> {
        self.entries.get(key).and_then(|entry| entry.body.as_ref())
    }

    /// Freshness metadata for `key`.
    pub fn meta(&self, key: &str) -> Option<&Meta> {
        self.entries.get(key).and_then(|entry| entry.meta.as_ref())
    }

    /// Current demand of `requester`.
    pub fn requirement(&self, requester: &str) -> Option<&Requirement> {
        self.requirements.get(requester)
    }

    /// Every requester's demand, ordered by requester.
    pub fn requirements(&self) -> impl Iterator<Item = (&RequesterId, &Requirement)> {
        self.requirements.iter()
    }

    /// Union of every requester's key list.
    pub fn demand_set(&self) -> BTreeSet<ResourceKey> {
        self.requirements
            .values()
            .flat_map(|requirement| requirement.keys.iter().cloned())
            .collect()
    }

    /// True iff `key` is in flight under exactly `token`.
    pub fn is_current(&self, key: &str, token: FetchToken) -> bool {
        self.meta(key).and_then(Meta::token) == Some(token)
    }

    /// Whether a network fetch for `key` is warranted at `now`.
    ///
    /// A key with no metadata is always fetched. Otherwise, unless the caller
    /// asks to ignore expiration, a fetch is warranted only once both the
    /// in-flight dog-pile window and the success/error freshness window have
    /// elapsed.
    pub fn should_fetch(&self, key: &str, ignore_expiration: bool, now: Instant) -> bool {
        let Some(meta) = self.meta(key) else {
            return true;
        };
        if ignore_expiration {
            return false;
        }
        let elapsed = |deadline: Option<Instant>| deadline.is_none_or(|at| now >= at);
        elapsed(meta.fetch_deadline()) && elapsed(meta.expires_at())
    }

    /// Applies `command`, returning the next state, or `None` when the command
    /// leaves the state unchanged (foreign namespace, failed guard, no-op).
    pub fn apply(&self, command: &Command) -> Option<CacheState> {
        if command.namespace() != &*self.namespace {
            return None;
        }

        let mut next = self.clone();
        let changed = match command.action().clone() {
            Action::RequireKeys {
                requester,
                mut keys,
                options,
            } => {
                if keys.is_empty() {
                    next.requirements.remove(&requester).is_some()
                } else {
                    keys.sort();
                    keys.dedup();
                    let requirement = Requirement { keys, options };
                    next.requirements.insert(requester, requirement.clone()) != Some(requirement)
                }
            }
            Action::BeginFetch {
                key,
                token,
                deadline,
                clear_body,
            } => {
                let entry = next.entries.entry(key).or_default();
                entry.meta = Some(Meta::InFlight { token, deadline });
                if clear_body {
                    entry.body = None;
                }
                true
            }
            Action::CompleteFetch {
                key,
                body,
                expires_at,
                options,
            } => {
                let entry = next.entries.entry(key).or_default();
                entry.body = Some(Arc::new(body));
                entry.meta = Some(Meta::Fresh {
                    expires_at,
                    options,
                });
                true
            }
            Action::InjectValue {
                key,
                body,
                expires_at,
                options,
                merge,
                condition,
            } => {
                let old = self.body(key.as_str()).map(|body| &**body);
                if condition.is_some_and(|condition| !condition.holds(old, &body)) {
                    return None;
                }
                let body = merge.combine(old, body);
                let entry = next.entries.entry(key).or_default();
                entry.body = Some(Arc::new(body));
                entry.meta = Some(Meta::Fresh {
                    expires_at,
                    options,
                });
                true
            }
            Action::FailFetch {
                key,
                message,
                expires_at,
                options,
            } => {
                let entry = next.entries.entry(key).or_default();
                entry.meta = Some(Meta::Errored {
                    message,
                    expires_at,
                    options,
                });
                true
            }
            Action::Invalidate { keep } => {
                let before = next.entries.len();
                next.entries
                    .retain(|key, _| keep.as_ref().is_some_and(|keep| keep.keeps(key.as_str())));
                next.entries.len() != before
            }
            Action::ClearAll => {
                let changed = !next.entries.is_empty();
                next.entries.clear();
                changed
            }
            Action::SetSuspended(suspended) => {
                let changed = next.suspended != suspended;
                next.suspended = suspended;
                changed
            }
            Action::DiscardStale { .. } => false,
        };

        if !changed {
            return None;
        }
        next.entries.retain(|_, entry| !entry.is_vacant());
        next.revision += 1;
        Some(next)
    }
}

/// Owns the current [`CacheState`] of one namespace and serializes command
/// application.
#[derive(Debug)]
pub struct Store {
    state: watch::Sender<Arc<CacheState>>,
}

impl Store {
    /// Creates a store holding an empty state for `namespace`.
    pub fn new(namespace: impl Into<Namespace>) -> Self {
        let (state, _) = watch::channel(Arc::new(CacheState::new(namespace)));
        Self { state }
    }

    /// Returns the current state. Never blocks on in-flight fetches.
    pub fn snapshot(&self) -> Arc<CacheState> {
        Arc::clone(&self.state.borrow())
    }

    /// Observes every committed transition.
    pub fn subscribe(&self) -> watch::Receiver<Arc<CacheState>> {
        self.state.subscribe()
    }

    /// Applies `command`. Returns whether the state changed.
    pub fn dispatch(&self, command: Command) -> bool {
        self.dispatch_if(command, |_| true)
    }

    /// Applies `command` only if `precondition` holds for the state it would
    /// be applied to.
    ///
    /// The precondition and the command's predicates run against a snapshot,
    /// outside the write lock, so they may read the store. The result is
    /// committed only if no other command landed in between; otherwise the
    /// whole evaluation is repeated on the newer state.
    pub fn dispatch_if(
        &self,
        command: Command,
        precondition: impl Fn(&CacheState) -> bool,
    ) -> bool {
        let changed = loop {
            let base = self.snapshot();
            if !precondition(&base) {
                break false;
            }
            let Some(next) = base.apply(&command) else {
                break false;
            };
            let next = Arc::new(next);
            let committed = self.state.send_if_modified(|current| {
                if current.revision() != base.revision() {
                    return false;
                }
                *current = Arc::clone(&next);
                true
            });
            if committed {
                break true;
            }
        };
        trace!(
            namespace = %command.namespace(),
            action = command.action().name(),
            changed,
            "store command"
        );
        changed
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use serde_json::json;

    use super::*;

    const NS: &str = "ledger";

    fn apply(state: &CacheState, action: Action) -> CacheState {
        state
            .apply(&Command::new(NS, action))
            .expect("command should change state")
    }

    fn complete(state: &CacheState, key: &str, body: serde_json::Value, at: Instant) -> CacheState {
        apply(
            state,
            Action::CompleteFetch {
                key: key.into(),
                body,
                expires_at: at,
                options: FetchOptions::default(),
            },
        )
    }

    fn begin(
        state: &CacheState,
        key: &str,
        token: FetchToken,
        deadline: Instant,
        clear: bool,
    ) -> CacheState {
        apply(
            state,
            Action::BeginFetch {
                key: key.into(),
                token,
                deadline,
                clear_body: clear,
            },
        )
    }

    // ── apply ─────────────────────────────────────────────────────────────────

    #[test]
    fn apply_leaves_input_untouched() {
        let empty = CacheState::new(NS);
        let now = Instant::now();
        let next = complete(&empty, "/x", json!({ "v": 1 }), now);
        assert!(empty.entry("/x").is_none());
        assert_eq!(empty.revision(), 0);
        assert_eq!(next.body("/x").map(|b| b.as_ref().clone()), Some(json!({ "v": 1 })));
        assert_eq!(next.revision(), 1);
    }

    #[test]
    fn foreign_namespace_is_ignored() {
        let state = CacheState::new(NS);
        let command = Command::new("other", Action::SetSuspended(true));
        assert!(state.apply(&command).is_none());
    }

    #[test]
    fn require_keys_inserts_and_removes() {
        let state = CacheState::new(NS);
        let state = apply(
            &state,
            Action::RequireKeys {
                requester: "A".into(),
                keys: vec!["/a".into(), "/b".into()],
                options: FetchOptions::default(),
            },
        );
        assert_eq!(state.requirement("A").map(|r| r.keys().len()), Some(2));

        let state = apply(
            &state,
            Action::RequireKeys {
                requester: "A".into(),
                keys: vec![],
                options: FetchOptions::default(),
            },
        );
        assert!(state.requirement("A").is_none());
    }

    #[test]
    fn require_same_keys_is_a_no_op() {
        let action = Action::RequireKeys {
            requester: "A".into(),
            keys: vec!["/a".into()],
            options: FetchOptions::default(),
        };
        let state = apply(&CacheState::new(NS), action.clone());
        assert!(state.apply(&Command::new(NS, action)).is_none());
    }

    #[test]
    fn require_keys_sorts_and_dedups() {
        let state = apply(
            &CacheState::new(NS),
            Action::RequireKeys {
                requester: "A".into(),
                keys: vec!["/c".into(), "/a".into(), "/c".into(), "/b".into()],
                options: FetchOptions::default(),
            },
        );
        let requirement = state.requirement("A").unwrap();
        let keys: Vec<&str> = requirement.keys().iter().map(ResourceKey::as_str).collect();
        assert_eq!(keys, ["/a", "/b", "/c"]);
        assert!(requirement.contains(&"/a".into()));
        assert!(requirement.contains(&"/c".into()));
        assert!(!requirement.contains(&"/d".into()));
    }

    #[test]
    fn removing_unknown_requester_is_a_no_op() {
        let state = CacheState::new(NS);
        let command = Command::new(
            NS,
            Action::RequireKeys {
                requester: "ghost".into(),
                keys: vec![],
                options: FetchOptions::default(),
            },
        );
        assert!(state.apply(&command).is_none());
    }

    #[test]
    fn demand_set_is_union_of_requirements() {
        let mut state = CacheState::new(NS);
        for (requester, keys) in [("A", vec!["/a", "/b"]), ("B", vec!["/b", "/c"])] {
            state = apply(
                &state,
                Action::RequireKeys {
                    requester: requester.into(),
                    keys: keys.into_iter().map(ResourceKey::from).collect(),
                    options: FetchOptions::default(),
                },
            );
        }
        let demand: Vec<_> = state.demand_set().into_iter().map(|k| k.to_string()).collect();
        assert_eq!(demand, ["/a", "/b", "/c"]);
    }

    #[test]
    fn begin_fetch_keeps_body_unless_cleared() {
        let now = Instant::now();
        let state = complete(&CacheState::new(NS), "/x", json!(1), now);

        let kept = begin(&state, "/x", FetchToken::mint(), now, false);
        assert!(kept.body("/x").is_some());
        assert!(matches!(kept.meta("/x"), Some(Meta::InFlight { .. })));

        let cleared = begin(&state, "/x", FetchToken::mint(), now, true);
        assert!(cleared.body("/x").is_none());
    }

    #[test]
    fn fail_fetch_keeps_last_body() {
        let now = Instant::now();
        let state = complete(&CacheState::new(NS), "/x", json!(1), now);
        let state = apply(
            &state,
            Action::FailFetch {
                key: "/x".into(),
                message: "boom".into(),
                expires_at: now,
                options: FetchOptions::default(),
            },
        );
        assert_eq!(state.meta("/x").and_then(Meta::error), Some("boom"));
        assert_eq!(state.body("/x").map(|b| b.as_ref().clone()), Some(json!(1)));
    }

    #[test]
    fn inject_with_failing_condition_is_unchanged() {
        let now = Instant::now();
        let state = complete(&CacheState::new(NS), "/x", json!({ "version": 3 }), now);
        let command = Command::new(
            NS,
            Action::InjectValue {
                key: "/x".into(),
                body: json!({ "version": 2 }),
                expires_at: now,
                options: FetchOptions::default(),
                merge: MergeStrategy::Replace,
                condition: Some(InjectCondition::new(|old, new| {
                    let version = |v: Option<&serde_json::Value>| {
                        v.and_then(|v| v["version"].as_u64()).unwrap_or(0)
                    };
                    version(Some(new)) > version(old)
                })),
            },
        );
        assert!(state.apply(&command).is_none());
    }

    #[test]
    fn inject_shallow_merges_into_old_body() {
        let now = Instant::now();
        let state = complete(&CacheState::new(NS), "/x", json!({ "a": 1, "b": 2 }), now);
        let state = apply(
            &state,
            Action::InjectValue {
                key: "/x".into(),
                body: json!({ "b": 3 }),
                expires_at: now,
                options: FetchOptions::default(),
                merge: MergeStrategy::ShallowMerge,
                condition: None,
            },
        );
        assert_eq!(
            state.body("/x").map(|b| b.as_ref().clone()),
            Some(json!({ "a": 1, "b": 3 }))
        );
        assert!(matches!(state.meta("/x"), Some(Meta::Fresh { .. })));
    }

    #[test]
    fn invalidate_removes_exactly_unkept_keys() {
        let now = Instant::now();
        let mut state = CacheState::new(NS);
        for key in ["/keep/1", "/keep/2", "/drop/1"] {
            state = complete(&state, key, json!(key), now);
        }
        state = begin(&state, "/drop/2", FetchToken::mint(), now, false);

        let next = apply(
            &state,
            Action::Invalidate {
                keep: Some(KeepPredicate::new(|key| key.starts_with("/keep"))),
            },
        );
        assert!(next.entry("/drop/1").is_none());
        assert!(next.entry("/drop/2").is_none());
        assert_eq!(next.entry("/keep/1"), state.entry("/keep/1"));
        assert_eq!(next.entry("/keep/2"), state.entry("/keep/2"));
    }

    #[test]
    fn invalidate_without_predicate_keeps_nothing() {
        let now = Instant::now();
        let state = complete(&CacheState::new(NS), "/x", json!(1), now);
        let next = apply(&state, Action::Invalidate { keep: None });
        assert_eq!(next.entries().count(), 0);
    }

    #[test]
    fn clear_all_keeps_requirements_and_suspension() {
        let now = Instant::now();
        let mut state = CacheState::new(NS);
        state = apply(
            &state,
            Action::RequireKeys {
                requester: "A".into(),
                keys: vec!["/x".into()],
                options: FetchOptions::default(),
            },
        );
        state = apply(&state, Action::SetSuspended(true));
        state = complete(&state, "/x", json!(1), now);

        let next = apply(&state, Action::ClearAll);
        assert_eq!(next.entries().count(), 0);
        assert!(next.requirement("A").is_some());
        assert!(next.is_suspended());
    }

    #[test]
    fn discard_stale_never_changes_state() {
        let state = CacheState::new(NS);
        let command = Command::new(
            NS,
            Action::DiscardStale {
                key: "/x".into(),
                token: FetchToken::mint(),
                kind: StaleKind::Success,
            },
        );
        assert!(state.apply(&command).is_none());
    }

    // ── should_fetch ──────────────────────────────────────────────────────────

    #[test]
    fn should_fetch_unknown_key() {
        let state = CacheState::new(NS);
        assert!(state.should_fetch("/x", true, Instant::now()));
    }

    #[test]
    fn should_fetch_honors_ignore_expiration() {
        let now = Instant::now();
        let state = complete(&CacheState::new(NS), "/x", json!(1), now);
        assert!(!state.should_fetch("/x", true, now + Duration::from_secs(60)));
        assert!(state.should_fetch("/x", false, now + Duration::from_secs(60)));
    }

    #[test]
    fn should_fetch_suppresses_dog_pile() {
        let now = Instant::now();
        let deadline = now + Duration::from_secs(5);
        let state = begin(&CacheState::new(NS), "/x", FetchToken::mint(), deadline, false);
        assert!(!state.should_fetch("/x", false, now + Duration::from_millis(10)));
        assert!(state.should_fetch("/x", false, deadline));
    }

    #[test]
    fn should_fetch_after_expiry() {
        let now = Instant::now();
        let expires = now + Duration::from_secs(30);
        let state = complete(&CacheState::new(NS), "/x", json!(1), expires);
        assert!(!state.should_fetch("/x", false, expires - Duration::from_millis(1)));
        assert!(state.should_fetch("/x", false, expires + Duration::from_millis(1)));
    }

    // ── Store ─────────────────────────────────────────────────────────────────

    #[test]
    fn store_dispatch_reports_change() {
        let store = Store::new(NS);
        assert!(store.dispatch(Command::new(NS, Action::SetSuspended(true))));
        assert!(!store.dispatch(Command::new(NS, Action::SetSuspended(true))));
        assert!(store.snapshot().is_suspended());
    }

    #[test]
    fn store_dispatch_if_respects_precondition() {
        let store = Store::new(NS);
        let applied = store.dispatch_if(Command::new(NS, Action::SetSuspended(true)), |_| false);
        assert!(!applied);
        assert!(!store.snapshot().is_suspended());
    }

    #[test]
    fn store_predicates_may_read_the_store() {
        let store = Arc::new(Store::new(NS));
        store.dispatch(Command::new(
            NS,
            Action::CompleteFetch {
                key: "/a".into(),
                body: json!(1),
                expires_at: Instant::now(),
                options: FetchOptions::default(),
            },
        ));

        let reader = Arc::clone(&store);
        let keep = KeepPredicate::new(move |key| reader.snapshot().body(key).is_some());
        let command = Command::new(NS, Action::Invalidate { keep: Some(keep) });
        assert!(!store.dispatch_if(command, |_| store.snapshot().revision() == 1));
        assert!(store.snapshot().body("/a").is_some());
    }

    #[test]
    fn store_retries_when_a_write_lands_first() {
        let store = Store::new(NS);
        let evaluations = AtomicUsize::new(0);
        let command = Command::new(
            NS,
            Action::RequireKeys {
                requester: "A".into(),
                keys: vec!["/a".into()],
                options: FetchOptions::default(),
            },
        );

        let applied = store.dispatch_if(command, |_| {
            if evaluations.fetch_add(1, Ordering::SeqCst) == 0 {
                store.dispatch(Command::new(NS, Action::SetSuspended(true)));
            }
            true
        });
        assert!(applied);
        assert_eq!(evaluations.load(Ordering::SeqCst), 2);
        let state = store.snapshot();
        assert!(state.is_suspended());
        assert!(state.requirement("A").is_some());
        assert_eq!(state.revision(), 2);
    }

    #[test]
    fn store_notifies_subscribers() {
        let store = Store::new(NS);
        let mut rx = store.subscribe();
        assert!(!rx.has_changed().unwrap());
        store.dispatch(Command::new(NS, Action::SetSuspended(true)));
        assert!(rx.has_changed().unwrap());
        assert!(rx.borrow_and_update().is_suspended());
    }
}
