//! # demand-cache
//!
//! A client-side fetch cache driven by declared demand. Components say which
//! resources (by URL) they currently need; the cache fetches each one at most
//! once per staleness window, de-duplicates concurrent requests, and never
//! lets an out-of-order response overwrite a newer one.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use demand_cache::{Cache, FetchOptions, FetchRequest, ResourceKey, Transport};
//!
//! #[tokio::main]
//! async fn main() {
//!     let cache = Cache::new("reconciliation");
//!     let transport: Arc<dyn Transport> =
//!         Arc::new(|key: ResourceKey, _req: FetchRequest| async move {
//!             Ok(serde_json::json!({ "url": key.as_str() }))
//!         });
//!
//!     // On mount, and whenever the wanted keys change:
//!     let registration = cache.register_requirement(
//!         "accounts-table",
//!         &transport,
//!         ["/api/accounts"],
//!         &FetchOptions::default(),
//!     );
//!     for fetch in registration.fetches {
//!         fetch.outcome().await;
//!     }
//!     println!("{:?}", cache.get("/api/accounts"));
//!
//!     // On teardown:
//!     cache.unregister_requirement("accounts-table");
//! }
//! ```

// ── Core ──────────────────────────────────────────────────────────────────────
pub mod cache;
pub mod error;
pub mod store;
pub mod transport;

// ── Operations on a cache ─────────────────────────────────────────────────────
pub mod background;
pub mod control;
pub mod coordinator;
pub mod registry;

#[cfg(test)]
mod test_support;

// ── Convenience re-exports ────────────────────────────────────────────────────
pub use background::Revalidator;
pub use cache::{Cache, CacheConfig};
pub use control::InjectOptions;
pub use coordinator::{FetchHandle, FetchOutcome, IsCurrent};
pub use error::CacheError;
pub use registry::Registration;
pub use store::{
    Action, CacheState, Command, Entry, FetchOptions, FetchToken, InjectCondition, KeepPredicate,
    MergeStrategy, Meta, Requirement, RequesterId, ResourceKey, Store,
};
pub use transport::{FetchFuture, FetchRequest, Transport, TransportError};
