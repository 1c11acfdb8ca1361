//! Simulated reconciliation dashboard: two views share demand on the same
//! resources, a mutation injects its result, and a credential switch
//! suspends and resumes the pipeline.
//!
//! Run with `RUST_LOG=demand_cache=debug cargo run --example dashboard`.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use demand_cache::{
    Cache, CacheConfig, FetchOptions, FetchRequest, InjectOptions, MergeStrategy, ResourceKey,
    Revalidator, Transport, TransportError,
};
use serde_json::json;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn transport() -> Arc<dyn Transport> {
    let served = Arc::new(AtomicU32::new(0));
    Arc::new(move |key: ResourceKey, request: FetchRequest| {
        let served = Arc::clone(&served);
        async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            if !request.is_current() {
                return Err(TransportError::Other("superseded".into()));
            }
            if key.as_str().contains("forbidden") {
                return Err(TransportError::Unauthorized {
                    message: "token expired".into(),
                });
            }
            let n = served.fetch_add(1, Ordering::Relaxed);
            Ok(json!({ "url": key.as_str(), "serial": n, "params": request.params() }))
        }
    })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = CacheConfig::default().success_ttl(Duration::from_secs(2));
    let cache = Cache::with_config("reconciliation", config)?;
    let transport = transport();
    let _revalidator = Revalidator::spawn(&cache, Arc::clone(&transport), Duration::from_secs(1));

    // Two views mount and declare overlapping demand.
    let table = cache.register_requirement(
        "matches-table",
        &transport,
        ["/api/matches?page=1", "/api/accounts"],
        &FetchOptions::default().keep_fresh(true),
    );
    let sidebar = cache.register_requirement(
        "sidebar",
        &transport,
        ["/api/accounts", "/api/forbidden"],
        &FetchOptions::default(),
    );
    info!(
        table = table.fetches.len(),
        sidebar = sidebar.fetches.len(),
        "views mounted"
    );
    for fetch in table.fetches.into_iter().chain(sidebar.fetches) {
        let key = fetch.key().clone();
        info!(%key, outcome = ?fetch.outcome().await, "fetch settled");
    }
    info!(error = ?cache.get_error("/api/forbidden"), "sidebar error state");

    // A mutation returns the updated match; merge it into the cached page.
    cache.inject(
        "/api/matches?page=1",
        json!({ "status": "reconciled" }),
        InjectOptions::default().merge(MergeStrategy::ShallowMerge),
    );
    info!(body = ?cache.get("/api/matches?page=1"), "after mutation");

    // Credential switch: quiesce, drop everything, resume, re-register.
    let mut changes = cache.subscribe();
    cache.suspend();
    cache.clear();
    cache.resume();
    while changes.changed().await.is_ok() {
        if !changes.borrow_and_update().is_suspended() {
            break;
        }
    }
    let remount = cache.register_requirement(
        "matches-table",
        &transport,
        ["/api/matches?page=1", "/api/accounts"],
        &FetchOptions::default().keep_fresh(true),
    );
    info!(fetches = remount.fetches.len(), "re-registered after resume");

    tokio::time::sleep(Duration::from_secs(3)).await;
    info!(demand = ?cache.demand_set(), "final demand set");
    cache.unregister_requirement("matches-table");
    cache.unregister_requirement("sidebar");
    Ok(())
}
