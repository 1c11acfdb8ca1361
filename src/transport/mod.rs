//! Transport seam — how the cache reaches the network.
//!
//! The cache never performs I/O itself. Every fetch goes through a
//! [`Transport`], which receives the resource key, the caller's transport
//! options and an [`IsCurrent`] check, and eventually resolves to a JSON body
//! or a [`TransportError`]. Retry and credential refresh live entirely on the
//! transport side of this seam.
//!
//! Any async closure of the right shape is a transport:
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use demand_cache::{FetchRequest, ResourceKey, Transport};
//!
//! let transport: Arc<dyn Transport> = Arc::new(|key: ResourceKey, _req: FetchRequest| async move {
//!     Ok(serde_json::json!({ "url": key.as_str() }))
//! });
//! ```

use std::pin::Pin;

use serde_json::{Map, Value};
use thiserror::Error;

use crate::coordinator::IsCurrent;
use crate::store::ResourceKey;

/// Boxed future returned by [`Transport::fetch`].
pub type FetchFuture = Pin<Box<dyn Future<Output = Result<Value, TransportError>> + Send>>;

/// Errors a transport may resolve with.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Credentials were rejected. A transport may refresh and retry on its
    /// own; this variant is what it reports when it gives up.
    #[error("unauthorized: {message}")]
    Unauthorized { message: String },

    /// The server answered with a non-success status.
    #[error("request failed with status {status}: {message}")]
    Status { status: u16, message: String },

    /// The request never produced a response.
    #[error("network error: {0}")]
    Network(String),

    /// The response body was not valid JSON.
    #[error("invalid response body: {0}")]
    Decode(#[from] serde_json::Error),

    /// Any other failure, described by the transport.
    #[error("{0}")]
    Other(String),
}

impl TransportError {
    /// Whether this failure stems from rejected credentials.
    pub fn is_credential_error(&self) -> bool {
        matches!(
            self,
            TransportError::Unauthorized { .. } | TransportError::Status { status: 401, .. }
        )
    }
}

/// Per-call input handed to a transport.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    params: Map<String, Value>,
    is_current: IsCurrent,
}

impl FetchRequest {
    pub(crate) fn new(params: Map<String, Value>, is_current: IsCurrent) -> Self {
        Self { params, is_current }
    }

    /// Transport options from [`FetchOptions::params`](crate::FetchOptions::params).
    pub fn params(&self) -> &Map<String, Value> {
        &self.params
    }

    /// Whether this attempt is still the newest for its key. A transport may
    /// use it to skip a retry whose result would be discarded anyway.
    pub fn is_current(&self) -> bool {
        self.is_current.check()
    }

    /// The underlying check, for handing to code that outlives this request.
    pub fn currency(&self) -> &IsCurrent {
        &self.is_current
    }
}

/// The network collaborator the cache fetches through.
///
/// # Contract
///
/// - `fetch` must not block; the returned future is spawned on the Tokio
///   runtime and may be polled on any worker thread.
/// - The future must eventually resolve. The cache applies no timeout of its
///   own; the dog-pile window only limits how long duplicates are suppressed.
pub trait Transport: Send + Sync + 'static {
    /// Starts fetching `key`.
    fn fetch(&self, key: &ResourceKey, request: FetchRequest) -> FetchFuture;
}

impl<T, F> Transport for T
where
    T: Fn(ResourceKey, FetchRequest) -> F + Send + Sync + 'static,
    F: Future<Output = Result<Value, TransportError>> + Send + 'static,
{
    fn fetch(&self, key: &ResourceKey, request: FetchRequest) -> FetchFuture {
        Box::pin((self)(key.clone(), request))
    }
}
