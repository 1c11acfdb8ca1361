//! Scripted transport for unit tests: every call parks until the test
//! resolves it by index, so completion order is fully controlled.

use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::oneshot;

use crate::store::ResourceKey;
use crate::transport::{FetchFuture, FetchRequest, Transport, TransportError};

type Reply = Result<Value, TransportError>;

struct Call {
    key: ResourceKey,
    request: FetchRequest,
    reply: Option<oneshot::Sender<Reply>>,
}

#[derive(Clone, Default)]
pub(crate) struct ScriptedTransport {
    calls: Arc<Mutex<Vec<Call>>>,
}

impl ScriptedTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn as_dyn(&self) -> Arc<dyn Transport> {
        Arc::new(self.clone())
    }

    /// Keys requested so far, in call order.
    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|call| call.key.to_string())
            .collect()
    }

    pub(crate) fn request(&self, index: usize) -> FetchRequest {
        self.calls.lock().unwrap()[index].request.clone()
    }

    pub(crate) fn resolve(&self, index: usize, reply: Reply) {
        let sender = self.calls.lock().unwrap()[index]
            .reply
            .take()
            .expect("call already resolved");
        let _ = sender.send(reply);
    }
}

impl Transport for ScriptedTransport {
    fn fetch(&self, key: &ResourceKey, request: FetchRequest) -> FetchFuture {
        let (tx, rx) = oneshot::channel();
        self.calls.lock().unwrap().push(Call {
            key: key.clone(),
            request,
            reply: Some(tx),
        });
        Box::pin(async move {
            rx.await
                .unwrap_or_else(|_| Err(TransportError::Network("call dropped".into())))
        })
    }
}
