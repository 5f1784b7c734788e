//! Response routing for the multiplexed request socket
//!
//! Callers register a single-delivery waiter under their request ID before
//! writing the frame; the receive loop hands each incoming response to the
//! matching waiter. Responses without a waiter are late and dropped.

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::frames::ResponseFrame;

pub(crate) struct ResponseRouter {
    waiters: Mutex<HashMap<String, oneshot::Sender<ResponseFrame>>>,
}

impl ResponseRouter {
    pub(crate) fn new() -> Self {
        Self {
            waiters: Mutex::new(HashMap::new()),
        }
    }

    /// Register a waiter for the given request ID
    ///
    /// Panics if a waiter is already registered under the same ID: request
    /// IDs must be unique among in-flight requests.
    pub(crate) fn register(&self, request_id: &str) -> oneshot::Receiver<ResponseFrame> {
        let (tx, rx) = oneshot::channel();

        let mut waiters = self.waiters.lock();
        if waiters.insert(request_id.to_string(), tx).is_some() {
            panic!("duplicate request ID registered: {request_id}");
        }

        rx
    }

    /// Deliver a response to its waiter, if one is still registered
    pub(crate) fn deliver(&self, response: ResponseFrame) {
        let sender = self.waiters.lock().remove(&response.request.request_id);

        // No waiter, or the waiter stopped listening: late response, drop it.
        if let Some(tx) = sender {
            let _ = tx.send(response);
        }
    }

    /// Remove a waiter; idempotent
    pub(crate) fn unregister(&self, request_id: &str) {
        self.waiters.lock().remove(request_id);
    }

    /// Drop all waiters; blocked callers observe the loss immediately
    pub(crate) fn clear(&self) {
        self.waiters.lock().clear();
    }
}
