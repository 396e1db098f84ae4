//! In-flight request correlation for the LSP connection.
//!
//! Each outgoing request registers a one-slot delivery channel under its
//! identifier; the background reader hands responses to the matching slot.
//! The registry is instance-scoped (one per connection) and safe for
//! concurrent registration, delivery and removal.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::{oneshot, watch};
use tracing::{debug, warn};

use crate::protocol::{normalize_id, JsonRpcResponse};

use super::client::LspError;

/// Default request timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Tracks pending requests and delivers their responses.
///
/// Identifiers are strictly increasing and never reused for the lifetime of
/// a connection. At most one response is ever delivered per identifier: the
/// pending entry is removed on delivery, timeout and cancellation alike, so
/// a late response for an already-resolved id is dropped.
pub struct RequestRegistry {
    /// Monotonically increasing request ID counter.
    next_id: AtomicI64,
    /// Pending requests awaiting a response, keyed by normalized id.
    pending: Mutex<HashMap<i64, oneshot::Sender<JsonRpcResponse>>>,
    /// Request timeout duration.
    timeout: Duration,
    /// Connection-wide cancellation signal. Flips to true exactly once.
    cancel_tx: watch::Sender<bool>,
}

impl RequestRegistry {
    pub fn new() -> Self {
        Self::with_timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    /// Create a registry with a non-default timeout. Used by tests; the
    /// production timeout is fixed at 30 seconds.
    pub fn with_timeout(timeout: Duration) -> Self {
        let (cancel_tx, _) = watch::channel(false);
        Self {
            next_id: AtomicI64::new(1),
            pending: Mutex::new(HashMap::new()),
            timeout,
            cancel_tx,
        }
    }

    /// Allocate the next identifier and register a delivery slot for it.
    pub fn register(&self) -> (i64, oneshot::Receiver<JsonRpcResponse>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .expect("pending map lock poisoned")
            .insert(id, tx);
        (id, rx)
    }

    /// Block until the response for `id` arrives, the timeout elapses, or
    /// the connection is cancelled. The pending entry is removed on every
    /// exit path.
    pub async fn wait(
        &self,
        id: i64,
        method: &str,
        rx: oneshot::Receiver<JsonRpcResponse>,
    ) -> Result<JsonRpcResponse, LspError> {
        let mut cancel_rx = self.cancel_tx.subscribe();
        if *cancel_rx.borrow() {
            self.remove(id);
            return Err(LspError::Cancelled);
        }

        tokio::select! {
            response = rx => {
                // Entry was removed by deliver() (or by cancel(), in which
                // case the sender was dropped and recv fails).
                response.map_err(|_| LspError::Cancelled)
            }
            _ = tokio::time::sleep(self.timeout) => {
                self.remove(id);
                Err(LspError::Timeout {
                    method: method.to_string(),
                    secs: self.timeout.as_secs(),
                })
            }
            _ = cancel_rx.changed() => {
                self.remove(id);
                Err(LspError::Cancelled)
            }
        }
    }

    /// Hand a response to whoever is waiting on its id.
    ///
    /// The raw id is normalized first, since decoding may change its numeric
    /// representation. Responses with no matching pending entry (already
    /// timed out, or unknown) are dropped with a diagnostic.
    pub fn deliver(&self, response: JsonRpcResponse) {
        let Some(id) = normalize_id(&response.id) else {
            warn!("Dropping response with non-numeric id: {:?}", response.id);
            return;
        };

        let sender = self
            .pending
            .lock()
            .expect("pending map lock poisoned")
            .remove(&id);

        match sender {
            Some(tx) => {
                // Receiver may have just timed out; nothing left to do then.
                if tx.send(response).is_err() {
                    debug!("Response for request {} arrived after caller gave up", id);
                }
            }
            None => {
                debug!("Dropping response for unknown or resolved request {}", id);
            }
        }
    }

    /// Remove a pending entry without delivering anything.
    pub fn remove(&self, id: i64) {
        self.pending
            .lock()
            .expect("pending map lock poisoned")
            .remove(&id);
    }

    /// Raise the connection-wide cancellation signal and fail all pending
    /// requests. Idempotent.
    pub fn cancel(&self) {
        let _ = self.cancel_tx.send(true);
        // Dropping the senders wakes every blocked waiter with a recv error.
        self.pending
            .lock()
            .expect("pending map lock poisoned")
            .clear();
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel_tx.borrow()
    }

    /// Number of requests currently awaiting a response.
    #[cfg(test)]
    pub fn pending_len(&self) -> usize {
        self.pending.lock().expect("pending map lock poisoned").len()
    }
}

impl Default for RequestRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    fn response_for(id: i64, result: serde_json::Value) -> JsonRpcResponse {
        JsonRpcResponse {
            jsonrpc: "2.0".to_string(),
            id: json!(id),
            result: Some(result),
            error: None,
        }
    }

    #[test]
    fn test_ids_strictly_increasing() {
        let registry = RequestRegistry::new();
        let (a, _rx_a) = registry.register();
        let (b, _rx_b) = registry.register();
        let (c, _rx_c) = registry.register();
        assert!(a < b && b < c);
        assert_eq!(registry.pending_len(), 3);
    }

    #[tokio::test]
    async fn test_deliver_resolves_waiter() {
        let registry = RequestRegistry::new();
        let (id, rx) = registry.register();

        registry.deliver(response_for(id, json!({"ok": true})));

        let resp = registry.wait(id, "test", rx).await.expect("should resolve");
        assert_eq!(resp.result, Some(json!({"ok": true})));
        assert_eq!(registry.pending_len(), 0);
    }

    #[tokio::test]
    async fn test_correlation_out_of_order_delivery() {
        let registry = Arc::new(RequestRegistry::new());

        const N: i64 = 8;
        let mut handles = Vec::new();
        let mut ids = Vec::new();

        for _ in 0..N {
            let (id, rx) = registry.register();
            ids.push(id);
            let registry = Arc::clone(&registry);
            handles.push(tokio::spawn(async move {
                let resp = registry.wait(id, "test", rx).await.expect("resolved");
                (id, resp.result.unwrap())
            }));
        }

        // Deliver responses in reverse send order.
        for &id in ids.iter().rev() {
            registry.deliver(response_for(id, json!({"for": id})));
        }

        for handle in handles {
            let (id, result) = handle.await.unwrap();
            assert_eq!(result, json!({"for": id}));
        }
        assert_eq!(registry.pending_len(), 0);
    }

    #[tokio::test]
    async fn test_timeout_removes_entry() {
        let registry = RequestRegistry::with_timeout(Duration::from_millis(20));
        let (id, rx) = registry.register();

        let err = registry.wait(id, "textDocument/rename", rx).await.unwrap_err();
        match err {
            LspError::Timeout { method, .. } => assert_eq!(method, "textDocument/rename"),
            other => panic!("Expected Timeout, got: {:?}", other),
        }
        assert_eq!(registry.pending_len(), 0);

        // A late response must not resurrect the entry.
        registry.deliver(response_for(id, json!(null)));
        assert_eq!(registry.pending_len(), 0);
    }

    #[tokio::test]
    async fn test_cancel_fails_blocked_waiters() {
        let registry = Arc::new(RequestRegistry::new());
        let (id, rx) = registry.register();

        let waiter = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move { registry.wait(id, "test", rx).await })
        };

        // Give the waiter a chance to block before cancelling.
        tokio::time::sleep(Duration::from_millis(10)).await;
        registry.cancel();

        let err = waiter.await.unwrap().unwrap_err();
        assert!(matches!(err, LspError::Cancelled));
        assert!(registry.is_cancelled());
        assert_eq!(registry.pending_len(), 0);
    }

    #[tokio::test]
    async fn test_wait_after_cancel_fails_immediately() {
        let registry = RequestRegistry::new();
        registry.cancel();

        let (id, rx) = registry.register();
        let err = registry.wait(id, "test", rx).await.unwrap_err();
        assert!(matches!(err, LspError::Cancelled));
        assert_eq!(registry.pending_len(), 0);
    }

    #[tokio::test]
    async fn test_deliver_unknown_id_is_dropped() {
        let registry = RequestRegistry::new();
        // No registration for id 99; must not panic or leak.
        registry.deliver(response_for(99, json!(null)));
        assert_eq!(registry.pending_len(), 0);
    }

    #[tokio::test]
    async fn test_deliver_float_id_normalized() {
        let registry = RequestRegistry::new();
        let (id, rx) = registry.register();

        // Simulate a decoder that turned the integer id into a float.
        let response = JsonRpcResponse {
            jsonrpc: "2.0".to_string(),
            id: json!(id as f64),
            result: Some(json!("ok")),
            error: None,
        };
        registry.deliver(response);

        let resp = registry.wait(id, "test", rx).await.expect("resolved");
        assert_eq!(resp.result, Some(json!("ok")));
    }
}
