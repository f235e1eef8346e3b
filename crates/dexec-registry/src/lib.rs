//! Connection registry: fans order state transitions back to the one client
//! socket streaming that order.
//!
//! Single-process, in-memory map of `order_id` to a registered connection.
//! The registry does not queue: publishing for an order with no live
//! registration drops the update silently. The stream endpoint compensates
//! for late connects by replaying current status on attach.
//!
//! The map lock is never held across a socket write. `publish` clones the
//! connection's sender out under the read lock, releases it, then sends;
//! delivery order per order id is preserved by the connection's channel and
//! by there being a single writer (the owning worker) per order.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};
use uuid::Uuid;

use dexec_schemas::{OrderStatus, StreamFrame};

/// Serialized frames flow to the socket task through this sender; dropping it
/// tells the task to close the socket.
type FrameSender = mpsc::UnboundedSender<String>;

struct Connection {
    conn_id: Uuid,
    tx: FrameSender,
}

/// Cloneable process-wide handle.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    inner: Arc<RwLock<HashMap<Uuid, Connection>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the socket for an order, replacing any previous registration
    /// (the evicted connection's receiver closes, which closes its socket).
    ///
    /// Returns the connection id for [`deregister`](Self::deregister) and the
    /// receiving end the socket task drains.
    pub async fn register(&self, order_id: Uuid) -> (Uuid, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let conn_id = Uuid::new_v4();

        let mut map = self.inner.write().await;
        if map.insert(order_id, Connection { conn_id, tx }).is_some() {
            debug!(order_id = %order_id, "replaced existing stream registration");
        }
        (conn_id, rx)
    }

    /// Remove a registration, but only if it still belongs to `conn_id`; a
    /// stale socket's cleanup must not evict its replacement.
    pub async fn deregister(&self, order_id: Uuid, conn_id: Uuid) {
        let mut map = self.inner.write().await;
        if map.get(&order_id).is_some_and(|c| c.conn_id == conn_id) {
            map.remove(&order_id);
        }
    }

    /// Publish a status transition to the order's socket, if one is attached.
    ///
    /// Serialization or send failures deregister the connection and are
    /// otherwise swallowed: a dead client must never crash a worker.
    pub async fn publish(&self, order_id: Uuid, status: OrderStatus, data: Option<Value>) {
        let mut frame = StreamFrame::status(order_id, status);
        frame.data = data;
        self.publish_frame(frame).await;
    }

    /// Publish a pre-built frame (anchor and error frames from the stream
    /// endpoint go through here so they share the per-order channel ordering).
    pub async fn publish_frame(&self, frame: StreamFrame) {
        let order_id = frame.order_id;

        let target = {
            let map = self.inner.read().await;
            map.get(&order_id).map(|c| (c.conn_id, c.tx.clone()))
        };
        let Some((conn_id, tx)) = target else {
            debug!(order_id = %order_id, "no stream attached; update dropped");
            return;
        };

        let payload = match serde_json::to_string(&frame) {
            Ok(p) => p,
            Err(e) => {
                warn!(order_id = %order_id, error = %e, "frame serialization failed; dropping connection");
                self.deregister(order_id, conn_id).await;
                return;
            }
        };

        if tx.send(payload).is_err() {
            // Receiver gone: the socket task already exited.
            self.deregister(order_id, conn_id).await;
        }
    }

    /// Actively close the order's stream, if still present.
    pub async fn close(&self, order_id: Uuid) {
        let mut map = self.inner.write().await;
        if map.remove(&order_id).is_some() {
            debug!(order_id = %order_id, "stream closed");
        }
    }

    /// Close the order's stream after a grace period, leaving time for the
    /// terminal frame to flush.
    pub fn close_after(&self, order_id: Uuid, grace: Duration) {
        let registry = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            registry.close(order_id).await;
        });
    }

    /// Number of live registrations (health-check introspection).
    pub async fn count(&self) -> usize {
        self.inner.read().await.len()
    }
}
