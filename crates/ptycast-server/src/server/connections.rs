//! Connection membership and best-effort fan-out.
//!
//! Each attached observer gets an ordered outbound queue drained by its own
//! writer task. The queue's sender is handed back to the connection handler,
//! which delivers replay and live output through it with backpressure; the
//! manager itself only carries targeted replies and state broadcasts.
//! Broadcast serializes a message once, attempts delivery to every
//! connection, and evicts any connection whose queue is closed or full after
//! the sweep: a hung or gone peer is dropped on the next broadcast instead
//! of blocking the others.

use ptycast_core::ServerMessage;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::debug;

pub type ConnId = u64;

/// Per-connection outbound queue depth. A connection this far behind on a
/// state broadcast is considered unresponsive and evicted.
const OUTBOUND_QUEUE: usize = 256;

pub struct ConnectionManager {
    connections: Mutex<HashMap<ConnId, mpsc::Sender<String>>>,
    next_id: AtomicU64,
}

impl ConnectionManager {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            connections: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        })
    }

    /// Admit a connection. The caller drains the returned queue into its
    /// transport and keeps the sender for its own ordered deliveries.
    pub fn connect(&self) -> (ConnId, mpsc::Sender<String>, mpsc::Receiver<String>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE);
        if let Ok(mut conns) = self.connections.lock() {
            conns.insert(id, tx.clone());
            debug!(conn_id = id, total = conns.len(), "connection attached");
        }
        (id, tx, rx)
    }

    pub fn disconnect(&self, id: ConnId) {
        if let Ok(mut conns) = self.connections.lock() {
            if conns.remove(&id).is_some() {
                debug!(conn_id = id, total = conns.len(), "connection detached");
            }
        }
    }

    /// Deliver to a single connection; best-effort, silently dropped when
    /// its queue is closed or momentarily full. Only `broadcast` evicts.
    pub fn send_json(&self, id: ConnId, message: &ServerMessage) {
        let Ok(text) = message.encode() else { return };
        let Ok(conns) = self.connections.lock() else {
            return;
        };
        if let Some(tx) = conns.get(&id) {
            if tx.try_send(text).is_err() {
                debug!(conn_id = id, "targeted send dropped");
            }
        }
    }

    /// Serialize once, attempt delivery to every connection, evict the
    /// failures after the sweep.
    pub fn broadcast(&self, message: &ServerMessage) {
        let Ok(text) = message.encode() else { return };
        let Ok(mut conns) = self.connections.lock() else {
            return;
        };

        let mut dead: Vec<ConnId> = Vec::new();
        for (&id, tx) in conns.iter() {
            if tx.try_send(text.clone()).is_err() {
                dead.push(id);
            }
        }
        for id in dead {
            conns.remove(&id);
            debug!(conn_id = id, "connection evicted during broadcast");
        }
    }

    pub fn connection_count(&self) -> usize {
        self.connections.lock().map(|c| c.len()).unwrap_or(0)
    }

    /// Process-exit teardown: drop the membership map. Connection tasks end
    /// with their sockets.
    pub fn shutdown(&self) {
        if let Ok(mut conns) = self.connections.lock() {
            conns.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ptycast_core::SessionStatus;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn broadcast_skips_and_evicts_closed_connections() {
        let conns = ConnectionManager::new();
        let (_id_a, _tx_a, mut rx_a) = conns.connect();
        let (_id_b, _tx_b, rx_b) = conns.connect();
        let (_id_c, _tx_c, mut rx_c) = conns.connect();
        drop(rx_b); // peer went away without a disconnect event

        conns.broadcast(&ServerMessage::Output { data: "x".into() });

        let got_a = timeout(Duration::from_secs(1), rx_a.recv()).await.unwrap();
        let got_c = timeout(Duration::from_secs(1), rx_c.recv()).await.unwrap();
        assert_eq!(got_a.as_deref(), Some(r#"{"type":"output","payload":{"data":"x"}}"#));
        assert_eq!(got_a, got_c);

        // The closed peer is gone from membership by the end of the sweep.
        assert_eq!(conns.connection_count(), 2);
    }

    #[tokio::test]
    async fn send_json_targets_one_connection_only() {
        let conns = ConnectionManager::new();
        let (id_a, _tx_a, mut rx_a) = conns.connect();
        let (_id_b, _tx_b, mut rx_b) = conns.connect();

        conns.send_json(id_a, &ServerMessage::Pong {});

        let got_a = timeout(Duration::from_secs(1), rx_a.recv()).await.unwrap();
        assert_eq!(got_a.as_deref(), Some(r#"{"type":"pong","payload":{}}"#));
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn full_queue_drops_targeted_sends_without_eviction() {
        let conns = ConnectionManager::new();
        let (id, _tx, mut rx) = conns.connect();
        for _ in 0..=OUTBOUND_QUEUE {
            conns.send_json(id, &ServerMessage::Pong {});
        }

        // The overflow is dropped, but the connection keeps its membership
        // and its already-queued messages.
        assert_eq!(conns.connection_count(), 1);
        let got = timeout(Duration::from_secs(1), rx.recv()).await.unwrap();
        assert_eq!(got.as_deref(), Some(r#"{"type":"pong","payload":{}}"#));
    }

    #[tokio::test]
    async fn shutdown_clears_membership() {
        let conns = ConnectionManager::new();
        let (_id, tx, mut rx) = conns.connect();
        conns.shutdown();
        assert_eq!(conns.connection_count(), 0);
        // The handler's own sender is the last one alive; dropping it
        // closes the queue.
        drop(tx);
        assert_eq!(rx.recv().await, None);

        conns.broadcast(&ServerMessage::Status {
            status: SessionStatus::Stopped,
            pid: None,
            message: None,
        });
    }
}
