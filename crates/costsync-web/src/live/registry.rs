//! Connection registry for live clients
//!
//! Each open socket owns an outbound queue drained by its writer task. The
//! registry only holds the sending half, so pushes never wait on the network.

use costsync_types::ServerMessage;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Lifecycle of one live connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closing,
    Closed,
}

/// Work item for a connection's writer task
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Text(String),
    Ping,
    Close,
}

pub struct ClientHandle {
    sender: mpsc::UnboundedSender<Outbound>,
    /// Cleared by each sweep, set again by any inbound traffic
    alive: AtomicBool,
    state: Mutex<ConnectionState>,
    last_seen: Mutex<Instant>,
}

impl ClientHandle {
    fn new(sender: mpsc::UnboundedSender<Outbound>) -> Self {
        Self {
            sender,
            alive: AtomicBool::new(true),
            state: Mutex::new(ConnectionState::Connecting),
            last_seen: Mutex::new(Instant::now()),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.lock() = state;
    }

    pub fn last_seen(&self) -> Instant {
        *self.last_seen.lock()
    }

    fn is_closed(&self) -> bool {
        self.state() == ConnectionState::Closed || self.sender.is_closed()
    }

    fn push(&self, outbound: Outbound) -> bool {
        self.sender.send(outbound).is_ok()
    }
}

/// Outcome of a broadcast
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub sent: usize,
    pub failed: usize,
    /// Entries found closed and dropped
    pub removed: usize,
}

/// Outcome of a heartbeat sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub pinged: usize,
    pub closed: usize,
}

pub struct Registry {
    clients: DashMap<u64, Arc<ClientHandle>>,
    next_id: AtomicU64,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self {
            clients: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register an open connection and return its id
    pub fn register(&self, sender: mpsc::UnboundedSender<Outbound>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let handle = Arc::new(ClientHandle::new(sender));
        handle.set_state(ConnectionState::Open);
        self.clients.insert(id, handle);
        debug!(connection = id, clients = self.clients.len(), "Client registered");
        id
    }

    pub fn unregister(&self, id: u64) {
        if let Some((_, handle)) = self.clients.remove(&id) {
            handle.set_state(ConnectionState::Closed);
            debug!(connection = id, clients = self.clients.len(), "Client removed");
        }
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    pub fn state(&self, id: u64) -> Option<ConnectionState> {
        self.clients.get(&id).map(|handle| handle.state())
    }

    /// Record inbound traffic (pong, ping frame or request)
    pub fn touch(&self, id: u64) {
        if let Some(handle) = self.clients.get(&id) {
            handle.alive.store(true, Ordering::SeqCst);
            *handle.last_seen.lock() = Instant::now();
        }
    }

    /// Queue a message for one client
    pub fn send_to(&self, id: u64, message: &ServerMessage) -> bool {
        let Some(handle) = self.clients.get(&id).map(|h| Arc::clone(h.value())) else {
            return false;
        };
        match message.to_text() {
            Ok(text) => handle.push(Outbound::Text(text)),
            Err(e) => {
                warn!(connection = id, error = %e, "Could not encode frame");
                false
            }
        }
    }

    /// Best-effort send to every open client.
    ///
    /// Closed entries are dropped; a failing recipient is counted and does not
    /// stop the rest.
    pub fn broadcast(&self, message: &ServerMessage) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        let text = match message.to_text() {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "Could not encode broadcast frame");
                return report;
            }
        };

        let mut dead = Vec::new();
        for entry in self.clients.iter() {
            let handle = entry.value();
            if handle.is_closed() {
                dead.push(*entry.key());
                continue;
            }
            if handle.push(Outbound::Text(text.clone())) {
                report.sent += 1;
            } else {
                report.failed += 1;
                dead.push(*entry.key());
            }
        }

        for id in dead {
            if self.clients.remove(&id).is_some() {
                report.removed += 1;
            }
        }
        if report.failed > 0 {
            warn!(failed = report.failed, sent = report.sent, "Broadcast partially failed");
        }
        report
    }

    /// Close connections that stayed silent since the previous sweep and
    /// ping the others
    pub fn sweep(&self) -> SweepReport {
        let mut report = SweepReport::default();
        let mut stale = Vec::new();

        for entry in self.clients.iter() {
            let handle = entry.value();
            if !handle.alive.swap(false, Ordering::SeqCst) || handle.is_closed() {
                stale.push(*entry.key());
                continue;
            }
            if handle.push(Outbound::Ping) {
                report.pinged += 1;
            } else {
                stale.push(*entry.key());
            }
        }

        for id in stale {
            if let Some((_, handle)) = self.clients.remove(&id) {
                handle.set_state(ConnectionState::Closing);
                handle.push(Outbound::Close);
                handle.set_state(ConnectionState::Closed);
                report.closed += 1;
                debug!(connection = id, "Unresponsive client closed");
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pong() -> ServerMessage {
        ServerMessage::Pong { message_id: None }
    }

    #[test]
    fn test_ids_are_monotonic() {
        let registry = Registry::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let a = registry.register(tx.clone());
        let b = registry.register(tx);
        assert_eq!(a, 1);
        assert_eq!(b, 2);
        assert_eq!(registry.state(a), Some(ConnectionState::Open));

        registry.unregister(a);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.state(a), None);
    }

    #[test]
    fn test_broadcast_drops_closed_clients() {
        let registry = Registry::new();
        let (tx_live, mut rx_live) = mpsc::unbounded_channel();
        let (tx_gone, rx_gone) = mpsc::unbounded_channel();
        registry.register(tx_live);
        registry.register(tx_gone);
        drop(rx_gone);

        let report = registry.broadcast(&pong());
        assert_eq!(report.sent, 1);
        assert_eq!(report.removed, 1);
        assert_eq!(registry.len(), 1);
        assert_eq!(
            rx_live.try_recv().unwrap(),
            Outbound::Text(r#"{"type":"pong"}"#.to_string())
        );
    }

    #[test]
    fn test_sweep_closes_silent_clients() {
        let registry = Registry::new();
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        let a = registry.register(tx_a);
        let b = registry.register(tx_b);

        // First sweep: both were alive, both pinged
        assert_eq!(registry.sweep(), SweepReport { pinged: 2, closed: 0 });
        assert_eq!(rx_a.try_recv().unwrap(), Outbound::Ping);
        assert_eq!(rx_b.try_recv().unwrap(), Outbound::Ping);

        // Only `a` answers
        registry.touch(a);
        assert_eq!(registry.sweep(), SweepReport { pinged: 1, closed: 1 });
        assert_eq!(registry.state(b), None);
        assert_eq!(rx_b.try_recv().unwrap(), Outbound::Close);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_send_to_unknown_client() {
        let registry = Registry::new();
        assert!(!registry.send_to(99, &pong()));
    }
}
