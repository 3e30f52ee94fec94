//! Broker producers

use async_trait::async_trait;
use costsync_types::CostMessage;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProducerError {
    /// The broker cannot be reached; the connected gate must be cleared
    #[error("Broker unreachable: {0}")]
    Disconnected(String),

    #[error("Broker rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
}

impl ProducerError {
    pub fn is_disconnect(&self) -> bool {
        matches!(self, ProducerError::Disconnected(_))
    }
}

/// Publishes keyed messages to the cost-update topic
#[async_trait]
pub trait MessageProducer: Send + Sync {
    /// Startup handshake
    async fn connect(&self) -> Result<(), ProducerError>;

    async fn send(&self, key: &str, message: &CostMessage) -> Result<(), ProducerError>;

    /// Human-readable target for logs
    fn describe(&self) -> String;
}

/// Stand-in when no broker is configured; never connects
pub struct OfflineProducer;

#[async_trait]
impl MessageProducer for OfflineProducer {
    async fn connect(&self) -> Result<(), ProducerError> {
        Err(ProducerError::Disconnected("no broker configured".into()))
    }

    async fn send(&self, _key: &str, _message: &CostMessage) -> Result<(), ProducerError> {
        Err(ProducerError::Disconnected("no broker configured".into()))
    }

    fn describe(&self) -> String {
        "offline".to_string()
    }
}

/// Records messages in memory
pub struct MemoryProducer {
    online: AtomicBool,
    sent: Mutex<Vec<(String, CostMessage)>>,
    send_calls: AtomicUsize,
    failing_calls: Mutex<HashSet<usize>>,
}

impl Default for MemoryProducer {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProducer {
    pub fn new() -> Self {
        Self {
            online: AtomicBool::new(true),
            sent: Mutex::new(Vec::new()),
            send_calls: AtomicUsize::new(0),
            failing_calls: Mutex::new(HashSet::new()),
        }
    }

    /// Offline producers fail both the handshake and every send as disconnected
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// Reject the send call with this zero-based index
    pub fn fail_call(&self, index: usize) {
        self.failing_calls.lock().insert(index);
    }

    /// Accepted messages with their keys, in send order
    pub fn sent(&self) -> Vec<(String, CostMessage)> {
        self.sent.lock().clone()
    }

    pub fn send_calls(&self) -> usize {
        self.send_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessageProducer for MemoryProducer {
    async fn connect(&self) -> Result<(), ProducerError> {
        if self.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ProducerError::Disconnected("memory producer offline".into()))
        }
    }

    async fn send(&self, key: &str, message: &CostMessage) -> Result<(), ProducerError> {
        let call = self.send_calls.fetch_add(1, Ordering::SeqCst);
        if !self.online.load(Ordering::SeqCst) {
            return Err(ProducerError::Disconnected("memory producer offline".into()));
        }
        if self.failing_calls.lock().contains(&call) {
            return Err(ProducerError::Rejected {
                status: 500,
                message: format!("injected failure on call {}", call),
            });
        }
        self.sent.lock().push((key.to_string(), message.clone()));
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}
