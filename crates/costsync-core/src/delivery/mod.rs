//! Delivery of reconciliation results to the message broker

pub mod gateway;
pub mod metadata;
pub mod producer;
pub mod rest_proxy;

use async_trait::async_trait;
use costsync_types::CostItem;

pub use gateway::DeliveryGateway;
pub use metadata::DeliveryMetadata;
pub use producer::{MemoryProducer, MessageProducer, OfflineProducer, ProducerError};
pub use rest_proxy::RestProxyProducer;

/// Result of one delivery call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryOutcome {
    pub success: bool,
    /// Items accepted by the broker
    pub count: usize,
}

impl DeliveryOutcome {
    pub fn failed() -> Self {
        Self {
            success: false,
            count: 0,
        }
    }
}

/// Receives the staged items of a reconciliation run
#[async_trait]
pub trait CostDelivery: Send + Sync {
    async fn deliver(&self, items: &[CostItem], metadata: &DeliveryMetadata) -> DeliveryOutcome;
}

/// Records deliveries without sending anything
#[derive(Default)]
pub struct RecordingDelivery {
    calls: parking_lot::Mutex<Vec<(Vec<CostItem>, DeliveryMetadata)>>,
}

impl RecordingDelivery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<(Vec<CostItem>, DeliveryMetadata)> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl CostDelivery for RecordingDelivery {
    async fn deliver(&self, items: &[CostItem], metadata: &DeliveryMetadata) -> DeliveryOutcome {
        self.calls.lock().push((items.to_vec(), metadata.clone()));
        DeliveryOutcome {
            success: true,
            count: items.len(),
        }
    }
}
