//! Batched, gated publication of cost items

use super::metadata::DeliveryMetadata;
use super::producer::MessageProducer;
use super::{CostDelivery, DeliveryOutcome};
use crate::config::BrokerConfig;
use crate::event::{DataEvent, EventBus};
use async_trait::async_trait;
use costsync_types::{CostItem, CostMessage};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

pub struct DeliveryGateway {
    producer: Arc<dyn MessageProducer>,
    config: BrokerConfig,
    /// Set by a successful handshake, cleared on an observed disconnect
    connected: AtomicBool,
    events: EventBus,
}

impl DeliveryGateway {
    pub fn new(producer: Arc<dyn MessageProducer>, config: BrokerConfig, events: EventBus) -> Self {
        Self {
            producer,
            config,
            connected: AtomicBool::new(false),
            events,
        }
    }

    /// Run the producer handshake; returns the resulting gate state
    pub async fn connect(&self) -> bool {
        match self.producer.connect().await {
            Ok(()) => {
                info!(target = %self.producer.describe(), "Message producer connected");
                self.set_connected(true);
                true
            }
            Err(e) => {
                warn!(target = %self.producer.describe(), error = %e, "Message producer handshake failed");
                self.set_connected(false);
                false
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn set_connected(&self, connected: bool) {
        let previous = self.connected.swap(connected, Ordering::SeqCst);
        if previous != connected {
            self.events
                .publish(DataEvent::ProducerStatusChanged(connected));
        }
    }

    /// Ad-hoc delivery of one item outside batch reconciliation
    pub async fn deliver_single(
        &self,
        item: CostItem,
        metadata: &DeliveryMetadata,
    ) -> DeliveryOutcome {
        self.deliver(std::slice::from_ref(&item), metadata).await
    }

    /// Metadata and gate checks shared by every delivery path
    fn precheck(&self, metadata: &DeliveryMetadata) -> Option<MessageHeader> {
        let missing = metadata.missing_fields();
        if !missing.is_empty() {
            error!(?missing, "Delivery metadata incomplete, nothing sent");
            return None;
        }
        if !self.is_connected() {
            warn!("Message producer not connected, delivery skipped");
            return None;
        }
        MessageHeader::from_metadata(metadata)
    }

    async fn send_batch(&self, header: &MessageHeader, batch: &[CostItem], index: usize) -> usize {
        if !self.is_connected() {
            warn!(batch = index, "Producer disconnected mid-delivery, batch skipped");
            return 0;
        }

        let message = header.message(batch.to_vec());
        match self.producer.send(&header.file_id, &message).await {
            Ok(()) => {
                debug!(batch = index, items = batch.len(), "Batch delivered");
                batch.len()
            }
            Err(e) => {
                warn!(batch = index, items = batch.len(), error = %e, "Batch delivery failed");
                if e.is_disconnect() {
                    self.set_connected(false);
                }
                0
            }
        }
    }
}

#[async_trait]
impl CostDelivery for DeliveryGateway {
    async fn deliver(&self, items: &[CostItem], metadata: &DeliveryMetadata) -> DeliveryOutcome {
        let Some(header) = self.precheck(metadata) else {
            return DeliveryOutcome::failed();
        };
        if items.is_empty() {
            return DeliveryOutcome {
                success: true,
                count: 0,
            };
        }

        let batch_size = self.config.batch_size.max(1);
        let batches: Vec<&[CostItem]> = items.chunks(batch_size).collect();
        let pause = batches.len() > self.config.pause_after_batches;

        let mut delivered = 0;
        for (index, batch) in batches.iter().enumerate() {
            if pause && index > 0 {
                sleep(self.config.batch_pause()).await;
            }
            delivered += self.send_batch(&header, batch, index).await;
        }

        info!(
            project = %header.project,
            file_id = %header.file_id,
            delivered,
            total = items.len(),
            batches = batches.len(),
            "Cost delivery finished"
        );

        DeliveryOutcome {
            success: delivered == items.len(),
            count: delivered,
        }
    }
}

/// Validated metadata, ready to stamp onto messages
struct MessageHeader {
    project: String,
    filename: String,
    timestamp: String,
    file_id: String,
}

impl MessageHeader {
    fn from_metadata(metadata: &DeliveryMetadata) -> Option<Self> {
        Some(Self {
            project: metadata.project.clone()?,
            filename: metadata.filename.clone()?,
            timestamp: metadata.timestamp.clone()?,
            file_id: metadata.file_id.clone()?,
        })
    }

    fn message(&self, data: Vec<CostItem>) -> CostMessage {
        CostMessage {
            project: self.project.clone(),
            filename: self.filename.clone(),
            timestamp: self.timestamp.clone(),
            file_id: self.file_id.clone(),
            data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::MemoryProducer;

    fn metadata() -> DeliveryMetadata {
        DeliveryMetadata {
            project: Some("Tower A".into()),
            filename: Some("tower.ifc".into()),
            timestamp: Some("2026-03-01T10:00:00Z".into()),
            file_id: Some("f-1".into()),
            fallback_used: false,
        }
    }

    fn items(n: usize) -> Vec<CostItem> {
        (0..n)
            .map(|i| CostItem::new(format!("el-{}", i), 10.0, 1.0))
            .collect()
    }

    fn config() -> BrokerConfig {
        BrokerConfig {
            batch_pause_ms: 1,
            ..Default::default()
        }
    }

    async fn connected_gateway(producer: Arc<MemoryProducer>) -> DeliveryGateway {
        let gateway = DeliveryGateway::new(producer, config(), EventBus::default_capacity());
        assert!(gateway.connect().await);
        gateway
    }

    #[tokio::test]
    async fn test_batches_of_one_hundred() {
        let producer = Arc::new(MemoryProducer::new());
        let gateway = connected_gateway(producer.clone()).await;

        let outcome = gateway.deliver(&items(250), &metadata()).await;
        assert_eq!(outcome, DeliveryOutcome { success: true, count: 250 });

        let sent = producer.sent();
        let sizes: Vec<_> = sent.iter().map(|(_, m)| m.data.len()).collect();
        assert_eq!(sizes, vec![100, 100, 50]);
        assert!(sent.iter().all(|(key, m)| key == "f-1" && m.file_id == "f-1"));
    }

    #[tokio::test]
    async fn test_missing_filename_sends_nothing() {
        let producer = Arc::new(MemoryProducer::new());
        let gateway = connected_gateway(producer.clone()).await;

        let mut meta = metadata();
        meta.filename = None;
        let outcome = gateway.deliver(&items(3), &meta).await;

        assert_eq!(outcome, DeliveryOutcome { success: false, count: 0 });
        assert_eq!(producer.send_calls(), 0);
    }

    #[tokio::test]
    async fn test_failed_batch_counts_zero_and_continues() {
        let producer = Arc::new(MemoryProducer::new());
        producer.fail_call(1);
        let gateway = connected_gateway(producer.clone()).await;

        let outcome = gateway.deliver(&items(300), &metadata()).await;
        assert_eq!(outcome, DeliveryOutcome { success: false, count: 200 });
        assert_eq!(producer.send_calls(), 3);
        assert!(gateway.is_connected());
    }

    #[tokio::test]
    async fn test_gate_closed_fails_fast() {
        let producer = Arc::new(MemoryProducer::new());
        producer.set_online(false);
        let gateway = DeliveryGateway::new(producer.clone(), config(), EventBus::default_capacity());
        assert!(!gateway.connect().await);

        let outcome = gateway
            .deliver_single(CostItem::new("a", 1.0, 1.0), &metadata())
            .await;
        assert_eq!(outcome, DeliveryOutcome::failed());
        assert_eq!(producer.send_calls(), 0);
    }

    #[tokio::test]
    async fn test_disconnect_clears_gate_and_publishes() {
        let producer = Arc::new(MemoryProducer::new());
        let bus = EventBus::default_capacity();
        let gateway = DeliveryGateway::new(producer.clone(), config(), bus.clone());
        let mut rx = bus.subscribe();
        gateway.connect().await;
        assert_eq!(rx.recv().await.unwrap(), DataEvent::ProducerStatusChanged(true));

        producer.set_online(false);
        let outcome = gateway.deliver(&items(150), &metadata()).await;

        assert_eq!(outcome.count, 0);
        assert!(!gateway.is_connected());
        // second batch never reaches the producer
        assert_eq!(producer.send_calls(), 1);
        assert_eq!(rx.recv().await.unwrap(), DataEvent::ProducerStatusChanged(false));
    }

    #[tokio::test]
    async fn test_empty_delivery_succeeds() {
        let producer = Arc::new(MemoryProducer::new());
        let gateway = connected_gateway(producer.clone()).await;
        let outcome = gateway.deliver(&[], &metadata()).await;
        assert_eq!(outcome, DeliveryOutcome { success: true, count: 0 });
    }
}
