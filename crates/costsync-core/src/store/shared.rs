//! Shared, self-healing handle to the document store
//!
//! Lazily connected, pinged before reuse, re-established on failure with a
//! bounded number of attempts and a fixed delay between them.

use super::{DocumentStore, SqliteStore};
use crate::config::StoreConfig;
use crate::error::{CoreError, CoreResult};
use crate::event::{DataEvent, EventBus};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Produces fresh store handles
#[async_trait]
pub trait StoreConnector: Send + Sync {
    async fn connect(&self) -> CoreResult<Arc<dyn DocumentStore>>;
}

/// Opens the on-disk SQLite databases
pub struct SqliteConnector {
    config: StoreConfig,
}

impl SqliteConnector {
    pub fn new(config: StoreConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl StoreConnector for SqliteConnector {
    async fn connect(&self) -> CoreResult<Arc<dyn DocumentStore>> {
        let store = SqliteStore::open(&self.config.data_dir)?;
        Ok(Arc::new(store))
    }
}

/// Always hands out the same store (in-memory stores, tests)
pub struct StaticConnector(pub Arc<dyn DocumentStore>);

#[async_trait]
impl StoreConnector for StaticConnector {
    async fn connect(&self) -> CoreResult<Arc<dyn DocumentStore>> {
        Ok(Arc::clone(&self.0))
    }
}

pub struct SharedStore {
    connector: Arc<dyn StoreConnector>,
    slot: RwLock<Option<Arc<dyn DocumentStore>>>,
    connected: AtomicBool,
    max_retries: u32,
    retry_delay: Duration,
    events: Option<EventBus>,
}

impl SharedStore {
    pub fn new(connector: Arc<dyn StoreConnector>) -> Self {
        Self {
            connector,
            slot: RwLock::new(None),
            connected: AtomicBool::new(false),
            max_retries: 3,
            retry_delay: Duration::from_millis(1000),
            events: None,
        }
    }

    /// Handle over an already opened store
    pub fn from_store(store: Arc<dyn DocumentStore>) -> Self {
        Self::new(Arc::new(StaticConnector(store)))
    }

    pub fn with_retries(mut self, max_retries: u32, retry_delay: Duration) -> Self {
        self.max_retries = max_retries.max(1);
        self.retry_delay = retry_delay;
        self
    }

    /// Publish store status transitions on the bus
    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    /// Last known connectivity (no I/O)
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// A healthy store handle, reconnecting if needed
    pub async fn get(&self) -> CoreResult<Arc<dyn DocumentStore>> {
        let current = self.slot.read().clone();
        if let Some(store) = current {
            match store.ping().await {
                Ok(()) => return Ok(store),
                Err(e) => {
                    warn!(error = %e, "Document store ping failed, reconnecting");
                    *self.slot.write() = None;
                }
            }
        }

        self.reconnect().await
    }

    async fn reconnect(&self) -> CoreResult<Arc<dyn DocumentStore>> {
        let mut last_error = String::new();

        for attempt in 1..=self.max_retries {
            if attempt > 1 {
                debug!(attempt, "Retrying document store connection after delay");
                sleep(self.retry_delay).await;
            }

            let result = match self.connector.connect().await {
                Ok(store) => store.ping().await.map(|()| store),
                Err(e) => Err(e),
            };

            match result {
                Ok(store) => {
                    *self.slot.write() = Some(Arc::clone(&store));
                    self.set_connected(true);
                    if attempt > 1 {
                        info!(attempt, "Document store reconnected");
                    }
                    return Ok(store);
                }
                Err(e) => {
                    warn!(attempt, max = self.max_retries, error = %e, "Document store connection attempt failed");
                    last_error = e.to_string();
                }
            }
        }

        self.set_connected(false);
        Err(CoreError::StoreUnavailable {
            attempts: self.max_retries,
            reason: last_error,
        })
    }

    fn set_connected(&self, connected: bool) {
        let previous = self.connected.swap(connected, Ordering::SeqCst);
        if previous != connected {
            if let Some(events) = &self.events {
                events.publish(DataEvent::StoreStatusChanged(connected));
            }
        }
    }
}
