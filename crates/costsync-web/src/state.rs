//! Shared handler state

use crate::live::Registry;
use costsync_core::config::LiveConfig;
use costsync_core::CostService;
use std::sync::Arc;

pub struct AppState {
    pub service: Arc<CostService>,
    pub registry: Arc<Registry>,
    pub live: LiveConfig,
}

impl AppState {
    pub fn new(service: Arc<CostService>, live: LiveConfig) -> Self {
        Self {
            service,
            registry: Arc::new(Registry::new()),
            live,
        }
    }
}
