//! Cost service: the single owner of shared engine state
//!
//! Holds the store handle, match cache, delivery gateway, run locks and event
//! bus. Constructed once at startup and shared (`Arc`) with request handlers.

use crate::cache::MatchCache;
use crate::config::ServiceConfig;
use crate::delivery::{
    CostDelivery, DeliveryGateway, DeliveryMetadata, DeliveryOutcome, MessageProducer,
    OfflineProducer, RestProxyProducer,
};
use crate::ebkp::{normalize, KnownCostCodes};
use crate::error::{CoreError, CoreResult, DegradedState};
use crate::event::{DataEvent, EventBus, ProjectUpdate};
use crate::models::{
    BimElement, CostSource, KennwerteRecord, Project, ProjectCostSummary, UnitCostEntry,
    DEFAULT_CURRENCY,
};
use crate::reconcile::{reconcile, ReconcileInput, RunLocks};
use crate::store::{DocumentStore, SharedStore, SqliteConnector, SqliteStore, StaticConnector};
use crate::summary::recompute_summary;
use chrono::{DateTime, SecondsFormat, Utc};
use costsync_types::{
    flatten_leaves, CodeMatch, CostItem, DeleteProjectReport, EbkpCodeInfo, ExcelDataRequest,
    ExcelImportResult, ReconciliationResult, SpreadsheetItem, UnitCostInput,
};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Read-only health snapshot
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStatus {
    pub document_store: bool,
    pub producer: bool,
    pub connections: usize,
    pub degraded: DegradedState,
}

/// Matches plus the number of elements they were computed from
#[derive(Debug, Clone, Default)]
pub struct MatchReport {
    pub matches: Arc<Vec<CodeMatch>>,
    pub element_count: usize,
}

pub struct CostService {
    store: SharedStore,
    gateway: Arc<DeliveryGateway>,
    match_cache: MatchCache,
    run_locks: RunLocks,
    events: EventBus,
}

impl CostService {
    pub fn new(
        store: SharedStore,
        producer: Arc<dyn MessageProducer>,
        config: &ServiceConfig,
        events: EventBus,
    ) -> Self {
        let gateway = DeliveryGateway::new(producer, config.broker.clone(), events.clone());
        Self {
            store,
            gateway: Arc::new(gateway),
            match_cache: MatchCache::new(config.matching.cache_ttl()),
            run_locks: RunLocks::new(),
            events,
        }
    }

    /// Wire the store and producer described by the configuration
    pub fn from_config(config: &ServiceConfig) -> CoreResult<Self> {
        let events = EventBus::default_capacity();

        let connector: Arc<dyn crate::store::StoreConnector> = if config.store.in_memory {
            Arc::new(StaticConnector(Arc::new(SqliteStore::in_memory()?)))
        } else {
            Arc::new(SqliteConnector::new(config.store.clone()))
        };
        let store = SharedStore::new(connector)
            .with_retries(config.store.max_retries, config.store.retry_delay())
            .with_events(events.clone());

        let producer: Arc<dyn MessageProducer> = match &config.broker.rest_proxy_url {
            Some(url) => Arc::new(
                RestProxyProducer::new(
                    url.clone(),
                    config.broker.topic.clone(),
                    Duration::from_secs(30),
                )
                .map_err(|e| CoreError::Broker {
                    message: e.to_string(),
                    source: None,
                })?,
            ),
            None => {
                info!("No broker configured, cost deliveries will be skipped");
                Arc::new(OfflineProducer)
            }
        };

        Ok(Self::new(store, producer, config, events))
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn gateway(&self) -> &Arc<DeliveryGateway> {
        &self.gateway
    }

    pub fn match_cache(&self) -> &MatchCache {
        &self.match_cache
    }

    /// Healthy store handle (reconnects when needed)
    pub async fn store(&self) -> CoreResult<Arc<dyn DocumentStore>> {
        self.store.get().await
    }

    /// Connect the store and run the producer handshake
    pub async fn start(&self) -> CoreResult<()> {
        self.store.get().await?;
        self.gateway.connect().await;
        Ok(())
    }

    /// Retry the producer handshake while disconnected; never returns
    pub async fn producer_retry_loop(self: Arc<Self>, every: Duration) {
        let mut ticker = tokio::time::interval(every);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if !self.gateway.is_connected() {
                debug!("Retrying message producer handshake");
                self.gateway.connect().await;
            }
        }
    }

    pub fn status(&self, connections: usize) -> ServiceStatus {
        let document_store = self.store.is_connected();
        let producer = self.gateway.is_connected();
        ServiceStatus {
            document_store,
            producer,
            connections,
            degraded: DegradedState::from_dependencies(document_store, producer),
        }
    }

    // ===================
    // Reconciliation
    // ===================

    /// Run the pipeline for one project, serialized per project
    pub async fn reconcile(
        &self,
        project_name: &str,
        matched_items: &[SpreadsheetItem],
        all_items: &[SpreadsheetItem],
        deliver: bool,
    ) -> CoreResult<ReconciliationResult> {
        let project_name = required(Some(project_name), "projectName")?;
        let lock = self.run_locks.lock_for(project_name);
        let _guard = lock.lock().await;

        let store = self.store.get().await?;
        let delivery: Option<&dyn CostDelivery> = if deliver {
            Some(self.gateway.as_ref())
        } else {
            None
        };

        let result = reconcile(
            store.as_ref(),
            ReconcileInput {
                project_name,
                matched_items,
                all_items,
            },
            delivery,
        )
        .await?;

        if let Some(project_id) = &result.project_id {
            self.announce_project(store.as_ref(), project_name, project_id)
                .await;
        }
        Ok(result)
    }

    /// Recompute the summary of a named project; `None` when it does not exist
    pub async fn summary(&self, project_name: &str) -> CoreResult<Option<ProjectCostSummary>> {
        let store = self.store.get().await?;
        let Some(project) = store.find_project_by_name(project_name).await? else {
            return Ok(None);
        };
        recompute_summary(store.as_ref(), &project.id).await.map(Some)
    }

    /// Ad-hoc single-item delivery for a project
    pub async fn deliver_single(
        &self,
        project_name: &str,
        item: CostItem,
    ) -> CoreResult<DeliveryOutcome> {
        let store = self.store.get().await?;
        let Some(project) = store.find_project_by_name(project_name).await? else {
            return Ok(DeliveryOutcome::failed());
        };
        let metadata = DeliveryMetadata::from_project(&project, Utc::now());
        Ok(self.gateway.deliver_single(item, &metadata).await)
    }

    async fn announce_project(&self, store: &dyn DocumentStore, name: &str, project_id: &str) {
        match store.get_summary(project_id).await {
            Ok(summary) => {
                let summary = summary.unwrap_or_default();
                self.events.publish(DataEvent::ProjectUpdated(ProjectUpdate {
                    project_name: name.to_string(),
                    project_id: project_id.to_string(),
                    element_count: summary.element_count,
                    total_cost: summary.total_from_elements,
                }));
            }
            Err(e) => warn!(project = name, error = %e, "Could not read summary for announcement"),
        }
    }

    // ===================
    // Code matching
    // ===================

    /// Codes on active elements with their element counts, sorted by code
    pub async fn available_codes(
        &self,
        project_name: Option<&str>,
    ) -> CoreResult<Vec<EbkpCodeInfo>> {
        let elements = self.active_elements(project_name).await?;

        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        for element in &elements {
            if let Some(code) = element.classification_code() {
                *counts.entry(normalize(code)).or_default() += 1;
            }
        }

        Ok(counts
            .into_iter()
            .map(|(code, element_count)| EbkpCodeInfo {
                code,
                element_count,
            })
            .collect())
    }

    /// Match element codes against the offered unit costs.
    ///
    /// Empty input returns an empty report without touching the store.
    pub async fn code_matches(
        &self,
        project_name: Option<&str>,
        codes: &[UnitCostInput],
        force_refresh: bool,
    ) -> CoreResult<MatchReport> {
        if codes.is_empty() {
            return Ok(MatchReport::default());
        }

        let elements = self.active_elements(project_name).await?;
        let known = KnownCostCodes::from_inputs(codes);
        let matches = self
            .match_cache
            .get_matches(&elements, &known, force_refresh);

        Ok(MatchReport {
            matches,
            element_count: elements.len(),
        })
    }

    /// Active elements of a project, or of every project when no name is given
    async fn active_elements(&self, project_name: Option<&str>) -> CoreResult<Vec<BimElement>> {
        let store = self.store.get().await?;
        let elements = match project_name.map(str::trim).filter(|n| !n.is_empty()) {
            Some(name) => match store.find_project_by_name(name).await? {
                Some(project) => store.elements_for_project(&project.id).await?,
                None => Vec::new(),
            },
            None => store.all_elements().await?,
        };
        Ok(elements.into_iter().filter(BimElement::is_active).collect())
    }

    // ===================
    // Project data
    // ===================

    /// Store spreadsheet unit costs as Kennwerte, creating the project if needed
    pub async fn save_excel_data(&self, request: &ExcelDataRequest) -> CoreResult<ExcelImportResult> {
        let project_name = required(request.project_name.as_deref(), "projectName")?;
        let lock = self.run_locks.lock_for(project_name);
        let _guard = lock.lock().await;

        let store = self.store.get().await?;
        let now = Utc::now();
        let (mut project, project_created) = match store.find_project_by_name(project_name).await? {
            Some(project) => (project, false),
            None => (create_project(store.as_ref(), project_name, now).await?, true),
        };

        if let Some(filename) = request.filename.clone() {
            project.metadata.filename = Some(filename);
        }
        if let Some(file_id) = request.file_id.clone() {
            project.metadata.file_id = Some(file_id);
        }
        project.metadata.upload_timestamp = Some(now.to_rfc3339_opts(SecondsFormat::Millis, true));
        project.updated_at = Some(now);
        store.upsert_project(&project).await?;

        let currency = request.currency.as_deref().unwrap_or(DEFAULT_CURRENCY);
        let mut record = KennwerteRecord {
            project_id: project.id.clone(),
            kennwerte: BTreeMap::new(),
            currency: currency.to_string(),
            filename: project.metadata.filename.clone(),
            file_id: project.metadata.file_id.clone(),
        };

        let mut rows_ignored = 0;
        for item in flatten_leaves(&request.items) {
            let Some(code) = item.code() else {
                rows_ignored += 1;
                continue;
            };
            if item.effective_unit_price() <= 0.0 {
                rows_ignored += 1;
                continue;
            }
            let normalized = normalize(code);
            let entry = UnitCostEntry::from_spreadsheet(
                &project.id,
                &normalized,
                item,
                CostSource::Kennwerte,
                currency,
            );
            store.upsert_unit_cost(&entry).await?;
            record.kennwerte.insert(normalized, entry.unit_price);
        }
        store.upsert_kennwerte(&record).await?;
        recompute_summary(store.as_ref(), &project.id).await?;

        info!(
            project = %project.name,
            created = project_created,
            saved = record.kennwerte.len(),
            ignored = rows_ignored,
            "Spreadsheet unit costs saved"
        );
        self.announce_project(store.as_ref(), &project.name, &project.id)
            .await;

        Ok(ExcelImportResult {
            project_id: project.id,
            project_created,
            unit_costs_saved: record.kennwerte.len(),
            rows_ignored,
        })
    }

    /// Remove cost elements, unit costs, summary and Kennwerte of a project.
    ///
    /// An unknown project is a success with nothing deleted.
    pub async fn delete_project_data(&self, project_name: &str) -> CoreResult<DeleteProjectReport> {
        let project_name = required(Some(project_name), "projectName")?;
        let lock = self.run_locks.lock_for(project_name);
        let _guard = lock.lock().await;

        let store = self.store.get().await?;
        let Some(project) = store.find_project_by_name(project_name).await? else {
            info!(project = project_name, "Project not found, nothing to delete");
            return Ok(DeleteProjectReport::default());
        };

        let report = DeleteProjectReport {
            project_found: true,
            cost_elements: store.delete_cost_elements(&project.id).await?,
            unit_costs: store.delete_unit_costs(&project.id).await?,
            summaries: store.delete_summary(&project.id).await?,
            kennwerte: store.delete_kennwerte(&project.id).await?,
        };

        info!(
            project = %project.name,
            deleted = report.deleted_count(),
            "Project cost data deleted"
        );
        self.events
            .publish(DataEvent::ProjectDataDeleted(project.name.clone()));
        Ok(report)
    }

    /// Seed the take-off side: create the project if needed and upsert elements
    pub async fn import_qto(
        &self,
        project_name: &str,
        mut elements: Vec<BimElement>,
    ) -> CoreResult<(Project, usize)> {
        let project_name = required(Some(project_name), "projectName")?;
        let lock = self.run_locks.lock_for(project_name);
        let _guard = lock.lock().await;
        let store = self.store.get().await?;

        let project = match store.find_project_by_name(project_name).await? {
            Some(project) => project,
            None => {
                let project = create_project(store.as_ref(), project_name, Utc::now()).await?;
                store.upsert_project(&project).await?;
                project
            }
        };

        for element in &mut elements {
            element.project_id = project.id.clone();
        }
        let count = store.upsert_elements(&elements).await?;
        Ok((project, count))
    }
}

/// New project whose id no stored project already uses
async fn create_project(
    store: &dyn DocumentStore,
    name: &str,
    now: DateTime<Utc>,
) -> CoreResult<Project> {
    let taken: HashSet<String> = store
        .list_projects()
        .await?
        .into_iter()
        .map(|project| project.id)
        .collect();
    let mut project = Project::new(name.trim(), now);
    project.id = Project::free_id_for_name(name, |id| taken.contains(id));
    Ok(project)
}

fn required<'a>(value: Option<&'a str>, field: &str) -> CoreResult<&'a str> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| CoreError::invalid_input(format!("{} is required", field)))
}
