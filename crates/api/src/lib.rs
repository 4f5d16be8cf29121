//! Fleet public API façade (in-process).
//!
//! This crate defines the stable trait and types frontends (CLI, an HTTP
//! layer later) depend on. Store calls are blocking; the in-process
//! implementation runs them on tokio's blocking pool under a per-request
//! deadline, and cancels them if the calling future is dropped.

#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::info;

use fleet_core::{
    AdapterStatus, AdapterStatusKey, ConditionInput, IncomingAdapterStatus, KindRegistry, NewResource, Resource,
    ResourceRef,
};
use fleet_persist::{Cancellation, Page, SqliteStore, Store};

pub mod clock;
pub mod config;
pub mod error;
pub mod reconcile;
pub mod service;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, FleetConfig};
pub use error::{ApiError, ApiResult, ErrorClass};
pub use reconcile::{Reconciler, ReportOutcome};
pub use service::{Paging, ResourceService};

/// Declarative Fleet API surface.
#[async_trait::async_trait]
pub trait FleetApi: Send + Sync {
    /// Ingest one adapter report for `resource`.
    async fn report_status(&self, resource: ResourceRef, report: IncomingAdapterStatus) -> ApiResult<ReportOutcome>;

    async fn get_status(&self, key: AdapterStatusKey) -> ApiResult<AdapterStatus>;

    async fn list_statuses(
        &self,
        resource: ResourceRef,
        page: Option<u32>,
        page_size: Option<u32>,
    ) -> ApiResult<Page<AdapterStatus>>;

    async fn create_resource(&self, kind: &str, new: NewResource) -> ApiResult<Resource>;

    async fn get_resource(&self, resource: ResourceRef) -> ApiResult<Resource>;

    async fn delete_resource(&self, resource: ResourceRef) -> ApiResult<()>;

    /// Replace the resource's aggregate conditions (orchestrator write path).
    async fn set_resource_conditions(
        &self,
        resource: ResourceRef,
        observed_generation: i64,
        conditions: Vec<ConditionInput>,
    ) -> ApiResult<Resource>;

    /// Filtered listing of live resources of one kind.
    async fn search(
        &self,
        kind: &str,
        filter: &str,
        page: Option<u32>,
        page_size: Option<u32>,
    ) -> ApiResult<Page<Resource>>;
}

// ----------------- In-process implementation -----------------

/// In-process implementation that calls internal crates directly.
pub struct InProcApi {
    reconciler: Arc<Reconciler>,
    resources: Arc<ResourceService>,
    timeout: Duration,
}

/// Cancels the blocking store call if the awaiting future goes away.
struct CancelOnDrop(Cancellation);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

impl InProcApi {
    /// Open the SQLite store named by `cfg` and wire everything to the wall clock.
    pub fn open(cfg: &FleetConfig) -> ApiResult<Self> {
        let store = SqliteStore::open(&cfg.store_config())?;
        Ok(Self::with_parts(Arc::new(store), cfg.kinds.clone(), Arc::new(SystemClock), cfg))
    }

    pub fn with_parts(store: Arc<dyn Store>, kinds: KindRegistry, clock: Arc<dyn Clock>, cfg: &FleetConfig) -> Self {
        let kinds = Arc::new(kinds);
        let paging = Paging { default_page_size: cfg.default_page_size, max_page_size: cfg.max_page_size };
        Self {
            reconciler: Arc::new(Reconciler::new(store.clone(), kinds.clone(), clock.clone())),
            resources: Arc::new(ResourceService::new(store, kinds, clock, paging)),
            timeout: cfg.request_timeout(),
        }
    }

    async fn blocking<T, F>(&self, op: &'static str, f: F) -> ApiResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Cancellation) -> ApiResult<T> + Send + 'static,
    {
        let t0 = Instant::now();
        let cancel = Cancellation::with_timeout(self.timeout);
        let guard = CancelOnDrop(cancel.clone());
        let res = tokio::task::spawn_blocking(move || f(&cancel))
            .await
            .map_err(|e| ApiError::Internal(format!("{op}: worker failed: {e}")))?;
        drop(guard);
        if let Err(e) = &res {
            info!(op, class = ?e.class(), error = %e, took_ms = %t0.elapsed().as_millis(), "api: request failed");
        }
        res
    }
}

#[async_trait::async_trait]
impl FleetApi for InProcApi {
    async fn report_status(&self, resource: ResourceRef, report: IncomingAdapterStatus) -> ApiResult<ReportOutcome> {
        let rec = self.reconciler.clone();
        self.blocking("report_status", move |c| rec.reconcile(c, &resource, &report)).await
    }

    async fn get_status(&self, key: AdapterStatusKey) -> ApiResult<AdapterStatus> {
        let svc = self.resources.clone();
        self.blocking("get_status", move |c| svc.get_status(c, &key)).await
    }

    async fn list_statuses(
        &self,
        resource: ResourceRef,
        page: Option<u32>,
        page_size: Option<u32>,
    ) -> ApiResult<Page<AdapterStatus>> {
        let svc = self.resources.clone();
        self.blocking("list_statuses", move |c| svc.list_statuses(c, &resource, page, page_size)).await
    }

    async fn create_resource(&self, kind: &str, new: NewResource) -> ApiResult<Resource> {
        let svc = self.resources.clone();
        let kind = kind.to_string();
        self.blocking("create_resource", move |c| svc.create(c, &kind, &new)).await
    }

    async fn get_resource(&self, resource: ResourceRef) -> ApiResult<Resource> {
        let svc = self.resources.clone();
        self.blocking("get_resource", move |c| svc.get(c, &resource)).await
    }

    async fn delete_resource(&self, resource: ResourceRef) -> ApiResult<()> {
        let svc = self.resources.clone();
        self.blocking("delete_resource", move |c| svc.delete(c, &resource)).await
    }

    async fn set_resource_conditions(
        &self,
        resource: ResourceRef,
        observed_generation: i64,
        conditions: Vec<ConditionInput>,
    ) -> ApiResult<Resource> {
        let svc = self.resources.clone();
        self.blocking("set_resource_conditions", move |c| {
            svc.set_conditions(c, &resource, observed_generation, &conditions)
        })
        .await
    }

    async fn search(
        &self,
        kind: &str,
        filter: &str,
        page: Option<u32>,
        page_size: Option<u32>,
    ) -> ApiResult<Page<Resource>> {
        let svc = self.resources.clone();
        let (kind, filter) = (kind.to_string(), filter.to_string());
        self.blocking("search", move |c| svc.search(c, &kind, &filter, page, page_size)).await
    }
}
