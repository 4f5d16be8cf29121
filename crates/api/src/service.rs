//! Resource reads and writes around the reconciler: creation, lookup, soft
//! delete, the orchestrator's aggregate conditions, adapter status reads and
//! filtered search.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use fleet_core::resource::check_resource_conditions;
use fleet_core::{
    merge_stored, AdapterStatus, AdapterStatusKey, Condition, ConditionDocument, ConditionInput, KindRegistry,
    NewResource, Resource, ResourceRef,
};
use fleet_persist::{Cancellation, Page, PageRequest, Store};

use crate::clock::Clock;
use crate::error::{ApiError, ApiResult};

#[derive(Debug, Clone, Copy)]
pub struct Paging {
    pub default_page_size: u32,
    pub max_page_size: u32,
}

impl Paging {
    /// Fill in and clamp a caller's page request.
    pub fn resolve(&self, page: Option<u32>, page_size: Option<u32>) -> PageRequest {
        let size = page_size.unwrap_or(self.default_page_size).clamp(1, self.max_page_size.max(1));
        PageRequest::new(page.unwrap_or(1), size)
    }
}

pub struct ResourceService {
    store: Arc<dyn Store>,
    kinds: Arc<KindRegistry>,
    clock: Arc<dyn Clock>,
    paging: Paging,
}

impl ResourceService {
    pub fn new(store: Arc<dyn Store>, kinds: Arc<KindRegistry>, clock: Arc<dyn Clock>, paging: Paging) -> Self {
        Self { store, kinds, clock, paging }
    }

    pub fn create(&self, cancel: &Cancellation, kind: &str, new: &NewResource) -> ApiResult<Resource> {
        self.kinds.resolve(kind)?;
        new.validate()?;
        let created = self.store.create_resource(cancel, kind, new, self.clock.now())?;
        info!(kind, id = %created.id, name = %created.name, "api: resource created");
        Ok(created)
    }

    pub fn get(&self, cancel: &Cancellation, resource: &ResourceRef) -> ApiResult<Resource> {
        self.kinds.resolve(&resource.kind)?;
        self.store
            .get_resource(cancel, resource)?
            .ok_or_else(|| ApiError::NotFound(format!("{} {}", resource.kind, resource.id)))
    }

    /// Soft delete; adapter status rows for the resource go with it.
    pub fn delete(&self, cancel: &Cancellation, resource: &ResourceRef) -> ApiResult<()> {
        self.kinds.resolve(&resource.kind)?;
        self.store.soft_delete_resource(cancel, resource, self.clock.now())?;
        Ok(())
    }

    /// Orchestrator write path for the resource's own conditions. Two-valued
    /// statuses only; transition times carry over exactly as for adapters.
    pub fn set_conditions(
        &self,
        cancel: &Cancellation,
        resource: &ResourceRef,
        observed_generation: i64,
        conditions: &[ConditionInput],
    ) -> ApiResult<Resource> {
        self.kinds.resolve(&resource.kind)?;
        check_resource_conditions(conditions)?;
        let now = self.clock.now();
        let incoming = ConditionDocument::new(
            conditions
                .iter()
                .cloned()
                .map(|c| Condition::from_input(c, observed_generation, now))
                .collect(),
        )?;
        let updated = self.store.update_resource_conditions(cancel, resource, now, &mut |current| {
            let merged = merge_stored(Some(current), incoming.clone(), now);
            if let Some(err) = &merged.history_error {
                warn!(kind = %resource.kind, id = %resource.id, error = %err, "api: resource conditions unreadable, replaced");
            }
            merged.document.to_json()
        })?;
        Ok(updated)
    }

    pub fn get_status(&self, cancel: &Cancellation, key: &AdapterStatusKey) -> ApiResult<AdapterStatus> {
        self.kinds.resolve(&key.resource_type)?;
        let record = self.store.get_adapter_status(cancel, key)?.ok_or_else(|| {
            ApiError::NotFound(format!("adapter status {}/{}/{}", key.resource_type, key.resource_id, key.adapter))
        })?;
        record.into_status().map_err(|e| ApiError::Internal(format!("stored status unreadable: {e}")))
    }

    pub fn list_statuses(
        &self,
        cancel: &Cancellation,
        resource: &ResourceRef,
        page: Option<u32>,
        page_size: Option<u32>,
    ) -> ApiResult<Page<AdapterStatus>> {
        self.kinds.resolve(&resource.kind)?;
        if self.store.get_resource(cancel, resource)?.is_none() {
            return Err(ApiError::NotFound(format!("{} {}", resource.kind, resource.id)));
        }
        let page = self.store.list_adapter_statuses(cancel, resource, self.paging.resolve(page, page_size))?;
        let mut items = Vec::with_capacity(page.items.len());
        for record in page.items {
            items.push(record.into_status().map_err(|e| ApiError::Internal(format!("stored status unreadable: {e}")))?);
        }
        Ok(Page { items, page: page.page, page_size: page.page_size, total: page.total })
    }

    /// Compile `filter` and run it against live resources of `kind`.
    pub fn search(
        &self,
        cancel: &Cancellation,
        kind: &str,
        filter: &str,
        page: Option<u32>,
        page_size: Option<u32>,
    ) -> ApiResult<Page<Resource>> {
        let t0 = Instant::now();
        self.kinds.resolve(kind)?;
        let query = fleet_search::compile_filter(filter)?;
        let out = self.store.search_resources(cancel, kind, query.as_ref(), self.paging.resolve(page, page_size))?;
        debug!(kind, filter, hits = out.items.len(), total = out.total, took_ms = %t0.elapsed().as_millis(), "api: search ok");
        Ok(out)
    }
}
