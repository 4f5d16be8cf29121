//! Fleet persistence: SQLite store for resources and adapter status rows.
//!
//! Condition documents live in JSON text columns. Writes that depend on the
//! current row (adapter status upsert, resource condition updates) run inside
//! an IMMEDIATE transaction so the read-modify-write is serialised per
//! database; a unique-constraint failure on insert is retried through the
//! update path.

#![forbid(unsafe_code)]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use fleet_core::{AdapterStatusKey, NewResource, Resource, ResourceRef};
use fleet_search::StorageQuery;

mod adapter_status;
mod cancel;
mod resources;
pub mod schema;
mod store;

pub use adapter_status::{AdapterStatusRecord, AdapterStatusWrite, UpsertOutcome, UpsertPlan};
pub use cancel::Cancellation;
pub use store::{SqliteStore, StoreConfig};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("operation cancelled")]
    Cancelled,
    /// A stored row could not be decoded.
    #[error("corrupt row: {0}")]
    Corrupt(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("sqlite: {0}")]
    Db(rusqlite::Error),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        match &e {
            rusqlite::Error::SqliteFailure(err, _) if err.code == rusqlite::ErrorCode::OperationInterrupted => {
                StoreError::Cancelled
            }
            _ => StoreError::Db(e),
        }
    }
}

/// 1-based page selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageRequest {
    pub page: u32,
    pub page_size: u32,
}

impl PageRequest {
    pub fn new(page: u32, page_size: u32) -> Self {
        Self { page: page.max(1), page_size: page_size.max(1) }
    }

    pub(crate) fn offset(&self) -> i64 {
        i64::from(self.page.max(1) - 1) * i64::from(self.page_size)
    }

    pub(crate) fn limit(&self) -> i64 {
        i64::from(self.page_size.max(1))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub page_size: u32,
    pub total: u64,
}

impl<T> Page<T> {
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page { items: self.items.into_iter().map(f).collect(), page: self.page, page_size: self.page_size, total: self.total }
    }
}

/// Storage operations used by the reconciler and the API façade.
///
/// Every call takes a [`Cancellation`]; a cancelled write never commits.
pub trait Store: Send + Sync {
    /// Look up the live row for `key`, let `plan` decide what to write, then
    /// insert or update it in the same transaction. `plan` may run more than
    /// once if a concurrent insert wins the race.
    fn upsert_adapter_status(
        &self,
        cancel: &Cancellation,
        key: &AdapterStatusKey,
        plan: &mut dyn FnMut(Option<&AdapterStatusRecord>) -> UpsertPlan,
    ) -> Result<UpsertOutcome, StoreError>;

    fn get_adapter_status(
        &self,
        cancel: &Cancellation,
        key: &AdapterStatusKey,
    ) -> Result<Option<AdapterStatusRecord>, StoreError>;

    /// Live rows for one resource, ordered by adapter name.
    fn list_adapter_statuses(
        &self,
        cancel: &Cancellation,
        resource: &ResourceRef,
        page: PageRequest,
    ) -> Result<Page<AdapterStatusRecord>, StoreError>;

    fn create_resource(
        &self,
        cancel: &Cancellation,
        kind: &str,
        new: &NewResource,
        now: DateTime<Utc>,
    ) -> Result<Resource, StoreError>;

    fn get_resource(&self, cancel: &Cancellation, resource: &ResourceRef) -> Result<Option<Resource>, StoreError>;

    /// Live resources of `kind` matching `filter`, oldest first.
    fn search_resources(
        &self,
        cancel: &Cancellation,
        kind: &str,
        filter: Option<&StorageQuery>,
        page: PageRequest,
    ) -> Result<Page<Resource>, StoreError>;

    /// Marks the resource and all of its adapter status rows deleted.
    fn soft_delete_resource(
        &self,
        cancel: &Cancellation,
        resource: &ResourceRef,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Replace the resource's condition document with `apply(current_raw)`.
    fn update_resource_conditions(
        &self,
        cancel: &Cancellation,
        resource: &ResourceRef,
        now: DateTime<Utc>,
        apply: &mut dyn FnMut(&str) -> String,
    ) -> Result<Resource, StoreError>;
}

pub(crate) fn decode_time(raw: &str, what: &str) -> Result<DateTime<Utc>, StoreError> {
    fleet_core::parse_storage_time(raw).ok_or_else(|| StoreError::Corrupt(format!("{what}: bad timestamp {raw:?}")))
}

pub(crate) fn decode_json<T: serde::de::DeserializeOwned>(raw: &str, what: &str) -> Result<T, StoreError> {
    serde_json::from_str(raw).map_err(|e| StoreError::Corrupt(format!("{what}: {e}")))
}

pub(crate) fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(e, rusqlite::Error::SqliteFailure(err, _) if err.code == rusqlite::ErrorCode::ConstraintViolation)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_offsets() {
        assert_eq!(PageRequest::new(1, 20).offset(), 0);
        assert_eq!(PageRequest::new(3, 20).offset(), 40);
        assert_eq!(PageRequest::new(0, 0), PageRequest { page: 1, page_size: 1 });
    }

    #[test]
    fn interrupted_maps_to_cancelled() {
        let e = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error { code: rusqlite::ErrorCode::OperationInterrupted, extended_code: 9 },
            None,
        );
        assert!(matches!(StoreError::from(e), StoreError::Cancelled));
    }
}
