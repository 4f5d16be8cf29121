use chrono::{DateTime, Utc};
use metrics::counter;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::warn;
use uuid::Uuid;

use fleet_core::{to_storage_time, AdapterStatus, AdapterStatusKey, ConditionDocument, DocumentError, ExecutionMetadata, ResourceRef};

use crate::{decode_json, decode_time, Page, PageRequest, StoreError};

const COLUMNS: &str = "id, resource_type, resource_id, adapter, observed_generation, conditions, data, metadata, created_time, last_report_time";

/// One adapter status row. `conditions` is kept as the raw stored JSON so a
/// damaged document can still be merged over.
#[derive(Debug, Clone, PartialEq)]
pub struct AdapterStatusRecord {
    pub id: Uuid,
    pub key: AdapterStatusKey,
    pub observed_generation: i64,
    pub conditions: String,
    pub data: Option<serde_json::Value>,
    pub metadata: Option<ExecutionMetadata>,
    pub created_time: DateTime<Utc>,
    pub last_report_time: DateTime<Utc>,
}

impl AdapterStatusRecord {
    pub fn into_status(self) -> Result<AdapterStatus, DocumentError> {
        let conditions = ConditionDocument::from_json(&self.conditions)?;
        Ok(AdapterStatus {
            id: self.id,
            resource_type: self.key.resource_type,
            resource_id: self.key.resource_id,
            adapter: self.key.adapter,
            observed_generation: self.observed_generation,
            conditions,
            data: self.data,
            metadata: self.metadata,
            created_time: self.created_time,
            last_report_time: self.last_report_time,
        })
    }
}

/// Column values for an insert or update. `now` becomes `last_report_time`,
/// and `created_time` too when the row is new.
#[derive(Debug, Clone, PartialEq)]
pub struct AdapterStatusWrite {
    pub observed_generation: i64,
    pub conditions: String,
    pub data: Option<serde_json::Value>,
    pub metadata: Option<ExecutionMetadata>,
    pub now: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum UpsertPlan {
    Write(AdapterStatusWrite),
    /// Leave the row (or its absence) untouched.
    Skip,
}

#[derive(Debug, Clone, PartialEq)]
pub enum UpsertOutcome {
    Inserted(AdapterStatusRecord),
    Updated(AdapterStatusRecord),
    Skipped,
}

struct RawRow {
    id: String,
    resource_type: String,
    resource_id: String,
    adapter: String,
    observed_generation: i64,
    conditions: String,
    data: Option<String>,
    metadata: Option<String>,
    created_time: String,
    last_report_time: String,
}

impl RawRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            resource_type: row.get(1)?,
            resource_id: row.get(2)?,
            adapter: row.get(3)?,
            observed_generation: row.get(4)?,
            conditions: row.get(5)?,
            data: row.get(6)?,
            metadata: row.get(7)?,
            created_time: row.get(8)?,
            last_report_time: row.get(9)?,
        })
    }

    fn decode(self) -> Result<AdapterStatusRecord, StoreError> {
        let id = Uuid::parse_str(&self.id).map_err(|e| StoreError::Corrupt(format!("adapter status id: {e}")))?;
        Ok(AdapterStatusRecord {
            id,
            key: AdapterStatusKey { resource_type: self.resource_type, resource_id: self.resource_id, adapter: self.adapter },
            observed_generation: self.observed_generation,
            conditions: self.conditions,
            data: self.data.as_deref().map(|d| decode_json(d, "adapter status data")).transpose()?,
            metadata: self.metadata.as_deref().map(|m| decode_json(m, "adapter status metadata")).transpose()?,
            created_time: decode_time(&self.created_time, "adapter status created_time")?,
            last_report_time: decode_time(&self.last_report_time, "adapter status last_report_time")?,
        })
    }

    /// Like [`decode`](Self::decode), but an unreadable `data` or `metadata`
    /// value comes back as `None`. Only for rows that are about to be
    /// overwritten.
    fn decode_for_update(mut self) -> Result<AdapterStatusRecord, StoreError> {
        let data = self.data.take().and_then(|d| self.tolerate(decode_json(&d, "adapter status data")));
        let metadata = self.metadata.take().and_then(|m| self.tolerate(decode_json(&m, "adapter status metadata")));
        let mut record = self.decode()?;
        record.data = data;
        record.metadata = metadata;
        Ok(record)
    }

    fn tolerate<T>(&self, decoded: Result<T, StoreError>) -> Option<T> {
        match decoded {
            Ok(v) => Some(v),
            Err(e) => {
                counter!("adapter_status_history_corrupt_total", 1u64);
                warn!(resource_type = %self.resource_type, resource_id = %self.resource_id, adapter = %self.adapter, error = %e, "persist: stored adapter status field unreadable, dropped");
                None
            }
        }
    }
}

fn encode_opt<T: serde::Serialize>(v: &Option<T>) -> Option<String> {
    v.as_ref().and_then(|v| serde_json::to_string(v).ok())
}

fn query_live(conn: &Connection, key: &AdapterStatusKey) -> Result<Option<RawRow>, StoreError> {
    let sql = format!(
        "SELECT {COLUMNS} FROM adapter_statuses
         WHERE resource_type = ?1 AND resource_id = ?2 AND adapter = ?3 AND deleted_time IS NULL"
    );
    Ok(conn.query_row(&sql, params![key.resource_type, key.resource_id, key.adapter], RawRow::read).optional()?)
}

pub(crate) fn find_live(conn: &Connection, key: &AdapterStatusKey) -> Result<Option<AdapterStatusRecord>, StoreError> {
    query_live(conn, key)?.map(RawRow::decode).transpose()
}

/// Lookup for the upsert path. `data` and `metadata` are replaced by the
/// write, so damage there must not block it.
pub(crate) fn find_live_for_update(
    conn: &Connection,
    key: &AdapterStatusKey,
) -> Result<Option<AdapterStatusRecord>, StoreError> {
    query_live(conn, key)?.map(RawRow::decode_for_update).transpose()
}

/// Raw sqlite error is returned so the caller can tell a unique-key race apart.
pub(crate) fn insert(conn: &Connection, key: &AdapterStatusKey, w: &AdapterStatusWrite) -> rusqlite::Result<Uuid> {
    let id = Uuid::new_v4();
    let now = to_storage_time(w.now);
    conn.execute(
        "INSERT INTO adapter_statuses(id, resource_type, resource_id, adapter, observed_generation, conditions, data, metadata, created_time, last_report_time)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
        params![
            id.to_string(),
            key.resource_type,
            key.resource_id,
            key.adapter,
            w.observed_generation,
            w.conditions,
            encode_opt(&w.data),
            encode_opt(&w.metadata),
            now,
        ],
    )?;
    Ok(id)
}

/// `created_time` is never touched here.
pub(crate) fn update(conn: &Connection, id: Uuid, w: &AdapterStatusWrite) -> Result<(), StoreError> {
    let n = conn.execute(
        "UPDATE adapter_statuses
         SET observed_generation = ?2, conditions = ?3, data = ?4, metadata = ?5, last_report_time = ?6
         WHERE id = ?1 AND deleted_time IS NULL",
        params![
            id.to_string(),
            w.observed_generation,
            w.conditions,
            encode_opt(&w.data),
            encode_opt(&w.metadata),
            to_storage_time(w.now),
        ],
    )?;
    if n == 0 {
        return Err(StoreError::NotFound(format!("adapter status {id}")));
    }
    Ok(())
}

pub(crate) fn list_live(
    conn: &Connection,
    resource: &ResourceRef,
    page: PageRequest,
) -> Result<Page<AdapterStatusRecord>, StoreError> {
    let total: i64 = conn.query_row(
        "SELECT COUNT(*) FROM adapter_statuses WHERE resource_type = ?1 AND resource_id = ?2 AND deleted_time IS NULL",
        params![resource.kind, resource.id],
        |r| r.get(0),
    )?;
    let sql = format!(
        "SELECT {COLUMNS} FROM adapter_statuses
         WHERE resource_type = ?1 AND resource_id = ?2 AND deleted_time IS NULL
         ORDER BY adapter LIMIT ?3 OFFSET ?4"
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query(params![resource.kind, resource.id, page.limit(), page.offset()])?;
    let mut items = Vec::new();
    while let Some(row) = rows.next()? {
        items.push(RawRow::read(row)?.decode()?);
    }
    Ok(Page { items, page: page.page, page_size: page.page_size, total: total.max(0) as u64 })
}

pub(crate) fn soft_delete_for_resource(
    conn: &Connection,
    resource: &ResourceRef,
    now: DateTime<Utc>,
) -> Result<usize, StoreError> {
    Ok(conn.execute(
        "UPDATE adapter_statuses SET deleted_time = ?3
         WHERE resource_type = ?1 AND resource_id = ?2 AND deleted_time IS NULL",
        params![resource.kind, resource.id, to_storage_time(now)],
    )?)
}
