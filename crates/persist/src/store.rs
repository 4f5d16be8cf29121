use std::ops::{Deref, DerefMut};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, TryLockError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use rusqlite::{Connection, TransactionBehavior};
use tracing::{debug, info, warn};

use fleet_core::{AdapterStatusKey, NewResource, Resource, ResourceRef};
use fleet_search::StorageQuery;

use crate::adapter_status::{self, AdapterStatusRecord, UpsertOutcome, UpsertPlan};
use crate::{is_constraint_violation, resources, schema, Cancellation, Page, PageRequest, Store, StoreError};

/// Number of VM instructions between cancellation checks.
const PROGRESS_OPS: i32 = 1_000;
const MAX_UPSERT_ATTEMPTS: u32 = 3;
/// Pause between sweeps of a fully busy pool.
const POOL_WAIT: Duration = Duration::from_millis(2);

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub path: PathBuf,
    pub pool_size: usize,
    pub busy_timeout: Duration,
}

impl StoreConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), pool_size: 4, busy_timeout: Duration::from_secs(5) }
    }
}

/// SQLite-backed store over a small fixed pool of connections.
pub struct SqliteStore {
    pool: Vec<Mutex<Connection>>,
    next: AtomicUsize,
    /// Runs on the upsert connection right before a new row is inserted.
    #[cfg(test)]
    before_insert: Mutex<Option<Box<dyn FnOnce(&Connection) + Send>>>,
}

/// A pooled connection with the caller's cancellation installed.
struct Session<'a> {
    conn: MutexGuard<'a, Connection>,
}

impl Deref for Session<'_> {
    type Target = Connection;
    fn deref(&self) -> &Connection {
        &self.conn
    }
}

impl DerefMut for Session<'_> {
    fn deref_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }
}

impl Drop for Session<'_> {
    fn drop(&mut self) {
        self.conn.progress_handler(0, None::<fn() -> bool>);
    }
}

impl SqliteStore {
    pub fn open(cfg: &StoreConfig) -> Result<Self, StoreError> {
        let started = Instant::now();
        if let Some(dir) = cfg.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        let size = cfg.pool_size.max(1);
        let mut pool = Vec::with_capacity(size);
        for i in 0..size {
            let conn = Connection::open(&cfg.path)?;
            conn.busy_timeout(cfg.busy_timeout)?;
            conn.pragma_update(None, "journal_mode", "WAL").ok();
            conn.pragma_update(None, "synchronous", "NORMAL").ok();
            if i == 0 {
                schema::migrate(&conn)?;
            }
            pool.push(Mutex::new(conn));
        }
        histogram!("persist_open_ms", started.elapsed().as_secs_f64() * 1000.0);
        info!(path = %cfg.path.display(), pool = size, "persist: opened sqlite store");
        Ok(Self {
            pool,
            next: AtomicUsize::new(0),
            #[cfg(test)]
            before_insert: Mutex::new(None),
        })
    }

    /// Waits for a free connection, giving up once `cancel` fires.
    fn session(&self, cancel: &Cancellation) -> Result<Session<'_>, StoreError> {
        let n = self.pool.len();
        let start = self.next.fetch_add(1, Ordering::Relaxed);
        loop {
            cancel.check()?;
            for i in 0..n {
                let conn = match self.pool[(start + i) % n].try_lock() {
                    Ok(conn) => conn,
                    Err(TryLockError::Poisoned(p)) => p.into_inner(),
                    Err(TryLockError::WouldBlock) => continue,
                };
                let c = cancel.clone();
                conn.progress_handler(PROGRESS_OPS, Some(move || c.is_cancelled()));
                return Ok(Session { conn });
            }
            std::thread::sleep(POOL_WAIT);
        }
    }

    #[cfg(test)]
    fn run_before_insert(&self, conn: &Connection) {
        let hook = self.before_insert.lock().ok().and_then(|mut h| h.take());
        if let Some(hook) = hook {
            hook(conn);
        }
    }
}

impl Store for SqliteStore {
    fn upsert_adapter_status(
        &self,
        cancel: &Cancellation,
        key: &AdapterStatusKey,
        plan: &mut dyn FnMut(Option<&AdapterStatusRecord>) -> UpsertPlan,
    ) -> Result<UpsertOutcome, StoreError> {
        let started = Instant::now();
        let owner = ResourceRef::new(key.resource_type.as_str(), key.resource_id.as_str());
        let mut session = self.session(cancel)?;
        let tx = session.transaction_with_behavior(TransactionBehavior::Immediate)?;
        if !resources::exists_live(&tx, &owner)? {
            return Err(StoreError::NotFound(format!("{} {}", owner.kind, owner.id)));
        }
        let mut existing = adapter_status::find_live_for_update(&tx, key)?;
        let mut attempt = 0;
        let inserted = loop {
            attempt += 1;
            let write = match plan(existing.as_ref()) {
                UpsertPlan::Write(w) => w,
                UpsertPlan::Skip => {
                    histogram!("persist_upsert_ms", started.elapsed().as_secs_f64() * 1000.0);
                    return Ok(UpsertOutcome::Skipped);
                }
            };
            if let Some(prev) = &existing {
                adapter_status::update(&tx, prev.id, &write)?;
                break false;
            }
            #[cfg(test)]
            self.run_before_insert(&tx);
            match adapter_status::insert(&tx, key, &write) {
                Ok(_) => break true,
                // A failed INSERT only undoes itself; the transaction stays open, so
                // re-read the row that won and merge over it.
                Err(e) if is_constraint_violation(&e) && attempt < MAX_UPSERT_ATTEMPTS => {
                    counter!("adapter_status_upsert_conflicts_total", 1u64);
                    warn!(resource_type = %key.resource_type, resource_id = %key.resource_id, adapter = %key.adapter, attempt, "persist: concurrent insert, retrying as update");
                    existing = adapter_status::find_live_for_update(&tx, key)?;
                }
                Err(e) => return Err(e.into()),
            }
        };
        let record = adapter_status::find_live(&tx, key)?
            .ok_or_else(|| StoreError::NotFound(format!("adapter status {}/{}/{}", key.resource_type, key.resource_id, key.adapter)))?;
        cancel.check()?;
        tx.commit()?;
        histogram!("persist_upsert_ms", started.elapsed().as_secs_f64() * 1000.0);
        Ok(if inserted { UpsertOutcome::Inserted(record) } else { UpsertOutcome::Updated(record) })
    }

    fn get_adapter_status(
        &self,
        cancel: &Cancellation,
        key: &AdapterStatusKey,
    ) -> Result<Option<AdapterStatusRecord>, StoreError> {
        let session = self.session(cancel)?;
        adapter_status::find_live(&session, key)
    }

    fn list_adapter_statuses(
        &self,
        cancel: &Cancellation,
        resource: &ResourceRef,
        page: PageRequest,
    ) -> Result<Page<AdapterStatusRecord>, StoreError> {
        let mut session = self.session(cancel)?;
        let tx = session.transaction()?;
        adapter_status::list_live(&tx, resource, page)
    }

    fn create_resource(
        &self,
        cancel: &Cancellation,
        kind: &str,
        new: &NewResource,
        now: DateTime<Utc>,
    ) -> Result<Resource, StoreError> {
        let mut session = self.session(cancel)?;
        let tx = session.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let created = resources::insert(&tx, kind, new, now)?;
        cancel.check()?;
        tx.commit()?;
        debug!(kind, id = %created.id, name = %created.name, "persist: resource created");
        Ok(created)
    }

    fn get_resource(&self, cancel: &Cancellation, resource: &ResourceRef) -> Result<Option<Resource>, StoreError> {
        let session = self.session(cancel)?;
        resources::find_live(&session, resource)
    }

    fn search_resources(
        &self,
        cancel: &Cancellation,
        kind: &str,
        filter: Option<&StorageQuery>,
        page: PageRequest,
    ) -> Result<Page<Resource>, StoreError> {
        let started = Instant::now();
        let mut session = self.session(cancel)?;
        // Count and page come from one read snapshot.
        let tx = session.transaction()?;
        let out = resources::search(&tx, kind, filter, page)?;
        histogram!("persist_search_ms", started.elapsed().as_secs_f64() * 1000.0);
        Ok(out)
    }

    fn soft_delete_resource(
        &self,
        cancel: &Cancellation,
        resource: &ResourceRef,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut session = self.session(cancel)?;
        let tx = session.transaction_with_behavior(TransactionBehavior::Immediate)?;
        if !resources::soft_delete(&tx, resource, now)? {
            return Err(StoreError::NotFound(format!("{} {}", resource.kind, resource.id)));
        }
        let statuses = adapter_status::soft_delete_for_resource(&tx, resource, now)?;
        cancel.check()?;
        tx.commit()?;
        info!(kind = %resource.kind, id = %resource.id, statuses, "persist: resource soft-deleted");
        Ok(())
    }

    fn update_resource_conditions(
        &self,
        cancel: &Cancellation,
        resource: &ResourceRef,
        now: DateTime<Utc>,
        apply: &mut dyn FnMut(&str) -> String,
    ) -> Result<Resource, StoreError> {
        let mut session = self.session(cancel)?;
        let tx = session.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let current = resources::raw_conditions(&tx, resource)?
            .ok_or_else(|| StoreError::NotFound(format!("{} {}", resource.kind, resource.id)))?;
        resources::set_conditions(&tx, resource, &apply(&current), now)?;
        let updated = resources::find_live(&tx, resource)?
            .ok_or_else(|| StoreError::NotFound(format!("{} {}", resource.kind, resource.id)))?;
        cancel.check()?;
        tx.commit()?;
        Ok(updated)
    }
}
