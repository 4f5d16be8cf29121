//! Adapter status reconciler.
//!
//! One report in, one of three results out: stored, discarded (the mandatory
//! gate said no, nothing changed) or an error. All writes go through the
//! merge engine inside the store's upsert transaction.

use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use fleet_core::{
    merge_stored, validate_mandatory, AdapterStatus, AdapterStatusKey, IncomingAdapterStatus, KindRegistry,
    RejectionReason, ResourceRef,
};
use fleet_persist::{AdapterStatusRecord, AdapterStatusWrite, Cancellation, Store, UpsertOutcome, UpsertPlan};

use crate::clock::Clock;
use crate::error::{ApiError, ApiResult};

/// Successful results of a report. Rejections are `Err(ApiError)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum ReportOutcome {
    /// The row was created (`created == true`) or updated.
    Stored { status: AdapterStatus, created: bool },
    /// Accepted but not applied; the stored row is untouched.
    Discarded { reason: RejectionReason },
}

pub struct Reconciler {
    store: Arc<dyn Store>,
    kinds: Arc<KindRegistry>,
    clock: Arc<dyn Clock>,
}

fn record_outcome(outcome: &'static str) {
    counter!("adapter_status_reports_total", 1u64, "outcome" => outcome);
}

impl Reconciler {
    pub fn new(store: Arc<dyn Store>, kinds: Arc<KindRegistry>, clock: Arc<dyn Clock>) -> Self {
        Self { store, kinds, clock }
    }

    pub fn reconcile(
        &self,
        cancel: &Cancellation,
        resource: &ResourceRef,
        report: &IncomingAdapterStatus,
    ) -> ApiResult<ReportOutcome> {
        let started = Instant::now();
        let res = self.reconcile_inner(cancel, resource, report);
        histogram!("reconcile_ms", started.elapsed().as_secs_f64() * 1000.0);
        match &res {
            Ok(ReportOutcome::Stored { created, .. }) => {
                record_outcome("stored");
                info!(resource_type = %resource.kind, resource_id = %resource.id, adapter = %report.adapter, created, took_ms = %started.elapsed().as_millis(), "reconcile: stored");
            }
            Ok(ReportOutcome::Discarded { reason }) => {
                record_outcome("discarded");
                info!(resource_type = %resource.kind, resource_id = %resource.id, adapter = %report.adapter, %reason, "reconcile: discarded");
            }
            Err(e @ (ApiError::Validation { .. } | ApiError::NotFound(_))) => {
                record_outcome("rejected");
                info!(resource_type = %resource.kind, resource_id = %resource.id, adapter = %report.adapter, error = %e, "reconcile: rejected");
            }
            Err(e) => {
                record_outcome("error");
                error!(resource_type = %resource.kind, resource_id = %resource.id, adapter = %report.adapter, error = %e, "reconcile: failed");
            }
        }
        res
    }

    fn reconcile_inner(
        &self,
        cancel: &Cancellation,
        resource: &ResourceRef,
        report: &IncomingAdapterStatus,
    ) -> ApiResult<ReportOutcome> {
        let kind = self.kinds.resolve(&resource.kind)?;
        report.validate()?;

        let key = AdapterStatusKey::new(resource, report.adapter.clone());

        let mut discarded: Option<RejectionReason> = None;
        let mut history_error: Option<String> = None;
        let mut build_error = None;
        let mut plan = |existing: Option<&AdapterStatusRecord>| {
            if let Err(reason) = validate_mandatory(&report.conditions, &kind.mandatory_conditions) {
                discarded = Some(reason);
                return UpsertPlan::Skip;
            }
            // Read under the write lock and never behind the stored row, so
            // racing reports cannot move timestamps backwards.
            let now = match existing {
                Some(e) => self.clock.now().max(e.last_report_time),
                None => self.clock.now(),
            };
            let incoming = match report.condition_document(now) {
                Ok(doc) => doc,
                Err(e) => {
                    build_error = Some(e);
                    return UpsertPlan::Skip;
                }
            };
            let merged = merge_stored(existing.map(|e| e.conditions.as_str()), incoming, now);
            history_error = merged.history_error;
            UpsertPlan::Write(AdapterStatusWrite {
                observed_generation: report.observed_generation,
                conditions: merged.document.to_json(),
                data: report.data.clone(),
                metadata: report.metadata.clone(),
                now,
            })
        };
        let outcome = self.store.upsert_adapter_status(cancel, &key, &mut plan)?;
        if let Some(e) = build_error {
            return Err(e.into());
        }

        if let Some(err) = history_error {
            counter!("adapter_status_history_corrupt_total", 1u64);
            warn!(resource_type = %key.resource_type, resource_id = %key.resource_id, adapter = %key.adapter, error = %err, "reconcile: stored conditions unreadable, merged as new");
        }
        let (record, created) = match outcome {
            UpsertOutcome::Skipped => {
                return Ok(ReportOutcome::Discarded { reason: discarded.unwrap_or_default() });
            }
            UpsertOutcome::Inserted(r) => (r, true),
            UpsertOutcome::Updated(r) => (r, false),
        };
        let status = record.into_status().map_err(|e| ApiError::Internal(format!("stored status unreadable: {e}")))?;
        Ok(ReportOutcome::Stored { status, created })
    }
}
