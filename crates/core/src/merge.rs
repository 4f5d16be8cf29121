//! Condition merge engine.
//!
//! The incoming document fully replaces the previous one. The only thing that
//! survives from `previous` is bookkeeping for types whose status did not
//! change: `last_transition_time` and `created_time`.

use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;

use crate::condition::{Condition, ConditionDocument};

pub fn merge(
    previous: Option<&ConditionDocument>,
    incoming: ConditionDocument,
    now: DateTime<Utc>,
) -> ConditionDocument {
    let mut by_type: FxHashMap<&str, &Condition> = FxHashMap::default();
    if let Some(prev) = previous {
        for c in prev {
            by_type.insert(c.r#type.as_str(), c);
        }
    }

    let merged = incoming
        .into_inner()
        .into_iter()
        .map(|mut c| {
            match by_type.get(c.r#type.as_str()) {
                Some(p) if p.status == c.status => {
                    c.last_transition_time = p.last_transition_time;
                    c.created_time = p.created_time.or(Some(now));
                }
                Some(p) => {
                    c.last_transition_time = now;
                    c.created_time = p.created_time.or(Some(now));
                }
                None => {
                    c.last_transition_time = now;
                    c.created_time = Some(now);
                }
            }
            c.last_updated_time = Some(now);
            c
        })
        .collect();
    // Order and type set come from `incoming`, which was already unique.
    ConditionDocument::from_unique(merged)
}

/// Result of merging against a stored (possibly damaged) document.
#[derive(Debug, Clone)]
pub struct StoredMerge {
    pub document: ConditionDocument,
    /// Set when the stored document was unreadable and was treated as absent.
    pub history_error: Option<String>,
}

/// Merge against the raw JSON column value. Unreadable history degrades to
/// "no previous document" instead of failing the write.
pub fn merge_stored(
    previous_raw: Option<&str>,
    incoming: ConditionDocument,
    now: DateTime<Utc>,
) -> StoredMerge {
    let (previous, history_error) = match previous_raw.map(ConditionDocument::from_json) {
        Some(Ok(doc)) => (Some(doc), None),
        Some(Err(e)) => (None, Some(e.to_string())),
        None => (None, None),
    };
    StoredMerge { document: merge(previous.as_ref(), incoming, now), history_error }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::ConditionInput;
    use crate::ConditionStatus::{self, False, True};
    use chrono::TimeZone;

    fn ts(s: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(s, 0).single().unwrap()
    }

    fn doc(pairs: &[(&str, ConditionStatus)], generation: i64, at: DateTime<Utc>) -> ConditionDocument {
        let v = pairs
            .iter()
            .map(|(t, s)| Condition::from_input(ConditionInput::new(*t, *s), generation, at))
            .collect();
        ConditionDocument::new(v).unwrap()
    }

    #[test]
    fn absent_previous_stamps_everything_now() {
        let out = merge(None, doc(&[("Ready", True)], 1, ts(5)), ts(9));
        let ready = out.get("Ready").unwrap();
        assert_eq!(ready.last_transition_time, ts(9));
        assert_eq!(ready.created_time, Some(ts(9)));
        assert_eq!(ready.last_updated_time, Some(ts(9)));
    }

    #[test]
    fn unchanged_status_keeps_transition_time() {
        let prev = doc(&[("Available", True), ("Applied", True)], 1, ts(100));
        let mut next = doc(&[("Available", False), ("Applied", True)], 2, ts(0)).into_inner();
        next[1].reason = Some("StillApplied".into());
        let out = merge(Some(&prev), ConditionDocument::new(next).unwrap(), ts(200));

        let available = out.get("Available").unwrap();
        assert_eq!(available.last_transition_time, ts(200));
        assert_eq!(available.created_time, Some(ts(100)));

        let applied = out.get("Applied").unwrap();
        assert_eq!(applied.last_transition_time, ts(100));
        assert_eq!(applied.reason.as_deref(), Some("StillApplied"));
        assert_eq!(applied.observed_generation, 2);
        assert_eq!(applied.last_updated_time, Some(ts(200)));
    }

    #[test]
    fn types_only_in_previous_are_dropped_and_order_follows_incoming() {
        let prev = doc(&[("Old", True), ("Ready", True)], 1, ts(1));
        let out = merge(Some(&prev), doc(&[("Zeta", True), ("Ready", True)], 1, ts(0)), ts(2));
        let types: Vec<&str> = out.iter().map(|c| c.r#type.as_str()).collect();
        assert_eq!(types, vec!["Zeta", "Ready"]);
    }

    #[test]
    fn corrupt_history_is_treated_as_absent() {
        let out = merge_stored(Some("{{{"), doc(&[("Ready", True)], 1, ts(0)), ts(7));
        assert!(out.history_error.is_some());
        assert_eq!(out.document.get("Ready").unwrap().last_transition_time, ts(7));

        let prev = doc(&[("Ready", True)], 1, ts(3)).to_json();
        let out = merge_stored(Some(&prev), doc(&[("Ready", True)], 1, ts(0)), ts(7));
        assert!(out.history_error.is_none());
        assert_eq!(out.document.get("Ready").unwrap().last_transition_time, ts(3));
    }
}
