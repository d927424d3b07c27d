//! Workspace problem records: upserted when an LLM request
//! is rejected (non-retriable 4xx), keyed by dialog id so repeated failures
//! on the same dialog don't pile up duplicate records.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use dominds_core::ids::DialogId;

#[derive(Debug, Clone)]
pub struct ProblemRecord {
    pub dialog_id: DialogId,
    pub kind: String,
    pub detail: String,
    pub occurred_at: DateTime<Utc>,
}

/// Sink for problem records. Persistence's concrete storage is out of
/// scope; this trait is the narrow seam `dominds-runtime` writes
/// through, with an in-process implementation for tests and the CLI demo.
pub trait ProblemSink: Send + Sync {
    fn upsert(&self, record: ProblemRecord);
    fn for_dialog(&self, dialog_id: DialogId) -> Option<ProblemRecord>;
}

#[derive(Default)]
pub struct InMemoryProblemSink {
    records: Mutex<HashMap<DialogId, ProblemRecord>>,
}

impl InMemoryProblemSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProblemSink for InMemoryProblemSink {
    fn upsert(&self, record: ProblemRecord) {
        self.records.lock().expect("problem sink poisoned").insert(record.dialog_id, record);
    }

    fn for_dialog(&self, dialog_id: DialogId) -> Option<ProblemRecord> {
        self.records.lock().expect("problem sink poisoned").get(&dialog_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upsert_replaces_prior_record_for_same_dialog() {
        let sink = InMemoryProblemSink::new();
        let id = DialogId::new_root();
        sink.upsert(ProblemRecord {
            dialog_id: id,
            kind: "llm_provider_rejected_request".into(),
            detail: "first".into(),
            occurred_at: Utc::now(),
        });
        sink.upsert(ProblemRecord {
            dialog_id: id,
            kind: "llm_provider_rejected_request".into(),
            detail: "second".into(),
            occurred_at: Utc::now(),
        });
        assert_eq!(sink.for_dialog(id).unwrap().detail, "second");
    }
}
