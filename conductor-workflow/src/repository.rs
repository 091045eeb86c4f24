//! Persistence hook (spec §6): a narrow, write-through interface the engine
//! calls through, never queries. The concrete store (users, conversations,
//! messages, tasks) lives outside this crate entirely (spec §1).

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

/// Which of the two records a step produced (spec §3 invariant d, §6 "dual
/// raw+formatted persistence").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentType {
    RawResult,
    FormattedResult,
}

#[derive(Debug, Clone)]
pub struct StepRecord {
    pub run_id: String,
    pub step_index: usize,
    pub content_type: ContentType,
    pub payload: Value,
}

/// Write-through hook for step results. Each write must be idempotent
/// against re-delivery (spec §5); the core makes no query against these
/// records, so the trait is write-only by design.
#[async_trait]
pub trait ConversationRepository: Send + Sync {
    async fn record_step(&self, record: StepRecord);
}

/// Discards every write. Useful when the caller has no persistence layer
/// wired up yet, or for components under test that don't care about it.
#[derive(Debug, Default)]
pub struct NullRepository;

#[async_trait]
impl ConversationRepository for NullRepository {
    async fn record_step(&self, _record: StepRecord) {}
}

/// Keeps every write in memory, for test assertions against the dual
/// raw/formatted persistence contract.
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    records: Mutex<Vec<StepRecord>>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<StepRecord> {
        self.records.lock().clone()
    }

    pub fn records_for_step(&self, step_index: usize) -> Vec<StepRecord> {
        self.records
            .lock()
            .iter()
            .filter(|r| r.step_index == step_index)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl ConversationRepository for InMemoryRepository {
    async fn record_step(&self, record: StepRecord) {
        self.records.lock().push(record);
    }
}
