//! The persistence collaborator the registration flow depends on.
//!
//! Only three operations matter to the assembler: read the newest record,
//! append records, and update a record by handle. `reserve_sequence` backs the
//! counter allocation strategy and `list` feeds the roster.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::error::{Error, Result};
use crate::models::{DocId, IdCardMarker, NewRecord, PersistedRecord};

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Most recently created record, optionally restricted to ids starting
    /// with `<prefix>-`.
    async fn latest(&self, prefix: Option<&str>) -> Result<Option<PersistedRecord>>;

    /// Appends every record or none of them. A student id that is already
    /// stored (or repeated within the batch) fails with `Error::DuplicateId`.
    async fn append_batch(&self, records: &[NewRecord]) -> Result<Vec<PersistedRecord>>;

    async fn append(&self, record: &NewRecord) -> Result<DocId> {
        let saved = self.append_batch(std::slice::from_ref(record)).await?;
        saved
            .first()
            .map(|saved| saved.doc_id)
            .ok_or_else(|| Error::RecordNotFound {
                doc_id: record.student_id.clone(),
            })
    }

    async fn mark_id_generated(&self, doc_id: DocId, marker: &IdCardMarker) -> Result<()>;

    /// Atomically reserves `count` sequence numbers and returns the last number
    /// handed out before this reservation.
    async fn reserve_sequence(&self, count: u64) -> Result<u64>;

    /// All records, oldest first.
    async fn list(&self) -> Result<Vec<PersistedRecord>>;
}

#[derive(Debug, Default)]
struct MemoryState {
    records: Vec<PersistedRecord>,
    counter: u64,
}

/// In-process store. Records keep insertion order, which doubles as creation
/// order.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        // A poisoned lock only means a test panicked mid-write; the data is still usable.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn len(&self) -> usize {
        self.state().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn persisted(record: &NewRecord, created_at: DateTime<Utc>) -> PersistedRecord {
    PersistedRecord {
        doc_id: DocId::new(),
        student_id: record.student_id.clone(),
        family_id: record.family_id.clone(),
        sequence: record.sequence,
        is_primary: record.is_primary,
        record: record.record.clone(),
        created_at,
        id_generated: false,
        generated_id: None,
        generated_at: None,
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn latest(&self, prefix: Option<&str>) -> Result<Option<PersistedRecord>> {
        let state = self.state();
        let found = match prefix {
            None => state.records.last(),
            Some(prefix) => {
                let wanted = format!("{prefix}-");
                state
                    .records
                    .iter()
                    .rev()
                    .find(|record| record.student_id.starts_with(&wanted))
            }
        };
        Ok(found.cloned())
    }

    async fn append_batch(&self, records: &[NewRecord]) -> Result<Vec<PersistedRecord>> {
        let mut state = self.state();

        let mut taken: HashSet<&str> = state
            .records
            .iter()
            .map(|record| record.student_id.as_str())
            .collect();
        for record in records {
            if !taken.insert(record.student_id.as_str()) {
                return Err(Error::DuplicateId {
                    student_id: record.student_id.clone(),
                });
            }
        }

        let created_at = Utc::now();
        let saved: Vec<PersistedRecord> = records
            .iter()
            .map(|record| persisted(record, created_at))
            .collect();
        state.records.extend(saved.iter().cloned());
        debug!("Appended {} record(s) to memory store", saved.len());
        Ok(saved)
    }

    async fn mark_id_generated(&self, doc_id: DocId, marker: &IdCardMarker) -> Result<()> {
        let mut state = self.state();
        let record = state
            .records
            .iter_mut()
            .find(|record| record.doc_id == doc_id)
            .ok_or_else(|| Error::RecordNotFound {
                doc_id: doc_id.to_string(),
            })?;
        record.id_generated = true;
        record.generated_id = Some(marker.generated_id.clone());
        record.generated_at = Some(marker.generated_at);
        Ok(())
    }

    async fn reserve_sequence(&self, count: u64) -> Result<u64> {
        let mut state = self.state();
        let highest = state
            .records
            .iter()
            .map(|record| record.sequence)
            .max()
            .unwrap_or(0);
        let last = state.counter.max(highest);
        state.counter = last
            .checked_add(count)
            .ok_or_else(|| Error::SequenceExhausted {
                prefix: "the shared counter".to_string(),
            })?;
        Ok(last)
    }

    async fn list(&self) -> Result<Vec<PersistedRecord>> {
        Ok(self.state().records.clone())
    }
}
