use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::store::RecordStore;

/// How the next sequence number is obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IdStrategy {
    /// Read the newest record and add one. Two submissions that read the same
    /// record compute the same id; the store's uniqueness check rejects the
    /// second append.
    #[default]
    LatestRecord,
    /// Reserve numbers from the store's single counter, shared by every
    /// prefix. Never collides. Only valid with `IdScope::Global`.
    Counter,
}

/// Which records a `LatestRecord` read considers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IdScope {
    /// One sequence shared by every prefix.
    #[default]
    Global,
    /// A separate sequence per prefix.
    PerPrefix,
}

/// Every digit in an identifier read as one number, e.g. 7 for `STU-007`
/// and for `STU-007A`. Prefixes are letters only, so no prefix digit leaks in.
pub fn parse_sequence(id: &str) -> Option<u64> {
    let digits: String = id.chars().filter(char::is_ascii_digit).collect();
    digits.parse().ok()
}

fn next_sequence(last: u64, step: u64, prefix: &str) -> Result<u64> {
    last.checked_add(step).ok_or_else(|| Error::SequenceExhausted {
        prefix: prefix.to_string(),
    })
}

pub fn format_id(prefix: &str, sequence: u64, padding: usize) -> String {
    format!("{prefix}-{sequence:0padding$}")
}

/// Sequence of the newest record. An id without a readable number falls back
/// to the sequence stored alongside it.
async fn last_sequence(store: &dyn RecordStore, prefix: Option<&str>) -> Result<u64> {
    let Some(latest) = store.latest(prefix).await? else {
        return Ok(0);
    };
    match parse_sequence(&latest.student_id) {
        Some(sequence) => Ok(sequence),
        None => {
            warn!(
                student_id = %latest.student_id,
                sequence = latest.sequence,
                "Latest student id has no readable number, using its stored sequence"
            );
            Ok(latest.sequence)
        }
    }
}

/// Reads the newest record and returns the identifier after it. Nothing is
/// reserved: two callers that read before either writes get the same answer.
pub async fn assign_sequential_id(
    store: &dyn RecordStore,
    prefix: &str,
    scope: IdScope,
    padding: usize,
) -> Result<String> {
    let filter = match scope {
        IdScope::Global => None,
        IdScope::PerPrefix => Some(prefix),
    };
    let last = last_sequence(store, filter).await?;
    Ok(format_id(prefix, next_sequence(last, 1, prefix)?, padding))
}

#[derive(Debug, Clone, Copy)]
pub struct IdAllocator {
    pub strategy: IdStrategy,
    pub scope: IdScope,
    pub padding: usize,
}

impl IdAllocator {
    /// Hands out one `(student_id, sequence)` per prefix, in order. A family is
    /// numbered from a single read of the store.
    pub async fn allocate(
        &self,
        store: &dyn RecordStore,
        prefixes: &[&str],
    ) -> Result<Vec<(String, u64)>> {
        let sequences = match self.strategy {
            IdStrategy::Counter => {
                let base = store.reserve_sequence(prefixes.len() as u64).await?;
                prefixes
                    .iter()
                    .zip(1u64..)
                    .map(|(prefix, offset)| next_sequence(base, offset, prefix))
                    .collect::<Result<Vec<u64>>>()?
            }
            IdStrategy::LatestRecord => self.next_from_latest(store, prefixes).await?,
        };

        let assigned: Vec<(String, u64)> = prefixes
            .iter()
            .zip(sequences)
            .map(|(prefix, sequence)| (format_id(prefix, sequence, self.padding), sequence))
            .collect();
        debug!(?assigned, strategy = ?self.strategy, "Allocated student ids");
        Ok(assigned)
    }

    async fn next_from_latest(&self, store: &dyn RecordStore, prefixes: &[&str]) -> Result<Vec<u64>> {
        let mut sequences = Vec::with_capacity(prefixes.len());
        match self.scope {
            IdScope::Global => {
                let mut last = last_sequence(store, None).await?;
                for prefix in prefixes {
                    last = next_sequence(last, 1, prefix)?;
                    sequences.push(last);
                }
            }
            IdScope::PerPrefix => {
                let mut last_by_prefix: HashMap<&str, u64> = HashMap::new();
                for prefix in prefixes {
                    let last = match last_by_prefix.get(prefix) {
                        Some(last) => *last,
                        None => last_sequence(store, Some(*prefix)).await?,
                    };
                    let next = next_sequence(last, 1, prefix)?;
                    last_by_prefix.insert(*prefix, next);
                    sequences.push(next);
                }
            }
        }
        Ok(sequences)
    }
}
