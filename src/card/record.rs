use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::status::{CardStatus, SubjectId};
use crate::error::StoreError;

/// A card document as held by the document store.
///
/// `version` is the optimistic-concurrency token: `None` for a record that has
/// never been stored, otherwise the token returned by the last write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardRecord {
    pub subject_id: SubjectId,
    pub status: CardStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub card_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl CardRecord {
    pub fn new(subject_id: SubjectId, status: CardStatus) -> Self {
        Self {
            subject_id,
            status,
            card_number: None,
            version: None,
        }
    }
}

/// Document store holding one card record per subject.
pub trait CardStore: Send + Sync {
    fn find_by_subject(
        &self,
        subject: &SubjectId,
    ) -> impl Future<Output = Result<Option<CardRecord>, StoreError>> + Send;

    /// Writes `record`, failing with [`StoreError::Conflict`] when its version
    /// token does not match the stored one.
    fn upsert(
        &self,
        record: CardRecord,
    ) -> impl Future<Output = Result<CardRecord, StoreError>> + Send;
}

/// In-process [`CardStore`].
#[derive(Debug, Default)]
pub struct MemoryCardStore {
    records: Mutex<HashMap<SubjectId, CardRecord>>,
}

impl MemoryCardStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().expect("card store lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CardStore for MemoryCardStore {
    async fn find_by_subject(&self, subject: &SubjectId) -> Result<Option<CardRecord>, StoreError> {
        let records = self.records.lock().expect("card store lock poisoned");
        Ok(records.get(subject).cloned())
    }

    async fn upsert(&self, mut record: CardRecord) -> Result<CardRecord, StoreError> {
        let mut records = self.records.lock().expect("card store lock poisoned");
        let found = records
            .get(&record.subject_id)
            .and_then(|existing| existing.version.clone());
        if found != record.version {
            return Err(StoreError::Conflict {
                expected: record.version,
                found,
            });
        }
        record.version = Some(Uuid::new_v4().to_string());
        records.insert(record.subject_id.clone(), record.clone());
        Ok(record)
    }
}
