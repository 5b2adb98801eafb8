//! Table of activated cards keyed by expiration date.
//!
//! Rows are written by the expiration-persistence activity when a card is
//! activated and scanned by the expiration sweep.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::card::SubjectId;
use crate::error::StoreError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpiredCardRow {
    pub subject_id: SubjectId,
    pub activation_date: DateTime<Utc>,
    pub expiration_date: DateTime<Utc>,
}

pub trait ExpirationStore: Send + Sync {
    /// Insert or replace the row for `row.subject_id`.
    fn insert(&self, row: ExpiredCardRow) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// All rows whose expiration date is at or before `now`.
    fn expired_before(
        &self,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<Vec<ExpiredCardRow>, StoreError>> + Send;

    fn remove(&self, subject: &SubjectId) -> impl Future<Output = Result<(), StoreError>> + Send;
}

/// In-process [`ExpirationStore`].
#[derive(Debug, Default)]
pub struct MemoryExpirationStore {
    rows: Mutex<BTreeMap<SubjectId, ExpiredCardRow>>,
}

impl MemoryExpirationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, subject: &SubjectId) -> Option<ExpiredCardRow> {
        self.rows
            .lock()
            .expect("expiration store lock poisoned")
            .get(subject)
            .cloned()
    }
}

impl ExpirationStore for MemoryExpirationStore {
    async fn insert(&self, row: ExpiredCardRow) -> Result<(), StoreError> {
        let mut rows = self.rows.lock().expect("expiration store lock poisoned");
        rows.insert(row.subject_id.clone(), row);
        Ok(())
    }

    async fn expired_before(&self, now: DateTime<Utc>) -> Result<Vec<ExpiredCardRow>, StoreError> {
        let rows = self.rows.lock().expect("expiration store lock poisoned");
        Ok(rows
            .values()
            .filter(|row| row.expiration_date <= now)
            .cloned()
            .collect())
    }

    async fn remove(&self, subject: &SubjectId) -> Result<(), StoreError> {
        let mut rows = self.rows.lock().expect("expiration store lock poisoned");
        rows.remove(subject);
        Ok(())
    }
}
