use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;

use super::{Activity, ActivityError, STORE_EXPIRATION, decode, success};
use crate::expiration::{ExpirationStore, ExpiredCardRow};

/// Records an activated card in the expiration table.
pub struct StoreExpirationActivity<E> {
    store: Arc<E>,
}

impl<E> StoreExpirationActivity<E> {
    pub fn new(store: Arc<E>) -> Self {
        Self { store }
    }
}

impl<E: ExpirationStore + 'static> Activity for StoreExpirationActivity<E> {
    fn name(&self) -> &'static str {
        STORE_EXPIRATION
    }

    fn run(&self, input: Value) -> BoxFuture<'_, Result<Value, ActivityError>> {
        Box::pin(async move {
            let row: ExpiredCardRow = decode(input)?;
            if row.subject_id.as_str().trim().is_empty() {
                return Err(ActivityError::Invalid("subject id is empty".into()));
            }
            if row.expiration_date <= row.activation_date {
                return Err(ActivityError::Invalid(
                    "expiration date must follow activation date".into(),
                ));
            }
            // Insert replaces, so a retried attempt leaves a single row.
            self.store.insert(row).await?;
            success()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::card::SubjectId;
    use crate::expiration::MemoryExpirationStore;
    use chrono::{Duration, Utc};
    use serde_json::json;

    #[tokio::test]
    async fn stores_row() {
        let store = Arc::new(MemoryExpirationStore::new());
        let activity = StoreExpirationActivity::new(store.clone());
        let now = Utc::now();
        let row = ExpiredCardRow {
            subject_id: SubjectId::new("BNCLRA01A41H501X"),
            activation_date: now,
            expiration_date: now + Duration::days(365),
        };

        activity.run(serde_json::to_value(&row).unwrap()).await.unwrap();
        assert_eq!(store.get(&row.subject_id), Some(row));
    }

    #[tokio::test]
    async fn rejects_inverted_dates() {
        let store = Arc::new(MemoryExpirationStore::new());
        let activity = StoreExpirationActivity::new(store);
        let now = Utc::now();
        let input = json!({
            "subject_id": "BNCLRA01A41H501X",
            "activation_date": now,
            "expiration_date": now - Duration::days(1),
        });

        let err = activity.run(input).await.unwrap_err();
        assert!(matches!(err, ActivityError::Invalid(_)));
    }

    #[tokio::test]
    async fn malformed_payload_is_a_decode_error() {
        let activity = StoreExpirationActivity::new(Arc::new(MemoryExpirationStore::new()));
        let err = activity.run(json!({"subject_id": 7})).await.unwrap_err();
        assert!(matches!(err, ActivityError::Decode(_)));
    }
}
