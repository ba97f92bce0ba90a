//! Bulk loader: staged insert with duplicate suppression on the natural key.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::model::FactRow;
use crate::storage::{Storage, StorageResult};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadOutcome {
    pub attempted: u64,
    pub inserted: u64,
    /// Rows suppressed because their natural key was already stored or
    /// repeated within the batch.
    pub duplicates: u64,
}

pub struct BulkLoader<S> {
    storage: Arc<S>,
    skip_duplicates: bool,
}

impl<S: Storage> BulkLoader<S> {
    pub fn new(storage: Arc<S>, skip_duplicates: bool) -> Self {
        Self {
            storage,
            skip_duplicates,
        }
    }

    pub async fn load(&self, rows: &[FactRow]) -> StorageResult<LoadOutcome> {
        if rows.is_empty() {
            return Ok(LoadOutcome::default());
        }

        let attempted = rows.len() as u64;
        let inserted = self.storage.insert_facts(rows).await?;
        let duplicates = attempted.saturating_sub(inserted);

        if duplicates > 0 {
            if self.skip_duplicates {
                debug!(attempted, inserted, duplicates, "duplicate facts suppressed");
            } else {
                warn!(attempted, inserted, duplicates, "batch contained facts that already exist");
            }
        }
        Ok(LoadOutcome {
            attempted,
            inserted,
            duplicates,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FactValue;
    use crate::storage::memory::MemoryStorage;
    use rust_decimal::Decimal;

    fn fact(country_id: i32, city_id: Option<i32>) -> FactRow {
        FactRow {
            series_id: 1,
            period_id: 1,
            country_id,
            city_id,
            value: FactValue::Numeric(Decimal::ONE),
        }
    }

    #[tokio::test]
    async fn test_reload_is_a_noop() {
        let store = Arc::new(MemoryStorage::new());
        let loader = BulkLoader::new(store.clone(), true);
        let rows = vec![fact(1, None), fact(2, None), fact(1, Some(9))];

        let first = loader.load(&rows).await.unwrap();
        assert_eq!((first.inserted, first.duplicates), (3, 0));

        let second = loader.load(&rows).await.unwrap();
        assert_eq!(second, LoadOutcome { attempted: 3, inserted: 0, duplicates: 3 });
        assert_eq!(store.fact_count(), 3);
    }

    #[tokio::test]
    async fn test_country_level_rows_compare_equal() {
        let store = Arc::new(MemoryStorage::new());
        let loader = BulkLoader::new(store.clone(), false);
        let outcome = loader.load(&[fact(1, None), fact(1, None)]).await.unwrap();
        assert_eq!(outcome.inserted, 1);
        assert_eq!(outcome.duplicates, 1);
    }

    #[tokio::test]
    async fn test_empty_batch_skips_storage() {
        let store = Arc::new(MemoryStorage::new());
        let loader = BulkLoader::new(store.clone(), true);
        assert_eq!(loader.load(&[]).await.unwrap(), LoadOutcome::default());
        assert_eq!(store.call_count("insert_facts"), 0);
    }
}
