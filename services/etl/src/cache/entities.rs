use tracing::{info, warn};

use super::{CacheStats, SharedCache};
use crate::config::CacheConfig;
use crate::descriptor::CountryNameField;
use crate::model::{CountryRow, MetricRow};
use crate::parser::period::PeriodKey;
use crate::storage::{Storage, StorageResult};

/// Statistics of one named cache.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NamedStats {
    pub name: &'static str,
    pub stats: CacheStats,
}

/// The seven entity caches of a run.
pub struct EntityCaches {
    /// country name → id
    pub countries: SharedCache<String, i32>,
    /// (country id, city name) → id
    pub cities: SharedCache<(i32, String), i32>,
    /// slug → metric
    pub metrics: SharedCache<String, MetricRow>,
    /// (metric id, attribute hash) → id
    pub series: SharedCache<(i32, String), i32>,
    pub periods: SharedCache<PeriodKey, i32>,
    /// code → id
    pub attribute_types: SharedCache<String, i32>,
    /// (attribute type id, code) → id
    pub attribute_values: SharedCache<(i32, String), i32>,
}

impl EntityCaches {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            countries: SharedCache::new("country", config.country),
            cities: SharedCache::new("city", config.city),
            metrics: SharedCache::new("metric", config.metric),
            series: SharedCache::new("series", config.series),
            periods: SharedCache::new("period", config.period),
            attribute_types: SharedCache::new("attribute_type", config.attribute_type),
            attribute_values: SharedCache::new("attribute_value", config.attribute_value),
        }
    }

    pub async fn clear_all(&self) {
        self.countries.clear().await;
        self.cities.clear().await;
        self.metrics.clear().await;
        self.series.clear().await;
        self.periods.clear().await;
        self.attribute_types.clear().await;
        self.attribute_values.clear().await;
    }

    pub async fn stats(&self) -> Vec<NamedStats> {
        vec![
            named(&self.countries).await,
            named(&self.cities).await,
            named(&self.metrics).await,
            named(&self.series).await,
            named(&self.periods).await,
            named(&self.attribute_types).await,
            named(&self.attribute_values).await,
        ]
    }

    /// Load every country into the cache and return the rows read.
    pub async fn preload_countries<S: Storage>(
        &self,
        storage: &S,
        field: CountryNameField,
    ) -> StorageResult<Vec<CountryRow>> {
        let rows = storage.list_countries(field).await?;
        let capacity = self.countries.stats().await.capacity;
        if rows.len() > capacity {
            warn!(
                countries = rows.len(),
                capacity, "country cache smaller than the country table, lookups will hit storage"
            );
        }
        self.countries
            .set_many(rows.iter().map(|c| (c.name.clone(), c.id)))
            .await;
        info!(count = rows.len(), "countries preloaded");
        Ok(rows)
    }

    /// Load the attribute vocabulary. Returns (types, values) loaded.
    pub async fn preload_attributes<S: Storage>(&self, storage: &S) -> StorageResult<(usize, usize)> {
        let types = storage.list_attribute_types().await?;
        self.attribute_types
            .set_many(types.iter().map(|t| (t.code.clone(), t.id)))
            .await;

        let values = storage.list_attribute_values().await?;
        self.attribute_values
            .set_many(
                values
                    .iter()
                    .map(|v| ((v.attribute_type_id, v.code.clone()), v.id)),
            )
            .await;

        info!(types = types.len(), values = values.len(), "attribute vocabulary preloaded");
        Ok((types.len(), values.len()))
    }

    pub async fn preload_series<S: Storage>(&self, storage: &S, metric_id: i32) -> StorageResult<usize> {
        let mut rows = storage.list_series(metric_id).await?;
        rows.truncate(self.series.stats().await.capacity);
        let count = rows.len();
        self.series
            .set_many(rows.into_iter().map(|s| ((s.metric_id, s.hash), s.id)))
            .await;
        info!(metric_id, count, "series preloaded");
        Ok(count)
    }

    /// Load the most recent periods, bounded by the period cache capacity.
    pub async fn preload_periods<S: Storage>(&self, storage: &S) -> StorageResult<usize> {
        let limit = self.periods.stats().await.capacity;
        let rows = storage.list_periods(limit).await?;
        let count = rows.len();
        // oldest first so the most recent end up most recently used
        self.periods
            .set_many(rows.into_iter().rev().map(|p| (p.key, p.id)))
            .await;
        info!(count, "periods preloaded");
        Ok(count)
    }
}

async fn named<K, V>(cache: &SharedCache<K, V>) -> NamedStats
where
    K: Eq + std::hash::Hash + Clone,
    V: Clone,
{
    NamedStats {
        name: cache.name(),
        stats: cache.stats().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::period::{PeriodData, PeriodType};
    use crate::storage::memory::MemoryStorage;

    fn small() -> CacheConfig {
        CacheConfig {
            country: 2,
            period: 2,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_preload_countries_fills_cache() {
        let store = MemoryStorage::new();
        let chile = store.add_country("Chile");
        store.add_country("Peru");

        let caches = EntityCaches::new(&CacheConfig::default());
        let rows = caches
            .preload_countries(&store, CountryNameField::Name)
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(caches.countries.get(&"Chile".to_string()).await, Some(chile));
    }

    #[tokio::test]
    async fn test_preload_periods_respects_capacity() {
        let store = MemoryStorage::new();
        let periods: Vec<PeriodData> = (2018..2022)
            .map(|year| PeriodData {
                period_type: PeriodType::Yearly,
                year: Some(year),
                ..Default::default()
            })
            .collect();
        store.create_periods(&periods).await.unwrap();

        let caches = EntityCaches::new(&small());
        assert_eq!(caches.preload_periods(&store).await.unwrap(), 2);
        let newest = periods[3].key();
        assert!(caches.periods.get(&newest).await.is_some());
    }

    #[tokio::test]
    async fn test_stats_lists_every_cache() {
        let caches = EntityCaches::new(&small());
        caches.countries.set("Chile".to_string(), 1).await;
        caches.clear_all().await;
        let stats = caches.stats().await;
        assert_eq!(stats.len(), 7);
        assert_eq!(stats[0].name, "country");
        assert_eq!(stats[0].stats.size, 0);
        assert_eq!(stats[0].stats.capacity, 2);
    }
}
