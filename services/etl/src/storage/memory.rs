//! In-process storage used for dry runs and tests.
//!
//! Enforces the same uniqueness rules as the relational schema. Every call
//! yields to the scheduler first, so concurrent callers interleave the way
//! they would against a real database.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::{Storage, StorageResult};
use crate::descriptor::{CountryNameField, GeographyLevel, MetricSpec, SourceDescriptor};
use crate::error::StorageError;
use crate::model::{
    AttributeTypeRow, AttributeTypeSpec, AttributeValueRow, AttributeValueSpec, CityRow,
    CountryRow, FactRow, MetricRow, NaturalKey, NewSeries, PeriodRow, SeriesRow,
};
use crate::parser::period::{PeriodData, PeriodKey};

type InsertHook = Box<dyn Fn(u64) + Send + Sync>;

#[derive(Debug, Clone)]
struct Country {
    id: i32,
    name: String,
    name_eng: Option<String>,
}

impl Country {
    fn label(&self, field: CountryNameField) -> Option<&str> {
        match field {
            CountryNameField::Name => Some(&self.name),
            CountryNameField::NameEng => self.name_eng.as_deref(),
        }
    }
}

#[derive(Default)]
struct Inner {
    next_id: i32,
    countries: Vec<Country>,
    cities: HashMap<(i32, String), i32>,
    metrics: HashMap<String, MetricRow>,
    attribute_types: HashMap<String, AttributeTypeRow>,
    attribute_values: HashMap<(i32, String), AttributeValueRow>,
    series: HashMap<(i32, String), i32>,
    series_links: HashMap<i32, Vec<(i32, i32)>>,
    periods: HashMap<PeriodKey, (i32, PeriodData)>,
    facts: Vec<FactRow>,
    fact_keys: HashSet<NaturalKey>,
    calls: HashMap<&'static str, u64>,
    failures: HashMap<&'static str, u32>,
}

impl Inner {
    fn next_id(&mut self) -> i32 {
        self.next_id += 1;
        self.next_id
    }
}

#[derive(Default)]
pub struct MemoryStorage {
    inner: Mutex<Inner>,
    insert_hook: Mutex<Option<InsertHook>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn guard(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Lock for one storage operation, failing if a fault was injected for it.
    fn begin(&self, op: &'static str) -> StorageResult<MutexGuard<'_, Inner>> {
        let mut inner = self.guard();
        *inner.calls.entry(op).or_default() += 1;
        if let Some(left) = inner.failures.get_mut(op) {
            if *left > 0 {
                *left -= 1;
                return Err(StorageError::Unavailable(format!(
                    "injected failure in {}",
                    op
                )));
            }
        }
        Ok(inner)
    }

    // ── Seeding ───────────────────────────────────────────────────────────

    pub fn add_country(&self, name: &str) -> i32 {
        self.add_country_with_eng(name, None)
    }

    pub fn add_country_with_eng(&self, name: &str, name_eng: Option<&str>) -> i32 {
        let mut inner = self.guard();
        let id = inner.next_id();
        inner.countries.push(Country {
            id,
            name: name.to_string(),
            name_eng: name_eng.map(str::to_string),
        });
        id
    }

    /// Seed countries fetched from another store, keeping their ids.
    pub fn seed_countries(&self, rows: &[CountryRow]) {
        let mut inner = self.guard();
        for row in rows {
            inner.next_id = inner.next_id.max(row.id);
            inner.countries.push(Country {
                id: row.id,
                name: row.name.clone(),
                name_eng: Some(row.name.clone()),
            });
        }
    }

    /// Seed cities fetched from another store, keeping their ids.
    pub fn seed_cities(&self, rows: &[CityRow]) {
        let mut inner = self.guard();
        for row in rows {
            inner.next_id = inner.next_id.max(row.id);
            inner.cities.insert((row.country_id, row.name.clone()), row.id);
        }
    }

    /// Copy of the locations a run over `descriptor` reads from `source`:
    /// countries by the descriptor's lookup field, and cities when the
    /// descriptor works at city level.
    pub async fn seeded_from<S: Storage>(
        source: &S,
        descriptor: &SourceDescriptor,
    ) -> StorageResult<Self> {
        let store = Self::new();
        let countries = source.list_countries(descriptor.country_lookup).await?;
        store.seed_countries(&countries);
        if descriptor.geography_level == GeographyLevel::City {
            let cities = source.list_cities().await?;
            store.seed_cities(&cities);
        }
        Ok(store)
    }

    pub fn add_city(&self, country_id: i32, name: &str) -> i32 {
        let mut inner = self.guard();
        let id = inner.next_id();
        inner.cities.insert((country_id, name.to_string()), id);
        id
    }

    // ── Inspection and fault injection ────────────────────────────────────

    /// Make the next `times` calls of `op` fail with a transient error.
    pub fn fail_next(&self, op: &'static str, times: u32) {
        self.guard().failures.insert(op, times);
    }

    pub fn call_count(&self, op: &str) -> u64 {
        self.guard().calls.get(op).copied().unwrap_or_default()
    }

    /// Invoke `hook` with the inserted count after every fact insert.
    pub fn on_insert(&self, hook: impl Fn(u64) + Send + Sync + 'static) {
        *self
            .insert_hook
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Box::new(hook));
    }

    pub fn facts(&self) -> Vec<FactRow> {
        self.guard().facts.clone()
    }

    pub fn country_count(&self) -> usize {
        self.guard().countries.len()
    }

    pub fn city_count(&self) -> usize {
        self.guard().cities.len()
    }

    pub fn fact_count(&self) -> usize {
        self.guard().facts.len()
    }

    pub fn series_count(&self) -> usize {
        self.guard().series.len()
    }

    pub fn series_links(&self, series_id: i32) -> Vec<(i32, i32)> {
        self.guard()
            .series_links
            .get(&series_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn period_count(&self) -> usize {
        self.guard().periods.len()
    }

    pub fn attribute_type_count(&self) -> usize {
        self.guard().attribute_types.len()
    }

    pub fn attribute_value_count(&self) -> usize {
        self.guard().attribute_values.len()
    }
}

impl Storage for MemoryStorage {
    async fn list_countries(&self, field: CountryNameField) -> StorageResult<Vec<CountryRow>> {
        tokio::task::yield_now().await;
        let inner = self.begin("list_countries")?;
        Ok(inner
            .countries
            .iter()
            .filter_map(|c| {
                c.label(field).map(|name| CountryRow {
                    id: c.id,
                    name: name.to_string(),
                })
            })
            .collect())
    }

    async fn find_countries(
        &self,
        field: CountryNameField,
        names: &[String],
    ) -> StorageResult<Vec<CountryRow>> {
        tokio::task::yield_now().await;
        let inner = self.begin("find_countries")?;
        let wanted: HashSet<&str> = names.iter().map(String::as_str).collect();
        Ok(inner
            .countries
            .iter()
            .filter_map(|c| {
                c.label(field)
                    .filter(|name| wanted.contains(name))
                    .map(|name| CountryRow {
                        id: c.id,
                        name: name.to_string(),
                    })
            })
            .collect())
    }

    async fn list_cities(&self) -> StorageResult<Vec<CityRow>> {
        tokio::task::yield_now().await;
        let inner = self.begin("list_cities")?;
        Ok(inner
            .cities
            .iter()
            .map(|((country_id, name), id)| CityRow {
                id: *id,
                country_id: *country_id,
                name: name.clone(),
            })
            .collect())
    }

    async fn find_cities(&self, keys: &[(i32, String)]) -> StorageResult<Vec<CityRow>> {
        tokio::task::yield_now().await;
        let inner = self.begin("find_cities")?;
        Ok(keys
            .iter()
            .filter_map(|key| {
                inner.cities.get(key).map(|id| CityRow {
                    id: *id,
                    country_id: key.0,
                    name: key.1.clone(),
                })
            })
            .collect())
    }

    async fn get_or_create_metric(&self, spec: &MetricSpec) -> StorageResult<MetricRow> {
        tokio::task::yield_now().await;
        let mut inner = self.begin("get_or_create_metric")?;
        if let Some(row) = inner.metrics.get(&spec.slug).cloned() {
            return Ok(row);
        }
        let row = MetricRow {
            id: inner.next_id(),
            slug: spec.slug.clone(),
            name: spec.name.clone(),
            data_kind: spec.data_kind,
        };
        inner.metrics.insert(spec.slug.clone(), row.clone());
        Ok(row)
    }

    async fn list_attribute_types(&self) -> StorageResult<Vec<AttributeTypeRow>> {
        tokio::task::yield_now().await;
        let inner = self.begin("list_attribute_types")?;
        Ok(inner.attribute_types.values().cloned().collect())
    }

    async fn find_attribute_types(&self, codes: &[String]) -> StorageResult<Vec<AttributeTypeRow>> {
        tokio::task::yield_now().await;
        let inner = self.begin("find_attribute_types")?;
        Ok(codes
            .iter()
            .filter_map(|code| inner.attribute_types.get(code).cloned())
            .collect())
    }

    async fn create_attribute_types(
        &self,
        specs: &[AttributeTypeSpec],
    ) -> StorageResult<Vec<AttributeTypeRow>> {
        tokio::task::yield_now().await;
        let mut inner = self.begin("create_attribute_types")?;
        let mut rows = Vec::with_capacity(specs.len());
        for spec in specs {
            let row = match inner.attribute_types.get(&spec.code).cloned() {
                Some(row) => row,
                None => {
                    let row = AttributeTypeRow {
                        id: inner.next_id(),
                        code: spec.code.clone(),
                        value_kind: spec.value_kind,
                        is_filtered: spec.is_filtered,
                    };
                    inner.attribute_types.insert(spec.code.clone(), row.clone());
                    row
                }
            };
            rows.push(row);
        }
        Ok(rows)
    }

    async fn list_attribute_values(&self) -> StorageResult<Vec<AttributeValueRow>> {
        tokio::task::yield_now().await;
        let inner = self.begin("list_attribute_values")?;
        Ok(inner.attribute_values.values().cloned().collect())
    }

    async fn find_attribute_values(
        &self,
        keys: &[(i32, String)],
    ) -> StorageResult<Vec<AttributeValueRow>> {
        tokio::task::yield_now().await;
        let inner = self.begin("find_attribute_values")?;
        Ok(keys
            .iter()
            .filter_map(|key| inner.attribute_values.get(key).cloned())
            .collect())
    }

    async fn create_attribute_values(
        &self,
        values: &[(i32, AttributeValueSpec)],
    ) -> StorageResult<Vec<AttributeValueRow>> {
        tokio::task::yield_now().await;
        let mut inner = self.begin("create_attribute_values")?;
        let mut rows = Vec::with_capacity(values.len());
        for (type_id, spec) in values {
            let key = (*type_id, spec.code.clone());
            let row = match inner.attribute_values.get(&key).cloned() {
                Some(row) => row,
                None => {
                    let row = AttributeValueRow {
                        id: inner.next_id(),
                        attribute_type_id: *type_id,
                        code: spec.code.clone(),
                    };
                    inner.attribute_values.insert(key, row.clone());
                    row
                }
            };
            rows.push(row);
        }
        Ok(rows)
    }

    async fn list_series(&self, metric_id: i32) -> StorageResult<Vec<SeriesRow>> {
        tokio::task::yield_now().await;
        let inner = self.begin("list_series")?;
        Ok(inner
            .series
            .iter()
            .filter(|((m, _), _)| *m == metric_id)
            .map(|((m, hash), id)| SeriesRow {
                id: *id,
                metric_id: *m,
                hash: hash.clone(),
            })
            .collect())
    }

    async fn find_series(&self, metric_id: i32, hashes: &[String]) -> StorageResult<Vec<SeriesRow>> {
        tokio::task::yield_now().await;
        let inner = self.begin("find_series")?;
        Ok(hashes
            .iter()
            .filter_map(|hash| {
                inner
                    .series
                    .get(&(metric_id, hash.clone()))
                    .map(|id| SeriesRow {
                        id: *id,
                        metric_id,
                        hash: hash.clone(),
                    })
            })
            .collect())
    }

    async fn create_series(
        &self,
        metric_id: i32,
        series: &[NewSeries],
    ) -> StorageResult<Vec<SeriesRow>> {
        tokio::task::yield_now().await;
        let mut inner = self.begin("create_series")?;
        let mut rows = Vec::with_capacity(series.len());
        for new in series {
            let key = (metric_id, new.hash.clone());
            let id = match inner.series.get(&key).copied() {
                Some(id) => id,
                None => {
                    let id = inner.next_id();
                    inner.series.insert(key, id);
                    inner.series_links.insert(id, new.pairs.clone());
                    id
                }
            };
            rows.push(SeriesRow {
                id,
                metric_id,
                hash: new.hash.clone(),
            });
        }
        Ok(rows)
    }

    async fn list_periods(&self, limit: usize) -> StorageResult<Vec<PeriodRow>> {
        tokio::task::yield_now().await;
        let inner = self.begin("list_periods")?;
        let mut rows: Vec<PeriodRow> = inner
            .periods
            .iter()
            .map(|(key, (id, _))| PeriodRow { id: *id, key: *key })
            .collect();
        rows.sort_by(|a, b| b.id.cmp(&a.id));
        rows.truncate(limit);
        Ok(rows)
    }

    async fn find_periods(&self, keys: &[PeriodKey]) -> StorageResult<Vec<PeriodRow>> {
        tokio::task::yield_now().await;
        let inner = self.begin("find_periods")?;
        Ok(keys
            .iter()
            .filter_map(|key| {
                inner
                    .periods
                    .get(key)
                    .map(|(id, _)| PeriodRow { id: *id, key: *key })
            })
            .collect())
    }

    async fn create_periods(&self, periods: &[PeriodData]) -> StorageResult<Vec<PeriodRow>> {
        tokio::task::yield_now().await;
        let mut inner = self.begin("create_periods")?;
        let mut rows = Vec::with_capacity(periods.len());
        for period in periods {
            let key = period.key();
            let id = match inner.periods.get(&key).map(|(id, _)| *id) {
                Some(id) => id,
                None => {
                    let id = inner.next_id();
                    inner.periods.insert(key, (id, period.clone()));
                    id
                }
            };
            rows.push(PeriodRow { id, key });
        }
        Ok(rows)
    }

    async fn insert_facts(&self, rows: &[FactRow]) -> StorageResult<u64> {
        tokio::task::yield_now().await;
        let inserted = {
            let mut inner = self.begin("insert_facts")?;
            let mut inserted = 0;
            for row in rows {
                if inner.fact_keys.insert(row.natural_key()) {
                    inner.facts.push(row.clone());
                    inserted += 1;
                }
            }
            inserted
        };
        if let Some(hook) = self
            .insert_hook
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            hook(inserted);
        }
        Ok(inserted)
    }
}
