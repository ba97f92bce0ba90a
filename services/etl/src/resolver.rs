//! Entity resolver: maps every entity referenced by a batch to its storage id.
//!
//! Kinds are resolved in dependency order:
//! countries → cities → attribute types → attribute values → series → periods.
//!
//! Each creatable kind follows the same path: cache, then one batched storage
//! lookup for the misses, then a locked re-check and one batched create for
//! whatever is still missing. Countries and cities are read-only.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, warn};

use crate::cache::{EntityCaches, SharedCache};
use crate::descriptor::{CountryNameField, GeographyLevel, SourceDescriptor};
use crate::error::{Error, Result, StorageError};
use crate::locks::KeyLocks;
use crate::model::{
    series_hash, AttributeTypeSpec, AttributeValueSpec, NewSeries, ParsedAttribute,
};
use crate::parser::period::{PeriodData, PeriodKey};
use crate::parser::RawRecord;
use crate::storage::{Storage, StorageResult};

// =============================================================================
// Countries
// =============================================================================

/// How a source country name matched storage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CountryMatch {
    /// Id of the country whose name equals the source value.
    pub direct: Option<i32>,
    /// Alias names that resolved, with their ids.
    pub aliases: Vec<(String, i32)>,
}

impl CountryMatch {
    pub fn is_found(&self) -> bool {
        self.direct.is_some() || !self.aliases.is_empty()
    }

    /// Target ids, direct match first, without duplicates.
    pub fn ids(&self) -> Vec<i32> {
        let mut ids = Vec::with_capacity(1 + self.aliases.len());
        for id in self.direct.into_iter().chain(self.aliases.iter().map(|(_, id)| *id)) {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        ids
    }
}

/// Match source country names against storage, directly and through aliases.
///
/// Names missing from the cache are looked up in storage once and cached.
pub async fn match_countries<S: Storage>(
    storage: &S,
    caches: &EntityCaches,
    field: CountryNameField,
    aliases: &HashMap<String, Vec<String>>,
    names: &BTreeSet<String>,
) -> StorageResult<HashMap<String, CountryMatch>> {
    let mut candidates: BTreeSet<String> = names.clone();
    for name in names {
        if let Some(targets) = aliases.get(name) {
            candidates.extend(targets.iter().cloned());
        }
    }

    let (mut known, misses) = caches.countries.get_many(&candidates).await;
    if !misses.is_empty() {
        let rows = storage.find_countries(field, &misses).await?;
        let found: Vec<(String, i32)> = rows.into_iter().map(|c| (c.name, c.id)).collect();
        caches.countries.set_many(found.iter().cloned()).await;
        known.extend(found);
    }

    Ok(names
        .iter()
        .map(|name| {
            let matched = CountryMatch {
                direct: known.get(name).copied(),
                aliases: aliases
                    .get(name)
                    .map(|targets| {
                        targets
                            .iter()
                            .filter_map(|t| known.get(t).map(|id| (t.clone(), *id)))
                            .collect()
                    })
                    .unwrap_or_default(),
            };
            (name.clone(), matched)
        })
        .collect())
}

// =============================================================================
// Batch resolution
// =============================================================================

/// Ids for everything one batch references.
#[derive(Debug, Default)]
pub struct ResolvedBatch {
    /// Source country name → target country ids (fan-out through aliases).
    pub countries: HashMap<String, Vec<i32>>,
    /// (country id, source city name) → city id.
    pub cities: HashMap<(i32, String), i32>,
    /// Series hash of each record, aligned with the input; `None` for records
    /// whose country was skipped.
    pub series_hashes: Vec<Option<String>>,
    pub series: HashMap<String, i32>,
    pub periods: HashMap<PeriodKey, i32>,
    /// Source country names with no match, skipped under the lenient policy.
    pub skipped_countries: BTreeSet<String>,
}

pub struct EntityResolver<S> {
    storage: Arc<S>,
    caches: Arc<EntityCaches>,
    metric_id: i32,
    country_lookup: CountryNameField,
    country_aliases: HashMap<String, Vec<String>>,
    city_aliases: HashMap<String, String>,
    geography: GeographyLevel,
    validate_country_exists: bool,
    type_locks: KeyLocks,
    value_locks: KeyLocks,
    series_locks: KeyLocks,
    period_locks: KeyLocks,
    reported_missing: Mutex<HashSet<String>>,
}

impl<S: Storage> EntityResolver<S> {
    pub fn new(
        storage: Arc<S>,
        caches: Arc<EntityCaches>,
        descriptor: &SourceDescriptor,
        metric_id: i32,
    ) -> Self {
        Self {
            storage,
            caches,
            metric_id,
            country_lookup: descriptor.country_lookup,
            country_aliases: descriptor.country_alias_map.clone(),
            city_aliases: descriptor.city_alias_map.clone(),
            geography: descriptor.geography_level,
            validate_country_exists: descriptor.validate_country_exists,
            type_locks: KeyLocks::default(),
            value_locks: KeyLocks::default(),
            series_locks: KeyLocks::default(),
            period_locks: KeyLocks::default(),
            reported_missing: Mutex::new(HashSet::new()),
        }
    }

    pub fn metric_id(&self) -> i32 {
        self.metric_id
    }

    pub async fn resolve_batch(&self, records: &[RawRecord]) -> Result<ResolvedBatch> {
        let mut batch = ResolvedBatch::default();

        self.resolve_countries(records, &mut batch).await?;
        let active: Vec<bool> = records
            .iter()
            .map(|r| batch.countries.contains_key(&r.country))
            .collect();

        if self.geography == GeographyLevel::City {
            self.resolve_cities(records, &mut batch).await?;
        }

        let types = self.resolve_attribute_types(records, &active).await?;
        let values = self.resolve_attribute_values(records, &active, &types).await?;

        let mut wanted_series: HashMap<String, Vec<(i32, i32)>> = HashMap::new();
        batch.series_hashes = Vec::with_capacity(records.len());
        for (record, is_active) in records.iter().zip(&active) {
            if !is_active {
                batch.series_hashes.push(None);
                continue;
            }
            let pairs = match series_pairs(&record.attributes, &types, &values) {
                Ok(pairs) => pairs,
                Err(missing) => {
                    warn!(
                        line = record.line,
                        attribute_type = %missing.attr_type.code,
                        value = %missing.value.code,
                        "attribute has no storage id, record left without a series"
                    );
                    batch.series_hashes.push(None);
                    continue;
                }
            };
            let hash = series_hash(&pairs);
            wanted_series.entry(hash.clone()).or_insert(pairs);
            batch.series_hashes.push(Some(hash));
        }
        batch.series = self.resolve_series(wanted_series).await?;

        let mut wanted_periods: HashMap<PeriodKey, &PeriodData> = HashMap::new();
        for (record, is_active) in records.iter().zip(&active) {
            if *is_active {
                wanted_periods.entry(record.period.key()).or_insert(&record.period);
            }
        }
        batch.periods = self.resolve_periods(wanted_periods).await?;

        debug!(
            records = records.len(),
            countries = batch.countries.len(),
            series = batch.series.len(),
            periods = batch.periods.len(),
            "batch resolved"
        );
        Ok(batch)
    }

    async fn resolve_countries(&self, records: &[RawRecord], batch: &mut ResolvedBatch) -> Result<()> {
        let names: BTreeSet<String> = records.iter().map(|r| r.country.clone()).collect();
        let matches = match_countries(
            self.storage.as_ref(),
            &self.caches,
            self.country_lookup,
            &self.country_aliases,
            &names,
        )
        .await?;

        for (name, matched) in matches {
            if matched.is_found() {
                batch.countries.insert(name, matched.ids());
                continue;
            }
            if self.validate_country_exists {
                return Err(Error::CountryNotFound(name));
            }
            let first_time = self
                .reported_missing
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(name.clone());
            if first_time {
                warn!(country = %name, "country not found, its rows are skipped");
            }
            batch.skipped_countries.insert(name);
        }
        Ok(())
    }

    fn city_name<'a>(&'a self, raw: &'a str) -> &'a str {
        self.city_aliases.get(raw).map(String::as_str).unwrap_or(raw)
    }

    async fn resolve_cities(&self, records: &[RawRecord], batch: &mut ResolvedBatch) -> Result<()> {
        // (country id, canonical name) → source names using it
        let mut wanted: HashMap<(i32, String), BTreeSet<String>> = HashMap::new();
        for record in records {
            let (Some(city), Some(ids)) = (&record.city, batch.countries.get(&record.country)) else {
                continue;
            };
            for id in ids {
                wanted
                    .entry((*id, self.city_name(city).to_string()))
                    .or_default()
                    .insert(city.clone());
            }
        }
        if wanted.is_empty() {
            return Ok(());
        }

        let keys: Vec<(i32, String)> = wanted.keys().cloned().collect();
        let (mut known, misses) = self.caches.cities.get_many(&keys).await;
        if !misses.is_empty() {
            let rows = self.storage.find_cities(&misses).await?;
            let found: Vec<((i32, String), i32)> = rows
                .into_iter()
                .map(|c| ((c.country_id, c.name), c.id))
                .collect();
            self.caches.cities.set_many(found.iter().cloned()).await;
            known.extend(found);
        }

        for (key, sources) in wanted {
            match known.get(&key) {
                Some(id) => {
                    for source in sources {
                        batch.cities.insert((key.0, source), *id);
                    }
                }
                None => warn!(country_id = key.0, city = %key.1, "city not found"),
            }
        }
        Ok(())
    }

    async fn resolve_attribute_types(
        &self,
        records: &[RawRecord],
        active: &[bool],
    ) -> Result<HashMap<String, i32>> {
        let mut wanted: HashMap<String, AttributeTypeSpec> = HashMap::new();
        for (record, _) in records.iter().zip(active).filter(|(_, a)| **a) {
            for attribute in &record.attributes {
                wanted
                    .entry(attribute.attr_type.code.clone())
                    .or_insert_with(|| attribute.attr_type.clone());
            }
        }
        let keys: Vec<String> = wanted.keys().cloned().collect();
        let storage = self.storage.as_ref();
        let wanted = &wanted;

        Ok(get_or_create(
            &self.caches.attribute_types,
            &self.type_locks,
            keys,
            move |missing: Vec<String>| async move {
                let rows = storage.find_attribute_types(&missing).await?;
                Ok::<Vec<_>, StorageError>(rows.into_iter().map(|r| (r.code, r.id)).collect())
            },
            move |missing: Vec<String>| async move {
                let specs: Vec<AttributeTypeSpec> =
                    missing.iter().filter_map(|c| wanted.get(c).cloned()).collect();
                let rows = storage.create_attribute_types(&specs).await?;
                Ok::<Vec<_>, StorageError>(rows.into_iter().map(|r| (r.code, r.id)).collect())
            },
        )
        .await?)
    }

    async fn resolve_attribute_values(
        &self,
        records: &[RawRecord],
        active: &[bool],
        types: &HashMap<String, i32>,
    ) -> Result<HashMap<(i32, String), i32>> {
        let mut wanted: HashMap<(i32, String), AttributeValueSpec> = HashMap::new();
        for (record, _) in records.iter().zip(active).filter(|(_, a)| **a) {
            for attribute in &record.attributes {
                let Some(type_id) = types.get(&attribute.attr_type.code) else {
                    continue;
                };
                wanted
                    .entry((*type_id, attribute.value.code.clone()))
                    .or_insert_with(|| attribute.value.clone());
            }
        }
        let keys: Vec<(i32, String)> = wanted.keys().cloned().collect();
        let storage = self.storage.as_ref();
        let wanted = &wanted;

        Ok(get_or_create(
            &self.caches.attribute_values,
            &self.value_locks,
            keys,
            move |missing: Vec<(i32, String)>| async move {
                let rows = storage.find_attribute_values(&missing).await?;
                Ok::<Vec<_>, StorageError>(rows
                    .into_iter()
                    .map(|r| ((r.attribute_type_id, r.code), r.id))
                    .collect())
            },
            move |missing: Vec<(i32, String)>| async move {
                let specs: Vec<(i32, AttributeValueSpec)> = missing
                    .iter()
                    .filter_map(|key| wanted.get(key).map(|spec| (key.0, spec.clone())))
                    .collect();
                let rows = storage.create_attribute_values(&specs).await?;
                Ok::<Vec<_>, StorageError>(rows
                    .into_iter()
                    .map(|r| ((r.attribute_type_id, r.code), r.id))
                    .collect())
            },
        )
        .await?)
    }

    async fn resolve_series(
        &self,
        wanted: HashMap<String, Vec<(i32, i32)>>,
    ) -> Result<HashMap<String, i32>> {
        let metric_id = self.metric_id;
        let keys: Vec<(i32, String)> = wanted.keys().map(|h| (metric_id, h.clone())).collect();
        let storage = self.storage.as_ref();
        let wanted = &wanted;

        let resolved = get_or_create(
            &self.caches.series,
            &self.series_locks,
            keys,
            move |missing: Vec<(i32, String)>| async move {
                let hashes: Vec<String> = missing.into_iter().map(|(_, h)| h).collect();
                let rows = storage.find_series(metric_id, &hashes).await?;
                Ok::<Vec<_>, StorageError>(rows.into_iter().map(|s| ((s.metric_id, s.hash), s.id)).collect())
            },
            move |missing: Vec<(i32, String)>| async move {
                let new: Vec<NewSeries> = missing
                    .into_iter()
                    .filter_map(|(_, hash)| {
                        wanted.get(&hash).map(|pairs| NewSeries {
                            hash,
                            pairs: pairs.clone(),
                        })
                    })
                    .collect();
                let rows = storage.create_series(metric_id, &new).await?;
                Ok::<Vec<_>, StorageError>(rows.into_iter().map(|s| ((s.metric_id, s.hash), s.id)).collect())
            },
        )
        .await?;

        Ok(resolved.into_iter().map(|((_, hash), id)| (hash, id)).collect())
    }

    async fn resolve_periods(
        &self,
        wanted: HashMap<PeriodKey, &PeriodData>,
    ) -> Result<HashMap<PeriodKey, i32>> {
        let keys: Vec<PeriodKey> = wanted.keys().copied().collect();
        let storage = self.storage.as_ref();
        let wanted = &wanted;

        Ok(get_or_create(
            &self.caches.periods,
            &self.period_locks,
            keys,
            move |missing: Vec<PeriodKey>| async move {
                let rows = storage.find_periods(&missing).await?;
                Ok::<Vec<_>, StorageError>(rows.into_iter().map(|p| (p.key, p.id)).collect())
            },
            move |missing: Vec<PeriodKey>| async move {
                let periods: Vec<PeriodData> = missing
                    .iter()
                    .filter_map(|k| wanted.get(k).map(|p| (*p).clone()))
                    .collect();
                let rows = storage.create_periods(&periods).await?;
                Ok::<Vec<_>, StorageError>(rows.into_iter().map(|p| (p.key, p.id)).collect())
            },
        )
        .await?)
    }
}

/// Sorted, deduplicated (type id, value id) pairs identifying a record's
/// series. Fails with the first attribute lacking an id, since a partial set
/// would name a different series.
fn series_pairs<'a>(
    attributes: &'a [ParsedAttribute],
    types: &HashMap<String, i32>,
    values: &HashMap<(i32, String), i32>,
) -> std::result::Result<Vec<(i32, i32)>, &'a ParsedAttribute> {
    let mut pairs = Vec::with_capacity(attributes.len());
    for attribute in attributes {
        let type_id = types.get(&attribute.attr_type.code).ok_or(attribute)?;
        let value_id = values
            .get(&(*type_id, attribute.value.code.clone()))
            .ok_or(attribute)?;
        pairs.push((*type_id, *value_id));
    }
    pairs.sort_unstable();
    pairs.dedup();
    Ok(pairs)
}

/// Cache → storage lookup → locked re-check → create, for one entity kind.
///
/// `keys` must be distinct. `find` and `create` receive only the keys still
/// unresolved at their step and return `(key, id)` pairs.
async fn get_or_create<K, Find, FindFut, Create, CreateFut>(
    cache: &SharedCache<K, i32>,
    locks: &KeyLocks,
    keys: Vec<K>,
    find: Find,
    create: Create,
) -> StorageResult<HashMap<K, i32>>
where
    K: Eq + Hash + Clone,
    Find: FnOnce(Vec<K>) -> FindFut,
    FindFut: Future<Output = StorageResult<Vec<(K, i32)>>>,
    Create: FnOnce(Vec<K>) -> CreateFut,
    CreateFut: Future<Output = StorageResult<Vec<(K, i32)>>>,
{
    let (mut resolved, misses) = cache.get_many(&keys).await;
    if misses.is_empty() {
        return Ok(resolved);
    }

    let found = find(misses.clone()).await?;
    cache.set_many(found.iter().cloned()).await;
    resolved.extend(found);
    let missing: Vec<K> = misses
        .into_iter()
        .filter(|k| !resolved.contains_key(k))
        .collect();
    if missing.is_empty() {
        return Ok(resolved);
    }

    let _guards = locks.lock_many(&missing).await;
    // another batch may have created some of these while we waited
    let (created_meanwhile, missing) = cache.get_many(&missing).await;
    resolved.extend(created_meanwhile);
    if !missing.is_empty() {
        let created = create(missing).await?;
        cache.set_many(created.iter().cloned()).await;
        resolved.extend(created);
    }
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use crate::descriptor::tests_support::descriptor_json;
    use crate::parser::period::PeriodType;
    use crate::storage::memory::MemoryStorage;

    fn descriptor(extra: &str) -> SourceDescriptor {
        SourceDescriptor::from_json(&descriptor_json(extra)).unwrap()
    }

    fn record(country: &str, attrs: &[(&str, &str)], year: i32) -> RawRecord {
        RawRecord {
            line: 2,
            country: country.to_string(),
            city: None,
            raw_value: "1".to_string(),
            attributes: attrs
                .iter()
                .map(|(t, v)| ParsedAttribute::labelled(t, v, false))
                .collect(),
            period: PeriodData {
                period_type: PeriodType::Yearly,
                year: Some(year),
                ..Default::default()
            },
        }
    }

    fn resolver(
        store: &Arc<MemoryStorage>,
        caches: &Arc<EntityCaches>,
        d: &SourceDescriptor,
    ) -> EntityResolver<MemoryStorage> {
        EntityResolver::new(store.clone(), caches.clone(), d, 1)
    }

    // -------------------------------------------------------------------------
    // Countries
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_alias_resolves_korea() {
        let store = Arc::new(MemoryStorage::new());
        let korea = store.add_country("South Korea");
        let caches = Arc::new(EntityCaches::new(&CacheConfig::default()));
        let d = descriptor(r#""country_alias_map": {"Korea": ["South Korea"]}"#);

        let batch = resolver(&store, &caches, &d)
            .resolve_batch(&[record("Korea", &[("Sex", "Male")], 2021)])
            .await
            .unwrap();
        assert_eq!(batch.countries["Korea"], vec![korea]);
    }

    #[tokio::test]
    async fn test_alias_fans_out_to_every_target() {
        let store = Arc::new(MemoryStorage::new());
        let czechia = store.add_country("Czechia");
        let slovakia = store.add_country("Slovakia");
        let caches = Arc::new(EntityCaches::new(&CacheConfig::default()));
        let d = descriptor(
            r#""country_alias_map": {"Czechoslovakia": ["Czechia", "Slovakia", "Czechia"]}"#,
        );

        let batch = resolver(&store, &caches, &d)
            .resolve_batch(&[record("Czechoslovakia", &[], 1990)])
            .await
            .unwrap();
        assert_eq!(batch.countries["Czechoslovakia"], vec![czechia, slovakia]);
    }

    #[tokio::test]
    async fn test_unknown_country_aborts_when_validated() {
        let store = Arc::new(MemoryStorage::new());
        let caches = Arc::new(EntityCaches::new(&CacheConfig::default()));
        let d = descriptor("");

        let err = resolver(&store, &caches, &d)
            .resolve_batch(&[record("Atlantis", &[], 2021)])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::CountryNotFound(name) if name == "Atlantis"));
    }

    #[tokio::test]
    async fn test_unknown_country_skipped_when_lenient() {
        let store = Arc::new(MemoryStorage::new());
        store.add_country("Chile");
        let caches = Arc::new(EntityCaches::new(&CacheConfig::default()));
        let d = descriptor(r#""validate_country_exists": false"#);

        let batch = resolver(&store, &caches, &d)
            .resolve_batch(&[
                record("Atlantis", &[("Sex", "Male")], 2021),
                record("Chile", &[("Sex", "Female")], 2021),
            ])
            .await
            .unwrap();
        assert!(batch.skipped_countries.contains("Atlantis"));
        assert_eq!(batch.series_hashes[0], None);
        assert!(batch.series_hashes[1].is_some());
        // vocabulary of skipped rows is not created
        assert_eq!(store.attribute_value_count(), 1);
    }

    #[tokio::test]
    async fn test_country_missing_from_cache_found_in_storage() {
        let store = Arc::new(MemoryStorage::new());
        let caches = Arc::new(EntityCaches::new(&CacheConfig::default()));
        caches
            .preload_countries(store.as_ref(), CountryNameField::Name)
            .await
            .unwrap();
        let peru = store.add_country("Peru");
        let d = descriptor("");

        let batch = resolver(&store, &caches, &d)
            .resolve_batch(&[record("Peru", &[], 2021)])
            .await
            .unwrap();
        assert_eq!(batch.countries["Peru"], vec![peru]);
        assert_eq!(caches.countries.get(&"Peru".to_string()).await, Some(peru));
    }

    // -------------------------------------------------------------------------
    // Series and periods
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_series_identity_ignores_attribute_order() {
        let store = Arc::new(MemoryStorage::new());
        store.add_country("Chile");
        let caches = Arc::new(EntityCaches::new(&CacheConfig::default()));
        let d = descriptor("");

        let batch = resolver(&store, &caches, &d)
            .resolve_batch(&[
                record("Chile", &[("A", "1"), ("B", "2")], 2021),
                record("Chile", &[("B", "2"), ("A", "1")], 2021),
            ])
            .await
            .unwrap();
        assert_eq!(batch.series_hashes[0], batch.series_hashes[1]);
        assert_eq!(batch.series.len(), 1);
        assert_eq!(store.series_count(), 1);

        let id = batch.series[batch.series_hashes[0].as_deref().unwrap()];
        assert_eq!(store.series_links(id).len(), 2);
    }

    #[tokio::test]
    async fn test_cleared_cache_reaches_same_ids() {
        let store = Arc::new(MemoryStorage::new());
        store.add_country("Chile");
        let caches = Arc::new(EntityCaches::new(&CacheConfig::default()));
        let d = descriptor("");
        let records = [
            record("Chile", &[("Sex", "Male")], 2020),
            record("Chile", &[("Sex", "Female")], 2021),
        ];

        let first = resolver(&store, &caches, &d).resolve_batch(&records).await.unwrap();
        caches.clear_all().await;
        let second = resolver(&store, &caches, &d).resolve_batch(&records).await.unwrap();

        assert_eq!(first.series, second.series);
        assert_eq!(first.periods, second.periods);
        assert_eq!(store.series_count(), 2);
        assert_eq!(store.period_count(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_batches_create_once() {
        let store = Arc::new(MemoryStorage::new());
        store.add_country("Chile");
        let caches = Arc::new(EntityCaches::new(&CacheConfig::default()));
        let d = descriptor("");
        let shared = resolver(&store, &caches, &d);
        let records = [
            record("Chile", &[("Sex", "Male"), ("Age", "15-24")], 2021),
            record("Chile", &[("Sex", "Female"), ("Age", "15-24")], 2021),
        ];

        let (left, right) = tokio::join!(shared.resolve_batch(&records), shared.resolve_batch(&records));
        let (left, right) = (left.unwrap(), right.unwrap());

        assert_eq!(left.series, right.series);
        assert_eq!(left.periods, right.periods);
        assert_eq!(store.attribute_type_count(), 2);
        assert_eq!(store.attribute_value_count(), 3);
        assert_eq!(store.series_count(), 2);
        assert_eq!(store.period_count(), 1);
    }

    #[tokio::test]
    async fn test_cities_resolved_per_country() {
        let store = Arc::new(MemoryStorage::new());
        let chile = store.add_country("Chile");
        let santiago = store.add_city(chile, "Santiago");
        let caches = Arc::new(EntityCaches::new(&CacheConfig::default()));
        let d = descriptor(
            r#""geography_level": "city", "city_column": "city",
               "city_alias_map": {"Santiago de Chile": "Santiago"}"#,
        );

        let mut rec = record("Chile", &[], 2021);
        rec.city = Some("Santiago de Chile".to_string());
        let mut unknown = record("Chile", &[], 2021);
        unknown.city = Some("Gotham".to_string());

        let batch = resolver(&store, &caches, &d)
            .resolve_batch(&[rec, unknown])
            .await
            .unwrap();
        assert_eq!(
            batch.cities.get(&(chile, "Santiago de Chile".to_string())),
            Some(&santiago)
        );
        assert!(!batch.cities.contains_key(&(chile, "Gotham".to_string())));
    }

    // -------------------------------------------------------------------------
    // Series identity
    // -------------------------------------------------------------------------

    #[test]
    fn test_series_pairs_sorted_and_deduplicated() {
        let types: HashMap<String, i32> = [("Sex".to_string(), 2), ("Age".to_string(), 1)].into();
        let values: HashMap<(i32, String), i32> =
            [((2, "Male".to_string()), 20), ((1, "15+".to_string()), 10)].into();
        let attributes = vec![
            ParsedAttribute::labelled("Sex", "Male", false),
            ParsedAttribute::labelled("Age", "15+", false),
            ParsedAttribute::labelled("Sex", "Male", false),
        ];
        assert_eq!(
            series_pairs(&attributes, &types, &values),
            Ok(vec![(1, 10), (2, 20)])
        );
    }

    #[test]
    fn test_series_pairs_fail_on_unresolved_attribute() {
        let types: HashMap<String, i32> = [("Sex".to_string(), 2), ("Currency".to_string(), 3)].into();
        let values: HashMap<(i32, String), i32> = [((2, "Male".to_string()), 20)].into();
        let attributes = vec![
            ParsedAttribute::labelled("Sex", "Male", false),
            ParsedAttribute::labelled("Currency", "Euro", true),
        ];
        let missing = series_pairs(&attributes, &types, &values).unwrap_err();
        assert_eq!(missing.value.code, "Euro");

        let untyped = vec![ParsedAttribute::labelled("Age", "15+", false)];
        assert!(series_pairs(&untyped, &types, &values).is_err());
    }
}
