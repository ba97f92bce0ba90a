//! Storage gateway consumed by the pipeline.
//!
//! Implemented by [`postgres::PgStorage`] for real runs and by
//! [`memory::MemoryStorage`] for dry runs and tests. Every batch operation
//! takes the full set of keys for one entity kind, so a batch costs one
//! round-trip per kind rather than one per row.

pub mod memory;
pub mod postgres;

use std::future::Future;

use crate::descriptor::{CountryNameField, MetricSpec};
use crate::error::StorageError;
use crate::model::{
    AttributeTypeRow, AttributeTypeSpec, AttributeValueRow, AttributeValueSpec, CityRow,
    CountryRow, FactRow, MetricRow, NewSeries, PeriodRow, SeriesRow,
};
use crate::parser::period::{PeriodData, PeriodKey};

pub type StorageResult<T> = Result<T, StorageError>;

/// Abstraction over the metric fact store.
///
/// `create_*` operations are get-or-create: they return a row for every
/// requested key, whether it was inserted now or already existed. Storage
/// uniqueness constraints are the final guard against duplicates created by
/// other processes.
pub trait Storage: Send + Sync {
    // ── Locations (read-only) ─────────────────────────────────────────────

    fn list_countries(
        &self,
        field: CountryNameField,
    ) -> impl Future<Output = StorageResult<Vec<CountryRow>>> + Send + '_;

    fn find_countries<'a>(
        &'a self,
        field: CountryNameField,
        names: &'a [String],
    ) -> impl Future<Output = StorageResult<Vec<CountryRow>>> + Send + 'a;

    fn list_cities(&self) -> impl Future<Output = StorageResult<Vec<CityRow>>> + Send + '_;

    /// Cities by (country id, city name).
    fn find_cities<'a>(
        &'a self,
        keys: &'a [(i32, String)],
    ) -> impl Future<Output = StorageResult<Vec<CityRow>>> + Send + 'a;

    // ── Metric ────────────────────────────────────────────────────────────

    fn get_or_create_metric<'a>(
        &'a self,
        spec: &'a MetricSpec,
    ) -> impl Future<Output = StorageResult<MetricRow>> + Send + 'a;

    // ── Attribute vocabulary ──────────────────────────────────────────────

    fn list_attribute_types(
        &self,
    ) -> impl Future<Output = StorageResult<Vec<AttributeTypeRow>>> + Send + '_;

    fn find_attribute_types<'a>(
        &'a self,
        codes: &'a [String],
    ) -> impl Future<Output = StorageResult<Vec<AttributeTypeRow>>> + Send + 'a;

    fn create_attribute_types<'a>(
        &'a self,
        specs: &'a [AttributeTypeSpec],
    ) -> impl Future<Output = StorageResult<Vec<AttributeTypeRow>>> + Send + 'a;

    fn list_attribute_values(
        &self,
    ) -> impl Future<Output = StorageResult<Vec<AttributeValueRow>>> + Send + '_;

    /// Values by (attribute type id, value code).
    fn find_attribute_values<'a>(
        &'a self,
        keys: &'a [(i32, String)],
    ) -> impl Future<Output = StorageResult<Vec<AttributeValueRow>>> + Send + 'a;

    fn create_attribute_values<'a>(
        &'a self,
        values: &'a [(i32, AttributeValueSpec)],
    ) -> impl Future<Output = StorageResult<Vec<AttributeValueRow>>> + Send + 'a;

    // ── Series ────────────────────────────────────────────────────────────

    fn list_series(
        &self,
        metric_id: i32,
    ) -> impl Future<Output = StorageResult<Vec<SeriesRow>>> + Send + '_;

    fn find_series<'a>(
        &'a self,
        metric_id: i32,
        hashes: &'a [String],
    ) -> impl Future<Output = StorageResult<Vec<SeriesRow>>> + Send + 'a;

    /// Create series together with their attribute links.
    fn create_series<'a>(
        &'a self,
        metric_id: i32,
        series: &'a [NewSeries],
    ) -> impl Future<Output = StorageResult<Vec<SeriesRow>>> + Send + 'a;

    // ── Periods ───────────────────────────────────────────────────────────

    /// Most recently created periods, at most `limit`.
    fn list_periods(
        &self,
        limit: usize,
    ) -> impl Future<Output = StorageResult<Vec<PeriodRow>>> + Send + '_;

    fn find_periods<'a>(
        &'a self,
        keys: &'a [PeriodKey],
    ) -> impl Future<Output = StorageResult<Vec<PeriodRow>>> + Send + 'a;

    fn create_periods<'a>(
        &'a self,
        periods: &'a [PeriodData],
    ) -> impl Future<Output = StorageResult<Vec<PeriodRow>>> + Send + 'a;

    // ── Facts ─────────────────────────────────────────────────────────────

    /// Stage `rows` and merge those whose natural key is not yet stored.
    /// Returns the number of rows actually inserted.
    fn insert_facts<'a>(
        &'a self,
        rows: &'a [FactRow],
    ) -> impl Future<Output = StorageResult<u64>> + Send + 'a;
}
