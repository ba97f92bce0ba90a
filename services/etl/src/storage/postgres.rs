//! PostgreSQL storage.
//!
//! Every operation runs in its own transaction; a failed call is rolled back
//! when the transaction is dropped, so a retry always starts clean. Batches are
//! sent as parallel arrays and expanded server-side with `UNNEST`.
//!
//! Expected uniqueness constraints:
//! - `metric_info (slug)`
//! - `metric_attribute_type (code)`
//! - `metric_attribute_value (attribute_type_id, code)`
//! - `metric_series (metric_id, attributes_hash)`
//! - `metric_period (period_type, period_year, period_month, period_quarter, period_week)` NULLS NOT DISTINCT
//! - `metric_data (series_id, period_id, country_id, COALESCE(city_id, -1))`
//!
//! Label columns are bound and compared as `text`, so they must be `text` (or
//! `varchar`) columns rather than Postgres enum types:
//! - `metric_info.data_type`: `numeric`, `string`, `boolean`, `range`
//! - `metric_attribute_type.value_type`: `string`, `number`, `currency`, `boolean`
//! - `metric_period.period_type`: `one_time`, `yearly`, `quarterly`, `monthly`,
//!   `weekly`, `interval`, `none`

use std::collections::HashSet;
use std::str::FromStr;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{debug, instrument};

use super::{Storage, StorageResult};
use crate::descriptor::{CountryNameField, MetricSpec};
use crate::error::StorageError;
use crate::model::{
    AttributeTypeRow, AttributeTypeSpec, AttributeValueRow, AttributeValueSpec, CityRow,
    CountryRow, FactRow, MetricRow, NewSeries, PeriodRow, SeriesRow,
};
use crate::parser::period::{PeriodData, PeriodKey, PeriodType};

#[derive(Clone)]
pub struct PgStorage {
    pool: PgPool,
}

impl PgStorage {
    pub async fn connect(db_url: &str, max_connections: u32) -> StorageResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(db_url)
            .await?;
        Ok(Self { pool })
    }
}

fn decode_error(msg: String) -> StorageError {
    StorageError::Database(sqlx::Error::Decode(msg.into()))
}

type PeriodTuple = (i32, String, Option<i32>, Option<i32>, Option<i32>, Option<i32>);

fn period_row(
    (id, period_type, year, month, quarter, week): PeriodTuple,
) -> StorageResult<PeriodRow> {
    Ok(PeriodRow {
        id,
        key: PeriodKey {
            period_type: PeriodType::from_str(&period_type).map_err(decode_error)?,
            year,
            month,
            quarter,
            week,
        },
    })
}

fn attribute_type_row(
    (id, code, value_type, is_filtered): (i32, String, String, bool),
) -> StorageResult<AttributeTypeRow> {
    Ok(AttributeTypeRow {
        id,
        code,
        value_kind: value_type.parse().map_err(decode_error)?,
        is_filtered,
    })
}

/// Parallel arrays for a set of period keys.
struct PeriodArrays {
    types: Vec<String>,
    years: Vec<Option<i32>>,
    months: Vec<Option<i32>>,
    quarters: Vec<Option<i32>>,
    weeks: Vec<Option<i32>>,
}

impl PeriodArrays {
    fn new<'a>(keys: impl Iterator<Item = &'a PeriodKey>) -> Self {
        let mut arrays = PeriodArrays {
            types: Vec::new(),
            years: Vec::new(),
            months: Vec::new(),
            quarters: Vec::new(),
            weeks: Vec::new(),
        };
        for key in keys {
            arrays.types.push(key.period_type.as_str().to_string());
            arrays.years.push(key.year);
            arrays.months.push(key.month);
            arrays.quarters.push(key.quarter);
            arrays.weeks.push(key.week);
        }
        arrays
    }
}

const FIND_PERIODS_SQL: &str = r#"
    SELECT p.id, p.period_type::text, p.period_year, p.period_month, p.period_quarter, p.period_week
    FROM metric_period p
    JOIN UNNEST($1::text[], $2::int4[], $3::int4[], $4::int4[], $5::int4[])
        AS k(period_type, period_year, period_month, period_quarter, period_week)
      ON p.period_type::text = k.period_type
     AND p.period_year IS NOT DISTINCT FROM k.period_year
     AND p.period_month IS NOT DISTINCT FROM k.period_month
     AND p.period_quarter IS NOT DISTINCT FROM k.period_quarter
     AND p.period_week IS NOT DISTINCT FROM k.period_week
"#;

impl Storage for PgStorage {
    #[instrument(skip(self))]
    async fn list_countries(&self, field: CountryNameField) -> StorageResult<Vec<CountryRow>> {
        let sql = format!(
            "SELECT id, {col} AS name FROM loc_country WHERE {col} IS NOT NULL",
            col = field.column()
        );
        Ok(sqlx::query_as::<_, CountryRow>(&sql)
            .fetch_all(&self.pool)
            .await?)
    }

    #[instrument(skip(self, names), fields(count = names.len()))]
    async fn find_countries(
        &self,
        field: CountryNameField,
        names: &[String],
    ) -> StorageResult<Vec<CountryRow>> {
        let sql = format!(
            "SELECT id, {col} AS name FROM loc_country WHERE {col} = ANY($1)",
            col = field.column()
        );
        Ok(sqlx::query_as::<_, CountryRow>(&sql)
            .bind(names)
            .fetch_all(&self.pool)
            .await?)
    }

    #[instrument(skip(self))]
    async fn list_cities(&self) -> StorageResult<Vec<CityRow>> {
        Ok(
            sqlx::query_as::<_, CityRow>("SELECT id, country_id, name FROM loc_city")
                .fetch_all(&self.pool)
                .await?,
        )
    }

    #[instrument(skip(self, keys), fields(count = keys.len()))]
    async fn find_cities(&self, keys: &[(i32, String)]) -> StorageResult<Vec<CityRow>> {
        let (country_ids, names): (Vec<i32>, Vec<String>) = keys.iter().cloned().unzip();
        Ok(sqlx::query_as::<_, CityRow>(
            r#"
            SELECT c.id, c.country_id, c.name
            FROM loc_city c
            JOIN UNNEST($1::int4[], $2::text[]) AS k(country_id, name)
              ON c.country_id = k.country_id AND c.name = k.name
            "#,
        )
        .bind(&country_ids)
        .bind(&names)
        .fetch_all(&self.pool)
        .await?)
    }

    #[instrument(skip(self, spec), fields(slug = %spec.slug))]
    async fn get_or_create_metric(&self, spec: &MetricSpec) -> StorageResult<MetricRow> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO metric_info (slug, name, description, category, data_type, source_name, source_url)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (slug) DO NOTHING
            "#,
        )
        .bind(&spec.slug)
        .bind(&spec.name)
        .bind(&spec.description)
        .bind(&spec.category)
        .bind(spec.data_kind.as_str())
        .bind(&spec.source_name)
        .bind(&spec.source_url)
        .execute(&mut *tx)
        .await?;

        let (id, slug, name, data_type): (i32, String, String, String) = sqlx::query_as(
            "SELECT id, slug, name, data_type::text FROM metric_info WHERE slug = $1",
        )
        .bind(&spec.slug)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(MetricRow {
            id,
            slug,
            name,
            data_kind: data_type.parse().map_err(decode_error)?,
        })
    }

    #[instrument(skip(self))]
    async fn list_attribute_types(&self) -> StorageResult<Vec<AttributeTypeRow>> {
        let rows: Vec<(i32, String, String, bool)> = sqlx::query_as(
            "SELECT id, code, value_type::text, is_filtered FROM metric_attribute_type",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(attribute_type_row).collect()
    }

    #[instrument(skip(self, codes), fields(count = codes.len()))]
    async fn find_attribute_types(&self, codes: &[String]) -> StorageResult<Vec<AttributeTypeRow>> {
        let rows: Vec<(i32, String, String, bool)> = sqlx::query_as(
            "SELECT id, code, value_type::text, is_filtered FROM metric_attribute_type WHERE code = ANY($1)",
        )
        .bind(codes)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(attribute_type_row).collect()
    }

    #[instrument(skip(self, specs), fields(count = specs.len()))]
    async fn create_attribute_types(
        &self,
        specs: &[AttributeTypeSpec],
    ) -> StorageResult<Vec<AttributeTypeRow>> {
        let mut seen = HashSet::new();
        let specs: Vec<&AttributeTypeSpec> =
            specs.iter().filter(|s| seen.insert(&s.code)).collect();
        let codes: Vec<String> = specs.iter().map(|s| s.code.clone()).collect();
        let names: Vec<String> = specs.iter().map(|s| s.name.clone()).collect();
        let kinds: Vec<String> = specs.iter().map(|s| s.value_kind.as_str().to_string()).collect();
        let filtered: Vec<bool> = specs.iter().map(|s| s.is_filtered).collect();
        let sort_orders: Vec<i32> = specs.iter().map(|s| s.sort_order).collect();

        let mut tx = self.pool.begin().await?;
        let created = sqlx::query(
            r#"
            INSERT INTO metric_attribute_type (code, name, value_type, is_filtered, sort_order)
            SELECT * FROM UNNEST($1::text[], $2::text[], $3::text[], $4::bool[], $5::int4[])
            ON CONFLICT (code) DO NOTHING
            "#,
        )
        .bind(&codes)
        .bind(&names)
        .bind(&kinds)
        .bind(&filtered)
        .bind(&sort_orders)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let rows: Vec<(i32, String, String, bool)> = sqlx::query_as(
            "SELECT id, code, value_type::text, is_filtered FROM metric_attribute_type WHERE code = ANY($1)",
        )
        .bind(&codes)
        .fetch_all(&mut *tx)
        .await?;
        tx.commit().await?;

        debug!(requested = codes.len(), created, "attribute types stored");
        rows.into_iter().map(attribute_type_row).collect()
    }

    #[instrument(skip(self))]
    async fn list_attribute_values(&self) -> StorageResult<Vec<AttributeValueRow>> {
        Ok(sqlx::query_as::<_, AttributeValueRow>(
            "SELECT id, attribute_type_id, code FROM metric_attribute_value",
        )
        .fetch_all(&self.pool)
        .await?)
    }

    #[instrument(skip(self, keys), fields(count = keys.len()))]
    async fn find_attribute_values(
        &self,
        keys: &[(i32, String)],
    ) -> StorageResult<Vec<AttributeValueRow>> {
        let (type_ids, codes): (Vec<i32>, Vec<String>) = keys.iter().cloned().unzip();
        Ok(sqlx::query_as::<_, AttributeValueRow>(
            r#"
            SELECT v.id, v.attribute_type_id, v.code
            FROM metric_attribute_value v
            JOIN UNNEST($1::int4[], $2::text[]) AS k(attribute_type_id, code)
              ON v.attribute_type_id = k.attribute_type_id AND v.code = k.code
            "#,
        )
        .bind(&type_ids)
        .bind(&codes)
        .fetch_all(&self.pool)
        .await?)
    }

    #[instrument(skip(self, values), fields(count = values.len()))]
    async fn create_attribute_values(
        &self,
        values: &[(i32, AttributeValueSpec)],
    ) -> StorageResult<Vec<AttributeValueRow>> {
        let mut seen = HashSet::new();
        let values: Vec<&(i32, AttributeValueSpec)> = values
            .iter()
            .filter(|(type_id, spec)| seen.insert((*type_id, spec.code.clone())))
            .collect();
        let type_ids: Vec<i32> = values.iter().map(|(t, _)| *t).collect();
        let codes: Vec<String> = values.iter().map(|(_, v)| v.code.clone()).collect();
        let names: Vec<String> = values.iter().map(|(_, v)| v.name.clone()).collect();
        let filtered: Vec<bool> = values.iter().map(|(_, v)| v.is_filtered).collect();
        let sort_orders: Vec<i32> = values.iter().map(|(_, v)| v.sort_order).collect();
        let metas: Vec<Option<serde_json::Value>> =
            values.iter().map(|(_, v)| v.meta.clone()).collect();

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO metric_attribute_value (attribute_type_id, code, name, is_filtered, sort_order, meta_data)
            SELECT * FROM UNNEST($1::int4[], $2::text[], $3::text[], $4::bool[], $5::int4[], $6::jsonb[])
            ON CONFLICT (attribute_type_id, code) DO NOTHING
            "#,
        )
        .bind(&type_ids)
        .bind(&codes)
        .bind(&names)
        .bind(&filtered)
        .bind(&sort_orders)
        .bind(&metas)
        .execute(&mut *tx)
        .await?;

        let rows = sqlx::query_as::<_, AttributeValueRow>(
            r#"
            SELECT v.id, v.attribute_type_id, v.code
            FROM metric_attribute_value v
            JOIN UNNEST($1::int4[], $2::text[]) AS k(attribute_type_id, code)
              ON v.attribute_type_id = k.attribute_type_id AND v.code = k.code
            "#,
        )
        .bind(&type_ids)
        .bind(&codes)
        .fetch_all(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(rows)
    }

    #[instrument(skip(self))]
    async fn list_series(&self, metric_id: i32) -> StorageResult<Vec<SeriesRow>> {
        Ok(sqlx::query_as::<_, SeriesRow>(
            "SELECT id, metric_id, attributes_hash AS hash FROM metric_series WHERE metric_id = $1",
        )
        .bind(metric_id)
        .fetch_all(&self.pool)
        .await?)
    }

    #[instrument(skip(self, hashes), fields(count = hashes.len()))]
    async fn find_series(&self, metric_id: i32, hashes: &[String]) -> StorageResult<Vec<SeriesRow>> {
        Ok(sqlx::query_as::<_, SeriesRow>(
            r#"
            SELECT id, metric_id, attributes_hash AS hash
            FROM metric_series
            WHERE metric_id = $1 AND attributes_hash = ANY($2)
            "#,
        )
        .bind(metric_id)
        .bind(hashes)
        .fetch_all(&self.pool)
        .await?)
    }

    #[instrument(skip(self, series), fields(count = series.len()))]
    async fn create_series(
        &self,
        metric_id: i32,
        series: &[NewSeries],
    ) -> StorageResult<Vec<SeriesRow>> {
        let hashes: Vec<String> = series.iter().map(|s| s.hash.clone()).collect();
        let mut tx = self.pool.begin().await?;

        let created: Vec<(i32, String)> = sqlx::query_as(
            r#"
            INSERT INTO metric_series (metric_id, attributes_hash)
            SELECT $1, h FROM UNNEST($2::text[]) AS h
            ON CONFLICT (metric_id, attributes_hash) DO NOTHING
            RETURNING id, attributes_hash
            "#,
        )
        .bind(metric_id)
        .bind(&hashes)
        .fetch_all(&mut *tx)
        .await?;

        // links only for series created by this call
        let mut link_series = Vec::new();
        let mut link_types = Vec::new();
        let mut link_values = Vec::new();
        for (id, hash) in &created {
            if let Some(new) = series.iter().find(|s| &s.hash == hash) {
                for (type_id, value_id) in &new.pairs {
                    link_series.push(*id);
                    link_types.push(*type_id);
                    link_values.push(*value_id);
                }
            }
        }
        if !link_series.is_empty() {
            sqlx::query(
                r#"
                INSERT INTO metric_series_attribute (series_id, attribute_type_id, attribute_value_id)
                SELECT * FROM UNNEST($1::int4[], $2::int4[], $3::int4[])
                ON CONFLICT DO NOTHING
                "#,
            )
            .bind(&link_series)
            .bind(&link_types)
            .bind(&link_values)
            .execute(&mut *tx)
            .await?;
        }

        let rows = sqlx::query_as::<_, SeriesRow>(
            r#"
            SELECT id, metric_id, attributes_hash AS hash
            FROM metric_series
            WHERE metric_id = $1 AND attributes_hash = ANY($2)
            "#,
        )
        .bind(metric_id)
        .bind(&hashes)
        .fetch_all(&mut *tx)
        .await?;
        tx.commit().await?;

        debug!(requested = hashes.len(), created = created.len(), "series stored");
        Ok(rows)
    }

    #[instrument(skip(self))]
    async fn list_periods(&self, limit: usize) -> StorageResult<Vec<PeriodRow>> {
        let rows: Vec<PeriodTuple> = sqlx::query_as(
            r#"
            SELECT id, period_type::text, period_year, period_month, period_quarter, period_week
            FROM metric_period
            ORDER BY id DESC
            LIMIT $1
            "#,
        )
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(period_row).collect()
    }

    #[instrument(skip(self, keys), fields(count = keys.len()))]
    async fn find_periods(&self, keys: &[PeriodKey]) -> StorageResult<Vec<PeriodRow>> {
        let arrays = PeriodArrays::new(keys.iter());
        let rows: Vec<PeriodTuple> = sqlx::query_as(FIND_PERIODS_SQL)
            .bind(&arrays.types)
            .bind(&arrays.years)
            .bind(&arrays.months)
            .bind(&arrays.quarters)
            .bind(&arrays.weeks)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(period_row).collect()
    }

    #[instrument(skip(self, periods), fields(count = periods.len()))]
    async fn create_periods(&self, periods: &[PeriodData]) -> StorageResult<Vec<PeriodRow>> {
        let mut seen = HashSet::new();
        let periods: Vec<&PeriodData> = periods.iter().filter(|p| seen.insert(p.key())).collect();
        let keys: Vec<PeriodKey> = periods.iter().map(|p| p.key()).collect();
        let arrays = PeriodArrays::new(keys.iter());
        let starts: Vec<Option<NaiveDate>> = periods.iter().map(|p| p.date_start).collect();
        let ends: Vec<Option<NaiveDate>> = periods.iter().map(|p| p.date_end).collect();
        let collected: Vec<Option<NaiveDate>> = periods.iter().map(|p| p.collected_at).collect();
        let metas: Vec<Option<serde_json::Value>> = periods.iter().map(|p| p.meta.clone()).collect();

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO metric_period
                (period_type, period_year, period_month, period_quarter, period_week,
                 date_start, date_end, collected_at, meta_data)
            SELECT k.period_type, k.period_year, k.period_month, k.period_quarter, k.period_week,
                   k.date_start, k.date_end, k.collected_at, k.meta_data
            FROM UNNEST($1::text[], $2::int4[], $3::int4[], $4::int4[], $5::int4[],
                        $6::date[], $7::date[], $8::date[], $9::jsonb[])
                AS k(period_type, period_year, period_month, period_quarter, period_week,
                     date_start, date_end, collected_at, meta_data)
            WHERE NOT EXISTS (
                SELECT 1 FROM metric_period p
                WHERE p.period_type::text = k.period_type
                  AND p.period_year IS NOT DISTINCT FROM k.period_year
                  AND p.period_month IS NOT DISTINCT FROM k.period_month
                  AND p.period_quarter IS NOT DISTINCT FROM k.period_quarter
                  AND p.period_week IS NOT DISTINCT FROM k.period_week
            )
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(&arrays.types)
        .bind(&arrays.years)
        .bind(&arrays.months)
        .bind(&arrays.quarters)
        .bind(&arrays.weeks)
        .bind(&starts)
        .bind(&ends)
        .bind(&collected)
        .bind(&metas)
        .execute(&mut *tx)
        .await?;

        let rows: Vec<PeriodTuple> = sqlx::query_as(FIND_PERIODS_SQL)
            .bind(&arrays.types)
            .bind(&arrays.years)
            .bind(&arrays.months)
            .bind(&arrays.quarters)
            .bind(&arrays.weeks)
            .fetch_all(&mut *tx)
            .await?;
        tx.commit().await?;
        rows.into_iter().map(period_row).collect()
    }

    #[instrument(skip(self, rows), fields(count = rows.len()))]
    async fn insert_facts(&self, rows: &[FactRow]) -> StorageResult<u64> {
        if rows.is_empty() {
            return Ok(0);
        }

        let mut series_ids = Vec::with_capacity(rows.len());
        let mut period_ids = Vec::with_capacity(rows.len());
        let mut country_ids = Vec::with_capacity(rows.len());
        let mut city_ids: Vec<Option<i32>> = Vec::with_capacity(rows.len());
        let mut numerics: Vec<Option<Decimal>> = Vec::with_capacity(rows.len());
        let mut strings: Vec<Option<String>> = Vec::with_capacity(rows.len());
        let mut booleans: Vec<Option<bool>> = Vec::with_capacity(rows.len());
        let mut range_starts: Vec<Option<Decimal>> = Vec::with_capacity(rows.len());
        let mut range_ends: Vec<Option<Decimal>> = Vec::with_capacity(rows.len());
        for row in rows {
            let columns = row.value.columns();
            series_ids.push(row.series_id);
            period_ids.push(row.period_id);
            country_ids.push(row.country_id);
            city_ids.push(row.city_id);
            numerics.push(columns.numeric);
            strings.push(columns.string);
            booleans.push(columns.boolean);
            range_starts.push(columns.range_start);
            range_ends.push(columns.range_end);
        }

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            CREATE TEMP TABLE etl_fact_staging (
                ord bigint,
                series_id int4,
                period_id int4,
                country_id int4,
                city_id int4,
                value_numeric numeric,
                value_string text,
                value_boolean bool,
                value_range_start numeric,
                value_range_end numeric
            ) ON COMMIT DROP
            "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO etl_fact_staging
                (series_id, period_id, country_id, city_id, value_numeric, value_string,
                 value_boolean, value_range_start, value_range_end, ord)
            SELECT * FROM UNNEST($1::int4[], $2::int4[], $3::int4[], $4::int4[], $5::numeric[],
                                 $6::text[], $7::bool[], $8::numeric[], $9::numeric[])
                WITH ORDINALITY
            "#,
        )
        .bind(&series_ids)
        .bind(&period_ids)
        .bind(&country_ids)
        .bind(&city_ids)
        .bind(&numerics)
        .bind(&strings)
        .bind(&booleans)
        .bind(&range_starts)
        .bind(&range_ends)
        .execute(&mut *tx)
        .await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO metric_data
                (series_id, period_id, country_id, city_id, value_numeric, value_string,
                 value_boolean, value_range_start, value_range_end)
            SELECT DISTINCT ON (s.series_id, s.period_id, s.country_id, COALESCE(s.city_id, -1))
                   s.series_id, s.period_id, s.country_id, s.city_id, s.value_numeric,
                   s.value_string, s.value_boolean, s.value_range_start, s.value_range_end
            FROM etl_fact_staging s
            WHERE NOT EXISTS (
                SELECT 1 FROM metric_data m
                WHERE m.series_id = s.series_id
                  AND m.period_id = s.period_id
                  AND m.country_id = s.country_id
                  AND COALESCE(m.city_id, -1) = COALESCE(s.city_id, -1)
            )
            ORDER BY s.series_id, s.period_id, s.country_id, COALESCE(s.city_id, -1), s.ord
            "#,
        )
        .execute(&mut *tx)
        .await?
        .rows_affected();
        tx.commit().await?;

        Ok(inserted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AttributeValueKind, DataKind};

    // -------------------------------------------------------------------------
    // LABEL COLUMN TESTS
    // -------------------------------------------------------------------------

    #[test]
    fn test_data_type_labels_read_back() {
        for kind in [DataKind::Numeric, DataKind::String, DataKind::Boolean, DataKind::Range] {
            assert_eq!(kind.as_str().parse::<DataKind>(), Ok(kind));
        }
    }

    #[test]
    fn test_period_type_labels_read_back() {
        for period_type in [
            PeriodType::OneTime,
            PeriodType::Yearly,
            PeriodType::Quarterly,
            PeriodType::Monthly,
            PeriodType::Weekly,
            PeriodType::Interval,
            PeriodType::Unspecified,
        ] {
            let arrays = PeriodArrays::new(
                [PeriodKey {
                    period_type,
                    year: Some(2021),
                    month: None,
                    quarter: None,
                    week: None,
                }]
                .iter(),
            );
            let label = arrays.types[0].clone();
            let row = period_row((7, label, Some(2021), None, None, None)).unwrap();
            assert_eq!(row.key.period_type, period_type);
        }
    }

    #[test]
    fn test_enum_style_labels_rejected() {
        let err = period_row((1, "YEARLY".to_string(), Some(2021), None, None, None)).unwrap_err();
        assert!(matches!(err, StorageError::Database(sqlx::Error::Decode(_))));

        let row = attribute_type_row((3, "Currency".into(), "currency".into(), true)).unwrap();
        assert_eq!(row.value_kind, AttributeValueKind::Currency);
        assert!(attribute_type_row((3, "Sex".into(), "CURRENCY_ENUM".into(), false)).is_err());
    }
}
