//! Storage-facing records of the metric fact model.
//!
//! Relations are expressed as plain foreign-key integers; related rows are
//! always fetched through explicit batched storage calls.

use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::parser::period::PeriodKey;

/// Sentinel used for "no city" when comparing natural keys.
pub const NO_CITY: i32 = -1;

/// Maximum length of attribute codes and names in storage.
pub const MAX_LABEL_LEN: usize = 255;

// =============================================================================
// Value kinds
// =============================================================================

/// Declared data kind of a metric's values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataKind {
    #[serde(alias = "float", alias = "number", alias = "decimal")]
    Numeric,
    String,
    #[serde(alias = "bool")]
    Boolean,
    Range,
}

impl DataKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataKind::Numeric => "numeric",
            DataKind::String => "string",
            DataKind::Boolean => "boolean",
            DataKind::Range => "range",
        }
    }
}

impl FromStr for DataKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "numeric" | "float" | "number" | "decimal" => Ok(DataKind::Numeric),
            "string" => Ok(DataKind::String),
            "boolean" | "bool" => Ok(DataKind::Boolean),
            "range" => Ok(DataKind::Range),
            other => Err(format!("unknown data kind '{}'", other)),
        }
    }
}

/// Value kind declared on an attribute type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeValueKind {
    #[default]
    String,
    Number,
    Currency,
    Boolean,
}

impl AttributeValueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttributeValueKind::String => "string",
            AttributeValueKind::Number => "number",
            AttributeValueKind::Currency => "currency",
            AttributeValueKind::Boolean => "boolean",
        }
    }
}

impl FromStr for AttributeValueKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "string" => Ok(AttributeValueKind::String),
            "number" => Ok(AttributeValueKind::Number),
            "currency" => Ok(AttributeValueKind::Currency),
            "boolean" => Ok(AttributeValueKind::Boolean),
            other => Err(format!("unknown attribute value kind '{}'", other)),
        }
    }
}

// =============================================================================
// Attribute vocabulary
// =============================================================================

/// Attribute type as requested by a parsed row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeTypeSpec {
    pub code: String,
    pub name: String,
    pub value_kind: AttributeValueKind,
    pub is_filtered: bool,
    pub sort_order: i32,
}

/// Attribute value as requested by a parsed row.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeValueSpec {
    pub code: String,
    pub name: String,
    pub is_filtered: bool,
    pub sort_order: i32,
    pub meta: Option<serde_json::Value>,
}

/// One (type, value) pair extracted from a row.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedAttribute {
    pub attr_type: AttributeTypeSpec,
    pub value: AttributeValueSpec,
}

impl ParsedAttribute {
    /// Plain string attribute whose code doubles as its display name.
    pub fn labelled(type_code: &str, value: &str, is_filtered: bool) -> Self {
        Self {
            attr_type: AttributeTypeSpec {
                code: type_code.to_string(),
                name: type_code.to_string(),
                value_kind: AttributeValueKind::String,
                is_filtered,
                sort_order: 0,
            },
            value: AttributeValueSpec {
                code: value.to_string(),
                name: value.to_string(),
                is_filtered,
                sort_order: 0,
                meta: None,
            },
        }
    }
}

// =============================================================================
// Entity rows
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct CountryRow {
    pub id: i32,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct CityRow {
    pub id: i32,
    pub country_id: i32,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricRow {
    pub id: i32,
    pub slug: String,
    pub name: String,
    pub data_kind: DataKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeTypeRow {
    pub id: i32,
    pub code: String,
    pub value_kind: AttributeValueKind,
    pub is_filtered: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct AttributeValueRow {
    pub id: i32,
    pub attribute_type_id: i32,
    pub code: String,
}

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct SeriesRow {
    pub id: i32,
    pub metric_id: i32,
    pub hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeriodRow {
    pub id: i32,
    pub key: PeriodKey,
}

/// A series to be created together with its attribute links.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSeries {
    pub hash: String,
    pub pairs: Vec<(i32, i32)>,
}

/// Canonical identity of a set of (attribute type id, attribute value id) pairs.
///
/// Pairs are sorted ascending, so the same set in any order yields the same hash.
pub fn series_hash(pairs: &[(i32, i32)]) -> String {
    let mut sorted = pairs.to_vec();
    sorted.sort_unstable();
    sorted.dedup();
    sorted
        .iter()
        .map(|(type_id, value_id)| format!("{}:{}", type_id, value_id))
        .collect::<Vec<_>>()
        .join("_")
}

// =============================================================================
// Facts
// =============================================================================

/// Typed value of a fact. Exactly one storage column is populated per variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FactValue {
    Numeric(Decimal),
    Text(String),
    Boolean(bool),
    Range { start: Decimal, end: Decimal },
}

/// Nullable storage columns of a fact value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValueColumns {
    pub numeric: Option<Decimal>,
    pub string: Option<String>,
    pub boolean: Option<bool>,
    pub range_start: Option<Decimal>,
    pub range_end: Option<Decimal>,
}

impl ValueColumns {
    /// Number of value groups that are populated (a range counts once).
    pub fn populated(&self) -> usize {
        [
            self.numeric.is_some(),
            self.string.is_some(),
            self.boolean.is_some(),
            self.range_start.is_some() && self.range_end.is_some(),
        ]
        .iter()
        .filter(|set| **set)
        .count()
    }
}

impl FactValue {
    pub fn columns(&self) -> ValueColumns {
        let mut columns = ValueColumns::default();
        match self {
            FactValue::Numeric(value) => columns.numeric = Some(*value),
            FactValue::Text(value) => columns.string = Some(value.clone()),
            FactValue::Boolean(value) => columns.boolean = Some(*value),
            FactValue::Range { start, end } => {
                columns.range_start = Some(*start);
                columns.range_end = Some(*end);
            }
        }
        columns
    }
}

impl fmt::Display for FactValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FactValue::Numeric(value) => write!(f, "{}", value),
            FactValue::Text(value) => write!(f, "{}", value),
            FactValue::Boolean(value) => write!(f, "{}", value),
            FactValue::Range { start, end } => write!(f, "{}-{}", start, end),
        }
    }
}

/// Natural uniqueness key of a fact row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NaturalKey {
    pub series_id: i32,
    pub period_id: i32,
    pub country_id: i32,
    pub city_id: i32,
}

/// A fact row ready for loading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FactRow {
    pub series_id: i32,
    pub period_id: i32,
    pub country_id: i32,
    pub city_id: Option<i32>,
    pub value: FactValue,
}

impl FactRow {
    pub fn natural_key(&self) -> NaturalKey {
        NaturalKey {
            series_id: self.series_id,
            period_id: self.period_id,
            country_id: self.country_id,
            city_id: self.city_id.unwrap_or(NO_CITY),
        }
    }
}
