//! Source descriptor: how one delimited extract maps onto the fact model.
//!
//! Descriptors are JSON documents, see `services/etl/sources/` for samples.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use encoding_rs::Encoding;
use serde::Deserialize;

use crate::config::CacheConfig;
use crate::error::{Error, Result};
use crate::model::DataKind;
use crate::parser::period::PeriodSpec;
use crate::parser::strategy::{AttributeColumn, AttributeStrategy};
use crate::parser::transform::FieldTransform;
use crate::reader::resolve_encoding;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SourceDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub source: SourceFile,
    pub metric: MetricSpec,

    pub value_column: String,
    #[serde(default)]
    pub value_transform: Option<FieldTransform>,
    pub country_column: String,
    #[serde(default)]
    pub city_column: Option<String>,

    #[serde(default)]
    pub geography_level: GeographyLevel,
    #[serde(default)]
    pub country_lookup: CountryNameField,
    #[serde(default)]
    pub country_alias_map: HashMap<String, Vec<String>>,
    #[serde(default)]
    pub city_alias_map: HashMap<String, String>,

    #[serde(default)]
    pub attributes: Vec<AttributeColumn>,
    #[serde(default)]
    pub period: PeriodSpec,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_true")]
    pub skip_invalid_rows: bool,
    #[serde(default = "default_true")]
    pub skip_duplicates: bool,
    #[serde(default = "default_true")]
    pub validate_country_exists: bool,
    #[serde(default)]
    pub cache: CacheConfig,
}

fn default_batch_size() -> usize {
    2000
}

fn default_chunk_size() -> usize {
    10_000
}

fn default_true() -> bool {
    true
}

/// Location and text format of the source file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SourceFile {
    pub path: PathBuf,
    #[serde(default = "default_delimiter")]
    pub delimiter: char,
    #[serde(default = "default_encoding")]
    pub encoding: String,
}

fn default_delimiter() -> char {
    ','
}

fn default_encoding() -> String {
    "utf-8".to_string()
}

/// Indicator the facts belong to.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MetricSpec {
    pub slug: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    pub data_kind: DataKind,
    #[serde(default)]
    pub source_name: Option<String>,
    #[serde(default)]
    pub source_url: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeographyLevel {
    #[default]
    Country,
    City,
}

/// Storage column country names are matched against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CountryNameField {
    #[default]
    Name,
    NameEng,
}

impl CountryNameField {
    pub fn column(&self) -> &'static str {
        match self {
            CountryNameField::Name => "name",
            CountryNameField::NameEng => "name_eng",
        }
    }
}

impl SourceDescriptor {
    /// Load and validate a descriptor file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| Error::ReadFile {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let descriptor: SourceDescriptor = serde_json::from_str(text)?;
        descriptor.validate()?;
        Ok(descriptor)
    }

    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(Error::Descriptor(format!("{}: {}", self.name, msg)));

        if self.metric.slug.trim().is_empty() {
            return fail("metric slug is empty".into());
        }
        if self.batch_size == 0 || self.chunk_size == 0 {
            return fail("batch_size and chunk_size must be positive".into());
        }
        if !self.source.delimiter.is_ascii() {
            return fail(format!("delimiter '{}' is not ASCII", self.source.delimiter));
        }
        resolve_encoding(&self.source.encoding)?;
        if self.geography_level == GeographyLevel::City && self.city_column.is_none() {
            return fail("city geography requires city_column".into());
        }
        for attr in &self.attributes {
            if let AttributeStrategy::FixedType { type_code, .. } = &attr.strategy {
                if type_code.trim().is_empty() {
                    return fail(format!("column '{}' has an empty type_code", attr.column));
                }
            }
        }
        if self.period.period_type.requires_year() && self.period.year.is_none() {
            // complex columns may still supply the year per row
            let has_complex = self
                .attributes
                .iter()
                .any(|a| matches!(a.strategy, AttributeStrategy::Complex { .. }));
            if !has_complex {
                return fail(format!(
                    "period type '{}' needs a year source",
                    self.period.period_type.as_str()
                ));
            }
        }
        Ok(())
    }

    pub fn delimiter(&self) -> u8 {
        self.source.delimiter as u8
    }

    pub fn encoding(&self) -> Result<&'static Encoding> {
        resolve_encoding(&self.source.encoding)
    }

    /// Every column the descriptor reads, in declaration order without repeats.
    pub fn required_columns(&self) -> Vec<&str> {
        let mut columns: Vec<&str> = vec![self.value_column.as_str(), self.country_column.as_str()];
        if let Some(city) = &self.city_column {
            columns.push(city);
        }
        columns.extend(self.attributes.iter().map(|a| a.column.as_str()));
        columns.extend(self.period.columns());

        let mut seen = std::collections::HashSet::new();
        columns.retain(|c| seen.insert(*c));
        columns
    }
}
