//! Period data, its composite key, and the merge of descriptor-declared
//! period fields with fragments extracted by complex column parsers.
//!
//! Merge rule: a fragment only fills fields the descriptor left empty. When
//! both carry a value and they differ, the descriptor value is kept and the
//! disagreement is reported as a [`PeriodConflict`].

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::transform::{parse_integral, FieldSource};
use crate::error::ParseError;
use crate::reader::RawRow;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeriodType {
    OneTime,
    #[default]
    Yearly,
    Quarterly,
    Monthly,
    Weekly,
    Interval,
    #[serde(rename = "none")]
    Unspecified,
}

impl PeriodType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PeriodType::OneTime => "one_time",
            PeriodType::Yearly => "yearly",
            PeriodType::Quarterly => "quarterly",
            PeriodType::Monthly => "monthly",
            PeriodType::Weekly => "weekly",
            PeriodType::Interval => "interval",
            PeriodType::Unspecified => "none",
        }
    }

    /// Calendar period types cannot exist without a year.
    pub fn requires_year(&self) -> bool {
        matches!(
            self,
            PeriodType::Yearly | PeriodType::Quarterly | PeriodType::Monthly | PeriodType::Weekly
        )
    }
}

impl FromStr for PeriodType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "one_time" => Ok(PeriodType::OneTime),
            "yearly" => Ok(PeriodType::Yearly),
            "quarterly" => Ok(PeriodType::Quarterly),
            "monthly" => Ok(PeriodType::Monthly),
            "weekly" => Ok(PeriodType::Weekly),
            "interval" => Ok(PeriodType::Interval),
            "none" => Ok(PeriodType::Unspecified),
            other => Err(format!("unknown period type '{}'", other)),
        }
    }
}

/// Composite identity of a period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeriodKey {
    pub period_type: PeriodType,
    pub year: Option<i32>,
    pub month: Option<i32>,
    pub quarter: Option<i32>,
    pub week: Option<i32>,
}

impl fmt::Display for PeriodKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.period_type.as_str())?;
        if let Some(year) = self.year {
            write!(f, "_{}", year)?;
        }
        if let Some(month) = self.month {
            write!(f, "_{}", month)?;
        }
        if let Some(quarter) = self.quarter {
            write!(f, "_q{}", quarter)?;
        }
        if let Some(week) = self.week {
            write!(f, "_w{}", week)?;
        }
        Ok(())
    }
}

/// Full period as stored.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PeriodData {
    pub period_type: PeriodType,
    pub year: Option<i32>,
    pub month: Option<i32>,
    pub quarter: Option<i32>,
    pub week: Option<i32>,
    pub date_start: Option<NaiveDate>,
    pub date_end: Option<NaiveDate>,
    pub collected_at: Option<NaiveDate>,
    pub meta: Option<serde_json::Value>,
}

/// Partial period emitted by a complex column parser.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PeriodFragment {
    pub period_type: Option<PeriodType>,
    pub year: Option<i32>,
    pub month: Option<i32>,
    pub quarter: Option<i32>,
    pub week: Option<i32>,
    pub date_start: Option<NaiveDate>,
    pub date_end: Option<NaiveDate>,
    pub meta: Option<serde_json::Value>,
}

impl PeriodFragment {
    pub fn is_empty(&self) -> bool {
        *self == PeriodFragment::default()
    }
}

/// A fragment value ignored because the descriptor already set the field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeriodConflict {
    pub field: String,
    pub kept: String,
    pub ignored: String,
}

fn fill<T: PartialEq + Clone + fmt::Debug>(
    field: &str,
    slot: &mut Option<T>,
    incoming: &Option<T>,
    conflicts: &mut Vec<PeriodConflict>,
) {
    match (slot.as_ref(), incoming) {
        (None, Some(value)) => *slot = Some(value.clone()),
        (Some(kept), Some(value)) if kept != value => conflicts.push(PeriodConflict {
            field: field.to_string(),
            kept: format!("{:?}", kept),
            ignored: format!("{:?}", value),
        }),
        _ => {}
    }
}

impl PeriodData {
    pub fn key(&self) -> PeriodKey {
        PeriodKey {
            period_type: self.period_type,
            year: self.year,
            month: self.month,
            quarter: self.quarter,
            week: self.week,
        }
    }

    /// Fill empty fields from a fragment. Existing values always win.
    pub fn absorb(&mut self, fragment: &PeriodFragment) -> Vec<PeriodConflict> {
        let mut conflicts = Vec::new();

        if let Some(period_type) = fragment.period_type {
            if period_type != self.period_type {
                conflicts.push(PeriodConflict {
                    field: "period_type".to_string(),
                    kept: self.period_type.as_str().to_string(),
                    ignored: period_type.as_str().to_string(),
                });
            }
        }

        fill("year", &mut self.year, &fragment.year, &mut conflicts);
        fill("month", &mut self.month, &fragment.month, &mut conflicts);
        fill("quarter", &mut self.quarter, &fragment.quarter, &mut conflicts);
        fill("week", &mut self.week, &fragment.week, &mut conflicts);
        fill("date_start", &mut self.date_start, &fragment.date_start, &mut conflicts);
        fill("date_end", &mut self.date_end, &fragment.date_end, &mut conflicts);

        if let Some(incoming) = &fragment.meta {
            match self.meta.as_mut() {
                None => self.meta = Some(incoming.clone()),
                Some(serde_json::Value::Object(kept)) if incoming.is_object() => {
                    for (key, value) in incoming.as_object().into_iter().flatten() {
                        match kept.get(key) {
                            None => {
                                kept.insert(key.clone(), value.clone());
                            }
                            Some(existing) if existing != value => {
                                conflicts.push(PeriodConflict {
                                    field: format!("meta.{}", key),
                                    kept: existing.to_string(),
                                    ignored: value.to_string(),
                                })
                            }
                            Some(_) => {}
                        }
                    }
                }
                Some(kept) => {
                    if *kept != *incoming {
                        conflicts.push(PeriodConflict {
                            field: "meta".to_string(),
                            kept: kept.to_string(),
                            ignored: incoming.to_string(),
                        });
                    }
                }
            }
        }

        conflicts
    }
}

// =============================================================================
// Descriptor period spec
// =============================================================================

/// Period declaration of a source descriptor.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PeriodSpec {
    #[serde(default)]
    pub period_type: PeriodType,
    #[serde(default)]
    pub year: Option<FieldSource>,
    #[serde(default)]
    pub month: Option<FieldSource>,
    #[serde(default)]
    pub quarter: Option<FieldSource>,
    #[serde(default)]
    pub week: Option<FieldSource>,
    #[serde(default)]
    pub date_start: Option<FieldSource>,
    #[serde(default)]
    pub date_end: Option<FieldSource>,
    #[serde(default)]
    pub collected_at: Option<FieldSource>,
    #[serde(default)]
    pub meta: Option<serde_json::Value>,
}

impl PeriodSpec {
    fn sources(&self) -> [&Option<FieldSource>; 7] {
        [
            &self.year,
            &self.month,
            &self.quarter,
            &self.week,
            &self.date_start,
            &self.date_end,
            &self.collected_at,
        ]
    }

    /// Columns the period reads from the source file.
    pub fn columns(&self) -> Vec<&str> {
        self.sources()
            .into_iter()
            .filter_map(|s| s.as_ref().and_then(FieldSource::column_name))
            .collect()
    }

    /// Build the period declared by the descriptor for one row.
    pub fn build(&self, row: &RawRow) -> Result<PeriodData, ParseError> {
        Ok(PeriodData {
            period_type: self.period_type,
            year: int_field(&self.year, row, "year", 1..=9999)?,
            month: int_field(&self.month, row, "month", 1..=12)?,
            quarter: int_field(&self.quarter, row, "quarter", 1..=4)?,
            week: int_field(&self.week, row, "week", 1..=53)?,
            date_start: date_field(&self.date_start, row, "date_start")?,
            date_end: date_field(&self.date_end, row, "date_end")?,
            collected_at: date_field(&self.collected_at, row, "collected_at")?,
            meta: self.meta.clone(),
        })
    }
}

fn int_field(
    source: &Option<FieldSource>,
    row: &RawRow,
    field: &'static str,
    range: std::ops::RangeInclusive<i64>,
) -> Result<Option<i32>, ParseError> {
    let Some(text) = source.as_ref().map(|s| s.resolve(row)).transpose()?.flatten() else {
        return Ok(None);
    };
    match parse_integral(&text) {
        Some(n) if range.contains(&n) => Ok(Some(n as i32)),
        _ => Err(ParseError::InvalidField { field, value: text }),
    }
}

const DATE_FORMATS: [&str; 3] = ["%Y-%m-%d", "%d.%m.%Y", "%d/%m/%Y"];

fn date_field(
    source: &Option<FieldSource>,
    row: &RawRow,
    field: &'static str,
) -> Result<Option<NaiveDate>, ParseError> {
    let Some(text) = source.as_ref().map(|s| s.resolve(row)).transpose()?.flatten() else {
        return Ok(None);
    };
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(&text, fmt).ok())
        .map(Some)
        .ok_or(ParseError::InvalidField { field, value: text })
}
