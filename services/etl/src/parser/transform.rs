//! Field sources and text transforms used to build period fields.

use std::fmt;

use chrono::{Datelike, NaiveDate};
use serde::Deserialize;

use crate::error::ParseError;
use crate::reader::RawRow;

/// Text transform applied to a field before it is typed.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FieldTransform {
    Trim,
    /// Integral number, tolerating a zero fraction ("2021.0").
    Integer,
    /// English month name or abbreviation to its number.
    MonthName,
    /// "Q3", "2021-Q3" or "3" to the quarter number.
    QuarterLabel,
    Substring { start: usize, len: usize },
    StripSuffix { suffix: String },
    Replace { from: String, to: String },
}

impl FieldTransform {
    pub fn apply(&self, input: &str) -> Result<String, ParseError> {
        let text = input.trim();
        match self {
            FieldTransform::Trim => Ok(text.to_string()),
            FieldTransform::Integer => parse_integral(text)
                .map(|n| n.to_string())
                .ok_or_else(|| invalid("integer", text)),
            FieldTransform::MonthName => month_number(text)
                .map(|m| m.to_string())
                .ok_or_else(|| invalid("month name", text)),
            FieldTransform::QuarterLabel => quarter_number(text)
                .map(|q| q.to_string())
                .ok_or_else(|| invalid("quarter label", text)),
            FieldTransform::Substring { start, len } => {
                let out: String = text.chars().skip(*start).take(*len).collect();
                if out.is_empty() {
                    Err(ParseError::Empty)
                } else {
                    Ok(out)
                }
            }
            FieldTransform::StripSuffix { suffix } => Ok(text
                .strip_suffix(suffix.as_str())
                .unwrap_or(text)
                .trim_end()
                .to_string()),
            FieldTransform::Replace { from, to } => Ok(text.replace(from.as_str(), to)),
        }
    }
}

/// Scalar constant in a descriptor, written either as a number or as text.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Int(i64),
    Text(String),
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Int(n) => write!(f, "{}", n),
            Scalar::Text(s) => write!(f, "{}", s),
        }
    }
}

/// Part of a date-like cell extracted by a derived source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatePart {
    Year,
    Month,
    Quarter,
    Week,
}

/// Where a period field gets its text from.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum FieldSource {
    Column {
        column: String,
        #[serde(default)]
        transform: Option<FieldTransform>,
    },
    Fixed {
        value: Scalar,
        #[serde(default)]
        transform: Option<FieldTransform>,
    },
    Derived {
        from: String,
        part: DatePart,
        #[serde(default)]
        transform: Option<FieldTransform>,
    },
}

impl FieldSource {
    pub fn column(column: &str) -> Self {
        FieldSource::Column {
            column: column.to_string(),
            transform: None,
        }
    }

    pub fn fixed(value: impl Into<String>) -> Self {
        FieldSource::Fixed {
            value: Scalar::Text(value.into()),
            transform: None,
        }
    }

    /// Column this source reads, if any.
    pub fn column_name(&self) -> Option<&str> {
        match self {
            FieldSource::Column { column, .. } => Some(column),
            FieldSource::Derived { from, .. } => Some(from),
            FieldSource::Fixed { .. } => None,
        }
    }

    /// Resolve the source against a row. Empty cells resolve to `None`.
    pub fn resolve(&self, row: &RawRow) -> Result<Option<String>, ParseError> {
        let (raw, transform) = match self {
            FieldSource::Column { column, transform } => {
                (row.get(column).map(str::to_string), transform)
            }
            FieldSource::Fixed { value, transform } => (Some(value.to_string()), transform),
            FieldSource::Derived {
                from,
                part,
                transform,
            } => {
                let derived = match row.get(from) {
                    Some(text) => date_part(text, *part)?,
                    None => None,
                };
                (derived, transform)
            }
        };

        let Some(raw) = raw.filter(|s| !s.trim().is_empty()) else {
            return Ok(None);
        };
        match transform {
            Some(t) => t.apply(&raw).map(Some),
            None => Ok(Some(raw.trim().to_string())),
        }
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn invalid(field: &'static str, value: &str) -> ParseError {
    ParseError::InvalidField {
        field,
        value: value.to_string(),
    }
}

/// Parse an integer, accepting a fraction made only of zeros.
pub fn parse_integral(text: &str) -> Option<i64> {
    let text = text.trim();
    if let Ok(n) = text.parse::<i64>() {
        return Some(n);
    }
    let (whole, frac) = text.split_once('.')?;
    if !frac.is_empty() && frac.chars().all(|c| c == '0') {
        whole.parse().ok()
    } else {
        None
    }
}

const MONTHS: [&str; 12] = [
    "january",
    "february",
    "march",
    "april",
    "may",
    "june",
    "july",
    "august",
    "september",
    "october",
    "november",
    "december",
];

/// Month number from an English name, a three-letter abbreviation or a number.
pub fn month_number(text: &str) -> Option<u32> {
    let lower = text.trim().to_lowercase();
    if let Ok(n) = lower.parse::<u32>() {
        return (1..=12).contains(&n).then_some(n);
    }
    MONTHS
        .iter()
        .position(|m| *m == lower || (lower.len() == 3 && m.starts_with(lower.as_str())))
        .map(|i| i as u32 + 1)
}

/// Quarter number from "Q3", "2021-Q3", "q3" or "3".
pub fn quarter_number(text: &str) -> Option<u32> {
    let upper = text.trim().to_uppercase();
    let tail = match upper.rfind('Q') {
        Some(pos) => &upper[pos + 1..],
        None => upper.as_str(),
    };
    let n: u32 = tail.parse().ok()?;
    (1..=4).contains(&n).then_some(n)
}

/// Extract a part of a date-like value: `2021`, `2021-03`, `2021-03-15`,
/// `2021-Q3` or `2021-W05`. Returns `None` when the value carries no such part.
pub fn date_part(text: &str, part: DatePart) -> Result<Option<String>, ParseError> {
    let text = text.trim();
    let bad = || invalid("date", text);

    let (year_text, rest) = match text.split_once('-') {
        Some((y, r)) => (y, Some(r)),
        None => (text, None),
    };
    let year: i32 = year_text.parse().map_err(|_| bad())?;

    let (month, quarter, week) = match rest {
        None => (None, None, None),
        Some(r) if r.starts_with(['Q', 'q']) => {
            (None, Some(quarter_number(r).ok_or_else(bad)?), None)
        }
        Some(r) if r.starts_with(['W', 'w']) => {
            let w: u32 = r[1..].parse().map_err(|_| bad())?;
            if !(1..=53).contains(&w) {
                return Err(bad());
            }
            (None, None, Some(w))
        }
        Some(r) => match r.split_once('-') {
            Some(_) => {
                let date = NaiveDate::parse_from_str(text, "%Y-%m-%d").map_err(|_| bad())?;
                (
                    Some(date.month()),
                    Some((date.month() - 1) / 3 + 1),
                    Some(date.iso_week().week()),
                )
            }
            None => {
                let m: u32 = r.parse().map_err(|_| bad())?;
                if !(1..=12).contains(&m) {
                    return Err(bad());
                }
                (Some(m), Some((m - 1) / 3 + 1), None)
            }
        },
    };

    let value = match part {
        DatePart::Year => Some(year as u32),
        DatePart::Month => month,
        DatePart::Quarter => quarter,
        DatePart::Week => week,
    };
    Ok(value.map(|v| v.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    // -------------------------------------------------------------------------
    // TRANSFORM TESTS
    // -------------------------------------------------------------------------

    #[test]
    fn test_integer_transform_accepts_zero_fraction() {
        assert_eq!(FieldTransform::Integer.apply("2021.0").unwrap(), "2021");
        assert_eq!(FieldTransform::Integer.apply(" 2021 ").unwrap(), "2021");
        assert!(FieldTransform::Integer.apply("2021.5").is_err());
    }

    #[test]
    fn test_month_name_transform() {
        assert_eq!(FieldTransform::MonthName.apply("September").unwrap(), "9");
        assert_eq!(FieldTransform::MonthName.apply("oct").unwrap(), "10");
        assert!(FieldTransform::MonthName.apply("Smarch").is_err());
    }

    #[test]
    fn test_quarter_label_transform() {
        assert_eq!(FieldTransform::QuarterLabel.apply("2021-Q3").unwrap(), "3");
        assert_eq!(FieldTransform::QuarterLabel.apply("q1").unwrap(), "1");
        assert!(FieldTransform::QuarterLabel.apply("Q5").is_err());
    }

    #[test]
    fn test_substring_and_suffix_transforms() {
        let sub = FieldTransform::Substring { start: 0, len: 4 };
        assert_eq!(sub.apply("2021-03").unwrap(), "2021");
        let strip = FieldTransform::StripSuffix {
            suffix: "%".into(),
        };
        assert_eq!(strip.apply("12.5 %").unwrap(), "12.5");
    }

    // -------------------------------------------------------------------------
    // DATE PART TESTS
    // -------------------------------------------------------------------------

    #[test]
    fn test_date_part_full_date() {
        assert_eq!(date_part("2021-03-15", DatePart::Year).unwrap().as_deref(), Some("2021"));
        assert_eq!(date_part("2021-03-15", DatePart::Month).unwrap().as_deref(), Some("3"));
        assert_eq!(date_part("2021-03-15", DatePart::Quarter).unwrap().as_deref(), Some("1"));
        assert_eq!(date_part("2021-03-15", DatePart::Week).unwrap().as_deref(), Some("11"));
    }

    #[test]
    fn test_date_part_quarter_and_week_labels() {
        assert_eq!(date_part("2021-Q3", DatePart::Quarter).unwrap().as_deref(), Some("3"));
        assert_eq!(date_part("2021-Q3", DatePart::Month).unwrap(), None);
        assert_eq!(date_part("2021-W05", DatePart::Week).unwrap().as_deref(), Some("5"));
    }

    #[test]
    fn test_date_part_rejects_garbage() {
        assert!(date_part("twenty", DatePart::Year).is_err());
        assert!(date_part("2021-13", DatePart::Month).is_err());
    }

    // -------------------------------------------------------------------------
    // FIELD SOURCE TESTS
    // -------------------------------------------------------------------------

    #[test]
    fn test_field_source_from_json() {
        let source: FieldSource = serde_json::from_str(
            r#"{"source": "column", "column": "TIME_PERIOD", "transform": {"kind": "integer"}}"#,
        )
        .unwrap();
        assert_eq!(source.column_name(), Some("TIME_PERIOD"));

        let fixed: FieldSource =
            serde_json::from_str(r#"{"source": "fixed", "value": 2020}"#).unwrap();
        assert_eq!(
            fixed,
            FieldSource::Fixed {
                value: Scalar::Int(2020),
                transform: None
            }
        );
    }

    #[test]
    fn test_field_source_resolves_against_row() {
        let row = RawRow::from_pairs(&[("TIME_PERIOD", "2021.0"), ("DATE", "2019-Q2")]);
        let year = FieldSource::Column {
            column: "TIME_PERIOD".into(),
            transform: Some(FieldTransform::Integer),
        };
        assert_eq!(year.resolve(&row).unwrap().as_deref(), Some("2021"));

        let quarter = FieldSource::Derived {
            from: "DATE".into(),
            part: DatePart::Quarter,
            transform: None,
        };
        assert_eq!(quarter.resolve(&row).unwrap().as_deref(), Some("2"));

        assert_eq!(FieldSource::column("MISSING").resolve(&row).unwrap(), None);
        assert_eq!(FieldSource::fixed("7").resolve(&row).unwrap().as_deref(), Some("7"));
    }
}
