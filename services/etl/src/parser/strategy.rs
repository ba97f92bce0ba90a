//! Attribute column strategies.
//!
//! Every strategy is a pure function of the cell text, so parsing can be
//! exercised without a resolver or storage.

use std::collections::BTreeMap;

use serde::Deserialize;
use tracing::debug;

use super::period::PeriodFragment;
use super::transform::month_number;
use crate::error::ParseError;
use crate::model::{
    AttributeTypeSpec, AttributeValueKind, AttributeValueSpec, ParsedAttribute, MAX_LABEL_LEN,
};

/// One configured attribute column.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AttributeColumn {
    pub column: String,
    #[serde(flatten)]
    pub strategy: AttributeStrategy,
    #[serde(default)]
    pub defaults: AttributeDefaults,
}

/// Defaults applied to attributes produced by a fixed-type column.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct AttributeDefaults {
    #[serde(default)]
    pub value_kind: AttributeValueKind,
    #[serde(default)]
    pub type_is_filtered: bool,
    #[serde(default)]
    pub value_is_filtered: bool,
    #[serde(default)]
    pub sort_order: i32,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum AttributeStrategy {
    /// Type comes from configuration, value is the cell verbatim.
    FixedType {
        type_code: String,
        #[serde(default)]
        type_name: Option<String>,
    },
    /// The cell maps to exactly one (type, value) pair.
    Custom { parser: CustomParser },
    /// The cell packs several attributes and period fragments.
    Complex { parser: ComplexParser },
}

/// Attributes and period fragment extracted from one cell.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ColumnOutput {
    pub attributes: Vec<ParsedAttribute>,
    pub period: Option<PeriodFragment>,
}

impl AttributeColumn {
    pub fn fixed(column: &str, type_code: &str) -> Self {
        Self {
            column: column.to_string(),
            strategy: AttributeStrategy::FixedType {
                type_code: type_code.to_string(),
                type_name: None,
            },
            defaults: AttributeDefaults::default(),
        }
    }

    /// Parse one cell. Empty cells produce no attributes.
    pub fn parse(&self, cell: &str) -> Result<ColumnOutput, ParseError> {
        let cell = cell.trim();
        if cell.is_empty() {
            return Ok(ColumnOutput::default());
        }
        match &self.strategy {
            AttributeStrategy::FixedType {
                type_code,
                type_name,
            } => {
                let attr = ParsedAttribute {
                    attr_type: AttributeTypeSpec {
                        code: type_code.clone(),
                        name: type_name.clone().unwrap_or_else(|| type_code.clone()),
                        value_kind: self.defaults.value_kind,
                        is_filtered: self.defaults.type_is_filtered,
                        sort_order: self.defaults.sort_order,
                    },
                    value: AttributeValueSpec {
                        code: cell.to_string(),
                        name: cell.to_string(),
                        is_filtered: self.defaults.value_is_filtered,
                        sort_order: 0,
                        meta: None,
                    },
                };
                Ok(ColumnOutput {
                    attributes: vec![bounded(attr)],
                    period: None,
                })
            }
            AttributeStrategy::Custom { parser } => Ok(ColumnOutput {
                attributes: vec![bounded(parser.parse(cell)?)],
                period: None,
            }),
            AttributeStrategy::Complex { parser } => {
                let mut out = parser.parse(cell);
                out.attributes = out.attributes.into_iter().map(bounded).collect();
                Ok(out)
            }
        }
    }
}

/// Truncate over-long codes and names, keeping the full code in metadata.
fn bounded(mut attr: ParsedAttribute) -> ParsedAttribute {
    if attr.value.code.chars().count() > MAX_LABEL_LEN {
        attr.value.meta = Some(serde_json::json!({ "code": attr.value.code }));
        attr.value.code = truncate(&attr.value.code);
    }
    attr.value.name = truncate(&attr.value.name);
    attr.attr_type.code = truncate(&attr.attr_type.code);
    attr.attr_type.name = truncate(&attr.attr_type.name);
    attr
}

fn truncate(text: &str) -> String {
    text.chars().take(MAX_LABEL_LEN).collect()
}

// =============================================================================
// Custom parsers
// =============================================================================

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CustomParser {
    /// Total/Male/Female/Other to localized labels.
    SexLabel,
    /// "Type: Value" split on the first colon.
    LabelledPair {
        #[serde(default)]
        is_filtered: bool,
    },
    /// Explicit mapping from cell text to value name.
    Vocabulary {
        type_code: String,
        #[serde(default)]
        type_name: Option<String>,
        values: BTreeMap<String, String>,
        #[serde(default)]
        is_filtered: bool,
    },
}

const SEX_LABELS: [(&str, &str); 4] = [
    ("Total", "Общий"),
    ("Male", "Мужской"),
    ("Female", "Женский"),
    ("Other", "Другое"),
];

impl CustomParser {
    pub fn parse(&self, text: &str) -> Result<ParsedAttribute, ParseError> {
        match self {
            CustomParser::SexLabel => {
                let (code, label) = SEX_LABELS
                    .iter()
                    .find(|(code, _)| code.eq_ignore_ascii_case(text))
                    .ok_or_else(|| ParseError::UnknownLabel {
                        vocabulary: "sex".to_string(),
                        value: text.to_string(),
                    })?;
                let mut attr = ParsedAttribute::labelled("Sex", code, true);
                attr.attr_type.name = "Пол".to_string();
                attr.value.name = label.to_string();
                Ok(attr)
            }
            CustomParser::LabelledPair { is_filtered } => {
                let (label, value) = split_label(text)
                    .ok_or_else(|| ParseError::MissingLabel(text.to_string()))?;
                Ok(ParsedAttribute::labelled(label, value, *is_filtered))
            }
            CustomParser::Vocabulary {
                type_code,
                type_name,
                values,
                is_filtered,
            } => {
                let name = values.get(text).ok_or_else(|| ParseError::UnknownLabel {
                    vocabulary: type_code.clone(),
                    value: text.to_string(),
                })?;
                let mut attr = ParsedAttribute::labelled(type_code, text, *is_filtered);
                if let Some(type_name) = type_name {
                    attr.attr_type.name = type_name.clone();
                }
                attr.value.name = name.clone();
                Ok(attr)
            }
        }
    }
}

fn split_label(text: &str) -> Option<(&str, &str)> {
    let (label, value) = text.split_once(':')?;
    let (label, value) = (label.trim(), value.trim());
    (!label.is_empty() && !value.is_empty()).then_some((label, value))
}

// =============================================================================
// Complex parsers
// =============================================================================

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ComplexParser {
    LabelledSegments(SegmentRules),
}

impl ComplexParser {
    /// Segments that cannot be interpreted are skipped, never the whole cell.
    pub fn parse(&self, text: &str) -> ColumnOutput {
        match self {
            ComplexParser::LabelledSegments(rules) => rules.parse(text),
        }
    }
}

/// Classification rules for "Label: value | Label: value" cells.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SegmentRules {
    pub separator: String,
    pub attribute_labels: Vec<String>,
    pub filtered_labels: Vec<String>,
    pub status_markers: Vec<String>,
    pub period_label: Option<String>,
}

impl Default for SegmentRules {
    fn default() -> Self {
        let owned = |items: &[&str]| items.iter().map(|s| s.to_string()).collect();
        Self {
            separator: " | ".to_string(),
            attribute_labels: owned(&[
                "Job coverage",
                "Working time concept",
                "Type of working time",
                "Sector coverage",
                "Establishment size",
                "Age coverage",
            ]),
            filtered_labels: owned(&["Currency"]),
            status_markers: owned(&["Break in series", "Unreliable", "Not significant"]),
            period_label: Some("Data reference period".to_string()),
        }
    }
}

impl SegmentRules {
    fn parse(&self, text: &str) -> ColumnOutput {
        let mut out = ColumnOutput::default();
        for segment in text.split(self.separator.as_str()).map(str::trim) {
            if segment.is_empty() {
                continue;
            }

            if let Some(marker) = self
                .status_markers
                .iter()
                .find(|m| m.eq_ignore_ascii_case(segment))
            {
                out.attributes
                    .push(ParsedAttribute::labelled("Status", marker, true));
                continue;
            }

            let Some((label, value)) = split_label(segment) else {
                debug!(segment, "unlabelled segment skipped");
                continue;
            };

            if self.period_label.as_deref() == Some(label) {
                match reference_period(value) {
                    Ok(fragment) => out.period = Some(fragment),
                    Err(e) => debug!(segment, error = %e, "reference period skipped"),
                }
            } else if self.filtered_labels.iter().any(|l| l == label) {
                out.attributes
                    .push(ParsedAttribute::labelled(label, value, true));
            } else if self.attribute_labels.iter().any(|l| l == label) {
                out.attributes
                    .push(ParsedAttribute::labelled(label, value, false));
            } else {
                debug!(segment, "unrecognised label skipped");
            }
        }
        out
    }
}

const ORDINALS: [&str; 4] = ["first", "second", "third", "fourth"];

/// Interpret a reference-period label.
fn reference_period(text: &str) -> Result<PeriodFragment, ParseError> {
    let lower = text.trim().to_lowercase();
    let mut fragment = PeriodFragment::default();

    if let Some(month) = month_number(&lower).filter(|_| lower.parse::<u32>().is_err()) {
        fragment.month = Some(month as i32);
    } else if let Ok(year) = lower.parse::<i32>() {
        if !(1000..=9999).contains(&year) {
            return Err(ParseError::InvalidField {
                field: "year",
                value: text.to_string(),
            });
        }
        fragment.year = Some(year);
    } else if let Some(ordinal) = lower.strip_suffix(" semester") {
        let semester = ORDINALS[..2]
            .iter()
            .position(|o| *o == ordinal)
            .ok_or_else(|| unknown_period(text))?;
        fragment.month = Some(if semester == 0 { 6 } else { 12 });
        fragment.meta = Some(serde_json::json!({ "semester": semester + 1 }));
    } else if let Some(ordinal) = lower.strip_suffix(" quarter") {
        let quarter = ORDINALS
            .iter()
            .position(|o| *o == ordinal)
            .ok_or_else(|| unknown_period(text))?;
        fragment.quarter = Some(quarter as i32 + 1);
    } else if lower == "end of the year" {
        fragment.month = Some(12);
    } else if lower == "noncalendar year" {
        fragment.meta = Some(serde_json::json!({ "noncalendar_year": true }));
    } else {
        return Err(unknown_period(text));
    }
    Ok(fragment)
}

fn unknown_period(text: &str) -> ParseError {
    ParseError::UnknownLabel {
        vocabulary: "reference period".to_string(),
        value: text.to_string(),
    }
}
