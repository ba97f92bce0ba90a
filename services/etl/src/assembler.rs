//! Assembler: resolved ids + parsed records → fact rows.

use std::str::FromStr;

use rust_decimal::Decimal;
use tracing::warn;

use crate::descriptor::{GeographyLevel, SourceDescriptor};
use crate::error::{Error, Result};
use crate::model::{DataKind, FactRow, FactValue};
use crate::parser::RawRecord;
use crate::resolver::ResolvedBatch;

const TRUTHY: [&str; 9] = ["true", "yes", "1", "да", "sí", "si", "y", "t", "on"];
const FALSY: [&str; 4] = ["false", "no", "0", "нет"];

/// Convert a raw cell into the value of a metric of `kind`.
///
/// `None` means the text does not represent a value of that kind.
pub fn convert_value(kind: DataKind, raw: &str) -> Option<FactValue> {
    match kind {
        DataKind::Numeric => parse_decimal(raw).map(FactValue::Numeric),
        DataKind::String => {
            let text = raw.trim();
            (!text.is_empty()).then(|| FactValue::Text(text.to_string()))
        }
        DataKind::Boolean => parse_bool(raw).map(FactValue::Boolean),
        DataKind::Range => parse_range(raw),
    }
}

/// Parse a number written with locale separators.
///
/// Spaces, underscores and apostrophes are thousands separators. When both
/// `,` and `.` occur, the last one is the decimal separator; a lone `,` is a
/// decimal comma; a repeated separator is a thousands separator.
pub fn parse_decimal(raw: &str) -> Option<Decimal> {
    let mut text: String = raw
        .chars()
        .filter(|c| !c.is_whitespace() && !matches!(c, '_' | '\''))
        .collect();
    if text.is_empty() {
        return None;
    }

    let commas = text.matches(',').count();
    let dots = text.matches('.').count();
    if commas > 0 && dots > 0 {
        let (decimal, thousands) = if text.rfind(',') > text.rfind('.') {
            (',', '.')
        } else {
            ('.', ',')
        };
        text = text.replace(thousands, "").replace(decimal, ".");
    } else if commas == 1 {
        text = text.replace(',', ".");
    } else if commas > 1 {
        text = text.replace(',', "");
    } else if dots > 1 {
        text = text.replace('.', "");
    }

    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .ok()
}

pub fn parse_bool(raw: &str) -> Option<bool> {
    let token = raw.trim().to_lowercase();
    if TRUTHY.contains(&token.as_str()) {
        Some(true)
    } else if FALSY.contains(&token.as_str()) {
        Some(false)
    } else {
        None
    }
}

/// Split "a-b" into two numeric bounds. A leading minus belongs to the lower
/// bound, so "-5-10" is (-5, 10).
pub fn parse_range(raw: &str) -> Option<FactValue> {
    let text = raw.trim();
    let split = text.char_indices().find(|(i, c)| {
        *i > 0
            && matches!(c, '-' | '–')
            && text[..*i].trim_end().ends_with(|p: char| p.is_ascii_digit())
    })?;
    let (start, end) = (&text[..split.0], &text[split.0 + split.1.len_utf8()..]);
    Some(FactValue::Range {
        start: parse_decimal(start)?,
        end: parse_decimal(end)?,
    })
}

/// Fact rows of one batch plus what was left out.
#[derive(Debug, Default)]
pub struct Assembly {
    pub facts: Vec<FactRow>,
    /// Records whose country was skipped by the resolver.
    pub skipped: usize,
    /// Records without a series/period id or a convertible value.
    pub dropped: usize,
    /// Facts left out because their city did not resolve.
    pub unresolved_cities: usize,
}

pub struct Assembler {
    data_kind: DataKind,
    geography: GeographyLevel,
    strict: bool,
}

impl Assembler {
    pub fn new(descriptor: &SourceDescriptor, data_kind: DataKind) -> Self {
        Self {
            data_kind,
            geography: descriptor.geography_level,
            strict: !descriptor.skip_invalid_rows,
        }
    }

    pub fn assemble(&self, records: &[RawRecord], resolved: &ResolvedBatch) -> Result<Assembly> {
        let mut out = Assembly::default();

        for (index, record) in records.iter().enumerate() {
            let Some(country_ids) = resolved.countries.get(&record.country) else {
                out.skipped += 1;
                continue;
            };

            let series_id = resolved
                .series_hashes
                .get(index)
                .and_then(Option::as_ref)
                .and_then(|hash| resolved.series.get(hash));
            let Some(&series_id) = series_id else {
                warn!(line = record.line, "no series resolved, record dropped");
                out.dropped += 1;
                continue;
            };

            let key = record.period.key();
            let Some(&period_id) = resolved.periods.get(&key) else {
                warn!(line = record.line, period = %key, "no period resolved, record dropped");
                out.dropped += 1;
                continue;
            };

            let Some(value) = convert_value(self.data_kind, &record.raw_value) else {
                if self.strict {
                    return Err(Error::InvalidValue {
                        line: record.line,
                        raw: record.raw_value.clone(),
                        kind: self.data_kind.as_str(),
                    });
                }
                warn!(
                    line = record.line,
                    raw = %record.raw_value,
                    kind = self.data_kind.as_str(),
                    "value not convertible, record dropped"
                );
                out.dropped += 1;
                continue;
            };

            for &country_id in country_ids {
                let city_id = match (&record.city, self.geography) {
                    (Some(city), GeographyLevel::City) => {
                        match resolved.cities.get(&(country_id, city.clone())) {
                            Some(id) => Some(*id),
                            None => {
                                out.unresolved_cities += 1;
                                continue;
                            }
                        }
                    }
                    _ => None,
                };
                out.facts.push(FactRow {
                    series_id,
                    period_id,
                    country_id,
                    city_id,
                    value: value.clone(),
                });
            }
        }
        Ok(out)
    }
}
