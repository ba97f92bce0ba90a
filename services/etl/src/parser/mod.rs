//! Row parser: turns one source row into a structured record.
//!
//! Responsibilities:
//! - Drop rows without a value or a country
//! - Apply the configured strategy to every attribute column
//! - Build the period from the descriptor and merge complex-parser fragments
//!
//! Custom-parser failures are logged at error level and skip the attribute,
//! unless the descriptor disables `skip_invalid_rows`. Complex columns drop
//! unreadable segments at debug level and keep the rest of the cell.

pub mod period;
pub mod strategy;
pub mod transform;

use std::sync::Arc;

use tracing::{error, warn};

use crate::descriptor::SourceDescriptor;
use crate::error::Error;
use crate::model::ParsedAttribute;
use crate::reader::RawRow;
use period::PeriodData;

/// Structured form of one source row.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    pub line: u64,
    pub country: String,
    pub city: Option<String>,
    pub raw_value: String,
    pub attributes: Vec<ParsedAttribute>,
    pub period: PeriodData,
}

/// A row that cannot be turned into a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowError {
    pub line: u64,
    pub reason: String,
}

impl From<RowError> for Error {
    fn from(err: RowError) -> Self {
        Error::InvalidRow {
            line: err.line,
            reason: err.reason,
        }
    }
}

/// Side counters collected while parsing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParseTally {
    pub attribute_errors: usize,
    pub period_conflicts: usize,
}

/// Result of parsing one chunk of rows.
#[derive(Debug, Default)]
pub struct ParsedChunk {
    pub records: Vec<RawRecord>,
    pub rows: usize,
    pub dropped: usize,
    pub invalid: usize,
    pub tally: ParseTally,
}

pub struct RowParser {
    descriptor: Arc<SourceDescriptor>,
    strict: bool,
}

fn cell<'a>(row: &'a RawRow, column: &str) -> Option<&'a str> {
    row.get(column).map(str::trim).filter(|s| !s.is_empty())
}

impl RowParser {
    pub fn new(descriptor: Arc<SourceDescriptor>) -> Self {
        let strict = !descriptor.skip_invalid_rows;
        Self { descriptor, strict }
    }

    /// Parse one row. `Ok(None)` means the row carries no value or no country.
    pub fn parse_row(
        &self,
        row: &RawRow,
        tally: &mut ParseTally,
    ) -> Result<Option<RawRecord>, RowError> {
        let d = &self.descriptor;
        let line = row.line();
        let row_error = |reason: String| RowError { line, reason };

        let Some(value) = cell(row, &d.value_column) else {
            return Ok(None);
        };
        let Some(country) = cell(row, &d.country_column) else {
            return Ok(None);
        };
        let raw_value = match &d.value_transform {
            Some(transform) => transform
                .apply(value)
                .map_err(|e| row_error(format!("value: {}", e)))?,
            None => value.to_string(),
        };
        let city = d
            .city_column
            .as_deref()
            .and_then(|c| cell(row, c))
            .map(str::to_string);

        let mut period = d
            .period
            .build(row)
            .map_err(|e| row_error(format!("period: {}", e)))?;

        let mut attributes = Vec::with_capacity(d.attributes.len());
        for column in &d.attributes {
            let text = row.get(&column.column).unwrap_or_default();
            match column.parse(text) {
                Ok(out) => {
                    attributes.extend(out.attributes);
                    if let Some(fragment) = out.period {
                        for conflict in period.absorb(&fragment) {
                            tally.period_conflicts += 1;
                            warn!(
                                line,
                                column = %column.column,
                                field = %conflict.field,
                                kept = %conflict.kept,
                                ignored = %conflict.ignored,
                                "period conflict, descriptor value kept"
                            );
                        }
                    }
                }
                Err(e) => {
                    // complex columns skip bad segments themselves and never fail
                    tally.attribute_errors += 1;
                    error!(
                        line,
                        column = %column.column,
                        error = %e,
                        "attribute parser failed, attribute skipped"
                    );
                    if self.strict {
                        return Err(row_error(format!("column '{}': {}", column.column, e)));
                    }
                }
            }
        }

        if period.period_type.requires_year() && period.year.is_none() {
            return Err(row_error(format!(
                "{} period has no year",
                period.period_type.as_str()
            )));
        }

        Ok(Some(RawRecord {
            line,
            country: country.to_string(),
            city,
            raw_value,
            attributes,
            period,
        }))
    }

    /// Parse a chunk of rows in source order.
    pub fn parse_chunk(&self, rows: &[RawRow]) -> Result<ParsedChunk, Error> {
        let mut chunk = ParsedChunk {
            rows: rows.len(),
            ..Default::default()
        };
        for row in rows {
            match self.parse_row(row, &mut chunk.tally) {
                Ok(Some(record)) => chunk.records.push(record),
                Ok(None) => chunk.dropped += 1,
                Err(e) if self.strict => return Err(e.into()),
                Err(e) => {
                    warn!(line = e.line, reason = %e.reason, "invalid row skipped");
                    chunk.invalid += 1;
                }
            }
        }
        Ok(chunk)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::period::PeriodType;

    fn descriptor(extra: &str) -> Arc<SourceDescriptor> {
        let json = format!(
            r#"{{
                "name": "test",
                "source": {{ "path": "unused.csv" }},
                "metric": {{ "slug": "employment-rate", "name": "Employment rate", "data_kind": "numeric" }},
                "value_column": "value",
                "country_column": "country",
                "attributes": [
                    {{ "column": "sex", "strategy": "custom", "parser": {{ "kind": "sex_label" }} }},
                    {{ "column": "notes", "strategy": "complex", "parser": {{ "kind": "labelled_segments" }} }}
                ],
                "period": {{ "year": {{ "source": "column", "column": "year" }} }}
                {}
            }}"#,
            extra
        );
        Arc::new(SourceDescriptor::from_json(&json).unwrap())
    }

    fn parse(parser: &RowParser, pairs: &[(&str, &str)]) -> Result<Option<RawRecord>, RowError> {
        parser.parse_row(&RawRow::from_pairs(pairs), &mut ParseTally::default())
    }

    // -------------------------------------------------------------------------
    // BASIC PARSING TESTS
    // -------------------------------------------------------------------------

    #[test]
    fn test_parse_korea_row() {
        let parser = RowParser::new(descriptor(""));
        let record = parse(
            &parser,
            &[("country", "Korea"), ("value", "12.5"), ("sex", "Male"), ("year", "2021")],
        )
        .unwrap()
        .unwrap();
        assert_eq!(record.country, "Korea");
        assert_eq!(record.raw_value, "12.5");
        assert_eq!(record.attributes.len(), 1);
        assert_eq!(record.attributes[0].attr_type.code, "Sex");
        assert_eq!(record.attributes[0].value.code, "Male");
        assert_eq!(record.period.period_type, PeriodType::Yearly);
        assert_eq!(record.period.year, Some(2021));
    }

    #[test]
    fn test_missing_value_or_country_drops_row() {
        let parser = RowParser::new(descriptor(""));
        assert_eq!(parse(&parser, &[("country", "Korea"), ("value", " "), ("year", "2021")]), Ok(None));
        assert_eq!(parse(&parser, &[("country", ""), ("value", "1"), ("year", "2021")]), Ok(None));
    }

    #[test]
    fn test_value_transform_applied() {
        let parser = RowParser::new(descriptor(
            r#", "value_transform": { "kind": "strip_suffix", "suffix": "%" }"#,
        ));
        let record = parse(&parser, &[("country", "Chile"), ("value", "7.1%"), ("year", "2020")])
            .unwrap()
            .unwrap();
        assert_eq!(record.raw_value, "7.1");
    }

    // -------------------------------------------------------------------------
    // STRATEGY FAILURE TESTS
    // -------------------------------------------------------------------------

    #[test]
    fn test_failing_custom_parser_skips_attribute() {
        let parser = RowParser::new(descriptor(""));
        let mut tally = ParseTally::default();
        let row = RawRow::from_pairs(&[
            ("country", "Chile"),
            ("value", "1"),
            ("sex", "Unknown"),
            ("year", "2020"),
        ]);
        let record = parser.parse_row(&row, &mut tally).unwrap().unwrap();
        assert!(record.attributes.is_empty());
        assert_eq!(tally.attribute_errors, 1);
    }

    #[test]
    fn test_unlabelled_complex_segment_keeps_rest_of_cell() {
        let parser = RowParser::new(descriptor(""));
        let mut tally = ParseTally::default();
        let row = RawRow::from_pairs(&[
            ("country", "Chile"),
            ("value", "1"),
            ("sex", "Female"),
            ("notes", "no label | Currency: Euro"),
            ("year", "2020"),
        ]);
        let record = parser.parse_row(&row, &mut tally).unwrap().unwrap();
        assert_eq!(record.attributes.len(), 2);
        assert_eq!(record.attributes[1].value.code, "Euro");
        assert_eq!(tally.attribute_errors, 0);
    }

    #[test]
    fn test_strict_mode_turns_parser_failure_into_row_error() {
        let parser = RowParser::new(descriptor(r#", "skip_invalid_rows": false"#));
        let err = parse(
            &parser,
            &[("country", "Chile"), ("value", "1"), ("sex", "Unknown"), ("year", "2020")],
        )
        .unwrap_err();
        assert_eq!(err.line, 2);
        assert!(err.reason.contains("sex"));
    }

    // -------------------------------------------------------------------------
    // PERIOD MERGE TESTS
    // -------------------------------------------------------------------------

    #[test]
    fn test_descriptor_year_beats_complex_fragment() {
        let parser = RowParser::new(descriptor(""));
        let mut tally = ParseTally::default();
        let row = RawRow::from_pairs(&[
            ("country", "Chile"),
            ("value", "1"),
            ("notes", "Data reference period: 2019"),
            ("year", "2020"),
        ]);
        let record = parser.parse_row(&row, &mut tally).unwrap().unwrap();
        assert_eq!(record.period.year, Some(2020));
        assert_eq!(tally.period_conflicts, 1);
    }

    #[test]
    fn test_complex_fragment_fills_month() {
        let parser = RowParser::new(descriptor(""));
        let record = parse(
            &parser,
            &[
                ("country", "Chile"),
                ("value", "1"),
                ("notes", "Currency: Euro | Data reference period: October"),
                ("year", "2020"),
            ],
        )
        .unwrap()
        .unwrap();
        assert_eq!(record.period.month, Some(10));
        assert_eq!(record.attributes[0].attr_type.code, "Currency");
    }

    #[test]
    fn test_missing_year_is_row_error() {
        let parser = RowParser::new(descriptor(""));
        let err = parse(&parser, &[("country", "Chile"), ("value", "1"), ("year", "")]).unwrap_err();
        assert!(err.reason.contains("no year"));
    }

    // -------------------------------------------------------------------------
    // CHUNK TESTS
    // -------------------------------------------------------------------------

    #[test]
    fn test_parse_chunk_counts() {
        let parser = RowParser::new(descriptor(""));
        let rows = vec![
            RawRow::from_pairs(&[("country", "Chile"), ("value", "1"), ("year", "2020")]),
            RawRow::from_pairs(&[("country", "Chile"), ("value", ""), ("year", "2020")]),
            RawRow::from_pairs(&[("country", "Chile"), ("value", "2"), ("year", "x")]),
        ];
        let chunk = parser.parse_chunk(&rows).unwrap();
        assert_eq!(chunk.rows, 3);
        assert_eq!(chunk.records.len(), 1);
        assert_eq!(chunk.dropped, 1);
        assert_eq!(chunk.invalid, 1);
    }

    #[test]
    fn test_parse_chunk_strict_aborts() {
        let parser = RowParser::new(descriptor(r#", "skip_invalid_rows": false"#));
        let rows = vec![RawRow::from_pairs(&[("country", "Chile"), ("value", "2"), ("year", "x")])];
        assert!(matches!(
            parser.parse_chunk(&rows),
            Err(Error::InvalidRow { line: 2, .. })
        ));
    }
}
