//! Chunked reader for delimited source files.
//!
//! Files are decoded on the fly from their declared encoding to UTF-8, so
//! large extracts are streamed rather than loaded whole. A leading byte-order
//! mark is dropped.

use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use csv::StringRecord;
use encoding_rs::{Encoding, UTF_8};
use encoding_rs_io::{DecodeReaderBytes, DecodeReaderBytesBuilder};

use crate::error::{Error, Result};

/// Column layout of the source header.
#[derive(Debug, Default)]
pub struct HeaderIndex {
    names: Vec<String>,
    index: HashMap<String, usize>,
}

impl HeaderIndex {
    pub fn new(names: Vec<String>) -> Self {
        let index = names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();
        Self { names, index }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn contains(&self, column: &str) -> bool {
        self.index.contains_key(column)
    }
}

/// One source row: a column name to text mapping backed by the csv record.
#[derive(Debug, Clone)]
pub struct RawRow {
    line: u64,
    headers: Arc<HeaderIndex>,
    record: StringRecord,
}

impl RawRow {
    pub fn new(line: u64, headers: Arc<HeaderIndex>, record: StringRecord) -> Self {
        Self {
            line,
            headers,
            record,
        }
    }

    /// Build a row from (column, value) pairs.
    pub fn from_pairs(pairs: &[(&str, &str)]) -> Self {
        let headers = HeaderIndex::new(pairs.iter().map(|(k, _)| k.to_string()).collect());
        let record = StringRecord::from(pairs.iter().map(|(_, v)| *v).collect::<Vec<_>>());
        Self::new(2, Arc::new(headers), record)
    }

    pub fn get(&self, column: &str) -> Option<&str> {
        let i = *self.headers.index.get(column)?;
        self.record.get(i)
    }

    /// 1-based line number in the source file.
    pub fn line(&self) -> u64 {
        self.line
    }
}

/// Resolve an encoding label. `utf-8-sig` is accepted as UTF-8.
pub fn resolve_encoding(label: &str) -> Result<&'static Encoding> {
    let normalized = label.trim().to_lowercase();
    if normalized == "utf-8-sig" || normalized == "utf8" {
        return Ok(UTF_8);
    }
    Encoding::for_label(normalized.as_bytes())
        .ok_or_else(|| Error::UnknownEncoding(label.to_string()))
}

// =============================================================================
// Decoding
// =============================================================================

/// Largest row vector preallocated for one chunk.
const CHUNK_PREALLOC: usize = 32 * 1024;

/// Wrap `inner` so reads yield UTF-8 transcoded from `encoding`, BOM removed.
pub fn decoding_reader<R: Read>(inner: R, encoding: &'static Encoding) -> DecodeReaderBytes<R, Vec<u8>> {
    DecodeReaderBytesBuilder::new()
        .encoding(Some(encoding))
        .strip_bom(true)
        .build(inner)
}

// =============================================================================
// Source reader
// =============================================================================

type Inner = csv::Reader<DecodeReaderBytes<File, Vec<u8>>>;

/// Streams a source file in fixed-size chunks of rows.
pub struct SourceReader {
    path: PathBuf,
    inner: Inner,
    headers: Arc<HeaderIndex>,
}

fn open_csv(path: &Path, delimiter: u8, encoding: &'static Encoding) -> Result<Inner> {
    let file = File::open(path).map_err(|source| Error::ReadFile {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(decoding_reader(file, encoding)))
}

impl SourceReader {
    pub fn open(path: &Path, delimiter: u8, encoding: &'static Encoding) -> Result<Self> {
        let mut inner = open_csv(path, delimiter, encoding)?;
        let names = inner
            .headers()?
            .iter()
            .enumerate()
            .map(|(i, h)| {
                if i == 0 {
                    h.trim_start_matches('\u{feff}').to_string()
                } else {
                    h.to_string()
                }
            })
            .collect();
        Ok(Self {
            path: path.to_path_buf(),
            inner,
            headers: Arc::new(HeaderIndex::new(names)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn headers(&self) -> &HeaderIndex {
        &self.headers
    }

    /// Fail when any of `columns` is absent from the header.
    pub fn require_columns<'a>(&self, columns: impl IntoIterator<Item = &'a str>) -> Result<()> {
        let mut missing: Vec<String> = columns
            .into_iter()
            .filter(|c| !self.headers.contains(c))
            .map(str::to_string)
            .collect();
        if missing.is_empty() {
            return Ok(());
        }
        missing.sort();
        missing.dedup();
        Err(Error::MissingColumns(missing))
    }

    /// Read up to `max_rows` rows. `None` at end of input.
    pub fn next_chunk(&mut self, max_rows: usize) -> Result<Option<Vec<RawRow>>> {
        let mut rows = Vec::with_capacity(max_rows.min(CHUNK_PREALLOC));
        let mut record = StringRecord::new();
        while rows.len() < max_rows && self.inner.read_record(&mut record)? {
            let line = record.position().map(|p| p.line()).unwrap_or_default();
            rows.push(RawRow::new(line, Arc::clone(&self.headers), record.clone()));
        }
        Ok((!rows.is_empty()).then_some(rows))
    }
}

/// Number of data rows (header excluded).
pub fn count_rows(path: &Path, delimiter: u8, encoding: &'static Encoding) -> Result<u64> {
    let mut inner = open_csv(path, delimiter, encoding)?;
    let mut record = StringRecord::new();
    let mut count = 0;
    while inner.read_record(&mut record)? {
        count += 1;
    }
    Ok(count)
}
