//! Streamed CSV sources read in fixed-size chunks.

use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime};
use csv::{ReaderBuilder, StringRecord, Trim};

use crate::coerce;
use crate::{ParseWarning, SourceError, SourceKind};

/// Header name to column index.
#[derive(Debug, Default)]
struct Columns(HashMap<String, usize>);

impl Columns {
    fn from_headers(headers: &StringRecord) -> Self {
        let mut map = HashMap::with_capacity(headers.len());
        for (idx, name) in headers.iter().enumerate() {
            map.entry(name.trim().to_string()).or_insert(idx);
        }
        Self(map)
    }
}

pub struct CsvSource {
    kind: SourceKind,
    path: PathBuf,
    reader: csv::Reader<File>,
    columns: Arc<Columns>,
    rows_read: u64,
    record: StringRecord,
}

impl CsvSource {
    pub fn open(kind: SourceKind, path: &Path) -> Result<Self, SourceError> {
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(Trim::All)
            .from_path(path)
            .map_err(|source| SourceError::Csv {
                path: path.to_path_buf(),
                source,
            })?;
        let headers = reader.headers().map_err(|source| SourceError::Csv {
            path: path.to_path_buf(),
            source,
        })?;
        let columns = Arc::new(Columns::from_headers(headers));
        Ok(Self {
            kind,
            path: path.to_path_buf(),
            reader,
            columns,
            rows_read: 0,
            record: StringRecord::new(),
        })
    }

    pub fn kind(&self) -> SourceKind {
        self.kind
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.0.contains_key(name)
    }

    pub fn rows_read(&self) -> u64 {
        self.rows_read
    }

    /// Reads up to `size` rows. An empty chunk means the file is exhausted.
    pub fn next_chunk(&mut self, size: usize) -> Result<RowChunk, SourceError> {
        let size = size.max(1);
        let mut rows = Vec::with_capacity(size.min(8192));
        while rows.len() < size {
            let more = self
                .reader
                .read_record(&mut self.record)
                .map_err(|source| SourceError::Csv {
                    path: self.path.clone(),
                    source,
                })?;
            if !more {
                break;
            }
            self.rows_read += 1;
            // header is line 1
            rows.push((self.rows_read + 1, self.record.clone()));
        }
        Ok(RowChunk {
            kind: self.kind,
            columns: Arc::clone(&self.columns),
            rows,
        })
    }
}

pub struct RowChunk {
    kind: SourceKind,
    columns: Arc<Columns>,
    rows: Vec<(u64, StringRecord)>,
}

impl RowChunk {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = SourceRow<'_>> {
        self.rows.iter().map(|(line, record)| SourceRow {
            kind: self.kind,
            line: *line,
            columns: &self.columns,
            record,
        })
    }
}

/// One CSV row with typed accessors by column name.
#[derive(Clone, Copy)]
pub struct SourceRow<'a> {
    kind: SourceKind,
    line: u64,
    columns: &'a Columns,
    record: &'a StringRecord,
}

impl<'a> SourceRow<'a> {
    pub fn kind(&self) -> SourceKind {
        self.kind
    }

    pub fn line(&self) -> u64 {
        self.line
    }

    /// Cell text as written; empty when the column is absent or the row is short.
    pub fn raw(&self, column: &str) -> &'a str {
        self.columns
            .0
            .get(column)
            .and_then(|idx| self.record.get(*idx))
            .unwrap_or("")
    }

    /// Cell text, `None` for null tokens.
    pub fn text(&self, column: &str) -> Option<&'a str> {
        coerce::clean(self.raw(column))
    }

    pub fn invalid(&self, column: &str, reason: impl Into<String>) -> SourceError {
        SourceError::InvalidCell {
            file: self.kind.file_name(),
            line: self.line,
            column: column.to_string(),
            value: self.raw(column).to_string(),
            reason: reason.into(),
        }
    }

    fn warn(&self, column: &str, reason: String, warnings: &mut Vec<ParseWarning>) {
        let warning = ParseWarning {
            source: self.kind,
            line: self.line,
            column: column.to_string(),
            value: self.raw(column).to_string(),
            reason,
        };
        tracing::warn!(%warning, "coerced cell to null");
        warnings.push(warning);
    }

    /// Integer that must be present, such as a surrogate id.
    pub fn required_i64(&self, column: &str) -> Result<i64, SourceError> {
        match coerce::parse_i64(self.raw(column)) {
            Ok(Some(value)) => Ok(value),
            Ok(None) => Err(self.invalid(column, "is required")),
            Err(reason) => Err(self.invalid(column, reason)),
        }
    }

    pub fn required_text(&self, column: &str) -> Result<&'a str, SourceError> {
        self.text(column)
            .ok_or_else(|| self.invalid(column, "is required"))
    }

    pub fn optional_i64(&self, column: &str, warnings: &mut Vec<ParseWarning>) -> Option<i64> {
        coerce::parse_i64(self.raw(column)).unwrap_or_else(|reason| {
            self.warn(column, reason, warnings);
            None
        })
    }

    pub fn optional_f64(&self, column: &str, warnings: &mut Vec<ParseWarning>) -> Option<f64> {
        coerce::parse_f64(self.raw(column)).unwrap_or_else(|reason| {
            self.warn(column, reason, warnings);
            None
        })
    }

    pub fn optional_date(
        &self,
        column: &str,
        warnings: &mut Vec<ParseWarning>,
    ) -> Option<NaiveDate> {
        coerce::parse_date(self.raw(column)).unwrap_or_else(|reason| {
            self.warn(column, reason, warnings);
            None
        })
    }

    pub fn optional_timestamp(
        &self,
        column: &str,
        warnings: &mut Vec<ParseWarning>,
    ) -> Option<NaiveDateTime> {
        coerce::parse_timestamp(self.raw(column)).unwrap_or_else(|reason| {
            self.warn(column, reason, warnings);
            None
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn write_source(body: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("measurements.csv");
        fs::write(&path, body).expect("write");
        (dir, path)
    }

    #[test]
    fn chunks_are_bounded_and_lines_are_numbered() {
        let (_dir, path) = write_source(
            "record_code,measurement_value\n1,2.5\n2,3.5\n3,4.5\n",
        );
        let mut source = CsvSource::open(SourceKind::Measurements, &path).expect("open");

        let first = source.next_chunk(2).expect("chunk");
        assert_eq!(first.len(), 2);
        let lines: Vec<u64> = first.iter().map(|row| row.line()).collect();
        assert_eq!(lines, vec![2, 3]);

        let second = source.next_chunk(2).expect("chunk");
        assert_eq!(second.len(), 1);
        assert!(source.next_chunk(2).expect("chunk").is_empty());
        assert_eq!(source.rows_read(), 3);
    }

    #[test]
    fn unparseable_cells_become_warnings() {
        let (_dir, path) = write_source(
            "record_code,measurement_value,measurement_date_event\n7, tall ,someday\n",
        );
        let mut source = CsvSource::open(SourceKind::Measurements, &path).expect("open");
        let chunk = source.next_chunk(10).expect("chunk");
        let row = chunk.iter().next().expect("row");

        let mut warnings = Vec::new();
        assert_eq!(row.required_i64("record_code").expect("id"), 7);
        assert_eq!(row.optional_f64("measurement_value", &mut warnings), None);
        assert_eq!(row.optional_date("measurement_date_event", &mut warnings), None);
        assert_eq!(warnings.len(), 2);
        assert_eq!(warnings[0].column, "measurement_value");
        assert_eq!(warnings[0].value, "tall");
        assert_eq!(warnings[0].line, 2);
    }

    #[test]
    fn missing_required_ids_name_the_cell() {
        let (_dir, path) = write_source("record_code,measurement_value\n,1\n");
        let mut source = CsvSource::open(SourceKind::Measurements, &path).expect("open");
        let chunk = source.next_chunk(10).expect("chunk");
        let row = chunk.iter().next().expect("row");

        let err = row.required_i64("record_code").expect_err("missing id");
        assert!(err.to_string().contains("measurements.csv line 2"));
        assert_eq!(row.raw("no_such_column"), "");
    }
}
