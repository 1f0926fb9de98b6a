// 📂 Record Reader - source extracts → positional rows
// The export format is isolated behind RowDecoder so it can change without touching loaders

use crate::error::{EtlError, Result};
use crate::tables::Entity;
use csv::{ReaderBuilder, StringRecord};
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::info;

// ============================================================================
// ROW
// ============================================================================

/// One data line: values in destination column order, no names carried
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    /// 1-based line in the source file
    pub line: usize,
    pub values: Vec<String>,
}

impl Row {
    pub fn new(line: usize, values: Vec<String>) -> Self {
        Row { line, values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Values ready for binding; empty fields become NULL
    pub fn bind_values(&self) -> Vec<Option<&str>> {
        self.values
            .iter()
            .map(|v| if v.is_empty() { None } else { Some(v.as_str()) })
            .collect()
    }
}

// ============================================================================
// DECODER - file-format contract
// ============================================================================

pub trait RowDecoder: Send + Sync {
    /// Outer delimiter used to split a raw line into records
    fn delimiter(&self) -> u8 {
        b','
    }

    /// Turn one outer record into column values, `None` when the record is malformed
    fn decode(&self, record: &StringRecord) -> Option<Vec<String>>;
}

/// Export layout v1: the first comma field holds `rownum;v1;v2;...`
#[derive(Debug, Default, Clone, Copy)]
pub struct PrefixedSemicolonDecoder;

impl RowDecoder for PrefixedSemicolonDecoder {
    fn decode(&self, record: &StringRecord) -> Option<Vec<String>> {
        let first = record.get(0)?;
        let mut segments = first.split(';');
        segments.next()?; // row-number prefix

        let values: Vec<String> = segments.map(str::to_string).collect();
        if values.is_empty() {
            None
        } else {
            Some(values)
        }
    }
}

// ============================================================================
// SOURCE READER
// ============================================================================

pub struct SourceReader {
    data_dir: PathBuf,
    decoder: Box<dyn RowDecoder>,
}

impl SourceReader {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        SourceReader {
            data_dir: data_dir.into(),
            decoder: Box::new(PrefixedSemicolonDecoder),
        }
    }

    pub fn with_decoder(mut self, decoder: Box<dyn RowDecoder>) -> Self {
        self.decoder = decoder;
        self
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn path_for(&self, entity: Entity) -> PathBuf {
        self.data_dir.join(entity.file_name())
    }

    /// Read every data row of an entity's extract, header discarded
    pub fn read(&self, entity: Entity) -> Result<Vec<Row>> {
        let path = self.path_for(entity);
        let rows = self.read_path(&path)?;

        info!(
            table = %entity,
            file = %path.display(),
            rows = rows.len(),
            "Rows read from source file"
        );
        Ok(rows)
    }

    pub fn read_path(&self, path: &Path) -> Result<Vec<Row>> {
        let file = File::open(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => EtlError::MissingFile {
                path: path.to_path_buf(),
            },
            _ => EtlError::Io(e),
        })?;

        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .delimiter(self.decoder.delimiter())
            .from_reader(file);

        let mut rows = Vec::new();
        for result in reader.records() {
            let record = result?;
            let line = record
                .position()
                .map(|p| p.line() as usize)
                .unwrap_or(rows.len() + 2);

            let values = self
                .decoder
                .decode(&record)
                .ok_or_else(|| EtlError::MalformedRow {
                    path: path.to_path_buf(),
                    line,
                })?;

            rows.push(Row::new(line, values));
        }

        Ok(rows)
    }
}
