// ⚠️ Error taxonomy for the load pipeline
// Nothing here is recovered inside the pipeline: every variant propagates to main

use std::path::PathBuf;
use thiserror::Error;

/// Result alias used across the library
pub type Result<T> = std::result::Result<T, EtlError>;

#[derive(Error, Debug)]
pub enum EtlError {
    // ========================================================================
    // CORE TAXONOMY
    // ========================================================================
    /// Store unreachable or rejected the connection (fatal, aborts the run)
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Source file not found: {}", .path.display())]
    MissingFile { path: PathBuf },

    #[error("Malformed row at {}:{line}: no values after the row prefix", .path.display())]
    MalformedRow { path: PathBuf, line: usize },

    #[error("Schema mismatch for {table} at line {line}: expected {expected} fields, found {found}")]
    SchemaMismatch {
        table: String,
        expected: usize,
        found: usize,
        line: usize,
    },

    /// The upsert capability failed or is unavailable
    #[error("Merge procedure failed for {source_table} -> {destination}: {reason}")]
    MergeProcedure {
        source_table: String,
        destination: String,
        reason: String,
    },

    // ========================================================================
    // AMBIENT
    // ========================================================================
    #[error("Source files still changing after {waited_secs}s: {missing:?}")]
    SourcesNotReady { missing: Vec<String>, waited_secs: u64 },

    #[error("Unknown table: {0}")]
    UnknownTable(String),

    #[error("Run record error: {0}")]
    RunRecord(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
}

impl EtlError {
    /// Wrap any store failure raised while a merge was running
    pub fn merge(source_table: impl ToString, destination: impl ToString, reason: impl ToString) -> Self {
        EtlError::MergeProcedure {
            source_table: source_table.to_string(),
            destination: destination.to_string(),
            reason: reason.to_string(),
        }
    }
}
