// Bank ETL - Core Library
// Batch load of flat-file extracts into the layered warehouse (scss → ds, logs)

pub mod error;
pub mod config;
pub mod logging;
pub mod tables;     // Identifier layer: closed entity set, quoting
pub mod schema;     // Curated + logs DDL
pub mod store;      // Connection per operation group
pub mod reader;     // Record Reader
pub mod readiness;  // Source readiness wait
pub mod staging;    // Staging Loader
pub mod merge;      // Curated Merge
pub mod postings;   // Postings Deduplicator/Merger
pub mod run_log;    // Run Record bookkeeping
pub mod pipeline;   // Run Orchestrator

// Re-export commonly used types
pub use error::{EtlError, Result};
pub use config::{Config, DatabaseConfig, ReadinessConfig};
pub use logging::{init_logging, LogConfig, LogFormat, LogLevel};
pub use tables::{Entity, Layer, QualifiedName};
pub use store::Warehouse;
pub use reader::{PrefixedSemicolonDecoder, Row, RowDecoder, SourceReader};
pub use readiness::SourceReadiness;
pub use staging::{load_staging, StagingReport};
pub use merge::{merge_curated, MergeProcedure, MergeReport, SqliteUpsert};
pub use postings::{deduplicate, merge_postings, Posting, PostingsReport, Staged};
pub use run_log::{RunId, RunRecord, RunState};
pub use pipeline::{Pipeline, RunSummary, TableSummary};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
