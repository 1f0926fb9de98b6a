// 📥 Staging Loader - full refresh of one scss table from its source extract

use crate::error::{EtlError, Result};
use crate::reader::{Row, SourceReader};
use crate::store::{count_rows, table_columns};
use crate::tables::Entity;
use rusqlite::{params_from_iter, Connection};
use serde::Serialize;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StagingReport {
    pub table: String,
    pub rows_read: usize,
    pub rows_in_staging: i64,
}

/// Read the entity's extract and replace the staging table with it
pub fn load_staging(conn: &mut Connection, reader: &SourceReader, entity: Entity) -> Result<StagingReport> {
    let rows = reader.read(entity)?;
    replace_staging(conn, entity, &rows)
}

/// Create the staging table if absent, then swap its contents for `rows`
pub fn replace_staging(conn: &mut Connection, entity: Entity, rows: &[Row]) -> Result<StagingReport> {
    let staging = entity.staging();
    let curated = entity.curated();

    info!(table = %staging, "Ensuring staging table");
    conn.execute(
        &format!("CREATE TABLE IF NOT EXISTS {} AS SELECT * FROM {} WHERE 0", staging, curated),
        [],
    )?;

    let columns = table_columns(conn, &staging)?;
    check_shape(&staging.to_string(), columns.len(), rows)?;

    let tx = conn.transaction()?;
    tx.execute(&format!("DELETE FROM {}", staging), [])?;
    {
        let placeholders = vec!["?"; columns.len()].join(", ");
        let mut insert = tx.prepare(&format!("INSERT INTO {} VALUES ({})", staging, placeholders))?;
        for row in rows {
            insert.execute(params_from_iter(row.bind_values()))?;
        }
    }
    tx.commit()?;

    let rows_in_staging = count_rows(conn, &staging)?;
    info!(table = %staging, rows = rows_in_staging, "Rows written to staging");

    Ok(StagingReport {
        table: staging.table.to_string(),
        rows_read: rows.len(),
        rows_in_staging,
    })
}

fn check_shape(table: &str, expected: usize, rows: &[Row]) -> Result<()> {
    match rows.iter().find(|r| r.len() != expected) {
        Some(row) => Err(EtlError::SchemaMismatch {
            table: table.to_string(),
            expected,
            found: row.len(),
            line: row.line,
        }),
        None => Ok(()),
    }
}
