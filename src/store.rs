// 🗄️ Warehouse connections
// One fresh connection per operation group; staging/curated/logs are attached databases

use crate::config::DatabaseConfig;
use crate::error::{EtlError, Result};
use crate::tables::{Layer, QualifiedName};
use rusqlite::{params, Connection};
use std::time::Duration;
use tracing::info;

/// Connection factory for the layered warehouse
#[derive(Debug, Clone)]
pub struct Warehouse {
    config: DatabaseConfig,
}

impl Warehouse {
    pub fn new(config: DatabaseConfig) -> Self {
        Warehouse { config }
    }

    /// Open a new connection with every layer attached
    pub fn connect(&self) -> Result<Connection> {
        std::fs::create_dir_all(&self.config.dir).map_err(|e| {
            EtlError::Connection(format!(
                "cannot create warehouse directory {}: {}",
                self.config.dir.display(),
                e
            ))
        })?;

        let conn = Connection::open_in_memory().map_err(connection_error)?;
        conn.busy_timeout(Duration::from_millis(self.config.busy_timeout_ms))
            .map_err(connection_error)?;

        for layer in Layer::ALL {
            let path = self.config.dir.join(format!("{}.db", layer.schema()));
            attach(&conn, &path.to_string_lossy(), layer)?;
        }

        info!(dir = %self.config.dir.display(), "Connected to warehouse");
        Ok(conn)
    }
}

fn connection_error(e: rusqlite::Error) -> EtlError {
    EtlError::Connection(e.to_string())
}

fn attach(conn: &Connection, path: &str, layer: Layer) -> Result<()> {
    // Schema names come from the closed Layer set
    let sql = format!("ATTACH DATABASE ?1 AS {}", layer.schema());
    conn.execute(&sql, params![path]).map_err(connection_error)?;
    Ok(())
}

/// `SELECT COUNT(*)` on a known table
pub fn count_rows(conn: &Connection, table: &QualifiedName) -> Result<i64> {
    let count: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
        row.get(0)
    })?;
    Ok(count)
}

/// Column names of a table in declaration order, read from the catalog
pub fn table_columns(conn: &Connection, table: &QualifiedName) -> Result<Vec<String>> {
    Ok(table_info(conn, table)?.into_iter().map(|c| c.name).collect())
}

/// Catalog row for one column
#[derive(Debug, Clone)]
pub struct ColumnInfo {
    pub name: String,
    /// 1-based position in the primary key, 0 when not part of it
    pub pk: i64,
}

pub fn table_info(conn: &Connection, table: &QualifiedName) -> Result<Vec<ColumnInfo>> {
    let mut stmt =
        conn.prepare("SELECT name, pk FROM pragma_table_info(?1, ?2) ORDER BY cid")?;

    let columns = stmt
        .query_map(params![table.table, table.schema()], |row| {
            Ok(ColumnInfo {
                name: row.get(0)?,
                pk: row.get(1)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(columns)
}

/// Single connection with every layer attached in memory
#[cfg(test)]
pub(crate) fn attach_in_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    for layer in Layer::ALL {
        attach(&conn, ":memory:", layer)?;
    }
    Ok(conn)
}
