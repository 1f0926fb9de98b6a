// 📝 Run Record bookkeeping - logs.etl_execution
// A record without end_dttm is the only signal of a failed run

use crate::error::{EtlError, Result};
use crate::schema::ETL_EXECUTION;
use crate::tables::{quote_ident, Layer};
use chrono::{DateTime, Local, NaiveDateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::info;

pub type RunId = i64;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// Lifecycle of one execution; a failed run simply never reaches Completed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunState {
    NotStarted,
    Running,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: RunId,
    pub start_dttm: NaiveDateTime,
    pub end_dttm: Option<NaiveDateTime>,
}

impl RunRecord {
    pub fn is_complete(&self) -> bool {
        self.end_dttm.is_some()
    }

    pub fn state(&self) -> RunState {
        if self.is_complete() {
            RunState::Completed
        } else {
            RunState::Running
        }
    }
}

fn run_table() -> String {
    format!("{}.{}", quote_ident(Layer::Logs.schema()), quote_ident(ETL_EXECUTION))
}

/// Stamps are host wall-clock time without an offset
fn format_ts(ts: DateTime<Utc>) -> String {
    ts.with_timezone(&Local)
        .naive_local()
        .format(TIMESTAMP_FORMAT)
        .to_string()
}

fn parse_ts(raw: &str) -> Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT)
        .map_err(|e| EtlError::RunRecord(format!("bad timestamp {:?}: {}", raw, e)))
}

/// Create a run record stamped now and return its id
pub fn open_run(conn: &Connection) -> Result<RunId> {
    open_run_at(conn, Utc::now())
}

pub fn open_run_at(conn: &Connection, started: DateTime<Utc>) -> Result<RunId> {
    conn.execute(
        &format!("INSERT INTO {} (start_dttm) VALUES (?1)", run_table()),
        params![format_ts(started)],
    )?;
    let run_id = conn.last_insert_rowid();

    info!(run_id, "Run record opened");
    Ok(run_id)
}

/// Stamp the completion time on an open run record
pub fn close_run(conn: &Connection, run_id: RunId, finished: DateTime<Utc>) -> Result<()> {
    let updated = conn.execute(
        &format!("UPDATE {} SET end_dttm = ?1 WHERE run_id = ?2", run_table()),
        params![format_ts(finished), run_id],
    )?;

    if updated != 1 {
        return Err(EtlError::RunRecord(format!("run {} not found", run_id)));
    }

    info!(run_id, "Run record closed");
    Ok(())
}

pub fn fetch_run(conn: &Connection, run_id: RunId) -> Result<Option<RunRecord>> {
    let raw: Option<(String, Option<String>)> = conn
        .query_row(
            &format!("SELECT start_dttm, end_dttm FROM {} WHERE run_id = ?1", run_table()),
            params![run_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    raw.map(|(start, end)| {
        Ok(RunRecord {
            run_id,
            start_dttm: parse_ts(&start)?,
            end_dttm: end.as_deref().map(parse_ts).transpose()?,
        })
    })
    .transpose()
}

/// Runs that never recorded an end time, oldest first
pub fn incomplete_runs(conn: &Connection) -> Result<Vec<RunId>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT run_id FROM {} WHERE end_dttm IS NULL ORDER BY run_id",
        run_table()
    ))?;

    let ids = stmt
        .query_map([], |row| row.get(0))?
        .collect::<std::result::Result<Vec<RunId>, _>>()?;
    Ok(ids)
}
