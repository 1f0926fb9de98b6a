// 🔍 Postings Deduplicator/Merger - ft_posting_f
//
// A staging batch may carry several postings for one business key
// (oper_date, credit_account_rk, debet_account_rk), e.g. corrections.
// Exactly one survives per key: the row that arrived last in staging.
//
//   1. arrival ordinal = staging rowid (insertion order of the batch)
//   2. group by business key
//   3. representative = highest ordinal in the group
//   4. one row per group, exact duplicates dropped
//   5. upsert into ds.ft_posting_f, overwriting both amounts on conflict
//
// Values travel as SQLite values end to end so amounts land bit-for-bit.

use crate::error::{EtlError, Result};
use crate::store::count_rows;
use crate::tables::Entity;
use rusqlite::types::Value;
use rusqlite::{params, Connection};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use tracing::info;

// ============================================================================
// POSTING
// ============================================================================

/// One posting exactly as it sits in staging
#[derive(Debug, Clone, PartialEq)]
pub struct Posting {
    pub oper_date: Value,
    pub credit_account_rk: Value,
    pub debet_account_rk: Value,
    pub credit_amount: Value,
    pub debet_amount: Value,
}

/// Hashable image of a SQLite value; reals compare by bit pattern
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum KeyPart {
    Null,
    Integer(i64),
    Real(u64),
    Text(String),
    Blob(Vec<u8>),
}

impl From<&Value> for KeyPart {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => KeyPart::Null,
            Value::Integer(i) => KeyPart::Integer(*i),
            Value::Real(f) => KeyPart::Real(f.to_bits()),
            Value::Text(s) => KeyPart::Text(s.clone()),
            Value::Blob(b) => KeyPart::Blob(b.clone()),
        }
    }
}

pub type PostingKey = (KeyPart, KeyPart, KeyPart);

impl Posting {
    pub fn key(&self) -> PostingKey {
        (
            KeyPart::from(&self.oper_date),
            KeyPart::from(&self.credit_account_rk),
            KeyPart::from(&self.debet_account_rk),
        )
    }

    fn fingerprint(&self) -> [KeyPart; 5] {
        [
            KeyPart::from(&self.oper_date),
            KeyPart::from(&self.credit_account_rk),
            KeyPart::from(&self.debet_account_rk),
            KeyPart::from(&self.credit_amount),
            KeyPart::from(&self.debet_amount),
        ]
    }
}

/// A staged posting with its arrival ordinal
#[derive(Debug, Clone, PartialEq)]
pub struct Staged {
    pub ordinal: i64,
    pub posting: Posting,
}

// ============================================================================
// DEDUPLICATION (pure)
// ============================================================================

/// Collapse the batch to one posting per business key, last arrival wins.
/// Output is ordered by the representative's arrival ordinal.
pub fn deduplicate(staged: &[Staged]) -> Vec<Posting> {
    let mut latest: HashMap<PostingKey, &Staged> = HashMap::new();

    for row in staged {
        latest
            .entry(row.posting.key())
            .and_modify(|current| {
                if row.ordinal > current.ordinal {
                    *current = row;
                }
            })
            .or_insert(row);
    }

    let mut representatives: Vec<&Staged> = latest.into_values().collect();
    representatives.sort_by_key(|s| s.ordinal);

    let mut seen = HashSet::new();
    representatives
        .into_iter()
        .filter(|s| seen.insert(s.posting.fingerprint()))
        .map(|s| s.posting.clone())
        .collect()
}

// ============================================================================
// STORE SIDE
// ============================================================================

/// Staged postings in arrival order
pub fn read_staged(conn: &Connection) -> Result<Vec<Staged>> {
    let sql = format!(
        "SELECT rowid, oper_date, credit_account_rk, debet_account_rk, credit_amount, debet_amount
         FROM {}
         ORDER BY rowid",
        Entity::FtPostingF.staging()
    );
    let mut stmt = conn.prepare(&sql)?;

    let rows = stmt
        .query_map([], |row| {
            Ok(Staged {
                ordinal: row.get(0)?,
                posting: Posting {
                    oper_date: row.get(1)?,
                    credit_account_rk: row.get(2)?,
                    debet_account_rk: row.get(3)?,
                    credit_amount: row.get(4)?,
                    debet_amount: row.get(5)?,
                },
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

/// Upsert postings keyed by (oper_date, credit_account_rk, debet_account_rk)
pub fn upsert_postings(conn: &mut Connection, postings: &[Posting]) -> Result<usize> {
    let source = Entity::FtPostingF.staging();
    let destination = Entity::FtPostingF.curated();
    let fail = |e: rusqlite::Error| EtlError::merge(source, destination, e);

    let sql = format!(
        "INSERT INTO {} (oper_date, credit_account_rk, debet_account_rk, credit_amount, debet_amount)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT (oper_date, credit_account_rk, debet_account_rk) DO UPDATE SET
             credit_amount = excluded.credit_amount,
             debet_amount = excluded.debet_amount",
        destination
    );

    let tx = conn.transaction().map_err(fail)?;
    let mut affected = 0;
    {
        let mut stmt = tx.prepare(&sql).map_err(fail)?;
        for p in postings {
            affected += stmt
                .execute(params![
                    p.oper_date,
                    p.credit_account_rk,
                    p.debet_account_rk,
                    p.credit_amount,
                    p.debet_amount,
                ])
                .map_err(fail)?;
        }
    }
    tx.commit().map_err(fail)?;

    Ok(affected)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PostingsReport {
    pub staged: usize,
    pub deduplicated: usize,
    pub curated_total: i64,
}

/// Deduplicate the staged postings batch and merge it into the curated layer
pub fn merge_postings(conn: &mut Connection) -> Result<PostingsReport> {
    let destination = Entity::FtPostingF.curated();
    info!(
        source = %Entity::FtPostingF.staging(),
        destination = %destination,
        "Merging postings with deduplication"
    );

    let staged = read_staged(conn)?;
    let postings = deduplicate(&staged);
    info!(
        staged = staged.len(),
        unique_keys = postings.len(),
        collapsed = staged.len() - postings.len(),
        "Postings deduplicated"
    );

    upsert_postings(conn, &postings)?;

    let curated_total = count_rows(conn, &destination)?;
    info!(table = %destination, rows = curated_total, "Curated table row count");

    Ok(PostingsReport {
        staged: staged.len(),
        deduplicated: postings.len(),
        curated_total,
    })
}
