// 🔀 Curated Merge - upsert a staging table into its curated counterpart
//
// The upsert itself is a pluggable capability (MergeProcedure). The shipped
// SqliteUpsert derives the business key from the destination's primary key:
//   - key absent in curated  → insert
//   - key present in curated → overwrite every non-key column
//   - curated keys absent from staging → untouched

use crate::error::{EtlError, Result};
use crate::store::{count_rows, table_columns, table_info};
use crate::tables::{column_list, quote_ident, Entity, QualifiedName};
use rusqlite::Connection;
use serde::Serialize;
use tracing::{debug, info};

// ============================================================================
// MERGE CAPABILITY
// ============================================================================

pub trait MergeProcedure: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str;

    /// Upsert all rows of `source` into `destination`, returning rows affected
    fn upsert(
        &self,
        conn: &mut Connection,
        source: &QualifiedName,
        destination: &QualifiedName,
    ) -> Result<usize>;
}

/// `INSERT … SELECT … ON CONFLICT(pk) DO UPDATE` in one transaction
#[derive(Debug, Default, Clone, Copy)]
pub struct SqliteUpsert;

impl SqliteUpsert {
    /// Build the upsert statement from catalog metadata
    pub fn statement(
        conn: &Connection,
        source: &QualifiedName,
        destination: &QualifiedName,
    ) -> Result<String> {
        let fail = |reason: &str| EtlError::merge(source, destination, reason);

        let dest_info = table_info(conn, destination)?;
        if dest_info.is_empty() {
            return Err(fail("destination table does not exist"));
        }
        let source_columns = table_columns(conn, source)?;
        if source_columns.is_empty() {
            return Err(fail("source table does not exist"));
        }

        let columns: Vec<String> = dest_info.iter().map(|c| c.name.clone()).collect();
        if let Some(missing) = columns.iter().find(|c| !source_columns.contains(c)) {
            return Err(fail(&format!("source has no column {}", missing)));
        }

        let mut key: Vec<_> = dest_info.iter().filter(|c| c.pk > 0).collect();
        if key.is_empty() {
            return Err(fail("destination has no business key"));
        }
        key.sort_by_key(|c| c.pk);
        let key: Vec<String> = key.into_iter().map(|c| c.name.clone()).collect();

        let updates: Vec<String> = columns
            .iter()
            .filter(|c| !key.contains(c))
            .map(|c| format!("{0} = excluded.{0}", quote_ident(c)))
            .collect();

        let action = if updates.is_empty() {
            "DO NOTHING".to_string()
        } else {
            format!("DO UPDATE SET {}", updates.join(", "))
        };

        // WHERE true keeps the parser from reading ON CONFLICT as a join clause
        Ok(format!(
            "INSERT INTO {dst} ({cols}) SELECT {cols} FROM {src} WHERE true ON CONFLICT ({key}) {action}",
            dst = destination,
            src = source,
            cols = column_list(&columns),
            key = column_list(&key),
            action = action,
        ))
    }
}

impl MergeProcedure for SqliteUpsert {
    fn name(&self) -> &str {
        "sqlite_upsert"
    }

    fn upsert(
        &self,
        conn: &mut Connection,
        source: &QualifiedName,
        destination: &QualifiedName,
    ) -> Result<usize> {
        let sql = Self::statement(conn, source, destination)?;
        debug!(sql = %sql, "Upsert statement");

        let fail = |e: rusqlite::Error| EtlError::merge(source, destination, e);
        let tx = conn.transaction().map_err(fail)?;
        let affected = tx.execute(&sql, []).map_err(fail)?;
        tx.commit().map_err(fail)?;

        Ok(affected)
    }
}

// ============================================================================
// CURATED MERGE
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MergeReport {
    pub table: String,
    pub rows_affected: usize,
    pub curated_total: i64,
}

/// Merge an entity's staging table into the curated layer
pub fn merge_curated(
    conn: &mut Connection,
    entity: Entity,
    procedure: &dyn MergeProcedure,
) -> Result<MergeReport> {
    let source = entity.staging();
    let destination = entity.curated();

    info!(
        source = %source,
        destination = %destination,
        procedure = procedure.name(),
        "Merging staging into curated"
    );
    let rows_affected = procedure.upsert(conn, &source, &destination)?;

    let curated_total = count_rows(conn, &destination)?;
    info!(table = %destination, rows = curated_total, "Curated table row count");

    Ok(MergeReport {
        table: entity.table_name().to_string(),
        rows_affected,
        curated_total,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::Row;
    use crate::schema::provision;
    use crate::staging::replace_staging;
    use crate::store::attach_in_memory;

    fn currency(line: usize, rk: &str, date: &str, code: &str, iso: &str) -> Row {
        Row::new(
            line,
            vec![rk.into(), date.into(), "2050-12-31".into(), code.into(), iso.into()],
        )
    }

    fn curated_currencies(conn: &Connection) -> Vec<(i64, String, String)> {
        let mut stmt = conn
            .prepare(
                "SELECT currency_rk, data_actual_date, code_iso_char FROM ds.md_currency_d
                 ORDER BY currency_rk, data_actual_date",
            )
            .unwrap();
        stmt.query_map([], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))
            .unwrap()
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap()
    }

    fn setup() -> Connection {
        let conn = attach_in_memory().unwrap();
        provision(&conn).unwrap();
        conn
    }

    #[test]
    fn test_key_preserving_upsert() {
        let mut conn = setup();
        conn.execute_batch(
            "INSERT INTO ds.md_currency_d VALUES (1, '2018-01-01', '2050-12-31', '643', 'RUR');
             INSERT INTO ds.md_currency_d VALUES (3, '2018-01-01', '2050-12-31', '978', 'EUR');",
        )
        .unwrap();

        // K1 changed, K2 new; K3 never staged
        let staged = vec![
            currency(2, "1", "2018-01-01", "643", "RUB"),
            currency(3, "2", "2018-01-01", "840", "USD"),
        ];
        replace_staging(&mut conn, Entity::MdCurrencyD, &staged).unwrap();

        let report = merge_curated(&mut conn, Entity::MdCurrencyD, &SqliteUpsert).unwrap();
        assert_eq!(report.curated_total, 3);

        assert_eq!(
            curated_currencies(&conn),
            vec![
                (1, "2018-01-01".to_string(), "RUB".to_string()),
                (2, "2018-01-01".to_string(), "USD".to_string()),
                (3, "2018-01-01".to_string(), "EUR".to_string()),
            ]
        );
    }

    #[test]
    fn test_merge_twice_is_stable() {
        let mut conn = setup();
        let staged = vec![
            currency(2, "1", "2018-01-01", "643", "RUB"),
            currency(3, "2", "2018-01-01", "840", "USD"),
        ];
        replace_staging(&mut conn, Entity::MdCurrencyD, &staged).unwrap();

        merge_curated(&mut conn, Entity::MdCurrencyD, &SqliteUpsert).unwrap();
        let after_first = curated_currencies(&conn);
        let report = merge_curated(&mut conn, Entity::MdCurrencyD, &SqliteUpsert).unwrap();

        assert_eq!(report.curated_total, 2);
        assert_eq!(curated_currencies(&conn), after_first);
    }

    #[test]
    fn test_statement_uses_primary_key_order() {
        let conn = setup();
        conn.execute(
            "CREATE TABLE scss.md_exchange_rate_d AS SELECT * FROM ds.md_exchange_rate_d WHERE 0",
            [],
        )
        .unwrap();

        let sql = SqliteUpsert::statement(
            &conn,
            &Entity::MdExchangeRateD.staging(),
            &Entity::MdExchangeRateD.curated(),
        )
        .unwrap();

        assert!(sql.contains("ON CONFLICT (\"data_actual_date\", \"currency_rk\")"));
        assert!(sql.contains("\"reduced_cource\" = excluded.\"reduced_cource\""));
        assert!(!sql.contains("\"currency_rk\" = excluded"));
    }

    #[test]
    fn test_missing_staging_is_merge_error() {
        let mut conn = setup();
        let err = merge_curated(&mut conn, Entity::MdAccountD, &SqliteUpsert).unwrap_err();
        assert!(matches!(err, EtlError::MergeProcedure { .. }));
    }

    #[test]
    fn test_constraint_violation_is_merge_error() {
        let mut conn = setup();
        // NULL business key cannot land in the curated layer
        let staged = vec![Row::new(
            2,
            vec!["".into(), "2018-01-01".into(), "".into(), "".into(), "".into()],
        )];
        replace_staging(&mut conn, Entity::MdCurrencyD, &staged).unwrap();

        let err = merge_curated(&mut conn, Entity::MdCurrencyD, &SqliteUpsert).unwrap_err();
        assert!(matches!(err, EtlError::MergeProcedure { .. }));
        assert!(curated_currencies(&conn).is_empty());
    }

    #[test]
    fn test_custom_procedure_is_invoked_with_layer_names() {
        use std::sync::Mutex;

        #[derive(Default)]
        struct Recording(Mutex<Vec<(String, String)>>);

        impl MergeProcedure for Recording {
            fn name(&self) -> &str {
                "recording"
            }
            fn upsert(
                &self,
                _conn: &mut Connection,
                source: &QualifiedName,
                destination: &QualifiedName,
            ) -> Result<usize> {
                self.0
                    .lock()
                    .unwrap()
                    .push((source.to_string(), destination.to_string()));
                Ok(0)
            }
        }

        let mut conn = setup();
        let procedure = Recording::default();
        merge_curated(&mut conn, Entity::MdLedgerAccountS, &procedure).unwrap();

        let calls = procedure.0.lock().unwrap();
        assert_eq!(
            calls[0],
            (
                "\"scss\".\"md_ledger_account_s\"".to_string(),
                "\"ds\".\"md_ledger_account_s\"".to_string()
            )
        );
    }
}
