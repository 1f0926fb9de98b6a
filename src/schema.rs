// 📐 Warehouse Schema - curated and logs table definitions
// Provisioning only: tables are created when absent, never altered

use crate::error::Result;
use crate::tables::{quote_ident, Entity, Layer};
use rusqlite::Connection;
use tracing::info;

// ============================================================================
// TABLE DEFINITIONS
// ============================================================================

#[derive(Debug, Clone, Copy)]
pub struct Column {
    pub name: &'static str,
    pub sql_type: &'static str,
}

const fn col(name: &'static str, sql_type: &'static str) -> Column {
    Column { name, sql_type }
}

/// Curated table shape: columns in source-file order plus the business key
#[derive(Debug, Clone, Copy)]
pub struct TableDef {
    pub entity: Entity,
    pub columns: &'static [Column],
    pub business_key: &'static [&'static str],
}

const FT_POSTING_F: TableDef = TableDef {
    entity: Entity::FtPostingF,
    columns: &[
        col("oper_date", "DATE NOT NULL"),
        col("credit_account_rk", "INTEGER NOT NULL"),
        col("debet_account_rk", "INTEGER NOT NULL"),
        col("credit_amount", "NUMERIC"),
        col("debet_amount", "NUMERIC"),
    ],
    business_key: &["oper_date", "credit_account_rk", "debet_account_rk"],
};

const FT_BALANCE_F: TableDef = TableDef {
    entity: Entity::FtBalanceF,
    columns: &[
        col("on_date", "DATE NOT NULL"),
        col("account_rk", "INTEGER NOT NULL"),
        col("currency_rk", "INTEGER"),
        col("balance_out", "NUMERIC"),
    ],
    business_key: &["on_date", "account_rk"],
};

const MD_ACCOUNT_D: TableDef = TableDef {
    entity: Entity::MdAccountD,
    columns: &[
        col("data_actual_date", "DATE NOT NULL"),
        col("data_actual_end_date", "DATE NOT NULL"),
        col("account_rk", "INTEGER NOT NULL"),
        col("account_number", "TEXT NOT NULL"),
        col("char_type", "TEXT NOT NULL"),
        col("currency_rk", "INTEGER NOT NULL"),
        col("currency_code", "TEXT NOT NULL"),
    ],
    business_key: &["data_actual_date", "account_rk"],
};

const MD_CURRENCY_D: TableDef = TableDef {
    entity: Entity::MdCurrencyD,
    columns: &[
        col("currency_rk", "INTEGER NOT NULL"),
        col("data_actual_date", "DATE NOT NULL"),
        col("data_actual_end_date", "DATE"),
        col("currency_code", "TEXT"),
        col("code_iso_char", "TEXT"),
    ],
    business_key: &["currency_rk", "data_actual_date"],
};

const MD_EXCHANGE_RATE_D: TableDef = TableDef {
    entity: Entity::MdExchangeRateD,
    columns: &[
        col("data_actual_date", "DATE NOT NULL"),
        col("data_actual_end_date", "DATE"),
        col("currency_rk", "INTEGER NOT NULL"),
        col("reduced_cource", "NUMERIC"),
        col("code_iso_num", "TEXT"),
    ],
    business_key: &["data_actual_date", "currency_rk"],
};

const MD_LEDGER_ACCOUNT_S: TableDef = TableDef {
    entity: Entity::MdLedgerAccountS,
    columns: &[
        col("chapter", "TEXT"),
        col("chapter_name", "TEXT"),
        col("section_number", "INTEGER"),
        col("section_name", "TEXT"),
        col("subsection_name", "TEXT"),
        col("ledger1_account", "INTEGER"),
        col("ledger1_account_name", "TEXT"),
        col("ledger_account", "INTEGER NOT NULL"),
        col("ledger_account_name", "TEXT"),
        col("characteristic", "TEXT"),
        col("start_date", "DATE NOT NULL"),
        col("end_date", "DATE"),
    ],
    business_key: &["ledger_account", "start_date"],
};

impl TableDef {
    pub fn for_entity(entity: Entity) -> &'static TableDef {
        match entity {
            Entity::FtPostingF => &FT_POSTING_F,
            Entity::FtBalanceF => &FT_BALANCE_F,
            Entity::MdAccountD => &MD_ACCOUNT_D,
            Entity::MdCurrencyD => &MD_CURRENCY_D,
            Entity::MdExchangeRateD => &MD_EXCHANGE_RATE_D,
            Entity::MdLedgerAccountS => &MD_LEDGER_ACCOUNT_S,
        }
    }

    /// `CREATE TABLE IF NOT EXISTS` for the curated layer
    pub fn create_sql(&self) -> String {
        let mut lines: Vec<String> = self
            .columns
            .iter()
            .map(|c| format!("    {} {}", quote_ident(c.name), c.sql_type))
            .collect();
        let key = self
            .business_key
            .iter()
            .map(|k| quote_ident(k))
            .collect::<Vec<_>>()
            .join(", ");
        lines.push(format!("    PRIMARY KEY ({})", key));

        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n{}\n)",
            self.entity.curated(),
            lines.join(",\n")
        )
    }
}

// ============================================================================
// LOGS LAYER
// ============================================================================

pub const ETL_EXECUTION: &str = "etl_execution";

fn create_run_log_sql() -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {}.{} (
            run_id INTEGER PRIMARY KEY AUTOINCREMENT,
            start_dttm TEXT NOT NULL,
            end_dttm TEXT
        )",
        quote_ident(Layer::Logs.schema()),
        quote_ident(ETL_EXECUTION)
    )
}

/// Create every curated table and the run log when absent
pub fn provision(conn: &Connection) -> Result<()> {
    for entity in Entity::ALL {
        conn.execute(&TableDef::for_entity(entity).create_sql(), [])?;
    }
    conn.execute(&create_run_log_sql(), [])?;

    info!(tables = Entity::ALL.len(), "Warehouse schema provisioned");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::attach_in_memory;

    #[test]
    fn test_every_key_column_is_a_table_column() {
        for entity in Entity::ALL {
            let def = TableDef::for_entity(entity);
            for key in def.business_key {
                assert!(
                    def.columns.iter().any(|c| c.name == *key),
                    "{} key column {} missing",
                    entity,
                    key
                );
            }
        }
    }

    #[test]
    fn test_create_sql_declares_primary_key() {
        let sql = TableDef::for_entity(Entity::FtPostingF).create_sql();
        assert!(sql.starts_with("CREATE TABLE IF NOT EXISTS \"ds\".\"ft_posting_f\""));
        assert!(sql.contains(
            "PRIMARY KEY (\"oper_date\", \"credit_account_rk\", \"debet_account_rk\")"
        ));
    }

    #[test]
    fn test_provision_is_idempotent() {
        let conn = attach_in_memory().unwrap();
        provision(&conn).unwrap();
        provision(&conn).unwrap();

        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM ds.sqlite_master WHERE type = 'table'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 6);

        let logs: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM logs.sqlite_master WHERE name = 'etl_execution'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(logs, 1);
    }
}
