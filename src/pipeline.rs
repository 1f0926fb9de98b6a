// 🚚 Run Orchestrator - one execution of the load pipeline
//
// open run record → wait for sources → postings (stage + dedup merge)
//   → each reference table in order (stage + upsert) → close run record
//
// Strictly sequential. The first error aborts the run and propagates; the run
// record then keeps end_dttm = NULL.

use crate::config::Config;
use crate::error::Result;
use crate::merge::{merge_curated, MergeProcedure, SqliteUpsert};
use crate::postings::merge_postings;
use crate::reader::SourceReader;
use crate::readiness::SourceReadiness;
use crate::run_log::{close_run, open_run_at, RunId, RunState};
use crate::schema::provision;
use crate::staging::load_staging;
use crate::store::Warehouse;
use crate::tables::Entity;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use tracing::{info, info_span};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableSummary {
    pub table: String,
    pub rows_read: usize,
    pub rows_in_staging: i64,
    pub curated_total: i64,
    /// Postings only: batch rows folded into an existing key
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collapsed: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub run_id: RunId,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub tables: Vec<TableSummary>,
}

impl RunSummary {
    pub fn table(&self, entity: Entity) -> Option<&TableSummary> {
        self.tables.iter().find(|t| t.table == entity.table_name())
    }
}

pub struct Pipeline {
    warehouse: Warehouse,
    reader: SourceReader,
    readiness: SourceReadiness,
    procedure: Box<dyn MergeProcedure>,
    state: RunState,
}

impl Pipeline {
    pub fn new(config: &Config) -> Self {
        Pipeline {
            warehouse: Warehouse::new(config.database.clone()),
            reader: SourceReader::new(config.data_dir.clone()),
            readiness: SourceReadiness::from_config(&config.readiness),
            procedure: Box::new(SqliteUpsert),
            state: RunState::NotStarted,
        }
    }

    /// Swap the upsert capability used for reference tables
    pub fn with_merge_procedure(mut self, procedure: Box<dyn MergeProcedure>) -> Self {
        self.procedure = procedure;
        self
    }

    pub fn with_reader(mut self, reader: SourceReader) -> Self {
        self.reader = reader;
        self
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn warehouse(&self) -> &Warehouse {
        &self.warehouse
    }

    /// Create curated and logs tables that do not exist yet
    pub fn provision_schema(&self) -> Result<()> {
        let conn = self.warehouse.connect()?;
        provision(&conn)
    }

    fn source_paths(&self) -> Vec<PathBuf> {
        Entity::ALL.iter().map(|e| self.reader.path_for(*e)).collect()
    }

    pub fn run(&mut self) -> Result<RunSummary> {
        let started_at = Utc::now();
        let run_id = {
            let conn = self.warehouse.connect()?;
            open_run_at(&conn, started_at)?
        };
        self.state = RunState::Running;

        let span = info_span!("etl_run", run_id);
        let _guard = span.enter();
        info!("Load started");

        self.readiness.wait_for(&self.source_paths())?;

        let mut tables = Vec::with_capacity(Entity::ALL.len());
        tables.push(self.load_postings()?);
        for entity in Entity::REFERENCE {
            tables.push(self.load_reference(entity)?);
        }

        let finished_at = Utc::now();
        {
            let conn = self.warehouse.connect()?;
            close_run(&conn, run_id, finished_at)?;
        }
        self.state = RunState::Completed;

        info!(
            tables = tables.len(),
            elapsed_ms = (finished_at - started_at).num_milliseconds(),
            "Load completed"
        );

        Ok(RunSummary {
            run_id,
            started_at,
            finished_at,
            tables,
        })
    }

    fn load_postings(&self) -> Result<TableSummary> {
        let entity = Entity::FtPostingF;
        let _guard = info_span!("table", name = %entity).entered();

        let staging = {
            let mut conn = self.warehouse.connect()?;
            load_staging(&mut conn, &self.reader, entity)?
        };
        let merged = {
            let mut conn = self.warehouse.connect()?;
            merge_postings(&mut conn)?
        };

        Ok(TableSummary {
            table: staging.table,
            rows_read: staging.rows_read,
            rows_in_staging: staging.rows_in_staging,
            curated_total: merged.curated_total,
            collapsed: Some(merged.staged - merged.deduplicated),
        })
    }

    fn load_reference(&self, entity: Entity) -> Result<TableSummary> {
        let _guard = info_span!("table", name = %entity).entered();

        let staging = {
            let mut conn = self.warehouse.connect()?;
            load_staging(&mut conn, &self.reader, entity)?
        };
        let merged = {
            let mut conn = self.warehouse.connect()?;
            merge_curated(&mut conn, entity, self.procedure.as_ref())?
        };

        Ok(TableSummary {
            table: staging.table,
            rows_read: staging.rows_read,
            rows_in_staging: staging.rows_in_staging,
            curated_total: merged.curated_total,
            collapsed: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EtlError;
    use crate::run_log::{fetch_run, incomplete_runs};
    use crate::store::count_rows;
    use crate::tables::QualifiedName;
    use rusqlite::Connection;
    use std::fs;
    use std::path::Path;

    const POSTINGS: &str = ";OPER_DATE;CREDIT_ACCOUNT_RK;DEBET_ACCOUNT_RK;CREDIT_AMOUNT;DEBET_AMOUNT
0;2018-01-09;13630;17436;94333.93;18337.76
1;2018-01-09;13630;17436;10;10
2;2018-01-10;24656;17436;500;500
3;2018-01-11;13630;24656;1.25;0
";

    const BALANCES: &str = ";ON_DATE;ACCOUNT_RK;CURRENCY_RK;BALANCE_OUT
0;2017-12-31;36237725;35;38318.13
1;2017-12-31;24656;35;80533.62
";

    const ACCOUNTS: &str = ";DATA_ACTUAL_DATE;DATA_ACTUAL_END_DATE;ACCOUNT_RK;ACCOUNT_NUMBER;CHAR_TYPE;CURRENCY_RK;CURRENCY_CODE
0;2018-01-01;2018-01-31;36237725;30114840000000000001;А;35;643
1;2018-01-01;2018-01-31;24656;40702810000000000002;П;35;643
2;2018-01-01;2018-01-31;13630;40702840000000000003;П;44;840
";

    const CURRENCIES: &str = ";CURRENCY_RK;DATA_ACTUAL_DATE;DATA_ACTUAL_END_DATE;CURRENCY_CODE;CODE_ISO_CHAR
0;35;2018-01-01;2050-12-31;643;RUB
1;44;2018-01-01;2050-12-31;840;USD
";

    const RATES: &str = ";DATA_ACTUAL_DATE;DATA_ACTUAL_END_DATE;CURRENCY_RK;REDUCED_COURCE;CODE_ISO_NUM
0;2018-01-01;2018-01-10;44;57.6002;840
";

    const LEDGER: &str = ";CHAPTER;CHAPTER_NAME;SECTION_NUMBER;SECTION_NAME;SUBSECTION_NAME;LEDGER1_ACCOUNT;LEDGER1_ACCOUNT_NAME;LEDGER_ACCOUNT;LEDGER_ACCOUNT_NAME;CHARACTERISTIC;START_DATE;END_DATE
0;A;BALANCE;1;CAPITAL;CAPITAL;102;AUTHORIZED;10207;SHARES;П;2018-01-01;
";

    fn write_sources(dir: &Path) {
        for (entity, contents) in [
            (Entity::FtPostingF, POSTINGS),
            (Entity::FtBalanceF, BALANCES),
            (Entity::MdAccountD, ACCOUNTS),
            (Entity::MdCurrencyD, CURRENCIES),
            (Entity::MdExchangeRateD, RATES),
            (Entity::MdLedgerAccountS, LEDGER),
        ] {
            fs::write(dir.join(entity.file_name()), contents).unwrap();
        }
    }

    fn test_config(root: &Path) -> Config {
        let mut config = Config::default();
        config.data_dir = root.join("data");
        config.database.dir = root.join("warehouse");
        config.readiness.timeout_secs = 0;
        config.readiness.poll_interval_ms = 10;
        config
    }

    fn setup() -> (tempfile::TempDir, Pipeline) {
        let tmp = tempfile::tempdir().unwrap();
        let config = test_config(tmp.path());
        fs::create_dir_all(&config.data_dir).unwrap();
        write_sources(&config.data_dir);

        let pipeline = Pipeline::new(&config);
        pipeline.provision_schema().unwrap();
        (tmp, pipeline)
    }

    fn curated_count(conn: &Connection, entity: Entity) -> i64 {
        let name: QualifiedName = entity.curated();
        count_rows(conn, &name).unwrap()
    }

    #[test]
    fn test_end_to_end_run() {
        let (_tmp, mut pipeline) = setup();
        assert_eq!(pipeline.state(), RunState::NotStarted);

        let summary = pipeline.run().unwrap();
        assert_eq!(pipeline.state(), RunState::Completed);

        let order: Vec<&str> = summary.tables.iter().map(|t| t.table.as_str()).collect();
        assert_eq!(
            order,
            vec![
                "ft_posting_f",
                "ft_balance_f",
                "md_account_d",
                "md_currency_d",
                "md_exchange_rate_d",
                "md_ledger_account_s",
            ]
        );

        let postings = summary.table(Entity::FtPostingF).unwrap();
        assert_eq!(postings.rows_in_staging, 4);
        assert_eq!(postings.curated_total, 3);
        assert_eq!(postings.collapsed, Some(1));

        let accounts = summary.table(Entity::MdAccountD).unwrap();
        assert_eq!(accounts.rows_read, 3);
        assert_eq!(accounts.curated_total, 3);

        let conn = pipeline.warehouse().connect().unwrap();
        let record = fetch_run(&conn, summary.run_id).unwrap().unwrap();
        assert!(record.is_complete());

        let amount: f64 = conn
            .query_row(
                "SELECT credit_amount FROM ds.ft_posting_f
                 WHERE oper_date = '2018-01-09' AND credit_account_rk = 13630 AND debet_account_rk = 17436",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(amount, 10.0);
    }

    #[test]
    fn test_rerun_converges() {
        let (_tmp, mut pipeline) = setup();

        let first = pipeline.run().unwrap();
        let second = pipeline.run().unwrap();

        assert!(second.run_id > first.run_id);
        for (a, b) in first.tables.iter().zip(&second.tables) {
            assert_eq!(a.curated_total, b.curated_total, "{} changed on rerun", a.table);
        }

        let conn = pipeline.warehouse().connect().unwrap();
        assert!(incomplete_runs(&conn).unwrap().is_empty());
    }

    #[test]
    fn test_failure_leaves_run_open_and_keeps_earlier_tables() {
        let (tmp, mut pipeline) = setup();
        fs::write(
            tmp.path().join("data").join(Entity::MdCurrencyD.file_name()),
            ";CURRENCY_RK\n0;35;2018-01-01;2050-12-31;643;RUB\nbroken\n",
        )
        .unwrap();

        let err = pipeline.run().unwrap_err();
        assert!(matches!(err, EtlError::MalformedRow { line: 3, .. }));
        assert_eq!(pipeline.state(), RunState::Running);

        let conn = pipeline.warehouse().connect().unwrap();
        assert_eq!(incomplete_runs(&conn).unwrap().len(), 1);

        // Everything before the failing table stays committed
        assert_eq!(curated_count(&conn, Entity::FtPostingF), 3);
        assert_eq!(curated_count(&conn, Entity::MdAccountD), 3);
        assert_eq!(curated_count(&conn, Entity::MdCurrencyD), 0);
        assert_eq!(curated_count(&conn, Entity::MdExchangeRateD), 0);
    }

    #[test]
    fn test_missing_source_aborts_before_loading() {
        let (tmp, mut pipeline) = setup();
        fs::remove_file(tmp.path().join("data").join(Entity::MdExchangeRateD.file_name())).unwrap();

        let err = pipeline.run().unwrap_err();
        match err {
            EtlError::MissingFile { path } => {
                assert!(path.ends_with(Entity::MdExchangeRateD.file_name()))
            }
            other => panic!("unexpected error: {}", other),
        }

        let conn = pipeline.warehouse().connect().unwrap();
        assert_eq!(incomplete_runs(&conn).unwrap().len(), 1);
        assert_eq!(curated_count(&conn, Entity::FtPostingF), 0);
    }

    #[test]
    fn test_merge_procedure_failure_propagates() {
        struct Unavailable;
        impl MergeProcedure for Unavailable {
            fn name(&self) -> &str {
                "unavailable"
            }
            fn upsert(
                &self,
                _conn: &mut Connection,
                source: &QualifiedName,
                destination: &QualifiedName,
            ) -> Result<usize> {
                Err(EtlError::merge(source, destination, "procedure not installed"))
            }
        }

        let (_tmp, pipeline) = setup();
        let mut pipeline = pipeline.with_merge_procedure(Box::new(Unavailable));

        let err = pipeline.run().unwrap_err();
        match err {
            EtlError::MergeProcedure { destination, .. } => {
                assert_eq!(destination, "\"ds\".\"ft_balance_f\"");
            }
            other => panic!("unexpected error: {}", other),
        }

        // Postings do not go through the pluggable procedure
        let conn = pipeline.warehouse().connect().unwrap();
        assert_eq!(curated_count(&conn, Entity::FtPostingF), 3);
    }

    #[test]
    fn test_summary_serializes() {
        let (_tmp, mut pipeline) = setup();
        let summary = pipeline.run().unwrap();

        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["tables"][0]["collapsed"], 1);
        assert!(json["tables"][1].get("collapsed").is_none());
    }
}
