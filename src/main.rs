use anyhow::{Context, Result};
use std::time::Instant;

use bank_etl::{init_logging, Config, Pipeline};

fn main() -> Result<()> {
    let config = Config::load().context("Failed to load configuration")?;
    init_logging(&config.logging)?;

    println!("🏦 Load started");
    let started = Instant::now();

    let mut pipeline = Pipeline::new(&config);
    if config.provision_schema {
        pipeline
            .provision_schema()
            .context("Failed to provision warehouse schema")?;
    }

    let summary = pipeline.run().context("Load failed")?;

    tracing::info!(summary = %serde_json::to_string(&summary)?, "Run summary");
    for table in &summary.tables {
        println!(
            "✓ {:<22} read {:>7}  staged {:>7}  curated {:>8}",
            table.table, table.rows_read, table.rows_in_staging, table.curated_total
        );
    }

    println!(
        "✅ Load finished (run {}) in {:.3}s",
        summary.run_id,
        started.elapsed().as_secs_f64()
    );

    Ok(())
}
