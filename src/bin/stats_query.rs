//! One-shot range query across the hot and cold tiers
//!
//! Usage:
//!   stats_query --from 2024-01-01 --to 2024-01-31 [--method card]
//!
//! Reads the same stores as `pipeline_runtime` (see `AppConfig::from_env`)
//! and prints the merged `{day: {type: {method: amount}}}` tree as JSON.
//! Live counters are only visible with `TXFLOW_HOT_BACKEND=sqlite`.

use serde_json::json;
use std::sync::Arc;
use txflow::config::{AppConfig, HotBackend};
use txflow::pipeline::types::parse_day;
use txflow::stats::get_stats;
use txflow::store::{HotStore, KeyDesign, MemoryHotStore, SqliteColdStore, SqliteHotStore};

struct QueryArgs {
    from: String,
    to: String,
    method: Option<String>,
}

fn arg_value(args: &[String], flag: &str) -> Option<String> {
    args.windows(2).find(|w| w[0] == flag).map(|w| w[1].clone())
}

fn parse_args() -> Result<QueryArgs, Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();
    let usage = "Usage: stats_query --from YYYY-MM-DD --to YYYY-MM-DD [--method <payment_method>]";

    Ok(QueryArgs {
        from: arg_value(&args, "--from").ok_or(format!("Missing --from argument. {}", usage))?,
        to: arg_value(&args, "--to").ok_or(format!("Missing --to argument. {}", usage))?,
        method: arg_value(&args, "--method"),
    })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"))
        .target(env_logger::Target::Stderr)
        .init();

    let args = parse_args()?;
    let config = AppConfig::from_env()?;
    let keys = KeyDesign::new(config.key_prefix.clone());

    let hot: Arc<dyn HotStore> = match config.hot_backend {
        HotBackend::Sqlite => Arc::new(SqliteHotStore::open(&config.hot_db_path, keys)?),
        HotBackend::Memory => {
            log::warn!("⚠️  Hot tier is process-local (memory); only flushed data is visible");
            Arc::new(MemoryHotStore::new(keys))
        }
    };
    let cold = Arc::new(SqliteColdStore::open(&config.db_path)?);
    let merger = txflow::pipeline::QueryMerger::new(hot, cold.clone(), config.cutoff);

    let response = match get_stats(&merger, &args.from, &args.to).await {
        Ok(response) => response,
        Err(e) => {
            eprintln!("error ({}): {}", e.status_code(), e);
            std::process::exit(2);
        }
    };

    let output = match args.method {
        None => serde_json::to_value(&response)?,
        Some(method) => {
            let merged_total: f64 = response
                .data
                .values()
                .flat_map(|by_type| by_type.values())
                .filter_map(|by_method| by_method.get(&method))
                .sum();
            let (from, to) = (parse_day(&args.from)?, parse_day(&args.to)?);
            let flushed_total = cold.total_by_payment_method(&method, from, to, None)?;

            json!({
                "payment_method": method,
                "total": merged_total,
                "flushed_total": flushed_total,
                "partial": response.partial,
                "data": response.data,
            })
        }
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
