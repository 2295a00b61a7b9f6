//! End-to-end tests: CSV → queue → aggregator → hot tier → flusher → cold tier → query

use chrono::{TimeZone, Utc};
use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::tempdir;
use txflow::config::{AppConfig, HotBackend};
use txflow::pipeline::{
    flush_once, run_aggregator, run_producer, CancellationFlag, CutoffOffset, FatalError,
    FatalHandler, LogAndContinue, MalformedLinePolicy, QueryMerger, RetryPolicy, SqliteQueue,
    TransactionQueue,
};
use txflow::pipeline::types::{parse_day, AggregateKey, TransactionType};
use txflow::runtime::{spawn_pipeline, ShutdownOutcome, Stores};
use txflow::stats::StatsResponse;
use txflow::store::{
    scan_aggregates, HotStore, KeyDesign, MemoryHotStore, SqliteColdStore, SqliteHotStore,
};

const HEADER: &str = "timestamp,type,payment_method,amount,replay_delay_ms";

fn write_csv(dir: &std::path::Path, lines: &[&str]) -> std::path::PathBuf {
    let path = dir.join("transactions.csv");
    let mut file = std::fs::File::create(&path).unwrap();
    writeln!(file, "{}", HEADER).unwrap();
    for line in lines {
        writeln!(file, "{}", line).unwrap();
    }
    path
}

/// Collects fatal escalations instead of exiting
#[derive(Default)]
struct RecordFatal(Mutex<Vec<String>>);

impl FatalHandler for RecordFatal {
    fn on_fatal(&self, error: &FatalError) {
        self.0.lock().unwrap().push(error.to_string());
    }
}

async fn drain(queue: &SqliteQueue, hot: &dyn HotStore) -> u64 {
    let cancel = CancellationFlag::new();
    let stopper = cancel.clone();
    let depth = queue.len().await.unwrap();

    // Aggregator stops itself once everything queued so far is applied
    let watcher = async {
        loop {
            if queue.len().await.unwrap() == 0 {
                tokio::time::sleep(Duration::from_millis(50)).await;
                stopper.request_cancel();
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    };
    let (applied, _) = tokio::join!(
        run_aggregator(queue, hot, Duration::from_millis(20), &cancel),
        watcher
    );

    let applied = applied.unwrap();
    assert_eq!(applied, depth);
    applied
}

#[tokio::test]
async fn test_end_to_end_example() {
    let dir = tempdir().unwrap();
    let csv = write_csv(
        dir.path(),
        &[
            "2024-01-01T00:00:00Z, deposits, card, 100.0, 0",
            "2024-01-01T00:05:00Z, deposits, cash, 50.0, 0",
        ],
    );

    let queue = SqliteQueue::open(dir.path().join("txflow.db"), "transactions").unwrap();
    let hot = Arc::new(MemoryHotStore::new(KeyDesign::default()));
    let cold = Arc::new(SqliteColdStore::open(dir.path().join("txflow.db")).unwrap());

    let summary = run_producer(&csv, &queue, MalformedLinePolicy::Abort, &CancellationFlag::new())
        .await
        .unwrap();
    assert_eq!(summary.pushed, 2);
    drain(&queue, hot.as_ref()).await;

    let key = AggregateKey::new(parse_day("2024-01-01").unwrap(), TransactionType::Deposit);
    let values = hot.get_many(&[hot.key_design().key_for(&key)]).await.unwrap();
    assert_eq!(values[0].len(), 2);
    assert_eq!(values[0]["card"], 100.0);
    assert_eq!(values[0]["cash"], 50.0);

    let flushed = flush_once(hot.as_ref(), cold.as_ref(), Utc::now()).await.unwrap().unwrap();
    assert_eq!(flushed.inserted, 1);

    let doc = cold.get(key.day, key.tx_type).unwrap().unwrap();
    assert_eq!(doc.total_amount, values[0]);
    assert!(doc.last_updated.is_some());

    // Query from a vantage point where 2024-01-01 is well past the cutoff
    let merger = QueryMerger::new(hot.clone(), cold.clone(), CutoffOffset::default());
    let now_midnight = Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap();
    let day = parse_day("2024-01-01").unwrap();
    let merged = merger.query_at(day, day, now_midnight).await;

    assert_eq!(merged.hot_rows, 0);
    assert_eq!(merged.cold_rows, 1);

    let response: StatsResponse = merged.into();
    assert_eq!(
        serde_json::to_value(&response).unwrap(),
        serde_json::json!({
            "data": { "2024-01-01": { "deposits": { "card": 100.0, "cash": 50.0 } } },
            "partial": false
        })
    );
}

#[tokio::test]
async fn test_accumulation_is_exact() {
    let dir = tempdir().unwrap();
    let lines: Vec<String> = (0..50)
        .map(|i| format!("2024-03-01T00:{:02}:00Z,withdrawals,crypto,0.25,0", i))
        .collect();
    let refs: Vec<&str> = lines.iter().map(String::as_str).collect();
    let csv = write_csv(dir.path(), &refs);

    let queue = SqliteQueue::open(dir.path().join("txflow.db"), "transactions").unwrap();
    let hot = SqliteHotStore::open(dir.path().join("hot.db"), KeyDesign::default()).unwrap();

    run_producer(&csv, &queue, MalformedLinePolicy::Abort, &CancellationFlag::new())
        .await
        .unwrap();
    drain(&queue, &hot).await;

    let aggregates = scan_aggregates(&hot, &["agg:2024-03-01:withdrawals".to_string()])
        .await
        .unwrap();
    assert_eq!(aggregates.len(), 1);
    assert_eq!(aggregates[0].total_amount["crypto"], 12.5);
}

#[tokio::test]
async fn test_tier_partition_after_flush() {
    let dir = tempdir().unwrap();
    let hot = Arc::new(MemoryHotStore::new(KeyDesign::default()));
    let cold = Arc::new(SqliteColdStore::open(dir.path().join("cold.db")).unwrap());

    let seeded = [
        ("2024-01-07", 1.0),
        ("2024-01-08", 2.0),
        ("2024-01-09", 3.0),
        ("2024-01-10", 4.0),
    ];
    for (day, amount) in seeded {
        let key = AggregateKey::new(parse_day(day).unwrap(), TransactionType::Deposit);
        hot.increment(&key, "card", amount).await.unwrap();
    }
    flush_once(hot.as_ref(), cold.as_ref(), Utc::now()).await.unwrap();

    // Hot keeps growing after the flush; only hot-side days may reflect it
    for day in ["2024-01-08", "2024-01-09"] {
        let key = AggregateKey::new(parse_day(day).unwrap(), TransactionType::Deposit);
        hot.increment(&key, "card", 100.0).await.unwrap();
    }

    let merger = QueryMerger::new(hot.clone(), cold.clone(), CutoffOffset::default());
    let now_midnight = Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap(); // cutoff day 2024-01-09
    let d = |s: &str| parse_day(s).unwrap();

    let cold_only = merger.query_at(d("2024-01-07"), d("2024-01-08"), now_midnight).await;
    assert_eq!((cold_only.hot_rows, cold_only.cold_rows), (0, 2));
    assert_eq!(cold_only.data["2024-01-08"]["deposits"]["card"], 2.0);

    let hot_only = merger.query_at(d("2024-01-09"), d("2024-01-10"), now_midnight).await;
    assert_eq!((hot_only.hot_rows, hot_only.cold_rows), (2, 0));
    assert_eq!(hot_only.data["2024-01-09"]["deposits"]["card"], 103.0);

    let straddle = merger.query_at(d("2024-01-07"), d("2024-01-10"), now_midnight).await;
    assert_eq!(straddle.hot_rows + straddle.cold_rows, straddle.data.len());
    assert_eq!(straddle.data.len(), 4);
    assert_eq!(straddle.data["2024-01-08"]["deposits"]["card"], 2.0);
    assert_eq!(straddle.data["2024-01-09"]["deposits"]["card"], 103.0);
}

#[tokio::test]
async fn test_runtime_processes_log_and_shuts_down_gracefully() {
    let dir = tempdir().unwrap();
    let csv = write_csv(
        dir.path(),
        &[
            "2024-01-01T00:00:00Z,deposits,card,100.0,0",
            "2024-01-01T00:05:00Z,deposits,cash,50.0,0",
            "2024-01-02T12:00:00Z,withdrawals,card,20.0,0",
        ],
    );

    let config = AppConfig {
        csv_path: csv,
        db_path: dir.path().join("txflow.db"),
        hot_backend: HotBackend::Sqlite,
        hot_db_path: dir.path().join("hot.db"),
        queue_pop_timeout: Duration::from_millis(50),
        flush_interval: Duration::from_millis(100),
        ..AppConfig::default()
    };

    let stores = Stores::open(&config).unwrap();
    let cancel = CancellationFlag::new();
    let mut tasks = spawn_pipeline(&config, &stores, &cancel, Arc::new(LogAndContinue));
    assert_eq!(tasks.len(), 3);

    // Wait for the flusher to have copied both keys
    let day1 = parse_day("2024-01-01").unwrap();
    let day2 = parse_day("2024-01-02").unwrap();
    let mut flushed = false;
    for _ in 0..100 {
        let d1 = stores.cold.get(day1, TransactionType::Deposit).unwrap();
        let d2 = stores.cold.get(day2, TransactionType::Withdrawal).unwrap();
        if let (Some(d1), Some(_)) = (d1, d2) {
            if d1.total_amount.len() == 2 {
                flushed = true;
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(flushed, "cold tier never received the flushed aggregates");

    let outcome = tasks
        .graceful_shutdown(
            &cancel,
            Duration::from_secs(5),
            Duration::from_secs(1),
            std::future::pending(),
        )
        .await;
    assert_eq!(outcome, ShutdownOutcome::Completed);

    // Reopening the same files sees the same data
    let reopened = Stores::open(&config).unwrap();
    let merger = reopened.query_merger(config.cutoff);
    let merged = merger
        .query_at(day1, day2, Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap())
        .await;
    assert_eq!(merged.data["2024-01-01"]["deposits"]["cash"], 50.0);
    assert_eq!(merged.data["2024-01-02"]["withdrawals"]["card"], 20.0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_flusher_runs_during_ingestion_on_shared_file() {
    let dir = tempdir().unwrap();
    let lines: Vec<String> = (0..2000)
        .map(|i| format!("2024-01-01T00:00:{:02}Z,deposits,card,1.0,0", i % 60))
        .collect();
    let refs: Vec<&str> = lines.iter().map(String::as_str).collect();
    let csv = write_csv(dir.path(), &refs);

    // Queue and cold tier share txflow.db, as in production
    let config = AppConfig {
        csv_path: csv,
        db_path: dir.path().join("txflow.db"),
        hot_backend: HotBackend::Sqlite,
        hot_db_path: dir.path().join("hot.db"),
        queue_pop_timeout: Duration::from_millis(50),
        flush_interval: Duration::from_millis(5),
        ..AppConfig::default()
    };

    let stores = Stores::open(&config).unwrap();
    let cancel = CancellationFlag::new();
    let fatal = Arc::new(RecordFatal::default());
    let mut tasks = spawn_pipeline(&config, &stores, &cancel, fatal.clone());

    let day = parse_day("2024-01-01").unwrap();
    let mut total = 0.0;
    for _ in 0..400 {
        if let Some(doc) = stores.cold.get(day, TransactionType::Deposit).unwrap() {
            total = doc.total_amount["card"];
            if total == 2000.0 {
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    let outcome = tasks
        .graceful_shutdown(
            &cancel,
            Duration::from_secs(5),
            Duration::from_secs(1),
            std::future::pending(),
        )
        .await;

    let escalations = fatal.0.lock().unwrap().clone();
    assert!(escalations.is_empty(), "fatal escalations: {:?}", escalations);
    assert_eq!(total, 2000.0);
    assert_eq!(outcome, ShutdownOutcome::Completed);
}

#[tokio::test]
async fn test_shutdown_interrupts_retry_backoff() {
    let dir = tempdir().unwrap();

    // The producer fails immediately on the missing log and backs off
    let config = AppConfig {
        csv_path: dir.path().join("missing.csv"),
        db_path: dir.path().join("txflow.db"),
        hot_backend: HotBackend::Memory,
        queue_pop_timeout: Duration::from_millis(50),
        flush_interval: Duration::from_millis(100),
        retry: RetryPolicy {
            min_wait: Duration::from_secs(5),
            max_wait: Duration::from_secs(10),
            ..RetryPolicy::default()
        },
        ..AppConfig::default()
    };

    let stores = Stores::open(&config).unwrap();
    let cancel = CancellationFlag::new();
    let fatal = Arc::new(RecordFatal::default());
    let mut tasks = spawn_pipeline(&config, &stores, &cancel, fatal.clone());

    tokio::time::sleep(Duration::from_millis(200)).await;

    let outcome = tasks
        .graceful_shutdown(
            &cancel,
            Duration::from_secs(1),
            Duration::from_millis(500),
            std::future::pending(),
        )
        .await;

    assert_eq!(outcome, ShutdownOutcome::Completed);
    assert!(fatal.0.lock().unwrap().is_empty());
}
