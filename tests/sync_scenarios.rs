//! End-to-end sync runs against scripted providers and real sinks

mod common;

use std::sync::Arc;

use common::{ids, test_config, MemorySink, Reply, ScriptedGateway};
use fundsync::config::UpsertPolicy;
use fundsync::db;
use fundsync::provider::StaticUniverse;
use fundsync::sink::{CsvSink, Sink, SqliteSink};
use fundsync::{InstrumentId, RunState, SinkKind, SyncError, SyncOrchestrator};

fn universe(codes: &[&str]) -> Arc<StaticUniverse> {
    Arc::new(StaticUniverse::new(ids(codes)))
}

#[tokio::test]
async fn success_empty_and_failure_are_each_counted_once() {
    let gateway = Arc::new(
        ScriptedGateway::new()
            .script("A", vec![Reply::Data(100.0)])
            .script("B", vec![Reply::Empty])
            .script("C", vec![Reply::Transient]),
    );
    let sink = MemorySink::new(SinkKind::Database);

    let orchestrator = SyncOrchestrator::new(
        test_config(),
        universe(&["A", "B", "C"]),
        gateway.clone(),
        vec![sink.clone()],
    );
    let stats = orchestrator.run().await.unwrap();

    assert_eq!(gateway.calls("C"), 2, "retried up to max_attempts and no further");
    assert_eq!(stats.total_targeted, 3);
    assert_eq!((stats.succeeded, stats.empty, stats.failed), (1, 1, 1));
    assert_eq!(stats.succeeded + stats.empty + stats.failed, stats.total_targeted);
    assert_eq!(stats.fetch_attempts, 4);
    assert_eq!(sink.ids(), vec!["A".to_string()]);
    assert_eq!(orchestrator.state(), RunState::Completed);
}

#[tokio::test]
async fn threshold_flush_then_final_drain() {
    let gateway = Arc::new(
        ScriptedGateway::new()
            .script("A", vec![Reply::Data(1.0)])
            .script("B", vec![Reply::Data(2.0)])
            .script("C", vec![Reply::Data(3.0)]),
    );
    let sink = MemorySink::new(SinkKind::Database);
    let mut config = test_config();
    config.database.batch_size = 2;

    let stats = SyncOrchestrator::new(config, universe(&["A", "B", "C"]), gateway, vec![sink.clone()])
        .run()
        .await
        .unwrap();

    assert_eq!(sink.batch_sizes(), vec![2, 1]);
    assert_eq!(stats.batches_flushed, 2);
}

#[tokio::test]
async fn flaky_database_flush_persists_without_duplicates() {
    let dir = tempfile::tempdir().unwrap();
    let pool = db::open(&dir.path().join("fundamentals.db")).unwrap();
    let sqlite = Arc::new(SqliteSink::new(pool, UpsertPolicy::MergePresent));

    /// Fails twice, then hands through to the real database
    struct Flaky {
        inner: Arc<SqliteSink>,
        gate: Arc<MemorySink>,
    }

    #[async_trait::async_trait]
    impl Sink for Flaky {
        fn kind(&self) -> SinkKind {
            SinkKind::Database
        }

        async fn flush(&self, batch: &[fundsync::FundamentalRecord]) -> fundsync::Result<usize> {
            self.gate.flush(batch).await?;
            self.inner.flush(batch).await
        }
    }

    let gate = MemorySink::flaky(SinkKind::Database, 2);
    let flaky = Arc::new(Flaky { inner: sqlite.clone(), gate: gate.clone() });

    let gateway = Arc::new(
        ScriptedGateway::new()
            .script("sz.000001", vec![Reply::Data(1.0)])
            .script("sz.000002", vec![Reply::Data(2.0)]),
    );
    let mut config = test_config();
    config.database.batch_size = 2;
    config.persist.max_flush_attempts = 3;

    let stats = SyncOrchestrator::new(config, universe(&["sz.000001", "sz.000002"]), gateway, vec![flaky])
        .run()
        .await
        .unwrap();

    assert_eq!(gate.attempts(), 3);
    assert_eq!(stats.persist_failed(), 0);
    assert_eq!(stats.sinks[&SinkKind::Database].persisted, 2);
    assert_eq!(sqlite.count_rows().unwrap(), 2);
}

#[tokio::test]
async fn exhausted_flush_is_reported_as_persist_failure() {
    let sink = MemorySink::flaky(SinkKind::Database, u32::MAX);
    let gateway = Arc::new(ScriptedGateway::new().script("A", vec![Reply::Data(1.0)]));
    let mut config = test_config();
    config.persist.max_flush_attempts = 2;

    let stats = SyncOrchestrator::new(config, universe(&["A"]), gateway, vec![sink.clone()])
        .run()
        .await
        .unwrap();

    assert_eq!(stats.succeeded, 1, "fetch succeeded even though persisting failed");
    assert_eq!(stats.failed, 0);
    assert_eq!(stats.persist_failed(), 1);
    assert_eq!(stats.persist_failures[0].ids, vec![InstrumentId::from("A")]);
    assert_eq!(sink.attempts(), 2);
}

#[tokio::test]
async fn repeated_runs_converge_on_the_same_rows() {
    let dir = tempfile::tempdir().unwrap();
    let pool = db::open(&dir.path().join("fundamentals.db")).unwrap();
    let codes = ["sz.000001", "sz.000002", "sh.600000", "sh.600001"];

    let run = |pool: db::DbPool| async move {
        let gateway = Arc::new(
            ScriptedGateway::new()
                .script("sz.000001", vec![Reply::Data(10.0)])
                .script("sz.000002", vec![Reply::Data(20.0)])
                .script("sh.600000", vec![Reply::Data(30.0)])
                .script("sh.600001", vec![Reply::Empty]),
        );
        let sink = Arc::new(SqliteSink::new(pool, UpsertPolicy::MergePresent));
        SyncOrchestrator::new(test_config(), universe(&codes), gateway, vec![sink])
            .run()
            .await
            .unwrap()
    };

    run(pool.clone()).await;
    let sink = SqliteSink::new(pool.clone(), UpsertPolicy::MergePresent);
    let after_one: Vec<_> = ids(&codes)
        .iter()
        .map(|id| sink.fetch_row(id).unwrap().map(|r| (r.total_share, r.float_share)))
        .collect();

    run(pool.clone()).await;
    let after_two: Vec<_> = ids(&codes)
        .iter()
        .map(|id| sink.fetch_row(id).unwrap().map(|r| (r.total_share, r.float_share)))
        .collect();

    assert_eq!(sink.count_rows().unwrap(), 3);
    assert_eq!(after_one, after_two);
    assert_eq!(after_one[3], None, "empty result never creates a row");
}

#[tokio::test]
async fn dry_run_leaves_sinks_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let pool = db::open(&dir.path().join("fundamentals.db")).unwrap();
    let csv_dir = dir.path().join("csv");
    let tz = chrono_tz::Asia::Shanghai;

    let sqlite = Arc::new(SqliteSink::new(pool, UpsertPolicy::MergePresent));
    let csv = Arc::new(CsvSink::new(&csv_dir, tz));
    let gateway = Arc::new(
        ScriptedGateway::new()
            .script("A", vec![Reply::Data(1.0)])
            .script("B", vec![Reply::Data(2.0)]),
    );

    let mut config = test_config();
    config.dry_run = true;
    config.csv.enabled = true;
    config.csv.output_dir = csv_dir.clone();
    let sinks: Vec<Arc<dyn Sink>> = vec![sqlite.clone(), csv.clone()];

    let stats = SyncOrchestrator::new(config, universe(&["A", "B"]), gateway.clone(), sinks)
        .run()
        .await
        .unwrap();

    assert_eq!(gateway.total_calls(), 2, "dry run still fetches");
    assert_eq!(stats.succeeded, 2);
    assert_eq!(stats.batches_flushed, 0);
    assert_eq!(stats.sinks[&SinkKind::Csv].discarded, 2);
    assert_eq!(stats.sinks[&SinkKind::Database].discarded, 2);
    assert_eq!(sqlite.count_rows().unwrap(), 0);
    assert!(!csv.current_path().exists());
}

#[tokio::test]
async fn zero_instrument_universe_completes_immediately() {
    let gateway = Arc::new(ScriptedGateway::new());
    let orchestrator = SyncOrchestrator::new(
        test_config(),
        universe(&[]),
        gateway.clone(),
        vec![MemorySink::new(SinkKind::Database)],
    );

    let stats = orchestrator.run().await.unwrap();
    assert_eq!(orchestrator.state(), RunState::Completed);
    assert_eq!(stats.total_targeted, 0);
    assert_eq!((stats.succeeded, stats.empty, stats.failed, stats.batches_flushed), (0, 0, 0, 0));
    assert_eq!(gateway.total_calls(), 0);
}

#[tokio::test]
async fn session_error_aborts_but_keeps_fetched_records() {
    let mut gateway = ScriptedGateway::new().script("A", vec![Reply::Data(1.0)]);
    gateway = gateway.script("B", vec![Reply::Session]);
    let codes: Vec<String> = (0..50).map(|i| format!("Z{:02}", i)).collect();
    for code in &codes {
        gateway = gateway.script(code, vec![Reply::Data(5.0)]);
    }
    let gateway = Arc::new(gateway);

    let mut universe_codes = vec!["A", "B"];
    universe_codes.extend(codes.iter().map(String::as_str));

    let sink = MemorySink::new(SinkKind::Database);
    let mut config = test_config();
    config.workers = 1;
    let orchestrator = SyncOrchestrator::new(config, universe(&universe_codes), gateway.clone(), vec![sink.clone()]);

    let err = orchestrator.run().await.unwrap_err();
    assert!(matches!(err, SyncError::Session(_)));
    assert!(err.is_fatal());
    assert_eq!(orchestrator.state(), RunState::Failed);
    assert_eq!(gateway.calls("Z00"), 0, "no fetch after the session broke");
    assert_eq!(sink.ids(), vec!["A".to_string()], "already fetched record still flushed");
}

#[tokio::test]
async fn permanent_errors_do_not_retry_or_block_others() {
    let gateway = Arc::new(
        ScriptedGateway::new()
            .script("BAD", vec![Reply::Permanent])
            .script("OK1", vec![Reply::Data(1.0)])
            .script("OK2", vec![Reply::Transient, Reply::Data(2.0)]),
    );
    let sink = MemorySink::new(SinkKind::Database);
    let mut config = test_config();
    config.max_attempts = 5;

    let stats = SyncOrchestrator::new(config, universe(&["BAD", "OK1", "OK2"]), gateway.clone(), vec![sink.clone()])
        .run()
        .await
        .unwrap();

    assert_eq!(gateway.calls("BAD"), 1);
    assert_eq!(gateway.calls("OK2"), 2);
    assert_eq!((stats.succeeded, stats.failed), (2, 1));
    assert_eq!(stats.fetch_failures[0].id, InstrumentId::from("BAD"));
}

#[tokio::test]
async fn csv_and_database_sinks_both_receive_records() {
    let dir = tempfile::tempdir().unwrap();
    let pool = db::open(&dir.path().join("fundamentals.db")).unwrap();
    let sqlite = Arc::new(SqliteSink::new(pool, UpsertPolicy::MergePresent));
    let csv = Arc::new(CsvSink::new(dir.path().join("csv"), chrono_tz::Asia::Shanghai));

    let codes: Vec<String> = (0..25).map(|i| format!("sz.{:06}", i)).collect();
    let mut gateway = ScriptedGateway::new();
    for (i, code) in codes.iter().enumerate() {
        gateway = gateway.script(code, vec![Reply::Data(i as f64)]);
    }

    let mut config = test_config();
    config.workers = 4;
    config.csv.enabled = true;
    config.csv.batch_size = 10;
    config.database.batch_size = 7;
    let sinks: Vec<Arc<dyn Sink>> = vec![csv.clone(), sqlite.clone()];
    let codes_ref: Vec<&str> = codes.iter().map(String::as_str).collect();

    let stats = SyncOrchestrator::new(config, universe(&codes_ref), Arc::new(gateway), sinks)
        .run()
        .await
        .unwrap();

    assert_eq!(stats.sinks[&SinkKind::Csv].batches, 3);
    assert_eq!(stats.sinks[&SinkKind::Database].batches, 4);
    assert_eq!(sqlite.count_rows().unwrap(), 25);
    let rows = fundsync::sink::csv::read_rows(&csv.current_path()).unwrap();
    assert_eq!(rows.len(), 25);

    // the report lists the day file once, and only the file sink has files
    assert_eq!(stats.sinks[&SinkKind::Csv].files, vec![csv.current_path()]);
    assert!(stats.sinks[&SinkKind::Database].files.is_empty());
    assert_eq!(stats.provider_calls, 25);
    assert!(stats.summary().contains("[csv] flush time"));
}
