//! Integration tests that bring a whole node up: storage → service graph →
//! ledger bootstrap → lifecycle → shutdown.
//!
//! Unit tests cover each service with nullables; these wire the real
//! composition root together, over LMDB where persistence matters.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use keel_ledger::{create_genesis_ledger, CacheLimits, Family};
use keel_node::{
    AppParts, Application, LifecycleEvents, NodeConfig, NodeDbBackend, NodeDbConfig, NodeError,
    Phase, StartUpMode, Storage, EXIT_LEDGER_LOAD, EXIT_SETUP,
};
use keel_nullables::{NullClock, NullFetcher};
use keel_store::{LedgerIndex, NodeStore};
use keel_types::NETWORK_EPOCH_OFFSET;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn lmdb_config(dir: &Path, start_up: StartUpMode) -> NodeConfig {
    NodeConfig {
        data_dir: dir.to_path_buf(),
        node_db: NodeDbConfig {
            backend: NodeDbBackend::Lmdb,
            path: None,
            map_size: 64 * 1024 * 1024,
        },
        start_up,
        ..NodeConfig::default()
    }
}

fn memory_parts(free_disk: u64) -> AppParts {
    AppParts {
        storage: Storage::memory(),
        clock: Arc::new(NullClock::new(NETWORK_EPOCH_OFFSET + 50_000)),
        fetcher: Arc::new(NullFetcher::new()),
        free_space: Arc::new(move |_: &Path| -> std::io::Result<u64> { Ok(free_disk) }),
    }
}

fn start(config: NodeConfig) -> Application {
    Application::new(config, LifecycleEvents::new()).expect("build application")
}

// ---------------------------------------------------------------------------
// Ledger bootstrap over LMDB
// ---------------------------------------------------------------------------

#[test]
fn fresh_start_is_reloaded_as_latest() {
    let dir = tempfile::tempdir().unwrap();

    let fresh = start(lmdb_config(dir.path(), StartUpMode::Fresh));
    let first = fresh.setup().unwrap();
    assert_eq!(first.seq(), 2);
    drop(first);
    drop(fresh);

    let loaded = start(lmdb_config(dir.path(), StartUpMode::Load));
    let ledger = loaded.setup().unwrap();
    assert_eq!(ledger.seq(), 2);
    assert!(ledger.is_validated());
    assert_eq!(loaded.ledger_master().ledger_range(), Some((2, 2)));
    assert_eq!(
        loaded.ledger_master().closed_ledger().unwrap().hash(),
        ledger.hash()
    );
}

#[test]
fn load_by_sequence_and_hash() {
    let dir = tempfile::tempdir().unwrap();
    let genesis_hash = {
        let fresh = start(lmdb_config(dir.path(), StartUpMode::Fresh));
        fresh.setup().unwrap();
        fresh
            .storage()
            .ledgers
            .load_by_sequence(1)
            .unwrap()
            .expect("genesis indexed")
            .hash
    };

    let mut config = lmdb_config(dir.path(), StartUpMode::Load);
    config.start_ledger = Some("1".into());
    {
        let app = start(config.clone());
        assert_eq!(app.setup().unwrap().hash(), genesis_hash);
    }

    config.start_ledger = Some(genesis_hash.to_hex());
    let app = start(config);
    let ledger = app.setup().unwrap();
    assert_eq!(ledger.seq(), 1);
    assert!(app.inbound_ledgers().active_count() == 0);
}

#[test]
fn missing_ledger_exits_with_load_failure() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = lmdb_config(dir.path(), StartUpMode::Load);
    config.start_ledger = Some("99".into());
    let app = start(config);
    let err = app.setup().unwrap_err();
    assert!(matches!(err, NodeError::NotFound(_)));
    assert_eq!(err.exit_code(), EXIT_LEDGER_LOAD);
}

#[test]
fn invalid_ledger_id_is_rejected_before_loading() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = lmdb_config(dir.path(), StartUpMode::Load);
    config.start_ledger = Some("yesterday".into());
    let app = start(config);
    assert!(matches!(app.setup(), Err(NodeError::Parse(_))));
    assert!(app.ledger_master().closed_ledger().is_none());
}

#[test]
fn imported_node_store_serves_ledger_by_hash() {
    let dir = tempfile::tempdir().unwrap();
    let import_path: PathBuf = dir.path().join("old_nodes");
    let import = NodeDbConfig {
        backend: NodeDbBackend::Lmdb,
        path: Some(import_path.clone()),
        map_size: 16 * 1024 * 1024,
    };

    let genesis_hash = {
        let source = Storage::open(&import, &import_path).unwrap();
        let family = Arc::new(Family::new(
            "import",
            Arc::clone(&source.nodes),
            CacheLimits::new(0, Duration::from_secs(60)),
            CacheLimits::new(0, Duration::from_secs(60)),
        ));
        let genesis = create_genesis_ledger(&family).unwrap();
        source.nodes.store(genesis.to_node_object().unwrap()).unwrap();
        source.sync().unwrap();
        genesis.hash()
    };

    let config = NodeConfig {
        data_dir: dir.path().to_path_buf(),
        node_db: NodeDbConfig {
            backend: NodeDbBackend::Memory,
            ..NodeDbConfig::default()
        },
        import_node_db: Some(import),
        start_up: StartUpMode::Load,
        start_ledger: Some(genesis_hash.to_hex()),
        ..NodeConfig::default()
    };
    let app = start(config);
    let ledger = app.setup().unwrap();
    assert_eq!(ledger.hash(), genesis_hash);
    assert!(app.storage().nodes.fetch(&genesis_hash).unwrap().is_some());
}

#[test]
fn load_file_start_installs_imported_ledger() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ledger.json");
    let key = keel_ledger::account_root_key("carol");
    std::fs::write(
        &path,
        serde_json::json!({
            "ledger": {
                "ledger_index": 40,
                "close_time": 9000,
                "accountState": [
                    {"index": key.to_hex(), "LedgerEntryType": "AccountRoot", "Account": "carol"}
                ]
            }
        })
        .to_string(),
    )
    .unwrap();

    let config = NodeConfig {
        data_dir: dir.path().to_path_buf(),
        start_up: StartUpMode::LoadFile,
        load_file: Some(path),
        ..NodeConfig::default()
    };
    let app = Application::with_parts(config, LifecycleEvents::new(), memory_parts(u64::MAX))
        .unwrap();
    let ledger = app.setup().unwrap();
    assert_eq!(ledger.seq(), 40);
    assert!(ledger.read_entry(&key).unwrap().is_some());
    assert_eq!(app.network_ops().last_close_time(), ledger.close_time());
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn run_returns_after_stop_request() {
    let config = NodeConfig {
        standalone: true,
        ..NodeConfig::default()
    };
    let app = Application::with_parts(config, LifecycleEvents::new(), memory_parts(u64::MAX))
        .unwrap();
    app.setup().unwrap();
    assert!(app.network_ops().is_standalone());

    let stop = app.stop_signal();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(5)).await;
        stop.signal_stop("test finished");
    });
    app.run().await.unwrap();

    assert_eq!(app.lifecycle().phase(), Phase::Stopped);
    assert!(app
        .lifecycle()
        .child_phases()
        .iter()
        .all(|(_, phase)| *phase == Phase::Stopped));
    assert!(app.is_shutdown());
    assert!(!app.job_queue().is_accepting());
}

#[tokio::test(start_paused = true)]
async fn low_disk_space_stops_the_node() {
    let dir = tempfile::tempdir().unwrap();
    let config = NodeConfig {
        data_dir: dir.path().to_path_buf(),
        disk_check_interval_secs: 20,
        ..NodeConfig::default()
    };
    let app = Application::with_parts(config, LifecycleEvents::new(), memory_parts(1024)).unwrap();
    app.setup().unwrap();

    let err = app.run().await.unwrap_err();
    assert!(matches!(err, NodeError::ResourceExhaustion(_)));
    assert_eq!(err.exit_code(), EXIT_SETUP);

    let watchdog = app.sweep().watchdog().expect("watchdog installed");
    assert_eq!(watchdog.signals_issued(), 1);
    assert_eq!(app.stop_signal().requests(), 1);
    assert_eq!(app.lifecycle().phase(), Phase::Stopped);
}

#[tokio::test(start_paused = true)]
async fn shutdown_listeners_run_once_on_stop() {
    use std::sync::atomic::{AtomicUsize, Ordering};

    let calls = Arc::new(AtomicUsize::new(0));
    let mut events = LifecycleEvents::new();
    let seen = Arc::clone(&calls);
    events.on_shutdown(
        "counter",
        Box::new(move || {
            seen.fetch_add(1, Ordering::SeqCst);
        }),
    );
    let app = Application::with_parts(NodeConfig::default(), events, memory_parts(u64::MAX))
        .unwrap();
    app.setup().unwrap();
    app.signal_stop("before run");
    assert!(!app.signal_stop("again"));

    app.run().await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(app.lifecycle().stop().await.is_err());
}
