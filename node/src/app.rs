//! The node's composition root.
//!
//! [`Application`] declares every long-lived service to a
//! [`ServiceRegistry`], builds them in dependency order, and hands the
//! lifecycle components to a [`LifecycleManager`]. `setup` installs the
//! starting ledger; `run` starts the components, waits for a stop request
//! and shuts everything down in reverse order.

use std::sync::Arc;
use std::time::Duration;

use keel_ledger::{
    CacheLimits, Family, Ledger, LedgerAcquirer, LedgerFetcher, NoPeers, StateEntry, Sweepable,
    TaggedCache,
};
use keel_store::NodeObject;
use keel_types::{Clock, Digest, SystemClock};

use crate::bootstrap::{BootstrapPlan, LedgerBootstrapper};
use crate::config::NodeConfig;
use crate::events::LifecycleEvents;
use crate::hash_router::{HashRouter, HOLD_TIME};
use crate::inbound::{InboundLedgers, InboundTxSets};
use crate::job_queue::JobQueue;
use crate::ledger_master::LedgerMaster;
use crate::lifecycle::{LifecycleManager, Phase};
use crate::manifests::ManifestCache;
use crate::metrics::NodeMetrics;
use crate::network_ops::{NetworkOps, OperatingMode};
use crate::registry::ServiceRegistry;
use crate::shutdown::StopSignal;
use crate::storage::Storage;
use crate::sweep::{fs2_free_space, DiskWatchdog, FreeSpace, SweepCoordinator};
use crate::validations::Validations;
use crate::NodeError;

fn secs(s: u64) -> Duration {
    Duration::from_secs(s)
}

/// The outside-world pieces an [`Application`] is built on.
pub struct AppParts {
    pub storage: Storage,
    pub clock: Arc<dyn Clock>,
    pub fetcher: Arc<dyn LedgerFetcher>,
    pub free_space: FreeSpace,
}

impl AppParts {
    /// Production parts: the configured node store, the system clock, no
    /// peers and the filesystem's free-space query.
    pub fn from_config(config: &NodeConfig) -> Result<Self, NodeError> {
        let path = config.resolve_db_path(&config.node_db);
        Ok(Self {
            storage: Storage::open(&config.node_db, &path)?,
            clock: Arc::new(SystemClock),
            fetcher: Arc::new(NoPeers),
            free_space: fs2_free_space(),
        })
    }
}

pub struct Application {
    config: NodeConfig,
    events: Arc<LifecycleEvents>,
    lifecycle: LifecycleManager,
    stop: StopSignal,
    storage: Storage,
    clock: Arc<dyn Clock>,
    metrics: Arc<NodeMetrics>,
    family: Arc<Family>,
    cached_entries: Arc<TaggedCache<Digest, StateEntry>>,
    temp_nodes: Arc<TaggedCache<Digest, NodeObject>>,
    job_queue: Arc<JobQueue>,
    ledger_master: Arc<LedgerMaster>,
    inbound_ledgers: Arc<InboundLedgers>,
    inbound_tx_sets: Arc<InboundTxSets>,
    hash_router: Arc<HashRouter>,
    manifests: Arc<ManifestCache>,
    validations: Arc<Validations>,
    network_ops: Arc<NetworkOps>,
    sweep: Arc<SweepCoordinator>,
    construction_order: Vec<&'static str>,
}

impl Application {
    pub fn new(config: NodeConfig, events: LifecycleEvents) -> Result<Self, NodeError> {
        let parts = AppParts::from_config(&config)?;
        Self::with_parts(config, events, parts)
    }

    pub fn with_parts(
        config: NodeConfig,
        events: LifecycleEvents,
        parts: AppParts,
    ) -> Result<Self, NodeError> {
        let stop = StopSignal::new();
        let storage = parts.storage.clone();
        let services = declare(&config, parts, stop.clone()).build()?;
        tracing::debug!(order = ?services.construction_order(), "services built");

        let family: Arc<Family> = services.get("family")?;
        let job_queue: Arc<JobQueue> = services.get("job_queue")?;
        let ledger_master: Arc<LedgerMaster> = services.get("ledger_master")?;
        let inbound_ledgers: Arc<InboundLedgers> = services.get("inbound_ledgers")?;
        family.recovery().bind(
            Arc::clone(&ledger_master) as _,
            Arc::clone(&inbound_ledgers) as _,
            Arc::clone(&job_queue) as _,
        );

        let events = Arc::new(events);
        let mut lifecycle = LifecycleManager::new(Arc::clone(&events));
        for component in services.components() {
            lifecycle.add(Arc::clone(component));
        }

        Ok(Self {
            clock: services.get("time_keeper")?,
            metrics: services.get("metrics")?,
            cached_entries: services.get("cached_entries")?,
            temp_nodes: services.get("temp_node_cache")?,
            inbound_tx_sets: services.get("inbound_tx_sets")?,
            hash_router: services.get("hash_router")?,
            manifests: services.get("manifests")?,
            validations: services.get("validations")?,
            network_ops: services.get("network_ops")?,
            sweep: services.get("sweep_coordinator")?,
            construction_order: services.construction_order().to_vec(),
            config,
            events,
            lifecycle,
            stop,
            storage,
            family,
            job_queue,
            ledger_master,
            inbound_ledgers,
        })
    }

    /// Import another node store if configured, notify setup subscribers,
    /// then install the starting ledger. Returns that ledger.
    pub fn setup(&self) -> Result<Arc<Ledger>, NodeError> {
        self.import_node_db()?;
        self.events.emit_setup()?;

        let plan = BootstrapPlan::from_config(&self.config)?;
        if let BootstrapPlan::Dump(_) = plan {
            return Err(NodeError::Config(
                "dump runs without starting the node".into(),
            ));
        }
        let bootstrapper = LedgerBootstrapper::new(
            Arc::clone(&self.family),
            Arc::clone(&self.storage.ledgers),
            Arc::clone(&self.inbound_ledgers) as Arc<dyn LedgerAcquirer>,
            Arc::clone(&self.ledger_master),
            Arc::clone(&self.network_ops),
            Arc::clone(&self.hash_router),
            Arc::clone(&self.inbound_tx_sets),
            Arc::clone(&self.clock),
        );
        let ledger = bootstrapper.run(&plan)?;

        let cache = &self.config.cache;
        self.ledger_master.tune(
            cache.ledger_history_size,
            secs(cache.ledger_history_age_secs),
        );
        if self.config.standalone {
            self.network_ops.set_standalone();
        }
        tracing::info!(
            seq = ledger.seq(),
            hash = %ledger.hash(),
            standalone = self.config.standalone,
            "setup complete"
        );
        Ok(ledger)
    }

    fn import_node_db(&self) -> Result<(), NodeError> {
        let Some(import) = &self.config.import_node_db else {
            return Ok(());
        };
        let path = self.config.resolve_db_path(import);
        let source = Storage::open(import, &path)?;
        tracing::info!(
            from = %path.display(),
            to = self.storage.nodes.name(),
            "importing node store"
        );
        let count = self.storage.nodes.import(source.nodes.as_ref())?;
        self.storage.sync()?;
        tracing::info!(count, "node store import finished");
        Ok(())
    }

    /// Start every component, wait for a stop request, then stop them in
    /// reverse order and flush storage. A stop forced by low disk space is
    /// reported as [`NodeError::ResourceExhaustion`] once shutdown is done.
    pub async fn run(&self) -> Result<(), NodeError> {
        self.lifecycle.prepare()?;
        self.lifecycle.start().await?;
        tracing::info!("node running");

        self.stop.wait().await;
        tracing::info!("node stopping");
        self.lifecycle.stop().await?;
        self.storage.sync()?;
        tracing::info!("node stopped");
        match self.sweep.watchdog().and_then(|watchdog| watchdog.exhaustion()) {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Request a stop. Only the first request has any effect.
    pub fn signal_stop(&self, reason: &str) -> bool {
        self.stop.signal_stop(reason)
    }

    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    pub fn is_shutdown(&self) -> bool {
        self.lifecycle.phase() >= Phase::Stopping
    }

    /// Whether a load balancer should send clients here, and if not why.
    pub fn server_okay(&self) -> Result<(), String> {
        if !self.config.elb_support {
            return Ok(());
        }
        if self.is_shutdown() || self.stop.is_stopped() {
            return Err("Server is shutting down".into());
        }
        if self.network_ops.is_need_network_ledger() {
            return Err("Not synchronized with network yet".into());
        }
        if self.network_ops.mode() < OperatingMode::Syncing {
            return Err("Not synchronized with network".into());
        }
        self.ledger_master.is_caught_up()
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn lifecycle(&self) -> &LifecycleManager {
        &self.lifecycle
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn metrics(&self) -> &Arc<NodeMetrics> {
        &self.metrics
    }

    pub fn family(&self) -> &Arc<Family> {
        &self.family
    }

    pub fn cached_entries(&self) -> &Arc<TaggedCache<Digest, StateEntry>> {
        &self.cached_entries
    }

    pub fn temp_nodes(&self) -> &Arc<TaggedCache<Digest, NodeObject>> {
        &self.temp_nodes
    }

    pub fn job_queue(&self) -> &Arc<JobQueue> {
        &self.job_queue
    }

    pub fn ledger_master(&self) -> &Arc<LedgerMaster> {
        &self.ledger_master
    }

    pub fn inbound_ledgers(&self) -> &Arc<InboundLedgers> {
        &self.inbound_ledgers
    }

    pub fn inbound_tx_sets(&self) -> &Arc<InboundTxSets> {
        &self.inbound_tx_sets
    }

    pub fn hash_router(&self) -> &Arc<HashRouter> {
        &self.hash_router
    }

    pub fn manifests(&self) -> &Arc<ManifestCache> {
        &self.manifests
    }

    pub fn validations(&self) -> &Arc<Validations> {
        &self.validations
    }

    pub fn network_ops(&self) -> &Arc<NetworkOps> {
        &self.network_ops
    }

    pub fn sweep(&self) -> &Arc<SweepCoordinator> {
        &self.sweep
    }

    pub fn construction_order(&self) -> &[&'static str] {
        &self.construction_order
    }
}

fn declare(config: &NodeConfig, parts: AppParts, stop: StopSignal) -> ServiceRegistry {
    let AppParts {
        storage,
        clock,
        fetcher,
        free_space,
    } = parts;
    let cache = config.cache.clone();
    let job_threads = config.job_threads;
    let acquire_timeout = config.acquire_timeout();
    let first_sweep = config.first_sweep();
    let sweep_interval = config.sweep_interval();
    let disk_check_interval = config.disk_check_interval();
    let min_free_disk = config.min_free_disk_bytes;
    let data_dir = config.data_dir.clone();

    let mut registry = ServiceRegistry::new();
    registry
        .provide("time_keeper", &[], move |_| Ok(clock))
        .provide("metrics", &[], |_| Ok(Arc::new(NodeMetrics::new()?)))
        .provide("node_store", &[], move |_| Ok(storage));

    let limits = cache.clone();
    registry.provide("family", &["node_store"], move |deps| {
        let storage: Storage = deps.get("node_store")?;
        Ok(Arc::new(Family::new(
            "node",
            storage.nodes,
            CacheLimits::new(limits.tree_size, secs(limits.tree_age_secs)),
            CacheLimits::new(limits.full_below_size, secs(limits.full_below_age_secs)),
        )))
    });

    let limits = cache.clone();
    registry.provide("cached_entries", &[], move |_| {
        Ok(Arc::new(TaggedCache::<Digest, StateEntry>::new(
            "cached_entries",
            limits.entry_cache_size,
            secs(limits.entry_cache_age_secs),
        )))
    });
    registry.provide("temp_node_cache", &[], move |_| {
        Ok(Arc::new(TaggedCache::<Digest, NodeObject>::new(
            "temp_node_cache",
            cache.temp_nodes_size,
            secs(cache.temp_nodes_age_secs),
        )))
    });

    registry.provide_component("job_queue", &["metrics"], move |deps| {
        Ok(Arc::new(JobQueue::new(job_threads, deps.get("metrics")?)))
    });

    registry.provide(
        "ledger_master",
        &["node_store", "time_keeper", "metrics"],
        |deps| {
            let storage: Storage = deps.get("node_store")?;
            Ok(Arc::new(LedgerMaster::new(
                storage.nodes,
                storage.ledgers,
                deps.get("time_keeper")?,
                deps.get("metrics")?,
            )))
        },
    );

    registry.provide(
        "inbound_ledgers",
        &["family", "job_queue", "metrics"],
        move |deps| {
            let queue: Arc<JobQueue> = deps.get("job_queue")?;
            Ok(Arc::new(InboundLedgers::new(
                deps.get("family")?,
                fetcher,
                queue,
                deps.get("metrics")?,
                acquire_timeout,
            )))
        },
    );
    registry
        .provide("inbound_tx_sets", &[], |_| {
            Ok(Arc::new(InboundTxSets::default()))
        })
        .provide("hash_router", &[], |_| Ok(Arc::new(HashRouter::new(HOLD_TIME))));

    registry.provide_component("manifests", &["node_store"], |deps| {
        let storage: Storage = deps.get("node_store")?;
        Ok(Arc::new(ManifestCache::load(storage.meta)?))
    });
    // Depending on manifests makes validations stop, and flush, first.
    registry.provide_component("validations", &["manifests", "node_store"], |deps| {
        let storage: Storage = deps.get("node_store")?;
        Ok(Arc::new(Validations::new(deps.get("manifests")?, storage.meta)))
    });

    registry.provide("network_ops", &[], |_| Ok(Arc::new(NetworkOps::new())));

    registry.provide_component(
        "sweep_coordinator",
        &[
            "job_queue",
            "metrics",
            "family",
            "cached_entries",
            "temp_node_cache",
            "ledger_master",
            "inbound_ledgers",
            "inbound_tx_sets",
            "hash_router",
            "validations",
        ],
        move |deps| {
            let metrics: Arc<NodeMetrics> = deps.get("metrics")?;
            let queue: Arc<JobQueue> = deps.get("job_queue")?;
            let family: Arc<Family> = deps.get("family")?;
            let watchdog = Arc::new(DiskWatchdog::new(
                data_dir,
                min_free_disk,
                free_space,
                stop,
                Arc::clone(&metrics),
            ));
            let sweep = SweepCoordinator::new(queue, first_sweep, sweep_interval, metrics)
                .with_recovery(family.recovery().clone())
                .with_watchdog(watchdog, disk_check_interval);

            let caches: Vec<Arc<dyn Sweepable>> = vec![
                Arc::clone(family.full_below()) as _,
                Arc::clone(family.tree_nodes()) as _,
                deps.get::<Arc<TaggedCache<Digest, NodeObject>>>("temp_node_cache")? as _,
                deps.get::<Arc<LedgerMaster>>("ledger_master")? as _,
                deps.get::<Arc<InboundLedgers>>("inbound_ledgers")? as _,
                deps.get::<Arc<InboundTxSets>>("inbound_tx_sets")? as _,
                deps.get::<Arc<HashRouter>>("hash_router")? as _,
                deps.get::<Arc<Validations>>("validations")? as _,
                deps.get::<Arc<TaggedCache<Digest, StateEntry>>>("cached_entries")? as _,
            ];
            for cache in caches {
                sweep.register(cache);
            }
            Ok(Arc::new(sweep))
        },
    );
    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_nullables::{NullClock, NullFetcher};
    use keel_types::NETWORK_EPOCH_OFFSET;

    use crate::config::StartUpMode;

    fn parts(clock: Arc<NullClock>) -> AppParts {
        AppParts {
            storage: Storage::memory(),
            clock,
            fetcher: Arc::new(NullFetcher::new()),
            free_space: Arc::new(|_: &std::path::Path| -> std::io::Result<u64> { Ok(u64::MAX) }),
        }
    }

    fn app(config: NodeConfig) -> (Application, Arc<NullClock>) {
        let clock = Arc::new(NullClock::new(NETWORK_EPOCH_OFFSET + 10_000));
        let app = Application::with_parts(config, LifecycleEvents::new(), parts(Arc::clone(&clock)))
            .unwrap();
        (app, clock)
    }

    #[test]
    fn components_follow_dependency_order() {
        let (app, _) = app(NodeConfig::default());
        let order = app.construction_order();
        let pos = |name: &str| order.iter().position(|n| *n == name).unwrap();
        assert!(pos("job_queue") < pos("manifests"));
        assert!(pos("manifests") < pos("validations"));
        assert!(pos("validations") < pos("sweep_coordinator"));
        let components: Vec<String> = app
            .lifecycle()
            .child_phases()
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        assert_eq!(
            components,
            vec!["job_queue", "manifests", "validations", "sweep_coordinator"]
        );
    }

    #[test]
    fn recovery_is_bound_after_build() {
        let (app, _) = app(NodeConfig::default());
        assert!(app.family().recovery().is_bound());
        assert_eq!(app.sweep().cache_names().len(), 9);
    }

    #[test]
    fn setup_failure_stops_before_bootstrap() {
        let mut events = LifecycleEvents::new();
        events.on_setup("refuses", Box::new(|| Err("no".to_string())));
        let clock = Arc::new(NullClock::new(NETWORK_EPOCH_OFFSET));
        let app = Application::with_parts(NodeConfig::default(), events, parts(clock)).unwrap();
        assert!(matches!(app.setup(), Err(NodeError::Setup { .. })));
        assert!(app.ledger_master().closed_ledger().is_none());
    }

    #[test]
    fn dump_is_not_a_start_up() {
        let config = NodeConfig {
            start_up: StartUpMode::Dump,
            start_ledger: Some(Digest::new([1; 32]).to_hex()),
            ..NodeConfig::default()
        };
        let (app, _) = app(config);
        assert!(matches!(app.setup(), Err(NodeError::Config(_))));
    }

    #[test]
    fn server_okay_reasons() {
        let config = NodeConfig {
            elb_support: true,
            start_up: StartUpMode::Network,
            ..NodeConfig::default()
        };
        let (app, clock) = app(config);
        app.setup().unwrap();
        assert_eq!(
            app.server_okay().unwrap_err(),
            "Not synchronized with network yet"
        );

        app.network_ops().clear_need_network_ledger();
        assert_eq!(
            app.server_okay().unwrap_err(),
            "Not synchronized with network"
        );

        app.network_ops().set_mode(OperatingMode::Full);
        assert_eq!(
            app.server_okay().unwrap_err(),
            "No recently-validated ledger"
        );

        let closed = app.ledger_master().closed_ledger().unwrap();
        app.ledger_master().force_valid(closed);
        assert!(app.server_okay().is_ok());

        clock.advance(3_600);
        assert!(app.server_okay().is_err());

        app.signal_stop("test");
        clock.set(NETWORK_EPOCH_OFFSET + 10_000);
        assert_eq!(app.server_okay().unwrap_err(), "Server is shutting down");
    }

    #[test]
    fn server_okay_without_elb_support() {
        let (app, _) = app(NodeConfig::default());
        assert!(app.server_okay().is_ok());
    }
}
