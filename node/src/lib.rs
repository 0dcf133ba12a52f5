//! Keel node core: brings a node up, keeps it running and takes it down.
//!
//! The node:
//! - Builds its long-lived services from a dependency graph
//! - Installs a starting ledger (genesis, stored, acquired, imported or replayed)
//! - Sweeps caches periodically and stops itself when disk space runs out
//! - Recovers ledger data found missing during traversal
//! - Shuts components down in reverse construction order

pub mod app;
pub mod bootstrap;
pub mod config;
pub mod dump;
pub mod error;
pub mod events;
pub mod hash_router;
pub mod inbound;
pub mod job_queue;
pub mod ledger_master;
pub mod lifecycle;
pub mod logging;
pub mod manifests;
pub mod metrics;
pub mod network_ops;
pub mod registry;
pub mod shutdown;
pub mod storage;
pub mod sweep;
pub mod validations;

pub use app::{AppParts, Application};
pub use bootstrap::{parse_ledger_id, BootstrapPlan, LedgerBootstrapper, LedgerFile, LedgerId};
pub use config::{CacheConfig, NodeConfig, NodeDbBackend, NodeDbConfig, StartUpMode};
pub use dump::dump_node;
pub use error::{NodeError, EXIT_CONFIG, EXIT_LEDGER_LOAD, EXIT_SETUP};
pub use events::LifecycleEvents;
pub use hash_router::HashRouter;
pub use inbound::{InboundLedger, InboundLedgers, InboundTxSets};
pub use job_queue::JobQueue;
pub use ledger_master::LedgerMaster;
pub use lifecycle::{Component, LifecycleManager, Phase};
pub use logging::{init_logging, LogFormat};
pub use manifests::{Manifest, ManifestCache};
pub use metrics::NodeMetrics;
pub use network_ops::{NetworkOps, OperatingMode};
pub use registry::{Deps, ServiceRegistry, Services};
pub use shutdown::StopSignal;
pub use storage::Storage;
pub use sweep::{DiskWatchdog, SweepCoordinator};
pub use validations::{Validation, Validations};
