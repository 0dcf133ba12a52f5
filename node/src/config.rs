//! Node configuration with TOML file support.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::NodeError;

/// How the node obtains its first ledger.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartUpMode {
    /// Start from a fresh genesis ledger.
    #[default]
    Normal,
    Fresh,
    /// Genesis, then sync from the network.
    Network,
    /// Load a stored ledger named by `start_ledger`.
    Load,
    /// Import a ledger from the JSON file at `load_file`.
    LoadFile,
    /// Load `start_ledger` and queue its transactions for re-application.
    Replay,
    /// Print the transaction stored under `start_ledger` and exit.
    Dump,
}

/// Storage engine behind the node store.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeDbBackend {
    #[default]
    Lmdb,
    Memory,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeDbConfig {
    #[serde(default)]
    pub backend: NodeDbBackend,

    /// Database directory. Relative to `data_dir` when not absolute;
    /// defaults to `<data_dir>/nodedb`.
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// LMDB map size in bytes.
    #[serde(default = "default_map_size")]
    pub map_size: usize,
}

/// Target sizes (entry counts, 0 = unbounded) and ages of the node caches.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_tree_size")]
    pub tree_size: usize,
    #[serde(default = "default_tree_age_secs")]
    pub tree_age_secs: u64,

    #[serde(default = "default_full_below_size")]
    pub full_below_size: usize,
    #[serde(default = "default_full_below_age_secs")]
    pub full_below_age_secs: u64,

    #[serde(default = "default_ledger_history_size")]
    pub ledger_history_size: usize,
    #[serde(default = "default_ledger_history_age_secs")]
    pub ledger_history_age_secs: u64,

    #[serde(default = "default_temp_nodes_size")]
    pub temp_nodes_size: usize,
    #[serde(default = "default_temp_nodes_age_secs")]
    pub temp_nodes_age_secs: u64,

    #[serde(default = "default_entry_cache_size")]
    pub entry_cache_size: usize,
    #[serde(default = "default_entry_cache_age_secs")]
    pub entry_cache_age_secs: u64,
}

/// Configuration for a Keel node.
///
/// Can be loaded from a TOML file via [`NodeConfig::from_toml_file`] or
/// built programmatically (e.g. for tests).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Data directory for ledger storage.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    #[serde(default)]
    pub node_db: NodeDbConfig,

    /// Copy every object of this store into `node_db` during setup.
    #[serde(default)]
    pub import_node_db: Option<NodeDbConfig>,

    /// Run without peers.
    #[serde(default)]
    pub standalone: bool,

    #[serde(default)]
    pub start_up: StartUpMode,

    /// Ledger to load: "latest", a 64-character hash, or a sequence.
    /// For `dump`, the hash of the node to print.
    #[serde(default)]
    pub start_ledger: Option<String>,

    /// JSON ledger file for `load_file`.
    #[serde(default)]
    pub load_file: Option<PathBuf>,

    /// Delay before the first sweep.
    #[serde(default = "default_first_sweep_secs")]
    pub first_sweep_secs: u64,

    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    #[serde(default = "default_disk_check_interval_secs")]
    pub disk_check_interval_secs: u64,

    /// Below this many free bytes on the data directory the node stops.
    #[serde(default = "default_min_free_disk_bytes")]
    pub min_free_disk_bytes: u64,

    #[serde(default)]
    pub cache: CacheConfig,

    /// How long a blocking ledger acquisition waits on peers.
    #[serde(default = "default_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,

    /// Background job worker count.
    #[serde(default = "default_job_threads")]
    pub job_threads: usize,

    /// Report health to an external load balancer.
    #[serde(default)]
    pub elb_support: bool,

    /// Log format: "human" or "json".
    #[serde(default = "default_log_format")]
    pub log_format: String,

    /// Log level filter: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

// ── Serde default helpers ──────────────────────────────────────────────

fn default_data_dir() -> PathBuf {
    PathBuf::from("./keel_data")
}

fn default_map_size() -> usize {
    1 << 30
}

fn default_tree_size() -> usize {
    16_384
}

fn default_tree_age_secs() -> u64 {
    90
}

fn default_full_below_size() -> usize {
    524_288
}

fn default_full_below_age_secs() -> u64 {
    600
}

fn default_ledger_history_size() -> usize {
    256
}

fn default_ledger_history_age_secs() -> u64 {
    180
}

fn default_temp_nodes_size() -> usize {
    4_096
}

fn default_temp_nodes_age_secs() -> u64 {
    90
}

fn default_entry_cache_size() -> usize {
    8_192
}

fn default_entry_cache_age_secs() -> u64 {
    60
}

fn default_first_sweep_secs() -> u64 {
    10
}

fn default_sweep_interval_secs() -> u64 {
    60
}

fn default_disk_check_interval_secs() -> u64 {
    20
}

fn default_min_free_disk_bytes() -> u64 {
    512 * 1024 * 1024
}

fn default_acquire_timeout_secs() -> u64 {
    30
}

fn default_job_threads() -> usize {
    2
}

fn default_log_format() -> String {
    "human".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

// ── Impl ───────────────────────────────────────────────────────────────

impl NodeConfig {
    /// Load configuration from a TOML file.
    pub fn from_toml_file(path: &str) -> Result<Self, NodeError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| NodeError::Config(e.to_string()))?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml_str(s: &str) -> Result<Self, NodeError> {
        toml::from_str(s).map_err(|e| NodeError::Config(e.to_string()))
    }

    /// Serialize the configuration to a TOML string.
    pub fn to_toml_string(&self) -> Result<String, NodeError> {
        toml::to_string_pretty(self).map_err(|e| NodeError::Config(e.to_string()))
    }

    /// Where `db` lives on disk.
    pub fn resolve_db_path(&self, db: &NodeDbConfig) -> PathBuf {
        match &db.path {
            Some(path) if path.is_absolute() => path.clone(),
            Some(path) => self.data_dir.join(path),
            None => self.data_dir.join("nodedb"),
        }
    }

    pub fn first_sweep(&self) -> Duration {
        Duration::from_secs(self.first_sweep_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn disk_check_interval(&self) -> Duration {
        Duration::from_secs(self.disk_check_interval_secs)
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }
}

impl Default for NodeDbConfig {
    fn default() -> Self {
        Self {
            backend: NodeDbBackend::default(),
            path: None,
            map_size: default_map_size(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            tree_size: default_tree_size(),
            tree_age_secs: default_tree_age_secs(),
            full_below_size: default_full_below_size(),
            full_below_age_secs: default_full_below_age_secs(),
            ledger_history_size: default_ledger_history_size(),
            ledger_history_age_secs: default_ledger_history_age_secs(),
            temp_nodes_size: default_temp_nodes_size(),
            temp_nodes_age_secs: default_temp_nodes_age_secs(),
            entry_cache_size: default_entry_cache_size(),
            entry_cache_age_secs: default_entry_cache_age_secs(),
        }
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            node_db: NodeDbConfig::default(),
            import_node_db: None,
            standalone: false,
            start_up: StartUpMode::default(),
            start_ledger: None,
            load_file: None,
            first_sweep_secs: default_first_sweep_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            disk_check_interval_secs: default_disk_check_interval_secs(),
            min_free_disk_bytes: default_min_free_disk_bytes(),
            cache: CacheConfig::default(),
            acquire_timeout_secs: default_acquire_timeout_secs(),
            job_threads: default_job_threads(),
            elb_support: false,
            log_format: default_log_format(),
            log_level: default_log_level(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_round_trips_through_toml() {
        let config = NodeConfig::default();
        let toml_str = config.to_toml_string().expect("serializable");
        let parsed = NodeConfig::from_toml_str(&toml_str).expect("should parse");
        assert_eq!(parsed.sweep_interval_secs, config.sweep_interval_secs);
        assert_eq!(parsed.cache, config.cache);
        assert_eq!(parsed.node_db, config.node_db);
    }

    #[test]
    fn minimal_toml_uses_defaults() {
        let config = NodeConfig::from_toml_str("").expect("empty toml should use defaults");
        assert_eq!(config.start_up, StartUpMode::Normal);
        assert_eq!(config.sweep_interval_secs, 60);
        assert_eq!(config.first_sweep_secs, 10);
        assert_eq!(config.min_free_disk_bytes, 512 * 1024 * 1024);
        assert_eq!(config.log_format, "human");
        assert_eq!(config.node_db.backend, NodeDbBackend::Lmdb);
    }

    #[test]
    fn partial_toml_overrides() {
        let toml = r#"
            standalone = true
            start_up = "load_file"
            load_file = "ledger.json"

            [node_db]
            backend = "memory"

            [cache]
            ledger_history_size = 8
        "#;
        let config = NodeConfig::from_toml_str(toml).expect("should parse");
        assert!(config.standalone);
        assert_eq!(config.start_up, StartUpMode::LoadFile);
        assert_eq!(config.load_file, Some(PathBuf::from("ledger.json")));
        assert_eq!(config.node_db.backend, NodeDbBackend::Memory);
        assert_eq!(config.cache.ledger_history_size, 8);
        assert_eq!(config.cache.tree_size, 16_384); // default
    }

    #[test]
    fn unknown_start_up_mode_is_rejected() {
        let err = NodeConfig::from_toml_str(r#"start_up = "sideways""#).unwrap_err();
        assert!(matches!(err, NodeError::Config(_)));
    }

    #[test]
    fn db_path_resolves_against_data_dir() {
        let config = NodeConfig {
            data_dir: PathBuf::from("/var/keel"),
            ..NodeConfig::default()
        };
        assert_eq!(
            config.resolve_db_path(&config.node_db),
            PathBuf::from("/var/keel/nodedb")
        );
        let relative = NodeDbConfig {
            path: Some(PathBuf::from("import")),
            ..NodeDbConfig::default()
        };
        assert_eq!(
            config.resolve_db_path(&relative),
            PathBuf::from("/var/keel/import")
        );
    }

    #[test]
    fn missing_file_returns_config_error() {
        let result = NodeConfig::from_toml_file("/nonexistent/keel.toml");
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert!(matches!(err, NodeError::Config(_)));
    }
}
