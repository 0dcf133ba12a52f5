//! Keel daemon: entry point for running a Keel node.

use std::path::PathBuf;
use std::process;

use anyhow::Context;
use clap::Parser;

use keel_node::{
    dump_node, init_logging, Application, LifecycleEvents, LogFormat, NodeConfig, NodeDbConfig,
    NodeError, StartUpMode, Storage, EXIT_SETUP,
};
use keel_types::Digest;

#[derive(Parser)]
#[command(name = "keel-daemon", about = "Keel ledger node daemon")]
struct Cli {
    /// Path to a TOML configuration file. If provided, file settings
    /// are used as the base; CLI flags and env vars override them.
    #[arg(long, env = "KEEL_CONFIG")]
    config: Option<PathBuf>,

    /// Data directory for the node store.
    #[arg(long, env = "KEEL_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Start-up mode: "normal", "fresh", "network", "load", "load_file"
    /// or "replay".
    #[arg(long, env = "KEEL_START", value_parser = parse_start_mode)]
    start: Option<StartUpMode>,

    /// Ledger to load or replay: "latest", a sequence number or a hash.
    #[arg(long, env = "KEEL_LEDGER")]
    ledger: Option<String>,

    /// Replay the chosen ledger's transactions on top of its parent.
    #[arg(long)]
    replay: bool,

    /// Start from a ledger stored as JSON.
    #[arg(long, env = "KEEL_LOAD_FILE")]
    load_file: Option<PathBuf>,

    /// Copy every object of this node store into ours before starting.
    #[arg(long, env = "KEEL_IMPORT_NODE_DB")]
    import_node_db: Option<PathBuf>,

    /// Print the transaction stored under this node hash, then exit.
    #[arg(long, value_name = "HASH")]
    dump: Option<String>,

    /// Run without peers.
    #[arg(long, env = "KEEL_STANDALONE")]
    standalone: bool,

    /// Log level: "trace", "debug", "info", "warn", "error".
    #[arg(long, env = "KEEL_LOG_LEVEL")]
    log_level: Option<String>,

    /// Log format: "human" or "json".
    #[arg(long, env = "KEEL_LOG_FORMAT")]
    log_format: Option<String>,

    /// Subcommand.
    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand)]
enum Command {
    /// Operate the node.
    #[command(name = "node")]
    Node {
        #[command(subcommand)]
        action: NodeAction,
    },
}

#[derive(clap::Subcommand)]
enum NodeAction {
    /// Run the node until it is stopped, or dump a node with `--dump`.
    Run,
}

fn parse_start_mode(s: &str) -> Result<StartUpMode, String> {
    match s.to_ascii_lowercase().replace('-', "_").as_str() {
        "normal" => Ok(StartUpMode::Normal),
        "fresh" => Ok(StartUpMode::Fresh),
        "network" => Ok(StartUpMode::Network),
        "load" => Ok(StartUpMode::Load),
        "load_file" => Ok(StartUpMode::LoadFile),
        "replay" => Ok(StartUpMode::Replay),
        other => Err(format!("unknown start-up mode '{other}'")),
    }
}

/// File config (or defaults) with CLI flags and env vars layered on top.
fn merge_config(cli: &Cli) -> Result<NodeConfig, NodeError> {
    let mut config = match &cli.config {
        Some(path) => NodeConfig::from_toml_file(&path.to_string_lossy())?,
        None => NodeConfig::default(),
    };
    if let Some(data_dir) = &cli.data_dir {
        config.data_dir = data_dir.clone();
    }
    if let Some(start) = cli.start {
        config.start_up = start;
    }
    if let Some(ledger) = &cli.ledger {
        config.start_ledger = Some(ledger.clone());
        if cli.start.is_none() && config.start_up == StartUpMode::Normal {
            config.start_up = StartUpMode::Load;
        }
    }
    if cli.replay {
        config.start_up = StartUpMode::Replay;
    }
    if let Some(path) = &cli.load_file {
        config.load_file = Some(path.clone());
        config.start_up = StartUpMode::LoadFile;
    }
    if let Some(path) = &cli.import_node_db {
        config.import_node_db = Some(NodeDbConfig {
            path: Some(path.clone()),
            ..config.node_db.clone()
        });
    }
    config.standalone |= cli.standalone;
    if let Some(level) = &cli.log_level {
        config.log_level = level.clone();
    }
    if let Some(format) = &cli.log_format {
        config.log_format = format.clone();
    }
    if let Some(hash) = &cli.dump {
        config.start_up = StartUpMode::Dump;
        config.start_ledger = Some(hash.clone());
    }
    Ok(config)
}

fn dump(config: &NodeConfig) -> anyhow::Result<()> {
    let hash: Digest = config
        .start_ledger
        .as_deref()
        .unwrap_or("")
        .trim()
        .parse()
        .map_err(|_| NodeError::Config("dump needs a 64-digit node hash".into()))?;
    let path = config.resolve_db_path(&config.node_db);
    let storage = Storage::open(&config.node_db, &path)?;
    match dump_node(storage.nodes.as_ref(), &hash)? {
        Some(tx) => println!("{}", serde_json::to_string_pretty(&tx)?),
        None => println!("Node {hash} not found"),
    }
    Ok(())
}

async fn run(config: NodeConfig) -> anyhow::Result<()> {
    tracing::info!(
        data_dir = %config.data_dir.display(),
        start_up = ?config.start_up,
        standalone = config.standalone,
        "Starting Keel node"
    );
    let app = Application::new(config, LifecycleEvents::new())?;
    app.setup()?;
    tokio::spawn(app.stop_signal().listen_for_os_signals());
    app.run().await.context("node shutdown failed")?;
    Ok(())
}

fn exit_code(err: &anyhow::Error) -> i32 {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<NodeError>())
        .map(NodeError::exit_code)
        .unwrap_or(EXIT_SETUP)
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match merge_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("keel-daemon: {e}");
            process::exit(e.exit_code());
        }
    };

    let logging = config
        .log_format
        .parse::<LogFormat>()
        .and_then(|format| init_logging(format, &config.log_level));
    if let Err(e) = logging {
        eprintln!("keel-daemon: {e}");
        process::exit(e.exit_code());
    }

    let Command::Node {
        action: NodeAction::Run,
    } = cli.command;
    let result = match config.start_up {
        StartUpMode::Dump => dump(&config),
        _ => run(config).await,
    };
    if let Err(e) = result {
        tracing::error!(error = %format!("{e:#}"), "keel-daemon exiting");
        process::exit(exit_code(&e));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(args: &[&str]) -> Cli {
        let mut argv = vec!["keel-daemon"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap()
    }

    #[test]
    fn ledger_flag_implies_load() {
        let config = merge_config(&cli(&["--ledger", "42", "node", "run"])).unwrap();
        assert_eq!(config.start_up, StartUpMode::Load);
        assert_eq!(config.start_ledger.as_deref(), Some("42"));
    }

    #[test]
    fn replay_overrides_start_mode() {
        let config =
            merge_config(&cli(&["--start", "fresh", "--replay", "node", "run"])).unwrap();
        assert_eq!(config.start_up, StartUpMode::Replay);
    }

    #[test]
    fn dump_flag_sets_mode_and_hash() {
        let hash = Digest::new([3; 32]).to_hex();
        let config = merge_config(&cli(&["--dump", &hash, "node", "run"])).unwrap();
        assert_eq!(config.start_up, StartUpMode::Dump);
        assert_eq!(config.start_ledger, Some(hash));
    }

    #[test]
    fn unknown_start_mode_is_rejected() {
        assert!(Cli::try_parse_from(["keel-daemon", "--start", "sideways", "node", "run"]).is_err());
        assert_eq!(parse_start_mode("Load-File").unwrap(), StartUpMode::LoadFile);
    }

    #[test]
    fn file_config_is_overridden_by_flags() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keel.toml");
        std::fs::write(&path, "standalone = false\nlog_level = \"warn\"\n").unwrap();
        let config = merge_config(&cli(&[
            "--config",
            path.to_str().unwrap(),
            "--standalone",
            "--log-level",
            "debug",
            "node",
            "run",
        ]))
        .unwrap();
        assert!(config.standalone);
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn missing_config_file_is_a_config_error() {
        let err = merge_config(&cli(&["--config", "/nonexistent/keel.toml", "node", "run"]))
            .unwrap_err();
        assert_eq!(err.exit_code(), keel_node::EXIT_CONFIG);
    }

    #[test]
    fn exit_code_follows_node_error() {
        let err = anyhow::Error::from(NodeError::NotFound("x".into()));
        assert_eq!(exit_code(&err), keel_node::EXIT_LEDGER_LOAD);
        assert_eq!(exit_code(&anyhow::anyhow!("other")), EXIT_SETUP);
    }
}
