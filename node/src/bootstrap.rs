//! Chooses and installs the ledger the node starts from.
//!
//! Depending on the start-up mode this is a fresh genesis chain, a ledger
//! already in the local store (found by hash, sequence, or as the most
//! recent one), a ledger acquired from the network, or a ledger imported
//! from a JSON file. A replay start also queues the transactions of the
//! chosen ledger to be applied again on top of its parent.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;

use keel_ledger::{
    create_genesis_ledger, AcquireReason, Family, LeafKind, Ledger, LedgerAcquirer, LedgerHeader,
    OpenLedger, ReplayManifest, StateEntry, TreeBuilder, DEFAULT_CLOSE_RESOLUTION,
};
use keel_store::{LedgerIndex, LedgerRecord};
use keel_types::{Clock, Digest, LedgerSeq, NetTime};

use crate::config::{NodeConfig, StartUpMode};
use crate::hash_router::{HashRouter, SF_SIGGOOD};
use crate::inbound::{InboundLedger, InboundTxSets};
use crate::ledger_master::LedgerMaster;
use crate::network_ops::NetworkOps;
use crate::NodeError;

/// Missing nodes reported when a candidate ledger is incomplete.
const MAX_MISSING_REPORTED: usize = 16;

/// Which stored ledger to load.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LedgerId {
    Latest,
    Hash(Digest),
    Seq(LedgerSeq),
}

impl fmt::Display for LedgerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LedgerId::Latest => f.write_str("latest"),
            LedgerId::Hash(hash) => write!(f, "{hash}"),
            LedgerId::Seq(seq) => write!(f, "{seq}"),
        }
    }
}

/// Parse a ledger identifier: empty or `latest`, a 64-digit hex hash, or a
/// decimal sequence number.
pub fn parse_ledger_id(s: &str) -> Result<LedgerId, NodeError> {
    let s = s.trim();
    let invalid = || NodeError::Parse(format!("Ledger specified '{s}' is not valid"));
    if s.is_empty() || s.eq_ignore_ascii_case("latest") {
        return Ok(LedgerId::Latest);
    }
    if s.len() == 64 {
        return Digest::from_hex(s).map(LedgerId::Hash).map_err(|_| invalid());
    }
    s.parse::<LedgerSeq>().map(LedgerId::Seq).map_err(|_| invalid())
}

/// What the bootstrapper is asked to do, derived from the start-up mode.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BootstrapPlan {
    Genesis { need_network_ledger: bool },
    Load { id: LedgerId, replay: bool },
    LoadFile(PathBuf),
    Dump(Digest),
}

impl BootstrapPlan {
    pub fn from_config(config: &NodeConfig) -> Result<Self, NodeError> {
        let start_ledger = config.start_ledger.as_deref().unwrap_or("");
        match config.start_up {
            StartUpMode::Normal | StartUpMode::Fresh => Ok(BootstrapPlan::Genesis {
                need_network_ledger: false,
            }),
            StartUpMode::Network => Ok(BootstrapPlan::Genesis {
                need_network_ledger: !config.standalone,
            }),
            StartUpMode::Load => Ok(BootstrapPlan::Load {
                id: parse_ledger_id(start_ledger)?,
                replay: false,
            }),
            StartUpMode::Replay => Ok(BootstrapPlan::Load {
                id: parse_ledger_id(start_ledger)?,
                replay: true,
            }),
            StartUpMode::LoadFile => config
                .load_file
                .clone()
                .map(BootstrapPlan::LoadFile)
                .ok_or_else(|| NodeError::Config("load_file start-up needs a ledger file".into())),
            StartUpMode::Dump => Digest::from_hex(start_ledger.trim())
                .map(BootstrapPlan::Dump)
                .map_err(|_| {
                    NodeError::Config(format!("dump needs a node hash, got '{start_ledger}'"))
                }),
        }
    }
}

/// Header values and state entries read from a ledger JSON file.
#[derive(Clone, Debug, PartialEq)]
pub struct LedgerFile {
    pub seq: LedgerSeq,
    pub close_time: NetTime,
    pub close_time_resolution: u32,
    pub close_time_estimated: bool,
    pub total_coins: u64,
    pub total_coins_vbc: u64,
    pub entries: Vec<Value>,
}

impl LedgerFile {
    /// Read a ledger document. The ledger may be wrapped in `result` and
    /// then `ledger`; with an `accountState` member the header fields sit
    /// beside it, otherwise the document itself is the state array.
    /// Missing header fields keep their defaults and `now` as close time.
    pub fn parse(mut doc: Value, now: NetTime) -> Result<Self, NodeError> {
        if let Some(result) = doc.get_mut("result").map(Value::take) {
            doc = result;
        }
        if let Some(ledger) = doc.get_mut("ledger").map(Value::take) {
            doc = ledger;
        }

        let mut file = LedgerFile {
            seq: 1,
            close_time: now,
            close_time_resolution: DEFAULT_CLOSE_RESOLUTION,
            close_time_estimated: false,
            total_coins: 0,
            total_coins_vbc: 0,
            entries: Vec::new(),
        };

        let state = match doc.get_mut("accountState").map(Value::take) {
            Some(state) => {
                if let Some(v) = doc.get("ledger_index") {
                    file.seq = json_u32(v, "ledger_index")?;
                }
                if let Some(v) = doc.get("close_time") {
                    file.close_time = NetTime::new(json_u32(v, "close_time")?);
                }
                if let Some(v) = doc.get("close_time_resolution") {
                    file.close_time_resolution = json_u32(v, "close_time_resolution")?;
                }
                if let Some(v) = doc.get("close_time_estimated") {
                    file.close_time_estimated = v.as_bool().ok_or_else(|| {
                        NodeError::Parse("close_time_estimated is not a boolean".into())
                    })?;
                }
                if let Some(v) = doc.get("total_coins") {
                    file.total_coins = json_u64(v, "total_coins")?;
                }
                if let Some(v) = doc.get("total_coins_vbc").or_else(|| doc.get("total_coinsVBC")) {
                    file.total_coins_vbc = json_u64(v, "total_coins_vbc")?;
                }
                state
            }
            None => doc,
        };

        let Value::Array(entries) = state else {
            return Err(NodeError::Parse("State nodes must be an array".into()));
        };
        file.entries = entries;
        Ok(file)
    }

    /// Write the state tree to `family`'s store and build the closed,
    /// accepted ledger over it. Malformed or duplicate entries are skipped.
    pub fn build(self, family: &Arc<Family>) -> Result<Ledger, NodeError> {
        let mut state = TreeBuilder::new(LeafKind::State);
        let mut skipped = 0usize;
        for entry in self.entries {
            let entry = match state_entry(entry) {
                Ok(entry) => entry,
                Err(reason) => {
                    tracing::warn!(%reason, "Invalid entry in ledger");
                    skipped += 1;
                    continue;
                }
            };
            if state.contains(&entry.key()) {
                tracing::warn!(key = %entry.key(), "Couldn't add serialized ledger");
                skipped += 1;
                continue;
            }
            state.insert(entry.key(), entry.encode()?);
        }

        let header = LedgerHeader {
            close_time_resolution: self.close_time_resolution,
            ..LedgerHeader::empty(self.seq)
        };
        let mut ledger = Ledger::new(header, Arc::clone(family));
        ledger.set_state_root(state.flush(family.store().as_ref())?)?;
        ledger.set_total_coins(self.total_coins, self.total_coins_vbc)?;
        ledger.set_closed()?;
        ledger.set_accepted(
            self.close_time,
            self.close_time_resolution,
            !self.close_time_estimated,
        )?;
        tracing::info!(
            seq = ledger.seq(),
            entries = state.len(),
            skipped,
            "ledger read from file"
        );
        Ok(ledger)
    }
}

fn json_u64(value: &Value, field: &str) -> Result<u64, NodeError> {
    let parsed = match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| NodeError::Parse(format!("{field} is not a valid number: {value}")))
}

fn json_u32(value: &Value, field: &str) -> Result<u32, NodeError> {
    u32::try_from(json_u64(value, field)?)
        .map_err(|_| NodeError::Parse(format!("{field} is out of range: {value}")))
}

fn state_entry(entry: Value) -> Result<StateEntry, String> {
    let Value::Object(mut body) = entry else {
        return Err("entry is not an object".into());
    };
    let index = body.remove("index").ok_or("entry has no index")?;
    let key = index
        .as_str()
        .and_then(|s| Digest::from_hex(s).ok())
        .ok_or_else(|| format!("index {index} is not a hash"))?;
    StateEntry::from_json(key, Value::Object(body)).map_err(|e| e.to_string())
}

/// A ledger being considered for start-up, with the hash it was stored
/// under when that is known.
struct Candidate {
    ledger: Arc<Ledger>,
    claimed: Option<Digest>,
}

/// Runs a [`BootstrapPlan`] against the node's services.
pub struct LedgerBootstrapper {
    family: Arc<Family>,
    index: Arc<dyn LedgerIndex>,
    acquirer: Arc<dyn LedgerAcquirer>,
    ledger_master: Arc<LedgerMaster>,
    network_ops: Arc<NetworkOps>,
    hash_router: Arc<HashRouter>,
    tx_sets: Arc<InboundTxSets>,
    clock: Arc<dyn Clock>,
}

impl LedgerBootstrapper {
    pub fn new(
        family: Arc<Family>,
        index: Arc<dyn LedgerIndex>,
        acquirer: Arc<dyn LedgerAcquirer>,
        ledger_master: Arc<LedgerMaster>,
        network_ops: Arc<NetworkOps>,
        hash_router: Arc<HashRouter>,
        tx_sets: Arc<InboundTxSets>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            family,
            index,
            acquirer,
            ledger_master,
            network_ops,
            hash_router,
            tx_sets,
            clock,
        }
    }

    /// Install the starting ledger and return it. It becomes the last
    /// closed and validated ledger with an open ledger on top.
    pub fn run(&self, plan: &BootstrapPlan) -> Result<Arc<Ledger>, NodeError> {
        let result = match plan {
            BootstrapPlan::Genesis {
                need_network_ledger,
            } => self.start_genesis(*need_network_ledger),
            BootstrapPlan::Load { id, replay } => self.load_old_ledger(*id, *replay),
            BootstrapPlan::LoadFile(path) => self.load_ledger_file(path),
            BootstrapPlan::Dump(_) => Err(NodeError::Config(
                "dump does not start from a ledger".into(),
            )),
        };
        if let Err(e) = &result {
            tracing::error!(error = %e, "ledger bootstrap failed");
        }
        result
    }

    fn start_genesis(&self, need_network_ledger: bool) -> Result<Arc<Ledger>, NodeError> {
        let genesis = Arc::new(create_genesis_ledger(&self.family)?);
        self.ledger_master.store_ledger(Arc::clone(&genesis))?;

        let mut next = genesis.successor(self.clock.close_time())?;
        next.set_immutable();
        let next = Arc::new(next);
        self.network_ops.set_last_close_time(next.close_time());
        self.open_on(&next)?;
        self.ledger_master.switch_lcl(Arc::clone(&next))?;

        if need_network_ledger {
            self.network_ops.set_need_network_ledger();
        }
        tracing::info!(
            genesis = %genesis.hash(),
            seq = next.seq(),
            need_network_ledger,
            "started from genesis"
        );
        Ok(next)
    }

    fn load_old_ledger(&self, id: LedgerId, replay: bool) -> Result<Arc<Ledger>, NodeError> {
        tracing::info!(ledger = %id, replay, "loading ledger");
        let candidate = match id {
            LedgerId::Latest => self.latest()?,
            LedgerId::Hash(hash) => self.by_hash(hash)?,
            LedgerId::Seq(seq) => self.by_seq(seq)?,
        };
        let Some(candidate) = candidate else {
            tracing::error!("No ledger found from ledgerID={id}");
            return Err(NodeError::NotFound(format!(
                "no ledger found from ledger id {id}"
            )));
        };

        let (anchor, source) = if replay {
            self.validate(&candidate)?;
            let source = candidate.ledger;
            let Some(parent) = self.by_hash(source.parent_hash())? else {
                tracing::error!(parent = %source.parent_hash(), "Replay ledger missing/damaged");
                return Err(NodeError::StorageIntegrity(
                    "replay ledger missing/damaged".into(),
                ));
            };
            (parent, Some(source))
        } else {
            (candidate, None)
        };

        self.validate(&anchor)?;
        let ledger = anchor.ledger;
        tracing::info!(seq = ledger.seq(), hash = %ledger.hash(), "Loading ledger");
        self.install(&ledger)?;
        if let Some(source) = source {
            self.queue_replay(source, Arc::clone(&ledger))?;
        }
        Ok(ledger)
    }

    fn load_ledger_file(&self, path: &Path) -> Result<Arc<Ledger>, NodeError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            NodeError::Parse(format!("unable to read {}: {e}", path.display()))
        })?;
        let doc: Value = serde_json::from_str(&text).map_err(|e| {
            NodeError::Parse(format!("unable to parse {}: {e}", path.display()))
        })?;
        let file = LedgerFile::parse(doc, self.clock.close_time())?;
        let candidate = Candidate {
            ledger: Arc::new(file.build(&self.family)?),
            claimed: None,
        };
        self.validate(&candidate)?;
        self.install(&candidate.ledger)?;
        Ok(candidate.ledger)
    }

    fn latest(&self) -> Result<Option<Candidate>, NodeError> {
        self.index
            .load_most_recent()?
            .map(|record| self.from_record(record))
            .transpose()
    }

    fn by_seq(&self, seq: LedgerSeq) -> Result<Option<Candidate>, NodeError> {
        self.index
            .load_by_sequence(seq)?
            .map(|record| self.from_record(record))
            .transpose()
    }

    /// The index first, then the node store, then the network.
    fn by_hash(&self, hash: Digest) -> Result<Option<Candidate>, NodeError> {
        if let Some(record) = self.index.load_by_hash(&hash)? {
            return self.from_record(record).map(Some);
        }
        let inbound = InboundLedger::new(hash, 0, AcquireReason::Startup, Arc::clone(&self.family));
        if inbound.check_local() {
            return Ok(inbound.ledger().map(|ledger| Candidate {
                ledger,
                claimed: Some(hash),
            }));
        }
        tracing::info!(%hash, "ledger not held locally, acquiring");
        Ok(self
            .acquirer
            .acquire_blocking(hash, AcquireReason::Startup)
            .map(|ledger| Candidate {
                ledger,
                claimed: Some(hash),
            }))
    }

    fn from_record(&self, record: LedgerRecord) -> Result<Candidate, NodeError> {
        let header = LedgerHeader::from_bytes(&record.header).map_err(|e| {
            tracing::error!(seq = record.seq, hash = %record.hash, error = %e, "stored ledger header unreadable");
            NodeError::StorageIntegrity(format!("header of ledger {} is unreadable", record.hash))
        })?;
        Ok(Candidate {
            ledger: Arc::new(Ledger::loaded(header, Arc::clone(&self.family))),
            claimed: Some(record.hash),
        })
    }

    fn validate(&self, candidate: &Candidate) -> Result<(), NodeError> {
        let ledger = &candidate.ledger;
        if ledger.account_hash().is_zero() {
            tracing::error!(seq = ledger.seq(), "Ledger is empty.");
            return Err(NodeError::StorageIntegrity(format!(
                "ledger {} is empty",
                ledger.seq()
            )));
        }
        let missing = ledger.missing_nodes(MAX_MISSING_REPORTED);
        if let Some(first) = missing.first() {
            tracing::error!(
                seq = ledger.seq(),
                missing = missing.len(),
                first = %first,
                "Ledger is missing nodes."
            );
            return Err(NodeError::StorageIntegrity(format!(
                "ledger {} is missing nodes",
                ledger.seq()
            )));
        }
        if let Some(claimed) = candidate.claimed {
            if claimed != ledger.hash() {
                tracing::error!(
                    seq = ledger.seq(),
                    %claimed,
                    computed = %ledger.hash(),
                    "Ledger is not sane."
                );
                return Err(NodeError::StorageIntegrity(format!(
                    "ledger {} is not sane",
                    ledger.seq()
                )));
            }
        }
        Ok(())
    }

    fn install(&self, ledger: &Arc<Ledger>) -> Result<(), NodeError> {
        self.ledger_master
            .set_ledger_range_present(ledger.seq(), ledger.seq());
        self.ledger_master.switch_lcl(Arc::clone(ledger))?;
        self.ledger_master.force_valid(Arc::clone(ledger));
        self.network_ops.set_last_close_time(ledger.close_time());
        self.open_on(ledger)?;
        Ok(())
    }

    fn open_on(&self, ledger: &Arc<Ledger>) -> Result<Arc<OpenLedger>, NodeError> {
        let open = OpenLedger::new(Arc::clone(ledger))?;
        Ok(self.ledger_master.install_open_ledger(open))
    }

    /// Put `source`'s transactions into the open ledger on `parent` and
    /// hand the replay to the ledger master.
    fn queue_replay(&self, source: Arc<Ledger>, parent: Arc<Ledger>) -> Result<(), NodeError> {
        let records = source.tx_records().map_err(|e| {
            tracing::error!(seq = source.seq(), error = %e, "Replay ledger missing/damaged");
            NodeError::StorageIntegrity("replay ledger missing/damaged".into())
        })?;
        let open = self.open_on(&parent)?;

        let mut manifest = ReplayManifest::new(Arc::clone(&source), parent);
        let mut txs = Vec::with_capacity(records.len());
        for (key, record) in records {
            let tx = Arc::new(record.transaction()?);
            if tx.id() != key {
                tracing::warn!(%key, id = %tx.id(), "replay transaction stored under wrong key");
            }
            self.hash_router.set_flags(tx.id(), SF_SIGGOOD);
            let position = record.meta.transaction_index;
            if manifest.insert(position, Arc::clone(&tx)).is_some() {
                tracing::warn!(position, "two replay transactions share a position");
            }
            txs.push(tx);
        }
        self.tx_sets
            .give_set(source.tx_hash(), txs.iter().map(|tx| tx.id()).collect());
        open.modify(move |view| {
            let changed = !txs.is_empty();
            for tx in txs {
                view.raw_tx_insert(tx)?;
            }
            Ok(changed)
        })?;
        self.ledger_master.take_replay(manifest);
        Ok(())
    }
}
