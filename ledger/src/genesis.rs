//! The genesis ledger: sequence 1, holding the whole initial supply in the
//! master account.

use std::sync::Arc;

use serde_json::json;

use keel_types::NetTime;

use crate::entry::{account_root_key, StateEntry};
use crate::error::LedgerError;
use crate::family::Family;
use crate::ledger::{Ledger, LedgerHeader};
use crate::tree::{LeafKind, TreeBuilder};

/// Name of the account that owns the initial supply.
pub const MASTER_ACCOUNT: &str = "keel-master";

/// Total coins in existence at genesis.
pub const INITIAL_TOTAL_COINS: u64 = 100_000_000_000_000_000;

pub const GENESIS_SEQ: u32 = 1;

/// Build the genesis ledger, writing its state tree to the family's store.
/// The result is closed and immutable.
pub fn create_genesis_ledger(family: &Arc<Family>) -> Result<Ledger, LedgerError> {
    let key = account_root_key(MASTER_ACCOUNT);
    let master = StateEntry::from_json(
        key,
        json!({
            "LedgerEntryType": "AccountRoot",
            "Account": MASTER_ACCOUNT,
            "Balance": INITIAL_TOTAL_COINS.to_string(),
            "Sequence": 1,
            "Flags": 0,
        }),
    )?;

    let mut state = TreeBuilder::new(LeafKind::State);
    state.insert(key, master.encode()?);
    let root = state.flush(family.store().as_ref())?;

    let header = LedgerHeader {
        account_hash: root,
        total_coins: INITIAL_TOTAL_COINS,
        ..LedgerHeader::empty(GENESIS_SEQ)
    };
    let mut ledger = Ledger::new(header, Arc::clone(family));
    ledger.set_immutable();
    Ok(ledger)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::LedgerEntryType;
    use crate::test_support::test_family;

    #[test]
    fn genesis_holds_master_account() {
        let (family, _) = test_family();
        let genesis = create_genesis_ledger(&family).unwrap();
        assert_eq!(genesis.seq(), GENESIS_SEQ);
        assert!(genesis.is_immutable());
        assert!(!genesis.account_hash().is_zero());

        let master = genesis
            .read_entry(&account_root_key(MASTER_ACCOUNT))
            .unwrap()
            .unwrap();
        assert_eq!(master.entry_type(), LedgerEntryType::AccountRoot);
        assert_eq!(
            master.field("Balance").and_then(|v| v.as_str()),
            Some(INITIAL_TOTAL_COINS.to_string().as_str())
        );
    }

    #[test]
    fn genesis_is_deterministic() {
        let (a, _) = test_family();
        let (b, _) = test_family();
        assert_eq!(
            create_genesis_ledger(&a).unwrap().hash(),
            create_genesis_ledger(&b).unwrap().hash()
        );
    }
}
