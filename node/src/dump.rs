//! Print a transaction straight out of the node store.

use serde_json::Value;

use keel_ledger::{LeafKind, TreeNode, TxRecord};
use keel_store::NodeStore;
use keel_types::Digest;

use crate::NodeError;

/// The transaction JSON stored in the transaction-tree leaf `hash`.
///
/// Missing or non-transaction nodes are logged and give `Ok(None)`; only a
/// failing store is an error.
pub fn dump_node(store: &dyn NodeStore, hash: &Digest) -> Result<Option<Value>, NodeError> {
    let Some(object) = store.fetch(hash)? else {
        tracing::warn!(%hash, "node not found in node store");
        return Ok(None);
    };
    let node = match TreeNode::decode(*hash, &object.data) {
        Ok(node) => node,
        Err(e) => {
            tracing::warn!(%hash, error = %e, "invalid DB node");
            return Ok(None);
        }
    };
    let TreeNode::Leaf {
        kind: LeafKind::Transaction,
        data,
        ..
    } = node
    else {
        tracing::warn!(%hash, "not a transaction node");
        return Ok(None);
    };
    match TxRecord::decode(&data) {
        Ok(record) => Ok(Some(record.tx)),
        Err(e) => {
            tracing::warn!(%hash, error = %e, "transaction node is unreadable");
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_ledger::TxMeta;
    use keel_nullables::NullNodeStore;
    use keel_store::NodeObject;
    use serde_json::json;

    fn stored(store: &NullNodeStore, node: &TreeNode) -> Digest {
        let kind = match node {
            TreeNode::Leaf { kind, .. } => kind.object_kind(),
            TreeNode::Inner { .. } => keel_store::NodeObjectKind::AccountNode,
        };
        let digest = node.digest();
        store
            .store(NodeObject::new(kind, digest, node.encode()))
            .unwrap();
        digest
    }

    #[test]
    fn dumps_transaction_leaf() {
        let store = NullNodeStore::new();
        let record = TxRecord {
            tx: json!({"TransactionType": "Payment", "Amount": "10"}),
            meta: TxMeta {
                transaction_index: 0,
                result: "tesSUCCESS".into(),
            },
        };
        let hash = stored(
            &store,
            &TreeNode::Leaf {
                kind: LeafKind::Transaction,
                key: Digest::new([1; 32]),
                data: record.encode().unwrap(),
            },
        );
        assert_eq!(dump_node(&store, &hash).unwrap(), Some(record.tx));
    }

    #[test]
    fn state_leaf_is_not_dumped() {
        let store = NullNodeStore::new();
        let hash = stored(
            &store,
            &TreeNode::Leaf {
                kind: LeafKind::State,
                key: Digest::new([1; 32]),
                data: b"{}".to_vec(),
            },
        );
        assert_eq!(dump_node(&store, &hash).unwrap(), None);
    }

    #[test]
    fn missing_node_is_none() {
        let store = NullNodeStore::new();
        assert_eq!(dump_node(&store, &Digest::new([3; 32])).unwrap(), None);
    }
}
