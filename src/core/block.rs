// Block data structure

use crate::core::sha256_hex;
use serde::{Serialize, Deserialize};
use std::collections::BTreeMap;
use std::fmt::Write;

/// Key/value writes carried by a block. Sorted so the rendering is canonical.
pub type Txn = BTreeMap<String, String>;

/// Block - parent link, key/value transaction set and proof-of-work nonce
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Hash of the previous block, or the genesis hash
    pub parent_hash: String,
    /// Key/value writes (empty for a no-op block)
    #[serde(default)]
    pub txn: Txn,
    /// Proposer of this block
    pub origin_id: u32,
    /// Nonce for proof-of-work
    #[serde(default)]
    pub nonce: u32,
    /// Client that requested the transaction (not hashed)
    #[serde(default)]
    pub client_id: String,
}

impl Block {
    /// Create a new block
    pub fn new(parent_hash: impl Into<String>, txn: Txn, origin_id: u32, nonce: u32) -> Self {
        Self {
            parent_hash: parent_hash.into(),
            txn,
            origin_id,
            nonce,
            client_id: String::new(),
        }
    }

    /// Create a block with no writes and nonce 0
    pub fn no_op(parent_hash: impl Into<String>, origin_id: u32) -> Self {
        Self::new(parent_hash, Txn::new(), origin_id, 0)
    }

    /// Attach the requesting client id
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    /// Calculate the hash of this block
    ///
    /// Once a block has been integrated into a chain its nonce must not change,
    /// since the hash is its identity in the tree.
    pub fn hash(&self) -> String {
        sha256_hex(&self.canonical_string())
    }

    /// Check if this block carries no writes
    pub fn is_no_op(&self) -> bool {
        self.txn.is_empty()
    }

    /// Keys written by this block, in ascending order
    pub fn keys(&self) -> Vec<&str> {
        self.txn.keys().map(String::as_str).collect()
    }

    /// Canonical rendering without the nonce (mining search input)
    ///
    /// Layout: `parent_hash` + `map[k1:v1 k2:v2]` + decimal `origin_id`.
    pub fn header_string(&self) -> String {
        let mut s = String::with_capacity(self.parent_hash.len() + 16 * (self.txn.len() + 1));
        s.push_str(&self.parent_hash);
        s.push_str("map[");
        for (i, (key, value)) in self.txn.iter().enumerate() {
            if i > 0 {
                s.push(' ');
            }
            s.push_str(key);
            s.push(':');
            s.push_str(value);
        }
        s.push(']');
        // Writing to a String cannot fail
        let _ = write!(s, "{}", self.origin_id);
        s
    }

    /// Canonical rendering including the nonce (hash input)
    pub fn canonical_string(&self) -> String {
        let mut s = self.header_string();
        let _ = write!(s, "{}", self.nonce);
        s
    }
}

/// Build a transaction set from key/value pairs
pub fn txn<K, V, I>(pairs: I) -> Txn
where
    K: Into<String>,
    V: Into<String>,
    I: IntoIterator<Item = (K, V)>,
{
    pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_string_layout() {
        let block = Block::new("deadb33f", txn([("b", "2"), ("a", "1")]), 9, 87);
        assert_eq!(block.header_string(), "deadb33fmap[a:1 b:2]9");
        assert_eq!(block.canonical_string(), "deadb33fmap[a:1 b:2]987");
    }

    #[test]
    fn test_no_op_rendering() {
        let block = Block::no_op("deadb33f", 5);
        assert!(block.is_no_op());
        assert_eq!(block.nonce, 0);
        assert_eq!(block.canonical_string(), "deadb33fmap[]50");
    }

    #[test]
    fn test_hash_is_deterministic() {
        let a = Block::new("p", txn([("x", "1"), ("y", "2")]), 1, 3);
        let b = Block::new("p", txn([("y", "2"), ("x", "1")]), 1, 3);
        assert_eq!(a.hash(), b.hash());
        assert_eq!(a.hash().len(), 64);
    }

    #[test]
    fn test_hash_covers_nonce_and_origin() {
        let base = Block::no_op("p", 1);
        let mut other_nonce = base.clone();
        other_nonce.nonce = 1;
        let other_origin = Block::no_op("p", 2);

        assert_ne!(base.hash(), other_nonce.hash());
        assert_ne!(base.hash(), other_origin.hash());
    }

    #[test]
    fn test_client_id_excluded_from_hash() {
        let plain = Block::no_op("p", 1);
        let tagged = Block::no_op("p", 1).with_client_id("client-7");
        assert_eq!(plain.hash(), tagged.hash());
        assert_ne!(plain, tagged);
    }

    #[test]
    fn test_keys_sorted() {
        let block = Block::new("p", txn([("c", "3"), ("a", "1"), ("b", "2")]), 0, 0);
        assert_eq!(block.keys(), vec!["a", "b", "c"]);
        assert!(!block.is_no_op());
    }

    #[test]
    fn test_json_defaults() {
        let block: Block = serde_json::from_str(r#"{"parent_hash":"p","origin_id":3}"#).unwrap();
        assert_eq!(block, Block::no_op("p", 3));
    }
}
