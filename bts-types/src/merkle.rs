//! Partial Merkle trees (BIP37)
//!
//! A partial Merkle tree proves that a subset of a block's transactions are
//! leaves of the tree whose root is committed to in the block header. It is
//! encoded as a depth-first traversal of the tree: one flag bit per visited
//! node says whether the node is an ancestor of a matched leaf, and one hash
//! is carried for every node the traversal does not descend into.
//!
//! Serialized form: total transaction count (u32 LE), CompactSize-prefixed
//! list of 32-byte hashes, CompactSize-prefixed flag bytes with bits packed
//! least significant first.

use std::collections::HashMap;

use crate::encode::{write_compact_size, Decodable, Encodable, Reader};
use crate::error::{Error, Result};
use crate::primitives::{Sha256dHash, Txid};

/// Upper bound on transactions in a block: max block weight / min tx weight
pub const MAX_BLOCK_TRANSACTIONS: u32 = 4_000_000 / 240;

/// Root and matched leaves recovered from a partial Merkle tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleMatches {
    pub root: Sha256dHash,
    /// Matched txids in leaf order
    pub txids: Vec<Txid>,
    /// Leaf positions of the matched txids
    pub indexes: Vec<u32>,
}

impl MerkleMatches {
    pub fn contains(&self, txid: &Txid) -> bool {
        self.txids.contains(txid)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialMerkleTree {
    total_transactions: u32,
    hashes: Vec<Sha256dHash>,
    bits: Vec<bool>,
}

/// Number of nodes at `height` above the leaves
fn tree_width(total: u32, height: u32) -> u32 {
    ((total as u64 + (1u64 << height) - 1) >> height) as u32
}

fn tree_height(total: u32) -> u32 {
    let mut height = 0;
    while tree_width(total, height) > 1 {
        height += 1;
    }
    height
}

/// Hash of the node at (`height`, `pos`) over the full leaf set
fn node_hash(txids: &[Txid], height: u32, pos: u32) -> Sha256dHash {
    if height == 0 {
        return txids[pos as usize];
    }
    let total = txids.len() as u32;
    let left = node_hash(txids, height - 1, pos * 2);
    let right = if pos * 2 + 1 < tree_width(total, height - 1) {
        node_hash(txids, height - 1, pos * 2 + 1)
    } else {
        left
    };
    Sha256dHash::hash_pair(&left, &right)
}

/// Merkle root over a complete list of txids, as committed in a block header.
///
/// Returns `None` for an empty list.
pub fn merkle_root(txids: &[Txid]) -> Option<Sha256dHash> {
    if txids.is_empty() {
        return None;
    }
    Some(node_hash(txids, tree_height(txids.len() as u32), 0))
}

struct Builder<'a> {
    txids: &'a [Txid],
    matches: &'a [bool],
    hashes: Vec<Sha256dHash>,
    bits: Vec<bool>,
}

impl Builder<'_> {
    fn traverse(&mut self, height: u32, pos: u32) {
        let total = self.txids.len();
        let start = (pos as usize) << height;
        let end = ((pos as usize + 1) << height).min(total);
        let parent_of_match = self.matches[start..end].iter().any(|m| *m);
        self.bits.push(parent_of_match);

        if height == 0 || !parent_of_match {
            self.hashes.push(node_hash(self.txids, height, pos));
        } else {
            self.traverse(height - 1, pos * 2);
            if pos * 2 + 1 < tree_width(total as u32, height - 1) {
                self.traverse(height - 1, pos * 2 + 1);
            }
        }
    }
}

struct Extractor<'a> {
    tree: &'a PartialMerkleTree,
    bits_used: usize,
    hashes_used: usize,
    matches: Vec<Txid>,
    indexes: Vec<u32>,
    /// Every node hash seen, keyed by (height, pos); only kept when pruning
    nodes: Option<HashMap<(u32, u32), Sha256dHash>>,
}

impl Extractor<'_> {
    fn traverse(&mut self, height: u32, pos: u32) -> Result<Sha256dHash> {
        let parent_of_match = *self
            .tree
            .bits
            .get(self.bits_used)
            .ok_or(Error::InvalidMerkleTree("overflowed the flag bits"))?;
        self.bits_used += 1;

        if height == 0 || !parent_of_match {
            let hash = *self
                .tree
                .hashes
                .get(self.hashes_used)
                .ok_or(Error::InvalidMerkleTree("overflowed the hash list"))?;
            self.hashes_used += 1;
            if height == 0 && parent_of_match {
                self.matches.push(hash);
                self.indexes.push(pos);
            }
            self.record(height, pos, hash);
            return Ok(hash);
        }

        let left = self.traverse(height - 1, pos * 2)?;
        let right = if pos * 2 + 1 < tree_width(self.tree.total_transactions, height - 1) {
            let right = self.traverse(height - 1, pos * 2 + 1)?;
            // Identical siblings allow two different trees with the same root
            // (CVE-2012-2459)
            if right == left {
                return Err(Error::InvalidMerkleTree("duplicate subtree"));
            }
            right
        } else {
            left
        };
        let hash = Sha256dHash::hash_pair(&left, &right);
        self.record(height, pos, hash);
        Ok(hash)
    }

    fn record(&mut self, height: u32, pos: u32, hash: Sha256dHash) {
        if let Some(nodes) = self.nodes.as_mut() {
            nodes.insert((height, pos), hash);
        }
    }
}

/// Re-emits a tree with a single matched leaf, from known node hashes
struct Pruner<'a> {
    total: u32,
    target: u32,
    nodes: &'a HashMap<(u32, u32), Sha256dHash>,
    hashes: Vec<Sha256dHash>,
    bits: Vec<bool>,
}

impl Pruner<'_> {
    fn traverse(&mut self, height: u32, pos: u32) -> Result<()> {
        let on_path = self.target >> height == pos;
        self.bits.push(on_path);

        if height == 0 || !on_path {
            let hash = *self
                .nodes
                .get(&(height, pos))
                .ok_or(Error::InvalidMerkleTree("node hash not recoverable"))?;
            self.hashes.push(hash);
            return Ok(());
        }

        self.traverse(height - 1, pos * 2)?;
        if pos * 2 + 1 < tree_width(self.total, height - 1) {
            self.traverse(height - 1, pos * 2 + 1)?;
        }
        Ok(())
    }
}

impl PartialMerkleTree {
    /// Build a tree over a block's txids, keeping the leaves flagged in `matches`.
    ///
    /// Panics if `txids` is empty or `matches` has a different length.
    pub fn from_txids(txids: &[Txid], matches: &[bool]) -> Self {
        assert!(!txids.is_empty(), "a block has at least one transaction");
        assert_eq!(txids.len(), matches.len(), "one match flag per txid");

        let mut builder = Builder {
            txids,
            matches,
            hashes: Vec::new(),
            bits: Vec::new(),
        };
        builder.traverse(tree_height(txids.len() as u32), 0);

        Self {
            total_transactions: txids.len() as u32,
            hashes: builder.hashes,
            bits: builder.bits,
        }
    }

    /// Convenience for the common case: prove the given txids out of `block_txids`.
    pub fn from_block(block_txids: &[Txid], wanted: &[Txid]) -> Self {
        let matches: Vec<bool> = block_txids.iter().map(|t| wanted.contains(t)).collect();
        Self::from_txids(block_txids, &matches)
    }

    pub fn total_transactions(&self) -> u32 {
        self.total_transactions
    }

    pub fn hashes(&self) -> &[Sha256dHash] {
        &self.hashes
    }

    /// Recompute the root and collect matched txids, validating the structure.
    pub fn extract_matches(&self) -> Result<MerkleMatches> {
        let (root, extractor) = self.extract(false)?;
        Ok(MerkleMatches {
            root,
            txids: extractor.matches,
            indexes: extractor.indexes,
        })
    }

    /// A tree over the same block that matches only `txid`.
    ///
    /// The root is unchanged. Fails if `txid` is not a match of this tree.
    pub fn restrict_to(&self, txid: &Txid) -> Result<Self> {
        let (_, extractor) = self.extract(true)?;
        let index = extractor
            .matches
            .iter()
            .position(|m| m == txid)
            .map(|i| extractor.indexes[i])
            .ok_or(Error::InvalidMerkleTree("transaction is not matched"))?;
        let nodes = extractor
            .nodes
            .as_ref()
            .ok_or(Error::InvalidMerkleTree("node hashes not recorded"))?;

        let mut pruner = Pruner {
            total: self.total_transactions,
            target: index,
            nodes,
            hashes: Vec::new(),
            bits: Vec::new(),
        };
        pruner.traverse(tree_height(self.total_transactions), 0)?;

        Ok(Self {
            total_transactions: self.total_transactions,
            hashes: pruner.hashes,
            bits: pruner.bits,
        })
    }

    fn extract(&self, record_nodes: bool) -> Result<(Sha256dHash, Extractor<'_>)> {
        if self.total_transactions == 0 {
            return Err(Error::InvalidMerkleTree("no transactions"));
        }
        if self.total_transactions > MAX_BLOCK_TRANSACTIONS {
            return Err(Error::InvalidMerkleTree("too many transactions"));
        }
        if self.hashes.len() > self.total_transactions as usize {
            return Err(Error::InvalidMerkleTree("more hashes than transactions"));
        }
        if self.bits.len() < self.hashes.len() {
            return Err(Error::InvalidMerkleTree("fewer flag bits than hashes"));
        }

        let mut extractor = Extractor {
            tree: self,
            bits_used: 0,
            hashes_used: 0,
            matches: Vec::new(),
            indexes: Vec::new(),
            nodes: record_nodes.then(HashMap::new),
        };
        let root = extractor.traverse(tree_height(self.total_transactions), 0)?;

        // Every flag byte and every hash must have been consumed
        if (extractor.bits_used + 7) / 8 != (self.bits.len() + 7) / 8 {
            return Err(Error::InvalidMerkleTree("unused flag bytes"));
        }
        if self.bits[extractor.bits_used..].iter().any(|bit| *bit) {
            return Err(Error::InvalidMerkleTree("non-zero padding bits"));
        }
        if extractor.hashes_used != self.hashes.len() {
            return Err(Error::InvalidMerkleTree("unused hashes"));
        }

        Ok((root, extractor))
    }
}

impl Encodable for PartialMerkleTree {
    fn consensus_encode(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.total_transactions.to_le_bytes());
        write_compact_size(self.hashes.len() as u64, buf);
        for hash in &self.hashes {
            buf.extend_from_slice(hash.as_bytes());
        }
        let mut flags = vec![0u8; (self.bits.len() + 7) / 8];
        for (i, bit) in self.bits.iter().enumerate() {
            flags[i / 8] |= (*bit as u8) << (i % 8);
        }
        write_compact_size(flags.len() as u64, buf);
        buf.extend_from_slice(&flags);
    }
}

impl Decodable for PartialMerkleTree {
    fn consensus_decode(reader: &mut Reader<'_>) -> Result<Self> {
        let total_transactions = reader.read_u32()?;
        let hash_count = reader.read_count(MAX_BLOCK_TRANSACTIONS as u64)?;
        let mut hashes = Vec::with_capacity(hash_count);
        for _ in 0..hash_count {
            hashes.push(Sha256dHash::new(reader.read_array()?));
        }
        let flag_len = reader.read_count(MAX_BLOCK_TRANSACTIONS as u64)?;
        let flags = reader.read_slice(flag_len)?;
        let bits = (0..flag_len * 8)
            .map(|i| flags[i / 8] & (1 << (i % 8)) != 0)
            .collect();
        Ok(Self {
            total_transactions,
            hashes,
            bits,
        })
    }
}
