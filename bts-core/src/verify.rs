//! Offline proof verification against a local header chain

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use bts_types::{
    BlockHash, BlockHeader, Decodable, Digest, PartialMerkleTree, Proof, Sha256dHash,
    Transaction, Txid,
};
use thiserror::Error;
use tracing::debug;

use crate::hash::{hash_bytes, hash_file};
use crate::ledger::{ChainError, HeaderChain};
use crate::paths::document_path_for;

#[derive(Error, Debug)]
pub enum ProofError {
    #[error("No OP_RETURN output in transaction")]
    NoDataOutput,

    #[error("Document digest {actual} does not match the OP_RETURN output")]
    DigestMismatch { actual: Digest },

    #[error("Transaction {txid} not found in Merkle proof")]
    TransactionNotInProof { txid: Txid },

    #[error("Block {block_hash} not found in the header chain")]
    BlockNotFound { block_hash: BlockHash },

    #[error("Merkle root {computed} does not match block header root {expected}")]
    MerkleRootMismatch {
        computed: Sha256dHash,
        expected: Sha256dHash,
    },

    #[error("Corrupt proof: {0}")]
    CorruptProof(String),

    #[error(transparent)]
    Chain(ChainError),

    #[error("Cannot read document {}: {source}", path.display())]
    DocumentUnreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Cannot read proof {}: {source}", path.display())]
    ProofUnreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Proof file name must end in {suffix}: {}", path.display())]
    InvalidProofPath { path: PathBuf, suffix: String },
}

impl ProofError {
    /// True when the proof was checked and found not to hold, as opposed to
    /// the check being impossible to carry out.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            ProofError::NoDataOutput
                | ProofError::DigestMismatch { .. }
                | ProofError::TransactionNotInProof { .. }
                | ProofError::BlockNotFound { .. }
                | ProofError::MerkleRootMismatch { .. }
                | ProofError::CorruptProof(_)
        )
    }
}

/// Result of a successful file verification
#[derive(Debug, Clone)]
pub struct VerifiedProof {
    pub document: PathBuf,
    pub digest: Digest,
    pub txid: Txid,
    pub header: BlockHeader,
}

/// Check that `proof` commits to `document` in a block of `chain`.
///
/// Returns the header of the anchoring block.
pub fn verify_proof<C: HeaderChain + ?Sized>(
    proof: &Proof,
    document: &[u8],
    chain: &C,
) -> Result<BlockHeader, ProofError> {
    verify_digest(proof, &hash_bytes(document), chain).map(|(_, header)| header)
}

/// As [`verify_proof`], for a document digest computed elsewhere.
///
/// Returns the carrier txid along with the anchoring header.
pub fn verify_digest<C: HeaderChain + ?Sized>(
    proof: &Proof,
    digest: &Digest,
    chain: &C,
) -> Result<(Txid, BlockHeader), ProofError> {
    let tx = Transaction::from_bytes(&proof.carrier_transaction)
        .map_err(|e| ProofError::CorruptProof(format!("carrier transaction: {}", e)))?;

    let output = tx.first_data_output().ok_or(ProofError::NoDataOutput)?;
    let carried = output.script_pubkey.op_return_payload();
    if carried != Some(digest.as_bytes().as_slice()) {
        return Err(ProofError::DigestMismatch { actual: *digest });
    }

    let tree = PartialMerkleTree::from_bytes(&proof.partial_merkle_tree)
        .map_err(|e| ProofError::CorruptProof(format!("partial Merkle tree: {}", e)))?;
    let matches = tree
        .extract_matches()
        .map_err(|e| ProofError::CorruptProof(format!("partial Merkle tree: {}", e)))?;

    let txid = tx.txid();
    if !matches.contains(&txid) {
        return Err(ProofError::TransactionNotInProof { txid });
    }

    let header = find_block(chain, &proof.block_hash)?;
    if header.merkle_root != matches.root {
        return Err(ProofError::MerkleRootMismatch {
            computed: matches.root,
            expected: header.merkle_root,
        });
    }

    debug!(%txid, block_hash = %proof.block_hash, "Proof verified");
    Ok((txid, header))
}

/// Walk back from the tip until `block_hash` is found
fn find_block<C: HeaderChain + ?Sized>(
    chain: &C,
    block_hash: &BlockHash,
) -> Result<BlockHeader, ProofError> {
    let not_found = || ProofError::BlockNotFound {
        block_hash: *block_hash,
    };

    let mut cursor = match chain.tip() {
        Ok(tip) => Some(tip),
        Err(ChainError::Empty) => return Err(not_found()),
        Err(e) => return Err(ProofError::Chain(e)),
    };

    while let Some(header) = cursor {
        if header.block_hash() == *block_hash {
            return Ok(header);
        }
        cursor = chain.previous(&header).map_err(ProofError::Chain)?;
    }

    Err(not_found())
}

/// Verify a proof file against the document it sits next to.
///
/// The document path is the proof path with `suffix` removed.
pub fn verify_proof_file<C: HeaderChain + ?Sized>(
    proof_path: &Path,
    suffix: &str,
    chain: &C,
) -> Result<VerifiedProof, ProofError> {
    let document =
        document_path_for(proof_path, suffix).ok_or_else(|| ProofError::InvalidProofPath {
            path: proof_path.to_path_buf(),
            suffix: suffix.to_string(),
        })?;

    let bytes = fs::read(proof_path).map_err(|source| ProofError::ProofUnreadable {
        path: proof_path.to_path_buf(),
        source,
    })?;
    let proof = Proof::deserialize(&bytes).map_err(|e| ProofError::CorruptProof(e.to_string()))?;

    let digest = hash_file(&document).map_err(|source| ProofError::DocumentUnreadable {
        path: document.clone(),
        source,
    })?;

    let (txid, header) = verify_digest(&proof, &digest, chain)?;
    Ok(VerifiedProof {
        document,
        digest,
        txid,
        header,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::MemoryHeaderChain;
    use crate::testutil::{fund, ChainSimulator};
    use bts_types::{Encodable, Script, TxOut};

    const DOCUMENT: &[u8] = b"The quick brown fox jumps over the lazy dog";

    fn anchored() -> (ChainSimulator, Proof) {
        let mut sim = ChainSimulator::new();
        let tx = fund(&hash_bytes(DOCUMENT), 0);
        let proof = sim.prove(&tx);
        sim.extend(2);
        (sim, proof)
    }

    #[test]
    fn test_valid_proof() {
        let (sim, proof) = anchored();
        let header = verify_proof(&proof, DOCUMENT, sim.chain()).unwrap();
        assert_eq!(header.block_hash(), proof.block_hash);
    }

    #[test]
    fn test_other_document_rejected() {
        let (sim, proof) = anchored();
        let err = verify_proof(&proof, b"another document", sim.chain()).unwrap_err();
        assert!(matches!(err, ProofError::DigestMismatch { .. }));
        assert!(err.is_rejection());
    }

    #[test]
    fn test_no_data_output() {
        let mut sim = ChainSimulator::new();
        let mut tx = fund(&hash_bytes(DOCUMENT), 0);
        tx.outputs.retain(|o| !o.script_pubkey.is_op_return());
        let proof = sim.prove(&tx);
        let err = verify_proof(&proof, DOCUMENT, sim.chain()).unwrap_err();
        assert!(matches!(err, ProofError::NoDataOutput));
    }

    #[test]
    fn test_first_data_output_is_authoritative() {
        let mut sim = ChainSimulator::new();
        let mut tx = fund(&hash_bytes(b"decoy"), 0);
        tx.outputs.push(TxOut::data_carrier(hash_bytes(DOCUMENT).as_bytes()));
        let proof = sim.prove(&tx);
        let err = verify_proof(&proof, DOCUMENT, sim.chain()).unwrap_err();
        assert!(matches!(err, ProofError::DigestMismatch { .. }));
    }

    #[test]
    fn test_bare_op_return_is_mismatch() {
        let mut sim = ChainSimulator::new();
        let mut tx = fund(&hash_bytes(DOCUMENT), 0);
        for output in &mut tx.outputs {
            if output.script_pubkey.is_op_return() {
                output.script_pubkey = Script::new(vec![0x6a]);
            }
        }
        let proof = sim.prove(&tx);
        let err = verify_proof(&proof, DOCUMENT, sim.chain()).unwrap_err();
        assert!(matches!(err, ProofError::DigestMismatch { .. }));
    }

    #[test]
    fn test_transaction_not_in_proof() {
        let (mut sim, mut proof) = anchored();
        let other = fund(&hash_bytes(b"unrelated"), 7);
        let other_proof = sim.prove(&other);
        proof.partial_merkle_tree = other_proof.partial_merkle_tree;
        let err = verify_proof(&proof, DOCUMENT, sim.chain()).unwrap_err();
        assert!(matches!(err, ProofError::TransactionNotInProof { .. }));
    }

    #[test]
    fn test_block_not_in_chain() {
        let (_, proof) = anchored();
        // Unrelated chain that never saw the anchoring block
        let mut other = ChainSimulator::with_start_time(1_700_000_000);
        other.extend(5);
        let err = verify_proof(&proof, DOCUMENT, other.chain()).unwrap_err();
        assert!(matches!(err, ProofError::BlockNotFound { .. }));
    }

    #[test]
    fn test_empty_chain_is_not_found() {
        let (_, proof) = anchored();
        let err = verify_proof(&proof, DOCUMENT, &MemoryHeaderChain::new()).unwrap_err();
        assert!(matches!(err, ProofError::BlockNotFound { .. }));
    }

    #[test]
    fn test_tree_matching_other_transactions() {
        let mut sim = ChainSimulator::new();
        let carrier = fund(&hash_bytes(DOCUMENT), 0);
        let other = fund(&hash_bytes(b"wallet payment"), 1);
        let block = sim.mine(&[carrier.clone(), other.clone()]);
        let tree = block
            .filtered(&[carrier.txid(), other.txid()])
            .partial_merkle_tree;
        assert_eq!(tree.extract_matches().unwrap().txids.len(), 2);

        let proof = Proof {
            carrier_transaction: carrier.to_bytes(),
            partial_merkle_tree: tree.to_bytes(),
            block_hash: block.block_hash(),
        };
        let header = verify_proof(&proof, DOCUMENT, sim.chain()).unwrap();
        assert_eq!(header.block_hash(), block.block_hash());
    }

    #[test]
    fn test_merkle_root_mismatch() {
        let (sim, mut proof) = anchored();
        let tx = Transaction::from_bytes(&proof.carrier_transaction).unwrap();
        // Same transaction, but in a tree whose root no header commits to
        let filler = bts_types::Sha256dHash::hash(b"filler");
        let tree = PartialMerkleTree::from_block(&[tx.txid(), filler], &[tx.txid()]);
        proof.partial_merkle_tree = tree.to_bytes();

        let err = verify_proof(&proof, DOCUMENT, sim.chain()).unwrap_err();
        assert!(matches!(err, ProofError::MerkleRootMismatch { .. }));
    }

    #[test]
    fn test_corrupt_transaction_bytes() {
        let (sim, mut proof) = anchored();
        proof.carrier_transaction.truncate(10);
        let err = verify_proof(&proof, DOCUMENT, sim.chain()).unwrap_err();
        assert!(matches!(err, ProofError::CorruptProof(_)));
    }

    #[test]
    fn test_verify_file() {
        let (sim, proof) = anchored();
        let dir = tempfile::tempdir().unwrap();
        let document = dir.path().join("fox.txt");
        fs::write(&document, DOCUMENT).unwrap();
        let proof_path = dir.path().join("fox.txt.timestamp");
        fs::write(&proof_path, proof.serialize()).unwrap();

        let verified = verify_proof_file(&proof_path, ".timestamp", sim.chain()).unwrap();
        assert_eq!(verified.document, document);
        assert_eq!(verified.digest, hash_bytes(DOCUMENT));
        assert_eq!(verified.header.block_hash(), proof.block_hash);
    }

    #[test]
    fn test_verify_file_input_errors() {
        let (sim, proof) = anchored();
        let dir = tempfile::tempdir().unwrap();

        let bad_name = dir.path().join("fox.proof");
        fs::write(&bad_name, proof.serialize()).unwrap();
        let err = verify_proof_file(&bad_name, ".timestamp", sim.chain()).unwrap_err();
        assert!(matches!(err, ProofError::InvalidProofPath { .. }));
        assert!(!err.is_rejection());

        let orphan = dir.path().join("gone.txt.timestamp");
        fs::write(&orphan, proof.serialize()).unwrap();
        let err = verify_proof_file(&orphan, ".timestamp", sim.chain()).unwrap_err();
        assert!(matches!(err, ProofError::DocumentUnreadable { .. }));

        let missing = dir.path().join("none.txt.timestamp");
        let err = verify_proof_file(&missing, ".timestamp", sim.chain()).unwrap_err();
        assert!(matches!(err, ProofError::ProofUnreadable { .. }));
    }

    #[test]
    fn test_verify_file_corrupt() {
        let (sim, _) = anchored();
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("fox.txt"), DOCUMENT).unwrap();
        let proof_path = dir.path().join("fox.txt.timestamp");
        fs::write(&proof_path, b"BTSP\x01garbage").unwrap();
        let err = verify_proof_file(&proof_path, ".timestamp", sim.chain()).unwrap_err();
        assert!(matches!(err, ProofError::CorruptProof(_)));
    }
}
