//! End-to-end verification against a persisted header store

use std::fs;
use std::path::Path;

use bts_client::{ClientError, HeaderStore};
use bts_core::testutil::{fund, ChainSimulator};
use bts_core::{hash_bytes, verify_proof_file, HeaderChain, MemoryHeaderChain, ProofError};
use bts_types::{BlockHeader, Encodable};

const SUFFIX: &str = ".timestamp";

/// Serialized headers of `chain`, oldest first
fn export_headers(chain: &MemoryHeaderChain) -> Vec<u8> {
    let mut headers: Vec<BlockHeader> = Vec::new();
    let mut cursor = Some(chain.tip().unwrap());
    while let Some(header) = cursor {
        cursor = chain.previous(&header).unwrap();
        headers.push(header);
    }
    headers.reverse();
    headers.iter().flat_map(|h| h.to_bytes()).collect()
}

fn write_proof(dir: &Path, name: &str, document: &[u8], sim: &mut ChainSimulator) {
    fs::write(dir.join(name), document).unwrap();
    let proof = sim.prove(&fund(&hash_bytes(document), 0));
    fs::write(dir.join(format!("{}{}", name, SUFFIX)), proof.serialize()).unwrap();
}

#[test]
fn test_verify_with_imported_headers() {
    let dir = tempfile::tempdir().unwrap();
    let mut sim = ChainSimulator::new();
    sim.extend(4);
    write_proof(dir.path(), "invoice.pdf", b"%PDF-1.4 invoice", &mut sim);
    sim.extend(3);

    let store = HeaderStore::open(&dir.path().join("headers")).unwrap();
    assert_eq!(store.import(&export_headers(sim.chain())).unwrap(), 9);

    let verified =
        verify_proof_file(&dir.path().join("invoice.pdf.timestamp"), SUFFIX, &store).unwrap();
    assert_eq!(verified.document, dir.path().join("invoice.pdf"));
    assert_eq!(verified.digest, hash_bytes(b"%PDF-1.4 invoice"));
}

#[test]
fn test_headers_behind_proof() {
    let dir = tempfile::tempdir().unwrap();
    let mut sim = ChainSimulator::new();
    sim.extend(2);

    // Store synced before the anchoring block was mined
    let store = HeaderStore::open(&dir.path().join("headers")).unwrap();
    store.import(&export_headers(sim.chain())).unwrap();

    write_proof(dir.path(), "late.txt", b"late", &mut sim);
    let err = verify_proof_file(&dir.path().join("late.txt.timestamp"), SUFFIX, &store)
        .unwrap_err();
    assert!(matches!(err, ProofError::BlockNotFound { .. }));

    // Catching up makes the same proof verify
    store.import(&export_headers(sim.chain())).unwrap();
    verify_proof_file(&dir.path().join("late.txt.timestamp"), SUFFIX, &store).unwrap();
}

#[test]
fn test_modified_document_fails() {
    let dir = tempfile::tempdir().unwrap();
    let mut sim = ChainSimulator::new();
    write_proof(dir.path(), "notes.txt", b"original notes", &mut sim);

    let store = HeaderStore::open(&dir.path().join("headers")).unwrap();
    store.import(&export_headers(sim.chain())).unwrap();

    fs::write(dir.path().join("notes.txt"), b"edited notes").unwrap();
    let err = verify_proof_file(&dir.path().join("notes.txt.timestamp"), SUFFIX, &store)
        .unwrap_err();
    assert!(matches!(err, ProofError::DigestMismatch { .. }));

    let err: ClientError = err.into();
    assert!(err.to_string().starts_with("Verification failed"));
}

#[test]
fn test_empty_store_finds_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let mut sim = ChainSimulator::new();
    write_proof(dir.path(), "a.txt", b"a", &mut sim);

    let store = HeaderStore::open(&dir.path().join("headers")).unwrap();
    let err = verify_proof_file(&dir.path().join("a.txt.timestamp"), SUFFIX, &store).unwrap_err();
    assert!(matches!(err, ProofError::BlockNotFound { .. }));
}
