//! Benchmarks for core operations: document hashing, partial Merkle tree
//! construction and extraction, proof decoding and full verification.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use bts_core::testutil::{fund, ChainSimulator};
use bts_core::{hash_bytes, verify_proof};
use bts_types::{PartialMerkleTree, Proof, Sha256dHash, Txid};

fn block_txids(count: usize) -> Vec<Txid> {
    (0..count as u32)
        .map(|i| Sha256dHash::hash(&i.to_le_bytes()))
        .collect()
}

fn bench_document_hashing(c: &mut Criterion) {
    let mut group = c.benchmark_group("document_hashing");

    for size in [1024usize, 64 * 1024, 1024 * 1024] {
        let data = vec![0xA5u8; size];
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::new("bytes", size), &data, |b, data| {
            b.iter(|| hash_bytes(data));
        });
    }
    group.finish();
}

fn bench_tree_construction(c: &mut Criterion) {
    let mut group = c.benchmark_group("pmt_construction");

    for size in [1, 100, 1000, 4000] {
        let txids = block_txids(size);
        let wanted = [txids[size / 2]];
        group.bench_with_input(BenchmarkId::new("transactions", size), &size, |b, _| {
            b.iter(|| PartialMerkleTree::from_block(&txids, &wanted));
        });
    }
    group.finish();
}

fn bench_tree_extraction(c: &mut Criterion) {
    let mut group = c.benchmark_group("pmt_extraction");

    for size in [1, 100, 1000, 4000] {
        let txids = block_txids(size);
        let tree = PartialMerkleTree::from_block(&txids, &[txids[size / 2]]);
        group.bench_with_input(BenchmarkId::new("transactions", size), &size, |b, _| {
            b.iter(|| tree.extract_matches().unwrap());
        });
    }
    group.finish();
}

fn bench_verification(c: &mut Criterion) {
    let document = b"benchmark document".to_vec();
    let mut sim = ChainSimulator::new();
    let proof = sim.prove(&fund(&hash_bytes(&document), 0));

    let mut group = c.benchmark_group("verification");
    for height in [2u32, 100, 1000] {
        if sim.height() < height {
            sim.extend(height - sim.height());
        }
        group.bench_with_input(BenchmarkId::new("chain_height", height), &height, |b, _| {
            b.iter(|| verify_proof(&proof, &document, sim.chain()).unwrap());
        });
    }
    group.finish();

    let bytes = proof.serialize();
    c.bench_function("proof_decode", |b| {
        b.iter(|| Proof::deserialize(&bytes).unwrap());
    });
}

criterion_group!(
    benches,
    bench_document_hashing,
    bench_tree_construction,
    bench_tree_extraction,
    bench_verification,
);
criterion_main!(benches);
