//! Benchmarks for core ETS operations: proof tree merge, traversal, and the
//! detached proof codec.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use ets_core::{Attestation, DetachedProof, Op, Timestamp};
use ets_types::Digest;

/// A tree shaped like a merged response from `calendars` calendars
fn make_tree(digest: &Digest, calendars: usize) -> Timestamp {
    let mut root = Timestamp::new(digest.as_bytes().to_vec());
    for i in 0..calendars {
        let node = root
            .add_op(Op::Append(vec![(i & 0xff) as u8; 16]))
            .unwrap()
            .add_op(Op::Sha256)
            .unwrap()
            .add_op(Op::Prepend(vec![0x42; 8]))
            .unwrap()
            .add_op(Op::Sha256)
            .unwrap();
        node.add_attestation(Attestation::Pending {
            uri: format!("https://calendar{}.example", i),
        });
        node.add_attestation(Attestation::Bitcoin {
            height: 800_000 + i as u32,
        });
    }
    root
}

fn bench_merge(c: &mut Criterion) {
    let mut group = c.benchmark_group("merge");
    let digest = Digest::new([1u8; 32]);

    for size in [1, 4, 16, 64] {
        let a = make_tree(&digest, size);
        let b = make_tree(&digest, size * 2);
        group.bench_with_input(BenchmarkId::new("calendars", size), &size, |bench, _| {
            bench.iter(|| {
                let mut merged = a.clone();
                merged.merge(&b).unwrap();
                merged
            });
        });
    }
    group.finish();
}

fn bench_traversal(c: &mut Criterion) {
    let mut group = c.benchmark_group("all_attestations");
    let digest = Digest::new([2u8; 32]);

    for size in [4, 64, 256] {
        let tree = make_tree(&digest, size);
        group.bench_with_input(BenchmarkId::new("calendars", size), &size, |bench, _| {
            bench.iter(|| tree.all_attestations().len());
        });
    }
    group.finish();
}

fn bench_codec(c: &mut Criterion) {
    let digest = Digest::new([3u8; 32]);
    let proof = DetachedProof::for_digest(&digest, make_tree(&digest, 5)).unwrap();
    let bytes = proof.to_bytes().unwrap();

    c.bench_function("detached_encode", |b| {
        b.iter(|| proof.to_bytes().unwrap());
    });

    c.bench_function("detached_decode", |b| {
        b.iter(|| DetachedProof::from_bytes(&bytes).unwrap());
    });
}

criterion_group!(benches, bench_merge, bench_traversal, bench_codec);
criterion_main!(benches);
