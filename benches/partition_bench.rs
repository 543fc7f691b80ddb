use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;

use coarse_mesh::partitioning::PartitionTable;
use coarse_mesh::prelude::*;

#[derive(Debug)]
struct Unit;

impl Geometry for Unit {
    fn name(&self) -> &str {
        "unit"
    }
    fn dimension(&self) -> u8 {
        3
    }
    fn evaluate(&self, _: TreeView<'_>, r: &[f64], out: &mut [f64; 3]) -> Result<(), CmeshError> {
        out.copy_from_slice(&r[..3]);
        Ok(())
    }
}

/// Replicated row of `n` hexes with one 64-byte attribute each.
fn row(n: usize) -> Cmesh {
    let mut mesh = Cmesh::new();
    mesh.register_geometry(Arc::new(Unit)).unwrap();
    for g in 0..n {
        let t = mesh.add_tree(TreeClass::Hex).unwrap();
        mesh.set_attribute_pod(t, 1, 0, &[g as u64; 8]).unwrap();
    }
    for g in 1..n {
        mesh.set_join(g - 1, 1, g, 0, 0).unwrap();
    }
    mesh
}

fn bench_tables(c: &mut Criterion) {
    let mut group = c.benchmark_group("tables");
    for &n in &[1_000usize, 100_000] {
        let mut rng = SmallRng::seed_from_u64(42);
        let weights: Vec<f64> = (0..n).map(|_| rng.gen_range(0.5..2.0)).collect();
        group.bench_with_input(BenchmarkId::new("weighted", n), &weights, |b, w| {
            b.iter(|| PartitionTable::weighted(w, 64).unwrap());
        });
        group.bench_with_input(BenchmarkId::new("uniform", n), &n, |b, &n| {
            b.iter(|| PartitionTable::uniform(n as u64, 64).unwrap());
        });
    }
    group.finish();
}

fn bench_repartition(c: &mut Criterion) {
    let mut group = c.benchmark_group("repartition");
    group.sample_size(10);
    for &n in &[1_000usize, 10_000] {
        group.bench_with_input(BenchmarkId::new("shift-4-ranks", n), &n, |b, &n| {
            b.iter(|| {
                let world = RayonComm::world(4);
                std::thread::scope(|s| {
                    for comm in &world {
                        s.spawn(move || {
                            let mut src = row(n);
                            src.commit(comm).unwrap();
                            let mut even = Cmesh::derive(Arc::new(src)).unwrap();
                            even.set_partition(PartitionDirective::uniform()).unwrap();
                            even.commit(comm).unwrap();
                            let q = n as u64 / 8;
                            let mut shifted = Cmesh::derive(Arc::new(even)).unwrap();
                            shifted
                                .set_partition_offsets(vec![0, q, 3 * q, 5 * q, n as u64])
                                .unwrap();
                            shifted.commit(comm).unwrap();
                        });
                    }
                });
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_tables, bench_repartition);
criterion_main!(benches);
