use std::sync::Arc;

use chunkio::{Output, Pool, PoolConfig};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

fn roundtrip(pool: &Arc<Pool>, payload: &[u8]) -> usize {
    let mut out = Output::new(Arc::clone(pool));
    out.write_fully(payload).unwrap();
    let packet = out.build();
    let mut input = packet.into_input();
    let mut buf = vec![0u8; payload.len()];
    input.read_fully(&mut buf).unwrap();
    buf.len()
}

fn bench_buffer_roundtrip(c: &mut Criterion) {
    let pool = Pool::new(PoolConfig {
        chunk_capacity: 4096,
        max_free_chunks: 256,
    });

    let mut group = c.benchmark_group("buffer_roundtrip");
    for size in [64usize, 4_096, 262_144] {
        let payload = vec![0xABu8; size];
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| black_box(roundtrip(&pool, &payload)));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_buffer_roundtrip);
criterion_main!(benches);
