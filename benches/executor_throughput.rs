use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use ocp_cost_attribution::executor::{run_streaming, ExecutorConfig};

fn synthetic_chunks(chunk_count: usize, rows_per_chunk: usize) -> Vec<Vec<f64>> {
    (0..chunk_count)
        .map(|c| (0..rows_per_chunk).map(|r| (c * rows_per_chunk + r) as f64).collect())
        .collect()
}

fn score_chunk(chunk: Vec<f64>, _reference: &(), _index: usize) -> ocp_cost_attribution::error::EngineResult<Vec<f64>> {
    Ok(chunk.into_iter().map(|x| (x * 1.0000001).sqrt()).collect())
}

fn bench_executor(c: &mut Criterion) {
    let chunk_count = 64;
    let rows_per_chunk = 4_000;
    let chunks = synthetic_chunks(chunk_count, rows_per_chunk);

    let mut group = c.benchmark_group("executor_throughput");
    group.throughput(Throughput::Elements((chunk_count * rows_per_chunk) as u64));

    group.bench_function(BenchmarkId::new("serial", chunk_count), |b| {
        b.iter(|| {
            let cfg = ExecutorConfig { parallel: false, max_workers: 1 };
            run_streaming(chunks.clone().into_iter(), &(), &cfg, &|| false, score_chunk, |v| {
                v.into_iter().flatten().collect()
            })
            .unwrap()
        })
    });

    for workers in [2, 4, 8] {
        group.bench_function(BenchmarkId::new("parallel", workers), |b| {
            b.iter(|| {
                let cfg = ExecutorConfig { parallel: true, max_workers: workers };
                run_streaming(chunks.clone().into_iter(), &(), &cfg, &|| false, score_chunk, |v| {
                    v.into_iter().flatten().collect()
                })
                .unwrap()
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_executor);
criterion_main!(benches);
