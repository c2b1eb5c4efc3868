//! Benchmarks for pipeline execution.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use pipeflow::pipeline::{PipeLineBuilder, PipeSpec};
use pipeflow::pipes::{EchoPipe, FixedResultPipe};
use pipeflow::testing::PipeHarness;
use std::sync::Arc;

fn chain(length: usize) -> PipeHarness {
    let mut builder = PipeLineBuilder::new("bench");
    for i in 0..length {
        builder = builder
            .pipe(PipeSpec::new(format!("echo{i}"), Arc::new(EchoPipe)))
            .unwrap();
    }
    PipeHarness::new(builder).unwrap()
}

fn pipeline_benchmark(c: &mut Criterion) {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();

    let single = PipeHarness::single(FixedResultPipe::new("done")).unwrap();
    c.bench_function("single_pipe", |b| {
        b.iter(|| rt.block_on(single.run(black_box("input"))).unwrap());
    });

    let long = chain(20);
    c.bench_function("twenty_pipe_chain", |b| {
        b.iter(|| rt.block_on(long.run(black_box("input"))).unwrap());
    });
}

criterion_group!(benches, pipeline_benchmark);
criterion_main!(benches);
