//! Benchmark sequential writes with varying chunk sizes.

use super::{directory, FILE_SIZE};
use commonware_runtime::{deterministic, Runner as _};
use criterion::{criterion_group, Criterion};
use std::time::{Duration, Instant};

fn bench_write_sequential(c: &mut Criterion) {
    let data = vec![0xABu8; FILE_SIZE];
    for chunk in [1, 100, 4096, 65536] {
        c.bench_function(&format!("{}/chunk={}", module_path!(), chunk), |b| {
            b.iter_custom(|iters| {
                let data = data.clone();
                let executor = deterministic::Runner::default();
                executor.start(|_| async move {
                    let directory = directory();
                    let mut elapsed = Duration::ZERO;
                    for i in 0..iters {
                        let name = format!("_{i}.cfs");
                        let start = Instant::now();
                        let mut output = directory.create_output(&name).await.unwrap();
                        for piece in data.chunks(chunk) {
                            if piece.len() == 1 {
                                output.write_byte(piece[0]).await.unwrap();
                            } else {
                                output.write_bytes(piece).await.unwrap();
                            }
                        }
                        output.close().await.unwrap();
                        elapsed += start.elapsed();

                        // Cleanup
                        directory.delete_file(&name).await.unwrap();
                    }
                    elapsed
                })
            });
        });
    }
}

criterion_group! {
    name = benches;
    config = Criterion::default().sample_size(10);
    targets = bench_write_sequential
}
