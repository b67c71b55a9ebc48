#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc)]

use color_eyre::eyre;
use criterion::{black_box, BenchmarkId, Criterion};
use exec::{BatchedGemm, Device, DeviceBuffer, GemmArgs, Transposition};
use gemmbench::bench::leading_dims;
use gemmbench::data::DataGenerator;
use kernels::{GemmBatched, TileConfig};
use std::sync::Arc;

const BATCH_SIZE: usize = 8;

struct Problem {
    size: usize,
    a: DeviceBuffer<f32>,
    b: DeviceBuffer<f32>,
    c: DeviceBuffer<f32>,
}

impl Problem {
    fn upload(device: &Device, size: usize) -> eyre::Result<Self> {
        let len = size * size * BATCH_SIZE;
        let mut data = DataGenerator::from_seed(42);
        let upload = |name: &str, values: Vec<f32>| -> eyre::Result<DeviceBuffer<f32>> {
            let buffer: DeviceBuffer<f32> = device.allocate_named(len, Some(name))?;
            device.copy_to_device(&values, &buffer, len)?.wait();
            Ok(buffer)
        };
        let a = upload("a", data.random(len))?;
        let b = upload("b", data.random(len))?;
        let c = upload("c", vec![0.0; len])?;
        Ok(Self { size, a, b, c })
    }

    fn args(&self) -> GemmArgs<'_, f32> {
        let (t_a, t_b) = (Transposition::Transposed, Transposition::Transposed);
        let n = self.size;
        let (lda, ldb, ldc) = leading_dims(t_a, t_b, n, n, n);
        GemmArgs {
            transpose_a: t_a,
            transpose_b: t_b,
            m: n,
            k: n,
            n,
            alpha: 1.0,
            a: &self.a,
            lda,
            b: &self.b,
            ldb,
            beta: 0.0,
            c: &self.c,
            ldc,
            batch_size: BATCH_SIZE,
        }
    }
}

fn run(device: &Arc<Device>, kernel: &GemmBatched, args: &GemmArgs<'_, f32>) -> eyre::Result<()> {
    let events = kernel.launch(device, args)?;
    device.wait(&events)?;
    Ok(())
}

pub fn tile_benchmark(c: &mut Criterion) {
    let device = Device::host().unwrap();
    let mut group = c.benchmark_group("gemm_batched");
    group.sample_size(10);
    group.sampling_mode(criterion::SamplingMode::Flat);

    for size in [64, 128, 256] {
        let problem = Problem::upload(&device, size).unwrap();
        let args = problem.args();
        for tiles in [
            TileConfig::default(),
            TileConfig {
                tile_m: 32,
                tile_n: 32,
                tile_k: 8,
                batches_per_launch: 4,
            },
        ] {
            let kernel = GemmBatched::new(tiles);
            group.bench_with_input(BenchmarkId::new(tiles.to_string(), size), &args, |b, args| {
                b.iter(|| run(&device, &kernel, black_box(args)).unwrap());
            });
        }
        for buffer in [problem.a, problem.b, problem.c] {
            device.deallocate(buffer).unwrap();
        }
    }
    group.finish();
}

criterion::criterion_group!(benches, tile_benchmark);
criterion::criterion_main!(benches);
