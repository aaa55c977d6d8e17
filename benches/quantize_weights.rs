use std::time::Duration;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use quantized_model_sweep::matrices::Matrix;
use quantized_model_sweep::quantization::{quantize_matrix, unpack_bits, QuantizationMode};

fn quantize_matrix_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("QuantizeMatrix");
    group.sample_size(10);
    group.warm_up_time(Duration::from_millis(100));

    let weights = Matrix::random_square(256, -1.0..1.0);

    for mode in QuantizationMode::ALL {
        for nbits in [8u8, 4, 2] {
            group.bench_with_input(
                BenchmarkId::new(mode.name(), nbits),
                &nbits,
                |b, &nbits| {
                    b.iter(|| quantize_matrix(&weights, nbits, mode));
                },
            );
        }
    }

    group.finish();
}

fn unpack_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("Dequantize");
    group.sample_size(10);

    let weights = Matrix::random_square(256, -1.0..1.0);
    for nbits in [8u8, 5, 3, 1] {
        let quantized = match quantize_matrix(&weights, nbits, QuantizationMode::LinearLut) {
            Ok(q) => q,
            Err(e) => panic!("quantize failed: {e}"),
        };
        group.bench_with_input(BenchmarkId::new("unpack_bits", nbits), &nbits, |b, &nbits| {
            b.iter(|| unpack_bits(&quantized.packed, nbits, weights.len()));
        });
        group.bench_with_input(BenchmarkId::new("dequantize", nbits), &nbits, |b, _| {
            b.iter(|| quantized.dequantize(weights.rows, weights.cols));
        });
    }

    group.finish();
}

criterion_group!(benches, quantize_matrix_benchmark, unpack_benchmark);
criterion_main!(benches);
