//! Benchmarks for the per-iteration DPD computations
//!
//! Run with: cargo bench -p dpd-core --bench model_bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use dpd_core::align::FrameAligner;
use dpd_core::model::PolynomialAmplitudeModel;
use dpd_core::quality::{OfdmMerProbe, QualityProbe};
use dpd_core::reduce::{BinnedMedianReducer, FrameReducer};
use dpd_core::types::{IQSample, SampleFrame, IDENTITY_AM};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

fn capture(n: usize) -> (SampleFrame, SampleFrame) {
    let mut rng = StdRng::seed_from_u64(42);
    let normal = Normal::new(0.0f32, 0.08).unwrap();
    let tx: Vec<IQSample> = (0..n)
        .map(|_| IQSample::new(normal.sample(&mut rng), normal.sample(&mut rng)))
        .collect();
    let rx = tx
        .iter()
        .map(|s| {
            let a = s.norm();
            *s * (1.0 - 0.8 * a * a)
        })
        .collect();
    (SampleFrame::new(tx, 0.0), SampleFrame::new(rx, 0.0))
}

// ============================================================================
// Amplitude statistics
// ============================================================================

fn bench_reduce(c: &mut Criterion) {
    let mut group = c.benchmark_group("reduce");
    let reducer = BinnedMedianReducer::default();

    for n in [8192usize, 81920].iter() {
        let (tx, rx) = capture(*n);
        group.throughput(Throughput::Elements(*n as u64));
        group.bench_with_input(BenchmarkId::new("binned_median", n), n, |b, _| {
            b.iter(|| reducer.reduce(black_box(&tx), black_box(&rx)))
        });
    }

    group.finish();
}

// ============================================================================
// AM/AM model
// ============================================================================

fn bench_model(c: &mut Criterion) {
    let mut group = c.benchmark_group("am_model");
    let (tx, rx) = capture(81920);
    let amps = BinnedMedianReducer::default().reduce(&tx, &rx).unwrap();

    group.bench_function("fit", |b| {
        b.iter(|| PolynomialAmplitudeModel::fit(black_box(amps.tx()), black_box(amps.rx())))
    });

    group.bench_function("get_next_coefs", |b| {
        b.iter(|| {
            PolynomialAmplitudeModel::get_next_coefs(
                black_box(amps.tx()),
                black_box(amps.rx()),
                &IDENTITY_AM,
                0.5,
            )
        })
    });

    group.finish();
}

// ============================================================================
// Capture post-processing
// ============================================================================

fn bench_capture_path(c: &mut Criterion) {
    let mut group = c.benchmark_group("capture_path");
    let (tx, rx) = capture(81920);
    let mut aligner = FrameAligner::default();

    group.throughput(Throughput::Elements(tx.len() as u64));
    group.bench_function("align_81920", |b| {
        b.iter(|| aligner.align(black_box(&tx.samples), black_box(&rx.samples)))
    });

    let probe = OfdmMerProbe::dab_mode_1(2_048_000.0).unwrap();
    let window = &tx.samples[..probe.window_len()];
    group.bench_function("mer_mode_1", |b| b.iter(|| probe.mer_db(black_box(window))));

    group.finish();
}

criterion_group!(benches, bench_reduce, bench_model, bench_capture_path);
criterion_main!(benches);
