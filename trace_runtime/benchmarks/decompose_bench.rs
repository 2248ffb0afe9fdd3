use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use trace_runtime::{decompose, normalize_sources, NormalizeOptions, RecordSource};

fn bench_decompose(c: &mut Criterion) {
    let mut group = c.benchmark_group("decompose");

    for distance in [4.0f64, 40.0, 400.0] {
        group.bench_with_input(
            BenchmarkId::new("straight", distance as u32),
            &distance,
            |b, &distance| {
                let ticks = (distance / 4.45).ceil() as i64 * 30 + 30;
                b.iter(|| decompose(0, ticks, 0.0, 0.0, distance, distance / 2.0));
            },
        );
    }

    group.finish();
}

fn synthetic_source(records: usize, seed: u64) -> RecordSource {
    let mut rng = SmallRng::seed_from_u64(seed);
    let mut text = String::new();
    for index in 0..records {
        let tick = index as i64 * 20;
        let (x, y) = (rng.gen_range(-50.0..50.0), rng.gen_range(-50.0..50.0));
        text.push_str(&format!(
            "{{\"action\":\"move_to_direction\",\"tick\":{end},\"player\":{{\
             \"start_movement\":{{\"tick\":{tick},\"x\":0,\"y\":0}},\
             \"end_movement\":{{\"tick\":{end},\"x\":{x},\"y\":{y}}}}}}}\n",
            end = tick + 300,
        ));
    }
    RecordSource::new("actions.jsonl", text)
}

fn bench_normalize(c: &mut Criterion) {
    let mut group = c.benchmark_group("normalize_sources");
    for records in [1_000usize, 10_000] {
        let sources: Vec<_> = (0..4).map(|seed| synthetic_source(records, seed)).collect();
        group.bench_with_input(BenchmarkId::new("moves", records), &sources, |b, sources| {
            b.iter(|| normalize_sources(sources, &NormalizeOptions::default()).trace.len());
        });
    }
    group.finish();
}

criterion_group!(decompose_benches, bench_decompose, bench_normalize);
criterion_main!(decompose_benches);
