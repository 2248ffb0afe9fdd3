use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use trace_proto::{inflate_container, walk_frames, write_container, FrameStats, FRAME_STRIDE};

fn synthetic_stream(frames: usize, seed: u64) -> Vec<u8> {
    let mut rng = SmallRng::seed_from_u64(seed);
    let mut stream = Vec::with_capacity(frames * (FRAME_STRIDE + 2));
    for index in 0..frames {
        stream.push(rng.gen_range(1..=90u8));
        stream.extend_from_slice(&(index as u32 * 3).to_le_bytes());
        stream.extend_from_slice(&rng.gen_range(0..4u16).to_le_bytes());
        for _ in 0..12 {
            stream.push(rng.gen_range(1..=255u8));
        }
        if rng.gen_bool(0.2) {
            stream.extend_from_slice(&[0, 0]);
        }
    }
    stream
}

fn bench_frame_walk(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_walk");

    for frames in [1_000usize, 10_000, 100_000] {
        let stream = synthetic_stream(frames, 7);
        group.bench_with_input(BenchmarkId::new("stats", frames), &stream, |b, stream| {
            b.iter(|| walk_frames(stream).collect::<FrameStats>());
        });
    }

    let stream = synthetic_stream(10_000, 11);
    let chunks: Vec<&[u8]> = stream.chunks(64 * 1024).collect();
    let container = write_container(&chunks).expect("container encodes");
    group.bench_function("inflate_then_walk", |b| {
        b.iter_batched(
            || container.clone(),
            |raw| {
                let inflated = inflate_container(&raw);
                walk_frames(&inflated.bytes).count()
            },
            BatchSize::SmallInput,
        );
    });

    group.finish();
}

criterion_group!(frame_benches, bench_frame_walk);
criterion_main!(frame_benches);
