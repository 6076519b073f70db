//! Performance benchmarks for sheetstream
//!
//! Run with: cargo bench --package sheetstream-core

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use sheetstream_core::{DType, FrameShape, SharedDoubleBuffer};
use std::time::SystemTime;

fn unique_name(tag: &str) -> String {
    let ts = SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    format!("/ss_bench_{tag}_{ts}")
}

fn bench_frame_copy(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_copy");
    group.sample_size(50);

    for side in [256u32, 1024, 2048].iter() {
        let shape = FrameShape::new(*side, *side, DType::UInt16);
        group.throughput(Throughput::Bytes(shape.frame_bytes() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(side), side, |b, _| {
            let name = unique_name("copy");
            let mut buffer = SharedDoubleBuffer::allocate(&name, 4, shape).unwrap();
            let frame = vec![0x42u8; shape.frame_bytes()];

            let mut index = 0u32;
            b.iter(|| {
                buffer.write_frame(index % 4, black_box(&frame));
                index += 1;
            });
        });
    }
    group.finish();
}

fn bench_handoff_cycle(c: &mut Criterion) {
    // Fill a chunk, toggle, drain inline: the full protocol round trip
    // minus the codec, which is what bounds the acquisition side
    let shape = FrameShape::new(256, 256, DType::UInt16);
    let chunk_size = 4u32;

    let mut group = c.benchmark_group("handoff_cycle");
    group.throughput(Throughput::Bytes(shape.chunk_bytes(chunk_size) as u64));
    group.bench_function("fill_toggle_drain", |b| {
        let name = unique_name("cycle");
        let mut buffer = SharedDoubleBuffer::allocate(&name, chunk_size, shape).unwrap();
        let reader = SharedDoubleBuffer::open(&name).unwrap();
        let frame = vec![7u8; shape.frame_bytes()];

        b.iter(|| {
            for i in 0..chunk_size {
                buffer.write_frame(i, &frame);
            }
            buffer.toggle();
            let ready = reader.try_acquire_ready().unwrap();
            black_box(ready.frames().len());
            ready.complete();
        });
    });
    group.finish();
}

fn bench_chunk_compression(c: &mut Criterion) {
    let shape = FrameShape::new(1024, 1024, DType::UInt16);
    let chunk = vec![0x1234u16; 1024 * 1024]
        .iter()
        .flat_map(|v| v.to_le_bytes())
        .collect::<Vec<u8>>();

    let mut group = c.benchmark_group("chunk_compression");
    group.sample_size(20);
    group.throughput(Throughput::Bytes(shape.frame_bytes() as u64));
    group.bench_function("lz4", |b| {
        b.iter(|| {
            let compressed = lz4_flex::block::compress_prepend_size(black_box(&chunk));
            black_box(compressed.len());
        });
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_frame_copy,
    bench_handoff_cycle,
    bench_chunk_compression
);
criterion_main!(benches);
