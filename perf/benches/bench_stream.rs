use criterion::{Criterion, Throughput, black_box, criterion_group, criterion_main};
use opal_perf::{bench_region, mono_now_ns};
use opal_ring::{Frame, FrameReader, FrameWriter};

const W: usize = 64;
const H: usize = 64;
const D: usize = 3;

fn bench_publish(c: &mut Criterion) {
    let region = bench_region("pub");
    let mut writer = FrameWriter::create(&region, W, H, D).expect("failed to create writer");
    let image = vec![0x5Au8; writer.image_size()];

    let mut group = c.benchmark_group("stream");
    group.throughput(Throughput::Bytes(image.len() as u64));

    group.bench_function("publish", |b| {
        b.iter(|| writer.publish(W, H, D, mono_now_ns(), black_box(&image)));
    });

    drop(group);
    writer.destroy().expect("failed to destroy bench region");
}

fn bench_try_read_empty(c: &mut Criterion) {
    let region = bench_region("empty");
    let writer = FrameWriter::create(&region, W, H, D).expect("failed to create writer");
    let mut reader = FrameReader::open(&region).expect("failed to open reader");
    let mut frame = Frame::new();

    let mut group = c.benchmark_group("stream");
    group.throughput(Throughput::Elements(1));

    group.bench_function("try_read (caught up)", |b| {
        b.iter(|| black_box(reader.try_read(&mut frame)));
    });

    drop(group);
    writer.destroy().expect("failed to destroy bench region");
}

fn bench_round_trip(c: &mut Criterion) {
    let region = bench_region("rt");
    let mut writer = FrameWriter::create(&region, W, H, D).expect("failed to create writer");
    let mut reader = FrameReader::open(&region).expect("failed to open reader");
    let image = vec![0xA5u8; writer.image_size()];
    let mut frame = Frame::new();

    let mut group = c.benchmark_group("stream");
    group.throughput(Throughput::Bytes(image.len() as u64));

    group.bench_function("round_trip", |b| {
        b.iter(|| {
            writer
                .publish(W, H, D, mono_now_ns(), black_box(&image))
                .expect("publish failed");
            black_box(reader.try_read(&mut frame)).expect("read failed");
        });
    });

    drop(group);
    writer.destroy().expect("failed to destroy bench region");
}

criterion_group!(benches, bench_publish, bench_try_read_empty, bench_round_trip);
criterion_main!(benches);
