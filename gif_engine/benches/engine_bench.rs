//! Playback engine benchmarks.
//!
//! Covers metadata walking, frame rendering and parallel probing.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use gif_engine::{probe_batch, read_metadata, FrameBuffer, FrameSource, GifOptions, GifStream, InputSource};
use image::codecs::gif::{GifEncoder, Repeat};
use image::{Delay, Frame, Rgba, RgbaImage};

/// Encode an animation with a moving gradient.
fn create_test_gif(width: u32, height: u32, frames: u32) -> Vec<u8> {
    let mut bytes = Vec::new();
    {
        let mut encoder = GifEncoder::new(&mut bytes);
        encoder.set_repeat(Repeat::Infinite).unwrap();
        let frames = (0..frames).map(|i| {
            let image = RgbaImage::from_fn(width, height, |x, y| {
                let v = ((x + y + i * 8) % 256) as u8;
                Rgba([v, v / 2, 255 - v, 255])
            });
            Frame::from_parts(image, 0, 0, Delay::from_numer_denom_ms(50, 1))
        });
        encoder.encode_frames(frames).unwrap();
    }
    bytes
}

fn bench_metadata(c: &mut Criterion) {
    let mut group = c.benchmark_group("metadata");

    for (name, width, height) in [("64x64", 64, 64), ("256x256", 256, 256)] {
        let data = create_test_gif(width, height, 10);
        group.throughput(Throughput::Bytes(data.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(name), &data, |b, data| {
            b.iter(|| read_metadata(black_box(&data[..])).unwrap());
        });
    }

    group.finish();
}

fn bench_render(c: &mut Criterion) {
    let mut group = c.benchmark_group("render");

    for (name, width, height, sample) in [("128x128", 128, 128, 1), ("256x256/2", 256, 256, 2)] {
        let data = create_test_gif(width, height, 8);
        let options = GifOptions::new().with_sample_size(sample);
        let mut stream = GifStream::open(InputSource::from(data), options).unwrap();
        let (w, h) = stream.canvas_size();
        let mut buffer = FrameBuffer::new(w, h);

        group.throughput(Throughput::Elements((width * height) as u64));
        group.bench_function(BenchmarkId::from_parameter(name), |b| {
            b.iter(|| stream.render_frame(black_box(&mut buffer)).unwrap());
        });
    }

    group.finish();
}

fn bench_probe_batch(c: &mut Criterion) {
    let images: Vec<Vec<u8>> = (0..32).map(|i| create_test_gif(32 + i, 32, 4)).collect();
    let refs: Vec<&[u8]> = images.iter().map(|d| d.as_slice()).collect();

    c.bench_function("probe_batch/32", |b| {
        b.iter(|| probe_batch(black_box(&refs)));
    });
}

criterion_group!(benches, bench_metadata, bench_render, bench_probe_batch);
criterion_main!(benches);
