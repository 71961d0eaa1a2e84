//! Performance benchmarks for the recording pipeline
//!
//! Run with: cargo bench
//!
//! Screen frames arrive as 32-bit ARGB and are converted before H.264
//! encoding; microphone audio is encoded to Opus in 20 ms packets.

use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tempfile::tempdir;

use crabscreen::audio::OpusEncoder;
use crabscreen::recording::{argb_to_yuv420, H264Encoder, Muxer, RecordingConfig};
use crabscreen::testing::{synthetic_audio_sample, synthetic_video_frame, MemoryWriterFactory};

const RESOLUTIONS: [(u32, u32, &str); 3] = [(640, 480, "480p"), (1280, 720, "720p"), (1920, 1080, "1080p")];

fn bench_argb_conversion(c: &mut Criterion) {
    let mut group = c.benchmark_group("ARGB to YUV420");
    group.measurement_time(Duration::from_secs(5));

    for (width, height, name) in RESOLUTIONS {
        let frame = synthetic_video_frame(7, width, height, Duration::ZERO);
        group.throughput(Throughput::Elements((width * height) as u64));
        group.bench_with_input(BenchmarkId::new("convert", name), &frame.data, |b, argb| {
            b.iter(|| argb_to_yuv420(black_box(argb), width, height));
        });
    }

    group.finish();
}

fn bench_h264_encoding(c: &mut Criterion) {
    let mut group = c.benchmark_group("H264 Encoding");
    group.measurement_time(Duration::from_secs(10));

    for (width, height, name) in RESOLUTIONS {
        // 1080p is expensive
        if width == 1920 {
            group.sample_size(10);
        }

        let frames: Vec<_> = (0..8)
            .map(|i| synthetic_video_frame(i, width, height, Duration::from_millis(i * 33)))
            .collect();
        group.throughput(Throughput::Elements((width * height) as u64));
        group.bench_with_input(BenchmarkId::new("encode_frame", name), &frames, |b, frames| {
            let mut encoder = H264Encoder::new(width, height, 30.0, 2_500_000).expect("Failed to create encoder");
            let mut i = 0;
            b.iter(|| {
                i = (i + 1) % frames.len();
                encoder.encode_frame(black_box(&frames[i])).expect("Encode failed")
            });
        });
    }

    group.finish();
}

fn bench_opus_encoding(c: &mut Criterion) {
    let mut group = c.benchmark_group("Opus Encoding");
    group.measurement_time(Duration::from_secs(5));

    // Capture callbacks deliver uneven buffer sizes
    let buffer_sizes = [(480, "10ms"), (960, "20ms"), (1440, "30ms")];

    for (frames, name) in buffer_sizes {
        let sample = synthetic_audio_sample(0, frames, 2, Duration::ZERO);
        group.throughput(Throughput::Elements(frames as u64 * 2));
        group.bench_with_input(BenchmarkId::new("encode", name), &sample, |b, sample| {
            let mut encoder = OpusEncoder::new(48000, 2, 128_000).expect("Failed to create encoder");
            b.iter(|| encoder.encode(black_box(sample), 0.0).expect("Encode failed"));
        });
    }

    group.finish();
}

fn bench_muxer_append(c: &mut Criterion) {
    let mut group = c.benchmark_group("Muxer Append");

    group.bench_function("append_video", |b| {
        let dir = tempdir().expect("Create temp dir");
        let factory = MemoryWriterFactory::new();
        let config = RecordingConfig::new(64, 48, 30.0).with_queue_capacity(1024, 64);
        let mut muxer = Muxer::create(dir.path().join("bench.mp4"), config, &factory).expect("Create muxer");
        muxer.start_writing().expect("Start writing");

        let mut n = 0u64;
        b.iter(|| {
            n += 1;
            let frame = synthetic_video_frame(n, 64, 48, Duration::from_micros(n * 33_333));
            muxer.append_video(black_box(frame)).expect("Append failed")
        });

        muxer.mark_all_finished();
        let _ = muxer.finish();
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_argb_conversion,
    bench_h264_encoding,
    bench_opus_encoding,
    bench_muxer_append
);
criterion_main!(benches);
