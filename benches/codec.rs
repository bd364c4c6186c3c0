use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rustfft::num_complex::Complex32;

use iq_remote_client::codec::baseband::compress;
use iq_remote_client::codec::efft::{EfftDecoder, EfftEncoder, EfftSettings, EFFT_FRAME_SIZE};
use iq_remote_client::codec::sample_stream::{decode_frame, encode_frame};
use iq_remote_client::codec::{BasebandDecompressor, BasebandEncoding};
use iq_remote_client::protocol::SampleType;
use iq_remote_client::transmit::quantize_chunk;

fn tone(len: usize) -> Vec<Complex32> {
    (0..len)
        .map(|n| Complex32::from_polar(0.8, 0.05 * n as f32))
        .collect()
}

fn bench_sample_stream(c: &mut Criterion) {
    let frame = encode_frame(&tone(16_384), SampleType::I16);
    c.bench_function("sample_stream_decode_i16", |b| {
        b.iter(|| decode_frame(black_box(&frame)))
    });

    let compressed = compress(&frame, 3).unwrap();
    let mut decompressor = BasebandDecompressor::new().unwrap();
    c.bench_function("baseband_zstd_decode", |b| {
        b.iter(|| decompressor.decode(BasebandEncoding::Compressed, black_box(&compressed)))
    });
}

fn bench_efft(c: &mut Criterion) {
    let samples = tone(EFFT_FRAME_SIZE * 16);
    let mut encoder = EfftEncoder::new(4.0);
    c.bench_function("efft_encode", |b| b.iter(|| encoder.encode(black_box(&samples))));

    let bins = EfftEncoder::new(4.0).encode(&samples);
    let settings = EfftSettings {
        noise_figure: vec![-90.0; 64],
        noise_multiplier_db: 0.0,
    };
    let mut decoder = EfftDecoder::new();
    c.bench_function("efft_decode", |b| {
        b.iter(|| decoder.decode(black_box(&bins), &settings))
    });
}

fn bench_quantize(c: &mut Criterion) {
    let chunk = tone(600);
    c.bench_function("quantize_tx_chunk", |b| {
        b.iter(|| quantize_chunk(black_box(&chunk)).encode())
    });
}

criterion_group!(benches, bench_sample_stream, bench_efft, bench_quantize);
criterion_main!(benches);
