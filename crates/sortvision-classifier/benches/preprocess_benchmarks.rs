//! Preprocessing latency benchmarks
//!
//! Covers the per-request CPU work that happens before the forward pass:
//! RGB conversion, center crop, resize and normalization.
//!
//! Run with: cargo bench -p sortvision-classifier

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use image::{DynamicImage, Rgb, RgbImage};
use sortvision_classifier::{PreprocessConfig, Preprocessor, UndersizePolicy};

fn camera_frame(width: u32, height: u32) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x % 251) as u8, (y % 241) as u8, ((x * y) % 239) as u8])
    }))
}

/// Full chain for typical upload sizes
fn benchmark_process(c: &mut Criterion) {
    let preprocessor = Preprocessor::default();

    let sizes = vec![
        ("exact_480", (480, 480)),
        ("vga", (640, 480)),
        ("hd", (1280, 720)),
        ("full_hd", (1920, 1080)),
        ("phone_12mp", (4032, 3024)),
    ];

    let mut group = c.benchmark_group("Preprocess");
    group.sample_size(30);

    for (name, (width, height)) in sizes {
        let image = camera_frame(width, height);
        group.bench_with_input(BenchmarkId::new("process", name), &image, |b, image| {
            b.iter(|| preprocessor.process(black_box(image)).unwrap());
        });
    }

    group.finish();
}

/// Undersized inputs under the two accepting policies
fn benchmark_undersize(c: &mut Criterion) {
    let image = camera_frame(320, 240);

    let mut group = c.benchmark_group("Preprocess_Undersize");
    group.sample_size(30);

    for policy in [UndersizePolicy::Pad, UndersizePolicy::Upscale] {
        let preprocessor = Preprocessor::new(PreprocessConfig {
            undersize: policy,
            ..Default::default()
        })
        .unwrap();

        group.bench_with_input(
            BenchmarkId::new("process", format!("{:?}", policy)),
            &image,
            |b, image| {
                b.iter(|| preprocessor.process(black_box(image)).unwrap());
            },
        );
    }

    group.finish();
}

criterion_group!(benches, benchmark_process, benchmark_undersize);
criterion_main!(benches);
