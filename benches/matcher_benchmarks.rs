//! Benchmarks for template matching and the end-to-end scan.
//!
//! Run with: cargo bench
//!
//! The scan benchmark requires fixture files from
//! `tests/fixtures/generate_fixtures.sh`; the matcher benchmarks run on
//! generated images.

use std::{path::Path, time::Duration};

use criterion::{BenchmarkId, Criterion};
use ffmpeg_next::util::log::Level as LogLevel;
use image::{DynamicImage, Rgb, RgbImage};
use killreel::{ColorMode, ReelOptions, SearchRegion, Template, TemplateMatcher, VideoSource};

const SAMPLE_VIDEO: &str = "tests/fixtures/sample_video.mp4";
const SAMPLE_ICON: &str = "tests/fixtures/kill_icon.png";

fn gameplay_frame(width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        Rgb([
            ((x * 3 + y) % 256) as u8,
            ((x + y * 5) % 256) as u8,
            ((x * y) % 256) as u8,
        ])
    })
}

fn kill_icon(size: u32) -> RgbImage {
    RgbImage::from_fn(size, size, |x, y| {
        if x == y || x + y == size - 1 {
            Rgb([230, 30, 30])
        } else {
            Rgb([20, 20, 20])
        }
    })
}

fn benchmark_best_match(criterion: &mut Criterion) {
    let frame = DynamicImage::ImageRgb8(gameplay_frame(1280, 720));
    let icon = DynamicImage::ImageRgb8(kill_icon(40));

    let mut group = criterion.benchmark_group("best match 1280x720, 40x40 template");
    group.sample_size(10);
    group.measurement_time(Duration::from_secs(15));

    for mode in [ColorMode::Grayscale, ColorMode::Color] {
        let template = Template::from_image(&icon, mode).unwrap();
        let matcher = TemplateMatcher::new(&template, None);
        let frame = match mode {
            ColorMode::Grayscale => DynamicImage::ImageLuma8(frame.to_luma8()),
            ColorMode::Color => frame.clone(),
        };
        group.bench_with_input(
            BenchmarkId::new("full frame", format!("{mode:?}")),
            &frame,
            |bencher, frame| bencher.iter(|| matcher.best_match(frame).unwrap()),
        );
    }

    group.finish();
}

fn benchmark_search_region(criterion: &mut Criterion) {
    let frame = DynamicImage::ImageRgb8(gameplay_frame(1280, 720)).to_luma8();
    let frame = DynamicImage::ImageLuma8(frame);
    let icon = DynamicImage::ImageRgb8(kill_icon(40));
    let template = Template::from_image(&icon, ColorMode::Grayscale).unwrap();

    // Kill feed in the top-right quarter.
    let region = SearchRegion::new(960, 0, 320, 180);
    let matcher = TemplateMatcher::new(&template, Some(region));

    criterion.bench_function("best match in 320x180 region", |bencher| {
        bencher.iter(|| matcher.best_match(&frame).unwrap());
    });
}

fn benchmark_scan(criterion: &mut Criterion) {
    ffmpeg_next::util::log::set_level(LogLevel::Error);

    if !Path::new(SAMPLE_VIDEO).exists() || !Path::new(SAMPLE_ICON).exists() {
        eprintln!("Skipping benchmark: fixture not found");
        return;
    }

    let template = Template::open(SAMPLE_ICON, ColorMode::Grayscale).unwrap();

    let mut group = criterion.benchmark_group("scan sample video");
    group.sample_size(10);
    group.measurement_time(Duration::from_secs(20));

    for stride in [1_u64, 5, 15] {
        let options = ReelOptions::new().with_sample_stride(stride);
        group.bench_with_input(
            BenchmarkId::from_parameter(stride),
            &options,
            |bencher, options| {
                bencher.iter(|| {
                    let mut source = VideoSource::open(SAMPLE_VIDEO).unwrap();
                    killreel::scan_video(&mut source, &template, options).unwrap()
                });
            },
        );
    }

    group.finish();
}

criterion::criterion_group!(
    benches,
    benchmark_best_match,
    benchmark_search_region,
    benchmark_scan,
);
criterion::criterion_main!(benches);
