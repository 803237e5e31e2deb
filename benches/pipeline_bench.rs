use criterion::{criterion_group, criterion_main, Criterion};
use omr_grader::config::{DetectionParams, ImageParams, ScoringParams};
use omr_grader::detector::{BubbleDetector, GridConfig, SubjectRange};
use omr_grader::evaluator::{AnswerEvaluator, SheetTemplate};
use omr_grader::normalizer::{ImageNormalizer, Orientation, RawSheetImage};
use omr_grader::synth::{self, SheetSpec};
use omr_grader::{OmrConfig, SheetProcessor, SheetSubmission};
use std::hint::black_box;
use std::sync::Arc;

fn bench_grid() -> GridConfig {
    GridConfig::builder()
        .questions(40)
        .question_columns(2)
        .subjects(vec![
            SubjectRange {
                name: "Reading".to_string(),
                first: 1,
                last: 20,
            },
            SubjectRange {
                name: "Maths".to_string(),
                first: 21,
                last: 40,
            },
        ])
        .build()
}

fn photo_png(grid: &GridConfig, seed: u64) -> Vec<u8> {
    SheetSpec::builder()
        .grid(grid.clone())
        .marks(synth::random_marks(grid, seed))
        .rotation(Orientation::Clockwise90)
        .skew_degrees(1.5)
        .perspective(0.015)
        .desk(Some(70))
        .speckle(0.0005)
        .seed(seed)
        .build()
        .render_png()
        .expect("Failed to render bench sheet")
}

fn criterion_benchmark(c: &mut Criterion) {
    let grid = bench_grid();
    let marks = synth::random_marks(&grid, 3);
    let png = photo_png(&grid, 3);
    let raw = RawSheetImage::new(png.clone());

    let normalizer = ImageNormalizer::new(ImageParams::default());
    c.bench_function("normalize (photo, 90°)", |b| {
        b.iter(|| normalizer.normalize(black_box(&raw)).expect("normalize"))
    });

    let normalized = normalizer.normalize(&raw).expect("normalize");
    let detector = BubbleDetector::new(DetectionParams::default());
    c.bench_function("detect (40 questions)", |b| {
        b.iter(|| detector.detect(black_box(&normalized), black_box(&grid)).expect("detect"))
    });

    let config = OmrConfig::default();
    let evaluator = Arc::new(AnswerEvaluator::new(ScoringParams::default()));
    let processor = SheetProcessor::new(config, evaluator).expect("Failed to build processor");
    processor
        .register_template(SheetTemplate {
            key: synth::answer_key_for("bench", &grid, &marks),
            grid: Some(grid.clone()),
        })
        .expect("Failed to register template");

    let one = SheetSubmission::from_bytes(png, "bench", "s0");
    c.bench_function("process_one", |b| {
        b.iter(|| processor.process_one(black_box(&one)))
    });

    let batch: Vec<SheetSubmission> = (0..8)
        .map(|i| SheetSubmission::from_bytes(photo_png(&grid, i), "bench", format!("s{}", i)))
        .collect();
    let mut group = c.benchmark_group("batch");
    group.sample_size(10);
    group.bench_function("process_batch (8 sheets)", |b| {
        b.iter(|| processor.process_batch(black_box(&batch)))
    });
    group.finish();
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
