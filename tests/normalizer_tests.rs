mod common;

use common::*;
use omr_grader::config::{DetectionParams, ImageParams};
use omr_grader::detector::BubbleDetector;
use omr_grader::error::ErrorKind;
use omr_grader::normalizer::{ImageNormalizer, Orientation, RawSheetImage, Rectification};
use omr_grader::synth::{self, SheetSpec};
use rstest::rstest;

fn normalizer() -> ImageNormalizer {
    ImageNormalizer::new(ImageParams::default())
}

#[test]
fn test_output_is_binary_and_canonical_size() {
    let png = flat_sheet(&small_grid(), &default_marks());
    let out = normalizer().normalize(&RawSheetImage::new(png)).unwrap();

    assert_eq!((out.width(), out.height()), (800, 1000));
    assert!(out.image.pixels().all(|p| p.0[0] == 0 || p.0[0] == 255));
    assert_eq!(out.rectification, Rectification::Perspective);
    assert_eq!(out.orientation, Orientation::Upright);
    assert!(out.marker_found);
    assert!(out.skew_degrees.abs() < 0.5);
}

#[rstest]
#[case::upright(Orientation::Upright)]
#[case::quarter(Orientation::Clockwise90)]
#[case::upside_down(Orientation::Rotated180)]
#[case::three_quarters(Orientation::Clockwise270)]
fn test_photographed_sheet_in_any_orientation(#[case] rotation: Orientation) {
    let grid = small_grid();
    let marks = default_marks();
    let out = normalizer()
        .normalize(&RawSheetImage::new(photo_sheet(&grid, &marks, rotation)))
        .unwrap();

    assert_eq!(out.orientation, rotation, "orientation recovered");
    assert!(out.marker_found);
    assert_eq!(out.rectification, Rectification::Perspective);

    let answers = BubbleDetector::new(DetectionParams::default())
        .detect(&out, &grid)
        .unwrap()
        .answers();
    for (q, expected) in &marks {
        assert_eq!(answers[q].marked, *expected, "question {} at {}", q, rotation);
    }
}

#[test]
fn test_half_turn_round_trip_matches_upright() {
    let grid = small_grid();
    let marks = default_marks();
    let render = |rotation| {
        let png = SheetSpec::builder()
            .grid(grid.clone())
            .marks(marks.clone())
            .rotation(rotation)
            .build()
            .render_png()
            .unwrap();
        normalizer().normalize(&RawSheetImage::new(png)).unwrap()
    };
    let upright = render(Orientation::Upright);
    let flipped = render(Orientation::Rotated180);
    assert_eq!(flipped.orientation, Orientation::Rotated180);

    let agree = upright
        .image
        .pixels()
        .zip(flipped.image.pixels())
        .filter(|(a, b)| a == b)
        .count();
    let share = agree as f64 / (800.0 * 1000.0);
    assert!(share > 0.97, "only {:.2}% of pixels agree", share * 100.0);
}

#[test]
fn test_frameless_sheet_falls_back_to_deskew() {
    let grid = small_grid();
    let marks = default_marks();
    let png = SheetSpec::builder()
        .grid(grid.clone())
        .marks(marks.clone())
        .border(false)
        .skew_degrees(3.0)
        .build()
        .render_png()
        .unwrap();
    let out = normalizer().normalize(&RawSheetImage::new(png)).unwrap();

    assert_eq!(out.rectification, Rectification::Deskew);
    assert!(
        (2.0..=4.0).contains(&out.skew_degrees.abs()),
        "measured skew {}",
        out.skew_degrees
    );
    assert_eq!(out.orientation, Orientation::Upright);

    let answers = BubbleDetector::new(DetectionParams::default())
        .detect(&out, &grid)
        .unwrap()
        .answers();
    for (q, expected) in &marks {
        assert_eq!(answers[q].marked, *expected, "question {}", q);
    }
}

#[test]
fn test_blank_page_gives_empty_frame() {
    let blank = image::GrayImage::from_pixel(600, 800, image::Luma([250]));
    let out = normalizer()
        .normalize(&RawSheetImage::new(synth::encode_png(&blank).unwrap()))
        .unwrap();
    assert_eq!(out.rectification, Rectification::Deskew);
    assert!(out.image.pixels().all(|p| p.0[0] == 255));
}

#[rstest]
#[case::too_small(80, 400)]
#[case::too_large(5200, 200)]
fn test_out_of_range_dimensions(#[case] w: u32, #[case] h: u32) {
    let img = image::GrayImage::from_pixel(w, h, image::Luma([255]));
    let err = normalizer()
        .normalize(&RawSheetImage::new(synth::encode_png(&img).unwrap()))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Dimension);
}

#[test]
fn test_jpeg_input_normalizes() {
    let page = SheetSpec::builder()
        .grid(small_grid())
        .marks(default_marks())
        .build()
        .render();
    let jpeg = synth::encode(&page, image::ImageFormat::Jpeg).unwrap();
    let out = normalizer()
        .normalize(&RawSheetImage::with_format(jpeg, "image/jpeg"))
        .unwrap();
    assert_eq!(out.orientation, Orientation::Upright);
    assert_eq!(out.rectification, Rectification::Perspective);
}
