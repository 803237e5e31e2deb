use crate::budget::ProcessingBudget;
use crate::error::OmrResult;
use image::{GrayImage, Luma};
use imageproc::geometric_transformations::{warp_into, Interpolation, Projection};
use rayon::prelude::*;

const COARSE_STEP_DEG: f32 = 0.5;
const FINE_STEP_DEG: f32 = 0.1;
const SAMPLE_STRIDE: u32 = 2;
const MIN_SAMPLES: usize = 50;

/// Angle (degrees, clockwise positive in image coordinates) by which the
/// printed rows are tilted, found by maximising the sharpness of the
/// horizontal projection profile of the ink.
pub(crate) fn estimate_skew(
    mask: &GrayImage,
    max_degrees: f32,
    budget: &ProcessingBudget,
) -> OmrResult<f32> {
    let points: Vec<(f32, f32)> = mask
        .enumerate_pixels()
        .filter(|(x, y, p)| x % SAMPLE_STRIDE == 0 && y % SAMPLE_STRIDE == 0 && p.0[0] != 0)
        .map(|(x, y, _)| (x as f32, y as f32))
        .collect();
    if points.len() < MIN_SAMPLES || max_degrees <= 0.0 {
        return Ok(0.0);
    }
    let span = (mask.width() + mask.height()) as f32;

    // 1. Coarse sweep over the whole range
    let coarse = sweep(&points, span, -max_degrees, max_degrees, COARSE_STEP_DEG);
    budget.check()?;

    // 2. Refine around the coarse peak
    let fine = sweep(
        &points,
        span,
        (coarse - COARSE_STEP_DEG).max(-max_degrees),
        (coarse + COARSE_STEP_DEG).min(max_degrees),
        FINE_STEP_DEG,
    );
    budget.check()?;
    Ok(fine)
}

fn sweep(points: &[(f32, f32)], span: f32, from: f32, to: f32, step: f32) -> f32 {
    let count = ((to - from) / step).round() as i32;
    (0..=count)
        .into_par_iter()
        .map(|i| {
            let angle = from + i as f32 * step;
            (angle, profile_score(points, span, angle))
        })
        // Ties go to the smaller correction.
        .reduce(
            || (0.0, 0u64),
            |a, b| {
                if b.1 > a.1 || (b.1 == a.1 && b.0.abs() < a.0.abs()) {
                    b
                } else {
                    a
                }
            },
        )
        .0
}

/// Sum of squared row counts after undoing a rotation of `degrees`.
fn profile_score(points: &[(f32, f32)], span: f32, degrees: f32) -> u64 {
    let (sin, cos) = degrees.to_radians().sin_cos();
    let mut bins = vec![0u32; (3.0 * span) as usize + 1];
    for &(x, y) in points {
        let row = -x * sin + y * cos + span;
        if row >= 0.0 && (row as usize) < bins.len() {
            bins[row as usize] += 1;
        }
    }
    bins.iter().map(|&c| c as u64 * c as u64).sum()
}

/// Rotates `gray` by `degrees` (clockwise positive) about its centre,
/// filling uncovered pixels with `fill`.
pub(crate) fn rotate_about_center(gray: &GrayImage, degrees: f32, fill: u8) -> GrayImage {
    let (w, h) = gray.dimensions();
    let mut out = GrayImage::from_pixel(w, h, Luma([fill]));
    let (cx, cy) = ((w as f32 - 1.0) / 2.0, (h as f32 - 1.0) / 2.0);
    let src = [
        (0.0, 0.0),
        (w as f32 - 1.0, 0.0),
        (w as f32 - 1.0, h as f32 - 1.0),
        (0.0, h as f32 - 1.0),
    ];
    let dst = src.map(|p| rotate_point(p, (cx, cy), degrees));
    match Projection::from_control_points(src, dst) {
        Some(projection) => {
            warp_into(gray, &projection, Interpolation::Bilinear, Luma([fill]), &mut out);
            out
        }
        None => gray.clone(),
    }
}

pub(crate) fn rotate_point(p: (f32, f32), center: (f32, f32), degrees: f32) -> (f32, f32) {
    let (sin, cos) = degrees.to_radians().sin_cos();
    let (dx, dy) = (p.0 - center.0, p.1 - center.1);
    (
        center.0 + dx * cos - dy * sin,
        center.1 + dx * sin + dy * cos,
    )
}
