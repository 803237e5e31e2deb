use crate::consts::CONFIDENCE_FULL_MARGIN;
use image::GrayImage;

/// Dark and total pixel counts inside a sampled region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FillSample {
    pub dark: u32,
    pub total: u32,
}

impl FillSample {
    pub fn ratio(self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.dark as f64 / self.total as f64
        }
    }
}

/// Counts dark pixels inside the ellipse centred at (`cx`, `cy`) with the
/// given semi-axes. Pixels outside the image are not counted.
pub fn sample_ellipse(image: &GrayImage, cx: f64, cy: f64, semi_x: f64, semi_y: f64) -> FillSample {
    let mut sample = FillSample::default();
    if semi_x <= 0.0 || semi_y <= 0.0 {
        return sample;
    }
    let (w, h) = (image.width() as i64, image.height() as i64);
    let x_from = ((cx - semi_x).floor() as i64).max(0);
    let x_to = ((cx + semi_x).ceil() as i64).min(w - 1);
    let y_from = ((cy - semi_y).floor() as i64).max(0);
    let y_to = ((cy + semi_y).ceil() as i64).min(h - 1);

    for y in y_from..=y_to {
        let ny = (y as f64 - cy) / semi_y;
        for x in x_from..=x_to {
            let nx = (x as f64 - cx) / semi_x;
            if nx * nx + ny * ny > 1.0 {
                continue;
            }
            sample.total += 1;
            if image.get_pixel(x as u32, y as u32).0[0] < 128 {
                sample.dark += 1;
            }
        }
    }
    sample
}

/// A cell is filled at or above the threshold.
#[inline]
pub fn is_filled(ratio: f64, threshold: f64) -> bool {
    ratio >= threshold
}

/// Confidence of a question's classification from its cells' fill ratios.
///
/// With a mark present this is the margin between the two darkest cells,
/// scaled so a margin of `CONFIDENCE_FULL_MARGIN` or more is certain. With no
/// mark it is how far the darkest cell stays below the threshold.
pub fn question_confidence(ratios: &[f64], threshold: f64) -> f64 {
    let mut sorted: Vec<f64> = ratios.to_vec();
    sorted.sort_by(|a, b| b.total_cmp(a));
    let top = sorted.first().copied().unwrap_or(0.0);
    let second = sorted.get(1).copied().unwrap_or(0.0);

    if is_filled(top, threshold) {
        ((top - second) / CONFIDENCE_FULL_MARGIN).clamp(0.0, 1.0)
    } else if threshold > 0.0 {
        ((threshold - top) / threshold).clamp(0.0, 1.0)
    } else {
        1.0
    }
}
