use crate::config::DetectionParams;
use image::{GrayImage, Luma};
use imageproc::contours::{find_contours, BorderType};

/// Outline that passed the bubble size and shape gates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Candidate {
    pub cx: f64,
    pub cy: f64,
    pub x0: f64,
    pub y0: f64,
    pub width: f64,
    pub height: f64,
    pub area: f64,
}

/// Outer outlines of ink blobs shaped like bubbles. Ink in `image` is dark.
pub(crate) fn find_candidates(image: &GrayImage, params: &DetectionParams) -> Vec<Candidate> {
    let mut mask = GrayImage::new(image.width(), image.height());
    for (x, y, p) in image.enumerate_pixels() {
        if p.0[0] < 128 {
            mask.put_pixel(x, y, Luma([255]));
        }
    }

    let (min_area, max_area) = (params.min_bubble_area as f64, params.max_bubble_area as f64);
    find_contours::<u32>(&mask)
        .into_iter()
        .filter(|c| c.border_type == BorderType::Outer && c.points.len() >= 3)
        .filter_map(|c| {
            let (mut x0, mut y0, mut x1, mut y1) = (u32::MAX, u32::MAX, 0u32, 0u32);
            for p in &c.points {
                x0 = x0.min(p.x);
                y0 = y0.min(p.y);
                x1 = x1.max(p.x);
                y1 = y1.max(p.y);
            }
            let width = (x1 - x0 + 1) as f64;
            let height = (y1 - y0 + 1) as f64;
            let area = shoelace(&c.points);
            if area < min_area || area > max_area {
                return None;
            }
            if (width / height - 1.0).abs() > params.aspect_ratio_tolerance {
                return None;
            }
            Some(Candidate {
                cx: x0 as f64 + width / 2.0 - 0.5,
                cy: y0 as f64 + height / 2.0 - 0.5,
                x0: x0 as f64,
                y0: y0 as f64,
                width,
                height,
                area,
            })
        })
        .collect()
}

fn shoelace(points: &[imageproc::point::Point<u32>]) -> f64 {
    let n = points.len();
    let mut acc = 0.0f64;
    for i in 0..n {
        let (a, b) = (points[i], points[(i + 1) % n]);
        acc += a.x as f64 * b.y as f64 - b.x as f64 * a.y as f64;
    }
    acc.abs() / 2.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use imageproc::drawing::{draw_filled_circle_mut, draw_filled_rect_mut, draw_hollow_circle_mut};
    use imageproc::rect::Rect;

    #[test]
    fn test_keeps_bubbles_and_rejects_bars() {
        let mut img = GrayImage::from_pixel(200, 100, Luma([255]));
        draw_hollow_circle_mut(&mut img, (40, 50), 10, Luma([0u8]));
        draw_hollow_circle_mut(&mut img, (40, 50), 9, Luma([0u8]));
        draw_filled_circle_mut(&mut img, (80, 50), 10, Luma([0u8]));
        // Too elongated
        draw_filled_rect_mut(&mut img, Rect::at(110, 45).of_size(30, 6), Luma([0u8]));
        // Too small
        draw_filled_rect_mut(&mut img, Rect::at(160, 50).of_size(3, 3), Luma([0u8]));

        let found = find_candidates(&img, &DetectionParams::default());
        assert_eq!(found.len(), 2, "found {:?}", found);
        for c in &found {
            assert!((c.cy - 50.0).abs() < 1.0);
            assert!(c.area > 200.0 && c.area < 400.0);
        }
    }
}
