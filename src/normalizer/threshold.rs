use crate::consts::{INK, PAPER};
use image::{GrayImage, Luma};
use imageproc::contrast::otsu_level;

/// Images whose darkest and brightest pixels are closer than this carry no marks.
const MIN_CONTRAST: u8 = 32;

/// Otsu level separating ink from paper, or `None` for a flat (blank) image.
pub(crate) fn ink_level(gray: &GrayImage) -> Option<u8> {
    let (mut lo, mut hi) = (u8::MAX, u8::MIN);
    for p in gray.pixels() {
        lo = lo.min(p.0[0]);
        hi = hi.max(p.0[0]);
    }
    if hi.saturating_sub(lo) < MIN_CONTRAST {
        return None;
    }
    Some(otsu_level(gray))
}

/// Foreground mask for contour tracing: ink is 255, everything else 0.
pub(crate) fn ink_mask(gray: &GrayImage, level: Option<u8>) -> GrayImage {
    let mut mask = GrayImage::new(gray.width(), gray.height());
    if let Some(level) = level {
        for (x, y, p) in gray.enumerate_pixels() {
            if p.0[0] <= level {
                mask.put_pixel(x, y, Luma([255]));
            }
        }
    }
    mask
}

/// Canonical binary rendering: ink `INK`, paper `PAPER`.
pub(crate) fn binarize(gray: &GrayImage, level: Option<u8>) -> GrayImage {
    let mut out = GrayImage::from_pixel(gray.width(), gray.height(), Luma([PAPER]));
    if let Some(level) = level {
        for (x, y, p) in gray.enumerate_pixels() {
            if p.0[0] <= level {
                out.put_pixel(x, y, Luma([INK]));
            }
        }
    }
    out
}

/// Inclusive bounding box `(x0, y0, x1, y1)` of all mask pixels.
pub(crate) fn ink_bounds(mask: &GrayImage) -> Option<(u32, u32, u32, u32)> {
    let mut bounds: Option<(u32, u32, u32, u32)> = None;
    for (x, y, p) in mask.enumerate_pixels() {
        if p.0[0] == 0 {
            continue;
        }
        bounds = Some(match bounds {
            None => (x, y, x, y),
            Some((x0, y0, x1, y1)) => (x0.min(x), y0.min(y), x1.max(x), y1.max(y)),
        });
    }
    bounds
}

/// Mask lookup that treats everything outside the image as paper.
#[inline]
pub(crate) fn is_ink_at(mask: &GrayImage, x: f32, y: f32) -> bool {
    let (xi, yi) = (x.round(), y.round());
    if xi < 0.0 || yi < 0.0 || xi >= mask.width() as f32 || yi >= mask.height() as f32 {
        return false;
    }
    mask.get_pixel(xi as u32, yi as u32).0[0] != 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flat_image_has_no_ink() {
        let blank = GrayImage::from_pixel(40, 40, Luma([240]));
        assert_eq!(ink_level(&blank), None);
        assert!(ink_bounds(&ink_mask(&blank, None)).is_none());
    }

    #[test]
    fn test_bounds_cover_dark_block() {
        let mut img = GrayImage::from_pixel(50, 40, Luma([250]));
        for y in 10..20 {
            for x in 5..30 {
                img.put_pixel(x, y, Luma([10]));
            }
        }
        let level = ink_level(&img);
        assert!(level.is_some());
        let mask = ink_mask(&img, level);
        assert_eq!(ink_bounds(&mask), Some((5, 10, 29, 19)));
        assert!(is_ink_at(&mask, 6.0, 11.0));
        assert!(!is_ink_at(&mask, -3.0, 11.0));
    }
}
