mod deskew;
mod orientation;
mod quad;
mod threshold;

pub use orientation::Orientation;

use crate::budget::ProcessingBudget;
use crate::config::ImageParams;
use crate::consts::PAPER;
use crate::error::{OmrError, OmrResult};
use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage, ImageFormat, Luma};
use imageproc::filter::gaussian_blur_f32;
use imageproc::geometric_transformations::{warp_into, Interpolation, Projection};
use quad::Corners;
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use strum_macros::Display;
use tracing::debug;

/// Undecoded sheet as supplied by the caller.
#[derive(Debug, Clone)]
pub struct RawSheetImage {
    pub bytes: Vec<u8>,
    /// Declared MIME type or extension, e.g. `image/png`.
    pub declared_format: Option<String>,
}

impl RawSheetImage {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            declared_format: None,
        }
    }

    pub fn with_format(bytes: Vec<u8>, declared_format: impl Into<String>) -> Self {
        Self {
            bytes,
            declared_format: Some(declared_format.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Rectification {
    /// Printed frame found and mapped onto the canonical frame.
    Perspective,
    /// No frame; rotation estimated from the ink rows, then cropped.
    Deskew,
}

/// Canonical, binarized, upright sheet. Ink is 0, paper 255.
#[derive(Debug, Clone)]
pub struct NormalizedImage {
    pub image: GrayImage,
    pub orientation: Orientation,
    pub marker_found: bool,
    pub rectification: Rectification,
    /// Measured tilt of the source sheet, in degrees.
    pub skew_degrees: f32,
    /// Distance from the left and top image edges to the printed frame; the
    /// same inset applies on the right and bottom.
    pub frame_margin: (f32, f32),
}

impl NormalizedImage {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn to_png_bytes(&self) -> OmrResult<Vec<u8>> {
        let mut buf = Cursor::new(Vec::new());
        self.image
            .write_to(&mut buf, ImageFormat::Png)
            .map_err(|e| OmrError::Internal(format!("png encode failed: {}", e)))?;
        Ok(buf.into_inner())
    }
}

pub struct ImageNormalizer {
    params: ImageParams,
}

impl ImageNormalizer {
    pub fn new(params: ImageParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &ImageParams {
        &self.params
    }

    pub fn normalize(&self, raw: &RawSheetImage) -> OmrResult<NormalizedImage> {
        self.normalize_with(raw, &ProcessingBudget::unbounded())
    }

    pub fn normalize_with(
        &self,
        raw: &RawSheetImage,
        budget: &ProcessingBudget,
    ) -> OmrResult<NormalizedImage> {
        // 1. Decode
        let decoded =
            image::load_from_memory(&raw.bytes).map_err(|e| OmrError::Decode(e.to_string()))?;
        self.check_dimensions(decoded.width(), decoded.height())?;
        budget.check()?;

        // 2. Grayscale at working resolution, then denoise
        let gray = self.working_gray(&decoded);
        let smooth = if self.params.blur_sigma > 0.0 {
            gaussian_blur_f32(&gray, self.params.blur_sigma)
        } else {
            gray
        };
        budget.check()?;

        // 3. Binarize
        let level = threshold::ink_level(&smooth);
        let mask = threshold::ink_mask(&smooth, level);
        debug!(
            width = smooth.width(),
            height = smooth.height(),
            level = ?level,
            "Sheet binarized"
        );

        // 4. Rectify, preferring the printed frame
        if let Some(corners) = quad::find_sheet_quad(&mask, self.params.min_quad_area_fraction) {
            if let Some(normalized) = self.rectify_perspective(&smooth, &mask, corners)? {
                budget.check()?;
                return Ok(normalized);
            }
        }
        debug!("No sheet outline found, falling back to deskew");
        self.rectify_deskew(&smooth, &mask, level, budget)
    }

    fn check_dimensions(&self, width: u32, height: u32) -> OmrResult<()> {
        let (min, max) = (self.params.min_image_dimension, self.params.max_image_dimension);
        if width < min || height < min || width > max || height > max {
            return Err(OmrError::Dimension {
                width,
                height,
                min,
                max,
            });
        }
        Ok(())
    }

    fn working_gray(&self, decoded: &DynamicImage) -> GrayImage {
        let gray = decoded.to_luma8();
        let (w, h) = gray.dimensions();
        let longest = w.max(h);
        if self.params.working_max_side == 0 || longest <= self.params.working_max_side {
            return gray;
        }
        let scale = self.params.working_max_side as f32 / longest as f32;
        let (nw, nh) = (
            ((w as f32 * scale).round() as u32).max(1),
            ((h as f32 * scale).round() as u32).max(1),
        );
        debug!(from_w = w, from_h = h, to_w = nw, to_h = nh, "Downscaling sheet");
        imageops::resize(&gray, nw, nh, FilterType::Triangle)
    }

    fn frame_margin(&self) -> (f32, f32) {
        let (w, h) = self.target();
        (
            self.params.canonical_margin * w as f32,
            self.params.canonical_margin * h as f32,
        )
    }

    /// Inset rectangle the printed frame maps onto, TL, TR, BR, BL.
    fn canonical_frame(&self) -> Corners {
        let (w, h) = self.target();
        let (mx, my) = self.frame_margin();
        let (right, bottom) = (w as f32 - 1.0 - mx, h as f32 - 1.0 - my);
        [(mx, my), (right, my), (right, bottom), (mx, bottom)]
    }

    fn target(&self) -> (u32, u32) {
        (
            self.params.target_image_width,
            self.params.target_image_height,
        )
    }

    fn rectify_perspective(
        &self,
        smooth: &GrayImage,
        mask: &GrayImage,
        corners: Corners,
    ) -> OmrResult<Option<NormalizedImage>> {
        // Orientation is fixed by re-indexing the control points before the warp.
        let marker = orientation::marker_corner(mask, &corners);
        let turns = match marker {
            Some(k) => k,
            None if quad::is_landscape(&corners) => 1,
            None => 0,
        };
        let src = orientation::rotate_corners(corners, turns);

        let Some(projection) = Projection::from_control_points(src, self.canonical_frame()) else {
            return Ok(None);
        };
        let (w, h) = self.target();
        let mut warped = GrayImage::from_pixel(w, h, Luma([PAPER]));
        warp_into(
            smooth,
            &projection,
            Interpolation::Bilinear,
            Luma([PAPER]),
            &mut warped,
        );

        // Tilt of the sheet's top edge relative to where the turn count puts it.
        let (dx, dy) = (src[1].0 - src[0].0, src[1].1 - src[0].1);
        let skew_degrees = wrap_degrees(dy.atan2(dx).to_degrees() - 90.0 * turns as f32);

        let orientation = Orientation::from_quarter_turns(turns);
        debug!(
            %orientation,
            marker_found = marker.is_some(),
            skew_degrees,
            "Sheet rectified from outline"
        );
        Ok(Some(NormalizedImage {
            image: threshold::binarize(&warped, threshold::ink_level(&warped)),
            orientation,
            marker_found: marker.is_some(),
            rectification: Rectification::Perspective,
            skew_degrees,
            frame_margin: self.frame_margin(),
        }))
    }

    fn rectify_deskew(
        &self,
        smooth: &GrayImage,
        mask: &GrayImage,
        level: Option<u8>,
        budget: &ProcessingBudget,
    ) -> OmrResult<NormalizedImage> {
        let (w, h) = self.target();
        let skew_degrees = deskew::estimate_skew(mask, self.params.max_deskew_degrees, budget)?;

        // 1. Undo the tilt
        let upright = if skew_degrees.abs() >= 0.05 {
            deskew::rotate_about_center(smooth, -skew_degrees, PAPER)
        } else {
            smooth.clone()
        };
        let upright_mask = threshold::ink_mask(&upright, level);

        let Some(bbox) = threshold::ink_bounds(&upright_mask) else {
            debug!("Blank sheet, emitting empty canonical frame");
            return Ok(NormalizedImage {
                image: GrayImage::from_pixel(w, h, Luma([PAPER])),
                orientation: Orientation::Upright,
                marker_found: false,
                rectification: Rectification::Deskew,
                skew_degrees,
                frame_margin: self.frame_margin(),
            });
        };

        // 2. Crop to the ink and undo any quarter turn
        let marker = orientation::marker_corner_in_box(&upright_mask, bbox);
        let turns = marker.unwrap_or(0);
        let (x0, y0, x1, y1) = bbox;
        let crop = imageops::crop_imm(&upright, x0, y0, x1 - x0 + 1, y1 - y0 + 1).to_image();
        let crop = match turns {
            1 => imageops::rotate270(&crop),
            2 => imageops::rotate180(&crop),
            3 => imageops::rotate90(&crop),
            _ => crop,
        };
        budget.check()?;

        // 3. Fit into the inset frame, keeping the aspect ratio
        let frame = self.canonical_frame();
        let (fw, fh) = (frame[1].0 - frame[0].0 + 1.0, frame[3].1 - frame[0].1 + 1.0);
        let scale = (fw / crop.width() as f32).min(fh / crop.height() as f32);
        let (nw, nh) = (
            ((crop.width() as f32 * scale).round() as u32).clamp(1, w),
            ((crop.height() as f32 * scale).round() as u32).clamp(1, h),
        );
        let resized = imageops::resize(&crop, nw, nh, FilterType::Triangle);
        let mut canvas = GrayImage::from_pixel(w, h, Luma([PAPER]));
        imageops::replace(
            &mut canvas,
            &resized,
            frame[0].0.round() as i64,
            frame[0].1.round() as i64,
        );

        let orientation = Orientation::from_quarter_turns(turns);
        debug!(
            %orientation,
            marker_found = marker.is_some(),
            skew_degrees,
            "Sheet rectified by deskew"
        );
        Ok(NormalizedImage {
            image: threshold::binarize(&canvas, threshold::ink_level(&canvas)),
            orientation,
            marker_found: marker.is_some(),
            rectification: Rectification::Deskew,
            skew_degrees,
            frame_margin: self.frame_margin(),
        })
    }
}

fn wrap_degrees(deg: f32) -> f32 {
    let mut d = deg % 360.0;
    if d > 180.0 {
        d -= 360.0;
    } else if d <= -180.0 {
        d += 360.0;
    }
    d
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrap_degrees() {
        assert!((wrap_degrees(272.0) - (-88.0)).abs() < 1e-4);
        assert!((wrap_degrees(-181.0) - 179.0).abs() < 1e-4);
        assert!((wrap_degrees(1.5) - 1.5).abs() < 1e-4);
    }

    #[test]
    fn test_rejects_tiny_image() {
        let img = GrayImage::from_pixel(50, 50, Luma([255]));
        let mut bytes = Cursor::new(Vec::new());
        img.write_to(&mut bytes, ImageFormat::Png).unwrap();
        let normalizer = ImageNormalizer::new(ImageParams::default());
        let err = normalizer
            .normalize(&RawSheetImage::new(bytes.into_inner()))
            .unwrap_err();
        assert!(matches!(err, OmrError::Dimension { width: 50, .. }));
    }

    #[test]
    fn test_garbage_bytes_fail_to_decode() {
        let normalizer = ImageNormalizer::new(ImageParams::default());
        let err = normalizer
            .normalize(&RawSheetImage::new(b"definitely not an image".to_vec()))
            .unwrap_err();
        assert!(matches!(err, OmrError::Decode(_)));
    }
}
