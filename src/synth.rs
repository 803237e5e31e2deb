//! Synthetic answer sheets.
//!
//! Renders a printed sheet (frame, corner fiducial, bubble blocks, question
//! glyphs) and optionally "photographs" it: placed on a darker desk with a
//! perspective tilt, skewed, turned by quarter turns and sprinkled with noise.
//! Every image fixture in the test suite comes from here.

use crate::detector::{GridConfig, SubjectRange};
use crate::error::{OmrError, OmrResult};
use crate::evaluator::{AnswerKey, SubjectKey};
use crate::normalizer::Orientation;
use crate::options::OptionSet;
use image::{imageops, GrayImage, ImageFormat, Luma};
use imageproc::drawing::{draw_filled_circle_mut, draw_filled_rect_mut, draw_hollow_circle_mut};
use imageproc::geometric_transformations::{
    rotate_about_center, warp_into, Interpolation, Projection,
};
use imageproc::rect::Rect;
use std::collections::BTreeMap;
use std::io::Cursor;
use typed_builder::TypedBuilder;

pub const PAGE_WIDTH: u32 = 850;
pub const PAGE_HEIGHT: u32 = 1100;

const FRAME: (i32, i32, i32, i32) = (40, 40, 810, 1060);
const FRAME_THICKNESS: i32 = 3;
const MARKER_AT: (i32, i32) = (52, 52);
const MARKER_SIZE: u32 = 34;
const FOOTER_Y: i32 = 1046;

const BUBBLE_RADIUS: i32 = 10;
const OPTION_PITCH: f32 = 30.0;
const FIRST_BLOCK_X: f32 = 150.0;
const LAST_BUBBLE_X: f32 = 770.0;
const FIRST_ROW_Y: f32 = 200.0;
const ROWS_SPAN: f32 = 820.0;
const MAX_ROW_PITCH: f32 = 50.0;

const INK: Luma<u8> = Luma([0]);
const WHITE: Luma<u8> = Luma([255]);

#[derive(Debug, Clone, TypedBuilder)]
pub struct SheetSpec {
    pub grid: GridConfig,
    /// Bubbles filled in per question.
    #[builder(default)]
    pub marks: BTreeMap<u32, OptionSet>,
    #[builder(default = true)]
    pub border: bool,
    #[builder(default = true)]
    pub marker: bool,
    /// Small question-number bars left of each block.
    #[builder(default = true)]
    pub glyphs: bool,
    /// Clockwise quarter turn applied to the finished photo.
    #[builder(default)]
    pub rotation: Orientation,
    /// In-plane tilt, counter-clockwise positive.
    #[builder(default)]
    pub skew_degrees: f32,
    /// Random corner displacement as a fraction of the page width.
    #[builder(default)]
    pub perspective: f32,
    /// Shade of the surface the page is photographed on. `None` keeps the bare page.
    #[builder(default)]
    pub desk: Option<u8>,
    /// Fraction of pixels replaced by salt-and-pepper noise.
    #[builder(default)]
    pub speckle: f32,
    #[builder(default = 7)]
    pub seed: u64,
}

/// Centre of every bubble on the flat page, for the layout in `grid`.
struct PageLayout {
    block_pitch: f32,
    row_pitch: f32,
}

impl PageLayout {
    fn new(grid: &GridConfig) -> Self {
        let block_width = (grid.options as f32 - 1.0) * OPTION_PITCH;
        let blocks = grid.question_columns.max(1);
        let block_pitch = if blocks > 1 {
            let room = (LAST_BUBBLE_X - FIRST_BLOCK_X - block_width) / (blocks - 1) as f32;
            room.min(block_width + 70.0).floor()
        } else {
            0.0
        };
        let rows = grid.rows();
        let row_pitch = if rows > 1 {
            (ROWS_SPAN / (rows - 1) as f32).min(MAX_ROW_PITCH)
        } else {
            0.0
        };
        Self {
            block_pitch,
            row_pitch,
        }
    }

    fn block_x(&self, block: u32) -> f32 {
        FIRST_BLOCK_X + block as f32 * self.block_pitch
    }

    fn row_y(&self, row: u32) -> f32 {
        FIRST_ROW_Y + row as f32 * self.row_pitch
    }
}

impl SheetSpec {
    /// The flat printed page, before any photographic distortion.
    pub fn render_page(&self) -> GrayImage {
        let mut page = GrayImage::from_pixel(PAGE_WIDTH, PAGE_HEIGHT, WHITE);

        if self.border {
            let (x0, y0, x1, y1) = FRAME;
            let (w, h) = ((x1 - x0 + 1) as u32, (y1 - y0 + 1) as u32);
            let t = FRAME_THICKNESS as u32;
            draw_filled_rect_mut(&mut page, Rect::at(x0, y0).of_size(w, t), INK);
            draw_filled_rect_mut(&mut page, Rect::at(x0, y1 - FRAME_THICKNESS + 1).of_size(w, t), INK);
            draw_filled_rect_mut(&mut page, Rect::at(x0, y0).of_size(t, h), INK);
            draw_filled_rect_mut(&mut page, Rect::at(x1 - FRAME_THICKNESS + 1, y0).of_size(t, h), INK);
        }
        if self.marker {
            draw_filled_rect_mut(
                &mut page,
                Rect::at(MARKER_AT.0, MARKER_AT.1).of_size(MARKER_SIZE, MARKER_SIZE),
                INK,
            );
        }
        let footer_w = (FRAME.2 - 12 - MARKER_AT.0) as u32;
        draw_filled_rect_mut(&mut page, Rect::at(MARKER_AT.0, FOOTER_Y).of_size(footer_w, 3), INK);

        let layout = PageLayout::new(&self.grid);
        for question in 1..=self.grid.questions {
            let Some((row, block)) = self.grid.position_of(question) else {
                continue;
            };
            let (x0, y) = (layout.block_x(block), layout.row_y(row));
            let marked = self.marks.get(&question).copied().unwrap_or(OptionSet::EMPTY);
            if self.glyphs {
                draw_filled_rect_mut(
                    &mut page,
                    Rect::at(x0 as i32 - 25, y as i32 - 1).of_size(10, 3),
                    INK,
                );
            }
            for opt in 0..self.grid.options {
                let center = ((x0 + opt as f32 * OPTION_PITCH) as i32, y as i32);
                if marked.contains(opt) {
                    draw_filled_circle_mut(&mut page, center, BUBBLE_RADIUS, INK);
                } else {
                    draw_hollow_circle_mut(&mut page, center, BUBBLE_RADIUS, INK);
                    draw_hollow_circle_mut(&mut page, center, BUBBLE_RADIUS - 1, INK);
                }
            }
        }
        page
    }

    /// The page as a camera or scanner would deliver it.
    pub fn render(&self) -> GrayImage {
        let page = self.render_page();
        let mut rng = fastrand::Rng::with_seed(self.seed);

        let mut photo = match self.desk {
            Some(shade) => self.place_on_desk(&page, shade, &mut rng),
            None if self.skew_degrees != 0.0 => rotate_about_center(
                &page,
                -self.skew_degrees.to_radians(),
                Interpolation::Bilinear,
                WHITE,
            ),
            None => page,
        };

        if self.speckle > 0.0 {
            for p in photo.pixels_mut() {
                if rng.f32() < self.speckle {
                    *p = if rng.bool() { INK } else { WHITE };
                }
            }
        }

        match self.rotation {
            Orientation::Upright => photo,
            Orientation::Clockwise90 => imageops::rotate90(&photo),
            Orientation::Rotated180 => imageops::rotate180(&photo),
            Orientation::Clockwise270 => imageops::rotate270(&photo),
        }
    }

    fn place_on_desk(&self, page: &GrayImage, shade: u8, rng: &mut fastrand::Rng) -> GrayImage {
        let (cw, ch) = (PAGE_WIDTH + 150, PAGE_HEIGHT + 200);
        let (ox, oy) = (75.0f32, 100.0f32);
        let (pw, ph) = (PAGE_WIDTH as f32 - 1.0, PAGE_HEIGHT as f32 - 1.0);
        let src = [(0.0, 0.0), (pw, 0.0), (pw, ph), (0.0, ph)];

        let (cx, cy) = (cw as f32 / 2.0, ch as f32 / 2.0);
        let (sin, cos) = (-self.skew_degrees.to_radians()).sin_cos();
        let jitter = self.perspective * PAGE_WIDTH as f32;
        let mut dst = [(0.0f32, 0.0f32); 4];
        for (d, &(x, y)) in dst.iter_mut().zip(src.iter()) {
            let (jx, jy) = (
                (rng.f32() * 2.0 - 1.0) * jitter,
                (rng.f32() * 2.0 - 1.0) * jitter,
            );
            let (px, py) = (x + ox + jx - cx, y + oy + jy - cy);
            *d = (cx + px * cos - py * sin, cy + px * sin + py * cos);
        }

        let mut canvas = GrayImage::from_pixel(cw, ch, Luma([shade]));
        match Projection::from_control_points(src, dst) {
            Some(projection) => warp_into(
                page,
                &projection,
                Interpolation::Bilinear,
                Luma([shade]),
                &mut canvas,
            ),
            None => imageops::replace(&mut canvas, page, ox as i64, oy as i64),
        }
        canvas
    }

    pub fn render_png(&self) -> OmrResult<Vec<u8>> {
        encode(&self.render(), ImageFormat::Png)
    }
}

pub fn encode(image: &GrayImage, format: ImageFormat) -> OmrResult<Vec<u8>> {
    let mut out = Cursor::new(Vec::new());
    image
        .write_to(&mut out, format)
        .map_err(|e| OmrError::Internal(format!("encoding {:?}: {}", format, e)))?;
    Ok(out.into_inner())
}

pub fn encode_png(image: &GrayImage) -> OmrResult<Vec<u8>> {
    encode(image, ImageFormat::Png)
}

/// One random single mark per question.
pub fn random_marks(grid: &GridConfig, seed: u64) -> BTreeMap<u32, OptionSet> {
    let mut rng = fastrand::Rng::with_seed(seed);
    (1..=grid.questions)
        .map(|q| (q, OptionSet::single(rng.u8(0..grid.options))))
        .collect()
}

/// Key accepting exactly `marks`, split by the layout's subjects. Questions
/// without a mark accept `A`.
pub fn answer_key_for(
    version: &str,
    grid: &GridConfig,
    marks: &BTreeMap<u32, OptionSet>,
) -> AnswerKey {
    let ranges = if grid.subjects.is_empty() {
        vec![SubjectRange {
            name: "General".to_string(),
            first: 1,
            last: grid.questions,
        }]
    } else {
        grid.subjects.clone()
    };

    let mut key = AnswerKey::new(version).with_options(grid.options);
    for range in ranges {
        let questions: Vec<u32> = (range.first..=range.last.min(grid.questions)).collect();
        let answers = questions
            .iter()
            .map(|q| {
                marks
                    .get(q)
                    .copied()
                    .filter(|m| !m.is_empty())
                    .unwrap_or(OptionSet::single(0))
            })
            .collect();
        key = key.with_subject(SubjectKey::new(range.name, questions, answers));
    }
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid() -> GridConfig {
        GridConfig::builder().questions(10).build()
    }

    #[test]
    fn test_page_has_fiducial_and_frame() {
        let page = SheetSpec::builder().grid(grid()).build().render_page();
        assert_eq!(page.dimensions(), (PAGE_WIDTH, PAGE_HEIGHT));
        assert_eq!(page.get_pixel(60, 60).0[0], 0, "fiducial");
        assert_eq!(page.get_pixel(41, 500).0[0], 0, "left frame edge");
        assert_eq!(page.get_pixel(400, 120).0[0], 255);
    }

    #[test]
    fn test_marks_fill_bubbles() {
        let mut marks = BTreeMap::new();
        marks.insert(1, OptionSet::single(2));
        let page = SheetSpec::builder().grid(grid()).marks(marks).build().render_page();
        let y = FIRST_ROW_Y as u32;
        assert_eq!(page.get_pixel(150 + 60, y).0[0], 0, "filled C");
        assert_eq!(page.get_pixel(150, y).0[0], 255, "hollow A");
    }

    #[test]
    fn test_rotation_swaps_dimensions() {
        let img = SheetSpec::builder()
            .grid(grid())
            .rotation(Orientation::Clockwise90)
            .build()
            .render();
        assert_eq!(img.dimensions(), (PAGE_HEIGHT, PAGE_WIDTH));
    }

    #[test]
    fn test_answer_key_matches_marks() {
        let g = grid();
        let marks = random_marks(&g, 3);
        let key = answer_key_for("v1", &g, &marks);
        assert!(key.validate().is_ok());
        assert_eq!(key.total_questions(), 10);
        assert_eq!(key.subjects[0].answers[4], marks[&5]);
    }
}
