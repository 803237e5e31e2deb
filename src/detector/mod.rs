mod candidates;
pub mod fill;
mod grid;
mod types;

pub use types::*;

use crate::budget::ProcessingBudget;
use crate::config::DetectionParams;
use crate::error::OmrResult;
use crate::normalizer::NormalizedImage;
use tracing::debug;

pub struct BubbleDetector {
    params: DetectionParams,
}

impl BubbleDetector {
    pub fn new(params: DetectionParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &DetectionParams {
        &self.params
    }

    pub fn detect(&self, img: &NormalizedImage, grid: &GridConfig) -> OmrResult<BubbleGrid> {
        self.detect_with(img, grid, &ProcessingBudget::unbounded())
    }

    pub fn detect_with(
        &self,
        img: &NormalizedImage,
        grid: &GridConfig,
        budget: &ProcessingBudget,
    ) -> OmrResult<BubbleGrid> {
        grid.validate()?;
        let rows = grid.rows() as usize;
        let cols = grid.physical_columns() as usize;

        // 1. Bubble-shaped outlines
        let found = candidates::find_candidates(&img.image, &self.params);
        debug!(candidates = found.len(), rows, cols, "Bubble candidates found");
        budget.check()?;

        // 2. Lattice and nearest-crossing assignment, inside the printed frame
        let (mx, my) = (img.frame_margin.0 as f64, img.frame_margin.1 as f64);
        let bounds = grid::Bounds {
            x: (mx, img.width() as f64 - 1.0 - mx),
            y: (my, img.height() as f64 - 1.0 - my),
        };
        let lattice = grid::fit_lattice(
            &found,
            grid::AxisLayout::uniform(rows),
            grid::AxisLayout {
                blocks: grid.question_columns as usize,
                per_block: grid.options as usize,
            },
            self.params.row_tolerance,
            bounds,
        )?;
        let arena = lattice.assign(&found);
        debug!(
            rows_detected = lattice.rows_detected,
            cols_detected = lattice.cols_detected,
            slope = lattice.slope,
            "Lattice fitted"
        );
        budget.check()?;

        // 3. Fill and confidence per expected cell
        let threshold = self.params.bubble_detection_threshold;
        let options = grid.options as usize;
        let mut questions: Vec<QuestionCells> = Vec::with_capacity(grid.questions as usize);
        for r in 0..rows {
            for block in 0..grid.question_columns as usize {
                let Some(question) = grid.question_at(r as u32, block as u32) else {
                    continue;
                };
                let mut cells = Vec::with_capacity(options);
                for opt in 0..options {
                    let col = block * options + opt;
                    let claimed = arena[r * cols + col].map(|i| found[i]);
                    let region = match claimed {
                        Some(c) => CellRegion {
                            x: c.x0 as f32,
                            y: c.y0 as f32,
                            width: c.width as f32,
                            height: c.height as f32,
                        },
                        None => {
                            let (x, y) = lattice.position(r, col);
                            CellRegion {
                                x: (x - lattice.bubble_w / 2.0 + 0.5) as f32,
                                y: (y - lattice.bubble_h / 2.0 + 0.5) as f32,
                                width: lattice.bubble_w as f32,
                                height: lattice.bubble_h as f32,
                            }
                        }
                    };
                    let (cx, cy) = region.center();
                    let sample = fill::sample_ellipse(
                        &img.image,
                        cx as f64 - 0.5,
                        cy as f64 - 0.5,
                        region.width as f64 / 2.0 * self.params.fill_sample_ratio,
                        region.height as f64 / 2.0 * self.params.fill_sample_ratio,
                    );
                    let fill_ratio = sample.ratio();
                    cells.push(BubbleCell {
                        question,
                        option: opt as u8,
                        region,
                        fill_ratio,
                        filled: claimed.is_some() && fill::is_filled(fill_ratio, threshold),
                        confidence: 0.0,
                        detected: claimed.is_some(),
                    });
                }

                let ratios: Vec<f64> = cells.iter().map(|c| c.fill_ratio).collect();
                let confidence = fill::question_confidence(&ratios, threshold);
                for cell in cells.iter_mut().filter(|c| c.detected) {
                    cell.confidence = confidence;
                }
                let marked = cells.iter().filter(|c| c.filled).count();
                questions.push(QuestionCells {
                    question,
                    subject: grid.subject_of(question).map(str::to_string),
                    cells,
                    confidence,
                    multi_marked: marked > 1,
                    low_confidence: confidence < self.params.min_confidence_threshold,
                });
            }
        }
        questions.sort_by_key(|q| q.question);

        Ok(BubbleGrid {
            questions,
            rows_detected: lattice.rows_detected,
            columns_detected: lattice.cols_detected,
            candidates: found.len(),
            residual_slope: lattice.slope,
        })
    }
}
