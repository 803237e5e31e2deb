use crate::consts::{DEFAULT_OPTIONS, MAX_OPTIONS};
use crate::error::{OmrError, OmrResult};
use crate::options::OptionSet;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use strum_macros::Display;
use typed_builder::TypedBuilder;

/// How question numbers run across side-by-side question blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Numbering {
    /// 1, 2, 3... across a printed row, then the next row.
    #[default]
    RowMajor,
    /// 1, 2, 3... down the first block, then the next block.
    ColumnMajor,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectRange {
    pub name: String,
    pub first: u32,
    pub last: u32,
}

impl SubjectRange {
    pub fn contains(&self, question: u32) -> bool {
        (self.first..=self.last).contains(&question)
    }
}

fn default_options() -> u8 {
    DEFAULT_OPTIONS
}

fn default_columns() -> u32 {
    1
}

/// Logical layout of one sheet version. Questions are numbered from 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TypedBuilder)]
pub struct GridConfig {
    pub questions: u32,
    #[builder(default = DEFAULT_OPTIONS)]
    #[serde(default = "default_options")]
    pub options: u8,
    /// Question blocks printed side by side on each row.
    #[builder(default = 1)]
    #[serde(default = "default_columns")]
    pub question_columns: u32,
    #[builder(default)]
    #[serde(default)]
    pub numbering: Numbering,
    #[builder(default)]
    #[serde(default)]
    pub subjects: Vec<SubjectRange>,
}

impl GridConfig {
    pub fn validate(&self) -> OmrResult<()> {
        if self.questions == 0 {
            return Err(OmrError::Config("grid must have at least one question".into()));
        }
        if self.options == 0 || self.options > MAX_OPTIONS {
            return Err(OmrError::Config(format!(
                "grid options must be 1..={}, got {}",
                MAX_OPTIONS, self.options
            )));
        }
        if self.question_columns == 0 || self.question_columns > self.questions {
            return Err(OmrError::Config(format!(
                "question_columns must be 1..={}, got {}",
                self.questions, self.question_columns
            )));
        }
        for s in &self.subjects {
            if s.first == 0 || s.first > s.last || s.last > self.questions {
                return Err(OmrError::Config(format!(
                    "subject '{}' range {}..={} is outside 1..={}",
                    s.name, s.first, s.last, self.questions
                )));
            }
        }
        Ok(())
    }

    /// Printed rows of bubbles.
    pub fn rows(&self) -> u32 {
        self.questions.div_ceil(self.question_columns.max(1))
    }

    /// Physical bubble columns across a row.
    pub fn physical_columns(&self) -> u32 {
        self.question_columns * self.options as u32
    }

    /// Question printed at (`row`, `block`), if that slot is used.
    pub fn question_at(&self, row: u32, block: u32) -> Option<u32> {
        if row >= self.rows() || block >= self.question_columns {
            return None;
        }
        let q = match self.numbering {
            Numbering::RowMajor => row * self.question_columns + block + 1,
            Numbering::ColumnMajor => block * self.rows() + row + 1,
        };
        (q <= self.questions).then_some(q)
    }

    /// Inverse of `question_at`.
    pub fn position_of(&self, question: u32) -> Option<(u32, u32)> {
        if question == 0 || question > self.questions {
            return None;
        }
        let idx = question - 1;
        Some(match self.numbering {
            Numbering::RowMajor => (idx / self.question_columns, idx % self.question_columns),
            Numbering::ColumnMajor => (idx % self.rows(), idx / self.rows()),
        })
    }

    pub fn subject_of(&self, question: u32) -> Option<&str> {
        self.subjects
            .iter()
            .find(|s| s.contains(question))
            .map(|s| s.name.as_str())
    }
}

/// Pixel rectangle in the canonical image.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CellRegion {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl CellRegion {
    pub fn center(&self) -> (f32, f32) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BubbleCell {
    pub question: u32,
    /// 0 for A.
    pub option: u8,
    pub region: CellRegion,
    pub fill_ratio: f64,
    pub filled: bool,
    pub confidence: f64,
    /// False when no bubble outline was found at this lattice position.
    pub detected: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionCells {
    pub question: u32,
    pub subject: Option<String>,
    pub cells: Vec<BubbleCell>,
    pub confidence: f64,
    pub multi_marked: bool,
    pub low_confidence: bool,
}

impl QuestionCells {
    pub fn marked(&self) -> OptionSet {
        OptionSet::from_indices(self.cells.iter().filter(|c| c.filled).map(|c| c.option))
    }
}

/// Options judged filled for one question, with the detector's confidence.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetectedAnswer {
    pub question: u32,
    pub marked: OptionSet,
    pub confidence: f64,
}

impl DetectedAnswer {
    pub fn new(question: u32, marked: OptionSet) -> Self {
        Self {
            question,
            marked,
            confidence: 1.0,
        }
    }

    pub fn blank(question: u32) -> Self {
        Self::new(question, OptionSet::EMPTY)
    }
}

/// Every expected cell of one sheet, grouped by question in question order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BubbleGrid {
    pub questions: Vec<QuestionCells>,
    pub rows_detected: usize,
    pub columns_detected: usize,
    pub candidates: usize,
    pub residual_slope: f64,
}

impl BubbleGrid {
    pub fn answers(&self) -> BTreeMap<u32, DetectedAnswer> {
        self.questions
            .iter()
            .map(|q| {
                (
                    q.question,
                    DetectedAnswer {
                        question: q.question,
                        marked: q.marked(),
                        confidence: q.confidence,
                    },
                )
            })
            .collect()
    }

    pub fn cells(&self) -> impl Iterator<Item = &BubbleCell> {
        self.questions.iter().flat_map(|q| q.cells.iter())
    }

    pub fn mean_confidence(&self) -> f64 {
        if self.questions.is_empty() {
            return 0.0;
        }
        self.questions.iter().map(|q| q.confidence).sum::<f64>() / self.questions.len() as f64
    }

    pub fn low_confidence_questions(&self) -> Vec<u32> {
        self.questions
            .iter()
            .filter(|q| q.low_confidence)
            .map(|q| q.question)
            .collect()
    }

    pub fn multi_marked_questions(&self) -> Vec<u32> {
        self.questions
            .iter()
            .filter(|q| q.multi_marked)
            .map(|q| q.question)
            .collect()
    }
}
