use crate::error::{ErrorKind, OmrError};
use crate::normalizer::{Orientation, Rectification};
use crate::options::OptionSet;
use serde::{Deserialize, Serialize};
use strum_macros::Display;
use typed_builder::TypedBuilder;

/// Lifecycle of one sheet. `Failed` is reachable from every other stage.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SheetStage {
    #[default]
    Received,
    Validated,
    Normalized,
    Detected,
    Evaluated,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubjectScore {
    pub subject: String,
    pub correct: u32,
    pub total: u32,
    pub score: f64,
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionDetail {
    pub question: u32,
    pub subject: String,
    pub detected: OptionSet,
    pub correct: OptionSet,
    pub is_correct: bool,
    pub confidence: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct StageTimings {
    pub validate_seconds: f64,
    pub normalize_seconds: f64,
    pub detect_seconds: f64,
    pub evaluate_seconds: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SheetMetadata {
    pub processing_time_seconds: f64,
    pub attempts: u32,
    pub stage_timings: StageTimings,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub orientation: Option<Orientation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rectification: Option<Rectification>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skew_degrees: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bubble_candidates: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mean_confidence: Option<f64>,
    #[serde(default)]
    pub low_confidence_questions: Vec<u32>,
    #[serde(default)]
    pub multi_marked_questions: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SheetError {
    pub kind: ErrorKind,
    pub message: String,
    /// Last stage the sheet reached before failing.
    pub stage: SheetStage,
}

impl SheetError {
    pub fn new(err: &OmrError, stage: SheetStage) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
            stage,
        }
    }
}

/// Outcome of one sheet, handed to the caller as a plain value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TypedBuilder)]
pub struct SheetResult {
    #[builder(setter(into))]
    pub student_id: String,
    #[builder(setter(into))]
    pub version: String,
    pub success: bool,
    pub stage: SheetStage,
    #[builder(default)]
    pub total_score: f64,
    #[builder(default)]
    pub total_percentage: f64,
    #[builder(default)]
    pub total_correct: u32,
    #[builder(default)]
    pub total_questions: u32,
    #[builder(default)]
    pub subject_scores: Vec<SubjectScore>,
    #[builder(default)]
    #[serde(default)]
    pub questions: Vec<QuestionDetail>,
    #[builder(default)]
    #[serde(default)]
    pub metadata: SheetMetadata,
    #[builder(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<SheetError>,
}

impl SheetResult {
    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }

    pub fn is_cancelled(&self) -> bool {
        self.error_kind() == Some(ErrorKind::Cancelled)
    }

    pub fn subject(&self, name: &str) -> Option<&SubjectScore> {
        self.subject_scores.iter().find(|s| s.subject == name)
    }
}
