use crate::consts::*;
use crate::error::{OmrError, OmrResult};
use clap::{parser::ValueSource, ArgMatches, Args, ValueEnum};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use strum_macros::{Display, EnumString};

#[derive(Args, Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct OmrConfig {
    #[command(flatten)]
    pub image: ImageParams,
    #[command(flatten)]
    pub detection: DetectionParams,
    #[command(flatten)]
    pub processing: ProcessingParams,
    #[command(flatten)]
    pub scoring: ScoringParams,
}

#[derive(Args, Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageParams {
    #[arg(long, env = "TARGET_IMAGE_WIDTH", default_value_t = DEFAULT_TARGET_WIDTH)]
    pub target_image_width: u32,
    #[arg(long, env = "TARGET_IMAGE_HEIGHT", default_value_t = DEFAULT_TARGET_HEIGHT)]
    pub target_image_height: u32,
    #[arg(long, default_value_t = DEFAULT_MIN_IMAGE_DIMENSION)]
    pub min_image_dimension: u32,
    #[arg(long, default_value_t = DEFAULT_MAX_IMAGE_DIMENSION)]
    pub max_image_dimension: u32,

    // Denoise before thresholding
    #[arg(long, default_value_t = 1.0)]
    pub blur_sigma: f32,
    // Large photos are downscaled to this longest side before contour work
    #[arg(long, default_value_t = 2000)]
    pub working_max_side: u32,
    #[arg(long, default_value_t = 10.0)]
    pub max_deskew_degrees: f32,
    // Inset of the printed frame inside the canonical image
    #[arg(long, default_value_t = 0.02)]
    pub canonical_margin: f32,
    #[arg(long, default_value_t = 0.2)]
    pub min_quad_area_fraction: f32,
}

impl Default for ImageParams {
    fn default() -> Self {
        Self {
            target_image_width: DEFAULT_TARGET_WIDTH,
            target_image_height: DEFAULT_TARGET_HEIGHT,
            min_image_dimension: DEFAULT_MIN_IMAGE_DIMENSION,
            max_image_dimension: DEFAULT_MAX_IMAGE_DIMENSION,
            blur_sigma: 1.0,
            working_max_side: 2000,
            max_deskew_degrees: 10.0,
            canonical_margin: 0.02,
            min_quad_area_fraction: 0.2,
        }
    }
}

#[derive(Args, Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionParams {
    #[arg(long, env = "BUBBLE_DETECTION_THRESHOLD", default_value_t = 0.15)]
    pub bubble_detection_threshold: f64,
    #[arg(long, env = "MIN_BUBBLE_AREA", default_value_t = 50)]
    pub min_bubble_area: u32,
    #[arg(long, env = "MAX_BUBBLE_AREA", default_value_t = 500)]
    pub max_bubble_area: u32,
    #[arg(long, env = "ASPECT_RATIO_TOLERANCE", default_value_t = 0.3)]
    pub aspect_ratio_tolerance: f64,

    // Fraction of the bubble half-extents sampled for fill (skips the printed ring)
    #[arg(long, default_value_t = 0.6)]
    pub fill_sample_ratio: f64,
    // Extra or missing lattice lines tolerated before declaring a mismatch
    #[arg(long, default_value_t = 1)]
    pub row_tolerance: usize,
    #[arg(long, env = "MIN_CONFIDENCE_THRESHOLD", default_value_t = 0.8)]
    pub min_confidence_threshold: f64,
}

impl Default for DetectionParams {
    fn default() -> Self {
        Self {
            bubble_detection_threshold: 0.15,
            min_bubble_area: 50,
            max_bubble_area: 500,
            aspect_ratio_tolerance: 0.3,
            fill_sample_ratio: 0.6,
            row_tolerance: 1,
            min_confidence_threshold: 0.8,
        }
    }
}

#[derive(Args, Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingParams {
    #[arg(long, env = "MAX_FILE_SIZE_MB", default_value_t = 50)]
    pub max_file_size_mb: u64,
    #[arg(long, default_value = "jpeg,png,bmp,tiff,webp")]
    pub supported_formats: String,
    // 0 disables the per-sheet timeout
    #[arg(long, env = "PROCESSING_TIMEOUT_SECONDS", default_value_t = 300.0)]
    pub processing_timeout_seconds: f64,
    #[arg(long, env = "MAX_CONCURRENT_PROCESSING", default_value_t = 5)]
    pub max_concurrent_processing: usize,
    #[arg(long, env = "MAX_ERROR_RATE", default_value_t = 0.005)]
    pub max_error_rate: f64,
    #[arg(long, env = "ENABLE_AUTO_RETRY", default_value_t = true, action = clap::ArgAction::Set)]
    pub enable_auto_retry: bool,
    #[arg(long, env = "MAX_RETRY_ATTEMPTS", default_value_t = 3)]
    pub max_retry_attempts: u32,
}

impl Default for ProcessingParams {
    fn default() -> Self {
        Self {
            max_file_size_mb: 50,
            supported_formats: "jpeg,png,bmp,tiff,webp".to_string(),
            processing_timeout_seconds: 300.0,
            max_concurrent_processing: 5,
            max_error_rate: 0.005,
            enable_auto_retry: true,
            max_retry_attempts: 3,
        }
    }
}

impl ProcessingParams {
    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_mb.saturating_mul(BYTES_PER_MB)
    }

    /// Total attempts a sheet gets, counting the first one.
    pub fn attempt_limit(&self) -> u32 {
        if self.enable_auto_retry {
            self.max_retry_attempts.max(1)
        } else {
            1
        }
    }
}

/// Correctness rule for questions whose key accepts several letters.
#[derive(
    ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MatchPolicy {
    /// Marked set must equal the accepted set.
    #[default]
    Exact,
    /// Any non-empty marked set drawn from the accepted set.
    Subset,
}

#[derive(Args, Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringParams {
    #[arg(long, value_enum, default_value_t = MatchPolicy::Exact)]
    pub match_policy: MatchPolicy,
    #[arg(long, default_value_t = 1.0)]
    pub marks_per_correct: f64,
    // Applied to answered-but-wrong questions only
    #[arg(long, default_value_t = 0.0)]
    pub penalty_per_wrong: f64,
}

impl Default for ScoringParams {
    fn default() -> Self {
        Self {
            match_policy: MatchPolicy::Exact,
            marks_per_correct: 1.0,
            penalty_per_wrong: 0.0,
        }
    }
}

macro_rules! update_if_present {
    ($target:expr, $cli:expr, $matches:expr; $($field:ident),+ $(,)?) => {
        $(
            if matches!(
                $matches.value_source(stringify!($field)),
                Some(ValueSource::CommandLine | ValueSource::EnvVariable)
            ) {
                $target.$field = $cli.$field.clone();
            }
        )+
    };
}

impl OmrConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> OmrResult<Self> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Overlays values the user actually typed (or exported) on top of `self`.
    pub fn merge_from_cli(&mut self, cli: &OmrConfig, matches: &ArgMatches) {
        update_if_present!(self.image, cli.image, matches;
            target_image_width,
            target_image_height,
            min_image_dimension,
            max_image_dimension,
            blur_sigma,
            working_max_side,
            max_deskew_degrees,
            canonical_margin,
            min_quad_area_fraction,
        );
        update_if_present!(self.detection, cli.detection, matches;
            bubble_detection_threshold,
            min_bubble_area,
            max_bubble_area,
            aspect_ratio_tolerance,
            fill_sample_ratio,
            row_tolerance,
            min_confidence_threshold,
        );
        update_if_present!(self.processing, cli.processing, matches;
            max_file_size_mb,
            supported_formats,
            processing_timeout_seconds,
            max_concurrent_processing,
            max_error_rate,
            enable_auto_retry,
            max_retry_attempts,
        );
        update_if_present!(self.scoring, cli.scoring, matches;
            match_policy,
            marks_per_correct,
            penalty_per_wrong,
        );
    }

    /// Hard errors for values the pipeline cannot run with; soft warnings otherwise.
    pub fn validate(&self) -> OmrResult<Vec<String>> {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        let img = &self.image;
        if img.target_image_width == 0 || img.target_image_height == 0 {
            errors.push("target image dimensions must be positive".to_string());
        }
        if img.min_image_dimension > img.max_image_dimension {
            errors.push(format!(
                "min_image_dimension ({}) exceeds max_image_dimension ({})",
                img.min_image_dimension, img.max_image_dimension
            ));
        }
        if !(0.0..0.25).contains(&img.canonical_margin) {
            errors.push("canonical_margin must be in [0, 0.25)".to_string());
        }
        if img.working_max_side < img.target_image_width.max(img.target_image_height) {
            warnings.push(format!(
                "working_max_side {} is smaller than the canonical frame",
                img.working_max_side
            ));
        }

        let det = &self.detection;
        if !(0.0..=1.0).contains(&det.bubble_detection_threshold) {
            errors.push("bubble_detection_threshold must be in [0, 1]".to_string());
        }
        if det.min_bubble_area > det.max_bubble_area {
            errors.push(format!(
                "min_bubble_area ({}) exceeds max_bubble_area ({})",
                det.min_bubble_area, det.max_bubble_area
            ));
        }
        if det.aspect_ratio_tolerance < 0.0 {
            errors.push("aspect_ratio_tolerance must not be negative".to_string());
        }
        if !(0.0..=1.0).contains(&det.fill_sample_ratio) || det.fill_sample_ratio == 0.0 {
            errors.push("fill_sample_ratio must be in (0, 1]".to_string());
        }
        if !(0.0..=1.0).contains(&det.min_confidence_threshold) {
            errors.push("min_confidence_threshold must be in [0, 1]".to_string());
        }

        let proc = &self.processing;
        if proc.max_concurrent_processing == 0 {
            errors.push("max_concurrent_processing must be at least 1".to_string());
        }
        if !(0.0..=1.0).contains(&proc.max_error_rate) {
            errors.push("max_error_rate must be in [0, 1]".to_string());
        }
        if proc.processing_timeout_seconds < 0.0 {
            errors.push("processing_timeout_seconds must not be negative".to_string());
        } else if proc.processing_timeout_seconds > 0.0 && proc.processing_timeout_seconds < 30.0 {
            warnings.push(format!(
                "processing_timeout_seconds {} is very short",
                proc.processing_timeout_seconds
            ));
        }
        if proc.max_file_size_mb == 0 || proc.max_file_size_mb > 100 {
            warnings.push(format!(
                "max_file_size_mb {} is outside the usual 1-100 range",
                proc.max_file_size_mb
            ));
        }
        if proc.enable_auto_retry && proc.max_retry_attempts == 0 {
            warnings.push("auto retry is enabled with max_retry_attempts = 0".to_string());
        }
        if self.scoring.penalty_per_wrong < 0.0 {
            errors.push("penalty_per_wrong must not be negative".to_string());
        }

        if errors.is_empty() {
            Ok(warnings)
        } else {
            Err(OmrError::Config(errors.join("; ")))
        }
    }
}
