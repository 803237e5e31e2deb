mod batch;
mod stage;
mod validate;

pub use batch::*;

use crate::budget::{CancellationToken, ProcessingBudget};
use crate::config::OmrConfig;
use crate::detector::{BubbleDetector, GridConfig};
use crate::error::{OmrError, OmrResult};
use crate::evaluator::{AnswerEvaluator, AnswerKey, KeySource, SheetTemplate};
use crate::normalizer::{ImageNormalizer, RawSheetImage};
use crate::registry::VersionedRegistry;
use crate::result::{SheetError, SheetMetadata, SheetResult, SheetStage};
use serde::{Deserialize, Serialize};
use stage::StageTrace;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use validate::InputValidator;

#[derive(Debug, Clone)]
pub enum SheetPayload {
    Bytes(Vec<u8>),
    /// Read lazily by the worker that processes the sheet.
    Path(PathBuf),
}

/// One sheet as handed over by the caller.
#[derive(Debug, Clone)]
pub struct SheetSubmission {
    pub payload: SheetPayload,
    /// Declared MIME type or extension, checked against the sniffed signature.
    pub media_type: Option<String>,
    pub version: String,
    pub student_id: String,
}

impl SheetSubmission {
    pub fn from_bytes(
        bytes: Vec<u8>,
        version: impl Into<String>,
        student_id: impl Into<String>,
    ) -> Self {
        Self {
            payload: SheetPayload::Bytes(bytes),
            media_type: None,
            version: version.into(),
            student_id: student_id.into(),
        }
    }

    pub fn from_path(
        path: impl Into<PathBuf>,
        version: impl Into<String>,
        student_id: impl Into<String>,
    ) -> Self {
        Self {
            payload: SheetPayload::Path(path.into()),
            media_type: None,
            version: version.into(),
            student_id: student_id.into(),
        }
    }

    pub fn with_media_type(mut self, media_type: impl Into<String>) -> Self {
        self.media_type = Some(media_type.into());
        self
    }
}

/// Cumulative totals since the processor was built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProcessorCounters {
    pub processed: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub retries: u64,
}

#[derive(Debug, Default)]
struct Counters {
    processed: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
    retries: AtomicU64,
}

impl Counters {
    fn record(&self, result: &SheetResult) {
        self.processed.fetch_add(1, Ordering::Relaxed);
        let bucket = if result.success {
            &self.succeeded
        } else if result.is_cancelled() {
            &self.cancelled
        } else {
            &self.failed
        };
        bucket.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> ProcessorCounters {
        ProcessorCounters {
            processed: self.processed.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
        }
    }
}

/// Drives sheets through validation, normalization, detection and scoring.
pub struct SheetProcessor {
    config: OmrConfig,
    validator: InputValidator,
    normalizer: ImageNormalizer,
    detector: BubbleDetector,
    evaluator: Arc<AnswerEvaluator>,
    grids: VersionedRegistry<GridConfig>,
    key_source: Option<Arc<dyn KeySource>>,
    pool: rayon::ThreadPool,
    counters: Counters,
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("pipeline panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("pipeline panicked: {}", s)
    } else {
        "pipeline panicked".to_string()
    }
}

impl SheetProcessor {
    pub fn new(config: OmrConfig, evaluator: Arc<AnswerEvaluator>) -> OmrResult<Self> {
        for warning in config.validate()? {
            warn!("⚠️  {}", warning);
        }
        let validator = InputValidator::new(&config.processing)?;
        let workers = config.processing.max_concurrent_processing;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("omr-worker-{}", i))
            .build()
            .map_err(|e| OmrError::Config(format!("worker pool: {}", e)))?;
        debug!(workers, formats = ?validator.formats(), "Sheet processor ready");

        Ok(Self {
            normalizer: ImageNormalizer::new(config.image.clone()),
            detector: BubbleDetector::new(config.detection.clone()),
            validator,
            evaluator,
            grids: VersionedRegistry::new(),
            key_source: None,
            pool,
            counters: Counters::default(),
            config,
        })
    }

    pub fn with_key_source(mut self, source: Arc<dyn KeySource>) -> Self {
        self.key_source = Some(source);
        self
    }

    pub fn config(&self) -> &OmrConfig {
        &self.config
    }

    pub fn evaluator(&self) -> &Arc<AnswerEvaluator> {
        &self.evaluator
    }

    pub fn counters(&self) -> ProcessorCounters {
        self.counters.snapshot()
    }

    /// Layout used for `version` instead of the one derived from its key.
    pub fn register_grid(&self, version: &str, grid: GridConfig) -> OmrResult<()> {
        grid.validate()?;
        if let Some(key) = self.evaluator.key(version) {
            check_grid_covers_key(&grid, &key)?;
        }
        self.grids.insert(version, grid);
        Ok(())
    }

    /// Registers a key, and its layout when it carries one, under the key's version.
    pub fn register_template(&self, template: SheetTemplate) -> OmrResult<()> {
        let version = template.key.version.clone();
        if version.is_empty() {
            return Err(OmrError::KeyValidation(
                "template does not declare a version".into(),
            ));
        }
        self.install_template(&version, template)
    }

    fn install_template(&self, version: &str, template: SheetTemplate) -> OmrResult<()> {
        if let Some(grid) = &template.grid {
            grid.validate()?;
            check_grid_covers_key(grid, &template.key)?;
        }
        self.evaluator.add_key(version, template.key)?;
        if let Some(grid) = template.grid {
            self.grids.insert(version, grid);
        }
        Ok(())
    }

    /// Key and layout for `version`: registries first, then the key source.
    fn resolve(&self, version: &str) -> OmrResult<(Arc<AnswerKey>, GridConfig)> {
        if !self.evaluator.has_key(version) {
            if let Some(source) = &self.key_source {
                if let Some(template) = source.load(version)? {
                    info!("📂 Loaded sheet template '{}' from key source", version);
                    self.install_template(version, template)?;
                }
            }
        }
        let key = self
            .evaluator
            .key(version)
            .ok_or_else(|| OmrError::UnknownVersion(version.to_string()))?;
        let grid = match self.grids.get(version) {
            Some(grid) => (*grid).clone(),
            None => {
                let grid = key.derive_grid();
                debug!(
                    version,
                    questions = grid.questions,
                    blocks = grid.question_columns,
                    "No layout registered, using one derived from the key"
                );
                grid
            }
        };
        Ok((key, grid))
    }

    /// Processes one sheet. Never fails: errors are reported in the result.
    pub fn process_one(&self, submission: &SheetSubmission) -> SheetResult {
        self.process_with_token(submission, &CancellationToken::new())
    }

    pub fn process_with_token(
        &self,
        submission: &SheetSubmission,
        token: &CancellationToken,
    ) -> SheetResult {
        let started = Instant::now();
        let attempt_limit = self.config.processing.attempt_limit();
        let mut attempt = 0;

        let mut result = loop {
            attempt += 1;
            let budget = ProcessingBudget::new(
                self.config.processing.processing_timeout_seconds,
                token.clone(),
            );
            let mut trace = StageTrace::new();
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                self.run_pipeline(submission, &budget, &mut trace)
            }))
            .unwrap_or_else(|payload| Err(OmrError::Internal(panic_message(payload))));

            match outcome {
                Ok(mut result) => {
                    result.metadata.attempts = attempt;
                    break result;
                }
                Err(err) if err.is_transient() && attempt < attempt_limit && !token.is_cancelled() => {
                    warn!(
                        "🔁 Sheet '{}' attempt {}/{} failed: {}",
                        submission.student_id, attempt, attempt_limit, err
                    );
                    self.counters.retries.fetch_add(1, Ordering::Relaxed);
                }
                Err(err) => break self.failure(submission, &err, &trace, attempt),
            }
        };

        result.metadata.processing_time_seconds = started.elapsed().as_secs_f64();
        self.counters.record(&result);
        result
    }

    fn failure(
        &self,
        submission: &SheetSubmission,
        err: &OmrError,
        trace: &StageTrace,
        attempts: u32,
    ) -> SheetResult {
        if matches!(err, OmrError::Cancelled) {
            debug!(student = %submission.student_id, "Sheet cancelled");
        } else {
            warn!(
                "❌ Sheet '{}' failed at {}: {}",
                submission.student_id,
                trace.stage(),
                err
            );
        }
        SheetResult::builder()
            .student_id(submission.student_id.as_str())
            .version(submission.version.as_str())
            .success(false)
            .stage(SheetStage::Failed)
            .metadata(SheetMetadata {
                attempts,
                stage_timings: trace.timings(),
                ..SheetMetadata::default()
            })
            .error(Some(SheetError::new(err, trace.stage())))
            .build()
    }

    fn run_pipeline(
        &self,
        submission: &SheetSubmission,
        budget: &ProcessingBudget,
        trace: &mut StageTrace,
    ) -> OmrResult<SheetResult> {
        budget.check()?;

        // 1. Validate before touching pixels
        let bytes = self.validator.read_payload(submission)?;
        self.validator
            .check(&bytes, submission.media_type.as_deref())?;
        let (key, grid) = self.resolve(&submission.version)?;
        trace.advance(SheetStage::Validated);
        budget.check()?;

        // 2. Normalize
        let raw = RawSheetImage {
            bytes,
            declared_format: submission.media_type.clone(),
        };
        let normalized = self.normalizer.normalize_with(&raw, budget)?;
        trace.advance(SheetStage::Normalized);

        // 3. Detect
        let bubbles = self.detector.detect_with(&normalized, &grid, budget)?;
        trace.advance(SheetStage::Detected);

        // 4. Evaluate
        let card = self
            .evaluator
            .score_against(&key, &submission.version, &bubbles.answers());
        trace.advance(SheetStage::Evaluated);
        budget.check()?;
        trace.advance(SheetStage::Completed);

        let timings = trace.timings();
        debug!(
            student = %submission.student_id,
            validate = timings.validate_seconds,
            normalize = timings.normalize_seconds,
            detect = timings.detect_seconds,
            evaluate = timings.evaluate_seconds,
            "Sheet completed"
        );

        Ok(SheetResult::builder()
            .student_id(submission.student_id.as_str())
            .version(submission.version.as_str())
            .success(true)
            .stage(SheetStage::Completed)
            .total_score(card.total_score)
            .total_percentage(card.total_percentage)
            .total_correct(card.total_correct)
            .total_questions(card.total_questions)
            .subject_scores(card.subject_scores)
            .questions(card.questions)
            .metadata(SheetMetadata {
                processing_time_seconds: 0.0,
                attempts: 0,
                stage_timings: timings,
                orientation: Some(normalized.orientation),
                rectification: Some(normalized.rectification),
                skew_degrees: Some(normalized.skew_degrees),
                bubble_candidates: Some(bubbles.candidates),
                mean_confidence: Some(bubbles.mean_confidence()),
                low_confidence_questions: bubbles.low_confidence_questions(),
                multi_marked_questions: bubbles.multi_marked_questions(),
            })
            .build())
    }
}

/// Every keyed question must have a printed row.
fn check_grid_covers_key(grid: &GridConfig, key: &AnswerKey) -> OmrResult<()> {
    let highest = key
        .subjects
        .iter()
        .flat_map(|s| s.questions.iter().copied())
        .max()
        .unwrap_or(0);
    if highest > grid.questions {
        return Err(OmrError::KeyValidation(format!(
            "key '{}' grades question {} but the layout prints only {}",
            key.version, highest, grid.questions
        )));
    }
    if key.options > grid.options {
        return Err(OmrError::KeyValidation(format!(
            "key '{}' uses {} options but the layout prints {}",
            key.version, key.options, grid.options
        )));
    }
    Ok(())
}
