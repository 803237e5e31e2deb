use super::{build_processor, print_json};
use clap::Args;
use omr_grader::{OmrConfig, OmrResult, SheetSubmission};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Args, Debug, Clone)]
pub struct GradeArgs {
    /// Scanned or photographed sheet
    pub image: PathBuf,

    /// Sheet version whose key grades it
    #[arg(short = 'v', long = "sheet-version")]
    pub version: String,

    /// Defaults to the image file stem
    #[arg(short, long)]
    pub student: Option<String>,

    /// Answer key file to use instead of the key directory
    #[arg(long)]
    pub key: Option<PathBuf>,

    /// Omit per-question detail from the output
    #[arg(long, default_value_t = false)]
    pub summary_only: bool,

    #[arg(long, default_value_t = false)]
    pub pretty: bool,

    #[command(flatten)]
    pub config: OmrConfig,
}

pub fn run(args: GradeArgs, config: OmrConfig, keys_dir: &Path) -> OmrResult<bool> {
    let processor = build_processor(config, keys_dir, args.key.as_deref())?;

    let student = args.student.clone().unwrap_or_else(|| {
        args.image
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    });
    let mut submission = SheetSubmission::from_path(&args.image, &args.version, student);
    if let Some(ext) = args.image.extension() {
        submission = submission.with_media_type(ext.to_string_lossy());
    }

    info!("📝 Grading {}", args.image.display());
    let mut result = processor.process_one(&submission);
    if result.success {
        info!(
            "✅ {}: {}/{} correct ({:.1}%)",
            result.student_id, result.total_correct, result.total_questions, result.total_percentage
        );
    } else if let Some(err) = &result.error {
        warn!("❌ {}: {}", result.student_id, err.message);
    }

    if args.summary_only {
        result.questions.clear();
    }
    print_json(&result, args.pretty)?;
    Ok(result.success)
}
