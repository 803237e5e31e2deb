use super::{build_processor, print_json};
use clap::Args;
use image::ImageFormat;
use omr_grader::processor::BatchProgress;
use omr_grader::{CancellationToken, OmrConfig, OmrResult, SheetResult, SheetSubmission};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Args, Debug, Clone)]
pub struct BatchArgs {
    /// Directory of sheet images; each file stem is the student id
    pub dir: PathBuf,

    #[arg(short = 'v', long = "sheet-version")]
    pub version: String,

    #[arg(long)]
    pub key: Option<PathBuf>,

    #[arg(long, default_value_t = false)]
    pub summary_only: bool,

    #[arg(long, default_value_t = false)]
    pub pretty: bool,

    #[command(flatten)]
    pub config: OmrConfig,
}

struct CliProgress;
impl BatchProgress for CliProgress {
    fn on_sheet_done(&self, _index: usize, result: &SheetResult, completed: usize, total: usize) -> bool {
        match &result.error {
            None => info!(
                "[{:>4}/{}] {} {:.1}%",
                completed, total, result.student_id, result.total_percentage
            ),
            Some(err) => warn!(
                "[{:>4}/{}] {} failed: {}",
                completed, total, result.student_id, err.message
            ),
        }
        true
    }
}

/// Image files in `dir`, sorted by name.
fn list_sheets(dir: &Path) -> OmrResult<Vec<PathBuf>> {
    let mut paths: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && ImageFormat::from_path(p).is_ok())
        .collect();
    paths.sort();
    Ok(paths)
}

pub fn run(args: BatchArgs, config: OmrConfig, keys_dir: &Path) -> OmrResult<bool> {
    let processor = build_processor(config, keys_dir, args.key.as_deref())?;

    let sheets = list_sheets(&args.dir)?;
    if sheets.is_empty() {
        warn!("⚠️  No images found in {}", args.dir.display());
    }
    let submissions: Vec<SheetSubmission> = sheets
        .iter()
        .map(|path| {
            let student = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            let mut submission = SheetSubmission::from_path(path, &args.version, student);
            if let Some(ext) = path.extension() {
                submission = submission.with_media_type(ext.to_string_lossy());
            }
            submission
        })
        .collect();

    let mut report = processor.process_batch_with(&submissions, &CancellationToken::new(), CliProgress);
    if args.summary_only {
        for result in &mut report.results {
            result.questions.clear();
        }
    }
    print_json(&report, args.pretty)?;
    Ok(true)
}
