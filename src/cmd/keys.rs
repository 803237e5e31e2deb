use super::print_json;
use clap::Args;
use omr_grader::evaluator::{KeySummary, SheetTemplate};
use omr_grader::OmrResult;
use serde::Serialize;
use std::path::PathBuf;
use tracing::info;

#[derive(Args, Debug, Clone)]
pub struct CheckKeyArgs {
    /// Answer key file
    pub path: PathBuf,

    #[arg(long, default_value_t = false)]
    pub pretty: bool,
}

#[derive(Serialize)]
struct KeyReport {
    #[serde(flatten)]
    summary: KeySummary,
    /// Printed layout: declared in the file, or derived from the key.
    grid_declared: bool,
    rows: u32,
    question_columns: u32,
}

pub fn run(args: CheckKeyArgs) -> OmrResult<bool> {
    let template = SheetTemplate::load_from_file(&args.path)?;
    let grid = template.grid_or_derived();
    let summary = template.key.summary();
    info!(
        "✅ Key '{}' is valid: {} subjects, {} questions",
        summary.version,
        summary.subjects.len(),
        summary.total_questions
    );
    print_json(
        &KeyReport {
            summary,
            grid_declared: template.grid.is_some(),
            rows: grid.rows(),
            question_columns: grid.question_columns,
        },
        args.pretty,
    )?;
    Ok(true)
}
