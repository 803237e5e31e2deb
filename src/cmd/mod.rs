pub mod batch;
pub mod grade;
pub mod keys;
pub mod sample;

use omr_grader::evaluator::{AnswerEvaluator, DirectoryKeySource, SheetTemplate};
use omr_grader::{OmrConfig, OmrResult, SheetProcessor};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// Processor reading keys from `keys_dir`, with `key_file` registered up front.
pub fn build_processor(
    config: OmrConfig,
    keys_dir: &Path,
    key_file: Option<&Path>,
) -> OmrResult<SheetProcessor> {
    let evaluator = Arc::new(AnswerEvaluator::new(config.scoring.clone()));
    let mut processor = SheetProcessor::new(config, evaluator)?;

    if keys_dir.is_dir() {
        info!("🔑 Answer keys: {}", keys_dir.display());
        processor = processor.with_key_source(Arc::new(DirectoryKeySource::new(keys_dir)));
    } else if key_file.is_none() {
        warn!(
            "⚠️  Key directory '{}' not found; only explicitly given keys are available.",
            keys_dir.display()
        );
    }

    if let Some(path) = key_file {
        info!("📂 Loading key: {}", path.display());
        processor.register_template(SheetTemplate::load_from_file(path)?)?;
    }
    Ok(processor)
}

pub fn print_json<T: Serialize>(value: &T, pretty: bool) -> OmrResult<()> {
    let text = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{}", text);
    Ok(())
}
