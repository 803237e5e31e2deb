#![allow(dead_code)]

use omr_grader::config::OmrConfig;
use omr_grader::detector::{GridConfig, SubjectRange};
use omr_grader::evaluator::{AnswerEvaluator, AnswerKey, SheetTemplate};
use omr_grader::normalizer::Orientation;
use omr_grader::options::OptionSet;
use omr_grader::synth::{self, SheetSpec};
use omr_grader::SheetProcessor;
use std::collections::BTreeMap;
use std::sync::Arc;

pub const VERSION: &str = "v1";

/// Ten questions, two subjects, four options.
pub fn small_grid() -> GridConfig {
    GridConfig::builder()
        .questions(10)
        .subjects(vec![
            SubjectRange {
                name: "Mathematics".into(),
                first: 1,
                last: 5,
            },
            SubjectRange {
                name: "Physics".into(),
                first: 6,
                last: 10,
            },
        ])
        .build()
}

/// `[(1, "A"), (2, "B,D")]` style marks.
pub fn marks(pairs: &[(u32, &str)]) -> BTreeMap<u32, OptionSet> {
    pairs
        .iter()
        .map(|(q, letters)| (*q, letters.parse().expect("valid letters")))
        .collect()
}

pub fn default_marks() -> BTreeMap<u32, OptionSet> {
    marks(&[
        (1, "A"),
        (2, "B"),
        (3, "C"),
        (4, "D"),
        (5, "A"),
        (6, "B"),
        (7, "C"),
        (8, "D"),
        (9, "B"),
        (10, "C"),
    ])
}

pub fn key_for(grid: &GridConfig, marks: &BTreeMap<u32, OptionSet>) -> AnswerKey {
    synth::answer_key_for(VERSION, grid, marks)
}

/// Small, quick configuration for tests.
pub fn test_config() -> OmrConfig {
    let mut config = OmrConfig::default();
    config.processing.max_concurrent_processing = 2;
    config
}

/// Processor with `VERSION` registered for `grid`, keyed to `marks`.
pub fn processor_for(
    config: OmrConfig,
    grid: &GridConfig,
    marks: &BTreeMap<u32, OptionSet>,
) -> SheetProcessor {
    let evaluator = Arc::new(AnswerEvaluator::new(config.scoring.clone()));
    let processor = SheetProcessor::new(config, evaluator).expect("valid config");
    processor
        .register_template(SheetTemplate {
            key: key_for(grid, marks),
            grid: Some(grid.clone()),
        })
        .expect("valid template");
    processor
}

pub fn flat_sheet(grid: &GridConfig, marks: &BTreeMap<u32, OptionSet>) -> Vec<u8> {
    SheetSpec::builder()
        .grid(grid.clone())
        .marks(marks.clone())
        .build()
        .render_png()
        .expect("encode sheet")
}

/// Sheet photographed on a desk with a slight perspective tilt.
pub fn photo_sheet(
    grid: &GridConfig,
    marks: &BTreeMap<u32, OptionSet>,
    rotation: Orientation,
) -> Vec<u8> {
    SheetSpec::builder()
        .grid(grid.clone())
        .marks(marks.clone())
        .rotation(rotation)
        .desk(Some(70))
        .perspective(0.015)
        .skew_degrees(1.5)
        .speckle(0.0005)
        .seed(11)
        .build()
        .render_png()
        .expect("encode sheet")
}
