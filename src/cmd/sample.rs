use clap::Args;
use image::ImageFormat;
use omr_grader::detector::{GridConfig, Numbering, SubjectRange};
use omr_grader::evaluator::SheetTemplate;
use omr_grader::normalizer::Orientation;
use omr_grader::synth::{self, SheetSpec};
use omr_grader::{OmrError, OmrResult};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Args, Debug, Clone)]
pub struct SampleArgs {
    /// Output image; the format follows the extension
    #[arg(short, long, default_value = "sample_sheet.png")]
    pub out: PathBuf,

    #[arg(short = 'v', long = "sheet-version", default_value = "sample")]
    pub version: String,

    #[arg(short, long, default_value_t = 20)]
    pub questions: u32,

    #[arg(long, default_value_t = 4)]
    pub options: u8,

    /// Question blocks printed side by side
    #[arg(long, default_value_t = 1)]
    pub columns: u32,

    #[arg(long, default_value_t = false)]
    pub column_major: bool,

    /// Comma-separated subject names; questions are split evenly between them
    #[arg(long)]
    pub subjects: Option<String>,

    /// Seed for the random marks and photo noise
    #[arg(long, default_value_t = 7)]
    pub seed: u64,

    /// Clockwise rotation of the photo: 0, 90, 180 or 270
    #[arg(long, default_value_t = 0)]
    pub rotate: u16,

    #[arg(long, default_value_t = 0.0)]
    pub skew: f32,

    /// Place the sheet on a darker desk with a perspective tilt
    #[arg(long, default_value_t = false)]
    pub photo: bool,

    /// Also write the matching `<version>.json` into the key directory
    #[arg(long, default_value_t = false)]
    pub write_key: bool,
}

fn split_subjects(names: &str, questions: u32) -> Vec<SubjectRange> {
    let names: Vec<&str> = names
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();
    let count = names.len() as u32;
    if count == 0 || questions == 0 {
        return Vec::new();
    }
    let per = questions.div_ceil(count);
    names
        .iter()
        .enumerate()
        .filter_map(|(i, name)| {
            let first = i as u32 * per + 1;
            let last = ((i as u32 + 1) * per).min(questions);
            (first <= last).then(|| SubjectRange {
                name: name.to_string(),
                first,
                last,
            })
        })
        .collect()
}

pub fn run(args: SampleArgs, keys_dir: &Path) -> OmrResult<bool> {
    let grid = GridConfig::builder()
        .questions(args.questions)
        .options(args.options)
        .question_columns(args.columns)
        .numbering(if args.column_major {
            Numbering::ColumnMajor
        } else {
            Numbering::RowMajor
        })
        .subjects(
            args.subjects
                .as_deref()
                .map(|s| split_subjects(s, args.questions))
                .unwrap_or_default(),
        )
        .build();
    grid.validate()?;

    let rotation = Orientation::try_from(args.rotate).map_err(OmrError::Config)?;
    let marks = synth::random_marks(&grid, args.seed);
    let spec = SheetSpec::builder()
        .grid(grid.clone())
        .marks(marks.clone())
        .rotation(rotation)
        .skew_degrees(args.skew)
        .perspective(if args.photo { 0.02 } else { 0.0 })
        .desk(args.photo.then_some(70))
        .speckle(if args.photo { 0.001 } else { 0.0 })
        .seed(args.seed)
        .build();

    let format = ImageFormat::from_path(&args.out).unwrap_or(ImageFormat::Png);
    fs::write(&args.out, synth::encode(&spec.render(), format)?)?;
    info!("🖨️  Wrote sample sheet: {}", args.out.display());

    if args.write_key {
        let template = SheetTemplate {
            key: synth::answer_key_for(&args.version, &grid, &marks),
            grid: Some(grid),
        };
        fs::create_dir_all(keys_dir)?;
        let path = keys_dir.join(format!("{}.json", args.version));
        fs::write(&path, serde_json::to_string_pretty(&template)?)?;
        info!("🔑 Wrote answer key: {}", path.display());
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_subjects_covers_every_question() {
        let ranges = split_subjects("Math, Physics,Chemistry", 10);
        assert_eq!(ranges.len(), 3);
        assert_eq!((ranges[0].first, ranges[0].last), (1, 4));
        assert_eq!((ranges[2].first, ranges[2].last), (9, 10));
    }
}
