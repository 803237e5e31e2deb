/// Canonical frame the normalizer always produces.
pub const DEFAULT_TARGET_WIDTH: u32 = 800;
pub const DEFAULT_TARGET_HEIGHT: u32 = 1000;

/// Decoded images outside this per-side range are rejected.
pub const DEFAULT_MIN_IMAGE_DIMENSION: u32 = 100;
pub const DEFAULT_MAX_IMAGE_DIMENSION: u32 = 5000;

/// Options per question when a layout does not say otherwise (A-D).
pub const DEFAULT_OPTIONS: u8 = 4;

/// The option alphabet is capped by the width of `OptionSet`.
pub const MAX_OPTIONS: u8 = 8;

/// Pixel value the normalizer writes for ink. Paper is `PAPER`.
pub const INK: u8 = 0;
pub const PAPER: u8 = 255;

/// Margin between top and second fill ratio that maps to full confidence.
pub const CONFIDENCE_FULL_MARGIN: f64 = 0.5;

/// A contour touching the image within this many pixels is background, not the sheet.
pub const FRAME_TOUCH_PX: i32 = 2;

/// Corner window (fraction of the sheet edge) sampled for the orientation fiducial.
pub const MARKER_WINDOW_START: f32 = 0.02;
pub const MARKER_WINDOW_END: f32 = 0.045;

/// Fiducial decision: best corner must be this dark and clearly darker than the runner-up.
pub const MARKER_MIN_INK: f32 = 0.25;
pub const MARKER_DOMINANCE: f32 = 2.0;
pub const MARKER_DOMINANCE_SLACK: f32 = 0.05;

/// Douglas-Peucker tolerances tried in order, as a fraction of the contour perimeter.
pub const QUAD_EPSILONS: [f64; 3] = [0.02, 0.03, 0.05];

/// Residual slope the detector will correct before clustering (tan 5 degrees).
pub const MAX_RESIDUAL_SLOPE: f64 = 0.087_488_663;

pub const BYTES_PER_MB: u64 = 1024 * 1024;

/// Worst residual, in line pitches, of an acceptable placement of missing lattice lines.
pub const LATTICE_FIT_TOLERANCE: f64 = 0.3;
/// Two placements closer than this (in pitches) are indistinguishable.
pub const LATTICE_AMBIGUITY: f64 = 0.1;
/// Placements of missing lines tried before giving up.
pub const MAX_LATTICE_PLACEMENTS: usize = 20_000;
