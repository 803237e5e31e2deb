// Pipeline stages
pub mod detector;
pub mod evaluator;
pub mod normalizer;
pub mod processor;

// Shared plumbing
pub mod budget;
pub mod config;
pub mod consts;
pub mod error;
pub mod options;
pub mod registry;
pub mod result;
pub mod synth;

pub use budget::CancellationToken;
pub use config::OmrConfig;
pub use error::{ErrorKind, OmrError, OmrResult};
pub use processor::{BatchReport, SheetProcessor, SheetSubmission};
pub use result::SheetResult;
