use crate::result::{SheetStage, StageTimings};
use std::time::Instant;

/// Walks one sheet through its stages and times each step.
#[derive(Debug)]
pub(crate) struct StageTrace {
    stage: SheetStage,
    timings: StageTimings,
    mark: Instant,
}

impl StageTrace {
    pub(crate) fn new() -> Self {
        Self {
            stage: SheetStage::Received,
            timings: StageTimings::default(),
            mark: Instant::now(),
        }
    }

    pub(crate) fn stage(&self) -> SheetStage {
        self.stage
    }

    pub(crate) fn timings(&self) -> StageTimings {
        self.timings
    }

    /// Records the time spent reaching `to` since the previous transition.
    pub(crate) fn advance(&mut self, to: SheetStage) {
        let seconds = self.mark.elapsed().as_secs_f64();
        match to {
            SheetStage::Validated => self.timings.validate_seconds += seconds,
            SheetStage::Normalized => self.timings.normalize_seconds += seconds,
            SheetStage::Detected => self.timings.detect_seconds += seconds,
            SheetStage::Evaluated => self.timings.evaluate_seconds += seconds,
            _ => {}
        }
        self.stage = to;
        self.mark = Instant::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advance_moves_forward_and_times_steps() {
        let mut trace = StageTrace::new();
        assert_eq!(trace.stage(), SheetStage::Received);
        trace.advance(SheetStage::Validated);
        trace.advance(SheetStage::Normalized);
        assert_eq!(trace.stage(), SheetStage::Normalized);
        let t = trace.timings();
        assert!(t.validate_seconds >= 0.0);
        assert_eq!(t.detect_seconds, 0.0);
    }
}
