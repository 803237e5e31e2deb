use crate::error::{OmrError, OmrResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Shared stop flag. Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Wall-clock allowance for one processing attempt plus the cancellation flag
/// it must honour. Long-running steps call `check` at their checkpoints.
#[derive(Debug, Clone)]
pub struct ProcessingBudget {
    started: Instant,
    limit: Option<Duration>,
    cancel: CancellationToken,
}

impl ProcessingBudget {
    /// No deadline and a token nobody else holds.
    pub fn unbounded() -> Self {
        Self {
            started: Instant::now(),
            limit: None,
            cancel: CancellationToken::new(),
        }
    }

    /// `limit_seconds <= 0` means no deadline.
    pub fn new(limit_seconds: f64, cancel: CancellationToken) -> Self {
        let limit = (limit_seconds > 0.0 && limit_seconds.is_finite())
            .then(|| Duration::from_secs_f64(limit_seconds));
        Self {
            started: Instant::now(),
            limit,
            cancel,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn limit(&self) -> Option<Duration> {
        self.limit
    }

    /// Cancellation wins over an expired deadline.
    pub fn check(&self) -> OmrResult<()> {
        if self.cancel.is_cancelled() {
            return Err(OmrError::Cancelled);
        }
        if let Some(limit) = self.limit {
            let elapsed = self.started.elapsed();
            if elapsed > limit {
                return Err(OmrError::Timeout {
                    elapsed: elapsed.as_secs_f64(),
                    limit: limit.as_secs_f64(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_limit_never_expires() {
        let budget = ProcessingBudget::new(0.0, CancellationToken::new());
        assert!(budget.limit().is_none());
        assert!(budget.check().is_ok());
    }

    #[test]
    fn test_cancel_is_seen_by_clones() {
        let token = CancellationToken::new();
        let budget = ProcessingBudget::new(60.0, token.clone());
        token.cancel();
        assert!(matches!(budget.check(), Err(OmrError::Cancelled)));
    }

    #[test]
    fn test_expired_budget_reports_timeout() {
        let budget = ProcessingBudget::new(1e-9, CancellationToken::new());
        std::thread::sleep(Duration::from_millis(2));
        assert!(matches!(budget.check(), Err(OmrError::Timeout { .. })));
    }
}
