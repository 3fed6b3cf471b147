use std::time::{Duration, Instant};

/// Hard rate limit for frame processing, independent of how often the
/// underlying timer fires.
pub struct TickThrottle {
    min_interval: Duration,
    last_processed: Option<Instant>,
}

impl TickThrottle {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_processed: None,
        }
    }

    /// `true` if a tick at `now` may be processed; the tick is then recorded
    /// as the last processed one.
    pub fn should_process(&mut self, now: Instant) -> bool {
        if let Some(last) = self.last_processed {
            if now.saturating_duration_since(last) < self.min_interval {
                return false;
            }
        }
        self.last_processed = Some(now);
        true
    }
}
