use tokio::time::{Duration, Instant};

/// Limits how often decoded telemetry is passed downstream.
///
/// The smart shunt notifies several times a second; most consumers only want a
/// reading every few seconds.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    interval: Duration,
    last_processed: Option<Instant>,
}

impl RateLimiter {
    pub fn new(interval: Duration) -> Self {
        Self { interval, last_processed: None }
    }

    /// A limiter that lets everything through.
    pub fn disabled() -> Self {
        Self::new(Duration::ZERO)
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Returns true, and remembers `now`, if at least `interval` has passed since
    /// the last time this returned true.
    pub fn should_process(&mut self, now: Instant) -> bool {
        if self.interval.is_zero() {
            self.record(now);
            return true;
        }
        match self.last_processed {
            Some(last) if now.saturating_duration_since(last) < self.interval => false,
            _ => {
                self.record(now);
                true
            }
        }
    }

    fn record(&mut self, now: Instant) {
        if self.last_processed.map_or(true, |last| now > last) {
            self.last_processed = Some(now);
        }
    }
}
