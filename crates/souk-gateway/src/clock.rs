use chrono::{DateTime, TimeDelta, Utc};
use tokio::time::Instant;

/// Wall-clock timestamps that advance with the tokio clock.
///
/// Anchored once at construction, so presence timestamps stay consistent
/// with the debounce timers, including under a paused test runtime.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    wall: DateTime<Utc>,
    start: Instant,
}

impl Clock {
    pub fn new() -> Self {
        Self {
            wall: Utc::now(),
            start: Instant::now(),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        let elapsed = TimeDelta::from_std(self.start.elapsed()).unwrap_or(TimeDelta::zero());
        self.wall + elapsed
    }

    /// The wall-clock instant this clock was anchored at.
    pub fn anchor(&self) -> DateTime<Utc> {
        self.wall
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}
