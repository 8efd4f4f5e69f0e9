//! Drift-free frame pacing.
//!
//! Deadlines are `baseline + n * interval`, so a late wakeup shortens the
//! next sleep instead of pushing every later frame back.

use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug)]
pub struct Pacer {
    baseline: Instant,
    frames: u32,
    interval: Duration,
}

impl Pacer {
    pub fn new(interval: Duration) -> Self {
        Self {
            baseline: Instant::now(),
            frames: 0,
            interval,
        }
    }

    /// Start a new block: the next frame goes out immediately.
    pub fn reset(&mut self) {
        self.baseline = Instant::now();
        self.frames = 0;
    }

    /// When the next frame is due.
    pub fn deadline(&self) -> Instant {
        self.baseline + self.interval.saturating_mul(self.frames)
    }

    /// Sleep until the next frame is due and count it.
    pub async fn wait(&mut self) {
        tokio::time::sleep_until(self.deadline()).await;
        self.frames = self.frames.saturating_add(1);
    }

    /// Frames paced since the last reset.
    pub fn frames(&self) -> u32 {
        self.frames
    }
}
