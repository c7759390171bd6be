use std::pin::Pin;
use std::time::Duration;

use tokio::time::{Instant, Sleep, sleep};

/// Configuration for one of the Ingest Engine's periodic cycles: how long to
/// wait before the first fire, the steady-state interval between fires
/// after that, and how many rows a single fire may touch.
#[derive(Debug, Clone, Copy)]
pub struct TimerConfig {
    pub start_delay: Duration,
    pub interval: Duration,
    pub limit: i64,
}

/// A timer that re-arms itself to a fixed interval after every fire (as
/// opposed to `tokio::time::interval`, which fires on a fixed cadence from
/// construction regardless of how long the previous tick's handler took).
pub struct ResettableTimer {
    interval: Duration,
    sleep: Pin<Box<Sleep>>,
}

impl ResettableTimer {
    pub fn new(config: TimerConfig) -> Self {
        Self {
            interval: config.interval,
            sleep: Box::pin(sleep(config.start_delay)),
        }
    }

    /// Re-arms the timer for `interval` from now. Called after every fire,
    /// including ones where the cycle did no work.
    pub fn reset(&mut self) {
        self.sleep.as_mut().reset(Instant::now() + self.interval);
    }

    pub fn sleep_mut(&mut self) -> Pin<&mut Sleep> {
        self.sleep.as_mut()
    }
}
