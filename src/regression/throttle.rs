//! Frame-based rate limiter: at most `max_load` passes per time frame.
//!
//! No attempt is made to spread passes evenly. With a fast loop, the whole
//! budget is spent at the start of a frame and [`Throttle::wait`] then sleeps
//! until the frame ends.

use std::thread;
use std::time::{Duration, Instant};

use crate::core::errors::{HarnessError, Result};

#[derive(Debug, Clone)]
pub struct Throttle {
    max_load: u32,
    frame: Duration,
    frame_start: Instant,
    load: u32,
}

impl Throttle {
    pub fn new(max_load: u32, frame: Duration) -> Result<Self> {
        if max_load == 0 {
            return Err(HarnessError::InvalidConfig {
                details: "throttle max_load must be at least 1".to_string(),
            });
        }
        if frame.is_zero() {
            return Err(HarnessError::InvalidConfig {
                details: "throttle frame must be non-zero".to_string(),
            });
        }
        Ok(Self {
            max_load,
            frame,
            frame_start: Instant::now(),
            load: 0,
        })
    }

    #[must_use]
    pub const fn max_load(&self) -> u32 {
        self.max_load
    }

    #[must_use]
    pub const fn frame(&self) -> Duration {
        self.frame
    }

    /// Take one unit of load if the current frame has budget left.
    pub fn is_open(&mut self) -> bool {
        if self.frame_start.elapsed() >= self.frame {
            self.frame_start = Instant::now();
            self.load = 0;
        }
        if self.load < self.max_load {
            self.load += 1;
            true
        } else {
            false
        }
    }

    /// Return at once if open, otherwise sleep until a new frame opens.
    /// Returns the time spent waiting.
    pub fn wait(&mut self) -> Duration {
        let started = Instant::now();
        while !self.is_open() {
            let remaining = self.frame.saturating_sub(self.frame_start.elapsed());
            thread::sleep(remaining.max(Duration::from_millis(1)));
        }
        started.elapsed()
    }
}
