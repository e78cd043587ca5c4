// SPDX-License-Identifier: GPL-3.0-only

//! Rolling-window FPS measurement

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::constants::{FPS_MAX_SAMPLES, FPS_WINDOW};

/// Measured frame rate over a sliding time window.
///
/// Thread-safe: the producer records frames from its loop while readers poll
/// the rate from status reporting. Sample count is bounded to
/// [`FPS_MAX_SAMPLES`] so a runaway producer cannot grow memory.
#[derive(Debug)]
pub struct RollingFps {
    window: Duration,
    samples: Mutex<VecDeque<Instant>>,
}

impl Default for RollingFps {
    fn default() -> Self {
        Self::new(FPS_WINDOW)
    }
}

impl RollingFps {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            samples: Mutex::new(VecDeque::new()),
        }
    }

    /// Record one frame at the current instant.
    pub fn add_frame(&self) {
        self.add_frame_at(Instant::now());
    }

    fn add_frame_at(&self, now: Instant) {
        let mut samples = self.samples.lock().unwrap_or_else(|e| e.into_inner());
        samples.push_back(now);
        if samples.len() > FPS_MAX_SAMPLES {
            samples.pop_front();
        }
        Self::evict(&mut samples, now, self.window);
    }

    /// Current rate over the window, in frames per second.
    pub fn fps(&self) -> f64 {
        let now = Instant::now();
        let mut samples = self.samples.lock().unwrap_or_else(|e| e.into_inner());
        Self::evict(&mut samples, now, self.window);
        if samples.len() < 2 {
            return 0.0;
        }
        let span = now.duration_since(*samples.front().expect("non-empty"));
        if span.is_zero() {
            return 0.0;
        }
        samples.len() as f64 / span.as_secs_f64()
    }

    fn evict(samples: &mut VecDeque<Instant>, now: Instant, window: Duration) {
        while let Some(&front) = samples.front() {
            if now.duration_since(front) > window {
                samples.pop_front();
            } else {
                break;
            }
        }
    }
}
