use std::time::{Duration, Instant};

/// Frames per second over a rolling one-second window.
#[derive(Debug, Clone)]
pub struct FpsCounter {
    window: Duration,
    window_start: Instant,
    frames: u32,
    current: f64,
}

impl FpsCounter {
    pub fn new(now: Instant) -> Self {
        Self::with_window(now, Duration::from_secs(1))
    }

    pub fn with_window(now: Instant, window: Duration) -> Self {
        Self {
            window,
            window_start: now,
            frames: 0,
            current: 0.0,
        }
    }

    pub fn record_frame(&mut self) {
        self.frames += 1;
    }

    /// Closes the window once it has elapsed and returns the new rate.
    pub fn sample(&mut self, now: Instant) -> Option<f64> {
        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed < self.window {
            return None;
        }
        self.current = self.frames as f64 / elapsed.as_secs_f64();
        self.frames = 0;
        self.window_start = now;
        Some(self.current)
    }

    pub fn current(&self) -> f64 {
        self.current
    }
}
