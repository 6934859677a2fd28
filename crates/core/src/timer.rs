//! Monotonic clock for animation time and frame pacing statistics.

use std::time::{Duration, Instant};

/// Measures time since creation and the interval between ticks.
#[derive(Debug, Clone)]
pub struct Timer {
    start: Instant,
    last_tick: Instant,
    ticks: u64,
}

impl Timer {
    /// Create a new timer, starting from now.
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            start: now,
            last_tick: now,
            ticks: 0,
        }
    }

    /// Seconds since the timer was created or last reset.
    pub fn elapsed_secs(&self) -> f32 {
        self.start.elapsed().as_secs_f32()
    }

    /// Records a tick and returns the time since the previous one.
    pub fn tick(&mut self) -> Duration {
        let now = Instant::now();
        let delta = now - self.last_tick;
        self.last_tick = now;
        self.ticks += 1;
        delta
    }

    /// Number of ticks recorded.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Mean ticks per second since the timer started, or zero before the first tick.
    pub fn average_rate(&self) -> f64 {
        let secs = self.start.elapsed().as_secs_f64();
        if self.ticks == 0 || secs <= 0.0 {
            0.0
        } else {
            self.ticks as f64 / secs
        }
    }

    /// Restart the clock and clear the tick count.
    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ticks_counted() {
        let mut timer = Timer::new();
        assert_eq!(timer.average_rate(), 0.0);
        timer.tick();
        timer.tick();
        assert_eq!(timer.ticks(), 2);
    }

    #[test]
    fn test_elapsed_is_monotonic() {
        let timer = Timer::new();
        let a = timer.elapsed_secs();
        std::thread::sleep(Duration::from_millis(2));
        assert!(timer.elapsed_secs() > a);
    }

    #[test]
    fn test_reset_clears_ticks() {
        let mut timer = Timer::new();
        timer.tick();
        timer.reset();
        assert_eq!(timer.ticks(), 0);
    }
}
