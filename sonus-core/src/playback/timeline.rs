//! Play-head scheduling for gapless sequential playback.
//!
//! The timeline owns a single monotonically advancing "play head": the next
//! available output time. The first buffer primes the head to `now +
//! pre-roll` rather than `now`, absorbing jitter from bursty decode or
//! network delivery; each subsequent buffer starts exactly where the
//! previous one ends, regardless of when its decode completed. The head
//! never moves backward.

/// Default pre-roll before the first scheduled buffer (seconds).
pub const DEFAULT_PREROLL_SECS: f64 = 0.25;

#[derive(Debug, Clone)]
pub struct Timeline {
    play_head: f64,
    preroll: f64,
    primed: bool,
}

impl Timeline {
    pub fn new(preroll_secs: f64) -> Self {
        Self {
            play_head: 0.0,
            preroll: preroll_secs,
            primed: false,
        }
    }

    /// Commit a buffer of `duration` seconds at output-clock time `now`,
    /// returning its scheduled start time.
    ///
    /// Priming happens on the first call; `max` keeps the head from moving
    /// backward even if it was advanced before priming.
    pub fn schedule(&mut self, now: f64, duration: f64) -> f64 {
        if !self.primed {
            self.play_head = (now + self.preroll).max(self.play_head);
            self.primed = true;
        }
        let start = self.play_head;
        self.play_head += duration;
        start
    }

    /// The next available output time (seconds).
    pub fn play_head(&self) -> f64 {
        self.play_head
    }

    /// Whether the first buffer has been scheduled.
    pub fn is_primed(&self) -> bool {
        self.primed
    }

    /// Forget the schedule; the next buffer re-primes with pre-roll.
    pub fn reset(&mut self) {
        self.play_head = 0.0;
        self.primed = false;
    }
}

impl Default for Timeline {
    fn default() -> Self {
        Self::new(DEFAULT_PREROLL_SECS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn first_buffer_primes_with_preroll() {
        let mut tl = Timeline::new(0.25);
        let start = tl.schedule(10.0, 0.02);
        assert_relative_eq!(start, 10.25, epsilon = 1e-12);
        assert_relative_eq!(tl.play_head(), 10.27, epsilon = 1e-12);
    }

    #[test]
    fn consecutive_buffers_are_gapless_regardless_of_arrival_time() {
        let mut tl = Timeline::new(0.25);
        let durations = [0.02, 0.04, 0.02, 0.1, 0.06];
        // Arrival times vary wildly (bursty decode), all before their
        // scheduled starts.
        let arrivals = [0.0, 0.001, 0.002, 0.19, 0.21];

        let mut expected = 0.25;
        let mut prev_head = 0.0;
        for (dur, now) in durations.iter().zip(arrivals) {
            let start = tl.schedule(now, *dur);
            assert_relative_eq!(start, expected, epsilon = 1e-12);
            expected += dur;
            assert!(tl.play_head() >= prev_head, "head must never decrease");
            prev_head = tl.play_head();
        }

        // Head equals pre-roll + sum of durations.
        let total: f64 = durations.iter().sum();
        assert_relative_eq!(tl.play_head(), 0.25 + total, epsilon = 1e-12);
    }

    #[test]
    fn reset_allows_repriming() {
        let mut tl = Timeline::new(0.1);
        tl.schedule(0.0, 1.0);
        tl.reset();
        assert!(!tl.is_primed());
        let start = tl.schedule(5.0, 0.5);
        assert_relative_eq!(start, 5.1, epsilon = 1e-12);
    }
}
