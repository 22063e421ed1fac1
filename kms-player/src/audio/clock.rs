//! Playback clock
//!
//! Song position is derived from the audio hardware clock on every read:
//!
//! ```text
//! elapsed = running ? offset + (now - start_time) : offset
//! ```
//!
//! Nothing here integrates a timer, so a skipped or late UI tick can never
//! make the position drift.

/// Anchor pairing a hardware clock value with a song position
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PlaybackClock {
    /// Hardware clock time at which the current player pair started
    start_time: Option<f64>,
    /// Song seconds corresponding to `start_time` (or the paused position)
    offset: f64,
}

impl PlaybackClock {
    /// Anchor playback of song position `offset` at hardware time `now`
    pub fn start(&mut self, now: f64, offset: f64) {
        self.start_time = Some(now);
        self.offset = offset;
    }

    /// Fold the running interval into the offset; returns the stop position
    pub fn stop(&mut self, now: f64) -> f64 {
        self.offset = self.elapsed(now);
        self.start_time = None;
        self.offset
    }

    /// Overwrite the stopped position
    pub fn set_offset(&mut self, offset: f64) {
        self.offset = offset;
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn elapsed(&self, now: f64) -> f64 {
        match self.start_time {
            Some(start) => self.offset + (now - start).max(0.0),
            None => self.offset,
        }
    }

    pub fn is_running(&self) -> bool {
        self.start_time.is_some()
    }

    pub fn start_time(&self) -> Option<f64> {
        self.start_time
    }

    pub fn offset(&self) -> f64 {
        self.offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_elapsed_accumulates_intervals() {
        let mut clock = PlaybackClock::default();
        clock.start(100.0, 0.0);
        assert_eq!(clock.elapsed(105.0), 5.0);
        assert_eq!(clock.stop(105.0), 5.0);

        // Paused time does not count
        assert_eq!(clock.elapsed(500.0), 5.0);

        clock.start(500.0, clock.offset());
        assert_eq!(clock.elapsed(502.5), 7.5);
    }

    #[test]
    fn test_seek_overwrites_offset() {
        let mut clock = PlaybackClock::default();
        clock.start(0.0, 0.0);
        clock.stop(5.0);
        clock.set_offset(10.0);
        assert_eq!(clock.elapsed(1000.0), 10.0);
        assert!(!clock.is_running());
    }

    #[test]
    fn test_clock_before_start_never_rewinds() {
        let mut clock = PlaybackClock::default();
        clock.start(10.0, 3.0);
        assert_eq!(clock.elapsed(9.0), 3.0);
    }
}
