use std::time::Instant;

/// Frame timing owned by the engine and handed to `update_frame`.
#[derive(Copy, Clone, Debug)]
pub struct FrameClock {
    start: Instant,
    last: Instant,
    elapsed: f32,
    delta: f32,
    frame: u64,
}

impl FrameClock {
    pub fn new() -> Self {
        Self::starting_at(Instant::now())
    }

    pub fn starting_at(start: Instant) -> Self {
        Self {
            start,
            last: start,
            elapsed: 0.0,
            delta: 0.0,
            frame: 0,
        }
    }

    pub fn tick(&mut self) {
        self.tick_at(Instant::now());
    }

    pub fn tick_at(&mut self, now: Instant) {
        // Instants earlier than the previous tick count as zero time.
        let now = now.max(self.last);
        self.delta = (now - self.last).as_secs_f32();
        self.elapsed = (now - self.start).as_secs_f32();
        self.last = now;
        self.frame += 1;
    }

    /// Seconds since the clock started.
    pub fn elapsed(&self) -> f32 {
        self.elapsed
    }

    /// Seconds between the two most recent ticks.
    pub fn delta(&self) -> f32 {
        self.delta
    }

    /// Number of ticks so far.
    pub fn frame(&self) -> u64 {
        self.frame
    }
}

impl Default for FrameClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn ticks_track_delta_and_elapsed() {
        let start = Instant::now();
        let mut clock = FrameClock::starting_at(start);
        assert_eq!(clock.frame(), 0);

        clock.tick_at(start + Duration::from_millis(250));
        assert!((clock.delta() - 0.25).abs() < 1e-6);
        assert!((clock.elapsed() - 0.25).abs() < 1e-6);

        clock.tick_at(start + Duration::from_millis(1000));
        assert!((clock.delta() - 0.75).abs() < 1e-6);
        assert!((clock.elapsed() - 1.0).abs() < 1e-6);
        assert_eq!(clock.frame(), 2);
    }

    #[test]
    fn going_backwards_yields_zero_delta() {
        let start = Instant::now();
        let mut clock = FrameClock::starting_at(start);
        clock.tick_at(start + Duration::from_secs(1));
        clock.tick_at(start);
        assert_eq!(clock.delta(), 0.0);
        assert!((clock.elapsed() - 1.0).abs() < 1e-6);
    }
}
