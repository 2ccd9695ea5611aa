use nix::time::{clock_gettime, ClockId};

/// Source of monotonic timestamps in seconds.
///
/// Resolution must be well below a millisecond; echo widths are measured in
/// microseconds.
pub trait MonotonicClock {
    fn now_s(&self) -> f64;

    /// Spin until `duration_s` has elapsed. Never sleeps.
    fn busy_wait(&self, duration_s: f64) {
        let start = self.now_s();
        while self.now_s() - start < duration_s {
            std::hint::spin_loop();
        }
    }
}

/// `CLOCK_MONOTONIC` via `clock_gettime`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl MonotonicClock for SystemClock {
    fn now_s(&self) -> f64 {
        match clock_gettime(ClockId::CLOCK_MONOTONIC) {
            Ok(ts) => ts.tv_sec() as f64 + (ts.tv_nsec() as f64 / 1_000_000_000.0),

            Err(_) => 0.0, // never expecting this
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_clock_never_goes_backwards() {
        let clock = SystemClock;
        let mut last = clock.now_s();
        for _ in 0..1000 {
            let now = clock.now_s();
            assert!(now >= last);
            last = now;
        }
    }

    #[test]
    fn busy_wait_spins_for_at_least_the_duration() {
        let clock = SystemClock;
        let start = clock.now_s();
        clock.busy_wait(200e-6);
        assert!(clock.now_s() - start >= 200e-6);
    }
}
