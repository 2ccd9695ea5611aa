use std::fmt;

/// m/s at roughly 20°C.
pub const SPEED_OF_SOUND_MPS: f64 = 343.26;

/// Added to the round-trip time of the max range when deriving the timeout.
pub const TIMEOUT_SAFETY_MARGIN_S: f64 = 0.01;

/// Closest distance the HC-SR04 reports reliably.
pub const MIN_RANGE_M: f64 = 0.02;

/// A calibrated distance in centimeters, rounded to 2 decimals.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Distance(f64);

impl Distance {
    pub fn centimeters(self) -> f64 {
        self.0
    }

    pub fn meters(self) -> f64 {
        self.0 / 100.0
    }
}

impl fmt::Display for Distance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2} cm", self.0)
    }
}

/// Time budget for one cycle: the echo round trip at `max_range_m` plus
/// [`TIMEOUT_SAFETY_MARGIN_S`].
pub fn timeout_s(max_range_m: f64, speed_of_sound_mps: f64) -> f64 {
    (2.0 * max_range_m) / speed_of_sound_mps + TIMEOUT_SAFETY_MARGIN_S
}

/// Converts an echo pulse width into a distance.
///
/// Returns `None` when the one-way distance falls outside
/// `[MIN_RANGE_M, max_range_m]`.
pub fn echo_to_distance(
    duration_s: f64,
    speed_of_sound_mps: f64,
    max_range_m: f64,
) -> Option<Distance> {
    // round trip
    let distance_m = (duration_s * speed_of_sound_mps) / 2.0;
    if (MIN_RANGE_M..=max_range_m).contains(&distance_m) {
        Some(Distance(round_2(distance_m * 100.0)))
    } else {
        None
    }
}

fn round_2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_matches_four_meter_rig() {
        let t = timeout_s(4.0, SPEED_OF_SOUND_MPS);
        assert!((t - (8.0 / 343.26 + 0.01)).abs() < 1e-12);
        assert!((t - 0.03331).abs() < 1e-4);
    }

    #[test]
    fn timeout_is_positive_and_grows_with_range() {
        let mut last = 0.0;
        for range in [0.05, 0.5, 1.0, 2.0, 4.0, 10.0] {
            let t = timeout_s(range, SPEED_OF_SOUND_MPS);
            assert!(t > 0.0);
            assert!(t > last);
            last = t;
        }
    }

    #[test]
    fn ten_millisecond_echo_is_171_cm() {
        let d = echo_to_distance(0.01, SPEED_OF_SOUND_MPS, 4.0).unwrap();
        assert!((d.centimeters() - 171.63).abs() < 1e-9);
        assert!((d.meters() - 1.7163).abs() < 1e-9);
    }

    #[test]
    fn five_millisecond_echo_is_about_86_cm() {
        let d = echo_to_distance(0.005, SPEED_OF_SOUND_MPS, 4.0).unwrap();
        assert!((d.centimeters() - 85.82).abs() <= 0.011);
    }

    #[test]
    fn rejects_too_close() {
        // 0.1 ms -> 1.7 cm
        assert_eq!(echo_to_distance(0.0001, SPEED_OF_SOUND_MPS, 4.0), None);
    }

    #[test]
    fn rejects_beyond_max_range() {
        // 30 ms -> 5.15 m
        assert_eq!(echo_to_distance(0.03, SPEED_OF_SOUND_MPS, 4.0), None);
        assert!(echo_to_distance(0.03, SPEED_OF_SOUND_MPS, 6.0).is_some());
    }

    #[test]
    fn band_edges_are_inclusive() {
        let at_min = 2.0 * MIN_RANGE_M / SPEED_OF_SOUND_MPS;
        let d = echo_to_distance(at_min * (1.0 + 1e-9), SPEED_OF_SOUND_MPS, 4.0).unwrap();
        assert!((d.centimeters() - 2.0).abs() < 1e-9);

        let at_max = 2.0 * 1.0 / SPEED_OF_SOUND_MPS;
        let d = echo_to_distance(at_max * (1.0 - 1e-9), SPEED_OF_SOUND_MPS, 1.0).unwrap();
        assert!((d.centimeters() - 100.0).abs() < 1e-9);
    }

    #[test]
    fn display_uses_two_decimals() {
        let d = echo_to_distance(0.01, SPEED_OF_SOUND_MPS, 4.0).unwrap();
        assert_eq!(d.to_string(), "171.63 cm");
    }
}
