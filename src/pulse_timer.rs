//! Deadline-bounded edge timing on digital inputs.
//!
//! Busy-polls the lines instead of waiting on edge events: echo pulses last
//! from roughly a hundred microseconds to tens of milliseconds and interrupt
//! latency would bias them. The cost is CPU time, bounded by the deadline.

use embedded_hal::digital::v2::InputPin;
use log::warn;

use crate::clock::MonotonicClock;

/// Timestamps of one observed high pulse.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pulse {
    /// First time the line was seen high.
    pub start_s: f64,
    /// Last time the line was seen high.
    pub end_s: f64,
}

impl Pulse {
    pub fn duration_s(&self) -> f64 {
        self.end_s - self.start_s
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum EdgeState {
    AwaitLow,
    AwaitRise,
    High { start_s: f64, last_high_s: f64 },
    Done(Option<Pulse>),
}

/// Rising/falling edge state machine for one line, fed one level sample at a
/// time.
///
/// A rise only counts after the line has been seen low, so a line that is
/// already high when polling starts gives no reading.
#[derive(Debug, Clone, Copy)]
struct EdgeTracker {
    state: EdgeState,
    /// Rises seen before this instant belong to an earlier pulse. Only
    /// reachable for callers that hand `PulseTimer` a reference taken
    /// before they began polling; `SensorArray` reads it from the clock
    /// right before the first poll.
    started_before_s: f64,
}

impl EdgeTracker {
    fn new(started_before_s: f64) -> Self {
        EdgeTracker {
            state: EdgeState::AwaitLow,
            started_before_s,
        }
    }

    fn is_done(&self) -> bool {
        matches!(self.state, EdgeState::Done(_))
    }

    /// Feeds the level seen at `now_s`. Returns true once the pulse is over.
    fn observe(&mut self, now_s: f64, high: bool) -> bool {
        self.state = match self.state {
            // high at the first poll: mid-pulse, no rising edge to time from
            EdgeState::AwaitLow if high => EdgeState::Done(None),
            EdgeState::AwaitLow => EdgeState::AwaitRise,
            EdgeState::AwaitRise if high => {
                if now_s < self.started_before_s {
                    EdgeState::Done(None)
                } else {
                    EdgeState::High {
                        start_s: now_s,
                        last_high_s: now_s,
                    }
                }
            }
            EdgeState::High { start_s, .. } if high => EdgeState::High {
                start_s,
                last_high_s: now_s,
            },
            EdgeState::High {
                start_s,
                last_high_s,
            } => EdgeState::Done((last_high_s > start_s).then_some(Pulse {
                start_s,
                end_s: last_high_s,
            })),
            state => state,
        };
        self.is_done()
    }

    fn abort(&mut self) {
        self.state = EdgeState::Done(None);
    }

    /// Anything not finished by now never will be.
    fn finish(self) -> Option<Pulse> {
        match self.state {
            EdgeState::Done(pulse) => pulse,
            _ => None,
        }
    }
}

pub struct PulseTimer<C> {
    clock: C,
}

impl<C: MonotonicClock> PulseTimer<C> {
    pub fn new(clock: C) -> Self {
        PulseTimer { clock }
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Waits for `line` to rise and fall again, giving up as soon as the clock
    /// passes `deadline_s`.
    ///
    /// Returns `None` on timeout in either phase, on a read error, when the
    /// line is already high at the first poll, on an edge seen before
    /// `started_before_s`, or when the pulse has no measurable width.
    pub fn measure_high_pulse<P>(
        &self,
        line: &P,
        started_before_s: f64,
        deadline_s: f64,
    ) -> Option<Pulse>
    where
        P: InputPin,
        P::Error: core::fmt::Debug,
    {
        let mut tracker = EdgeTracker::new(started_before_s);
        loop {
            let now = self.clock.now_s();
            if now > deadline_s {
                return None;
            }
            if tracker.observe(now, read_level(line)?) {
                return tracker.finish();
            }
        }
    }

    /// Measures one pulse on every line at once, visiting the lines
    /// round-robin inside a single polling loop.
    ///
    /// Each slot follows the rules of [`measure_high_pulse`](Self::measure_high_pulse)
    /// against the same absolute deadline. Returns as soon as every line is
    /// settled.
    pub fn measure_high_pulses<P, const N: usize>(
        &self,
        lines: &[P; N],
        started_before_s: f64,
        deadline_s: f64,
    ) -> [Option<Pulse>; N]
    where
        P: InputPin,
        P::Error: core::fmt::Debug,
    {
        let mut trackers = [EdgeTracker::new(started_before_s); N];
        loop {
            let now = self.clock.now_s();
            if now > deadline_s {
                break;
            }
            let mut pending = false;
            for (tracker, line) in trackers.iter_mut().zip(lines.iter()) {
                if tracker.is_done() {
                    continue;
                }
                match read_level(line) {
                    Some(level) => pending |= !tracker.observe(now, level),
                    None => tracker.abort(),
                }
            }
            if !pending {
                break;
            }
        }
        trackers.map(EdgeTracker::finish)
    }
}

fn read_level<P>(line: &P) -> Option<bool>
where
    P: InputPin,
    P::Error: core::fmt::Debug,
{
    match line.is_high() {
        Ok(level) => Some(level),
        Err(e) => {
            warn!("Failed to read sensing line: {:?}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{EchoProfile, SimRig};

    const TICK_NS: u64 = 100;
    const TICK_S: f64 = TICK_NS as f64 * 1e-9;

    fn rig_with_echo(profile: EchoProfile) -> SimRig {
        let rig = SimRig::new(TICK_NS);
        rig.set_echo(0, Some(profile));
        rig
    }

    #[test]
    fn tracker_needs_a_full_high_pulse() {
        let mut t = EdgeTracker::new(0.0);
        assert!(!t.observe(1.0, false));
        assert!(!t.observe(2.0, true));
        assert!(!t.observe(3.0, true));
        assert!(t.observe(4.0, false));
        assert_eq!(
            t.finish(),
            Some(Pulse {
                start_s: 2.0,
                end_s: 3.0
            })
        );

        // a single high sample has no width
        let mut t = EdgeTracker::new(0.0);
        t.observe(1.0, false);
        t.observe(2.0, true);
        assert!(t.observe(3.0, false));
        assert_eq!(t.finish(), None);

        // still high when time runs out
        let mut t = EdgeTracker::new(0.0);
        t.observe(1.0, false);
        t.observe(2.0, true);
        t.observe(3.0, true);
        assert_eq!(t.finish(), None);
    }

    #[test]
    fn tracker_ignores_a_line_high_from_the_start() {
        let mut t = EdgeTracker::new(0.0);
        assert!(t.observe(1.0, true));
        assert!(t.observe(2.0, false));
        assert!(t.observe(3.0, true));
        assert_eq!(t.finish(), None);
    }

    #[test]
    fn timer_started_mid_pulse_is_none() {
        let rig = rig_with_echo(EchoProfile::from_secs(0.0002, 0.004));
        rig.arm();
        let echo = rig.echo(0);

        let timer = PulseTimer::new(rig.clock());
        // 1.2 ms in, the echo has been high for 1 ms
        for _ in 0..12_000 {
            timer.clock().now_s();
        }
        assert_eq!(echo.is_high(), Ok(true));

        let t0 = timer.clock().now_s();
        assert_eq!(timer.measure_high_pulse(&echo, t0, t0 + 0.05), None);
        // settled on the first poll instead of waiting out the pulse
        assert!(rig.clock().peek_s() - t0 < 3.0 * TICK_S);
    }

    #[test]
    fn round_robin_skips_lines_already_high() {
        let rig = SimRig::new(TICK_NS);
        rig.set_echo(0, Some(EchoProfile::from_secs(0.0, 0.004)));
        rig.set_echo(1, Some(EchoProfile::from_secs(0.0005, 0.001)));
        rig.arm();
        let lines = [rig.echo(0), rig.echo(1)];

        let timer = PulseTimer::new(rig.clock());
        let t0 = timer.clock().now_s();
        let pulses = timer.measure_high_pulses(&lines, t0, t0 + 0.02);

        assert_eq!(pulses[0], None);
        assert!((pulses[1].unwrap().duration_s() - 0.001).abs() < 3.0 * TICK_S);
    }

    #[test]
    fn measures_pulse_width() {
        let rig = rig_with_echo(EchoProfile::from_secs(0.0005, 0.002));
        rig.arm();
        let echo = rig.echo(0);

        let timer = PulseTimer::new(rig.clock());
        let t0 = timer.clock().now_s();
        let pulse = timer.measure_high_pulse(&echo, t0, t0 + 0.05).unwrap();

        assert!(pulse.start_s >= t0);
        assert!((pulse.duration_s() - 0.002).abs() < 3.0 * TICK_S);
    }

    #[test]
    fn silent_line_times_out_at_deadline() {
        let rig = SimRig::new(TICK_NS);
        rig.arm();
        let echo = rig.echo(0);

        let timer = PulseTimer::new(rig.clock());
        let t0 = timer.clock().now_s();
        assert_eq!(timer.measure_high_pulse(&echo, t0, t0 + 0.01), None);

        // gave up a tick or two past the deadline
        let overshoot = rig.clock().peek_s() - (t0 + 0.01);
        assert!(overshoot >= 0.0);
        assert!(overshoot < 3.0 * TICK_S);
    }

    #[test]
    fn pulse_still_high_at_deadline_is_none() {
        let rig = rig_with_echo(EchoProfile::from_secs(0.001, 0.05));
        rig.arm();
        let echo = rig.echo(0);

        let timer = PulseTimer::new(rig.clock());
        let t0 = timer.clock().now_s();
        assert_eq!(timer.measure_high_pulse(&echo, t0, t0 + 0.02), None);
    }

    #[test]
    fn edge_before_reference_is_rejected() {
        let rig = rig_with_echo(EchoProfile::from_secs(0.001, 0.002));
        rig.arm();
        let echo = rig.echo(0);

        let timer = PulseTimer::new(rig.clock());
        let t0 = timer.clock().now_s();
        assert_eq!(timer.measure_high_pulse(&echo, t0 + 1.0, t0 + 0.05), None);
    }

    #[test]
    fn read_error_is_no_reading() {
        let rig = rig_with_echo(EchoProfile::from_secs(0.0005, 0.002));
        rig.arm();
        let echo = rig.echo(0);
        rig.fail_reads(0, true);

        let timer = PulseTimer::new(rig.clock());
        let t0 = timer.clock().now_s();
        assert_eq!(timer.measure_high_pulse(&echo, t0, t0 + 0.05), None);
    }

    #[test]
    fn round_robin_measures_overlapping_pulses() {
        let rig = SimRig::new(TICK_NS);
        rig.set_echo(0, Some(EchoProfile::from_secs(0.0002, 0.006)));
        rig.set_echo(1, Some(EchoProfile::from_secs(0.0003, 0.001)));
        rig.fail_reads(2, true);
        rig.arm();
        let lines = [rig.echo(0), rig.echo(1), rig.echo(2), rig.echo(3)];

        let timer = PulseTimer::new(rig.clock());
        let t0 = timer.clock().now_s();
        let pulses = timer.measure_high_pulses(&lines, t0, t0 + 0.02);

        assert!((pulses[0].unwrap().duration_s() - 0.006).abs() < 3.0 * TICK_S);
        assert!((pulses[1].unwrap().duration_s() - 0.001).abs() < 3.0 * TICK_S);
        assert_eq!(pulses[2], None);
        assert_eq!(pulses[3], None);
    }

    #[test]
    fn round_robin_returns_once_every_line_settles() {
        let rig = SimRig::new(TICK_NS);
        rig.set_echo(0, Some(EchoProfile::from_secs(0.0002, 0.001)));
        rig.set_echo(1, Some(EchoProfile::from_secs(0.0002, 0.002)));
        rig.arm();
        let lines = [rig.echo(0), rig.echo(1)];

        let timer = PulseTimer::new(rig.clock());
        let t0 = timer.clock().now_s();
        let pulses = timer.measure_high_pulses(&lines, t0, t0 + 0.05);

        assert!(pulses.iter().all(Option::is_some));
        assert!(rig.clock().peek_s() - t0 < 0.003);
    }
}
