//! Eight HC-SR04 receivers sharing one trigger line.
//!
//! One call to [`SensorArray::sample`] fires a single 10 µs trigger pulse and
//! then times the echo on every sensing line. All eight measurements share one
//! deadline anchored at the end of the trigger pulse.
//!
//! [`PollMode::Interleaved`] watches all eight lines in one polling loop, so
//! every line gets the whole window. [`PollMode::Sequential`] waits on each
//! line in index order; a line polled late in the cycle only gets whatever is
//! left of the window, and a silent line ahead of it can use all of it.
//!
//! A sample never fails: a silent, slow, out-of-range or unreadable sensor
//! shows up as `None` in its slot. Only construction can fail.
//!
//! The array exclusively owns its lines and is driven from a single thread.
//! Sharing it across threads needs external synchronisation.

use std::fmt::Debug;

use embedded_hal::digital::v2::{InputPin, OutputPin};
use log::{debug, error, info};

use crate::clock::MonotonicClock;
use crate::distance::{echo_to_distance, timeout_s, Distance, SPEED_OF_SOUND_MPS};
use crate::error::{Error, Result};
use crate::pulse_timer::PulseTimer;
use crate::SENSOR_COUNT;

/// Trigger width required by the HC-SR04.
pub const TRIGGER_PULSE_S: f64 = 10e-6;

/// How the eight sensing lines are watched within one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PollMode {
    /// All lines checked on every pass of a single polling loop.
    #[default]
    Interleaved,
    /// One line at a time, in index order, against the shared deadline.
    Sequential,
}

/// One cycle's readings, index-aligned with the sensing lines.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleResult {
    /// Monotonic time at which the trigger pulse ended.
    pub cycle_start_s: f64,
    pub readings: [Option<Distance>; SENSOR_COUNT],
}

impl SampleResult {
    pub fn get(&self, index: usize) -> Option<Distance> {
        self.readings.get(index).copied().flatten()
    }

    pub fn iter(&self) -> impl Iterator<Item = Option<Distance>> + '_ {
        self.readings.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    /// Readings in centimeters, `None` for no reading.
    pub fn to_centimeters(&self) -> Vec<Option<f64>> {
        self.iter().map(|d| d.map(Distance::centimeters)).collect()
    }

    fn valid_count(&self) -> usize {
        self.readings.iter().filter(|r| r.is_some()).count()
    }
}

pub struct SensorArray<T, E, C>
where
    T: OutputPin,
    T::Error: Debug,
{
    trigger: T,
    sensing_lines: [E; SENSOR_COUNT],
    timer: PulseTimer<C>,
    max_range_m: f64,
    speed_of_sound_mps: f64,
    timeout_s: f64,
    poll_mode: PollMode,
    released: bool,
}

impl<T, E, C> SensorArray<T, E, C>
where
    T: OutputPin,
    T::Error: Debug,
    E: InputPin,
    E::Error: Debug,
    C: MonotonicClock,
{
    /// Takes ownership of the trigger and exactly eight sensing lines.
    ///
    /// The trigger is driven low before returning.
    pub fn new(mut trigger: T, sensing_lines: Vec<E>, max_range_m: f64, clock: C) -> Result<Self> {
        let sensing_lines: [E; SENSOR_COUNT] = sensing_lines
            .try_into()
            .map_err(|lines: Vec<E>| Error::line_count(lines.len()))?;

        if !(max_range_m.is_finite() && max_range_m > 0.0) {
            return Err(Error::InvalidMaxRange(max_range_m));
        }

        trigger
            .set_low()
            .map_err(|e| Error::Pin(format!("Failed to idle trigger: {:?}", e)))?;

        let speed_of_sound_mps = SPEED_OF_SOUND_MPS;
        Ok(SensorArray {
            trigger,
            sensing_lines,
            timer: PulseTimer::new(clock),
            max_range_m,
            speed_of_sound_mps,
            timeout_s: timeout_s(max_range_m, speed_of_sound_mps),
            poll_mode: PollMode::default(),
            released: false,
        })
    }

    pub fn with_poll_mode(mut self, poll_mode: PollMode) -> Self {
        self.poll_mode = poll_mode;
        self
    }

    pub fn poll_mode(&self) -> PollMode {
        self.poll_mode
    }

    pub fn max_range_m(&self) -> f64 {
        self.max_range_m
    }

    pub fn speed_of_sound_mps(&self) -> f64 {
        self.speed_of_sound_mps
    }

    /// Per-cycle deadline, measured from the end of the trigger pulse.
    pub fn timeout_s(&self) -> f64 {
        self.timeout_s
    }

    /// Upper bound on the duration of one [`sample`](Self::sample) call,
    /// as if every sensor timed out on its own full window.
    ///
    /// Because the deadline is shared, a real cycle finishes within
    /// `timeout_s` plus trigger and polling overhead in either poll mode.
    pub fn worst_case_cycle_s(&self) -> f64 {
        SENSOR_COUNT as f64 * self.timeout_s
    }

    /// Fires the shared trigger and measures all eight echoes.
    pub fn sample(&mut self) -> SampleResult {
        if let Err(e) = self.fire_trigger() {
            error!("Failed to fire trigger: {:?}", e);
            // make sure the line is not left high
            let _ = self.trigger.set_low();
            return SampleResult {
                cycle_start_s: self.timer.clock().now_s(),
                readings: [None; SENSOR_COUNT],
            };
        }

        let cycle_start = self.timer.clock().now_s();
        let deadline = cycle_start + self.timeout_s;

        let pulses = match self.poll_mode {
            PollMode::Interleaved => {
                self.timer
                    .measure_high_pulses(&self.sensing_lines, cycle_start, deadline)
            }
            PollMode::Sequential => {
                let mut pulses = [None; SENSOR_COUNT];
                for (pulse, line) in pulses.iter_mut().zip(self.sensing_lines.iter()) {
                    *pulse = self.timer.measure_high_pulse(line, cycle_start, deadline);
                }
                pulses
            }
        };
        let readings = pulses.map(|pulse| {
            pulse.and_then(|p| {
                echo_to_distance(p.duration_s(), self.speed_of_sound_mps, self.max_range_m)
            })
        });

        let result = SampleResult {
            cycle_start_s: cycle_start,
            readings,
        };
        debug!(
            "Cycle at {:.6}: {}/{} sensors reporting",
            cycle_start,
            result.valid_count(),
            SENSOR_COUNT
        );
        result
    }

    /// Drives the trigger low and releases every line.
    ///
    /// Dropping the array does the same, logging instead of returning errors.
    pub fn release(mut self) -> Result<()> {
        self.shutdown()
    }

    fn fire_trigger(&mut self) -> core::result::Result<(), T::Error> {
        self.trigger.set_high()?;
        self.timer.clock().busy_wait(TRIGGER_PULSE_S);
        self.trigger.set_low()
    }
}

impl<T, E, C> SensorArray<T, E, C>
where
    T: OutputPin,
    T::Error: Debug,
{
    fn shutdown(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        self.trigger
            .set_low()
            .map_err(|e| Error::Pin(format!("Failed to idle trigger: {:?}", e)))?;
        info!("Sensor array released, trigger idle low");
        Ok(())
    }
}

impl<T, E, C> Drop for SensorArray<T, E, C>
where
    T: OutputPin,
    T::Error: Debug,
{
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            error!("Failed to release sensor array: {}", e);
        }
    }
}
