//! Simulated rig: a virtual clock, a trigger line and echo lines whose levels
//! are a function of virtual time since the last trigger.
//!
//! Every call to [`SimClock::now_s`] advances virtual time by one tick, so
//! busy-poll loops always make progress and runs are fully deterministic.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use embedded_hal::digital::v2::{InputPin, OutputPin};

use crate::clock::MonotonicClock;
use crate::error::Result;
use crate::sensor_array::SensorArray;
use crate::SENSOR_COUNT;

const NEVER: u64 = u64::MAX;

/// How an echo line answers a trigger: high after `delay_ns` for `width_ns`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EchoProfile {
    pub delay_ns: u64,
    pub width_ns: u64,
}

impl EchoProfile {
    pub fn from_secs(delay_s: f64, width_s: f64) -> Self {
        EchoProfile {
            delay_ns: (delay_s * 1e9).round() as u64,
            width_ns: (width_s * 1e9).round() as u64,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimError {
    ReadFault,
    WriteFault,
}

struct RigState {
    now_ns: AtomicU64,
    armed_ns: AtomicU64,
    trigger_high: AtomicBool,
    trigger_rise_ns: AtomicU64,
    trigger_fault: AtomicBool,
    trigger_pulses: Mutex<Vec<(u64, u64)>>,
    echoes: Mutex<[Option<EchoProfile>; SENSOR_COUNT]>,
    read_faults: Mutex<[bool; SENSOR_COUNT]>,
}

/// Handle to the shared simulation state. Cheap to clone.
#[derive(Clone)]
pub struct SimRig {
    state: Arc<RigState>,
    tick_ns: u64,
}

impl SimRig {
    pub fn new(tick_ns: u64) -> Self {
        SimRig {
            state: Arc::new(RigState {
                now_ns: AtomicU64::new(1_000_000_000),
                armed_ns: AtomicU64::new(NEVER),
                trigger_high: AtomicBool::new(false),
                trigger_rise_ns: AtomicU64::new(0),
                trigger_fault: AtomicBool::new(false),
                trigger_pulses: Mutex::new(Vec::new()),
                echoes: Mutex::new([None; SENSOR_COUNT]),
                read_faults: Mutex::new([false; SENSOR_COUNT]),
            }),
            tick_ns: tick_ns.max(1),
        }
    }

    pub fn clock(&self) -> SimClock {
        SimClock {
            state: Arc::clone(&self.state),
            tick_ns: self.tick_ns,
        }
    }

    pub fn trigger(&self) -> SimTrigger {
        SimTrigger {
            state: Arc::clone(&self.state),
        }
    }

    pub fn echo(&self, index: usize) -> SimEcho {
        SimEcho {
            state: Arc::clone(&self.state),
            index,
        }
    }

    /// Eight echo lines in index order.
    pub fn echoes(&self) -> Vec<SimEcho> {
        (0..SENSOR_COUNT).map(|i| self.echo(i)).collect()
    }

    /// A full array wired to this rig.
    pub fn sensor_array(
        &self,
        max_range_m: f64,
    ) -> Result<SensorArray<SimTrigger, SimEcho, SimClock>> {
        SensorArray::new(self.trigger(), self.echoes(), max_range_m, self.clock())
    }

    /// `None` makes the line stay low.
    pub fn set_echo(&self, index: usize, profile: Option<EchoProfile>) {
        self.state.echoes.lock().unwrap()[index] = profile;
    }

    pub fn fail_reads(&self, index: usize, fail: bool) {
        self.state.read_faults.lock().unwrap()[index] = fail;
    }

    pub fn fail_trigger(&self, fail: bool) {
        self.state.trigger_fault.store(fail, Ordering::SeqCst);
    }

    /// Starts the echo timeline now, as a trigger falling edge would.
    pub fn arm(&self) {
        let now = self.state.now_ns.load(Ordering::SeqCst);
        self.state.armed_ns.store(now, Ordering::SeqCst);
    }

    pub fn trigger_is_high(&self) -> bool {
        self.state.trigger_high.load(Ordering::SeqCst)
    }

    /// `(rise_ns, fall_ns)` of every completed trigger pulse.
    pub fn trigger_pulses(&self) -> Vec<(u64, u64)> {
        self.state.trigger_pulses.lock().unwrap().clone()
    }
}

#[derive(Clone)]
pub struct SimClock {
    state: Arc<RigState>,
    tick_ns: u64,
}

impl SimClock {
    /// Current virtual time without advancing it.
    pub fn peek_s(&self) -> f64 {
        ns_to_s(self.state.now_ns.load(Ordering::SeqCst))
    }
}

impl MonotonicClock for SimClock {
    fn now_s(&self) -> f64 {
        ns_to_s(self.state.now_ns.fetch_add(self.tick_ns, Ordering::SeqCst))
    }
}

pub struct SimTrigger {
    state: Arc<RigState>,
}

impl OutputPin for SimTrigger {
    type Error = SimError;

    fn set_high(&mut self) -> core::result::Result<(), SimError> {
        if self.state.trigger_fault.load(Ordering::SeqCst) {
            return Err(SimError::WriteFault);
        }
        if !self.state.trigger_high.swap(true, Ordering::SeqCst) {
            let now = self.state.now_ns.load(Ordering::SeqCst);
            self.state.trigger_rise_ns.store(now, Ordering::SeqCst);
        }
        Ok(())
    }

    fn set_low(&mut self) -> core::result::Result<(), SimError> {
        if self.state.trigger_fault.load(Ordering::SeqCst) {
            return Err(SimError::WriteFault);
        }
        if self.state.trigger_high.swap(false, Ordering::SeqCst) {
            // HC-SR04 starts its burst on the falling edge
            let now = self.state.now_ns.load(Ordering::SeqCst);
            let rise = self.state.trigger_rise_ns.load(Ordering::SeqCst);
            self.state.trigger_pulses.lock().unwrap().push((rise, now));
            self.state.armed_ns.store(now, Ordering::SeqCst);
        }
        Ok(())
    }
}

pub struct SimEcho {
    state: Arc<RigState>,
    index: usize,
}

impl InputPin for SimEcho {
    type Error = SimError;

    fn is_high(&self) -> core::result::Result<bool, SimError> {
        if self
            .state
            .read_faults
            .lock()
            .unwrap()
            .get(self.index)
            .copied()
            .unwrap_or(false)
        {
            return Err(SimError::ReadFault);
        }

        let armed = self.state.armed_ns.load(Ordering::SeqCst);
        if armed == NEVER {
            return Ok(false);
        }
        let profile = match self.state.echoes.lock().unwrap().get(self.index).copied().flatten() {
            Some(p) => p,
            None => return Ok(false),
        };

        let now = self.state.now_ns.load(Ordering::SeqCst);
        let rise = armed + profile.delay_ns;
        Ok(now >= rise && now < rise + profile.width_ns)
    }

    fn is_low(&self) -> core::result::Result<bool, SimError> {
        self.is_high().map(|high| !high)
    }
}

fn ns_to_s(ns: u64) -> f64 {
    ns as f64 / 1_000_000_000.0
}
