//! Distance readings from eight HC-SR04 ultrasonic sensors that share a single
//! trigger line and report on eight separate echo lines.
//!
//! [`SensorArray`] owns the lines and produces one [`SampleResult`] per call to
//! [`SensorArray::sample`]. It is generic over the `embedded-hal` pin traits
//! and a [`MonotonicClock`]; [`gpio`] wires it to a Linux GPIO chip and [`sim`]
//! to a deterministic simulated rig.

pub mod clock;
pub mod config;
pub mod distance;
pub mod error;
pub mod gpio;
pub mod pulse_timer;
pub mod sensor_array;
pub mod sim;
pub mod stream;

#[cfg(feature = "python")]
mod python;

/// Number of sensors on the shared trigger.
pub const SENSOR_COUNT: usize = 8;

pub use clock::{MonotonicClock, SystemClock};
pub use config::ArrayConfig;
pub use distance::Distance;
pub use error::{Error, Result};
pub use pulse_timer::{Pulse, PulseTimer};
pub use sensor_array::{PollMode, SampleResult, SensorArray};
pub use stream::SampleStream;
