use std::collections::HashSet;

use crate::error::{Error, Result};
use crate::sensor_array::PollMode;
use crate::SENSOR_COUNT;

pub const DEFAULT_CHIP: &str = "/dev/gpiochip0";
/// BCM numbering.
pub const DEFAULT_TRIGGER_PIN: u32 = 17;
pub const DEFAULT_SENSING_PINS: [u32; SENSOR_COUNT] = [4, 5, 6, 7, 8, 9, 10, 11];
pub const DEFAULT_MAX_RANGE_M: f64 = 4.0;

/// Physical wiring of the rig. Fixed for the lifetime of an array.
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayConfig {
    pub chip: String,
    pub trigger_pin: u32,
    /// Echo pins, index = sensor number.
    pub sensing_pins: Vec<u32>,
    pub max_range_m: f64,
    pub poll_mode: PollMode,
}

impl Default for ArrayConfig {
    fn default() -> Self {
        ArrayConfig {
            chip: DEFAULT_CHIP.to_string(),
            trigger_pin: DEFAULT_TRIGGER_PIN,
            sensing_pins: DEFAULT_SENSING_PINS.to_vec(),
            max_range_m: DEFAULT_MAX_RANGE_M,
            poll_mode: PollMode::default(),
        }
    }
}

impl ArrayConfig {
    /// Checks the pin assignment and range before any line is requested.
    pub fn validate(&self) -> Result<()> {
        if self.sensing_pins.len() != SENSOR_COUNT {
            return Err(Error::line_count(self.sensing_pins.len()));
        }

        let mut seen = HashSet::with_capacity(SENSOR_COUNT + 1);
        for &pin in std::iter::once(&self.trigger_pin).chain(self.sensing_pins.iter()) {
            if !seen.insert(pin) {
                return Err(Error::DuplicatePin(pin));
            }
        }

        if !(self.max_range_m.is_finite() && self.max_range_m > 0.0) {
            return Err(Error::InvalidMaxRange(self.max_range_m));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_reference_rig() {
        let config = ArrayConfig::default();
        assert_eq!(config.trigger_pin, 17);
        assert_eq!(config.sensing_pins, vec![4, 5, 6, 7, 8, 9, 10, 11]);
        assert_eq!(config.max_range_m, 4.0);
        assert_eq!(config.poll_mode, PollMode::Interleaved);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn wrong_pin_count_is_rejected() {
        let mut config = ArrayConfig::default();
        config.sensing_pins.pop();
        assert!(matches!(
            config.validate(),
            Err(Error::SensingLineCount { expected: 8, got: 7 })
        ));

        config.sensing_pins.extend([12, 13]);
        assert!(matches!(
            config.validate(),
            Err(Error::SensingLineCount { expected: 8, got: 9 })
        ));
    }

    #[test]
    fn shared_pins_are_rejected() {
        let mut config = ArrayConfig::default();
        config.sensing_pins[7] = 4;
        assert!(matches!(config.validate(), Err(Error::DuplicatePin(4))));

        let mut config = ArrayConfig::default();
        config.trigger_pin = 9;
        assert!(matches!(config.validate(), Err(Error::DuplicatePin(9))));
    }

    #[test]
    fn bad_range_is_rejected() {
        let config = ArrayConfig {
            max_range_m: -4.0,
            ..ArrayConfig::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidMaxRange(_))));
    }
}
