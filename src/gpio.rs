//! Linux GPIO character-device backend.

use std::io;

use embedded_hal::digital::v2::{InputPin, OutputPin};
use gpiod::{Bias, Chip, Input, Lines, Options, Output};
use log::info;

use crate::clock::SystemClock;
use crate::config::ArrayConfig;
use crate::error::Result;
use crate::sensor_array::SensorArray;

const CONSUMER: &str = "hcsr04-array";

pub type GpioSensorArray = SensorArray<GpioTrigger, GpioEcho, SystemClock>;

/// Trigger output, requested idle-low. Released when dropped.
pub struct GpioTrigger {
    line: Lines<Output>,
    pin: u32,
}

impl GpioTrigger {
    pub fn request(chip: &Chip, pin: u32) -> io::Result<Self> {
        let opts = Options::output([pin]).values([false]).consumer(CONSUMER);
        let line = chip.request_lines(opts)?;
        Ok(GpioTrigger { line, pin })
    }

    pub fn pin(&self) -> u32 {
        self.pin
    }
}

impl OutputPin for GpioTrigger {
    type Error = io::Error;

    fn set_low(&mut self) -> io::Result<()> {
        self.line.set_values([false])
    }

    fn set_high(&mut self) -> io::Result<()> {
        self.line.set_values([true])
    }
}

/// Echo input without pull resistor. Released when dropped.
pub struct GpioEcho {
    line: Lines<Input>,
    pin: u32,
}

impl GpioEcho {
    pub fn request(chip: &Chip, pin: u32) -> io::Result<Self> {
        let opts = Options::input([pin]).bias(Bias::Disable).consumer(CONSUMER);
        let line = chip.request_lines(opts)?;
        Ok(GpioEcho { line, pin })
    }

    pub fn pin(&self) -> u32 {
        self.pin
    }
}

impl InputPin for GpioEcho {
    type Error = io::Error;

    fn is_high(&self) -> io::Result<bool> {
        let [level] = self.line.get_values([false; 1])?;
        Ok(level)
    }

    fn is_low(&self) -> io::Result<bool> {
        self.is_high().map(|high| !high)
    }
}

/// Validates `config`, requests every line on the chip and builds the array.
///
/// Lines already requested are released again if a later request fails.
pub fn open(config: &ArrayConfig) -> Result<GpioSensorArray> {
    config.validate()?;

    let chip = Chip::new(&config.chip)?;
    let trigger = GpioTrigger::request(&chip, config.trigger_pin)?;
    let echoes = config
        .sensing_pins
        .iter()
        .map(|&pin| GpioEcho::request(&chip, pin))
        .collect::<io::Result<Vec<_>>>()?;

    let array = SensorArray::new(trigger, echoes, config.max_range_m, SystemClock)?
        .with_poll_mode(config.poll_mode);

    info!(
        "Sensor array initialized on {}: trigger={}, echoes={:?}, timeout={:.4}s, {:?} polling",
        config.chip,
        config.trigger_pin,
        config.sensing_pins,
        array.timeout_s(),
        array.poll_mode()
    );
    Ok(array)
}
