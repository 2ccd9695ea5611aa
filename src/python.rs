use std::sync::Mutex;
use std::time::Duration;

use pyo3::create_exception;
use pyo3::exceptions::{PyException, PyIOError, PyOverflowError, PyValueError};
use pyo3::prelude::*;

use crate::clock::SystemClock;
use crate::config::{ArrayConfig, DEFAULT_CHIP, DEFAULT_MAX_RANGE_M};
use crate::error::Error;
use crate::gpio::{self, GpioEcho, GpioSensorArray, GpioTrigger};
use crate::sensor_array::PollMode;
use crate::stream::SampleStream;

create_exception!(hcsr04_array, ThreadError, PyException);

fn to_py_err(e: Error) -> PyErr {
    match e {
        Error::SensingLineCount { .. } | Error::DuplicatePin(_) | Error::InvalidMaxRange(_) => {
            PyValueError::new_err(e.to_string())
        }
        Error::Overflow => PyOverflowError::new_err(e.to_string()),
        Error::Thread(_) | Error::ThreadExit(_) => ThreadError::new_err(e.to_string()),
        Error::Gpio(_) | Error::Pin(_) => PyIOError::new_err(e.to_string()),
    }
}

#[pyclass]
#[doc = "Eight HC-SR04 sensors sharing one trigger pin.\n\n\
         Distances are in cm, None means timeout or out of range.\n\
         Exactly 8 echo pins are required."]
struct SharedTriggerArray {
    array: Mutex<Option<GpioSensorArray>>,
    stream: Option<SampleStream<GpioTrigger, GpioEcho, SystemClock>>,
    timeout_s: f64,
}

#[pymethods]
impl SharedTriggerArray {
    #[new]
    #[pyo3(signature = (trigger_pin, echo_pins, max_distance_m=DEFAULT_MAX_RANGE_M, chip=None, sequential=false))]
    fn new(
        trigger_pin: u32,
        echo_pins: Vec<u32>,
        max_distance_m: f64,
        chip: Option<String>,
        sequential: bool,
    ) -> PyResult<Self> {
        let config = ArrayConfig {
            chip: chip.unwrap_or_else(|| DEFAULT_CHIP.to_string()),
            trigger_pin,
            sensing_pins: echo_pins,
            max_range_m: max_distance_m,
            poll_mode: if sequential {
                PollMode::Sequential
            } else {
                PollMode::Interleaved
            },
        };
        let array = gpio::open(&config).map_err(to_py_err)?;

        Ok(SharedTriggerArray {
            timeout_s: array.timeout_s(),
            array: Mutex::new(Some(array)),
            stream: None,
        })
    }

    #[getter]
    fn timeout_s(&self) -> f64 {
        self.timeout_s
    }

    /// One trigger cycle. Not available while streaming.
    fn get_distances_cm(&self, py: Python<'_>) -> PyResult<Vec<Option<f64>>> {
        let mut guard = self.array.lock().unwrap();
        let array = guard
            .as_mut()
            .ok_or_else(|| PyIOError::new_err("Sensor array is streaming or closed"))?;
        let sample = py.allow_threads(|| array.sample());
        Ok(sample.to_centimeters())
    }

    #[pyo3(signature = (interval_ms=80))]
    fn start_streaming(&mut self, interval_ms: u64) -> PyResult<()> {
        // Return early if already streaming
        if self.stream.is_some() {
            return Ok(());
        }

        let array = self
            .array
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| PyIOError::new_err("Sensor array is closed"))?;
        let stream =
            SampleStream::start(array, Duration::from_millis(interval_ms)).map_err(to_py_err)?;
        self.stream = Some(stream);
        Ok(())
    }

    /// Blocks for the next `(timestamp, distances)`; None once streaming ended.
    fn get_reading(&self, py: Python<'_>) -> PyResult<Option<(f64, Vec<Option<f64>>)>> {
        let stream = self
            .stream
            .as_ref()
            .ok_or_else(|| PyIOError::new_err("Sensor array not streaming"))?;

        // Release the GIL while waiting
        let result = py.allow_threads(|| stream.recv()).map_err(to_py_err)?;
        Ok(result.map(|sample| (sample.cycle_start_s, sample.to_centimeters())))
    }

    fn is_running(&self) -> bool {
        self.stream.as_ref().is_some_and(|s| s.is_running())
    }

    fn stop_streaming(&mut self) -> PyResult<()> {
        if let Some(stream) = self.stream.take() {
            let array = stream.stop().map_err(to_py_err)?;
            *self.array.lock().unwrap() = Some(array);
        }
        Ok(())
    }

    /// Stops streaming and releases every GPIO line.
    fn close(&mut self) -> PyResult<()> {
        self.stop_streaming()?;
        if let Some(array) = self.array.lock().unwrap().take() {
            array.release().map_err(to_py_err)?;
        }
        Ok(())
    }
}

// Register the module
#[pymodule]
fn hcsr04_array(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<SharedTriggerArray>()?;
    m.add("ThreadError", m.py().get_type::<ThreadError>())?;
    Ok(())
}
