use thiserror::Error;

use crate::SENSOR_COUNT;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("exactly {expected} sensing lines required, got {got}")]
    SensingLineCount { expected: usize, got: usize },

    #[error("pin {0} is assigned more than once")]
    DuplicatePin(u32),

    #[error("invalid max range {0} m: must be positive and finite")]
    InvalidMaxRange(f64),

    #[error("GPIO error: {0}")]
    Gpio(#[from] std::io::Error),

    #[error("pin error: {0}")]
    Pin(String),

    #[error("failed to spawn sampling thread: {0}")]
    Thread(std::io::Error),

    #[error("sample channel overflow")]
    Overflow,

    #[error("sampling thread exited: {0}")]
    ThreadExit(String),
}

impl Error {
    pub(crate) fn line_count(got: usize) -> Self {
        Error::SensingLineCount {
            expected: SENSOR_COUNT,
            got,
        }
    }
}
