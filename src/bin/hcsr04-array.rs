//! Continuous readout of the shared-trigger sensor array.
//!
//! Prints one line per sensor every cycle until interrupted with Ctrl+C.

use std::error::Error;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use clap::Parser;
use log::info;
use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};

use hcsr04_array::config::{
    ArrayConfig, DEFAULT_CHIP, DEFAULT_MAX_RANGE_M, DEFAULT_SENSING_PINS, DEFAULT_TRIGGER_PIN,
};
use hcsr04_array::{gpio, Distance, PollMode, SampleResult};

static RUNNING: AtomicBool = AtomicBool::new(true);

#[derive(Parser, Debug)]
#[command(version, about = "Read eight HC-SR04 sensors sharing one trigger pin")]
struct Args {
    /// GPIO character device
    #[arg(long, default_value = DEFAULT_CHIP)]
    chip: String,

    /// Shared trigger pin
    #[arg(long, default_value_t = DEFAULT_TRIGGER_PIN)]
    trigger: u32,

    /// Echo pins in sensor order, comma separated
    #[arg(long, value_delimiter = ',', default_values_t = DEFAULT_SENSING_PINS)]
    echo: Vec<u32>,

    /// Readings beyond this many meters are discarded
    #[arg(long, default_value_t = DEFAULT_MAX_RANGE_M)]
    max_range: f64,

    /// Time between trigger cycles
    #[arg(long, default_value_t = 80)]
    interval_ms: u64,

    /// Wait on one echo line at a time instead of all at once
    #[arg(long)]
    sequential: bool,
}

impl Args {
    fn config(&self) -> ArrayConfig {
        ArrayConfig {
            chip: self.chip.clone(),
            trigger_pin: self.trigger,
            sensing_pins: self.echo.clone(),
            max_range_m: self.max_range,
            poll_mode: if self.sequential {
                PollMode::Sequential
            } else {
                PollMode::Interleaved
            },
        }
    }
}

extern "C" fn on_signal(_: nix::libc::c_int) {
    RUNNING.store(false, Ordering::SeqCst);
}

fn install_signal_handlers() -> nix::Result<()> {
    let action = SigAction::new(
        SigHandler::Handler(on_signal),
        SaFlags::empty(),
        SigSet::empty(),
    );
    for signal in [Signal::SIGINT, Signal::SIGTERM] {
        // SAFETY: the handler only stores to an atomic
        unsafe { sigaction(signal, &action) }?;
    }
    Ok(())
}

fn format_reading(index: usize, reading: Option<Distance>) -> String {
    match reading {
        Some(d) => format!("Sensor {:2}: {:6.2} cm", index, d.centimeters()),
        None => format!("Sensor {:2}: Out of range / timeout", index),
    }
}

fn print_sample(sample: &SampleResult) {
    for (i, reading) in sample.iter().enumerate() {
        println!("{}", format_reading(i, reading));
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    install_signal_handlers()?;
    let mut array = gpio::open(&args.config())?;

    info!("Starting continuous 8-sensor readings with shared trigger. Ctrl+C to stop.");
    let interval = Duration::from_millis(args.interval_ms);
    let mut next_cycle = Instant::now();
    while RUNNING.load(Ordering::SeqCst) {
        let sample = array.sample();
        print_sample(&sample);

        next_cycle += interval;
        let now = Instant::now();
        if next_cycle > now {
            thread::sleep(next_cycle - now);
        } else {
            next_cycle = now;
        }
    }

    info!("Stopped by user");
    array.release()?;
    info!("All GPIO lines released.");
    Ok(())
}
