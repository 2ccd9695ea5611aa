//! Background sampling at a fixed cadence.
//!
//! The array is moved into a dedicated high-priority thread, which samples it
//! once per interval and pushes each [`SampleResult`] into a bounded channel.
//! The thread is the only owner of the lines while it runs;
//! [`SampleStream::stop`] joins it and hands the array back.

use std::fmt::Debug;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use embedded_hal::digital::v2::{InputPin, OutputPin};
use log::{info, warn};
use thread_priority::{ThreadBuilder, ThreadPriority};

use crate::clock::MonotonicClock;
use crate::error::{Error, Result};
use crate::sensor_array::{SampleResult, SensorArray};

/// Only needs to absorb a short stall of the consumer; a consumer that falls
/// further behind stops the stream.
pub const CHANNEL_SIZE: usize = 10;

enum StreamMessage {
    Sample(SampleResult),
    ThreadExit(Option<String>),
}

pub struct SampleStream<T, E, C>
where
    T: OutputPin,
    T::Error: Debug,
{
    receiver: Receiver<StreamMessage>,
    thread_handle: Option<JoinHandle<SensorArray<T, E, C>>>,
    is_running: Arc<AtomicBool>,
    overflow_flag: Arc<AtomicBool>,
}

impl<T, E, C> SampleStream<T, E, C>
where
    T: OutputPin + Send + 'static,
    T::Error: Debug,
    E: InputPin + Send + 'static,
    E::Error: Debug,
    C: MonotonicClock + Send + 'static,
{
    /// Starts sampling `array` every `interval`.
    ///
    /// Cycles are scheduled against absolute instants, so a slow cycle does
    /// not push back the ones after it. A cycle longer than `interval` makes
    /// the next one start immediately.
    pub fn start(mut array: SensorArray<T, E, C>, interval: Duration) -> Result<Self> {
        let (sender, receiver) = bounded(CHANNEL_SIZE);
        let is_running = Arc::new(AtomicBool::new(true));
        let overflow_flag = Arc::new(AtomicBool::new(false));

        let thread_is_running = Arc::clone(&is_running);
        let thread_overflow = Arc::clone(&overflow_flag);
        let thread = ThreadBuilder::default()
            .name("hcsr04_sampling_thread".to_string())
            .priority(ThreadPriority::Max)
            .spawn(move |priority| {
                if let Err(e) = priority {
                    warn!("Failed to raise sampling thread priority: {:?}", e);
                }

                let exit = sampling_loop(
                    &mut array,
                    interval,
                    &thread_is_running,
                    &thread_overflow,
                    &sender,
                );

                // Always mark as not running when thread exits
                thread_is_running.store(false, Ordering::SeqCst);
                let _ = sender.try_send(StreamMessage::ThreadExit(exit.err()));
                array
            })
            .map_err(|e| {
                is_running.store(false, Ordering::SeqCst);
                Error::Thread(e)
            })?;

        info!("Sampling every {:?}", interval);
        Ok(SampleStream {
            receiver,
            thread_handle: Some(thread),
            is_running,
            overflow_flag,
        })
    }

    /// Blocks for the next sample.
    ///
    /// `Ok(None)` once the stream has stopped normally and every queued sample
    /// has been taken.
    pub fn recv(&self) -> Result<Option<SampleResult>> {
        if let Some(done) = self.check_finished() {
            return done;
        }
        match self.receiver.recv() {
            Ok(message) => self.unpack(message),
            Err(_) => self.closed(),
        }
    }

    /// Like [`recv`](Self::recv) but gives up after `timeout`, returning
    /// `Ok(None)` while the stream is still running.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<SampleResult>> {
        if let Some(done) = self.check_finished() {
            return done;
        }
        match self.receiver.recv_timeout(timeout) {
            Ok(message) => self.unpack(message),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => self.closed(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::Relaxed)
    }

    /// Stops the thread after its current cycle and returns the array.
    pub fn stop(mut self) -> Result<SensorArray<T, E, C>> {
        self.is_running.store(false, Ordering::SeqCst);
        match self.thread_handle.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| Error::ThreadExit("sampling thread panicked".to_string())),
            None => Err(Error::ThreadExit("sampling thread already joined".to_string())),
        }
    }

    fn check_finished(&self) -> Option<Result<Option<SampleResult>>> {
        if !self.is_running() && self.receiver.is_empty() {
            if self.overflow_flag.load(Ordering::SeqCst) {
                return Some(Err(Error::Overflow));
            }
            return Some(Ok(None));
        }
        None
    }

    fn unpack(&self, message: StreamMessage) -> Result<Option<SampleResult>> {
        match message {
            StreamMessage::Sample(sample) => Ok(Some(sample)),
            StreamMessage::ThreadExit(None) => Ok(None),
            StreamMessage::ThreadExit(Some(err)) => Err(Error::ThreadExit(err)),
        }
    }

    fn closed(&self) -> Result<Option<SampleResult>> {
        if self.overflow_flag.load(Ordering::SeqCst) {
            Err(Error::Overflow)
        } else {
            Ok(None)
        }
    }
}

impl<T, E, C> Drop for SampleStream<T, E, C>
where
    T: OutputPin,
    T::Error: Debug,
{
    fn drop(&mut self) {
        self.is_running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            // the array is released as it drops here
            handle.join().ok();
        }
    }
}

fn sampling_loop<T, E, C>(
    array: &mut SensorArray<T, E, C>,
    interval: Duration,
    is_running: &AtomicBool,
    overflow_flag: &AtomicBool,
    sender: &Sender<StreamMessage>,
) -> std::result::Result<(), String>
where
    T: OutputPin,
    T::Error: Debug,
    E: InputPin,
    E::Error: Debug,
    C: MonotonicClock,
{
    let mut next_cycle = Instant::now();

    while is_running.load(Ordering::Relaxed) {
        let sample = array.sample();

        match sender.try_send(StreamMessage::Sample(sample)) {
            Ok(_) => {}
            Err(TrySendError::Full(_)) => {
                overflow_flag.store(true, Ordering::SeqCst);
                return Err("Sample channel overflow".to_string());
            }
            Err(TrySendError::Disconnected(_)) => {
                // Receiver dropped - exit normally
                return Ok(());
            }
        }

        next_cycle += interval;
        let now = Instant::now();
        if next_cycle > now {
            thread::sleep(next_cycle - now);
        } else {
            // fell behind, restart the schedule from here
            next_cycle = now;
        }
    }

    Ok(())
}
