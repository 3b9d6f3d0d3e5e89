//! The capture loop.
//!
//! One iteration acquires a frame, writes it, releases it, finishes the file
//! and then sleeps off whatever is left of the cadence. Iterations never
//! overlap. The loop only stops by entering [`LoopState::Halted`], which
//! happens on the first open, write, camera or clock failure.

use crate::camera::{self, Camera, CameraError};
use crate::sink::{FrameSink, SinkError};
use crate::storage::Volume;
use log::{debug, error, info};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Monotonic time source.
pub trait Clock {
    /// Time since an arbitrary fixed origin.
    fn now(&self) -> Duration;

    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

#[derive(Debug, Clone, Error)]
pub enum HaltReason {
    #[error("camera failed: {0}")]
    Camera(#[source] CameraError),
    #[error("could not open frame file: {0}")]
    Open(#[source] SinkError),
    #[error("could not write frame: {0}")]
    Write(#[source] SinkError),
    #[error("clock went backwards from {start:?} to {stop:?}")]
    ClockWentBackwards { start: Duration, stop: Duration },
}

#[derive(Debug, Clone)]
pub enum LoopState {
    AcquireWait,
    Writing,
    SleepForCadence(Duration),
    Halted(HaltReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IterationReport {
    pub sequence: u64,
    pub bytes: usize,
    /// Time spent acquiring and writing.
    pub elapsed: Duration,
    /// Time slept afterwards to hold the cadence.
    pub slept: Duration,
}

pub struct CaptureScheduler<C, V: Volume, K> {
    camera: C,
    sink: FrameSink<V>,
    clock: K,
    cadence: Duration,
    state: LoopState,
}

impl<C: Camera, V: Volume, K: Clock> CaptureScheduler<C, V, K> {
    pub fn new(camera: C, sink: FrameSink<V>, clock: K, cadence: Duration) -> Self {
        Self {
            camera,
            sink,
            clock,
            cadence,
            state: LoopState::AcquireWait,
        }
    }

    pub fn state(&self) -> &LoopState {
        &self.state
    }

    pub fn is_halted(&self) -> bool {
        matches!(self.state, LoopState::Halted(_))
    }

    pub fn camera(&self) -> &C {
        &self.camera
    }

    pub fn sink(&self) -> &FrameSink<V> {
        &self.sink
    }

    /// Capture until something fatal happens.
    pub fn run(&mut self) -> HaltReason {
        loop {
            if let Err(reason) = self.step() {
                return reason;
            }
        }
    }

    /// Run a single iteration. Once halted, keeps returning the halt reason.
    pub fn step(&mut self) -> Result<IterationReport, HaltReason> {
        if let LoopState::Halted(reason) = &self.state {
            return Err(reason.clone());
        }
        self.iterate().map_err(|reason| {
            error!("Capture halted: {}", reason);
            self.sink.abandon();
            self.state = LoopState::Halted(reason.clone());
            reason
        })
    }

    fn iterate(&mut self) -> Result<IterationReport, HaltReason> {
        self.state = LoopState::AcquireWait;
        let start = self.clock.now();
        self.sink.begin_next().map_err(HaltReason::Open)?;

        info!("Taking picture...");
        let frame = camera::acquire(&mut self.camera).map_err(HaltReason::Camera)?;
        debug!("Picture taken! Its size was: {} bytes", frame.len());

        self.state = LoopState::Writing;
        info!(
            "Saving picture to file: {}",
            self.sink.frame_path(self.sink.sequence()).display()
        );
        let written = self.sink.write_frame(frame.as_bytes());
        frame.release();
        written.map_err(HaltReason::Write)?;
        let saved = self.sink.finish().map_err(|err| match err {
            SinkError::Open { .. } => HaltReason::Open(err),
            other => HaltReason::Write(other),
        })?;
        info!("Picture saved");

        let stop = self.clock.now();
        let elapsed = stop
            .checked_sub(start)
            .ok_or(HaltReason::ClockWentBackwards { start, stop })?;
        let slept = self.cadence.saturating_sub(elapsed);
        if !slept.is_zero() {
            self.state = LoopState::SleepForCadence(slept);
            self.clock.sleep(slept);
        }
        Ok(IterationReport {
            sequence: saved.sequence,
            bytes: saved.bytes,
            elapsed,
            slept,
        })
    }

    pub fn into_parts(self) -> (C, FrameSink<V>) {
        (self.camera, self.sink)
    }
}
