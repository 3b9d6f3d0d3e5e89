//! Time-lapse capture controller.
//!
//! Every boot becomes a new numbered session directory on the card, and every
//! frame a numbered JPEG inside it, written at a fixed cadence.

pub mod camera;
pub mod config;
pub mod counter;
pub mod error;
pub mod scheduler;
pub mod session;
pub mod sink;
pub mod storage;

#[cfg(test)]
mod mock;

pub use camera::{Camera, CameraError, Frame, FrameGuard, RaspistillCamera};
pub use config::Config;
pub use counter::{JsonFileStore, KeyValueStore, SessionCounterStore};
pub use error::StartupError;
pub use scheduler::{CaptureScheduler, Clock, HaltReason, LoopState, MonotonicClock};
pub use session::{Session, SessionDirectoryManager, SessionId};
pub use sink::{FrameSink, SavedFrame, SinkError};
pub use storage::{LocalVolume, MountConfig, Volume, VolumeInfo};
