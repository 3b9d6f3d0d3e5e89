use crate::camera::CameraError;
use crate::config::ConfigError;
use crate::counter::CounterError;
use crate::session::SessionError;
use crate::sink::SinkError;
use crate::storage::MountError;
use thiserror::Error;

/// Anything that stops the controller before the capture loop starts.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Camera Init Failed: {0}")]
    Camera(#[from] CameraError),
    #[error("Failed to mount filesystem: {0}")]
    Mount(#[from] MountError),
    #[error("Session counter unavailable: {0}")]
    Counter(#[from] CounterError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("Failed to open first frame: {0}")]
    Sink(#[from] SinkError),
    #[error("Failed to start logger: {0}")]
    Logger(#[from] flexi_logger::FlexiLoggerError),
    #[error("Failed to spawn {name} thread: {source}")]
    Thread {
        name: &'static str,
        source: std::io::Error,
    },
    #[error("Capture thread ended without reporting")]
    CaptureLost,
}
