use super::{Camera, CameraError, Frame};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraSettings {
    pub width: u32,
    pub height: u32,
    /// JPEG quality passed to raspistill, 0 to 100.
    pub quality: u8,
    /// Number of frames that may be out at once.
    pub fb_count: usize,
    pub warmup_ms: u64,
    /// Time raspistill needs to write a frame after being signalled.
    pub settle_ms: u64,
    pub output: PathBuf,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            quality: 90,
            fb_count: 2,
            warmup_ms: 2000,
            settle_ms: 500,
            output: PathBuf::from("/mnt/ram/image_latest.jpg"),
        }
    }
}

/// Camera backed by a `raspistill` process running in signal mode.
///
/// Each `SIGUSR1` makes raspistill overwrite `output` with a fresh JPEG.
#[derive(Debug)]
pub struct RaspistillCamera {
    process: Child,
    output: PathBuf,
    settle: Duration,
    pool_size: usize,
    outstanding: usize,
}

impl RaspistillCamera {
    pub fn start(settings: &CameraSettings) -> Result<Self, CameraError> {
        Self::kill_previous_raspistill_process();
        let process = Command::new("raspistill")
            .arg("-q")
            .arg(settings.quality.to_string())
            .arg("-w")
            .arg(settings.width.to_string())
            .arg("-h")
            .arg(settings.height.to_string())
            .arg("-s") // signal mode
            .arg("-n") // no preview window
            .arg("-t") // keep running until killed
            .arg("0")
            .arg("-o")
            .arg(&settings.output)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|err| CameraError::Start(Arc::new(err)))?;
        info!(
            "Started raspistill (pid {}) at {}x{}",
            process.id(),
            settings.width,
            settings.height
        );
        // wait camera process startup
        std::thread::sleep(Duration::from_millis(settings.warmup_ms));
        Ok(Self {
            process,
            output: settings.output.clone(),
            settle: Duration::from_millis(settings.settle_ms),
            pool_size: settings.fb_count,
            outstanding: 0,
        })
    }

    fn kill_previous_raspistill_process() {
        match Command::new("killall").arg("raspistill").output() {
            Ok(output) if output.status.success() => info!("Killed previous raspistill process"),
            Ok(_) => debug!("No previous raspistill process running"),
            Err(err) => warn!("Could not run killall: {}", err),
        }
    }

    fn trigger(&self) -> Result<(), CameraError> {
        let status = Command::new("kill")
            .arg("-USR1")
            .arg(self.process.id().to_string())
            .status()
            .map_err(|err| CameraError::Trigger(err.to_string()))?;
        if !status.success() {
            return Err(CameraError::Trigger(format!(
                "kill -USR1 exited with {}",
                status
            )));
        }
        Ok(())
    }
}

impl Camera for RaspistillCamera {
    fn acquire_frame(&mut self) -> Result<Frame, CameraError> {
        if self.outstanding >= self.pool_size {
            return Err(CameraError::PoolExhausted(self.pool_size));
        }
        // A stale image must never be mistaken for the new one.
        match fs::remove_file(&self.output) {
            Err(err) if err.kind() != io::ErrorKind::NotFound => {
                return Err(CameraError::Read(Arc::new(err)));
            }
            _ => {}
        }
        self.trigger()?;
        std::thread::sleep(self.settle);
        let buf = fs::read(&self.output).map_err(|err| CameraError::Read(Arc::new(err)))?;
        if buf.is_empty() {
            return Err(CameraError::EmptyFrame);
        }
        self.outstanding += 1;
        Ok(Frame::new(buf))
    }

    fn release_frame(&mut self, frame: Frame) {
        drop(frame);
        self.outstanding = self.outstanding.saturating_sub(1);
    }
}

impl Drop for RaspistillCamera {
    fn drop(&mut self) {
        if let Err(err) = self.process.kill() {
            warn!("Could not kill raspistill: {}", err);
        }
        let _ = self.process.wait();
    }
}
