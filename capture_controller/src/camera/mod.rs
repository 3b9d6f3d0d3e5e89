//! Camera collaborator: frame acquisition and buffer-pool bookkeeping.
//!
//! A [`Frame`] belongs to the camera until [`acquire`] hands it out wrapped in a
//! [`FrameGuard`]. The guard gives it back to the camera exactly once, either
//! through [`FrameGuard::release`] or when the guard goes out of scope.

use std::io;
use std::ops::Deref;
use std::sync::Arc;
use thiserror::Error;

mod raspistill;

pub use raspistill::{CameraSettings, RaspistillCamera};

/// Captured image bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Frame {
    buf: Vec<u8>,
}

impl Frame {
    pub fn new(buf: Vec<u8>) -> Self {
        Self { buf }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

#[derive(Debug, Clone, Error)]
pub enum CameraError {
    #[error("failed to start camera process: {0}")]
    Start(#[source] Arc<io::Error>),
    #[error("failed to trigger capture: {0}")]
    Trigger(String),
    #[error("failed to read captured frame: {0}")]
    Read(#[source] Arc<io::Error>),
    #[error("camera produced an empty frame")]
    EmptyFrame,
    #[error("all {0} frame buffers are in use")]
    PoolExhausted(usize),
}

/// Source of frames.
///
/// `acquire_frame` may block for as long as the sensor needs. Every frame it
/// returns must come back through `release_frame`; use [`acquire`] rather than
/// calling these directly.
pub trait Camera {
    fn acquire_frame(&mut self) -> Result<Frame, CameraError>;

    fn release_frame(&mut self, frame: Frame);
}

/// Scoped ownership of one acquired frame.
pub struct FrameGuard<'c, C: Camera + ?Sized> {
    camera: &'c mut C,
    frame: Frame,
}

/// Acquire a frame whose release is tied to the returned guard.
pub fn acquire<C: Camera + ?Sized>(camera: &mut C) -> Result<FrameGuard<'_, C>, CameraError> {
    let frame = camera.acquire_frame()?;
    Ok(FrameGuard { camera, frame })
}

impl<C: Camera + ?Sized> FrameGuard<'_, C> {
    /// Hand the frame back to the camera now.
    pub fn release(self) {
        drop(self);
    }
}

impl<C: Camera + ?Sized> Deref for FrameGuard<'_, C> {
    type Target = Frame;

    fn deref(&self) -> &Frame {
        &self.frame
    }
}

impl<C: Camera + ?Sized> Drop for FrameGuard<'_, C> {
    fn drop(&mut self) {
        let frame = std::mem::take(&mut self.frame);
        self.camera.release_frame(frame);
    }
}
