//! Writes frames into the session directory as `000000.JPG`, `000001.JPG`, ...
//!
//! The sink is either idle or holds exactly one open file, the one for the
//! current sequence number. After a frame is closed the next file is opened
//! right away so the following iteration only has to write.
//!
//! The open file is staged as `NNNNNN.JPG.part` and only renamed to its frame
//! name once closed, so readers of the volume never see a frame in progress.

use crate::storage::{FileHandle, Volume};
use log::{info, warn};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum SinkError {
    #[error("failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: Arc<io::Error>,
    },
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: Arc<io::Error>,
    },
    #[error("short write to {path}: {written} of {expected} bytes")]
    ShortWrite {
        path: PathBuf,
        written: usize,
        expected: usize,
    },
    #[error("no file is open")]
    NotWriting,
    #[error("{0} already holds a frame")]
    FrameAlreadyWritten(PathBuf),
    #[error("{0} has no frame to finish")]
    NothingWritten(PathBuf),
    #[error("failed to publish {path}: {source}")]
    Publish {
        path: PathBuf,
        #[source]
        source: Arc<io::Error>,
    },
}

/// A frame that made it to the volume.
#[derive(Debug)]
pub struct SavedFrame {
    pub sequence: u64,
    pub path: PathBuf,
    pub bytes: usize,
    /// Set when closing failed after the bytes were written.
    pub close_error: Option<io::Error>,
}

struct OpenFrame<H> {
    handle: H,
    path: PathBuf,
    staging: PathBuf,
    written: Option<usize>,
}

enum SinkState<H> {
    Idle,
    Writing(OpenFrame<H>),
}

pub struct FrameSink<V: Volume> {
    volume: V,
    namespace: PathBuf,
    sequence: u64,
    state: SinkState<V::Handle>,
}

impl<V: Volume> FrameSink<V> {
    /// Idle sink positioned at frame 0 of `namespace`.
    pub fn new(volume: V, namespace: impl Into<PathBuf>) -> Self {
        Self {
            volume,
            namespace: namespace.into(),
            sequence: 0,
            state: SinkState::Idle,
        }
    }

    /// Sink with frame 0 already open.
    pub fn open(volume: V, namespace: impl Into<PathBuf>) -> Result<Self, SinkError> {
        let mut sink = Self::new(volume, namespace);
        sink.begin_next()?;
        Ok(sink)
    }

    /// Number of frames completed so far, which is also the next file's number.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn is_writing(&self) -> bool {
        matches!(self.state, SinkState::Writing(_))
    }

    pub fn frame_path(&self, sequence: u64) -> PathBuf {
        self.namespace.join(format!("{:06}.JPG", sequence))
    }

    /// Open the file for the current sequence number. A no-op if it is open.
    pub fn begin_next(&mut self) -> Result<(), SinkError> {
        if self.is_writing() {
            return Ok(());
        }
        let path = self.frame_path(self.sequence);
        let staging = staging_path(&path);
        let handle = self
            .volume
            .open_write(&staging)
            .map_err(|source| SinkError::Open {
                path: staging.clone(),
                source: Arc::new(source),
            })?;
        self.state = SinkState::Writing(OpenFrame {
            handle,
            path,
            staging,
            written: None,
        });
        Ok(())
    }

    /// Write a whole frame to the open file.
    ///
    /// On failure the file is closed and deleted, so no partial frame is ever
    /// left on the volume, and the sink goes back to idle.
    pub fn write_frame(&mut self, buffer: &[u8]) -> Result<(), SinkError> {
        let open = match &mut self.state {
            SinkState::Idle => return Err(SinkError::NotWriting),
            SinkState::Writing(open) => open,
        };
        if open.written.is_some() {
            return Err(SinkError::FrameAlreadyWritten(open.path.clone()));
        }
        let result = match open.handle.write(buffer) {
            Ok(written) if written == buffer.len() => {
                open.written = Some(written);
                return Ok(());
            }
            Ok(written) => SinkError::ShortWrite {
                path: open.path.clone(),
                written,
                expected: buffer.len(),
            },
            Err(source) => SinkError::Write {
                path: open.path.clone(),
                source: Arc::new(source),
            },
        };
        self.discard();
        Err(result)
    }

    /// Close the written frame, publish it under its frame name, advance the
    /// sequence and open the next file.
    ///
    /// A failed close is logged and reported in the returned [`SavedFrame`];
    /// the frame still counts. If the frame name is already taken the staged
    /// file is deleted and the sequence stays put. Failing to open the next
    /// file is an error.
    pub fn finish(&mut self) -> Result<SavedFrame, SinkError> {
        let open = match std::mem::replace(&mut self.state, SinkState::Idle) {
            SinkState::Idle => return Err(SinkError::NotWriting),
            SinkState::Writing(open) => open,
        };
        let written = open.written;
        let bytes = match written {
            Some(bytes) => bytes,
            None => {
                let path = open.path.clone();
                self.state = SinkState::Writing(open);
                return Err(SinkError::NothingWritten(path));
            }
        };
        let close_error = open.handle.close().err();
        if let Some(err) = &close_error {
            warn!("Closing {} failed: {}", open.staging.display(), err);
        }
        if let Err(source) = self.volume.rename(&open.staging, &open.path) {
            self.remove_staged(&open.staging);
            return Err(SinkError::Publish {
                path: open.path,
                source: Arc::new(source),
            });
        }
        let saved = SavedFrame {
            sequence: self.sequence,
            path: open.path,
            bytes,
            close_error,
        };
        self.sequence += 1;
        self.begin_next()?;
        Ok(saved)
    }

    /// Close and delete the open file, if any, without advancing.
    pub fn abandon(&mut self) {
        if self.is_writing() {
            self.discard();
        }
    }

    fn discard(&mut self) {
        if let SinkState::Writing(open) = std::mem::replace(&mut self.state, SinkState::Idle) {
            let _ = open.handle.close();
            self.remove_staged(&open.staging);
        }
    }

    fn remove_staged(&self, staging: &Path) {
        match self.volume.remove(staging) {
            Ok(()) => info!("Removed unfinished {}", staging.display()),
            Err(err) => warn!("Could not remove {}: {}", staging.display(), err),
        }
    }

    pub fn into_volume(mut self) -> V {
        self.abandon();
        self.volume
    }
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}
