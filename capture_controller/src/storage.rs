//! Filesystem collaborator.
//!
//! All paths handed to a [`Volume`] are relative to its mount root.

use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub name: String,
    pub is_dir: bool,
}

pub trait FileHandle {
    /// Write `bytes`, returning how many were accepted.
    fn write(&mut self, bytes: &[u8]) -> io::Result<usize>;

    /// Flush and close. The handle is gone even if this fails.
    fn close(self) -> io::Result<()>;
}

pub trait Volume {
    type Handle: FileHandle;

    fn list_entries(&self, path: &Path) -> io::Result<Vec<Entry>>;

    fn mkdir(&self, path: &Path) -> io::Result<()>;

    /// Create `path` for writing. Fails if it already exists.
    fn open_write(&self, path: &Path) -> io::Result<Self::Handle>;

    fn remove(&self, path: &Path) -> io::Result<()>;

    /// Move `from` to `to`. Fails if `to` already exists.
    fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MountConfig {
    pub mount_point: PathBuf,
    /// Create the mount point when it is missing instead of failing.
    pub format_if_mount_failed: bool,
    /// Maximum number of simultaneously open files.
    pub max_files: usize,
}

impl Default for MountConfig {
    fn default() -> Self {
        Self {
            mount_point: PathBuf::from("/sdcard"),
            format_if_mount_failed: false,
            max_files: 5,
        }
    }
}

#[derive(Debug, Error)]
pub enum MountError {
    #[error("mount point {path} is unavailable: {source}")]
    Unavailable { path: PathBuf, source: io::Error },
    #[error("mount point {0} is not a directory")]
    NotADirectory(PathBuf),
    #[error("failed to prepare mount point {path}: {source}")]
    Prepare { path: PathBuf, source: io::Error },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolumeInfo {
    pub entries: usize,
    pub directories: usize,
}

/// A directory tree on the host filesystem, usually an SD card mount.
#[derive(Debug)]
pub struct LocalVolume {
    root: PathBuf,
    max_files: usize,
    open_files: Arc<AtomicUsize>,
}

impl LocalVolume {
    pub fn mount(config: &MountConfig) -> Result<Self, MountError> {
        let root = config.mount_point.clone();
        match fs::metadata(&root) {
            Ok(metadata) if metadata.is_dir() => {}
            Ok(_) => return Err(MountError::NotADirectory(root)),
            Err(err) if err.kind() == io::ErrorKind::NotFound && config.format_if_mount_failed => {
                warn!("Mount point {} missing, creating it", root.display());
                fs::create_dir_all(&root).map_err(|source| MountError::Prepare {
                    path: root.clone(),
                    source,
                })?;
            }
            Err(source) => return Err(MountError::Unavailable { path: root, source }),
        }
        let volume = Self {
            root,
            max_files: config.max_files,
            open_files: Arc::new(AtomicUsize::new(0)),
        };
        match volume.info() {
            Ok(info) => info!(
                "Mounted {}: {} entries, {} directories, max {} open files",
                volume.root.display(),
                info.entries,
                info.directories,
                volume.max_files
            ),
            Err(err) => warn!("Mounted {} but could not list it: {}", volume.root.display(), err),
        }
        Ok(volume)
    }

    /// Counts of what sits at the top of the card.
    pub fn info(&self) -> io::Result<VolumeInfo> {
        let entries = self.list_entries(Path::new(""))?;
        Ok(VolumeInfo {
            entries: entries.len(),
            directories: entries.iter().filter(|entry| entry.is_dir).count(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn open_files(&self) -> usize {
        self.open_files.load(Ordering::SeqCst)
    }

    pub fn unmount(self) {
        let open = self.open_files();
        if open > 0 {
            warn!("Unmounting {} with {} open files", self.root.display(), open);
        }
        info!("Card unmounted");
    }
}

impl Volume for LocalVolume {
    type Handle = LocalFile;

    fn list_entries(&self, path: &Path) -> io::Result<Vec<Entry>> {
        let mut entries = Vec::new();
        for entry in fs::read_dir(self.root.join(path))? {
            let entry = entry?;
            entries.push(Entry {
                name: entry.file_name().to_string_lossy().to_string(),
                is_dir: entry.file_type()?.is_dir(),
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    fn mkdir(&self, path: &Path) -> io::Result<()> {
        fs::create_dir(self.root.join(path))
    }

    fn open_write(&self, path: &Path) -> io::Result<LocalFile> {
        if self.open_files.fetch_add(1, Ordering::SeqCst) >= self.max_files {
            self.open_files.fetch_sub(1, Ordering::SeqCst);
            return Err(io::Error::new(io::ErrorKind::Other, "too many open files"));
        }
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(self.root.join(path));
        match file {
            Ok(file) => Ok(LocalFile {
                file,
                open_files: Arc::clone(&self.open_files),
            }),
            Err(err) => {
                self.open_files.fetch_sub(1, Ordering::SeqCst);
                Err(err)
            }
        }
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(self.root.join(path))
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        let to = self.root.join(to);
        if fs::symlink_metadata(&to).is_ok() {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{} already exists", to.display()),
            ));
        }
        fs::rename(self.root.join(from), to)
    }
}

#[derive(Debug)]
pub struct LocalFile {
    file: File,
    open_files: Arc<AtomicUsize>,
}

impl FileHandle for LocalFile {
    fn write(&mut self, bytes: &[u8]) -> io::Result<usize> {
        self.file.write_all(bytes)?;
        Ok(bytes.len())
    }

    fn close(self) -> io::Result<()> {
        self.file.sync_all()
    }
}

impl Drop for LocalFile {
    fn drop(&mut self) {
        self.open_files.fetch_sub(1, Ordering::SeqCst);
    }
}
