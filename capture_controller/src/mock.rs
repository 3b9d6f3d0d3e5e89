//! In-memory collaborators for unit tests.

use crate::camera::{Camera, CameraError, Frame};
use crate::counter::{CounterError, KeyValueStore};
use crate::scheduler::Clock;
use crate::storage::{Entry, FileHandle, Volume};
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::Duration;

/// Clock that only moves when told to, or when something sleeps on it.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Rc<Cell<Duration>>,
    sleeps: Rc<RefCell<Vec<Duration>>>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self {
            now: Rc::new(Cell::new(Duration::from_secs(10))),
            sleeps: Rc::default(),
        }
    }
}

impl ManualClock {
    /// Move by `millis`, backwards when negative.
    pub fn shift(&self, millis: i64) {
        let delta = Duration::from_millis(millis.unsigned_abs());
        let now = self.now.get();
        self.now.set(if millis >= 0 {
            now + delta
        } else {
            now.saturating_sub(delta)
        });
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.borrow().clone()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        self.now.get()
    }

    fn sleep(&self, duration: Duration) {
        self.sleeps.borrow_mut().push(duration);
        self.now.set(self.now.get() + duration);
    }
}

/// Camera that hands out canned frames in a cycle.
#[derive(Debug, Default)]
pub struct MockCamera {
    frames: Vec<Vec<u8>>,
    fail_after: Option<usize>,
    clock: Option<(ManualClock, i64)>,
    attempts: usize,
    acquired: usize,
    released: usize,
}

impl MockCamera {
    pub fn new(frames: Vec<Vec<u8>>) -> Self {
        Self {
            frames,
            ..Self::default()
        }
    }

    /// Fail every acquisition after the first `count` succeeded.
    pub fn failing_after(mut self, count: usize) -> Self {
        self.fail_after = Some(count);
        self
    }

    /// Each acquisition moves `clock` by `millis`.
    pub fn with_clock(mut self, clock: &ManualClock, millis: i64) -> Self {
        self.clock = Some((clock.clone(), millis));
        self
    }

    pub fn attempts(&self) -> usize {
        self.attempts
    }

    pub fn released(&self) -> usize {
        self.released
    }

    pub fn outstanding(&self) -> usize {
        self.acquired - self.released
    }
}

impl Camera for MockCamera {
    fn acquire_frame(&mut self) -> Result<Frame, CameraError> {
        self.attempts += 1;
        if self.frames.is_empty() || self.fail_after.is_some_and(|n| self.acquired >= n) {
            return Err(CameraError::Trigger("mock camera failure".to_string()));
        }
        if let Some((clock, millis)) = &self.clock {
            clock.shift(*millis);
        }
        let frame = Frame::new(self.frames[self.acquired % self.frames.len()].clone());
        self.acquired += 1;
        Ok(frame)
    }

    fn release_frame(&mut self, _frame: Frame) {
        self.released += 1;
    }
}

#[derive(Debug, Default)]
struct MemoryFs {
    dirs: BTreeSet<PathBuf>,
    files: BTreeMap<PathBuf, Vec<u8>>,
    opens: usize,
    writes: usize,
    open_handles: usize,
    fail_open: Option<usize>,
    fail_write: Option<usize>,
    short_writes: bool,
    fail_close: bool,
    read_only: bool,
}

/// Volume kept in memory. Clones share the same contents.
#[derive(Debug, Clone, Default)]
pub struct MemoryVolume {
    fs: Rc<RefCell<MemoryFs>>,
}

impl MemoryVolume {
    /// Fail the open with this zero-based index.
    pub fn failing_open(self, index: usize) -> Self {
        self.fs.borrow_mut().fail_open = Some(index);
        self
    }

    /// Fail the write with this zero-based index, as a full disk would.
    pub fn failing_write(self, index: usize) -> Self {
        self.fs.borrow_mut().fail_write = Some(index);
        self
    }

    /// Accept only half of every write.
    pub fn short_writes(self) -> Self {
        self.fs.borrow_mut().short_writes = true;
        self
    }

    pub fn failing_close(self) -> Self {
        self.fs.borrow_mut().fail_close = true;
        self
    }

    pub fn read_only(self) -> Self {
        self.fs.borrow_mut().read_only = true;
        self
    }

    pub fn add_dir(&self, path: &str) {
        self.fs.borrow_mut().dirs.insert(PathBuf::from(path));
    }

    pub fn add_file(&self, path: &str, bytes: &[u8]) {
        self.fs
            .borrow_mut()
            .files
            .insert(PathBuf::from(path), bytes.to_vec());
    }

    pub fn has_dir(&self, path: &str) -> bool {
        self.fs.borrow().dirs.contains(Path::new(path))
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.fs.borrow().files.get(Path::new(path)).cloned()
    }

    pub fn file_names(&self, dir: &str) -> Vec<String> {
        self.fs
            .borrow()
            .files
            .keys()
            .filter(|path| path.parent() == Some(Path::new(dir)))
            .filter_map(|path| path.file_name())
            .map(|name| name.to_string_lossy().to_string())
            .collect()
    }

    pub fn open_handles(&self) -> usize {
        self.fs.borrow().open_handles
    }
}

fn read_only_error() -> io::Error {
    io::Error::new(io::ErrorKind::PermissionDenied, "read-only file system")
}

impl Volume for MemoryVolume {
    type Handle = MemoryHandle;

    fn list_entries(&self, path: &Path) -> io::Result<Vec<Entry>> {
        let fs = self.fs.borrow();
        let dirs = fs.dirs.iter().map(|dir| (dir, true));
        let files = fs.files.keys().map(|file| (file, false));
        let mut entries: Vec<Entry> = dirs
            .chain(files)
            .filter(|(entry, _)| entry.parent() == Some(path))
            .map(|(entry, is_dir)| Entry {
                name: entry
                    .file_name()
                    .map(|name| name.to_string_lossy().to_string())
                    .unwrap_or_default(),
                is_dir,
            })
            .collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    fn mkdir(&self, path: &Path) -> io::Result<()> {
        let mut fs = self.fs.borrow_mut();
        if fs.read_only {
            return Err(read_only_error());
        }
        if !fs.dirs.insert(path.to_path_buf()) {
            return Err(io::Error::new(io::ErrorKind::AlreadyExists, "directory exists"));
        }
        Ok(())
    }

    fn open_write(&self, path: &Path) -> io::Result<MemoryHandle> {
        let mut fs = self.fs.borrow_mut();
        if fs.read_only {
            return Err(read_only_error());
        }
        let index = fs.opens;
        fs.opens += 1;
        if fs.fail_open == Some(index) {
            return Err(io::Error::new(io::ErrorKind::Other, "too many open files"));
        }
        if fs.files.contains_key(path) {
            return Err(io::Error::new(io::ErrorKind::AlreadyExists, "file exists"));
        }
        fs.files.insert(path.to_path_buf(), Vec::new());
        fs.open_handles += 1;
        Ok(MemoryHandle {
            fs: Rc::clone(&self.fs),
            path: path.to_path_buf(),
        })
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        match self.fs.borrow_mut().files.remove(path) {
            Some(_) => Ok(()),
            None => Err(io::Error::new(io::ErrorKind::NotFound, "no such file")),
        }
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        let mut fs = self.fs.borrow_mut();
        if fs.read_only {
            return Err(read_only_error());
        }
        if fs.files.contains_key(to) || fs.dirs.contains(to) {
            return Err(io::Error::new(io::ErrorKind::AlreadyExists, "file exists"));
        }
        let bytes = fs
            .files
            .remove(from)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no such file"))?;
        fs.files.insert(to.to_path_buf(), bytes);
        Ok(())
    }
}

#[derive(Debug)]
pub struct MemoryHandle {
    fs: Rc<RefCell<MemoryFs>>,
    path: PathBuf,
}

impl FileHandle for MemoryHandle {
    fn write(&mut self, bytes: &[u8]) -> io::Result<usize> {
        let mut fs = self.fs.borrow_mut();
        let index = fs.writes;
        fs.writes += 1;
        if fs.fail_write == Some(index) {
            return Err(io::Error::new(io::ErrorKind::Other, "no space left on device"));
        }
        let accepted = if fs.short_writes {
            bytes.len() / 2
        } else {
            bytes.len()
        };
        fs.files
            .entry(self.path.clone())
            .or_default()
            .extend_from_slice(&bytes[..accepted]);
        Ok(accepted)
    }

    fn close(self) -> io::Result<()> {
        if self.fs.borrow().fail_close {
            return Err(io::Error::new(io::ErrorKind::Other, "close failed"));
        }
        Ok(())
    }
}

impl Drop for MemoryHandle {
    fn drop(&mut self) {
        self.fs.borrow_mut().open_handles -= 1;
    }
}

/// Key-value store held in a map.
#[derive(Debug, Default)]
pub struct MemoryStore {
    counters: HashMap<String, i64>,
    fail_writes: bool,
}

impl MemoryStore {
    pub fn failing_writes(mut self) -> Self {
        self.fail_writes = true;
        self
    }
}

impl KeyValueStore for MemoryStore {
    fn get_counter(&self, key: &str) -> Result<Option<i64>, CounterError> {
        Ok(self.counters.get(key).copied())
    }

    fn set_counter(&mut self, key: &str, value: i64) -> Result<(), CounterError> {
        if self.fail_writes {
            return Err(CounterError::Write {
                path: PathBuf::from("memory"),
                source: io::Error::new(io::ErrorKind::Other, "flash write failed"),
            });
        }
        self.counters.insert(key.to_string(), value);
        Ok(())
    }
}
