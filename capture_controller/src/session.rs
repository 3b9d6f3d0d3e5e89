//! Session identity and the per-session directory.
//!
//! Each boot gets a SessionId strictly greater than any id used on the same
//! card before, and a matching directory (`000004/`) that holds its frames.
//! A blank card resets the counter to 0 so a fresh card does not inherit a
//! large id from the previous one.
//!
//! The incremented id is persisted before the first frame is written. A crash
//! between the two leaves an empty directory behind and skips one id, which is
//! preferred over ever reusing a directory.

use crate::counter::{CounterError, KeyValueStore, SessionCounterStore};
use crate::storage::Volume;
use log::info;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId(i64);

impl SessionId {
    pub fn new(value: i64) -> Option<Self> {
        (value >= 0).then_some(Self(value))
    }

    pub fn value(self) -> i64 {
        self.0
    }

    /// Directory name for this session: six digits, zero padded.
    pub fn namespace(self) -> PathBuf {
        PathBuf::from(format!("{:06}", self.0))
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub id: SessionId,
    /// Directory relative to the volume root.
    pub namespace: PathBuf,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to list volume root: {0}")]
    Listing(#[source] io::Error),
    #[error(transparent)]
    Counter(#[from] CounterError),
    #[error("persisted session counter {0} cannot produce a new session id")]
    InvalidCounter(i64),
    #[error("failed to create session directory {path}: {source}")]
    Namespace { path: PathBuf, source: io::Error },
}

/// Resolves the session for this boot, once.
#[derive(Debug)]
pub struct SessionDirectoryManager<S> {
    counter: SessionCounterStore<S>,
    resolved: Option<Session>,
}

impl<S: KeyValueStore> SessionDirectoryManager<S> {
    pub fn new(counter: SessionCounterStore<S>) -> Self {
        Self {
            counter,
            resolved: None,
        }
    }

    /// Pick this boot's SessionId, persist it and create its directory.
    ///
    /// Only the existence of top-level entries is checked. Anything at all on
    /// the card, even an unrelated file, counts as a previous session. Later
    /// calls return the session resolved by the first successful call.
    pub fn resolve_session<V: Volume>(&mut self, volume: &V) -> Result<Session, SessionError> {
        if let Some(session) = &self.resolved {
            return Ok(session.clone());
        }

        let entries = volume
            .list_entries(Path::new(""))
            .map_err(SessionError::Listing)?;
        let id = if entries.is_empty() {
            info!("Volume is empty, resetting session counter");
            SessionId(0)
        } else {
            let last = self.counter.load()?;
            last.checked_add(1)
                .and_then(SessionId::new)
                .ok_or(SessionError::InvalidCounter(last))?
        };
        self.counter.store(id.value())?;

        let namespace = id.namespace();
        volume
            .mkdir(&namespace)
            .map_err(|source| SessionError::Namespace {
                path: namespace.clone(),
                source,
            })?;
        info!(
            "Session {} started in {} ({} existing entries)",
            id,
            namespace.display(),
            entries.len()
        );

        let session = Session { id, namespace };
        self.resolved = Some(session.clone());
        Ok(session)
    }

    pub fn into_counter(self) -> SessionCounterStore<S> {
        self.counter
    }
}
