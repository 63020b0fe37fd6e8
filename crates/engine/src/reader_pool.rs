//! Bounded reader pool (C5, §4.5).
//!
//! Readers need their own file handle because reads are stateful (a
//! handle's seek position must not be interleaved between callers). The
//! pool hands out handles from a bounded set, opening new ones lazily up
//! to `max` and blocking past that until one is returned. `acquire`
//! returns a scoped [`ReaderHandle`] that puts its file back on `Drop`.

use entity_core::error::{EntityError, Result};
use parking_lot::{Condvar, Mutex};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

struct Inner {
    idle: Vec<File>,
    outstanding: usize,
}

/// Bounded pool of independent file handles onto the data file.
pub struct ReaderPool {
    path: PathBuf,
    min: usize,
    max: usize,
    acquire_timeout: Duration,
    inner: Mutex<Inner>,
    available: Condvar,
}

impl ReaderPool {
    /// Open `min` handles eagerly against `path` and allow growth up to
    /// `max`.
    pub fn open(path: impl Into<PathBuf>, min: usize, max: usize, acquire_timeout: Duration) -> Result<Self> {
        let path = path.into();
        let mut idle = Vec::with_capacity(min);
        for _ in 0..min {
            idle.push(File::open(&path)?);
        }
        Ok(ReaderPool {
            path,
            min,
            max,
            acquire_timeout,
            inner: Mutex::new(Inner { idle, outstanding: 0 }),
            available: Condvar::new(),
        })
    }

    /// Block until a handle is available, opening a fresh one if the
    /// pool hasn't reached `max` yet. Fails with `Timeout` past the
    /// configured acquisition timeout.
    pub fn acquire(&self) -> Result<ReaderHandle<'_>> {
        let deadline = Instant::now() + self.acquire_timeout;
        let mut inner = self.inner.lock();
        loop {
            if let Some(file) = inner.idle.pop() {
                inner.outstanding += 1;
                return Ok(ReaderHandle { pool: self, file: Some(file) });
            }
            if inner.outstanding < self.max {
                inner.outstanding += 1;
                let file = File::open(&self.path)?;
                return Ok(ReaderHandle { pool: self, file: Some(file) });
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(EntityError::Timeout(self.acquire_timeout));
            }
            let timed_out = self.available.wait_for(&mut inner, deadline - now).timed_out();
            if timed_out {
                return Err(EntityError::Timeout(self.acquire_timeout));
            }
        }
    }

    /// The file backing this pool.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Handles outstanding to callers right now.
    pub fn outstanding(&self) -> usize {
        self.inner.lock().outstanding
    }

    /// Configured floor; informational (the pool never pre-closes down
    /// to it, it only never opens fewer than this many up front).
    pub fn min(&self) -> usize {
        self.min
    }

    /// Configured ceiling on concurrently outstanding handles.
    pub fn max(&self) -> usize {
        self.max
    }

    fn release(&self, file: File) {
        let mut inner = self.inner.lock();
        inner.outstanding -= 1;
        inner.idle.push(file);
        self.available.notify_one();
    }
}

/// A reader-pool handle scoped to the caller; returns its `File` to the
/// pool on `Drop`. Exposes `&mut File` only, so a caller cannot retain a
/// reference past the borrow and interleave seeks with another holder.
pub struct ReaderHandle<'a> {
    pool: &'a ReaderPool,
    file: Option<File>,
}

impl ReaderHandle<'_> {
    /// The underlying file handle, positioned wherever the last user of
    /// this slot left it; callers must seek before reading.
    pub fn file(&mut self) -> &mut File {
        self.file.as_mut().expect("file taken before drop")
    }
}

impl Drop for ReaderHandle<'_> {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            self.pool.release(file);
        }
    }
}
