//! Checkpoint / header sync (C14, §4.13).
//!
//! Owns the file header behind a RW lock plus an atomic WAL sequence
//! counter, and drives the three-layer checkpoint protocol: Snapshot,
//! Commit, Validate, Recover. The actual I/O (fsync data, rewrite tag
//! dictionary/entity index/header) is supplied by the caller as a
//! closure, since this crate doesn't own the data file's contents —
//! only the coordination state machine around it.

use entity_core::error::{EntityError, Result};
use entity_storage::FileHeader;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

/// Header lifecycle state (§4.13).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderState {
    /// No writes since the last successful checkpoint.
    Clean,
    /// At least one write has happened since the last checkpoint.
    Dirty,
    /// A checkpoint is in progress.
    Checkpointing,
    /// The last checkpoint attempt failed validation and recovery is
    /// underway.
    Corrupted,
}

/// Point-in-time state captured before a checkpoint begins, restored if
/// the checkpoint fails validation.
#[derive(Debug, Clone)]
pub struct HeaderSnapshot {
    /// The header as of snapshot time.
    pub header: FileHeader,
    /// The WAL sequence counter as of snapshot time.
    pub wal_sequence: u64,
    /// The live entity count as of snapshot time.
    pub entity_count: u64,
}

/// Coordinates header mutation and checkpointing.
pub struct CheckpointCoordinator {
    header: RwLock<FileHeader>,
    wal_sequence: AtomicU64,
    state: RwLock<HeaderState>,
}

impl CheckpointCoordinator {
    /// Construct a coordinator owning `header`, starting `Clean`.
    pub fn new(header: FileHeader) -> Self {
        CheckpointCoordinator {
            header: RwLock::new(header),
            wal_sequence: AtomicU64::new(0),
            state: RwLock::new(HeaderState::Clean),
        }
    }

    /// A copy of the current header.
    pub fn header(&self) -> FileHeader {
        *self.header.read()
    }

    /// The current WAL sequence counter.
    pub fn wal_sequence(&self) -> u64 {
        self.wal_sequence.load(Ordering::SeqCst)
    }

    /// Advance the WAL sequence counter and mark the header dirty.
    /// Called by the write path after every successful WAL append.
    pub fn advance_wal_sequence(&self) -> u64 {
        self.mark_dirty();
        self.wal_sequence.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Transition `Clean -> Dirty`. A no-op from any other state.
    pub fn mark_dirty(&self) {
        let mut state = self.state.write();
        if *state == HeaderState::Clean {
            *state = HeaderState::Dirty;
        }
    }

    /// The current lifecycle state.
    pub fn state(&self) -> HeaderState {
        *self.state.read()
    }

    /// Run a full checkpoint. `commit` performs the actual I/O (fsync
    /// data, write tag dictionary, write entity index, rewrite header)
    /// and returns the new header on success. `restore` re-persists a
    /// header on disk during recovery. Returns the committed header on
    /// success, or a `Corruption` error after a successful recovery.
    pub fn checkpoint(
        &self,
        entity_count: u64,
        commit: impl FnOnce(&HeaderSnapshot) -> Result<FileHeader>,
        restore: impl FnOnce(&FileHeader) -> Result<()>,
    ) -> Result<FileHeader> {
        let snapshot = HeaderSnapshot {
            header: self.header(),
            wal_sequence: self.wal_sequence(),
            entity_count,
        };
        *self.state.write() = HeaderState::Checkpointing;

        let commit_result = commit(&snapshot).and_then(|new_header| {
            new_header.validate_offsets()?;
            Ok(new_header)
        });

        match commit_result {
            Ok(new_header) => {
                *self.header.write() = new_header;
                self.wal_sequence.store(0, Ordering::SeqCst);
                *self.state.write() = HeaderState::Clean;
                Ok(new_header)
            }
            Err(err) => {
                *self.state.write() = HeaderState::Corrupted;
                restore(&snapshot.header)?;
                *self.header.write() = snapshot.header;
                self.wal_sequence.store(snapshot.wal_sequence, Ordering::SeqCst);
                *self.state.write() = HeaderState::Clean;
                Err(EntityError::corruption(format!(
                    "checkpoint failed validation, recovered from snapshot: {err}"
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_header() -> FileHeader {
        FileHeader::new_empty(0)
    }

    #[test]
    fn mark_dirty_transitions_once() {
        let coord = CheckpointCoordinator::new(base_header());
        assert_eq!(coord.state(), HeaderState::Clean);
        coord.mark_dirty();
        assert_eq!(coord.state(), HeaderState::Dirty);
    }

    #[test]
    fn successful_checkpoint_returns_to_clean_and_resets_sequence() {
        let coord = CheckpointCoordinator::new(base_header());
        coord.advance_wal_sequence();
        coord.advance_wal_sequence();

        let mut new_header = base_header();
        new_header.entity_count = 5;
        let result = coord.checkpoint(5, |_| Ok(new_header), |_| Ok(()));

        assert!(result.is_ok());
        assert_eq!(coord.state(), HeaderState::Clean);
        assert_eq!(coord.wal_sequence(), 0);
        assert_eq!(coord.header().entity_count, 5);
    }

    #[test]
    fn failed_validation_restores_snapshot_and_reports_corruption() {
        let coord = CheckpointCoordinator::new(base_header());
        coord.advance_wal_sequence();

        let mut bad_header = base_header();
        bad_header.tag_dict_offset = 0; // fails validate_offsets

        let result = coord.checkpoint(1, |_| Ok(bad_header), |_| Ok(()));

        assert!(result.is_err());
        assert_eq!(coord.state(), HeaderState::Clean);
        assert_eq!(coord.header(), base_header());
    }
}
