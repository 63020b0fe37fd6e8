//! Durability subsystem: write-ahead log (C3), rotation & integrity
//! guard (C4), and checkpoint/header sync (C14).

pub mod checkpoint;
pub mod rotation;
pub mod wal;

pub use checkpoint::{CheckpointCoordinator, HeaderSnapshot, HeaderState};
pub use wal::{replay, ReplayReport, WalOp, WalRecord, WalWriter};
