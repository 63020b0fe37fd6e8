//! Write-ahead log (C3): framing, append/fsync, replay, rotation (§4.3,
//! §4.4, §6.2).

pub mod reader;
pub mod record;
pub mod writer;

pub use reader::{replay, ReplayReport};
pub use record::{WalOp, WalRecord};
pub use writer::WalWriter;
