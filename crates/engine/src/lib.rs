//! Engine subsystem: the on-disk entity file and its pooled readers
//! (C1), background maintenance tasks (§5), the corruption detector
//! (C15), and the repository facade that ties every other crate
//! together (C16).

pub mod background;
pub mod corruption;
pub mod data_file;
pub mod reader_pool;
pub mod repository;

pub use background::{BackgroundSupervisor, PeriodicTask};
pub use corruption::{CorruptionDetector, ScanInputs, ScanReport};
pub use data_file::DataFile;
pub use reader_pool::ReaderPool;
pub use repository::{Repository, Stats};
