//! WAL rotation & integrity guard (C4, §4.4).
//!
//! Rotation itself lives on [`crate::wal::WalWriter`]; this module holds
//! the pre/post-rotation callback plumbing and the emergency-mode
//! decision for an astronomical frame length, which the single-writer
//! queue invokes around every append.

use entity_core::error::Result;
use entity_core::limits::ASTRONOMICAL_LENGTH;

/// Runs a rotation, invoking `pre` (typically a checkpoint) before
/// rotating and `post` after. `rotate` performs the actual file-level
/// rotation and returns the backup path.
pub fn rotate_with_callbacks<T>(
    pre: impl FnOnce() -> Result<()>,
    rotate: impl FnOnce() -> Result<T>,
    post: impl FnOnce(&T) -> Result<()>,
) -> Result<T> {
    pre()?;
    let result = rotate()?;
    post(&result)?;
    Ok(result)
}

/// What to do when a framed length looks corrupted (§4.4 emergency
/// mode).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegrityAction {
    /// The length is within bounds; proceed normally.
    Proceed,
    /// The length exceeds the astronomical threshold: stop writes,
    /// snapshot, and attempt truncation to the last good offset.
    EmergencyTruncate,
}

/// Classify a framed entry length against the astronomical-corruption
/// threshold.
pub fn classify_frame_length(len: u64) -> IntegrityAction {
    if len > ASTRONOMICAL_LENGTH {
        IntegrityAction::EmergencyTruncate
    } else {
        IntegrityAction::Proceed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_length_proceeds() {
        assert_eq!(classify_frame_length(1024), IntegrityAction::Proceed);
    }

    #[test]
    fn astronomical_length_triggers_emergency_truncate() {
        assert_eq!(
            classify_frame_length(ASTRONOMICAL_LENGTH + 1),
            IntegrityAction::EmergencyTruncate
        );
    }

    #[test]
    fn callbacks_run_in_order() {
        let mut order = Vec::new();
        let result = rotate_with_callbacks(
            || {
                order.push("pre");
                Ok(())
            },
            || {
                order.push("rotate");
                Ok(7)
            },
            |_| {
                order.push("post");
                Ok(())
            },
        );
        assert_eq!(result.unwrap(), 7);
        assert_eq!(order, vec!["pre", "rotate", "post"]);
    }
}
