//! Backup manifest data model: the backup header, database and
//! option descriptors, targets, paths, files, links, defaults, and the
//! cipher sub-pass. No I/O lives here; see `io` and `build`.

use std::collections::BTreeMap;

/// SHA-1 of the empty string, the canonical checksum for a zero-length
/// file entry.
pub const EMPTY_FILE_CHECKSUM: &str = "da39a3ee5e6b4b0d3255bfef95601890afd80709";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupType {
    Full,
    Diff,
    Incr,
}

impl BackupType {
    pub fn label_suffix(self) -> &'static str {
        match self {
            BackupType::Full => "F",
            BackupType::Diff => "D",
            BackupType::Incr => "I",
        }
    }
}

#[derive(Debug, Clone)]
pub struct BackupHeader {
    pub label: String,
    pub prior_label: Option<String>,
    pub backup_type: BackupType,
    pub archive_start: Option<String>,
    pub archive_stop: Option<String>,
    pub lsn_start: Option<String>,
    pub lsn_stop: Option<String>,
    pub timestamp_start: i64,
    pub timestamp_stop: i64,
    pub timestamp_copy_start: i64,
    /// Ordered, unique union of prior-backup labels referenced by any file.
    pub reference: Vec<String>,
    pub bundle: bool,
    pub bundle_raw: bool,
    pub block_incr: bool,
    pub annotation: BTreeMap<String, String>,
}

impl BackupHeader {
    /// Record `label` in the reference list if it isn't already present.
    /// Every file's `reference` field must name a label that appears here.
    pub fn note_reference(&mut self, label: &str) {
        if !self.reference.iter().any(|r| r == label) {
            self.reference.push(label.to_string());
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatabaseDescriptor {
    pub id: i64,
    pub catalog_version: i64,
    pub control_version: i64,
    pub system_id: u64,
    pub version: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OptionDescriptor {
    pub archive_check: Option<bool>,
    pub archive_copy: Option<bool>,
    pub backup_standby: Option<bool>,
    pub buffer_size: Option<u64>,
    pub checksum_page: Option<bool>,
    pub compress: Option<bool>,
    pub compress_level: Option<i32>,
    pub compress_level_network: Option<i32>,
    pub compress_type: Option<String>,
    pub delta: Option<bool>,
    pub hardlink: Option<bool>,
    pub online: Option<bool>,
    pub process_max: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetType {
    Path,
    Link,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub name: String,
    pub target_type: TargetType,
    pub path: String,
    /// Set iff this link target points at a single file rather than a
    /// directory.
    pub file: Option<String>,
    pub tablespace_id: Option<u32>,
    pub tablespace_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathAttrs {
    pub mode: Option<u32>,
    pub user: Option<String>,
    pub group: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChecksumPage {
    pub ok: bool,
    /// Page numbers or `[start, end]` ranges with checksum mismatches.
    pub error: Vec<PageErrorRange>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageErrorRange {
    Single(u32),
    Range(u32, u32),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockIncr {
    pub size: u64,
    pub checksum_size: u64,
    pub map_size: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FileEntry {
    pub name: String,
    pub size: u64,
    /// Set when the repository's stored size differs from the logical
    /// size (compression, block-incremental encoding).
    pub original_size: Option<u64>,
    pub repo_size: u64,
    pub timestamp: i64,
    pub checksum: String,
    pub resume_checksum: Option<String>,
    pub reference: Option<String>,
    pub mode: Option<u32>,
    pub user: Option<String>,
    pub group: Option<String>,
    pub checksum_page: Option<ChecksumPage>,
    pub block_incr: Option<BlockIncr>,
    pub copy: bool,
    pub resume: bool,
    pub bundle_id: Option<u32>,
    pub bundle_offset: Option<u64>,
}

impl FileEntry {
    /// A bare file entry for a just-discovered path: no checksum yet
    /// (workers fill it in during copy) except for zero-length files,
    /// whose checksum is the canonical empty-string SHA-1.
    pub fn new(name: impl Into<String>, size: u64, timestamp: i64) -> Self {
        let checksum = if size == 0 { EMPTY_FILE_CHECKSUM.to_string() } else { String::new() };
        Self {
            name: name.into(),
            size,
            original_size: None,
            repo_size: 0,
            timestamp,
            checksum,
            resume_checksum: None,
            reference: None,
            mode: None,
            user: None,
            group: None,
            checksum_page: None,
            block_incr: None,
            copy: true,
            resume: false,
            bundle_id: None,
            bundle_offset: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkEntry {
    pub destination: String,
    pub user: Option<String>,
    pub group: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Defaults {
    pub path: PathAttrs,
    pub file: PathAttrs,
    pub link: PathAttrs,
}

#[derive(Debug, Clone)]
pub struct Manifest {
    pub header: BackupHeader,
    pub database: DatabaseDescriptor,
    pub option: OptionDescriptor,
    pub targets: Vec<Target>,
    pub paths: BTreeMap<String, PathAttrs>,
    pub files: BTreeMap<String, FileEntry>,
    pub links: BTreeMap<String, LinkEntry>,
    pub defaults: Defaults,
    pub cipher_sub_pass: Option<String>,
}

impl Manifest {
    pub fn target(&self, name: &str) -> Option<&Target> {
        self.targets.iter().find(|t| t.name == name)
    }

    /// Most common mode/user/group among `files`, used to compute
    /// `defaults.file` so per-file overrides can be omitted when they
    /// match the default, keeping the rendered manifest small.
    pub fn compute_file_defaults(&self) -> PathAttrs {
        most_common_attrs(self.files.values().map(|f| (f.mode, f.user.as_deref(), f.group.as_deref())))
    }

    pub fn compute_path_defaults(&self) -> PathAttrs {
        most_common_attrs(self.paths.values().map(|p| (p.mode, p.user.as_deref(), p.group.as_deref())))
    }

    pub fn compute_link_defaults(&self) -> PathAttrs {
        most_common_attrs(self.links.values().map(|l| (None, l.user.as_deref(), l.group.as_deref())))
    }
}

fn most_common_attrs<'a>(iter: impl Iterator<Item = (Option<u32>, Option<&'a str>, Option<&'a str>)>) -> PathAttrs {
    let mut modes: BTreeMap<u32, usize> = BTreeMap::new();
    let mut users: BTreeMap<&str, usize> = BTreeMap::new();
    let mut groups: BTreeMap<&str, usize> = BTreeMap::new();

    for (mode, user, group) in iter {
        if let Some(m) = mode {
            *modes.entry(m).or_default() += 1;
        }
        if let Some(u) = user {
            *users.entry(u).or_default() += 1;
        }
        if let Some(g) = group {
            *groups.entry(g).or_default() += 1;
        }
    }

    PathAttrs {
        mode: modes.into_iter().max_by_key(|(_, count)| *count).map(|(m, _)| m),
        user: users.into_iter().max_by_key(|(_, count)| *count).map(|(u, _)| u.to_string()),
        group: groups.into_iter().max_by_key(|(_, count)| *count).map(|(g, _)| g.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_length_file_gets_canonical_empty_checksum() {
        let file = FileEntry::new("pg_data/PG_VERSION", 0, 100);
        assert_eq!(file.checksum, EMPTY_FILE_CHECKSUM);
    }

    #[test]
    fn nonzero_length_file_starts_with_no_checksum() {
        let file = FileEntry::new("pg_data/base/1/555", 8192, 100);
        assert!(file.checksum.is_empty());
    }

    #[test]
    fn note_reference_is_idempotent_and_ordered() {
        let mut header = BackupHeader {
            label: "20200101-000000F".into(),
            prior_label: None,
            backup_type: BackupType::Full,
            archive_start: None,
            archive_stop: None,
            lsn_start: None,
            lsn_stop: None,
            timestamp_start: 0,
            timestamp_stop: 0,
            timestamp_copy_start: 0,
            reference: Vec::new(),
            bundle: false,
            bundle_raw: false,
            block_incr: false,
            annotation: BTreeMap::new(),
        };
        header.note_reference("A");
        header.note_reference("B");
        header.note_reference("A");
        assert_eq!(header.reference, vec!["A".to_string(), "B".to_string()]);
    }

    #[test]
    fn most_common_attrs_picks_the_majority() {
        let attrs = most_common_attrs(vec![(Some(0o600), Some("postgres"), Some("postgres")), (Some(0o600), Some("postgres"), Some("postgres")), (Some(0o640), Some("postgres"), Some("postgres"))].into_iter());
        assert_eq!(attrs.mode, Some(0o600));
        assert_eq!(attrs.user.as_deref(), Some("postgres"));
    }
}
