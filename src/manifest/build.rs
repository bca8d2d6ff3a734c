//! Manifest build: walk a PostgreSQL data directory and turn it into a
//! `Manifest`, applying the ignore rules, relation-file heuristics, and
//! incremental-reference assignment against a prior backup.
//!
//! The always-exclude basename lists below are keyed on PostgreSQL
//! version thresholds; `global/pg_internal.init` is excluded by an exact
//! relative-path match rather than a basename rule, confirmed against
//! `global/pg_internal.init.allow` being retained in the equivalent
//! fixture from the original project's manifest test suite.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;

use super::model::{BackupType, FileEntry, LinkEntry, Manifest, PathAttrs, Target, TargetType};

/// Basenames always ignored at the data-directory root, regardless of
/// PostgreSQL version.
const ALWAYS_IGNORE_ROOT: &[&str] = &[
    "postmaster.pid",
    "postmaster.opts",
    "backup_label.old",
    "recovery.conf",
    "recovery.done",
    "postgresql.auto.conf.tmp",
];

/// Added to the root-ignore set from PostgreSQL 12 onward.
const ALWAYS_IGNORE_ROOT_PG12: &[&str] = &["recovery.signal", "standby.signal", "backup_label"];

/// Added to the root-ignore set from PostgreSQL 13 onward.
const ALWAYS_IGNORE_ROOT_PG13: &[&str] = &["backup_manifest", "backup_manifest.tmp"];

/// Directories whose *contents* are always ignored (the directory entry
/// itself is still recorded as an empty path).
const ALWAYS_IGNORE_DIR: &[&str] = &["pg_dynshmem", "pg_notify", "pg_replslot", "pg_serial", "pg_snapshots", "pg_stat_tmp", "pg_subtrans"];

/// Exact pgdata-relative paths excluded regardless of context.
const ALWAYS_IGNORE_PATH: &[&str] = &["global/pg_internal.init"];

static TEMP_RELATION_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^t\d+_\d+(_(fsm|vm))?(\.\d+)?$").unwrap());
static INIT_FORK_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d+)_init$").unwrap());
static MAIN_RELATION_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d+)(_fsm|_vm)?(\.\d+)?$").unwrap());
static DB_DIR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d+$").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PgVersion(pub u32);

impl PgVersion {
    pub fn at_least(&self, other: u32) -> bool {
        self.0 >= other
    }

    /// The directory PostgreSQL's WAL archive lives under: renamed from
    /// `pg_xlog` to `pg_wal` in version 10.
    pub fn wal_dir_name(&self) -> &'static str {
        if self.at_least(100000) {
            "pg_wal"
        } else {
            "pg_xlog"
        }
    }

    /// The directory holding commit-status data: renamed from `pg_clog`
    /// to `pg_xact` in version 10.
    pub fn clog_dir_name(&self) -> &'static str {
        if self.at_least(100000) {
            "pg_xact"
        } else {
            "pg_clog"
        }
    }
}

pub struct TablespaceSpec {
    pub id: u32,
    pub name: String,
    pub link_path: PathBuf,
}

pub struct BuildInput<'a> {
    pub pgdata: &'a Path,
    pub pg_version: PgVersion,
    pub online: bool,
    pub tablespaces: &'a [TablespaceSpec],
    pub default_file_mode: u32,
    pub default_path_mode: u32,
    pub default_user: String,
    pub default_group: String,
}

struct WalkCtx<'a> {
    online: bool,
    pg_version: PgVersion,
    root_ignore: HashSet<&'static str>,
    default_file_mode: u32,
    default_path_mode: u32,
    default_user: &'a str,
    default_group: &'a str,
}

/// Build a fresh `Manifest` by walking `input.pgdata`. The result carries
/// `copy: true` on every file; incremental reference assignment against a
/// prior manifest happens afterward via `apply_incremental`.
pub fn build(input: &BuildInput) -> Result<Manifest> {
    let mut root_ignore: HashSet<&'static str> = ALWAYS_IGNORE_ROOT.iter().copied().collect();
    if input.pg_version.at_least(120000) {
        root_ignore.extend(ALWAYS_IGNORE_ROOT_PG12.iter().copied());
    }
    if input.pg_version.at_least(130000) {
        root_ignore.extend(ALWAYS_IGNORE_ROOT_PG13.iter().copied());
    }

    let ctx = WalkCtx {
        online: input.online,
        pg_version: input.pg_version,
        root_ignore,
        default_file_mode: input.default_file_mode,
        default_path_mode: input.default_path_mode,
        default_user: &input.default_user,
        default_group: &input.default_group,
    };

    let mut manifest = Manifest {
        header: super::model::BackupHeader {
            label: String::new(),
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
        },
        database: super::model::DatabaseDescriptor::default(),
        option: super::model::OptionDescriptor::default(),
        targets: vec![Target { name: "pg_data".into(), target_type: TargetType::Path, path: input.pgdata.display().to_string(), file: None, tablespace_id: None, tablespace_name: None }],
        paths: BTreeMap::new(),
        files: BTreeMap::new(),
        links: BTreeMap::new(),
        defaults: super::model::Defaults::default(),
        cipher_sub_pass: None,
    };

    manifest.paths.insert("pg_data".to_string(), PathAttrs { mode: Some(ctx.default_path_mode), user: Some(ctx.default_user.to_string()), group: Some(ctx.default_group.to_string()) });

    walk_dir(input.pgdata, input.pgdata, "pg_data", &ctx, &mut manifest, true)?;

    for ts in input.tablespaces {
        let meta = std::fs::symlink_metadata(input.pgdata.join("pg_tblspc").join(ts.id.to_string()));
        match meta {
            Ok(m) if m.file_type().is_symlink() => {}
            Ok(_) => bail!("pg_tblspc/{} exists but is not a symlink", ts.id),
            Err(err) => return Err(err).context(format!("reading pg_tblspc/{}", ts.id)),
        }

        let name = format!("pg_tblspc/{}", ts.id);
        manifest.targets.push(Target { name: name.clone(), target_type: TargetType::Link, path: ts.link_path.display().to_string(), file: None, tablespace_id: Some(ts.id), tablespace_name: Some(ts.name.clone()) });
        manifest.paths.insert(name.clone(), PathAttrs { mode: Some(ctx.default_path_mode), user: Some(ctx.default_user.to_string()), group: Some(ctx.default_group.to_string()) });

        walk_dir(&ts.link_path, &ts.link_path, &name, &ctx, &mut manifest, false)?;
    }

    manifest.defaults.file = manifest.compute_file_defaults();
    manifest.defaults.path = manifest.compute_path_defaults();
    manifest.defaults.link = manifest.compute_link_defaults();
    strip_defaults(&mut manifest);

    Ok(manifest)
}

/// Recursively walk `dir` (the real filesystem path currently being
/// visited) recording entries under `logical_prefix` (the manifest-space
/// name, e.g. `pg_data/base/1`). `is_pgdata_root` gates the pgdata-only
/// root-basename exclusions and the `pg_tblspc` special case (tablespaces
/// are walked separately by the caller).
fn walk_dir(real_dir: &Path, walk_root: &Path, logical_prefix: &str, ctx: &WalkCtx<'_>, manifest: &mut Manifest, is_pgdata_root: bool) -> Result<()> {
    let mut entries: Vec<_> = std::fs::read_dir(real_dir).with_context(|| format!("reading directory {}", real_dir.display()))?.collect::<std::io::Result<_>>()?;
    entries.sort_by_key(|e| e.file_name());

    let is_db_dir = real_dir.file_name().map(|n| DB_DIR_RE.is_match(&n.to_string_lossy())).unwrap_or(false);
    let init_oids: HashSet<String> = if is_db_dir {
        entries
            .iter()
            .filter_map(|e| INIT_FORK_RE.captures(&e.file_name().to_string_lossy()).map(|c| c[1].to_string()))
            .collect()
    } else {
        HashSet::new()
    };

    for entry in entries {
        let file_name = entry.file_name().to_string_lossy().into_owned();
        let real_path = entry.path();
        let logical_name = format!("{}/{}", logical_prefix, file_name);
        let relative_to_root = real_path.strip_prefix(walk_root).unwrap_or(&real_path).display().to_string();

        if is_pgdata_root && ctx.root_ignore.contains(file_name.as_str()) {
            continue;
        }
        if ALWAYS_IGNORE_PATH.iter().any(|p| *p == relative_to_root) {
            continue;
        }
        if file_name == "pg_tblspc" {
            // Tablespaces are walked separately by `build`.
            continue;
        }

        let file_type = entry.file_type()?;

        if file_type.is_symlink() {
            record_symlink(&real_path, &logical_name, ctx, manifest)?;
            continue;
        }

        if file_type.is_dir() {
            if ctx.root_ignore_dir_contents(&file_name) {
                manifest.paths.insert(logical_name, PathAttrs { mode: Some(ctx.default_path_mode), user: Some(ctx.default_user.to_string()), group: Some(ctx.default_group.to_string()) });
                continue;
            }
            manifest.paths.insert(logical_name.clone(), PathAttrs { mode: Some(ctx.default_path_mode), user: Some(ctx.default_user.to_string()), group: Some(ctx.default_group.to_string()) });
            walk_dir(&real_path, walk_root, &logical_name, ctx, manifest, is_pgdata_root)?;
            continue;
        }

        if !file_type.is_file() {
            log::warn!("skipping special file {}", real_path.display());
            continue;
        }

        if is_db_dir {
            if TEMP_RELATION_RE.is_match(&file_name) {
                continue;
            }
            if let Some(caps) = MAIN_RELATION_RE.captures(&file_name) {
                if init_oids.contains(&caps[1]) {
                    continue;
                }
            }
        }

        let metadata = entry.metadata()?;
        let timestamp = metadata.modified().ok().and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok()).map(|d| d.as_secs() as i64).unwrap_or(0);
        let mut file = FileEntry::new(logical_name.clone(), metadata.len(), timestamp);
        file.mode = Some(ctx.default_file_mode);
        file.user = Some(ctx.default_user.to_string());
        file.group = Some(ctx.default_group.to_string());
        manifest.files.insert(logical_name, file);
    }

    Ok(())
}

impl<'a> WalkCtx<'a> {
    fn root_ignore_dir_contents(&self, name: &str) -> bool {
        if name.starts_with("pgsql_tmp") {
            return true;
        }
        if ALWAYS_IGNORE_DIR.contains(&name) {
            return true;
        }
        if self.online && name == self.pg_version.wal_dir_name() {
            // The WAL directory's `archive_status` subtree is skipped
            // online; the segments themselves are shipped separately.
            return true;
        }
        false
    }
}

fn record_symlink(real_path: &Path, logical_name: &str, ctx: &WalkCtx<'_>, manifest: &mut Manifest) -> Result<()> {
    let destination = std::fs::read_link(real_path).with_context(|| format!("reading symlink {}", real_path.display()))?;
    manifest.links.insert(logical_name.to_string(), LinkEntry { destination: destination.display().to_string(), user: Some(ctx.default_user.to_string()), group: Some(ctx.default_group.to_string()) });

    let resolved = if destination.is_absolute() { destination.clone() } else { real_path.parent().unwrap_or(Path::new("")).join(&destination) };
    let target_is_file = std::fs::metadata(&resolved).map(|m| m.is_file()).unwrap_or(false);

    manifest.targets.push(Target {
        name: logical_name.to_string(),
        target_type: TargetType::Link,
        path: resolved.display().to_string(),
        file: if target_is_file { Some(logical_name.rsplit('/').next().unwrap_or(logical_name).to_string()) } else { None },
        tablespace_id: None,
        tablespace_name: None,
    });

    Ok(())
}

/// Drop per-entry attrs that already match the computed default, so only
/// overrides are stored.
fn strip_defaults(manifest: &mut Manifest) {
    for path in manifest.paths.values_mut() {
        if path.mode == manifest.defaults.path.mode {
            path.mode = None;
        }
        if path.user == manifest.defaults.path.user {
            path.user = None;
        }
        if path.group == manifest.defaults.path.group {
            path.group = None;
        }
    }
    for file in manifest.files.values_mut() {
        if file.mode == manifest.defaults.file.mode {
            file.mode = None;
        }
        if file.user == manifest.defaults.file.user {
            file.user = None;
        }
        if file.group == manifest.defaults.file.group {
            file.group = None;
        }
    }
    for link in manifest.links.values_mut() {
        if link.user == manifest.defaults.link.user {
            link.user = None;
        }
        if link.group == manifest.defaults.link.group {
            link.group = None;
        }
    }
}

/// True for files whose current content can only be read reliably from
/// the primary: the control file, and commit-status data
/// (`pg_xact`/`pg_clog` depending on version) which a standby may not
/// have fully replayed.
pub fn requires_primary_host(pg_version: PgVersion, relative_path: &str) -> bool {
    if relative_path == "global/pg_control" {
        return true;
    }
    relative_path.starts_with(&format!("{}/", pg_version.clog_dir_name()))
}

pub struct IncrementalContext {
    pub copy_start: i64,
    pub delta: bool,
}

/// Assign `copy`/`reference` on every file in `manifest` relative to
/// `prior`. Mutates `ctx.delta` to `true`
/// if an anomaly (timestamp regression, or an unexplained size change
/// with an unchanged timestamp) forces delta mode; the caller is
/// responsible for re-running with delta on if this flips false to true
/// mid-build in a two-pass builder, or for treating newly-true delta as
/// "verify checksums for any file this pass marked as a reference
/// candidate."
pub fn apply_incremental(manifest: &mut Manifest, prior: Option<&Manifest>, ctx: &mut IncrementalContext) -> Result<()> {
    let prior = match prior {
        Some(p) => p,
        None => return Ok(()),
    };

    for (name, file) in manifest.files.iter_mut() {
        let prior_file = match prior.files.get(name) {
            None => {
                file.copy = true;
                continue;
            }
            Some(p) => p,
        };

        if file.size != prior_file.size {
            if file.timestamp == prior_file.timestamp {
                log::warn!("'{}' changed size but not timestamp since the prior backup, enabling delta", name);
                ctx.delta = true;
            }
            file.copy = true;
            continue;
        }

        if file.timestamp < prior_file.timestamp {
            log::warn!("'{}' has an earlier timestamp than the prior backup, enabling delta", name);
            ctx.delta = true;
            file.copy = true;
            continue;
        }

        if file.timestamp > prior_file.timestamp || file.timestamp > ctx.copy_start {
            file.copy = true;
            continue;
        }

        // Equal timestamp and size, at or before copy-start: eligible
        // for reference. In delta mode the file is still copied, on the
        // assumption a checksum comparison during copy may downgrade it
        // back to a reference.
        if ctx.delta {
            file.copy = true;
        } else {
            file.copy = false;
            let reference_label = prior_file.reference.clone().unwrap_or_else(|| prior.header.label.clone());
            manifest.header.note_reference(&reference_label);
            file.reference = Some(reference_label);
        }
    }

    Ok(())
}

/// A timeline switch between the prior backup's `archiveStop` and this
/// one's `archiveStart` forces delta mode: the first 8 hex characters of
/// a WAL segment name are its timeline id.
pub fn timeline_switched(prior: &Manifest, current: &Manifest) -> bool {
    match (&prior.header.archive_stop, &current.header.archive_start) {
        (Some(stop), Some(start)) if stop.len() >= 8 && start.len() >= 8 => stop[..8] != start[..8],
        _ => false,
    }
}

/// An online/offline flip since the prior backup forces delta mode.
pub fn online_flipped(prior: &Manifest, current: &Manifest) -> bool {
    prior.option.online.unwrap_or(true) != current.option.online.unwrap_or(true)
}

pub struct BlockIncrMaps {
    /// `(minimum file size, block size)`, checked largest-threshold-first.
    pub size_map: Vec<(u64, u64)>,
    /// `(minimum file age in days, block-size multiplier)`, checked
    /// largest-threshold-first; a multiplier of `0` disables
    /// block-incremental encoding for files at least that old.
    pub age_map: Vec<(u32, u32)>,
    /// `(block size, checksum size)`.
    pub checksum_size_map: Vec<(u64, u64)>,
}

/// Compute the block-incremental sizing for a file of `file_size` bytes
/// last backed up `file_age_days` ago, using the monotonic lookup
/// tables in `maps`. Returns `None` if no size threshold matches or the
/// age multiplier disables encoding for this file.
pub fn block_incr_size(maps: &BlockIncrMaps, file_size: u64, file_age_days: u32) -> Option<super::model::BlockIncr> {
    let block_size = maps.size_map.iter().filter(|(threshold, _)| file_size >= *threshold).map(|(_, bs)| *bs).max()?;
    let multiplier = maps.age_map.iter().filter(|(threshold, _)| file_age_days >= *threshold).map(|(_, m)| *m).last().unwrap_or(1);
    if multiplier == 0 {
        return None;
    }
    let size = block_size.saturating_mul(multiplier as u64).max(1);
    let checksum_size = maps.checksum_size_map.iter().find(|(bs, _)| *bs == block_size).map(|(_, cs)| *cs).unwrap_or(4);
    let map_size = ((file_size + size - 1) / size) * checksum_size;
    Some(super::model::BlockIncr { size, checksum_size, map_size })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::model::Defaults;

    fn empty_manifest(label: &str) -> Manifest {
        Manifest {
            header: super::super::model::BackupHeader {
                label: label.to_string(),
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
            },
            database: super::super::model::DatabaseDescriptor::default(),
            option: super::super::model::OptionDescriptor::default(),
            targets: Vec::new(),
            paths: BTreeMap::new(),
            files: BTreeMap::new(),
            links: BTreeMap::new(),
            defaults: Defaults::default(),
            cipher_sub_pass: None,
        }
    }

    #[test]
    fn temp_relation_files_are_recognized() {
        assert!(TEMP_RELATION_RE.is_match("t1_555"));
        assert!(TEMP_RELATION_RE.is_match("t1_555_fsm"));
        assert!(TEMP_RELATION_RE.is_match("t1_555.1"));
        assert!(!TEMP_RELATION_RE.is_match("555"));
    }

    #[test]
    fn init_fork_presence_suppresses_main_relation_file() {
        let init_oids: HashSet<String> = ["555".to_string()].into_iter().collect();
        assert!(INIT_FORK_RE.captures("555_init").is_some());
        let caps = MAIN_RELATION_RE.captures("555").unwrap();
        assert!(init_oids.contains(&caps[1]));
        let caps = MAIN_RELATION_RE.captures("555_fsm").unwrap();
        assert!(init_oids.contains(&caps[1]));
        let caps = MAIN_RELATION_RE.captures("555.1").unwrap();
        assert!(init_oids.contains(&caps[1]));
        // 555_init itself doesn't match the "main relation" pattern (the
        // `_init` suffix isn't one of `_fsm`/`_vm`), so it is kept.
        assert!(MAIN_RELATION_RE.captures("555_init").is_none());
    }

    #[test]
    fn pg_internal_init_is_excluded_by_exact_path_not_basename() {
        assert!(ALWAYS_IGNORE_PATH.contains(&"global/pg_internal.init"));
        // A same-named file elsewhere, or the `.allow` variant, isn't
        // covered by the exact-path list and would survive the check.
        assert!(!ALWAYS_IGNORE_PATH.contains(&"base/1/pg_internal.init"));
        assert!(!ALWAYS_IGNORE_PATH.contains(&"global/pg_internal.init.allow"));
    }

    #[test]
    fn unchanged_file_at_or_before_copy_start_becomes_a_reference() {
        let mut prior = empty_manifest("20200101-000000F");
        prior.files.insert("pg_data/base/1/555".into(), FileEntry::new("pg_data/base/1/555", 100, 1000));

        let mut current = empty_manifest("20200102-000000D");
        current.files.insert("pg_data/base/1/555".into(), FileEntry::new("pg_data/base/1/555", 100, 1000));

        let mut ctx = IncrementalContext { copy_start: 2000, delta: false };
        apply_incremental(&mut current, Some(&prior), &mut ctx).unwrap();

        let file = &current.files["pg_data/base/1/555"];
        assert!(!file.copy);
        assert_eq!(file.reference.as_deref(), Some("20200101-000000F"));
        assert_eq!(current.header.reference, vec!["20200101-000000F".to_string()]);
        assert!(!ctx.delta);
    }

    #[test]
    fn timestamp_equal_to_copy_start_is_treated_as_past() {
        let mut prior = empty_manifest("20200101-000000F");
        prior.files.insert("pg_data/f".into(), FileEntry::new("pg_data/f", 10, 2000));
        let mut current = empty_manifest("20200102-000000D");
        current.files.insert("pg_data/f".into(), FileEntry::new("pg_data/f", 10, 2000));

        let mut ctx = IncrementalContext { copy_start: 2000, delta: false };
        apply_incremental(&mut current, Some(&prior), &mut ctx).unwrap();

        assert!(!current.files["pg_data/f"].copy);
    }

    #[test]
    fn size_change_with_unchanged_timestamp_enables_delta() {
        let mut prior = empty_manifest("20200101-000000F");
        prior.files.insert("pg_data/f".into(), FileEntry::new("pg_data/f", 10, 1000));
        let mut current = empty_manifest("20200102-000000D");
        current.files.insert("pg_data/f".into(), FileEntry::new("pg_data/f", 20, 1000));

        let mut ctx = IncrementalContext { copy_start: 2000, delta: false };
        apply_incremental(&mut current, Some(&prior), &mut ctx).unwrap();

        assert!(current.files["pg_data/f"].copy);
        assert!(ctx.delta);
    }

    #[test]
    fn timeline_switch_between_backups_is_detected() {
        let mut prior = empty_manifest("a");
        prior.header.archive_stop = Some("00000001000000000000000A".into());
        let mut current = empty_manifest("b");
        current.header.archive_start = Some("00000002000000000000000B".into());
        assert!(timeline_switched(&prior, &current));
    }

    #[test]
    fn block_incr_size_picks_the_largest_matching_threshold() {
        let maps = BlockIncrMaps {
            size_map: vec![(0, 4096), (1_000_000, 65536)],
            age_map: vec![(0, 1), (30, 4)],
            checksum_size_map: vec![(4096, 4), (65536, 8)],
        };
        let small = block_incr_size(&maps, 10_000, 0).unwrap();
        assert_eq!(small.size, 4096);
        let big_old = block_incr_size(&maps, 2_000_000, 40).unwrap();
        assert_eq!(big_old.size, 65536 * 4);
        assert_eq!(big_old.checksum_size, 8);
    }

    #[test]
    fn requires_primary_host_matches_version_specific_clog_dir() {
        assert!(requires_primary_host(PgVersion(130000), "global/pg_control"));
        assert!(requires_primary_host(PgVersion(130000), "pg_xact/0000"));
        assert!(!requires_primary_host(PgVersion(130000), "pg_clog/0000"));
        assert!(requires_primary_host(PgVersion(90600), "pg_clog/0000"));
    }
}
