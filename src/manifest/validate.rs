//! Post-build and post-load structural validation. Separate from
//! `build` because the same checks apply to a manifest freshly loaded
//! from disk, not just one just constructed from a filesystem walk.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Result};

use super::model::{Manifest, TargetType, EMPTY_FILE_CHECKSUM};

/// Run every structural invariant against `manifest`. Returns the first
/// violation found; callers that want every violation should inspect
/// `validate_all` instead.
pub fn validate(manifest: &Manifest) -> Result<()> {
    let violations = validate_all(manifest);
    if let Some(first) = violations.into_iter().next() {
        bail!(first);
    }
    Ok(())
}

/// Like `validate`, but collects every violation instead of stopping at
/// the first one.
pub fn validate_all(manifest: &Manifest) -> Vec<String> {
    let mut violations = Vec::new();

    for file in manifest.files.values() {
        if file.size == 0 && file.checksum != EMPTY_FILE_CHECKSUM {
            violations.push(format!("'{}' has size 0 but checksum '{}' instead of the empty-file checksum", file.name, file.checksum));
        }
        if let Some(reference) = &file.reference {
            if !manifest.header.reference.iter().any(|r| r == reference) {
                violations.push(format!("'{}' references backup '{}' which is not in the manifest's reference list", file.name, reference));
            }
        }
    }

    check_tblspc_symlinks_only(manifest, &mut violations);
    check_link_destinations(manifest, &mut violations);

    violations
}

fn check_tblspc_symlinks_only(manifest: &Manifest, violations: &mut Vec<String>) {
    for target in &manifest.targets {
        if !target.name.starts_with("pg_tblspc/") {
            continue;
        }
        if target.target_type != TargetType::Link {
            violations.push(format!("tablespace target '{}' must be a symlink", target.name));
        }
    }
}

/// Directory-link destinations must not nest inside pgdata, inside
/// another link's destination, or pass through a further symlink; two
/// file-links sharing a destination is also an error.
fn check_link_destinations(manifest: &Manifest, violations: &mut Vec<String>) {
    let pgdata = match manifest.target("pg_data") {
        Some(t) => PathBuf::from(&t.path),
        None => return,
    };

    let mut destinations: HashMap<&str, &str> = HashMap::new();

    for target in &manifest.targets {
        if target.target_type != TargetType::Link || target.name == "pg_data" {
            continue;
        }
        let dest = Path::new(&target.path);

        if dest.starts_with(&pgdata) {
            violations.push(format!("link target '{}' destination '{}' is inside pgdata", target.name, target.path));
        }

        for other in &manifest.targets {
            if other.name == target.name || other.target_type != TargetType::Link {
                continue;
            }
            let other_dest = Path::new(&other.path);
            if dest != other_dest && dest.starts_with(other_dest) {
                violations.push(format!("link target '{}' destination '{}' is inside another link's destination '{}'", target.name, target.path, other.path));
            }
        }

        if target.file.is_some() {
            if let Some(prior) = destinations.insert(target.path.as_str(), target.name.as_str()) {
                violations.push(format!("file links '{}' and '{}' share destination '{}'", prior, target.name, target.path));
            }
        }
    }
}

/// Save→load must reproduce the same manifest, field for field (the
/// checksum footer itself is exempt: it's recomputed over the rendered
/// bytes each time and verified separately during `parse`).
pub fn assert_round_trip(manifest: &Manifest) -> Result<()> {
    let text = super::io::render(manifest);
    let reloaded = super::io::parse(&text)?;

    if reloaded.header.label != manifest.header.label {
        bail!("round-trip changed backup-label");
    }
    if reloaded.files.len() != manifest.files.len() {
        bail!("round-trip changed file count: {} vs {}", reloaded.files.len(), manifest.files.len());
    }
    for (name, file) in &manifest.files {
        let other = reloaded.files.get(name).ok_or_else(|| anyhow::anyhow!("round-trip dropped file '{}'", name))?;
        if other.size != file.size || other.checksum != file.checksum {
            bail!("round-trip changed file '{}'", name);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::model::*;
    use std::collections::BTreeMap;

    fn base_manifest() -> Manifest {
        Manifest {
            header: BackupHeader {
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
            },
            database: DatabaseDescriptor::default(),
            option: OptionDescriptor::default(),
            targets: vec![Target { name: "pg_data".into(), target_type: TargetType::Path, path: "/var/lib/postgresql/13/main".into(), file: None, tablespace_id: None, tablespace_name: None }],
            paths: BTreeMap::new(),
            files: BTreeMap::new(),
            links: BTreeMap::new(),
            defaults: Defaults::default(),
            cipher_sub_pass: None,
        }
    }

    #[test]
    fn zero_size_file_must_have_empty_checksum() {
        let mut manifest = base_manifest();
        let mut file = FileEntry::new("pg_data/PG_VERSION", 0, 0);
        file.checksum = "not-the-empty-checksum".to_string();
        manifest.files.insert(file.name.clone(), file);

        let violations = validate_all(&manifest);
        assert!(violations.iter().any(|v| v.contains("empty-file checksum")));
    }

    #[test]
    fn dangling_file_reference_is_flagged() {
        let mut manifest = base_manifest();
        let mut file = FileEntry::new("pg_data/base/1/555", 10, 0);
        file.reference = Some("20191231-000000F".to_string());
        manifest.files.insert(file.name.clone(), file);

        let violations = validate_all(&manifest);
        assert!(violations.iter().any(|v| v.contains("not in the manifest's reference list")));
    }

    #[test]
    fn reference_present_in_header_passes() {
        let mut manifest = base_manifest();
        manifest.header.reference.push("20191231-000000F".to_string());
        let mut file = FileEntry::new("pg_data/base/1/555", 10, 0);
        file.reference = Some("20191231-000000F".to_string());
        manifest.files.insert(file.name.clone(), file);

        assert!(validate(&manifest).is_ok());
    }

    #[test]
    fn tablespace_target_that_is_not_a_link_is_flagged() {
        let mut manifest = base_manifest();
        manifest.targets.push(Target { name: "pg_tblspc/1".into(), target_type: TargetType::Path, path: "/mnt/ts1".into(), file: None, tablespace_id: Some(1), tablespace_name: Some("ts1".into()) });

        let violations = validate_all(&manifest);
        assert!(violations.iter().any(|v| v.contains("must be a symlink")));
    }

    #[test]
    fn link_destination_inside_pgdata_is_flagged() {
        let mut manifest = base_manifest();
        manifest.targets.push(Target { name: "pg_tblspc/1".into(), target_type: TargetType::Link, path: "/var/lib/postgresql/13/main/nested".into(), file: None, tablespace_id: Some(1), tablespace_name: Some("ts1".into()) });

        let violations = validate_all(&manifest);
        assert!(violations.iter().any(|v| v.contains("is inside pgdata")));
    }

    #[test]
    fn two_file_links_sharing_a_destination_is_flagged() {
        let mut manifest = base_manifest();
        manifest.targets.push(Target { name: "pg_data/conf_a".into(), target_type: TargetType::Link, path: "/etc/postgresql/shared.conf".into(), file: Some("conf_a".into()), tablespace_id: None, tablespace_name: None });
        manifest.targets.push(Target { name: "pg_data/conf_b".into(), target_type: TargetType::Link, path: "/etc/postgresql/shared.conf".into(), file: Some("conf_b".into()), tablespace_id: None, tablespace_name: None });

        let violations = validate_all(&manifest);
        assert!(violations.iter().any(|v| v.contains("share destination")));
    }

    #[test]
    fn round_trip_preserves_files_and_label() {
        let mut manifest = base_manifest();
        manifest.files.insert("pg_data/PG_VERSION".into(), FileEntry::new("pg_data/PG_VERSION", 0, 0));
        assert!(assert_round_trip(&manifest).is_ok());
    }
}
