//! Manifest serialization: an INI-like text format with JSON-encoded
//! values, sorted keys within each section, and a trailing checksum
//! section covering everything written before it.
//!
//! Two copies are written (`backup.manifest` and `backup.manifest.copy`);
//! loading tries the primary first and falls back to the copy, failing
//! only if both are missing or fail their checksum.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{bail, Context, Result};
use sha1::{Digest, Sha1};

use super::model::*;

const MANIFEST_FILE: &str = "backup.manifest";
const MANIFEST_COPY_FILE: &str = "backup.manifest.copy";

type Section = BTreeMap<String, serde_json::Value>;

/// Render `manifest` to its on-disk text form, footer included.
pub fn render(manifest: &Manifest) -> String {
    let mut sections: Vec<(String, Section)> = Vec::new();

    let mut backup = Section::new();
    backup.insert("backup-label".into(), manifest.header.label.clone().into());
    if let Some(prior) = &manifest.header.prior_label {
        backup.insert("backup-prior".into(), prior.clone().into());
    }
    backup.insert("backup-type".into(), backup_type_str(manifest.header.backup_type).into());
    put_opt(&mut backup, "backup-archive-start", &manifest.header.archive_start);
    put_opt(&mut backup, "backup-archive-stop", &manifest.header.archive_stop);
    put_opt(&mut backup, "backup-lsn-start", &manifest.header.lsn_start);
    put_opt(&mut backup, "backup-lsn-stop", &manifest.header.lsn_stop);
    backup.insert("backup-timestamp-start".into(), manifest.header.timestamp_start.into());
    backup.insert("backup-timestamp-stop".into(), manifest.header.timestamp_stop.into());
    backup.insert("backup-timestamp-copy-start".into(), manifest.header.timestamp_copy_start.into());
    if !manifest.header.reference.is_empty() {
        backup.insert("backup-reference".into(), manifest.header.reference.clone().into());
    }
    backup.insert("backup-bundle".into(), manifest.header.bundle.into());
    backup.insert("backup-bundle-raw".into(), manifest.header.bundle_raw.into());
    backup.insert("backup-block-incr".into(), manifest.header.block_incr.into());
    sections.push(("backup".into(), backup));

    if !manifest.header.annotation.is_empty() {
        let mut metadata = Section::new();
        for (key, value) in &manifest.header.annotation {
            metadata.insert(key.clone(), value.clone().into());
        }
        sections.push(("metadata".into(), metadata));
    }

    let mut db = Section::new();
    db.insert("db-catalog-version".into(), manifest.database.catalog_version.into());
    db.insert("db-control-version".into(), manifest.database.control_version.into());
    db.insert("db-id".into(), manifest.database.id.into());
    db.insert("db-system-id".into(), manifest.database.system_id.into());
    db.insert("db-version".into(), manifest.database.version.clone().into());
    sections.push(("backup:db".into(), db));

    let mut option = Section::new();
    put_opt(&mut option, "option-archive-check", &manifest.option.archive_check);
    put_opt(&mut option, "option-archive-copy", &manifest.option.archive_copy);
    put_opt(&mut option, "option-backup-standby", &manifest.option.backup_standby);
    put_opt(&mut option, "option-buffer-size", &manifest.option.buffer_size);
    put_opt(&mut option, "option-checksum-page", &manifest.option.checksum_page);
    put_opt(&mut option, "option-compress", &manifest.option.compress);
    put_opt(&mut option, "option-compress-level", &manifest.option.compress_level);
    put_opt(&mut option, "option-compress-level-network", &manifest.option.compress_level_network);
    put_opt(&mut option, "option-compress-type", &manifest.option.compress_type);
    put_opt(&mut option, "option-delta", &manifest.option.delta);
    put_opt(&mut option, "option-hardlink", &manifest.option.hardlink);
    put_opt(&mut option, "option-online", &manifest.option.online);
    put_opt(&mut option, "option-process-max", &manifest.option.process_max);
    sections.push(("backup:option".into(), option));

    let mut target = Section::new();
    for t in &manifest.targets {
        let mut entry = serde_json::Map::new();
        entry.insert("type".into(), target_type_str(t.target_type).into());
        entry.insert("path".into(), t.path.clone().into());
        if let Some(file) = &t.file {
            entry.insert("file".into(), file.clone().into());
        }
        if let Some(id) = t.tablespace_id {
            entry.insert("tablespace-id".into(), id.into());
        }
        if let Some(name) = &t.tablespace_name {
            entry.insert("tablespace-name".into(), name.clone().into());
        }
        target.insert(t.name.clone(), serde_json::Value::Object(entry));
    }
    sections.push(("backup:target".into(), target));

    if let Some(pass) = &manifest.cipher_sub_pass {
        let mut cipher = Section::new();
        cipher.insert("cipher-pass".into(), pass.clone().into());
        sections.push(("cipher".into(), cipher));
    }

    sections.push(("target:path".into(), path_attrs_section(manifest.paths.iter().map(|(k, v)| (k.clone(), v.clone())))));
    sections.push(("target:path:default".into(), path_attrs_section(std::iter::once(("".to_string(), manifest.defaults.path.clone())))));

    sections.push(("target:file".into(), file_entries_section(&manifest.files)));
    sections.push(("target:file:default".into(), path_attrs_section(std::iter::once(("".to_string(), manifest.defaults.file.clone())))));

    sections.push(("target:link".into(), link_entries_section(&manifest.links)));
    sections.push(("target:link:default".into(), path_attrs_section(std::iter::once(("".to_string(), manifest.defaults.link.clone())))));

    let mut body = String::new();
    write_sections(&mut body, &sections);

    let checksum = hex::encode(Sha1::digest(body.as_bytes()));
    body.push_str(&format!("\n[backrest]\nbackrest-checksum=\"{}\"\n", checksum));
    body
}

/// Parse `text` (as produced by `render`) back into a `Manifest`,
/// ignoring unrecognized sections and keys so older writers and newer
/// readers (or vice versa) interoperate.
pub fn parse(text: &str) -> Result<Manifest> {
    let (body, checksum) = split_checksum_footer(text);
    if let Some(expected) = checksum {
        let actual = hex::encode(Sha1::digest(body.as_bytes()));
        if actual != expected {
            bail!("manifest checksum mismatch: expected {}, computed {}", expected, actual);
        }
    }

    let sections = parse_sections(body)?;

    let backup = sections.get("backup").cloned().unwrap_or_default();
    let header = BackupHeader {
        label: string_field(&backup, "backup-label")?,
        prior_label: opt_string_field(&backup, "backup-prior"),
        backup_type: parse_backup_type(&string_field(&backup, "backup-type")?)?,
        archive_start: opt_string_field(&backup, "backup-archive-start"),
        archive_stop: opt_string_field(&backup, "backup-archive-stop"),
        lsn_start: opt_string_field(&backup, "backup-lsn-start"),
        lsn_stop: opt_string_field(&backup, "backup-lsn-stop"),
        timestamp_start: i64_field(&backup, "backup-timestamp-start").unwrap_or(0),
        timestamp_stop: i64_field(&backup, "backup-timestamp-stop").unwrap_or(0),
        timestamp_copy_start: i64_field(&backup, "backup-timestamp-copy-start").unwrap_or(0),
        reference: backup.get("backup-reference").and_then(|v| v.as_array()).map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect()).unwrap_or_default(),
        bundle: bool_field(&backup, "backup-bundle"),
        bundle_raw: bool_field(&backup, "backup-bundle-raw"),
        block_incr: bool_field(&backup, "backup-block-incr"),
        annotation: sections.get("metadata").cloned().unwrap_or_default().into_iter().filter_map(|(k, v)| v.as_str().map(|s| (k, s.to_string()))).collect(),
    };

    let db_section = sections.get("backup:db").cloned().unwrap_or_default();
    let database = DatabaseDescriptor {
        id: i64_field(&db_section, "db-id").unwrap_or(0),
        catalog_version: i64_field(&db_section, "db-catalog-version").unwrap_or(0),
        control_version: i64_field(&db_section, "db-control-version").unwrap_or(0),
        system_id: db_section.get("db-system-id").and_then(|v| v.as_u64()).unwrap_or(0),
        version: opt_string_field(&db_section, "db-version").unwrap_or_default(),
    };

    let option_section = sections.get("backup:option").cloned().unwrap_or_default();
    let option = OptionDescriptor {
        archive_check: option_section.get("option-archive-check").and_then(|v| v.as_bool()),
        archive_copy: option_section.get("option-archive-copy").and_then(|v| v.as_bool()),
        backup_standby: option_section.get("option-backup-standby").and_then(|v| v.as_bool()),
        buffer_size: option_section.get("option-buffer-size").and_then(|v| v.as_u64()),
        checksum_page: option_section.get("option-checksum-page").and_then(|v| v.as_bool()),
        compress: option_section.get("option-compress").and_then(|v| v.as_bool()),
        compress_level: option_section.get("option-compress-level").and_then(|v| v.as_i64()).map(|v| v as i32),
        compress_level_network: option_section.get("option-compress-level-network").and_then(|v| v.as_i64()).map(|v| v as i32),
        compress_type: opt_string_field(&option_section, "option-compress-type"),
        delta: option_section.get("option-delta").and_then(|v| v.as_bool()),
        hardlink: option_section.get("option-hardlink").and_then(|v| v.as_bool()),
        online: option_section.get("option-online").and_then(|v| v.as_bool()),
        process_max: option_section.get("option-process-max").and_then(|v| v.as_u64()).map(|v| v as u32),
    };

    let mut targets = Vec::new();
    for (name, value) in sections.get("backup:target").cloned().unwrap_or_default() {
        let obj = value.as_object().context("target entry must be an object")?;
        targets.push(Target {
            name,
            target_type: parse_target_type(obj.get("type").and_then(|v| v.as_str()).unwrap_or("path"))?,
            path: obj.get("path").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
            file: obj.get("file").and_then(|v| v.as_str()).map(str::to_string),
            tablespace_id: obj.get("tablespace-id").and_then(|v| v.as_u64()).map(|v| v as u32),
            tablespace_name: obj.get("tablespace-name").and_then(|v| v.as_str()).map(str::to_string),
        });
    }

    let paths = parse_path_attrs_section(sections.get("target:path").cloned().unwrap_or_default());
    let links = parse_link_entries_section(sections.get("target:link").cloned().unwrap_or_default());
    let files = parse_file_entries_section(sections.get("target:file").cloned().unwrap_or_default());

    let defaults = Defaults {
        path: parse_path_attrs_section(sections.get("target:path:default").cloned().unwrap_or_default()).remove("").unwrap_or_default(),
        file: parse_path_attrs_section(sections.get("target:file:default").cloned().unwrap_or_default()).remove("").unwrap_or_default(),
        link: parse_path_attrs_section(sections.get("target:link:default").cloned().unwrap_or_default()).remove("").unwrap_or_default(),
    };

    let cipher_sub_pass = sections.get("cipher").and_then(|s| s.get("cipher-pass")).and_then(|v| v.as_str()).map(str::to_string);

    Ok(Manifest { header, database, option, targets, paths, files, links, defaults, cipher_sub_pass })
}

/// Save both copies under `dir`.
pub fn save(dir: &Path, manifest: &Manifest) -> Result<()> {
    let text = render(manifest);
    std::fs::write(dir.join(MANIFEST_FILE), &text).context("writing backup.manifest")?;
    std::fs::write(dir.join(MANIFEST_COPY_FILE), &text).context("writing backup.manifest.copy")?;
    Ok(())
}

/// Load from `dir`, trying the primary copy first and falling back to
/// the secondary only if the primary is missing or fails to parse or
/// checksum.
pub fn load(dir: &Path) -> Result<Manifest> {
    let primary = std::fs::read_to_string(dir.join(MANIFEST_FILE));
    if let Ok(text) = primary {
        if let Ok(manifest) = parse(&text) {
            return Ok(manifest);
        }
        log::warn!("primary manifest at {} failed to parse, falling back to copy", dir.display());
    }

    let copy = std::fs::read_to_string(dir.join(MANIFEST_COPY_FILE)).context("reading backup.manifest.copy after primary failed")?;
    parse(&copy)
}

fn put_opt<T: Into<serde_json::Value> + Clone>(section: &mut Section, key: &str, value: &Option<T>) {
    if let Some(v) = value {
        section.insert(key.to_string(), v.clone().into());
    }
}

fn backup_type_str(t: BackupType) -> &'static str {
    match t {
        BackupType::Full => "full",
        BackupType::Diff => "diff",
        BackupType::Incr => "incr",
    }
}

fn parse_backup_type(s: &str) -> Result<BackupType> {
    match s {
        "full" => Ok(BackupType::Full),
        "diff" => Ok(BackupType::Diff),
        "incr" => Ok(BackupType::Incr),
        other => bail!("unrecognized backup type '{}'", other),
    }
}

fn target_type_str(t: TargetType) -> &'static str {
    match t {
        TargetType::Path => "path",
        TargetType::Link => "link",
    }
}

fn parse_target_type(s: &str) -> Result<TargetType> {
    match s {
        "path" => Ok(TargetType::Path),
        "link" => Ok(TargetType::Link),
        other => bail!("unrecognized target type '{}'", other),
    }
}

fn path_attrs_section(entries: impl Iterator<Item = (String, PathAttrs)>) -> Section {
    let mut section = Section::new();
    for (name, attrs) in entries {
        let mut entry = serde_json::Map::new();
        if let Some(mode) = attrs.mode {
            entry.insert("mode".into(), format!("{:04o}", mode).into());
        }
        if let Some(user) = &attrs.user {
            entry.insert("user".into(), user.clone().into());
        }
        if let Some(group) = &attrs.group {
            entry.insert("group".into(), group.clone().into());
        }
        section.insert(name, serde_json::Value::Object(entry));
    }
    section
}

fn parse_path_attrs_section(section: Section) -> BTreeMap<String, PathAttrs> {
    section
        .into_iter()
        .map(|(name, value)| {
            let obj = value.as_object().cloned().unwrap_or_default();
            let attrs = PathAttrs {
                mode: obj.get("mode").and_then(|v| v.as_str()).and_then(|s| u32::from_str_radix(s, 8).ok()),
                user: obj.get("user").and_then(|v| v.as_str()).map(str::to_string),
                group: obj.get("group").and_then(|v| v.as_str()).map(str::to_string),
            };
            (name, attrs)
        })
        .collect()
}

fn link_entries_section(links: &BTreeMap<String, LinkEntry>) -> Section {
    let mut section = Section::new();
    for (name, link) in links {
        let mut entry = serde_json::Map::new();
        entry.insert("destination".into(), link.destination.clone().into());
        if let Some(user) = &link.user {
            entry.insert("user".into(), user.clone().into());
        }
        if let Some(group) = &link.group {
            entry.insert("group".into(), group.clone().into());
        }
        section.insert(name.clone(), serde_json::Value::Object(entry));
    }
    section
}

fn parse_link_entries_section(section: Section) -> BTreeMap<String, LinkEntry> {
    section
        .into_iter()
        .map(|(name, value)| {
            let obj = value.as_object().cloned().unwrap_or_default();
            let link = LinkEntry {
                destination: obj.get("destination").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
                user: obj.get("user").and_then(|v| v.as_str()).map(str::to_string),
                group: obj.get("group").and_then(|v| v.as_str()).map(str::to_string),
            };
            (name, link)
        })
        .collect()
}

fn file_entries_section(files: &BTreeMap<String, FileEntry>) -> Section {
    let mut section = Section::new();
    for (name, file) in files {
        let mut entry = serde_json::Map::new();
        entry.insert("size".into(), file.size.into());
        if let Some(original) = file.original_size {
            entry.insert("szo".into(), original.into());
        }
        entry.insert("repo-size".into(), file.repo_size.into());
        entry.insert("timestamp".into(), file.timestamp.into());
        if !file.checksum.is_empty() {
            entry.insert("checksum".into(), file.checksum.clone().into());
        }
        if let Some(rck) = &file.resume_checksum {
            entry.insert("rck".into(), rck.clone().into());
        }
        if let Some(reference) = &file.reference {
            entry.insert("reference".into(), reference.clone().into());
        }
        if let Some(mode) = file.mode {
            entry.insert("mode".into(), format!("{:04o}", mode).into());
        }
        if let Some(user) = &file.user {
            entry.insert("user".into(), user.clone().into());
        }
        if let Some(group) = &file.group {
            entry.insert("group".into(), group.clone().into());
        }
        if let Some(page) = &file.checksum_page {
            entry.insert("checksum-page".into(), page.ok.into());
            if !page.error.is_empty() {
                let errors: Vec<serde_json::Value> = page
                    .error
                    .iter()
                    .map(|e| match e {
                        PageErrorRange::Single(n) => serde_json::json!(n),
                        PageErrorRange::Range(a, b) => serde_json::json!([a, b]),
                    })
                    .collect();
                entry.insert("checksum-page-error".into(), errors.into());
            }
        }
        if let Some(bi) = &file.block_incr {
            entry.insert("bi".into(), bi.size.into());
            entry.insert("bic".into(), bi.checksum_size.into());
            entry.insert("bim".into(), bi.map_size.into());
        }
        if let Some(id) = file.bundle_id {
            entry.insert("bni".into(), id.into());
        }
        if let Some(offset) = file.bundle_offset {
            entry.insert("bno".into(), offset.into());
        }
        section.insert(name.clone(), serde_json::Value::Object(entry));
    }
    section
}

fn parse_file_entries_section(section: Section) -> BTreeMap<String, FileEntry> {
    section
        .into_iter()
        .map(|(name, value)| {
            let obj = value.as_object().cloned().unwrap_or_default();
            let checksum_page = obj.get("checksum-page").and_then(|v| v.as_bool()).map(|ok| ChecksumPage {
                ok,
                error: obj
                    .get("checksum-page-error")
                    .and_then(|v| v.as_array())
                    .map(|a| {
                        a.iter()
                            .filter_map(|e| {
                                if let Some(n) = e.as_u64() {
                                    Some(PageErrorRange::Single(n as u32))
                                } else if let Some(pair) = e.as_array() {
                                    if pair.len() == 2 {
                                        Some(PageErrorRange::Range(pair[0].as_u64()? as u32, pair[1].as_u64()? as u32))
                                    } else {
                                        None
                                    }
                                } else {
                                    None
                                }
                            })
                            .collect()
                    })
                    .unwrap_or_default(),
            });

            let block_incr = obj.get("bi").and_then(|v| v.as_u64()).map(|size| BlockIncr {
                size,
                checksum_size: obj.get("bic").and_then(|v| v.as_u64()).unwrap_or(4),
                map_size: obj.get("bim").and_then(|v| v.as_u64()).unwrap_or(0),
            });

            let file = FileEntry {
                name: name.clone(),
                size: obj.get("size").and_then(|v| v.as_u64()).unwrap_or(0),
                original_size: obj.get("szo").and_then(|v| v.as_u64()),
                repo_size: obj.get("repo-size").and_then(|v| v.as_u64()).unwrap_or(0),
                timestamp: obj.get("timestamp").and_then(|v| v.as_i64()).unwrap_or(0),
                checksum: obj.get("checksum").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
                resume_checksum: obj.get("rck").and_then(|v| v.as_str()).map(str::to_string),
                reference: obj.get("reference").and_then(|v| v.as_str()).map(str::to_string),
                mode: obj.get("mode").and_then(|v| v.as_str()).and_then(|s| u32::from_str_radix(s, 8).ok()),
                user: obj.get("user").and_then(|v| v.as_str()).map(str::to_string),
                group: obj.get("group").and_then(|v| v.as_str()).map(str::to_string),
                checksum_page,
                block_incr,
                copy: false,
                resume: false,
                bundle_id: obj.get("bni").and_then(|v| v.as_u64()).map(|v| v as u32),
                bundle_offset: obj.get("bno").and_then(|v| v.as_u64()),
            };
            (name, file)
        })
        .collect()
}

fn string_field(section: &Section, key: &str) -> Result<String> {
    section.get(key).and_then(|v| v.as_str()).map(str::to_string).with_context(|| format!("missing required field '{}'", key))
}

fn opt_string_field(section: &Section, key: &str) -> Option<String> {
    section.get(key).and_then(|v| v.as_str()).map(str::to_string)
}

fn i64_field(section: &Section, key: &str) -> Option<i64> {
    section.get(key).and_then(|v| v.as_i64())
}

fn bool_field(section: &Section, key: &str) -> bool {
    section.get(key).and_then(|v| v.as_bool()).unwrap_or(false)
}

fn write_sections(out: &mut String, sections: &[(String, Section)]) {
    for (name, section) in sections {
        out.push_str(&format!("[{}]\n", name));
        for (key, value) in section {
            out.push_str(&format!("{}={}\n", key, serde_json::to_string(value).expect("json values are always serializable")));
        }
        out.push('\n');
    }
}

fn parse_sections(body: &str) -> Result<BTreeMap<String, Section>> {
    let mut sections: BTreeMap<String, Section> = BTreeMap::new();
    let mut current: Option<String> = None;

    for (line_no, raw_line) in body.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(name) = line.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
            current = Some(name.to_string());
            sections.entry(name.to_string()).or_default();
            continue;
        }
        let section_name = current.as_ref().with_context(|| format!("line {} has no enclosing section", line_no + 1))?;
        let (key, raw_value) = line.split_once('=').with_context(|| format!("line {} is not a key=value pair", line_no + 1))?;
        let value: serde_json::Value = serde_json::from_str(raw_value).with_context(|| format!("line {} has invalid JSON value", line_no + 1))?;
        sections.get_mut(section_name).expect("inserted above").insert(key.to_string(), value);
    }

    Ok(sections)
}

fn split_checksum_footer(text: &str) -> (&str, Option<String>) {
    if let Some(idx) = text.rfind("\n[backrest]\n") {
        let (body, footer) = text.split_at(idx);
        let checksum = footer
            .lines()
            .find_map(|l| l.strip_prefix("backrest-checksum="))
            .and_then(|v| serde_json::from_str::<String>(v).ok());
        (body, checksum)
    } else {
        (text, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn sample_manifest() -> Manifest {
        let mut files = BTreeMap::new();
        files.insert("pg_data/PG_VERSION".to_string(), FileEntry::new("pg_data/PG_VERSION", 0, 100));
        let mut changed = FileEntry::new("pg_data/base/1/555", 8192, 200);
        changed.checksum = "abcdef0123abcdef0123abcdef0123abcdef0123".to_string();
        files.insert("pg_data/base/1/555".to_string(), changed);

        Manifest {
            header: BackupHeader {
                label: "20200101-000000F".into(),
                prior_label: None,
                backup_type: BackupType::Full,
                archive_start: Some("000000010000000000000001".into()),
                archive_stop: Some("000000010000000000000002".into()),
                lsn_start: Some("0/1".into()),
                lsn_stop: Some("0/2".into()),
                timestamp_start: 100,
                timestamp_stop: 200,
                timestamp_copy_start: 150,
                reference: Vec::new(),
                bundle: false,
                bundle_raw: false,
                block_incr: false,
                annotation: BTreeMap::new(),
            },
            database: DatabaseDescriptor { id: 1, catalog_version: 202107181, control_version: 1300, system_id: 1234, version: "13".into() },
            option: OptionDescriptor { online: Some(true), delta: Some(false), ..Default::default() },
            targets: vec![Target { name: "pg_data".into(), target_type: TargetType::Path, path: "/var/lib/postgresql/13/main".into(), file: None, tablespace_id: None, tablespace_name: None }],
            paths: BTreeMap::new(),
            files,
            links: BTreeMap::new(),
            defaults: Defaults::default(),
            cipher_sub_pass: None,
        }
    }

    #[test]
    fn render_then_parse_round_trips() {
        let manifest = sample_manifest();
        let text = render(&manifest);
        let parsed = parse(&text).unwrap();

        assert_eq!(parsed.header.label, manifest.header.label);
        assert_eq!(parsed.database.system_id, manifest.database.system_id);
        assert_eq!(parsed.files.len(), manifest.files.len());
        assert_eq!(parsed.files["pg_data/PG_VERSION"].checksum, EMPTY_FILE_CHECKSUM);
        assert_eq!(parsed.files["pg_data/base/1/555"].checksum, "abcdef0123abcdef0123abcdef0123abcdef0123");
        assert_eq!(parsed.targets[0].path, manifest.targets[0].path);
    }

    #[test]
    fn checksum_mismatch_is_rejected() {
        let text = render(&sample_manifest());
        let tampered = text.replace("20200101-000000F", "20200101-999999F");
        assert!(parse(&tampered).is_err());
    }

    #[test]
    fn unknown_section_and_key_are_tolerated() {
        let mut text = render(&sample_manifest());
        let insertion_point = text.find("[backup]").unwrap();
        text.insert_str(insertion_point, "[future:section]\nsome-new-key=\"value\"\n\n");
        // Corrupting the prefix invalidates the trailing checksum, so
        // recompute it as a real future writer would.
        let (body, _) = split_checksum_footer(&text);
        let checksum = hex::encode(Sha1::digest(body.as_bytes()));
        let mut fixed = body.to_string();
        fixed.push_str(&format!("\n[backrest]\nbackrest-checksum=\"{}\"\n", checksum));

        let parsed = parse(&fixed).unwrap();
        assert_eq!(parsed.header.label, "20200101-000000F");
    }

    #[test]
    fn load_falls_back_to_copy_when_primary_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = sample_manifest();
        save(dir.path(), &manifest).unwrap();
        std::fs::write(dir.path().join(MANIFEST_FILE), "not a valid manifest").unwrap();

        let loaded = load(dir.path()).unwrap();
        assert_eq!(loaded.header.label, manifest.header.label);
    }
}
