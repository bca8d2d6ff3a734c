//! Backup controller: ties the manifest build, the protocol session
//! layer, and the job dispatcher together to run one backup end to end.
//! Transport setup (which clients exist, how they're connected) is the
//! caller's job; this module only orchestrates once sessions are open.

use std::future::Future;

use anyhow::Result;

use crate::config::Config;
use crate::dispatcher::Dispatcher;
use crate::manifest::build::{self, BuildInput, IncrementalContext, PgVersion, TablespaceSpec};
use crate::manifest::{io as manifest_io, validate, Manifest};
use crate::protocol::Session;

/// One file the dispatcher still needs to copy.
#[derive(Debug, Clone)]
pub struct CopyJob {
    pub name: String,
    pub size: u64,
}

/// What a successful copy reports back for the manifest.
pub struct CopyOutcome {
    pub checksum: String,
    pub repo_size: u64,
}

pub struct BackupController {
    config: Config,
}

impl BackupController {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Walk `pgdata` and assign copy/reference status for every file
    /// against `prior`. Returns the built manifest and whether delta
    /// mode ended up enabled (it may flip on even if the caller didn't
    /// request it: a timeline switch or an online/offline change always
    /// forces it).
    pub fn build_manifest(&self, pgdata: &std::path::Path, pg_version: PgVersion, copy_start: i64, tablespaces: &[TablespaceSpec], prior: Option<&Manifest>) -> Result<(Manifest, bool)> {
        let input = BuildInput {
            pgdata,
            pg_version,
            online: self.config.online,
            tablespaces,
            default_file_mode: 0o600,
            default_path_mode: 0o700,
            default_user: "postgres".to_string(),
            default_group: "postgres".to_string(),
        };

        let mut manifest = build::build(&input)?;
        manifest.option.online = Some(self.config.online);
        manifest.option.delta = Some(self.config.delta);
        manifest.option.process_max = Some(self.config.process_max);
        manifest.option.compress = Some(self.config.compress);
        manifest.header.timestamp_copy_start = copy_start;
        manifest.header.timestamp_start = copy_start;

        let mut delta = self.config.delta;
        if let Some(prior) = prior {
            manifest.header.prior_label = Some(prior.header.label.clone());
            if build::timeline_switched(prior, &manifest) {
                delta = true;
            }
            if build::online_flipped(prior, &manifest) {
                delta = true;
            }
        }

        let mut ctx = IncrementalContext { copy_start, delta };
        build::apply_incremental(&mut manifest, prior, &mut ctx)?;

        Ok((manifest, ctx.delta))
    }

    /// Every file still needing a copy, in manifest (lexicographic)
    /// order. The dispatcher is free to finish them in any order; this
    /// is just the order they're offered to idle clients.
    pub fn pending_copies(manifest: &Manifest) -> Vec<CopyJob> {
        manifest.files.values().filter(|f| f.copy).map(|f| CopyJob { name: f.name.clone(), size: f.size }).collect()
    }

    /// Files that can only be read reliably from the primary, per this
    /// backup's PostgreSQL version.
    pub fn primary_only_files(manifest: &Manifest, pg_version: PgVersion) -> Vec<&str> {
        manifest
            .files
            .keys()
            .filter(|name| {
                let relative = name.strip_prefix("pg_data/").unwrap_or(name);
                build::requires_primary_host(pg_version, relative)
            })
            .map(String::as_str)
            .collect()
    }

    /// Drive the copy phase to completion: one job in flight per
    /// session, results applied to the manifest as they arrive, in
    /// whatever order they finish. Returns the number of jobs that
    /// failed; a failure doesn't stop the others.
    pub async fn run_copies<Run, Fut>(manifest: &mut Manifest, sessions: Vec<Session>, jobs: Vec<CopyJob>, run: Run) -> Result<usize>
    where
        Run: Fn(usize, Session, CopyJob) -> Fut + Clone + Send + 'static,
        Fut: Future<Output = (Session, Result<CopyOutcome>)> + Send + 'static,
    {
        let mut dispatcher: Dispatcher<Session, String, CopyJob, CopyOutcome> = Dispatcher::new(sessions);
        let mut remaining = jobs.into_iter();
        let mut failed = 0usize;

        dispatcher.process(|_idx| remaining.next().map(|job| (job.name.clone(), job)), run.clone());

        while !dispatcher.done() {
            let result = match dispatcher.result().await {
                Some(result) => result,
                None => break,
            };

            match result.outcome {
                Ok(outcome) => {
                    if let Some(file) = manifest.files.get_mut(&result.key) {
                        file.checksum = outcome.checksum;
                        file.repo_size = outcome.repo_size;
                        file.copy = false;
                    }
                }
                Err(err) => {
                    log::warn!("copy of '{}' failed: {:?}", result.key, err);
                    failed += 1;
                }
            }

            dispatcher.process(|_idx| remaining.next().map(|job| (job.name.clone(), job)), run.clone());
        }

        Ok(failed)
    }

    /// Stamp the stop time, run the structural invariants, and write
    /// both manifest copies.
    pub fn finalize(&self, manifest: &mut Manifest, repo_dir: &std::path::Path, timestamp_stop: i64) -> Result<()> {
        manifest.header.timestamp_stop = timestamp_stop;
        validate::validate(manifest)?;
        manifest_io::save(repo_dir, manifest)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CompressType, PgHost, RepoConfig, RepoType};

    fn sample_config() -> Config {
        Config {
            repo: RepoConfig { path: std::path::PathBuf::from("/repo"), repo_type: RepoType::Posix, cipher_pass: None, s3: None },
            pg: vec![PgHost { host: None, port: 5432, path: std::path::PathBuf::from("/pgdata") }],
            block_incr: None,
            delta: false,
            bundle: false,
            bundle_raw: false,
            compress: true,
            compress_type: CompressType::Zst,
            compress_level: 3,
            online: true,
            process_max: 2,
            target_time: None,
        }
    }

    #[test]
    fn build_manifest_walks_a_real_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("PG_VERSION"), "13\n").unwrap();
        std::fs::create_dir(dir.path().join("global")).unwrap();
        std::fs::write(dir.path().join("global").join("pg_control"), vec![0u8; 8192]).unwrap();
        std::fs::write(dir.path().join("global").join("pg_internal.init"), b"x").unwrap();

        let controller = BackupController::new(sample_config());
        let (manifest, delta) = controller.build_manifest(dir.path(), PgVersion(130000), 1000, &[], None).unwrap();

        assert!(!delta);
        assert!(manifest.files.contains_key("pg_data/PG_VERSION"));
        assert!(manifest.files.contains_key("pg_data/global/pg_control"));
        assert!(!manifest.files.contains_key("pg_data/global/pg_internal.init"));
        assert!(manifest.files.values().all(|f| f.copy));
    }

    #[test]
    fn pending_copies_only_includes_files_marked_copy() {
        let mut manifest = crate::manifest::model::Manifest {
            header: crate::manifest::model::BackupHeader {
                label: "x".into(),
                prior_label: None,
                backup_type: crate::manifest::model::BackupType::Full,
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
                annotation: Default::default(),
            },
            database: Default::default(),
            option: Default::default(),
            targets: Vec::new(),
            paths: Default::default(),
            files: Default::default(),
            links: Default::default(),
            defaults: Default::default(),
            cipher_sub_pass: None,
        };

        let mut copy_me = crate::manifest::model::FileEntry::new("pg_data/a", 10, 0);
        copy_me.copy = true;
        let mut reference_me = crate::manifest::model::FileEntry::new("pg_data/b", 10, 0);
        reference_me.copy = false;
        manifest.files.insert(copy_me.name.clone(), copy_me);
        manifest.files.insert(reference_me.name.clone(), reference_me);

        let jobs = BackupController::pending_copies(&manifest);
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].name, "pg_data/a");
    }

    #[test]
    fn primary_only_files_flags_control_file_and_clog() {
        let mut manifest = crate::manifest::model::Manifest {
            header: crate::manifest::model::BackupHeader {
                label: "x".into(),
                prior_label: None,
                backup_type: crate::manifest::model::BackupType::Full,
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
                annotation: Default::default(),
            },
            database: Default::default(),
            option: Default::default(),
            targets: Vec::new(),
            paths: Default::default(),
            files: Default::default(),
            links: Default::default(),
            defaults: Default::default(),
            cipher_sub_pass: None,
        };
        manifest.files.insert("pg_data/global/pg_control".into(), crate::manifest::model::FileEntry::new("pg_data/global/pg_control", 8192, 0));
        manifest.files.insert("pg_data/pg_xact/0000".into(), crate::manifest::model::FileEntry::new("pg_data/pg_xact/0000", 10, 0));
        manifest.files.insert("pg_data/base/1/555".into(), crate::manifest::model::FileEntry::new("pg_data/base/1/555", 10, 0));

        let mut primary_only = BackupController::primary_only_files(&manifest, PgVersion(130000));
        primary_only.sort_unstable();
        assert_eq!(primary_only, vec!["pg_data/global/pg_control", "pg_data/pg_xact/0000"]);
    }
}
