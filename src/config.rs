//! Pre-parsed configuration for a backup/restore invocation. This module
//! only models the parsed, validated result; argument parsing and
//! config-file loading live in the binary crate, not here.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::manifest::build::BlockIncrMaps;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepoType {
    Posix,
    S3,
    Cifs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CompressType {
    None,
    Gz,
    Lz4,
    Zst,
    Bz2,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Config {
    pub bucket: String,
    pub endpoint: String,
    pub region: String,
    /// Path-style vs. virtual-hosted-style bucket addressing.
    pub uri_style_path: bool,
    pub key_type: S3KeyType,
    pub part_size: u64,
    pub tags: Vec<(String, String)>,
    pub verify_peer: bool,
    pub ca_file: Option<PathBuf>,
    pub ca_path: Option<PathBuf>,
    /// Only meaningful with `key_type: Auto`; selects an IAM role when
    /// more than one is attached to the instance.
    pub credential_role: Option<String>,
    pub user_project: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum S3KeyType {
    Static { access_key: String, secret_key: String },
    Auto,
    WebIdentity,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoConfig {
    pub path: PathBuf,
    pub repo_type: RepoType,
    pub cipher_pass: Option<String>,
    pub s3: Option<S3Config>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PgHost {
    pub host: Option<String>,
    pub port: u16,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockIncrConfig {
    pub size_map: Vec<(u64, u64)>,
    pub age_map: Vec<(u32, u32)>,
    pub checksum_size_map: Vec<(u64, u64)>,
}

impl From<&BlockIncrConfig> for BlockIncrMaps {
    fn from(cfg: &BlockIncrConfig) -> Self {
        BlockIncrMaps { size_map: cfg.size_map.clone(), age_map: cfg.age_map.clone(), checksum_size_map: cfg.checksum_size_map.clone() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub repo: RepoConfig,
    pub pg: Vec<PgHost>,
    pub block_incr: Option<BlockIncrConfig>,
    pub delta: bool,
    pub bundle: bool,
    pub bundle_raw: bool,
    pub compress: bool,
    pub compress_type: CompressType,
    pub compress_level: i32,
    pub online: bool,
    pub process_max: u32,
    /// Restore only: stop applying WAL at this point in time.
    pub target_time: Option<String>,
}

impl Config {
    /// `process_max`, clamped to at least 1: the dispatcher always has
    /// at least one client.
    pub fn worker_count(&self) -> usize {
        self.process_max.max(1) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Config {
        Config {
            repo: RepoConfig { path: PathBuf::from("/repo"), repo_type: RepoType::Posix, cipher_pass: None, s3: None },
            pg: vec![PgHost { host: None, port: 5432, path: PathBuf::from("/var/lib/postgresql/13/main") }],
            block_incr: None,
            delta: false,
            bundle: false,
            bundle_raw: false,
            compress: true,
            compress_type: CompressType::Zst,
            compress_level: 3,
            online: true,
            process_max: 0,
            target_time: None,
        }
    }

    #[test]
    fn worker_count_is_never_zero() {
        assert_eq!(sample().worker_count(), 1);
    }

    #[test]
    fn config_round_trips_through_json() {
        let config = sample();
        let json = serde_json::to_string(&config).unwrap();
        let reloaded: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(reloaded.repo.path, config.repo.path);
        assert_eq!(reloaded.compress_type, config.compress_type);
    }
}
