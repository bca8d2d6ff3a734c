//! Backup manifest: the data model for a single backup, the
//! filesystem walk that builds one, its on-disk format, and the
//! structural checks that guard both.

pub mod build;
pub mod io;
pub mod model;
pub mod validate;

pub use build::{apply_incremental, block_incr_size, build, requires_primary_host, BlockIncrMaps, BuildInput, IncrementalContext, PgVersion, TablespaceSpec};
pub use model::{BackupHeader, BackupType, DatabaseDescriptor, FileEntry, LinkEntry, Manifest, OptionDescriptor, Target, TargetType};
