//! Uniform storage surface used by the manifest builder and every backend
//! driver. The S3 driver (`crate::s3`) is the only concrete implementation
//! shipped; an in-memory double lives under `#[cfg(test)]` for exercising
//! callers without a live endpoint.
//!
//! Backends are dispatched through a trait object plus a capability
//! bitmap rather than a fixed enum, so a new backend only needs to
//! implement `Storage` and advertise its `FeatureBits`.

use std::time::SystemTime;

use anyhow::Result;
use async_trait::async_trait;
use bitflags::bitflags;
use tokio::io::{AsyncRead, AsyncWrite};

bitflags! {
    /// Capability advertisement a driver exposes to callers.
    #[derive(Default)]
    pub struct FeatureBits: u32 {
        const VERSIONING = 1 << 0;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum InfoLevel {
    Exists,
    Type,
    Basic,
    Detail,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryType {
    File,
    Path,
    Link,
}

#[derive(Debug, Clone, Default)]
pub struct StorageInfo {
    pub exists: bool,
    pub name: String,
    pub entry_type: Option<EntryType>,
    pub size: Option<u64>,
    pub time_modified: Option<SystemTime>,
    pub version_id: Option<String>,
}

impl StorageInfo {
    pub fn missing(name: impl Into<String>) -> Self {
        Self {
            exists: false,
            name: name.into(),
            ..Default::default()
        }
    }
}

/// Per-entry sink invoked once per listed entry. Spec §4.4: "the sink is
/// invoked for every entry ... with level-appropriate fields populated."
pub type ListSink<'a> = dyn FnMut(StorageInfo) + Send + 'a;

#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    pub level: Option<InfoLevel>,
    pub filter_regex: Option<String>,
    pub recursive: bool,
    pub target_time: Option<SystemTime>,
}

#[derive(Debug, Clone, Default)]
pub struct WriteOptions {
    pub sse_kms: bool,
    pub sse_c: bool,
    pub tag: bool,
}

pub type BoxedRead = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxedWrite = Box<dyn AsyncWrite + Send + Unpin>;

/// List, read, write, remove, and recursive-path-remove, plus `info`,
/// implemented by every driver (only S3 is built here; POSIX/GCS/Azure
/// are out of scope).
#[async_trait]
pub trait Storage: Send + Sync {
    fn features(&self) -> FeatureBits;

    async fn info(&self, path: &str, level: InfoLevel) -> Result<StorageInfo>;

    async fn list(&self, path: &str, opts: ListOptions, sink: &mut ListSink<'_>) -> Result<()>;

    async fn new_read(&self, path: &str, offset: u64, limit: Option<u64>, version_id: Option<&str>) -> Result<BoxedRead>;

    async fn new_write(&self, path: &str, opts: WriteOptions) -> Result<BoxedWrite>;

    async fn remove(&self, path: &str, error_on_missing: bool) -> Result<()>;

    async fn path_remove(&self, path: &str, recursive: bool) -> Result<bool>;
}

#[cfg(test)]
pub mod memory {
    //! Minimal in-memory `Storage` used by manifest-builder and dispatcher
    //! tests so they don't need a live S3 endpoint.

    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Mutex;
    use tokio::io::BufReader;

    #[derive(Default)]
    pub struct MemoryStorage {
        files: Mutex<BTreeMap<String, Vec<u8>>>,
    }

    impl MemoryStorage {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn put(&self, path: &str, content: Vec<u8>) {
            self.files.lock().unwrap().insert(path.to_string(), content);
        }
    }

    #[async_trait]
    impl Storage for MemoryStorage {
        fn features(&self) -> FeatureBits {
            FeatureBits::empty()
        }

        async fn info(&self, path: &str, _level: InfoLevel) -> Result<StorageInfo> {
            let files = self.files.lock().unwrap();
            match files.get(path) {
                Some(content) => Ok(StorageInfo {
                    exists: true,
                    name: path.to_string(),
                    entry_type: Some(EntryType::File),
                    size: Some(content.len() as u64),
                    time_modified: None,
                    version_id: None,
                }),
                None => Ok(StorageInfo::missing(path)),
            }
        }

        async fn list(&self, path: &str, _opts: ListOptions, sink: &mut ListSink<'_>) -> Result<()> {
            let prefix = if path.ends_with('/') { path.to_string() } else { format!("{}/", path) };
            let files = self.files.lock().unwrap();
            for (key, content) in files.iter() {
                if let Some(rest) = key.strip_prefix(&prefix) {
                    sink(StorageInfo {
                        exists: true,
                        name: rest.to_string(),
                        entry_type: Some(EntryType::File),
                        size: Some(content.len() as u64),
                        time_modified: None,
                        version_id: None,
                    });
                }
            }
            Ok(())
        }

        async fn new_read(&self, path: &str, offset: u64, limit: Option<u64>, _version_id: Option<&str>) -> Result<BoxedRead> {
            let files = self.files.lock().unwrap();
            let content = files
                .get(path)
                .ok_or_else(|| anyhow::anyhow!("file missing: {}", path))?;
            let start = offset as usize;
            let end = match limit {
                Some(l) => (start + l as usize).min(content.len()),
                None => content.len(),
            };
            let slice = content.get(start..end).unwrap_or(&[]).to_vec();
            Ok(Box::new(BufReader::new(std::io::Cursor::new(slice))) as BoxedRead)
        }

        async fn new_write(&self, _path: &str, _opts: WriteOptions) -> Result<BoxedWrite> {
            // Not exercised: tests seed content with `put` directly rather than
            // driving a real write, since `BoxedWrite` can't borrow `&self`.
            unimplemented!("MemoryStorage::new_write is unused by tests; use put() directly")
        }

        async fn remove(&self, path: &str, error_on_missing: bool) -> Result<()> {
            let mut files = self.files.lock().unwrap();
            if files.remove(path).is_none() && error_on_missing {
                anyhow::bail!("file missing: {}", path);
            }
            Ok(())
        }

        async fn path_remove(&self, path: &str, _recursive: bool) -> Result<bool> {
            let prefix = if path.ends_with('/') { path.to_string() } else { format!("{}/", path) };
            let mut files = self.files.lock().unwrap();
            let keys: Vec<String> = files.keys().filter(|k| k.starts_with(&prefix)).cloned().collect();
            for k in keys {
                files.remove(&k);
            }
            Ok(true)
        }
    }

    #[tokio::test]
    async fn memory_storage_info_and_remove_roundtrip() {
        let storage = MemoryStorage::new();
        storage.put("backup/file1", b"hello".to_vec());

        let info = storage.info("backup/file1", InfoLevel::Basic).await.unwrap();
        assert!(info.exists);
        assert_eq!(info.size, Some(5));

        storage.remove("backup/file1", true).await.unwrap();
        let info = storage.info("backup/file1", InfoLevel::Exists).await.unwrap();
        assert!(!info.exists);
    }

    #[tokio::test]
    async fn memory_storage_list_strips_prefix() {
        let storage = MemoryStorage::new();
        storage.put("backup/a", vec![1]);
        storage.put("backup/b", vec![2, 3]);

        let mut names = Vec::new();
        let mut sink = |info: StorageInfo| names.push(info.name);
        storage.list("backup", ListOptions::default(), &mut sink).await.unwrap();
        names.sort();
        assert_eq!(names, vec!["a".to_string(), "b".to_string()]);
    }
}
