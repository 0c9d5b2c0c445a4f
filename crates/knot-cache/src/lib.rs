use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use knot_types::{Integrity, Manifest};

pub use crate::central::CentralStore;
pub use crate::content::{ContentStore, ContentWriter, Error as ContentError};
pub use crate::key::cache_digest;

mod central;
mod content;
mod key;

/// A cache entry which may or may not exist yet.
#[derive(Debug, Clone)]
pub struct CacheEntry(PathBuf);

impl CacheEntry {
    /// Create a new [`CacheEntry`] from a directory and a file name.
    pub fn new(dir: impl Into<PathBuf>, file: impl AsRef<Path>) -> Self {
        Self(dir.into().join(file))
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.0
    }

    #[inline]
    pub fn dir(&self) -> &Path {
        self.0.parent().expect("cache entry has no parent")
    }

    pub fn into_path_buf(self) -> PathBuf {
        self.0
    }
}

impl AsRef<Path> for CacheEntry {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}

/// A subdirectory within the cache.
#[derive(Debug, Clone)]
pub struct CacheShard(PathBuf);

impl CacheShard {
    /// Return a [`CacheEntry`] within this shard.
    pub fn entry(&self, file: impl AsRef<Path>) -> CacheEntry {
        CacheEntry::new(&self.0, file)
    }
}

impl AsRef<Path> for CacheShard {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}

/// The cache buckets this layer creates under the configured cache directory.
///
/// Bucket names are versioned so a layout change never misreads older entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheBucket {
    /// The content-addressable tarball store, keyed by integrity digest.
    Content,
    /// Cached registry packuments, one entry per package name.
    Packuments,
    /// Synthetic git/url tarball records, a per-package-name key namespace.
    Git,
}

impl CacheBucket {
    fn to_str(self) -> &'static str {
        match self {
            Self::Content => "content-v1",
            Self::Packuments => "packuments-v1",
            Self::Git => "git-v1",
        }
    }
}

/// The sidecar record attached to a cached synthetic git/url tarball: enough to recover the
/// package descriptor without re-reading (or re-creating) the checkout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitTarballRecord {
    pub integrity: Integrity,
    pub manifest: Manifest,
}

/// The local cache: bucketed layout plus the content-addressable store.
#[derive(Debug, Clone)]
pub struct Cache {
    /// The cache directory.
    root: Arc<PathBuf>,
}

impl Cache {
    /// Open (creating if necessary) a cache rooted at `root`.
    pub fn init(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        fs_err::create_dir_all(&root)?;
        Ok(Self {
            root: Arc::new(root),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The folder for a specific cache bucket.
    pub fn bucket(&self, bucket: CacheBucket) -> PathBuf {
        self.root.join(bucket.to_str())
    }

    /// Compute a shard within a bucket.
    pub fn shard(&self, bucket: CacheBucket, dir: impl AsRef<Path>) -> CacheShard {
        CacheShard(self.bucket(bucket).join(dir.as_ref()))
    }

    /// Compute an entry in the cache.
    pub fn entry(
        &self,
        bucket: CacheBucket,
        dir: impl AsRef<Path>,
        file: impl AsRef<Path>,
    ) -> CacheEntry {
        CacheEntry::new(self.bucket(bucket).join(dir), file)
    }

    /// The content-addressable store.
    pub fn content(&self) -> ContentStore {
        ContentStore::new(self.bucket(CacheBucket::Content), (*self.root).clone())
    }

    /// The cache entry holding the packument for a package name.
    pub fn packument_entry(&self, name: &str) -> CacheEntry {
        // Scoped names contain `/`; hash the name into a flat filename.
        self.entry(
            CacheBucket::Packuments,
            "",
            format!("{}.json", cache_digest(name)),
        )
    }

    /// The sidecar entry for a synthetic git/url tarball, keyed by the resolved source
    /// locator within the package's namespace.
    pub fn git_tarball_entry(&self, name: &str, resolved: &str) -> CacheEntry {
        let key = format!("tarball-for-{resolved}");
        self.entry(
            CacheBucket::Git,
            cache_digest(name),
            format!("{}.json", cache_digest(&key)),
        )
    }

    /// Read a [`GitTarballRecord`] sidecar, if present and parsable.
    pub fn read_git_tarball(&self, name: &str, resolved: &str) -> Option<GitTarballRecord> {
        let entry = self.git_tarball_entry(name, resolved);
        let contents = fs_err::read(entry.path()).ok()?;
        match serde_json::from_slice(&contents) {
            Ok(record) => Some(record),
            Err(err) => {
                tracing::warn!(
                    "Ignoring unreadable git tarball record at {}: {err}",
                    entry.path().display()
                );
                None
            }
        }
    }

    /// Write a [`GitTarballRecord`] sidecar. Last writer wins; records for the same resolved
    /// locator are interchangeable.
    pub fn write_git_tarball(
        &self,
        name: &str,
        resolved: &str,
        record: &GitTarballRecord,
    ) -> io::Result<()> {
        let entry = self.git_tarball_entry(name, resolved);
        fs_err::create_dir_all(entry.dir())?;
        let contents = serde_json::to_vec(record)?;
        let temp = tempfile::NamedTempFile::new_in(entry.dir())?;
        fs_err::write(temp.path(), contents)?;
        temp.persist(entry.path()).map_err(|err| err.error)?;
        Ok(())
    }

    /// A temporary staging directory inside the cache root, so renames into the cache stay on
    /// one filesystem.
    pub fn staging_dir(&self) -> io::Result<tempfile::TempDir> {
        tempfile::tempdir_in(self.root())
    }
}

#[cfg(test)]
mod tests {
    use knot_types::{Integrity, Manifest};

    use super::{Cache, GitTarballRecord};

    #[test]
    fn git_tarball_entries_are_stable_and_namespaced_by_name() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::init(dir.path()).unwrap();

        let a = cache.git_tarball_entry("repo", "https://example.com/repo#0f0f0f");
        let b = cache.git_tarball_entry("repo", "https://example.com/repo#0f0f0f");
        assert_eq!(a.path(), b.path());

        let other_commit = cache.git_tarball_entry("repo", "https://example.com/repo#1a1a1a");
        assert_ne!(a.path(), other_commit.path());

        let other_name = cache.git_tarball_entry("other", "https://example.com/repo#0f0f0f");
        assert_ne!(a.dir(), other_name.dir());
    }

    #[test]
    fn git_tarball_record_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::init(dir.path()).unwrap();
        let resolved = "https://example.com/repo#0f0f0f";

        assert!(cache.read_git_tarball("repo", resolved).is_none());

        let manifest: Manifest = serde_json::from_value(serde_json::json!({
            "name": "repo",
            "version": "1.0.0",
        }))
        .unwrap();
        let record = GitTarballRecord {
            integrity: Integrity::from_sha512(vec![0xab; 64]),
            manifest,
        };
        cache.write_git_tarball("repo", resolved, &record).unwrap();

        let read = cache.read_git_tarball("repo", resolved).unwrap();
        assert_eq!(read.integrity, record.integrity);
        assert_eq!(read.manifest.version, "1.0.0");
    }
}
