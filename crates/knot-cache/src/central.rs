use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

use knot_types::Integrity;

/// An optional shared, cross-project content store layered above the local cache.
///
/// The existence check before a write-through is inherently racy under concurrent identical
/// requests; writes stage and rename, so a duplicate write-through is an idempotent overwrite
/// of identical content.
#[derive(Debug, Clone)]
pub struct CentralStore {
    root: PathBuf,
}

impl CentralStore {
    /// Open (creating if necessary) a central store rooted at `root`.
    pub fn init(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        fs_err::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The path a blob with the given integrity lives at.
    pub fn blob_path(&self, integrity: &Integrity) -> PathBuf {
        let hex = integrity.hex();
        let (head, rest) = hex.split_at(2);
        self.root
            .join(integrity.algorithm().as_str())
            .join(head)
            .join(rest)
    }

    /// Whether the store already holds a copy of the blob.
    pub async fn has(&self, integrity: &Integrity) -> bool {
        fs_err::tokio::metadata(self.blob_path(integrity))
            .await
            .map(|metadata| metadata.is_file())
            .unwrap_or(false)
    }

    /// Copy a blob from the local cache into the store.
    pub async fn store_from(&self, integrity: &Integrity, source: &Path) -> io::Result<()> {
        let path = self.blob_path(integrity);
        fs_err::tokio::create_dir_all(path.parent().expect("blob path has a parent")).await?;
        let temp = tempfile::NamedTempFile::new_in(&self.root)?;
        fs_err::tokio::copy(source, temp.path()).await?;
        temp.persist(&path).map_err(|err| err.error)?;
        debug!("Stored {integrity} in central store at {}", path.display());
        Ok(())
    }
}
