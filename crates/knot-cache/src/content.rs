use std::io::{self, Write};
use std::path::{Path, PathBuf};

use sha1::Sha1;
use sha2::{Digest, Sha512};
use tracing::debug;

use knot_types::{Integrity, IntegrityAlgorithm};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("content digest mismatch: expected {expected}, computed {actual}")]
    Mismatch {
        expected: Integrity,
        actual: Integrity,
    },
}

/// The content-addressable blob store: tarballs keyed by integrity digest.
///
/// Writes stage into a temporary file in the cache root and are renamed into place, so
/// concurrent writers for the same digest land on identical content and the last rename wins
/// harmlessly.
#[derive(Debug, Clone)]
pub struct ContentStore {
    /// The content bucket directory.
    root: PathBuf,
    /// Where to stage in-progress writes (the cache root, same filesystem).
    staging: PathBuf,
}

impl ContentStore {
    pub(crate) fn new(root: PathBuf, staging: PathBuf) -> Self {
        Self { root, staging }
    }

    /// The path a blob with the given integrity lives at.
    pub fn blob_path(&self, integrity: &Integrity) -> PathBuf {
        let hex = integrity.hex();
        let (head, rest) = hex.split_at(2);
        let (mid, tail) = rest.split_at(2);
        self.root
            .join(integrity.algorithm().as_str())
            .join(head)
            .join(mid)
            .join(tail)
    }

    /// Whether a blob with the given integrity is present.
    pub fn has(&self, integrity: &Integrity) -> bool {
        self.blob_path(integrity).is_file()
    }

    /// Open a blob for streaming reads.
    pub async fn open(&self, integrity: &Integrity) -> io::Result<fs_err::tokio::File> {
        fs_err::tokio::File::open(self.blob_path(integrity)).await
    }

    /// Start a staged write into the store.
    pub fn writer(&self) -> io::Result<ContentWriter> {
        fs_err::create_dir_all(&self.staging)?;
        let temp = tempfile::NamedTempFile::new_in(&self.staging)?;
        Ok(ContentWriter {
            store: self.clone(),
            temp,
            hasher: Sha512::new(),
            legacy_hasher: Sha1::new(),
        })
    }
}

/// An in-progress content write: hashes while writing, commits by rename.
///
/// Both digests are computed on the way through, so a legacy SHA-1 expectation can be
/// verified just like a modern one.
pub struct ContentWriter {
    store: ContentStore,
    temp: tempfile::NamedTempFile,
    hasher: Sha512,
    legacy_hasher: Sha1,
}

impl ContentWriter {
    /// Commit the written content.
    ///
    /// With an expected integrity the blob is stored under that key, after verifying it
    /// against the digest computed for the expectation's algorithm. Without an expectation
    /// the blob is stored under its computed SHA-512 digest. Returns the integrity the blob
    /// is addressable by.
    pub fn commit(mut self, expected: Option<&Integrity>) -> Result<Integrity, Error> {
        self.temp.flush()?;
        let computed = Integrity::from_sha512(self.hasher.finalize().to_vec());

        let key = match expected {
            Some(expected) => {
                let actual = match expected.algorithm() {
                    IntegrityAlgorithm::Sha512 => computed,
                    IntegrityAlgorithm::Sha1 => {
                        Integrity::from_sha1(self.legacy_hasher.finalize().to_vec())
                    }
                };
                if *expected != actual {
                    return Err(Error::Mismatch {
                        expected: expected.clone(),
                        actual,
                    });
                }
                expected.clone()
            }
            None => computed,
        };

        let path = self.store.blob_path(&key);
        fs_err::create_dir_all(path.parent().expect("blob path has a parent"))?;
        self.temp.persist(&path).map_err(|err| err.error)?;
        debug!("Stored content blob {key} at {}", path.display());
        Ok(key)
    }

    /// The staged file, for handing to blocking writers.
    pub fn staged_path(&self) -> &Path {
        self.temp.path()
    }
}

impl Write for ContentWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = self.temp.write(buf)?;
        self.hasher.update(&buf[..written]);
        self.legacy_hasher.update(&buf[..written]);
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.temp.flush()
    }
}
