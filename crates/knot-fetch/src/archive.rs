use std::io;
use std::path::Path;

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;

use knot_cache::ContentWriter;
use knot_types::{Integrity, Manifest};

use crate::error::Error;

/// Pack a package directory into a gzipped tarball staged in the content store.
///
/// The directory lands under the conventional `package/` prefix. Blocking; run it under
/// `spawn_blocking`.
pub(crate) fn pack_dir(dir: &Path, writer: ContentWriter) -> Result<Integrity, Error> {
    let encoder = GzEncoder::new(writer, Compression::default());
    let mut builder = tar::Builder::new(encoder);
    builder.follow_symlinks(false);
    builder.append_dir_all("package", dir).map_err(Error::Archive)?;
    let writer = builder
        .into_inner()
        .map_err(Error::Archive)?
        .finish()
        .map_err(Error::Archive)?;
    Ok(writer.commit(None)?)
}

/// Read the package descriptor out of a gzipped tarball without unpacking it.
///
/// Accepts any single-root-folder layout, not just `package/`: repacked registry tarballs in
/// the wild use the package name as the folder. Blocking.
pub(crate) fn read_descriptor(archive: &Path) -> Result<Manifest, Error> {
    let file = fs_err::File::open(archive).map_err(Error::Archive)?;
    let mut tarball = tar::Archive::new(GzDecoder::new(file));
    for entry in tarball.entries().map_err(Error::Archive)? {
        let entry = entry.map_err(Error::Archive)?;
        let is_descriptor = {
            let path = entry.path().map_err(Error::Archive)?;
            let mut components = path.components();
            components.next().is_some() && components.as_path() == Path::new("package.json")
        };
        if is_descriptor {
            return serde_json::from_reader(entry)
                .map_err(|err| Error::Archive(io::Error::new(io::ErrorKind::InvalidData, err)));
        }
    }
    Err(Error::Archive(io::Error::new(
        io::ErrorKind::NotFound,
        format!("no package descriptor in {}", archive.display()),
    )))
}

#[cfg(test)]
mod tests {
    use knot_cache::Cache;

    use super::{pack_dir, read_descriptor};

    #[test]
    fn pack_then_read_the_descriptor_back() {
        let cache_dir = tempfile::tempdir().unwrap();
        let cache = Cache::init(cache_dir.path()).unwrap();

        let pkg = tempfile::tempdir().unwrap();
        fs_err::write(
            pkg.path().join("package.json"),
            br#"{"name": "demo", "version": "0.1.0"}"#,
        )
        .unwrap();
        fs_err::write(pkg.path().join("index.js"), b"module.exports = 1;").unwrap();

        let store = cache.content();
        let integrity = pack_dir(pkg.path(), store.writer().unwrap()).unwrap();
        assert!(store.has(&integrity));

        let manifest = read_descriptor(&store.blob_path(&integrity)).unwrap();
        assert_eq!(manifest.id(), "demo@0.1.0");
    }

    #[test]
    fn archives_without_a_descriptor_are_rejected() {
        let cache_dir = tempfile::tempdir().unwrap();
        let cache = Cache::init(cache_dir.path()).unwrap();

        let pkg = tempfile::tempdir().unwrap();
        fs_err::write(pkg.path().join("index.js"), b"module.exports = 1;").unwrap();

        let store = cache.content();
        let integrity = pack_dir(pkg.path(), store.writer().unwrap()).unwrap();
        assert!(read_descriptor(&store.blob_path(&integrity)).is_err());
    }
}
