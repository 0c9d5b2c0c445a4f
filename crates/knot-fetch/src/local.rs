use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use dashmap::DashMap;
use tracing::debug;

use knot_types::{
    LocalKind, Manifest, PackageMeta, PackageRequest, SourceKind, load_descriptor,
    local_version_id,
};

use crate::error::Error;

/// Resolves local-directory specs and keeps their records canonical.
///
/// Records are indexed by resolved directory as well as by `(name, local id)`, so every spec
/// naming the same directory shares one record and one set of spec aliases.
#[derive(Debug, Default)]
pub(crate) struct LocalIndex {
    by_path: DashMap<PathBuf, Arc<PackageMeta>>,
    by_version: DashMap<(String, String), Arc<PackageMeta>>,
}

impl LocalIndex {
    /// Interpret a spec as a filesystem path, if it is one.
    pub(crate) fn spec_path(spec: &str) -> Option<PathBuf> {
        if let Some(path) = spec.strip_prefix("file:") {
            return Some(PathBuf::from(path));
        }
        if spec.starts_with('/') || spec.starts_with("./") || spec.starts_with("../") {
            return Some(PathBuf::from(spec));
        }
        if let Some(rest) = spec.strip_prefix("~/") {
            return etcetera::home_dir().ok().map(|home| home.join(rest));
        }
        None
    }

    pub(crate) fn resolve(
        &self,
        request: &PackageRequest,
        project_root: &Path,
    ) -> Result<Arc<PackageMeta>, Error> {
        let SourceKind::Local(kind) = request.kind else {
            return Err(Error::NotFound(request.id()));
        };
        let requested =
            Self::spec_path(&request.spec).ok_or_else(|| Error::NotFound(request.id()))?;

        let dir = if requested.is_absolute() {
            requested.clone()
        } else if let Some(parent) = request.parent.as_ref().filter(|parent| parent.local) {
            parent.dir.join(&requested)
        } else {
            project_root.join(&requested)
        };
        // Canonical so `./pkg` and `file:pkg` land on one record.
        let dir = fs_err::canonicalize(&dir).map_err(|_| Error::NotFound(request.id()))?;

        if let Some(existing) = self.by_path.get(&dir) {
            let meta = Arc::clone(existing.value());
            drop(existing);
            if let Some(local_id) = meta.local_id.clone() {
                meta.add_alias(&request.spec, &local_id);
            }
            return Ok(meta);
        }

        let mut manifest = load_descriptor(&dir)?;
        let local_id = local_version_id(&manifest.version, kind);
        debug!("Resolved {} to local directory {}", request.id(), dir.display());

        manifest.dist.local_path = Some(requested);
        manifest.dist.full_path = Some(dir.clone());
        manifest.version = local_id.clone();

        let meta = Arc::new(build_local_meta(request, manifest, kind, &local_id));
        // Two racing resolutions for the same directory keep the first record.
        let meta = match self.by_path.entry(dir) {
            dashmap::mapref::entry::Entry::Occupied(entry) => Arc::clone(entry.get()),
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(Arc::clone(&meta));
                meta
            }
        };
        meta.add_alias(&request.spec, &local_id);
        self.by_version
            .insert((request.name.clone(), local_id), Arc::clone(&meta));
        Ok(meta)
    }

    /// Look up a previously resolved local record by its synthesized version id.
    pub(crate) fn by_version(&self, name: &str, version: &str) -> Option<Arc<PackageMeta>> {
        self.by_version
            .get(&(name.to_string(), version.to_string()))
            .map(|entry| Arc::clone(entry.value()))
    }
}

fn build_local_meta(
    request: &PackageRequest,
    manifest: Manifest,
    kind: LocalKind,
    local_id: &str,
) -> PackageMeta {
    let mut versions = BTreeMap::new();
    versions.insert(local_id.to_string(), manifest);
    let mut dist_tags = BTreeMap::new();
    dist_tags.insert("latest".to_string(), local_id.to_string());
    PackageMeta {
        name: request.name.clone(),
        versions,
        dist_tags,
        spec_aliases: RwLock::new(BTreeMap::from([(
            request.spec.clone(),
            local_id.to_string(),
        )])),
        local: Some(kind),
        local_id: Some(local_id.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use knot_types::{LocalKind, PackageRequest, ParentRequest, SourceKind};

    use super::LocalIndex;

    fn write_package(dir: &std::path::Path, name: &str, version: &str) {
        fs_err::create_dir_all(dir).unwrap();
        fs_err::write(
            dir.join("package.json"),
            format!(r#"{{"name": "{name}", "version": "{version}"}}"#),
        )
        .unwrap();
    }

    #[test]
    fn specs_naming_the_same_directory_share_one_record() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("pkg-a");
        write_package(&dir, "pkg-a", "1.2.3");

        let index = LocalIndex::default();
        let relative =
            PackageRequest::new("pkg-a", "./pkg-a", SourceKind::Local(LocalKind::Link));
        let file_form =
            PackageRequest::new("pkg-a", "file:pkg-a", SourceKind::Local(LocalKind::Link));

        let first = index.resolve(&relative, root.path()).unwrap();
        let second = index.resolve(&file_form, root.path()).unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        let local_id = "1.2.3-knotlocal.sym";
        assert_eq!(first.local_id.as_deref(), Some(local_id));
        assert_eq!(first.alias("./pkg-a").as_deref(), Some(local_id));
        assert_eq!(first.alias("file:pkg-a").as_deref(), Some(local_id));
        assert_eq!(first.dist_tags["latest"], local_id);

        let manifest = first.manifest(local_id).unwrap();
        assert_eq!(manifest.version, local_id);
        assert_eq!(
            manifest.dist.full_path.as_deref(),
            Some(fs_err::canonicalize(&dir).unwrap().as_path())
        );

        let by_version = index.by_version("pkg-a", local_id).unwrap();
        assert!(Arc::ptr_eq(&first, &by_version));
    }

    #[test]
    fn relative_specs_resolve_against_a_local_parent() {
        let root = tempfile::tempdir().unwrap();
        let parent_dir = root.path().join("parent");
        let nested = parent_dir.join("nested");
        write_package(&nested, "nested", "0.1.0");

        let index = LocalIndex::default();
        let request = PackageRequest::new("nested", "./nested", SourceKind::Local(LocalKind::Hard))
            .with_parent(ParentRequest {
                dir: parent_dir.clone(),
                local: true,
            });
        let meta = index.resolve(&request, root.path()).unwrap();
        assert_eq!(meta.local_id.as_deref(), Some("0.1.0-knotlocal.hard"));

        // A non-local parent resolves against the project root instead, where the directory
        // does not exist.
        let from_root = PackageRequest::new("nested", "./nested", SourceKind::Local(LocalKind::Hard))
            .with_parent(ParentRequest {
                dir: parent_dir,
                local: false,
            });
        assert!(index.resolve(&from_root, root.path()).is_err());
    }

    #[test]
    fn non_path_specs_are_rejected() {
        let root = tempfile::tempdir().unwrap();
        let index = LocalIndex::default();
        let request = PackageRequest::new("pkg", "^1.0.0", SourceKind::Local(LocalKind::Link));
        assert!(index.resolve(&request, root.path()).is_err());
    }
}
