use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::integrity::{Integrity, IntegrityError};
use crate::request::LocalKind;

/// Manifest fields that are heavy and never needed for dependency resolution.
const HEAVY_FIELDS: &[&str] = &["readme", "readmeFilename"];

/// Synthesize the version id under which a local-directory package is recorded.
///
/// Combines the declared version with the linkage-mode tag so the id cannot collide with any
/// registry version string.
pub fn local_version_id(version: &str, kind: LocalKind) -> String {
    format!("{version}-knotlocal.{}", kind.tag())
}

/// The distribution sub-record of a manifest: where the content lives and how to verify it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DistInfo {
    /// A modern subresource-integrity digest, e.g. `sha512-…`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integrity: Option<String>,
    /// A legacy hex-encoded SHA-1 checksum, still served by older registry records.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shasum: Option<String>,
    /// The tarball address. For synthetic (git/url) manifests this is a marker string
    /// embedding the original request rather than a real URL; see
    /// [`crate::RemoteSpecMark`].
    #[serde(default)]
    pub tarball: String,
    /// The exact, commit-pinned source locator a git/url spec resolved to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved: Option<String>,
    /// For local-directory records: the path as requested.
    #[serde(default, rename = "localPath", skip_serializing_if = "Option::is_none")]
    pub local_path: Option<PathBuf>,
    /// For local-directory records: the resolved absolute directory.
    #[serde(default, rename = "fullPath", skip_serializing_if = "Option::is_none")]
    pub full_path: Option<PathBuf>,
}

/// One resolved version's full descriptor.
///
/// The known field set is typed; everything else the upstream document carries is preserved
/// verbatim in the `extra` bag so synthetic manifests round-trip faithfully.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dependencies: BTreeMap<String, String>,
    #[serde(
        default,
        rename = "optionalDependencies",
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub optional_dependencies: BTreeMap<String, String>,
    #[serde(default)]
    pub dist: DistInfo,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Manifest {
    /// The `name@version` id of this manifest.
    pub fn id(&self) -> String {
        format!("{}@{}", self.name, self.version)
    }

    /// Derive the content integrity for this manifest.
    ///
    /// Prefers the modern digest; falls back to re-encoding the legacy checksum. Absence of
    /// both is a data error, never cached positively.
    pub fn integrity(&self) -> Result<Integrity, IntegrityError> {
        if let Some(integrity) = self.dist.integrity.as_deref() {
            return integrity.parse();
        }
        if let Some(shasum) = self.dist.shasum.as_deref() {
            return Integrity::from_hex_shasum(shasum);
        }
        Err(IntegrityError::Missing)
    }

    /// Drop large fields that resolution never looks at.
    pub fn strip_heavy_fields(&mut self) {
        for field in HEAVY_FIELDS {
            self.extra.remove(*field);
        }
    }
}

/// Everything known about a package name from one source: a packument for registry packages,
/// or a synthetic single-version record for git/url/local sources.
///
/// Created once per resolution key and shared for the process lifetime; `spec_aliases` is the
/// only field mutated after resolution completes.
#[derive(Debug, Deserialize)]
pub struct PackageMeta {
    pub name: String,
    #[serde(default)]
    pub versions: BTreeMap<String, Manifest>,
    #[serde(default, rename = "dist-tags")]
    pub dist_tags: BTreeMap<String, String>,
    /// Original requested spec → resolved version string, for specs that bypass semver
    /// matching (git/url specs, local paths).
    #[serde(skip)]
    pub spec_aliases: RwLock<BTreeMap<String, String>>,
    /// Set for local-directory records: the linkage mode.
    #[serde(skip)]
    pub local: Option<LocalKind>,
    /// Set for local-directory records: the synthesized local version id.
    #[serde(skip)]
    pub local_id: Option<String>,
}

impl PackageMeta {
    /// Build a synthetic single-version record, aliasing the originally requested spec to the
    /// resolved version.
    pub fn single(name: impl Into<String>, spec: &str, manifest: Manifest) -> Self {
        let version = manifest.version.clone();
        let mut versions = BTreeMap::new();
        versions.insert(version.clone(), manifest);
        Self {
            name: name.into(),
            versions,
            dist_tags: BTreeMap::new(),
            spec_aliases: RwLock::new(BTreeMap::from([(spec.to_string(), version)])),
            local: None,
            local_id: None,
        }
    }

    pub fn manifest(&self, version: &str) -> Option<&Manifest> {
        self.versions.get(version)
    }

    /// The resolved version a previously seen spec aliases to.
    pub fn alias(&self, spec: &str) -> Option<String> {
        self.spec_aliases
            .read()
            .expect("alias map lock poisoned")
            .get(spec)
            .cloned()
    }

    pub fn add_alias(&self, spec: &str, version: &str) {
        self.spec_aliases
            .write()
            .expect("alias map lock poisoned")
            .insert(spec.to_string(), version.to_string());
    }

    /// Drop large fields from every version's manifest.
    pub fn strip_heavy_fields(&mut self) {
        for manifest in self.versions.values_mut() {
            manifest.strip_heavy_fields();
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DescriptorError {
    #[error("no package descriptor found at `{0}`")]
    NotFound(PathBuf),
    #[error("failed to read package descriptor at `{0}`")]
    Io(PathBuf, #[source] std::io::Error),
    #[error("failed to parse package descriptor at `{0}`")]
    Parse(PathBuf, #[source] serde_json::Error),
}

/// Read and parse the `package.json` descriptor of a package directory.
pub fn load_descriptor(dir: &Path) -> Result<Manifest, DescriptorError> {
    let path = dir.join("package.json");
    let contents = match fs_err::read(&path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(DescriptorError::NotFound(path));
        }
        Err(err) => return Err(DescriptorError::Io(path, err)),
    };
    serde_json::from_slice(&contents).map_err(|err| DescriptorError::Parse(path, err))
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use crate::request::LocalKind;

    use super::{DescriptorError, Manifest, PackageMeta, load_descriptor, local_version_id};

    #[test]
    fn modern_digest_wins_over_legacy_checksum() {
        let manifest: Manifest = serde_json::from_value(serde_json::json!({
            "name": "left-pad",
            "version": "1.3.0",
            "dist": {
                "integrity": "sha512-uFEddnPGnEEKeHPYbZ1JdEl1+dMkM69ZZb5cGusCde9cZyaw1I9TU8oSvMU5yuAFqjyHQiQGJgtTDqwurRRLxw==",
                "shasum": "0beec7b5ea3f0fdbc95d0dd47f3c5bc275da8a33",
                "tarball": "https://registry.npmjs.org/left-pad/-/left-pad-1.3.0.tgz"
            }
        }))
        .unwrap();
        assert!(manifest.integrity().unwrap().to_string().starts_with("sha512-"));
    }

    #[test]
    fn legacy_checksum_is_the_fallback() {
        let manifest: Manifest = serde_json::from_value(serde_json::json!({
            "name": "left-pad",
            "version": "0.0.3",
            "dist": {
                "shasum": "0beec7b5ea3f0fdbc95d0dd47f3c5bc275da8a33",
                "tarball": "https://registry.npmjs.org/left-pad/-/left-pad-0.0.3.tgz"
            }
        }))
        .unwrap();
        assert_eq!(
            manifest.integrity().unwrap().to_string(),
            "sha1-C+7Hteo/D9vJXQ3UfzxbwnXaijM="
        );
    }

    #[test]
    fn missing_integrity_is_an_error() {
        let manifest: Manifest = serde_json::from_value(serde_json::json!({
            "name": "left-pad",
            "version": "0.0.1",
        }))
        .unwrap();
        assert!(manifest.integrity().is_err());
    }

    #[test]
    fn extension_bag_preserves_unknown_fields_and_strips_heavy_ones() {
        let mut manifest: Manifest = serde_json::from_value(serde_json::json!({
            "name": "left-pad",
            "version": "1.3.0",
            "readme": "a very long readme",
            "engines": { "node": ">=0.10.0" },
        }))
        .unwrap();
        assert!(manifest.extra.contains_key("readme"));
        manifest.strip_heavy_fields();
        assert!(!manifest.extra.contains_key("readme"));
        assert_eq!(
            manifest.extra["engines"],
            serde_json::json!({ "node": ">=0.10.0" })
        );
    }

    #[test]
    fn local_version_ids_carry_the_linkage_tag() {
        assert_eq!(local_version_id("1.2.3", LocalKind::Link), "1.2.3-knotlocal.sym");
        assert_eq!(local_version_id("1.2.3", LocalKind::Hard), "1.2.3-knotlocal.hard");
    }

    #[test]
    fn single_version_records_alias_the_requested_spec() {
        let manifest: Manifest = serde_json::from_value(serde_json::json!({
            "name": "repo",
            "version": "2.0.0",
        }))
        .unwrap();
        let meta = PackageMeta::single("repo", "git+https://example.com/repo", manifest);
        assert_eq!(
            meta.alias("git+https://example.com/repo").as_deref(),
            Some("2.0.0")
        );
        meta.add_alias("git+https://example.com/repo#main", "2.0.0");
        assert_eq!(
            meta.alias("git+https://example.com/repo#main").as_deref(),
            Some("2.0.0")
        );
    }

    #[test]
    fn descriptor_loading() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            load_descriptor(dir.path()),
            Err(DescriptorError::NotFound(_))
        ));

        let mut file = fs_err::File::create(dir.path().join("package.json")).unwrap();
        file.write_all(br#"{"name": "local-pkg", "version": "0.1.0"}"#)
            .unwrap();
        let manifest = load_descriptor(dir.path()).unwrap();
        assert_eq!(manifest.id(), "local-pkg@0.1.0");

        fs_err::write(dir.path().join("package.json"), b"not json").unwrap();
        assert!(matches!(
            load_descriptor(dir.path()),
            Err(DescriptorError::Parse(..))
        ));
    }
}
