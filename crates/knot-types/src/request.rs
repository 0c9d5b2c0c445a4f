use std::fmt::{Display, Formatter};
use std::path::PathBuf;

/// How a remote (non-registry, non-local) spec is retrieved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteKind {
    /// A git repository spec, e.g. `git+https://github.com/user/repo#branch`.
    Git,
    /// A plain URL pointing at a tarball.
    Tarball,
}

impl RemoteKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Git => "git",
            Self::Tarball => "url",
        }
    }
}

impl Display for RemoteKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The linkage mode for a local-directory dependency.
///
/// Folded into the synthesized local version id so that a local resolution can never collide
/// with a registry version string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LocalKind {
    /// The package directory is linked into place.
    Link,
    /// The package directory is copied (hard) into place.
    Hard,
}

impl LocalKind {
    pub fn tag(self) -> &'static str {
        match self {
            Self::Link => "sym",
            Self::Hard => "hard",
        }
    }
}

/// The source a package spec resolves against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    /// A semver range against the configured registry.
    Registry,
    /// A git repository or direct tarball URL.
    Remote(RemoteKind),
    /// A directory on the local filesystem.
    Local(LocalKind),
}

impl SourceKind {
    /// The tag used to build a resolution key, so that e.g. a registry request and a git
    /// request for the same name never share a memoized record.
    pub fn key_tag(self) -> &'static str {
        match self {
            Self::Registry => "semver",
            Self::Remote(kind) => kind.as_str(),
            Self::Local(_) => "local",
        }
    }
}

/// What nested local-path resolution needs to know about the requesting package.
#[derive(Debug, Clone)]
pub struct ParentRequest {
    /// The directory of the requesting package.
    pub dir: PathBuf,
    /// Whether the requesting package is itself a local-directory dependency. Relative specs
    /// resolve against `dir` only in that case; otherwise they resolve against the project root.
    pub local: bool,
}

/// One package resolution request. Immutable once constructed.
#[derive(Debug, Clone)]
pub struct PackageRequest {
    pub name: String,
    /// The requested spec: a semver range, a git/URL spec, or a filesystem path.
    pub spec: String,
    pub kind: SourceKind,
    pub parent: Option<ParentRequest>,
}

impl PackageRequest {
    pub fn new(name: impl Into<String>, spec: impl Into<String>, kind: SourceKind) -> Self {
        Self {
            name: name.into(),
            spec: spec.into(),
            kind,
            parent: None,
        }
    }

    #[must_use]
    pub fn with_parent(mut self, parent: ParentRequest) -> Self {
        self.parent = Some(parent);
        self
    }

    /// The stable resolution key for this request: one memoized record per `(name, kind)`.
    pub fn meta_key(&self) -> String {
        format!("{}@{}", self.name, self.kind.key_tag())
    }

    /// The `name@spec` id used for log lines and network retrieval.
    pub fn id(&self) -> String {
        format!("{}@{}", self.name, self.spec)
    }
}

#[cfg(test)]
mod tests {
    use super::{PackageRequest, RemoteKind, SourceKind};

    #[test]
    fn meta_keys_separate_source_kinds() {
        let registry = PackageRequest::new("left-pad", "^1.0.0", SourceKind::Registry);
        let git = PackageRequest::new(
            "left-pad",
            "git+https://github.com/left-pad/left-pad",
            SourceKind::Remote(RemoteKind::Git),
        );
        assert_eq!(registry.meta_key(), "left-pad@semver");
        assert_eq!(git.meta_key(), "left-pad@git");
        assert_ne!(registry.meta_key(), git.meta_key());
    }
}
