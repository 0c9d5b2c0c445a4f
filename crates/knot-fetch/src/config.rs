use std::path::PathBuf;

use rustc_hash::FxHashMap;
use url::Url;

/// The default number of concurrently dispatched metadata retrievals.
pub const DEFAULT_CONCURRENCY: usize = 16;

/// Configuration for a [`crate::SourceManager`].
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// The default registry endpoint.
    pub registry: Url,
    /// Per-scope registry overrides: packages under `@scope/` route to the mapped endpoint.
    pub scope_registries: FxHashMap<String, Url>,
    /// The cache directory.
    pub cache_dir: PathBuf,
    /// The project root. Relative local paths resolve against it (unless requested by a
    /// package that is itself local).
    pub project_root: PathBuf,
    /// Maximum concurrently dispatched metadata retrievals.
    pub concurrency: usize,
    /// The retry budget for transient registry failures.
    pub retries: u32,
    /// Serve metadata exclusively from the cache; a miss is a policy error, never a fetch.
    pub force_cache_only: bool,
    /// When set, metadata retrieval over the network is disabled for the stated reason.
    pub remote_meta_disabled: Option<String>,
    /// When set, tarball retrieval over the network is disabled for the stated reason.
    pub remote_tarball_disabled: Option<String>,
    /// An optional shared content store that fetched tarballs are written through to.
    pub central_store: Option<PathBuf>,
}

impl FetchConfig {
    pub fn new(cache_dir: impl Into<PathBuf>, project_root: impl Into<PathBuf>) -> Self {
        Self {
            registry: Url::parse("https://registry.npmjs.org").expect("default registry URL"),
            scope_registries: FxHashMap::default(),
            cache_dir: cache_dir.into(),
            project_root: project_root.into(),
            concurrency: DEFAULT_CONCURRENCY,
            retries: 3,
            force_cache_only: false,
            remote_meta_disabled: None,
            remote_tarball_disabled: None,
            central_store: None,
        }
    }
}
