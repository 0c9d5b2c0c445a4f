use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use futures::TryStreamExt;
use tracing::{debug, warn};
use url::Url;

use knot_cache::{Cache, GitTarballRecord};
use knot_client::RegistryClient;
use knot_git::{GitCheckout, GitSource, GitSpec};
use knot_types::{
    Integrity, Manifest, PackageMeta, PackageRequest, RemoteKind, RemoteSpecMark, SourceKind,
    load_descriptor,
};

use crate::error::Error;
use crate::installer::DependencyInstaller;

/// What a remote retrieval produced before the continuation runs.
enum CloneOutcome {
    /// A git clone was captured as a directory. Installing and packing are still pending, and
    /// are skipped entirely when the commit-pinned locator already has a cached tarball.
    Redirected(GitCheckout),
    /// The content arrived already packed (plain-URL tarballs) and sits in the content store.
    Packed {
        integrity: Integrity,
        resolved: String,
        manifest: Manifest,
    },
}

/// Resolves git and plain-URL specs into synthetic single-version records, materializing
/// their tarballs into the content store on the way.
#[derive(Clone)]
pub(crate) struct RemoteResolver {
    cache: Cache,
    client: RegistryClient,
    installer: Arc<dyn DependencyInstaller>,
}

impl RemoteResolver {
    pub(crate) fn new(
        cache: Cache,
        client: RegistryClient,
        installer: Arc<dyn DependencyInstaller>,
    ) -> Self {
        Self {
            cache,
            client,
            installer,
        }
    }

    pub(crate) async fn resolve(
        &self,
        request: &PackageRequest,
    ) -> Result<Arc<PackageMeta>, Error> {
        let manifest = self.resolve_manifest(request).await?;
        Ok(Arc::new(PackageMeta::single(
            request.name.clone(),
            &request.spec,
            manifest,
        )))
    }

    /// Resolve a remote request down to a single synthetic manifest.
    pub(crate) async fn resolve_manifest(
        &self,
        request: &PackageRequest,
    ) -> Result<Manifest, Error> {
        let SourceKind::Remote(kind) = request.kind else {
            return Err(Error::NotFound(request.id()));
        };

        // Staging keeps clone work (and the captured checkout) inside the cache root; dropping
        // the guard discards the checkout whether or not it was packed.
        let _staging;
        let outcome = match kind {
            RemoteKind::Git => {
                let staging = self.cache.staging_dir().map_err(Error::CacheWrite)?;
                let outcome = self.retrieve_git(request, staging.path()).await?;
                _staging = Some(staging);
                outcome
            }
            RemoteKind::Tarball => {
                _staging = None;
                self.retrieve_url(request).await?
            }
        };

        match outcome {
            CloneOutcome::Redirected(checkout) => self.pack_checkout(request, checkout).await,
            CloneOutcome::Packed {
                integrity,
                resolved,
                manifest,
            } => {
                let record = GitTarballRecord {
                    integrity: integrity.clone(),
                    manifest: manifest.clone(),
                };
                if let Err(err) = self.cache.write_git_tarball(&request.name, &resolved, &record)
                {
                    warn!("Failed to record tarball for {resolved}: {err}");
                }
                Ok(synthesize(request, manifest, &integrity, &resolved))
            }
        }
    }

    /// Clone once. The cache key is the commit-pinned locator, which only the clone can
    /// discover for branch/tag/default specs, so the clone always happens.
    async fn retrieve_git(
        &self,
        request: &PackageRequest,
        staging: &Path,
    ) -> Result<CloneOutcome, Error> {
        let spec = GitSpec::parse(&request.spec).map_err(|err| Error::Git(err.into()))?;
        let source = GitSource::new(spec, staging.join("clone"));
        let checkout = tokio::task::spawn_blocking(move || source.fetch())
            .await?
            .map_err(Error::Git)?;
        Ok(CloneOutcome::Redirected(checkout))
    }

    /// Download a plain-URL tarball into the content store, unless the URL was downloaded
    /// before and its blob survives.
    async fn retrieve_url(&self, request: &PackageRequest) -> Result<CloneOutcome, Error> {
        let url =
            Url::parse(&request.spec).map_err(|err| Error::Url(request.spec.clone(), err))?;
        let resolved = url.to_string();

        if let Some(record) = self.cached_record(&request.name, &resolved) {
            debug!("Found cached tarball for {resolved}");
            return Ok(CloneOutcome::Packed {
                integrity: record.integrity,
                resolved,
                manifest: record.manifest,
            });
        }

        let response = self.client.stream_tarball(&url).await?;
        let mut writer = self.cache.content().writer().map_err(Error::CacheWrite)?;
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.try_next().await.map_err(knot_client::Error::from)? {
            writer.write_all(&chunk).map_err(Error::CacheWrite)?;
        }
        let integrity = writer.commit(None)?;

        let blob = self.cache.content().blob_path(&integrity);
        let manifest =
            tokio::task::spawn_blocking(move || crate::archive::read_descriptor(&blob)).await??;
        Ok(CloneOutcome::Packed {
            integrity,
            resolved,
            manifest,
        })
    }

    /// The install-and-pack continuation for a captured checkout.
    async fn pack_checkout(
        &self,
        request: &PackageRequest,
        checkout: GitCheckout,
    ) -> Result<Manifest, Error> {
        // A cached tarball for the pinned commit skips install and pack entirely; the
        // captured checkout is simply discarded.
        if let Some(record) = self.cached_record(&request.name, &checkout.resolved) {
            debug!("Found cached tarball for {}", checkout.resolved);
            return Ok(synthesize(
                request,
                record.manifest,
                &record.integrity,
                &checkout.resolved,
            ));
        }

        self.installer
            .install(&checkout.dir)
            .await
            .map_err(Error::Install)?;

        let writer = self.cache.content().writer().map_err(Error::CacheWrite)?;
        let dir = checkout.dir.clone();
        let integrity =
            tokio::task::spawn_blocking(move || crate::archive::pack_dir(&dir, writer)).await??;

        // The install may have rewritten the descriptor; re-read it.
        let manifest = load_descriptor(&checkout.dir)?;
        let record = GitTarballRecord {
            integrity: integrity.clone(),
            manifest: manifest.clone(),
        };
        if let Err(err) = self
            .cache
            .write_git_tarball(&request.name, &checkout.resolved, &record)
        {
            warn!("Failed to record tarball for {}: {err}", checkout.resolved);
        }
        Ok(synthesize(request, manifest, &integrity, &checkout.resolved))
    }

    /// A cached record is only usable while its blob is still in the content store.
    fn cached_record(&self, name: &str, resolved: &str) -> Option<GitTarballRecord> {
        self.cache
            .read_git_tarball(name, resolved)
            .filter(|record| self.cache.content().has(&record.integrity))
    }
}

/// Stamp a descriptor into the synthetic manifest for a resolved remote spec: verified
/// integrity, the exact locator, and a marked tarball address embedding the original request.
fn synthesize(
    request: &PackageRequest,
    mut manifest: Manifest,
    integrity: &Integrity,
    resolved: &str,
) -> Manifest {
    manifest.dist.integrity = Some(integrity.to_string());
    manifest.dist.resolved = Some(resolved.to_string());
    manifest.dist.tarball = RemoteSpecMark {
        kind: request.kind.key_tag().to_string(),
        spec: request.spec.clone(),
        resolved: resolved.to_string(),
        id: manifest.id(),
    }
    .encode();
    manifest
}
