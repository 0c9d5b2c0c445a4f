use std::future::Future;
use std::io::{self, Write};
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Instant;

use futures::TryStreamExt;
use futures::future::BoxFuture;
use tracing::{debug, warn};
use url::Url;

use knot_cache::{Cache, CentralStore};
use knot_client::{RegistryClient, RegistryClientBuilder};
use knot_flight::FlightMap;
use knot_types::{
    Integrity, Manifest, PackageMeta, PackageRequest, RemoteKind, RemoteSpecMark, SourceKind,
};

use crate::config::FetchConfig;
use crate::counters::{CountersSnapshot, FetchCounters};
use crate::error::Error;
use crate::installer::DependencyInstaller;
use crate::local::LocalIndex;
use crate::queue::FetchQueue;
use crate::remote::RemoteResolver;

/// The package-source acquisition layer: one shared front door for metadata and tarballs
/// across registry, git, URL, and local-directory sources.
///
/// Construct inside a runtime; the fetch queue spawns its watcher on creation.
pub struct SourceManager {
    config: FetchConfig,
    cache: Cache,
    client: RegistryClient,
    remote: RemoteResolver,
    local: LocalIndex,
    flights: FlightMap<String, Arc<PackageMeta>, Arc<Error>>,
    queue: FetchQueue,
    counters: Arc<FetchCounters>,
    central: Option<CentralStore>,
    last_status: Mutex<String>,
}

impl SourceManager {
    pub fn new(config: FetchConfig, installer: Arc<dyn DependencyInstaller>) -> io::Result<Self> {
        let cache = Cache::init(&config.cache_dir)?;
        let mut builder = RegistryClientBuilder::new(cache.clone())
            .registry(config.registry.clone())
            .retries(config.retries);
        for (scope, registry) in &config.scope_registries {
            builder = builder.scope_registry(scope.clone(), registry.clone());
        }
        let client = builder.build();
        let central = config
            .central_store
            .as_ref()
            .map(CentralStore::init)
            .transpose()?;
        let queue = FetchQueue::new(config.concurrency);

        Ok(Self {
            remote: RemoteResolver::new(cache.clone(), client.clone(), installer),
            cache,
            client,
            local: LocalIndex::default(),
            flights: FlightMap::default(),
            queue,
            counters: Arc::new(FetchCounters::default()),
            central,
            last_status: Mutex::new(String::new()),
            config,
        })
    }

    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    pub fn counters(&self) -> CountersSnapshot {
        self.counters.snapshot()
    }

    /// Whether the fetch queue has stopped dispatching after a failure.
    pub fn is_aborted(&self) -> bool {
        self.queue.is_aborted()
    }

    /// A one-line progress summary: waiting, in transit, done, plus the latest event.
    pub fn status_line(&self) -> String {
        let snapshot = self.counters.snapshot();
        let last = self.last_status.lock().expect("status lock poisoned").clone();
        format!(
            "({}⇨ {}⇨ {}) {last}",
            snapshot.waiting, snapshot.in_transit, snapshot.done
        )
    }

    fn set_status(&self, status: String) {
        *self.last_status.lock().expect("status lock poisoned") = status;
    }

    /// Resolve the metadata record for a request.
    ///
    /// Concurrent requests for the same `(name, source kind)` coalesce onto one resolution.
    /// Successes are memoized for the process lifetime; failures are shared with the requests
    /// that joined but leave the key retryable.
    pub async fn fetch_meta(&self, request: &PackageRequest) -> Result<Arc<PackageMeta>, Error> {
        if matches!(request.kind, SourceKind::Local(_)) {
            // Local records have their own canonicalizing index; nothing here can block.
            return self.local.resolve(request, &self.config.project_root);
        }

        let key = request.meta_key();
        if self.flights.register(key.clone()) {
            self.counters.queued();
            match self.resolve_meta(request).await {
                Ok(meta) => {
                    self.counters.completed();
                    self.flights.done(key, Arc::clone(&meta));
                    Ok(meta)
                }
                Err(err) => {
                    let shared = Arc::new(err);
                    self.flights.failed(key, Arc::clone(&shared));
                    Err(Error::Shared(shared))
                }
            }
        } else {
            match self.flights.wait(&key).await {
                Some(Ok(meta)) => {
                    // A distinct git/url spec for the same (name, kind) reuses the memoized
                    // record; record the spec so later stages can map it to the resolved
                    // version.
                    if matches!(request.kind, SourceKind::Remote(_))
                        && meta.alias(&request.spec).is_none()
                    {
                        if let Some(version) = meta.versions.keys().next() {
                            meta.add_alias(&request.spec, version);
                        }
                    }
                    Ok(meta)
                }
                Some(Err(err)) => Err(Error::Shared(err)),
                None => unreachable!("coalesced fetch disappeared"),
            }
        }
    }

    async fn resolve_meta(&self, request: &PackageRequest) -> Result<Arc<PackageMeta>, Error> {
        match request.kind {
            SourceKind::Registry => self.resolve_registry(request).await,
            SourceKind::Remote(_) => self.resolve_remote(request).await,
            SourceKind::Local(_) => unreachable!("local requests bypass the coalescer"),
        }
    }

    async fn resolve_registry(&self, request: &PackageRequest) -> Result<Arc<PackageMeta>, Error> {
        let cached = self.client.cached_packument(&request.name);

        if self.config.force_cache_only {
            self.counters.abandoned();
            return cached.map(Arc::new).ok_or_else(|| Error::PolicyDenied {
                reason: "cache-only mode is enabled".to_string(),
            });
        }
        if let Some(reason) = &self.config.remote_meta_disabled {
            self.counters.abandoned();
            debug!(
                "Remote metadata disabled ({reason}); serving {} from cache",
                request.name
            );
            return cached.map(Arc::new).ok_or_else(|| Error::PolicyDenied {
                reason: reason.clone(),
            });
        }

        let client = self.client.clone();
        let name = request.name.clone();
        let counters = Arc::clone(&self.counters);
        let started = Instant::now();
        let outcome = self
            .queue
            .enqueue(request.id(), async move {
                counters.started();
                let result = client.packument(&name).await;
                counters.finished();
                result.map_err(Error::from)
            })
            .await;

        match outcome {
            Ok(meta) => {
                self.set_status(format!(
                    "200 {:.1}s {}",
                    started.elapsed().as_secs_f32(),
                    request.name
                ));
                Ok(Arc::new(meta))
            }
            Err(Error::QueueAborted) => {
                // The job was rejected before it could leave the waiting state.
                self.counters.abandoned();
                Err(Error::QueueAborted)
            }
            Err(err) => {
                // Stale beats nothing: fall back to the cached copy on an upstream failure.
                if let (Error::Client(_), Some(cached)) = (&err, cached) {
                    warn!(
                        "Using cached packument for {} after fetch failure: {err}",
                        request.name
                    );
                    return Ok(Arc::new(cached));
                }
                Err(err)
            }
        }
    }

    async fn resolve_remote(&self, request: &PackageRequest) -> Result<Arc<PackageMeta>, Error> {
        if self.config.force_cache_only {
            self.counters.abandoned();
            return Err(Error::PolicyDenied {
                reason: "cache-only mode is enabled".to_string(),
            });
        }
        if let Some(reason) = &self.config.remote_meta_disabled {
            self.counters.abandoned();
            return Err(Error::PolicyDenied {
                reason: reason.clone(),
            });
        }

        let resolver = self.remote.clone();
        let req = request.clone();
        let counters = Arc::clone(&self.counters);
        let started = Instant::now();
        let outcome = self
            .queue
            .enqueue(request.id(), async move {
                counters.started();
                let result = resolver.resolve(&req).await;
                counters.finished();
                result
            })
            .await;

        match &outcome {
            Ok(_) => self.set_status(format!(
                "{} {:.1}s",
                request.id(),
                started.elapsed().as_secs_f32()
            )),
            Err(Error::QueueAborted) => self.counters.abandoned(),
            Err(_) => {}
        }
        outcome
    }

    /// The canonical record for a previously resolved local directory, by synthesized id.
    pub fn local_record(&self, name: &str, version: &str) -> Option<Arc<PackageMeta>> {
        self.local.by_version(name, version)
    }

    /// Ensure the tarball for a resolved manifest is available locally (or centrally).
    ///
    /// Content-store hits return without touching the network. Misses download registry
    /// tarballs (verifying a SHA-512 expectation en route) or re-run the git/url retrieval
    /// embedded in the manifest's marked tarball address. With a central store configured,
    /// the blob is written through and the central address is returned.
    pub fn fetch_tarball(&self, manifest: &Manifest) -> TarballFetch<'_> {
        let manifest = manifest.clone();
        TarballFetch {
            started_at: Instant::now(),
            future: Box::pin(async move { self.tarball(manifest).await }),
        }
    }

    async fn tarball(&self, manifest: Manifest) -> Result<TarballSource, Error> {
        let mut integrity = manifest.integrity().map_err(|source| Error::Integrity {
            id: manifest.id(),
            source,
        })?;
        let content = self.cache.content();

        if !content.has(&integrity) {
            if let Some(reason) = &self.config.remote_tarball_disabled {
                return Err(Error::PolicyDenied {
                    reason: reason.clone(),
                });
            }
            integrity = self.retrieve_tarball(&manifest, integrity).await?;
        }

        let path = content.blob_path(&integrity);
        if let Some(central) = &self.central {
            if !central.has(&integrity).await {
                central
                    .store_from(&integrity, &path)
                    .await
                    .map_err(Error::CacheWrite)?;
            }
            return Ok(TarballSource::Central { integrity });
        }
        Ok(TarballSource::Local { integrity, path })
    }

    async fn retrieve_tarball(
        &self,
        manifest: &Manifest,
        expected: Integrity,
    ) -> Result<Integrity, Error> {
        if let Some(mark) = RemoteSpecMark::decode(&manifest.dist.tarball) {
            // A synthetic (git/url) tarball: re-run the retrieval for the original spec. The
            // resolver repopulates the content store and its sidecar record on the way, and
            // may land on a fresh digest if the source moved.
            debug!("Re-resolving {} for its tarball", mark.id);
            let kind = if mark.kind == RemoteKind::Git.as_str() {
                RemoteKind::Git
            } else {
                RemoteKind::Tarball
            };
            let request =
                PackageRequest::new(manifest.name.clone(), mark.spec, SourceKind::Remote(kind));
            let fresh = self.remote.resolve_manifest(&request).await?;
            return fresh.integrity().map_err(|source| Error::Integrity {
                id: fresh.id(),
                source,
            });
        }

        let url = Url::parse(&manifest.dist.tarball)
            .map_err(|err| Error::Url(manifest.dist.tarball.clone(), err))?;
        debug!("Downloading {} from {url}", manifest.id());
        let response = self.client.stream_tarball(&url).await?;
        let mut writer = self.cache.content().writer().map_err(Error::CacheWrite)?;
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.try_next().await.map_err(knot_client::Error::from)? {
            writer.write_all(&chunk).map_err(Error::CacheWrite)?;
        }
        Ok(writer.commit(Some(&expected))?)
    }
}

/// Where a fetched tarball ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TarballSource {
    /// The blob sits in the local content store at `path`.
    Local { integrity: Integrity, path: PathBuf },
    /// The blob is guaranteed present in the configured central store.
    Central { integrity: Integrity },
}

/// An in-progress tarball fetch. Exposes when the fetch started so callers can report
/// long-running transfers while awaiting it.
pub struct TarballFetch<'a> {
    started_at: Instant,
    future: BoxFuture<'a, Result<TarballSource, Error>>,
}

impl TarballFetch<'_> {
    pub fn started_at(&self) -> Instant {
        self.started_at
    }
}

impl Future for TarballFetch<'_> {
    type Output = Result<TarballSource, Error>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.future.as_mut().poll(cx)
    }
}
