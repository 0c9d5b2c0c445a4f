use std::io::Write;

use reqwest::{ClientBuilder, Response, StatusCode};
use reqwest_middleware::ClientWithMiddleware;
use reqwest_retry::RetryTransientMiddleware;
use reqwest_retry::policies::ExponentialBackoff;
use rustc_hash::FxHashMap;
use tracing::{debug, trace, warn};
use url::Url;

use knot_cache::Cache;
use knot_types::PackageMeta;

use crate::Error;

/// The default retry budget for transient registry failures.
const DEFAULT_RETRIES: u32 = 3;

/// A builder for a [`RegistryClient`].
#[derive(Debug, Clone)]
pub struct RegistryClientBuilder {
    registry: Url,
    scope_registries: FxHashMap<String, Url>,
    retries: u32,
    cache: Cache,
}

impl RegistryClientBuilder {
    pub fn new(cache: Cache) -> Self {
        Self {
            registry: Url::parse("https://registry.npmjs.org").expect("default registry URL"),
            scope_registries: FxHashMap::default(),
            retries: DEFAULT_RETRIES,
            cache,
        }
    }

    #[must_use]
    pub fn registry(mut self, registry: Url) -> Self {
        self.registry = registry;
        self
    }

    /// Route packages under `@scope/` to a dedicated registry endpoint.
    #[must_use]
    pub fn scope_registry(mut self, scope: impl Into<String>, registry: Url) -> Self {
        self.scope_registries.insert(scope.into(), registry);
        self
    }

    #[must_use]
    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn build(self) -> RegistryClient {
        let client_raw = ClientBuilder::new()
            .user_agent("knot")
            .pool_max_idle_per_host(20)
            .timeout(std::time::Duration::from_secs(60 * 5))
            .build()
            .expect("Failed to build HTTP client.");

        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(self.retries);
        let retry_strategy = RetryTransientMiddleware::new_with_policy(retry_policy);

        let client = reqwest_middleware::ClientBuilder::new(client_raw)
            .with(retry_strategy)
            .build();

        RegistryClient {
            registry: self.registry,
            scope_registries: self.scope_registries,
            client,
            cache: self.cache,
        }
    }
}

/// A client for fetching package metadata from an npm-compatible registry.
#[derive(Debug, Clone)]
pub struct RegistryClient {
    registry: Url,
    scope_registries: FxHashMap<String, Url>,
    client: ClientWithMiddleware,
    cache: Cache,
}

impl RegistryClient {
    /// The registry endpoint serving a package name, honoring per-scope overrides.
    fn registry_for(&self, name: &str) -> &Url {
        name.strip_prefix('@')
            .and_then(|rest| rest.split_once('/'))
            .and_then(|(scope, _)| self.scope_registries.get(scope))
            .unwrap_or(&self.registry)
    }

    fn packument_url(&self, name: &str) -> Url {
        let mut url = self.registry_for(name).clone();
        url.path_segments_mut()
            .expect("registry URL is a base")
            // Percent-encodes the `/` in scoped names, as registries expect.
            .push(name);
        url
    }

    /// Fetch the full packument for a package name.
    ///
    /// Transient failures are retried within the configured budget by the middleware stack.
    /// Successful bodies are written through to the packument cache for later offline use;
    /// large fields resolution never reads are stripped.
    pub async fn packument(&self, name: &str) -> Result<PackageMeta, Error> {
        let url = self.packument_url(name);
        trace!("Fetching packument for {name} from {url}");

        let response = self.client.get(url.clone()).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(Error::PackageNotFound(name.to_string()));
        }
        let response = response.error_for_status()?;
        let bytes = response.bytes().await?;

        let mut meta: PackageMeta = serde_json::from_slice(&bytes)
            .map_err(|err| Error::from_json_err(err, url.to_string()))?;
        meta.strip_heavy_fields();

        // Best-effort write-through; a failed cache write never fails the request.
        if let Err(err) = self.cache_packument(name, &bytes) {
            warn!("Failed to cache packument for {name}: {err}");
        }

        Ok(meta)
    }

    /// Read the cached packument for a package name, if one exists.
    pub fn cached_packument(&self, name: &str) -> Option<PackageMeta> {
        let entry = self.cache.packument_entry(name);
        let bytes = fs_err::read(entry.path()).ok()?;
        match serde_json::from_slice::<PackageMeta>(&bytes) {
            Ok(mut meta) => {
                debug!("Found cached packument for {name}");
                meta.strip_heavy_fields();
                Some(meta)
            }
            Err(err) => {
                warn!("Ignoring unreadable packument cache for {name}: {err}");
                None
            }
        }
    }

    fn cache_packument(&self, name: &str, bytes: &[u8]) -> std::io::Result<()> {
        let entry = self.cache.packument_entry(name);
        fs_err::create_dir_all(entry.dir())?;
        let mut temp = tempfile::NamedTempFile::new_in(entry.dir())?;
        temp.write_all(bytes)?;
        temp.persist(entry.path()).map_err(|err| err.error)?;
        Ok(())
    }

    /// Start streaming a tarball from the registry (or any plain URL).
    pub async fn stream_tarball(&self, url: &Url) -> Result<Response, Error> {
        debug!("Fetching tarball from {url}");
        let response = self.client.get(url.clone()).send().await?;
        Ok(response.error_for_status()?)
    }
}

#[cfg(test)]
mod tests {
    use url::Url;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use knot_cache::Cache;

    use super::{Error, RegistryClientBuilder};

    fn client_for(server: &MockServer, cache: &Cache) -> super::RegistryClient {
        RegistryClientBuilder::new(cache.clone())
            .registry(Url::parse(&server.uri()).unwrap())
            .retries(0)
            .build()
    }

    fn packument_body() -> serde_json::Value {
        serde_json::json!({
            "name": "left-pad",
            "dist-tags": { "latest": "1.3.0" },
            "versions": {
                "1.3.0": {
                    "name": "left-pad",
                    "version": "1.3.0",
                    "readme": "lots of prose",
                    "dist": {
                        "shasum": "0beec7b5ea3f0fdbc95d0dd47f3c5bc275da8a33",
                        "tarball": "https://registry.example/left-pad/-/left-pad-1.3.0.tgz"
                    }
                }
            }
        })
    }

    #[tokio::test]
    async fn packument_fetch_strips_heavy_fields_and_caches() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/left-pad"))
            .respond_with(ResponseTemplate::new(200).set_body_json(packument_body()))
            .mount(&server)
            .await;

        let cache_dir = tempfile::tempdir().unwrap();
        let cache = Cache::init(cache_dir.path()).unwrap();
        let client = client_for(&server, &cache);

        let meta = client.packument("left-pad").await.unwrap();
        assert_eq!(meta.name, "left-pad");
        let manifest = meta.manifest("1.3.0").unwrap();
        assert!(!manifest.extra.contains_key("readme"));

        // The raw body went through to the offline cache.
        let cached = client.cached_packument("left-pad").unwrap();
        assert!(cached.versions.contains_key("1.3.0"));
    }

    #[tokio::test]
    async fn missing_package_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/no-such-pkg"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let cache_dir = tempfile::tempdir().unwrap();
        let cache = Cache::init(cache_dir.path()).unwrap();
        let client = client_for(&server, &cache);

        assert!(matches!(
            client.packument("no-such-pkg").await,
            Err(Error::PackageNotFound(name)) if name == "no-such-pkg"
        ));
        assert!(client.cached_packument("no-such-pkg").is_none());
    }

    #[tokio::test]
    async fn scoped_names_route_to_scope_registries() {
        let default_server = MockServer::start().await;
        let scope_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/@corp%2Finternal"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "name": "@corp/internal",
                "versions": {},
            })))
            .mount(&scope_server)
            .await;

        let cache_dir = tempfile::tempdir().unwrap();
        let cache = Cache::init(cache_dir.path()).unwrap();
        let client = RegistryClientBuilder::new(cache)
            .registry(Url::parse(&default_server.uri()).unwrap())
            .scope_registry("corp", Url::parse(&scope_server.uri()).unwrap())
            .retries(0)
            .build();

        let meta = client.packument("@corp/internal").await.unwrap();
        assert_eq!(meta.name, "@corp/internal");
        assert!(default_server.received_requests().await.unwrap().is_empty());
    }
}
