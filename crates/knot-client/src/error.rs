use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// The package name is unknown to the registry.
    #[error("Package `{0}` was not found in the registry")]
    PackageNotFound(String),

    /// A request failed after the retry budget was exhausted. Refer to the error message for
    /// more details.
    #[error(transparent)]
    Request(#[from] reqwest::Error),

    /// A request failed inside the middleware stack (including retries).
    #[error(transparent)]
    RequestMiddleware(#[from] reqwest_middleware::Error),

    #[error("Received unexpected JSON from {url}")]
    BadJson {
        source: serde_json::Error,
        url: String,
    },
}

impl Error {
    pub(crate) fn from_json_err(err: serde_json::Error, url: String) -> Self {
        Self::BadJson { source: err, url }
    }
}
