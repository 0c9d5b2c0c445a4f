use std::io;
use std::sync::Arc;

use knot_types::IntegrityError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// No package descriptor could be found for the request.
    #[error("no package found for `{0}`")]
    NotFound(String),

    /// A configured policy forbids the network access this request would need, and no cached
    /// copy can satisfy it.
    #[error("{reason}, and no cached copy is available")]
    PolicyDenied { reason: String },

    #[error(transparent)]
    Client(#[from] knot_client::Error),

    #[error("git retrieval failed")]
    Git(#[source] anyhow::Error),

    #[error("failed to install dependencies of the checkout before packing")]
    Install(#[source] anyhow::Error),

    #[error("`{0}` is not a valid URL")]
    Url(String, #[source] url::ParseError),

    /// The fetch queue stopped dispatching after an earlier failure.
    #[error("fetch queue aborted after an earlier failure")]
    QueueAborted,

    /// The manifest carries no usable integrity information, so its tarball can never be
    /// verified or addressed.
    #[error("cannot verify content for `{id}`")]
    Integrity {
        id: String,
        #[source]
        source: IntegrityError,
    },

    #[error(transparent)]
    Content(#[from] knot_cache::ContentError),

    #[error("failed to write to the cache")]
    CacheWrite(#[source] io::Error),

    #[error("failed to read package archive")]
    Archive(#[source] io::Error),

    #[error(transparent)]
    Descriptor(#[from] knot_types::DescriptorError),

    #[error(transparent)]
    Join(#[from] tokio::task::JoinError),

    /// A failure shared with every request that coalesced onto one resolution.
    #[error(transparent)]
    Shared(#[from] Arc<Error>),
}

impl Error {
    /// Peel the sharing wrapper off a coalesced failure.
    pub fn unshared(&self) -> &Error {
        match self {
            Self::Shared(inner) => inner.unshared(),
            other => other,
        }
    }
}
