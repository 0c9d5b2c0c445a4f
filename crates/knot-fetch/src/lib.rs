//! The package-source acquisition layer: resolve package specs (registry semver ranges, git
//! and URL specs, local directories) into metadata records, and materialize their tarballs
//! into a content-addressable cache.
//!
//! The [`SourceManager`] is the front door. Metadata requests coalesce per `(name, source
//! kind)` and flow through a bounded, stop-on-error fetch queue; tarball requests check the
//! content store first and only then reach for the network (or re-run a git retrieval).

pub use crate::config::{DEFAULT_CONCURRENCY, FetchConfig};
pub use crate::counters::{CountersSnapshot, FetchCounters};
pub use crate::error::Error;
pub use crate::installer::{CommandInstaller, DependencyInstaller};
pub use crate::manager::{SourceManager, TarballFetch, TarballSource};

mod archive;
mod config;
mod counters;
mod error;
mod installer;
mod local;
mod manager;
mod queue;
mod remote;
