//! Shared types for the package-source acquisition layer: requests, packuments, manifests,
//! integrity digests, and the marker locator used by synthetic (git/url) manifests.

pub use crate::integrity::{Integrity, IntegrityAlgorithm, IntegrityError};
pub use crate::mark::{REMOTE_SPEC_MARK, RemoteSpecMark};
pub use crate::meta::{
    DescriptorError, DistInfo, Manifest, PackageMeta, load_descriptor, local_version_id,
};
pub use crate::request::{LocalKind, PackageRequest, ParentRequest, RemoteKind, SourceKind};

mod integrity;
mod mark;
mod meta;
mod request;
