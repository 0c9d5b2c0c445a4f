//! Git source support.
//!
//! A conventional clone-and-pack pipeline clones a repository once to learn its manifest and
//! again to produce a tarball. This layer does the clone exactly once: the checkout is moved
//! to a private captured directory and handed back as a [`GitCheckout`], leaving the
//! install/pack continuation (and its cache lookup by the commit-pinned locator) to the
//! caller.

pub use crate::source::{GitCheckout, GitSource};
pub use crate::spec::{GitReference, GitSpec, GitSpecError};

mod source;
mod spec;
