pub use crate::error::Error;
pub use crate::registry_client::{RegistryClient, RegistryClientBuilder};

mod error;
mod registry_client;
