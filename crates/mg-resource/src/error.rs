use std::io;

use mg_memory::AllocError;
use thiserror::Error;

use crate::identifier::Identifier;

/// Failure reported by a [`Resource::load`](crate::Resource::load)
/// implementation.
#[derive(Debug, Error)]
pub enum LoadResourceError {
    #[error("invalid resource data: {0}")]
    DataError(String),

    #[error("out of resource memory: {0}")]
    AllocationFailure(#[from] AllocError),

    #[error("dependency '{dependency}' not found")]
    DependencyNotFound { dependency: Identifier },

    #[error("dependency '{dependency}' failed to load: {reason}")]
    DependencyFailed { dependency: Identifier, reason: String },

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl LoadResourceError {
    pub fn data_error(message: impl Into<String>) -> Self {
        Self::DataError(message.into())
    }
}

/// Errors surfaced by [`ResourceCache`](crate::ResourceCache) lookups.
#[derive(Debug, Error)]
pub enum ResourceError {
    #[error("resource '{resource}' not found")]
    NotFound { resource: Identifier },

    #[error("failed to load '{resource}' as {type_id}: {source}")]
    LoadFailed {
        resource: Identifier,
        type_id: &'static str,
        #[source]
        source: LoadResourceError,
    },

    #[error("resource '{resource}' is cached as {actual}, requested as {expected}")]
    WrongType {
        resource: Identifier,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("resource '{resource}' depends on itself")]
    DependencyCycle { resource: Identifier },

    #[error("failed to read '{resource}': {source}")]
    Io {
        resource: Identifier,
        #[source]
        source: io::Error,
    },
}

impl ResourceError {
    /// The resource the error refers to.
    pub fn resource(&self) -> &Identifier {
        match self {
            ResourceError::NotFound { resource }
            | ResourceError::LoadFailed { resource, .. }
            | ResourceError::WrongType { resource, .. }
            | ResourceError::DependencyCycle { resource }
            | ResourceError::Io { resource, .. } => resource,
        }
    }
}
