//! Error types shared by the storage, whitelist and filter layers.

use std::time::Duration;

use thiserror::Error;

/// Errors raised by stores, whitelists and filters.
#[derive(Debug, Error)]
pub enum Error {
    /// The descriptor names a scheme no backend handles.
    #[error("unsupported backend '{scheme}' in '{descriptor}'")]
    UnsupportedBackend { scheme: String, descriptor: String },

    /// The descriptor scheme is known but its parameters are malformed.
    #[error("invalid descriptor '{descriptor}': {message}")]
    InvalidDescriptor { descriptor: String, message: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    DuplicateKey(String),

    /// The backend could not be reached or failed mid-operation.
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    /// A stored record does not have the expected shape.
    #[error("invalid record '{name}': {message}")]
    InvalidRecord { name: String, message: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn unsupported(scheme: impl Into<String>, descriptor: impl Into<String>) -> Self {
        Self::UnsupportedBackend {
            scheme: scheme.into(),
            descriptor: descriptor.into(),
        }
    }

    pub fn invalid_descriptor(descriptor: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidDescriptor {
            descriptor: descriptor.into(),
            message: message.into(),
        }
    }

    pub fn invalid_record(name: impl Into<String>, message: impl ToString) -> Self {
        Self::InvalidRecord {
            name: name.into(),
            message: message.to_string(),
        }
    }

    pub fn backend(message: impl ToString) -> Self {
        Self::BackendUnavailable(message.to_string())
    }
}

/// Why a query could not be answered by a [`Resolver`](crate::resolver::Resolver).
#[derive(Debug, Error)]
pub enum ResolveError {
    /// A filter deliberately refused the query.
    #[error("query for '{name}' rejected by {filter}: {reason}")]
    Rejected {
        filter: String,
        name: String,
        reason: String,
    },

    /// The filter pipeline itself failed, e.g. the device store is down.
    #[error("filter pipeline failed: {0}")]
    Filter(#[source] Error),

    #[error("upstream failure: {0}")]
    Upstream(#[source] std::io::Error),

    #[error("upstream timed out after {0:?}")]
    Timeout(Duration),
}

impl ResolveError {
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::Rejected { .. })
    }
}
