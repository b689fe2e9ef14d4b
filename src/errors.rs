//! Error Types
//!
//! This module defines the error types used throughout the pipeline cache.
//!
//! # Overview
//!
//! The main error type [`CacheError`] covers all failure modes including:
//! - Invalid arguments (empty material names, malformed keys)
//! - Pipeline creation failures reported by the backend factory
//! - Invalid cache configuration (zero capacity, bad thresholds)
//! - Stale references to materials removed while a pipeline was being built
//! - Catalogue I/O and format errors
//!
//! [`BackendError`] is what a [`PipelineObjectFactory`] reports. It is
//! `Clone` so a single failed creation can be handed to every caller that was
//! waiting on it.
//!
//! # Usage
//!
//! All public APIs return [`Result<T>`] which is an alias for
//! `std::result::Result<T, CacheError>`.
//!
//! ```rust,ignore
//! use myth_pipeline_cache::errors::{CacheError, Result};
//!
//! fn lookup() -> Result<()> {
//!     Ok(())
//! }
//! ```
//!
//! [`PipelineObjectFactory`]: crate::pipeline::PipelineObjectFactory

use std::sync::Arc;

use thiserror::Error;

/// The main error type for the pipeline cache.
#[derive(Error, Debug)]
pub enum CacheError {
    // ========================================================================
    // Caller Errors
    // ========================================================================
    /// A required argument was empty or otherwise unusable.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A cache or service setting is out of range.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The material was removed or re-keyed while the request was in flight.
    #[error("Stale reference: material '{0}' changed while its pipeline was being resolved")]
    StaleReference(String),

    // ========================================================================
    // Backend Errors
    // ========================================================================
    /// The factory failed to build a native pipeline object.
    #[error("Pipeline creation failed for {key}: {source}")]
    CreationFailure {
        /// Debug description of the key whose creation failed
        key: String,
        /// The underlying backend failure
        #[source]
        source: Arc<BackendError>,
    },

    // ========================================================================
    // Persistence Errors
    // ========================================================================
    /// Catalogue I/O error.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Catalogue or key bytes are malformed.
    #[error("Catalog format error: {0}")]
    CatalogFormat(String),

    /// Statistics serialization error.
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl CacheError {
    /// Returns `true` if the error came from the backend factory.
    #[inline]
    #[must_use]
    pub fn is_creation_failure(&self) -> bool {
        matches!(self, Self::CreationFailure { .. })
    }
}

/// Failure reported by a pipeline backend while creating or releasing a
/// native object.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// A shader stage referenced by the key has no registered source.
    #[error("Shader source not found: {0}")]
    ShaderNotFound(String),

    /// The key describes state the backend cannot express.
    #[error("Unsupported configuration: {0}")]
    Unsupported(String),

    /// The creating thread went away before publishing its result.
    #[error("Pipeline creation was abandoned")]
    Abandoned,

    /// Any other backend-specific failure.
    #[error("{0}")]
    Other(String),
}

/// Alias for `Result<T, CacheError>`.
pub type Result<T> = std::result::Result<T, CacheError>;
