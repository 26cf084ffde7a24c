//! Fetches automation-service exports, tags CSV rows with their source and
//! uploads the result to S3 under versioned and `latest` keys

#![deny(clippy::all, clippy::pedantic, clippy::nursery, dead_code)]
#![warn(missing_docs)]

/// Command line interface
pub mod cli;

/// Run configuration
pub mod config;

/// Credential providers
pub mod credentials;

/// Destination key layout
pub mod keys;

/// Pipeline orchestration
pub mod pipeline;

/// Payload sources
pub mod source;

/// Object storage
pub mod storage;

/// CSV transform
pub mod transform;

/// Shared types
pub mod types;

/// Destination writer
pub mod writer;
