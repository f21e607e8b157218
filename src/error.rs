//! Typed failure taxonomy for the build and image pipelines.
//!
//! Call sites keep `anyhow` for context propagation; these typed
//! variants are downcast-matched at test and decision points (spec §7).

use std::path::PathBuf;

use thiserror::Error;

/// Typed errors surfaced by the miniso pipelines.
#[derive(Debug, Error)]
pub enum BuildError {
    /// A required external tool or prerequisite artifact is absent.
    #[error("missing dependency: {0}")]
    MissingDependency(String),

    /// A required input file is missing or empty.
    #[error("missing or empty input file: {path}")]
    MissingInputFile {
        /// Path that was expected to exist and be non-empty.
        path: PathBuf,
    },

    /// The payload does not fit within the declared image capacity.
    #[error("payload of {payload_bytes} bytes exceeds capacity of {capacity_bytes} bytes")]
    CapacityExceeded {
        /// Total size of the payload to be written.
        payload_bytes: u64,
        /// Declared usable capacity of the image.
        capacity_bytes: u64,
    },

    /// A mount/unmount step failed or its precondition was violated.
    #[error("mount failure at {mount_point}: {reason}")]
    MountFailure {
        /// Mount point involved in the failure.
        mount_point: PathBuf,
        /// Human-readable reason for the failure.
        reason: String,
    },

    /// The user declined a destructive action (or one was refused).
    #[error("aborted: {0}")]
    UserAborted(String),

    /// Fetching a source failed on both primary and fallback paths.
    #[error("failed to fetch source '{name}' ({version}): {reason}")]
    SourceFetchFailure {
        /// Source name.
        name: String,
        /// Requested version.
        version: String,
        /// Combined reason for the failure.
        reason: String,
    },

    /// An artifact failed validation.
    #[error("validation failed for {path}: {reason}")]
    ValidationFailure {
        /// Path of the artifact that failed validation.
        path: PathBuf,
        /// Reason validation failed.
        reason: String,
    },

    /// The stage graph contains a cycle (spec §8).
    #[error("stage dependency cycle detected at stage '{0}'")]
    StageCycle(String),

    /// A signal interrupted the pipeline, triggering cleanup.
    #[error("interrupted by signal")]
    Interrupted,
}
