//! Core library for synchronizing git history with packaging patch queues.
//!
//! The crate is layered around two data flows that share the [`Patch`] model
//! and the patch codec:
//! - commits to patches: range walking, diff filtering, numbering, and series persistence
//! - patches to commit messages: header parsing and message synthesis
//!
//! Repository access and compression are injected through the
//! `pq_backend_api` traits so the engine can run against an in-memory history.

#![warn(
    clippy::all,
    clippy::cargo,
    clippy::nursery,
    clippy::pedantic,
    missing_docs
)]
#![cfg_attr(
    not(test),
    deny(
        clippy::dbg_macro,
        clippy::expect_used,
        clippy::panic,
        clippy::print_stderr,
        clippy::print_stdout,
        clippy::todo,
        clippy::unwrap_used
    )
)]

/// Patch file header parsing and serialization.
pub mod codec;
/// Directives embedded in commit messages.
pub mod commands;
/// Configuration file model.
pub mod config;
/// Commit range to patch series export.
pub mod exporter;
/// Atomic file replacement.
pub mod fsutil;
/// Commit messages derived from patches.
pub mod message;
/// Git repository backend built on libgit2.
pub mod repository;
/// Quilt series file handling.
pub mod series;
/// Provenance field rewriting in packaging descriptions.
pub mod vcs_tag;
/// Commit range walking with squash support.
pub mod walker;

pub use pq_api::{CommitInfo, CommitRange, Patch, Signature, SquashSpec};
pub use pq_backend_api::{BackendError, Compressor, CompressorRegistry, Repository};

/// Common result type for the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the core library.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Patch file header could not be split into its fields.
    #[error("malformed patch {path}: {reason}")]
    Format {
        /// Patch file that failed to parse.
        path: String,
        /// Description of the violated expectation.
        reason: String,
    },
    /// Commit range configuration is invalid.
    #[error("invalid commit range: {reason}")]
    Range {
        /// Description of the violated invariant, naming the offending reference.
        reason: String,
    },
    /// Repository backend operation failed.
    #[error("repository error: {source}")]
    Repository {
        /// Error reported by the backend.
        #[from]
        source: BackendError,
    },
    /// Underlying git operation failed.
    #[error("git error: {source}")]
    Git {
        /// Original libgit2 error bubbled up by the core library.
        #[from]
        source: git2::Error,
    },
    /// Provided path does not correspond to a git repository.
    #[error("path does not reference a git repository: {path}")]
    NotARepository {
        /// Path that failed to resolve to a repository.
        path: String,
    },
    /// Bare repositories are currently unsupported.
    #[error("repository at {path} is bare and unsupported")]
    BareRepository {
        /// Path of the repository lacking a working tree.
        path: String,
    },
    /// Requested file does not exist.
    #[error("file not found: {path}")]
    NotFound {
        /// Missing path.
        path: String,
    },
    /// Series already lists the patch.
    #[error("patch {name} is already part of the series")]
    DuplicatePatch {
        /// Name of the duplicated entry.
        name: String,
    },
    /// Configured pattern is not a valid regular expression.
    #[error("invalid pattern '{pattern}': {source}")]
    InvalidPattern {
        /// Pattern as configured.
        pattern: String,
        /// Compilation error.
        #[source]
        source: regex::Error,
    },
    /// Configuration is malformed or inconsistent.
    #[error("invalid configuration: {reason}")]
    Config {
        /// Description of the problem.
        reason: String,
    },
    /// Compressing or decompressing a patch file failed.
    #[error("compression failed for {path}: {source}")]
    Compression {
        /// Patch file being processed.
        path: String,
        /// Error reported by the compressor.
        #[source]
        source: BackendError,
    },
    /// Filesystem interaction failed.
    #[error("failed to access {path}: {source}")]
    Io {
        /// Filesystem path involved in the failed operation.
        path: String,
        /// Source I/O error returned by the standard library.
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    pub(crate) fn format(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Format {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn range(reason: impl Into<String>) -> Self {
        Self::Range {
            reason: reason.into(),
        }
    }

    pub(crate) fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        Self::Io {
            path: display_path(path),
            source,
        }
    }
}

pub(crate) fn display_path(path: &std::path::Path) -> String {
    path.to_string_lossy().into_owned()
}

pub(crate) fn compile_pattern(pattern: &str) -> Result<regex::Regex> {
    regex::Regex::new(pattern).map_err(|source| Error::InvalidPattern {
        pattern: pattern.to_owned(),
        source,
    })
}
