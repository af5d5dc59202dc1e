mod registry;
mod types;

pub use registry::CompressorRegistry;
pub use types::{BackendError, BackendResult};

use pq_api::{CommitInfo, Signature};

/// Version-control history consumed by the walker and exporter.
///
/// Implementations resolve references to full commit identifiers; every
/// other method takes identifiers returned by [`Repository::resolve`] or
/// [`Repository::ancestors_of`].
pub trait Repository {
    /// Resolve a reference (branch, tag, abbreviated id, `HEAD`) to a full commit id.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::UnknownReference`] when the reference does not name a commit.
    fn resolve(&self, reference: &str) -> BackendResult<String>;

    /// All commits reachable from `id`, including `id`, ancestors before descendants.
    ///
    /// Ties between unrelated commits are broken by commit time, then by the
    /// backend's native order, so repeated calls yield the same sequence.
    ///
    /// # Errors
    ///
    /// Surfaces backend failures while walking history.
    fn ancestors_of(&self, id: &str) -> BackendResult<Vec<String>>;

    /// Whether `ancestor` is reachable from `descendant`. A commit is its own ancestor.
    ///
    /// # Errors
    ///
    /// Surfaces backend failures while computing the merge base.
    fn is_ancestor(&self, ancestor: &str, descendant: &str) -> BackendResult<bool>;

    /// Paths touched between `from` (the empty tree when `None`) and `to`.
    ///
    /// # Errors
    ///
    /// Surfaces backend failures while diffing trees.
    fn changed_paths(&self, from: Option<&str>, to: &str) -> BackendResult<Vec<String>>;

    /// Unified diff from `from` (the empty tree when `None`) to `to`, preceded
    /// by a diffstat summary. When `paths` is given only those paths are included.
    ///
    /// # Errors
    ///
    /// Surfaces backend failures while diffing trees, and refuses content that
    /// is not valid UTF-8 text rather than altering it.
    fn diff(&self, from: Option<&str>, to: &str, paths: Option<&[String]>)
        -> BackendResult<String>;

    /// Message and authorship of a commit.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::UnknownReference`] for unknown ids.
    fn commit_info(&self, id: &str) -> BackendResult<CommitInfo>;

    /// Identity the repository would commit with.
    ///
    /// # Errors
    ///
    /// Surfaces configuration lookup failures.
    fn author_identity(&self) -> BackendResult<Signature>;
}

/// Lossless byte compressor used for oversized patch files.
pub trait Compressor: Send + Sync {
    /// Stable identifier used in configuration.
    fn id(&self) -> &'static str;

    /// File-name suffix (without the dot) marking compressed files.
    fn suffix(&self) -> &'static str;

    /// Compress `data`.
    ///
    /// # Errors
    ///
    /// Implementors surface encoder failures.
    fn compress(&self, data: &[u8]) -> BackendResult<Vec<u8>>;

    /// Reverse [`Compressor::compress`].
    ///
    /// # Errors
    ///
    /// Implementors surface corrupt or truncated input.
    fn decompress(&self, data: &[u8]) -> BackendResult<Vec<u8>>;
}
