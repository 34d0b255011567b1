//! Thin filesystem-like interface over the `_delta_log/` directory:
//! lexicographic listing from a key, line-oriented reads, and atomic
//! create-if-absent writes. This is the one I/O seam the rest of the
//! crate depends on.

mod default_logstore;
mod factories;
mod registry;
mod s3_logstore;

pub use default_logstore::{Backend, DefaultLogStore};
pub use registry::LogStoreRegistry;
pub use s3_logstore::S3LogStore;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use object_store::path::Path;
use object_store::ObjectStore;

use crate::errors::DeltaResult;

/// Directory every table keeps its commit/checkpoint/pointer files under.
pub const DELTA_LOG_DIR: &str = "_delta_log";

/// A reference-counted, type-erased [`LogStore`], the shape every
/// higher-level component (history manager, transaction, checkpoint
/// writer) actually holds.
pub type LogStoreRef = Arc<dyn LogStore>;

/// Metadata about a single object in the log directory, as returned by
/// [`LogStore::list_from`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMeta {
    pub location: Path,
    pub size: u64,
    pub modification_time: i64,
}

/// The object name for a commit at `version`: 20-digit, zero-padded.
pub fn commit_uri_from_version(version: i64) -> Path {
    Path::from_iter([DELTA_LOG_DIR, &format!("{version:020}.json")])
}

/// The object name for a single-file checkpoint at `version`.
pub fn checkpoint_uri_from_version(version: i64) -> Path {
    Path::from_iter([DELTA_LOG_DIR, &format!("{version:020}.checkpoint.parquet")])
}

/// The object name for part `part` of `num_parts` of a multi-part
/// checkpoint at `version`. Both `part` and `num_parts` are 1-based, per
/// the on-disk convention (spec.md §6).
pub fn checkpoint_part_uri_from_version(version: i64, part: u32, num_parts: u32) -> Path {
    Path::from_iter([
        DELTA_LOG_DIR,
        &format!("{version:020}.checkpoint.{part:010}.{num_parts:010}.parquet"),
    ])
}

pub fn last_checkpoint_uri() -> Path {
    Path::from_iter([DELTA_LOG_DIR, "_last_checkpoint"])
}

/// The log-store contract from spec.md §4.1. Implementations front a
/// concrete object store; conditional-write semantics differ by
/// backend, which is exactly what [`DefaultLogStore`] vs [`S3LogStore`]
/// encode.
#[async_trait]
pub trait LogStore: Send + Sync + std::fmt::Debug {
    /// Read `path` and split it into its (newline-terminated) lines,
    /// with trailing newlines stripped and blank trailing lines dropped.
    async fn read_lines(&self, path: &Path) -> DeltaResult<Vec<String>>;

    /// List objects under the log directory whose path is
    /// lexicographically `>= prefix`, ascending.
    async fn list_from(&self, prefix: &Path) -> DeltaResult<Vec<FileMeta>>;

    /// Write `payload` to `path`. When `overwrite` is `false` this must
    /// be atomically exclusive: either the object becomes visible with
    /// the full contents, or no object is created at all.
    async fn write(&self, path: &Path, payload: Bytes, overwrite: bool) -> DeltaResult<()>;

    /// Delete `path`. Used by log cleanup; callers are expected to
    /// tolerate and log failures rather than propagate them (spec.md
    /// §4.8 step 5).
    async fn delete(&self, path: &Path) -> DeltaResult<()>;

    /// Checks existence via a `HEAD`, not a read: callers (e.g. the
    /// history manager validating a checkpoint pointer) pass paths that
    /// may be arbitrary binary objects such as Parquet files, and
    /// `read_lines`/`split_lines` would reject non-UTF-8 bodies with
    /// `InvalidAction` instead of reporting existence.
    async fn exists(&self, path: &Path) -> DeltaResult<bool> {
        match self.object_store().head(path).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(other) => Err(other.into()),
        }
    }

    /// The absolute path this store resolves `path` to on the physical
    /// backend (e.g. `file:///abs/table/_delta_log/...`), for error
    /// messages and diagnostics.
    fn resolve_path_on_physical_store(&self, path: &Path) -> String;

    /// Whether a writer to this backend can observe a partially-written
    /// object before the write completes. When `true`, callers that need
    /// all-or-nothing visibility must stage through a temp object.
    fn is_partial_write_visible(&self) -> bool;

    /// The table root this store was constructed against.
    fn root(&self) -> &Path;

    /// Escape hatch to the underlying `object_store`, for components
    /// (e.g. the checkpoint writer) that need to read/write arbitrary
    /// paths, not just the commit/checkpoint convention this trait
    /// knows about.
    fn object_store(&self) -> Arc<dyn ObjectStore>;

    /// A short, stable name used for diagnostics and to special-case
    /// backends in the transaction layer (e.g. whether `write` already
    /// gives atomic all-or-nothing visibility without a temp file).
    fn name(&self) -> &'static str;
}

pub(crate) fn split_lines(body: &[u8]) -> DeltaResult<Vec<String>> {
    let text = std::str::from_utf8(body)
        .map_err(|e| crate::errors::DeltaLogError::InvalidAction(format!("non-utf8 log file: {e}")))?;
    Ok(text
        .split('\n')
        .map(|l| l.trim_end_matches('\r'))
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect())
}
