//! Crate-wide error type.
//!
//! Mirrors the teacher's split between a top-level error enum and
//! per-subsystem error enums that convert into it with `#[from]` /
//! manual `From` impls, so callers match on one type regardless of which
//! component failed.

use crate::kernel::ProtocolGateError;
use crate::transaction::TransactionError;

/// Convenience alias used on every fallible public function in this crate.
pub type DeltaResult<T> = Result<T, DeltaLogError>;

/// Errors surfaced by the log core, verbatim as specified by the commit
/// protocol and log state machine. I/O errors retain their cause.
#[derive(thiserror::Error, Debug)]
pub enum DeltaLogError {
    /// The destination of an exclusive write already existed. Only the
    /// transaction commit loop is expected to catch and retry this.
    #[error("file already exists: {0}")]
    FileAlreadyExists(String),

    /// A read or list operation targeted a path that does not exist.
    #[error("file not found: {0}")]
    FileNotFound(String),

    /// The delta chain between a checkpoint and a target version has a gap.
    #[error("table log is not contiguous: missing version {missing}")]
    DeltaVersionNotContiguous {
        /// The first missing version in the requested range.
        missing: i64,
    },

    /// Replay completed without ever observing both a `Protocol` and a
    /// `Metadata` action.
    #[error("version {0} has no protocol and/or metadata action; log is malformed")]
    MissingProtocolOrMetadata(i64),

    /// Reader-side protocol gate failure: table requires a newer reader
    /// than this crate supports.
    #[error("unsupported reader version: {0}")]
    UnsupportedReaderVersion(i32),

    /// Writer-side protocol gate failure: table requires a newer writer
    /// than this crate supports, or names a writer feature we don't know.
    #[error("unsupported writer version: {0}")]
    UnsupportedWriterVersion(i32),

    /// A commit line had an unrecognised top-level action key, or an
    /// in-memory action violated one of its own invariants.
    #[error("invalid action: {0}")]
    InvalidAction(String),

    /// Transaction-layer failure: protocol gating, conflict detection,
    /// retry exhaustion. See [`TransactionError`] for the full taxonomy.
    #[error(transparent)]
    Transaction(#[from] TransactionError),

    /// Protocol feature-gating failure raised outside a transaction (e.g.
    /// while simply opening a snapshot).
    #[error(transparent)]
    ProtocolGate(#[from] ProtocolGateError),

    /// JSON (de)serialisation of a commit line or pointer file failed.
    #[error("failed to (de)serialize delta log JSON: {0}")]
    SerializeLogJson(#[from] serde_json::Error),

    /// Underlying object store error, passed through unchanged.
    #[error("log store error: {0}")]
    ObjectStore(#[from] object_store::Error),

    /// Parquet encode/decode failure while reading or writing a
    /// checkpoint.
    #[error("parquet checkpoint error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    /// Arrow error while building or tearing down checkpoint record
    /// batches.
    #[error("arrow error: {0}")]
    Arrow(#[from] arrow_schema::ArrowError),

    /// Catch-all I/O error from a backend that doesn't have a more
    /// specific mapping above.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A table URL could not be parsed or resolved to a concrete log
    /// store.
    #[error("invalid table location: {0}")]
    InvalidTableLocation(String),
}

impl DeltaLogError {
    /// Best-effort classification used by the transaction commit loop to
    /// decide whether an object-store error should be treated as a
    /// commit-race signal.
    pub(crate) fn from_object_store_write(path: &str, err: object_store::Error) -> Self {
        match &err {
            object_store::Error::AlreadyExists { .. } => {
                DeltaLogError::FileAlreadyExists(path.to_string())
            }
            object_store::Error::NotFound { .. } => DeltaLogError::FileNotFound(path.to_string()),
            _ => DeltaLogError::ObjectStore(err),
        }
    }
}
