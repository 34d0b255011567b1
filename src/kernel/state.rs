//! Materialised table state: the output of folding a stream of actions,
//! newest-to-oldest, into a single consistent view.

use std::collections::HashMap;

use crate::kernel::{AddFile, DomainMetadata, Metadata, Protocol, RemoveFile};

/// The tuple spec.md §3 calls `State`: everything a [`crate::Snapshot`]
/// needs, independent of how it was assembled (from scratch or
/// incrementally on top of a prior state).
#[derive(Debug, Clone, Default)]
pub struct State {
    pub protocol: Option<Protocol>,
    pub metadata: Option<Metadata>,
    pub active_files: HashMap<String, AddFile>,
    pub tombstones: HashMap<String, RemoveFile>,
    pub set_transactions: HashMap<String, AppTransaction>,
    pub domain_metadata: HashMap<String, DomainMetadata>,
    /// Retention cutoff (millis) applied while folding tombstones; a
    /// `RemoveFile` older than this is dropped rather than retained.
    pub min_file_retention_ts: i64,
}

/// The materialised shape of a `SetTransaction` action once folded into
/// state: just the fields a caller needs to check idempotency. Named
/// distinctly from `kernel::Transaction` (the action itself) since a
/// replayed table only ever needs the latter's `version`/`last_updated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppTransaction {
    pub version: i64,
    pub last_updated: Option<i64>,
}

impl State {
    pub fn new(min_file_retention_ts: i64) -> Self {
        State {
            min_file_retention_ts,
            ..Default::default()
        }
    }

    pub fn size_in_bytes(&self) -> i64 {
        self.active_files.values().map(|a| a.size).sum()
    }

    pub fn num_files(&self) -> usize {
        self.active_files.len()
    }

    /// True once both a `Protocol` and a `Metadata` have been folded in,
    /// the completeness condition from spec.md §4.3.
    pub fn is_complete(&self) -> bool {
        self.protocol.is_some() && self.metadata.is_some()
    }
}
