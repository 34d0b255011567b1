//! Immutable, version-pinned materialised view of a table.

use crate::kernel::state::{AppTransaction, State};
use crate::kernel::{AddFile, DomainMetadata, Metadata, Protocol, RemoveFile};

/// An immutable handle around a [`State`] fixed at a particular version.
/// Cheap to clone: construction does the work, cloning just bumps a
/// reference count on the underlying maps' owning `Arc` if the caller
/// wraps it in one (this crate leaves that choice to [`crate::table::DeltaLog`]).
#[derive(Debug, Clone)]
pub struct Snapshot {
    version: i64,
    state: State,
}

impl Snapshot {
    pub fn new(version: i64, state: State) -> Self {
        Snapshot { version, state }
    }

    pub fn version(&self) -> i64 {
        self.version
    }

    pub fn protocol(&self) -> Option<&Protocol> {
        self.state.protocol.as_ref()
    }

    pub fn metadata(&self) -> Option<&Metadata> {
        self.state.metadata.as_ref()
    }

    pub fn all_files(&self) -> impl Iterator<Item = &AddFile> {
        self.state.active_files.values()
    }

    pub fn tombstones(&self) -> impl Iterator<Item = &RemoveFile> {
        self.state.tombstones.values()
    }

    pub fn set_transaction(&self, app_id: &str) -> Option<AppTransaction> {
        self.state.set_transactions.get(app_id).copied()
    }

    pub fn domain_metadata(&self, domain: &str) -> Option<&DomainMetadata> {
        self.state.domain_metadata.get(domain)
    }

    pub fn num_of_files(&self) -> usize {
        self.state.num_files()
    }

    pub fn size_in_bytes(&self) -> i64 {
        self.state.size_in_bytes()
    }

    /// Access to the underlying state, for building the next version
    /// incrementally ([`State::apply_commit`]) or for the checkpoint
    /// writer.
    pub fn state(&self) -> &State {
        &self.state
    }

    /// Build the snapshot at `new_version` by applying `actions` (one
    /// commit's worth, in file order) on top of this one, rather than
    /// replaying from scratch.
    pub fn advance(&self, new_version: i64, actions: &[crate::kernel::Action]) -> Snapshot {
        let mut state = self.state.clone();
        state.apply_commit(actions);
        Snapshot::new(new_version, state)
    }
}

/// Alias kept for parity with the teacher's naming: a `Snapshot` here is
/// always "eager" (fully materialised, not a lazily-scanned view) since
/// this crate has no query engine to defer file listing to.
pub type EagerSnapshot = Snapshot;
