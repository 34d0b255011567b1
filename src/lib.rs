//! Core of a client library for a transactional table format whose state
//! is an ordered sequence of JSON commit records over an object store:
//! the log state machine, snapshot materialisation, optimistic-concurrency
//! commit protocol, and the log-store abstraction that fronts object
//! storage with the exclusive-create semantics the commit protocol needs.
//!
//! Out of scope: CLI wrappers, configuration loading from
//! files/env, Parquet *data* file readers, credential providers, and
//! concrete cloud-vendor blob SDK details beyond what `object_store`
//! already abstracts.

pub mod checkpoints;
pub mod clock;
pub mod errors;
pub mod kernel;
pub mod logstore;
pub mod table;
pub mod transaction;

pub use clock::{Clock, SystemClock};
pub use errors::{DeltaLogError, DeltaResult};
pub use kernel::{
    Action, AddCDCFile, AddFile, CommitInfo, DomainMetadata, Format, Metadata, Protocol,
    RemoveFile, Snapshot, Transaction,
};
pub use logstore::{LogStore, LogStoreRef, LogStoreRegistry};
pub use table::{DeltaLog, HistoryManager, TableConfig};
pub use transaction::{CommitBuilder, FinalizedCommit, PreparedTransaction, TransactionError};
