//! The log state machine: action taxonomy, replay, materialised state
//! and protocol gating. Everything in this module is pure (no I/O) —
//! `logstore` and `table::history` are what feed it bytes.

mod actions;
mod gate;
mod replay;
mod snapshot;
mod state;

pub use actions::{
    Action, AddCDCFile, AddFile, CommitInfo, DomainMetadata, Format, Metadata, Protocol,
    RemoveFile, Transaction, KNOWN_READER_FEATURES, KNOWN_WRITER_FEATURES,
    SUPPORTED_READER_VERSION, SUPPORTED_WRITER_VERSION,
};
pub use gate::{assert_protocol_read, assert_protocol_write, ProtocolGateError};
pub use replay::{replay_to_state, LogReplay};
pub use snapshot::{EagerSnapshot, Snapshot};
pub use state::{AppTransaction, State};
