//! Transaction / commit protocol.
//!
//! Exposed as a staged builder — `CommitBuilder` (Open) →
//! `PreparedTransaction` (Prepared) → `FinalizedCommit` (Committed) —
//! rather than a single `commit()` function. Every backend this crate's
//! `LogStore` fronts has a genuine conditional-create primitive (or the
//! process-local S3 mutex approximation of one), so there's no
//! intermediate tmp-commit-file stage: `prepare()` goes straight from
//! validated actions to a canonically ordered commit payload.

pub mod conflict_checker;

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::{Map, Value};

pub use conflict_checker::ConflictError;
use conflict_checker::{ConflictChecker, TransactionInfo, WinningCommitSummary};

use crate::checkpoints;
use crate::clock::Clock;
use crate::errors::{DeltaLogError, DeltaResult};
use crate::kernel::{Action, CommitInfo, Snapshot, Transaction};
use crate::logstore::{commit_uri_from_version, LogStoreRef};
use crate::table::{DeltaLog, HistoryManager, TableConfig};

/// Default bound on commit retries after losing a race to a concurrent
/// writer.
pub const DEFAULT_MAX_RETRIES: usize = 5;

#[derive(thiserror::Error, Debug)]
pub enum TransactionError {
    #[error(transparent)]
    Conflict(#[from] ConflictError),

    #[error("exceeded maximum commit attempts ({0})")]
    MaxCommitAttempts(usize),

    #[error("invalid commit: {0}")]
    InvalidCommit(String),
}

/// Configures a commit. This is the `Open` state of the transaction
/// state machine.
#[derive(Debug, Clone)]
pub struct CommitBuilder {
    operation: String,
    actions: Vec<Action>,
    app_metadata: Map<String, Value>,
    app_transactions: Vec<Transaction>,
    read_files: HashSet<String>,
    max_retries: usize,
}

impl CommitBuilder {
    pub fn new(operation: impl Into<String>) -> Self {
        CommitBuilder {
            operation: operation.into(),
            actions: Vec::new(),
            app_metadata: Map::new(),
            app_transactions: Vec::new(),
            read_files: HashSet::new(),
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    /// The actions this transaction stages for the commit: `Protocol`
    /// and/or `Metadata` if this commit changes them, plus any
    /// `AddFile`/`RemoveFile`/`DomainMetadata`/`AddCDCFile` it writes. A
    /// `CommitInfo` here is ignored — `prepare()` always synthesizes its
    /// own, stamped with the injected clock.
    pub fn with_actions(mut self, actions: Vec<Action>) -> Self {
        self.actions = actions;
        self
    }

    /// The set of `AddFile` paths this transaction's reader observed,
    /// for `ConcurrentAppend`/`ConcurrentDeleteRead` detection. Defaults
    /// to empty, i.e. "read nothing" — callers doing a full-table
    /// read/overwrite should pass every currently-active path.
    pub fn with_read_files(mut self, read_files: impl IntoIterator<Item = String>) -> Self {
        self.read_files = read_files.into_iter().collect();
        self
    }

    pub fn with_app_metadata(mut self, app_metadata: Map<String, Value>) -> Self {
        self.app_metadata = app_metadata;
        self
    }

    pub fn with_application_transaction(mut self, txn: Transaction) -> Self {
        self.app_transactions.push(txn);
        self
    }

    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Validates the staged actions against `table`'s current cached
    /// snapshot and assembles the canonical commit record, producing the
    /// `Prepared` state. Fails fast on malformed input without touching
    /// the log store.
    pub fn prepare(self, table: &DeltaLog) -> DeltaResult<PreparedTransaction> {
        let read_snapshot = table.snapshot();
        self.validate(&read_snapshot)?;

        let effective_protocol = self
            .actions
            .iter()
            .find_map(|a| match a {
                Action::Protocol(p) => Some(p),
                _ => None,
            })
            .or_else(|| read_snapshot.protocol());
        if let Some(protocol) = effective_protocol {
            crate::kernel::assert_protocol_write(protocol)?;
        }

        let commit_info = CommitInfo {
            timestamp: Some(table.clock().now_millis()),
            operation: Some(self.operation.clone()),
            info: self.app_metadata.clone(),
        };
        let ordered_actions = canonical_order(commit_info, &self.actions, &self.app_transactions);

        Ok(PreparedTransaction {
            log_store: table.log_store().clone(),
            history: table.history().clone(),
            clock: table.clock().clone(),
            read_snapshot,
            ordered_actions,
            read_files: self.read_files,
            max_retries: self.max_retries,
        })
    }

    /// No path staged as both add and remove; any protocol/metadata
    /// upgrade appears at most once; every staged `AddFile`'s partition
    /// keys match the table's partition schema (spec.md §4.6 step 1).
    fn validate(&self, read_snapshot: &Snapshot) -> DeltaResult<()> {
        let added: HashSet<&str> = self.actions.iter().filter_map(|a| a.as_add()).map(|f| f.path.as_str()).collect();
        let removed: HashSet<&str> = self.actions.iter().filter_map(|a| a.as_remove()).map(|f| f.path.as_str()).collect();
        if let Some(path) = added.intersection(&removed).next() {
            return Err(
                TransactionError::InvalidCommit(format!("path staged as both add and remove: {path}")).into(),
            );
        }
        let protocol_count = self.actions.iter().filter(|a| matches!(a, Action::Protocol(_))).count();
        if protocol_count > 1 {
            return Err(TransactionError::InvalidCommit("more than one Protocol action staged".to_string()).into());
        }
        let metadata_count = self.actions.iter().filter(|a| matches!(a, Action::Metadata(_))).count();
        if metadata_count > 1 {
            return Err(TransactionError::InvalidCommit("more than one Metadata action staged".to_string()).into());
        }

        let effective_metadata = self
            .actions
            .iter()
            .find_map(|a| match a {
                Action::Metadata(m) => Some(m),
                _ => None,
            })
            .or_else(|| read_snapshot.metadata());
        if let Some(metadata) = effective_metadata {
            let partition_columns: HashSet<&str> = metadata.partition_columns.iter().map(String::as_str).collect();
            for add in self.actions.iter().filter_map(|a| a.as_add()) {
                let staged_keys: HashSet<&str> = add.partition_values.keys().map(String::as_str).collect();
                if staged_keys != partition_columns {
                    return Err(TransactionError::InvalidCommit(format!(
                        "AddFile {:?} partition keys {:?} do not match table partition schema {:?}",
                        add.path, staged_keys, partition_columns
                    ))
                    .into());
                }
            }
        }
        Ok(())
    }
}

/// Canonical commit-file action order: `CommitInfo, Protocol, Metadata,
/// SetTransaction*, RemoveFile*, AddFile*, DomainMetadata*`. Action
/// types not covered by that ordering (`AddCDCFile`, unrecognised
/// actions) are appended at the end, after everything else.
fn canonical_order(commit_info: CommitInfo, actions: &[Action], app_transactions: &[Transaction]) -> Vec<Action> {
    let mut protocol = Vec::new();
    let mut metadata = Vec::new();
    let mut set_txn: Vec<Action> = app_transactions.iter().cloned().map(Action::Txn).collect();
    let mut removes = Vec::new();
    let mut adds = Vec::new();
    let mut domain_metadata = Vec::new();
    let mut trailing = Vec::new();

    for action in actions {
        match action {
            Action::Protocol(_) => protocol.push(action.clone()),
            Action::Metadata(_) => metadata.push(action.clone()),
            Action::Txn(_) => set_txn.push(action.clone()),
            Action::Remove(_) => removes.push(action.clone()),
            Action::Add(_) => adds.push(action.clone()),
            Action::DomainMetadata(_) => domain_metadata.push(action.clone()),
            Action::CommitInfo(_) => {}
            Action::Cdc(_) | Action::Unknown { .. } => trailing.push(action.clone()),
        }
    }

    let mut ordered = Vec::with_capacity(
        1 + protocol.len() + metadata.len() + set_txn.len() + removes.len() + adds.len() + domain_metadata.len() + trailing.len(),
    );
    ordered.push(Action::CommitInfo(commit_info));
    ordered.extend(protocol);
    ordered.extend(metadata);
    ordered.extend(set_txn);
    ordered.extend(removes);
    ordered.extend(adds);
    ordered.extend(domain_metadata);
    ordered.extend(trailing);
    ordered
}

/// A validated, canonically ordered commit ready to attempt writing.
/// This is the `Prepared` state of the transaction state machine.
pub struct PreparedTransaction {
    log_store: LogStoreRef,
    history: HistoryManager,
    clock: Arc<dyn Clock>,
    read_snapshot: Arc<Snapshot>,
    ordered_actions: Vec<Action>,
    read_files: HashSet<String>,
    max_retries: usize,
}

impl PreparedTransaction {
    pub fn ordered_actions(&self) -> &[Action] {
        &self.ordered_actions
    }

    /// spec.md §4.6 steps 2-4: attempt the write at `readV + 1`, and on
    /// `FileAlreadyExists` rebase past each winner (checking for
    /// conflicts) and retry, up to `max_retries` times. Terminal states
    /// are `Committed` (returns `Ok`) or `Aborted` (returns `Err` and
    /// writes nothing).
    #[tracing::instrument(skip(self), fields(attempt_version = self.read_snapshot.version() + 1))]
    pub async fn commit(self) -> DeltaResult<FinalizedCommit> {
        let PreparedTransaction {
            log_store,
            history,
            clock,
            mut read_snapshot,
            ordered_actions,
            read_files,
            max_retries,
        } = self;

        let mut attempt_version = read_snapshot.version() + 1;
        let mut retries = 0usize;

        loop {
            let payload = serialize_commit(&ordered_actions)?;
            match log_store.write(&commit_uri_from_version(attempt_version), payload, false).await {
                Ok(()) => {
                    let committed_snapshot = read_snapshot.advance(attempt_version, &ordered_actions);
                    tracing::debug!(version = attempt_version, retries, "commit succeeded");
                    let checkpoint_written =
                        maybe_write_checkpoint(log_store.as_ref(), &committed_snapshot, clock.as_ref()).await;
                    return Ok(FinalizedCommit {
                        version: attempt_version,
                        timestamp: commit_timestamp(&ordered_actions),
                        snapshot: committed_snapshot,
                        num_retries: retries,
                        checkpoint_written,
                    });
                }
                Err(DeltaLogError::FileAlreadyExists(_)) => {
                    if retries >= max_retries {
                        return Err(TransactionError::MaxCommitAttempts(max_retries).into());
                    }
                    retries += 1;
                    tracing::warn!(attempt_version, retries, "commit race lost, checking for conflicts");

                    let winners = history.get_changes(attempt_version).await?;
                    for winner in winners {
                        let transaction_info = TransactionInfo::new(&read_snapshot, read_files.clone(), &ordered_actions);
                        let summary = WinningCommitSummary::new(winner.version, winner.actions.clone());
                        ConflictChecker::new(transaction_info, summary)
                            .check_conflicts()
                            .map_err(TransactionError::from)?;
                        read_snapshot = Arc::new(read_snapshot.advance(winner.version, &winner.actions));
                        attempt_version = winner.version + 1;
                    }
                }
                Err(other) => return Err(other),
            }
        }
    }
}

fn serialize_commit(actions: &[Action]) -> DeltaResult<bytes::Bytes> {
    let mut lines = Vec::with_capacity(actions.len());
    for action in actions {
        lines.push(action.to_json()?);
    }
    Ok(bytes::Bytes::from(lines.join("\n")))
}

fn commit_timestamp(actions: &[Action]) -> i64 {
    actions
        .iter()
        .find_map(|a| match a {
            Action::CommitInfo(info) => info.timestamp,
            _ => None,
        })
        .unwrap_or(0)
}

/// spec.md §4.8: best-effort checkpoint after a successful commit, every
/// `checkpointInterval` versions. Never fails the commit itself.
async fn maybe_write_checkpoint(log_store: &dyn crate::logstore::LogStore, snapshot: &Snapshot, clock: &dyn Clock) -> bool {
    let Some(metadata) = snapshot.metadata() else {
        return false;
    };
    let interval = TableConfig::new(metadata).checkpoint_interval().max(1);
    if snapshot.version() % interval != 0 {
        return false;
    }
    match checkpoints::write_checkpoint(log_store, snapshot, clock.now_millis()).await {
        Ok(_) => true,
        Err(e) => {
            tracing::warn!(version = snapshot.version(), error = %e, "checkpoint write failed; commit remains valid");
            false
        }
    }
}

/// Terminal `Committed` state: the version and timestamp the commit
/// landed at, the resulting snapshot (so the caller can update its
/// `DeltaLog` without a redundant re-read), and whether a checkpoint was
/// written alongside it.
#[derive(Debug)]
pub struct FinalizedCommit {
    pub version: i64,
    pub timestamp: i64,
    pub snapshot: Snapshot,
    pub num_retries: usize,
    pub checkpoint_written: bool,
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use object_store::memory::InMemory;
    use object_store::path::Path;

    use super::*;
    use crate::clock::FixedClock;
    use crate::kernel::{AddFile, Metadata, Protocol, RemoveFile, State};
    use crate::logstore::{commit_uri_from_version, Backend, DefaultLogStore};

    fn store() -> LogStoreRef {
        Arc::new(DefaultLogStore::new(
            Arc::new(InMemory::new()),
            Path::from(""),
            "memory://",
            Backend::Memory,
        ))
    }

    fn empty_table(log_store: LogStoreRef) -> DeltaLog {
        DeltaLog::from_snapshot(log_store, Arc::new(FixedClock(1_700_000_000_000)), Snapshot::new(-1, State::new(0)))
    }

    /// Seeds a one-commit table (`seed.parquet`) and reopens it through
    /// the normal replay path, mirroring a writer starting from an
    /// already-existing table rather than a genesis commit.
    async fn seeded_table(log_store: LogStoreRef) -> DeltaLog {
        let genesis = empty_table(log_store.clone());
        CommitBuilder::new("CREATE TABLE")
            .with_actions(vec![
                Action::Protocol(Protocol::new(1, 2)),
                Action::Metadata(Metadata::new("{}", vec![])),
                Action::Add(AddFile::new("seed.parquet", 1, 0, true)),
            ])
            .prepare(&genesis)
            .unwrap()
            .commit()
            .await
            .unwrap();
        DeltaLog::open_with_clock(log_store, Arc::new(FixedClock(1_700_000_000_000)))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn genesis_commit_lands_at_version_zero() {
        let log_store = store();
        let table = empty_table(log_store.clone());

        let finalized = CommitBuilder::new("CREATE TABLE")
            .with_actions(vec![
                Action::Protocol(Protocol::new(1, 2)),
                Action::Metadata(Metadata::new("{}", vec![])),
                Action::Add(AddFile::new("a.parquet", 100, 1_700_000_000_000, true)),
            ])
            .prepare(&table)
            .unwrap()
            .commit()
            .await
            .unwrap();

        assert_eq!(finalized.version, 0);
        assert_eq!(finalized.num_retries, 0);
        assert_eq!(finalized.snapshot.num_of_files(), 1);
        assert_eq!(finalized.snapshot.protocol().unwrap().min_writer_version, 2);
        assert!(log_store.exists(&commit_uri_from_version(0)).await.unwrap());
    }

    #[tokio::test]
    async fn add_with_unknown_partition_key_is_rejected() {
        let log_store = store();
        let table = empty_table(log_store.clone());

        let mut partition_values = std::collections::HashMap::new();
        partition_values.insert("date".to_string(), Some("2024-01-01".to_string()));

        let err = CommitBuilder::new("CREATE TABLE")
            .with_actions(vec![
                Action::Protocol(Protocol::new(1, 2)),
                Action::Metadata(Metadata::new("{}", vec![])),
                Action::Add(
                    AddFile::new("a.parquet", 100, 1_700_000_000_000, true).with_partition_values(partition_values),
                ),
            ])
            .prepare(&table)
            .unwrap_err();

        assert!(matches!(
            err,
            DeltaLogError::Transaction(TransactionError::InvalidCommit(_))
        ));
    }

    #[tokio::test]
    async fn add_matching_partition_schema_is_accepted() {
        let log_store = store();
        let table = empty_table(log_store.clone());

        let mut partition_values = std::collections::HashMap::new();
        partition_values.insert("date".to_string(), Some("2024-01-01".to_string()));

        let finalized = CommitBuilder::new("CREATE TABLE")
            .with_actions(vec![
                Action::Protocol(Protocol::new(1, 2)),
                Action::Metadata(Metadata::new("{}", vec!["date".to_string()])),
                Action::Add(
                    AddFile::new("a.parquet", 100, 1_700_000_000_000, true).with_partition_values(partition_values),
                ),
            ])
            .prepare(&table)
            .unwrap()
            .commit()
            .await
            .unwrap();

        assert_eq!(finalized.version, 0);
    }

    #[tokio::test]
    async fn concurrent_appends_with_disjoint_paths_both_land_after_rebase() {
        let log_store = store();
        let table = seeded_table(log_store.clone()).await;

        let txn_a = CommitBuilder::new("WRITE")
            .with_actions(vec![Action::Add(AddFile::new("b.parquet", 1, 0, true))])
            .prepare(&table)
            .unwrap();

        // B races ahead and lands first, at the version A also targeted.
        let finalized_b = CommitBuilder::new("WRITE")
            .with_actions(vec![Action::Add(AddFile::new("c.parquet", 1, 0, true))])
            .prepare(&table)
            .unwrap()
            .commit()
            .await
            .unwrap();
        assert_eq!(finalized_b.version, 1);

        let finalized_a = txn_a.commit().await.unwrap();
        assert_eq!(finalized_a.version, 2);
        assert_eq!(finalized_a.num_retries, 1);
        assert!(finalized_a.snapshot.all_files().any(|f| f.path == "b.parquet"));
        assert!(finalized_a.snapshot.all_files().any(|f| f.path == "c.parquet"));
        assert!(finalized_a.snapshot.all_files().any(|f| f.path == "seed.parquet"));
    }

    #[tokio::test]
    async fn concurrent_delete_delete_conflict_aborts_the_loser() {
        let log_store = store();
        let table = seeded_table(log_store.clone()).await;

        // Neither side declares `seed.parquet` as read, so the race is
        // adjudicated purely on the delete/delete overlap, not a
        // concurrent-delete-of-something-you-read conflict.
        let txn_a = CommitBuilder::new("DELETE")
            .with_actions(vec![Action::Remove(RemoveFile::new(
                "seed.parquet",
                1_700_000_000_000,
                true,
            ))])
            .prepare(&table)
            .unwrap();

        CommitBuilder::new("DELETE")
            .with_actions(vec![Action::Remove(RemoveFile::new(
                "seed.parquet",
                1_700_000_000_000,
                true,
            ))])
            .prepare(&table)
            .unwrap()
            .commit()
            .await
            .unwrap();

        let err = txn_a.commit().await.unwrap_err();
        assert!(matches!(
            err,
            DeltaLogError::Transaction(TransactionError::Conflict(ConflictError::ConcurrentDeleteDelete { .. }))
        ));
    }

    #[tokio::test]
    async fn max_retries_exhausted_aborts_without_writing() {
        let log_store = store();
        let table = seeded_table(log_store.clone()).await;

        let txn = CommitBuilder::new("WRITE")
            .with_actions(vec![Action::Add(AddFile::new("z.parquet", 1, 0, true))])
            .with_max_retries(0)
            .prepare(&table)
            .unwrap();

        // Any other writer landing at the same target version exhausts
        // the retry budget immediately since max_retries is 0.
        CommitBuilder::new("WRITE")
            .with_actions(vec![Action::Add(AddFile::new("y.parquet", 1, 0, true))])
            .prepare(&table)
            .unwrap()
            .commit()
            .await
            .unwrap();

        let err = txn.commit().await.unwrap_err();
        assert!(matches!(
            err,
            DeltaLogError::Transaction(TransactionError::MaxCommitAttempts(0))
        ));
    }
}
