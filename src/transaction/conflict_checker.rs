//! The five conflict checks run, in order, between an in-flight
//! transaction and each commit that won the race against it.

use std::collections::HashSet;

use crate::kernel::{Action, Snapshot};
use crate::table::TableConfig;

/// Why a transaction was aborted after losing a race to a concurrent
/// commit. Variants are listed in the order they're checked;
/// `ConflictChecker::check_conflicts` fails fast on the first match.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ConflictError {
    #[error("protocol changed by concurrent commit {winner_version}")]
    ProtocolChanged { winner_version: i64 },

    #[error("metadata changed by concurrent commit {winner_version}")]
    MetadataChanged { winner_version: i64 },

    #[error(
        "table is append-only; concurrent commit {winner_version} (or this transaction) removes a file with dataChange=true"
    )]
    AppendOnlyViolation { winner_version: i64 },

    #[error("concurrent append: {path:?} added by commit {winner_version} was in this transaction's read set")]
    ConcurrentAppend { winner_version: i64, path: String },

    #[error("concurrent delete: {path:?} removed by commit {winner_version} was in this transaction's read set")]
    ConcurrentDeleteRead { winner_version: i64, path: String },

    #[error(
        "concurrent delete: {path:?} removed by both commit {winner_version} and this transaction"
    )]
    ConcurrentDeleteDelete { winner_version: i64, path: String },

    #[error("transaction id {app_id:?} reused by concurrent commit {winner_version}")]
    ConcurrentTransaction { winner_version: i64, app_id: String },
}

/// One commit that won the race against the in-flight transaction: its
/// version and the actions it wrote, in file order.
#[derive(Debug, Clone)]
pub struct WinningCommitSummary {
    pub version: i64,
    pub actions: Vec<Action>,
}

impl WinningCommitSummary {
    pub fn new(version: i64, actions: Vec<Action>) -> Self {
        WinningCommitSummary { version, actions }
    }

    fn changes_protocol(&self) -> bool {
        self.actions.iter().any(|a| matches!(a, Action::Protocol(_)))
    }

    fn changes_metadata(&self) -> bool {
        self.actions.iter().any(|a| matches!(a, Action::Metadata(_)))
    }

    fn has_data_changing_remove(&self) -> bool {
        self.actions
            .iter()
            .any(|a| matches!(a, Action::Remove(r) if r.data_change))
    }

    fn added_paths(&self) -> impl Iterator<Item = &str> {
        self.actions.iter().filter_map(|a| a.as_add()).map(|f| f.path.as_str())
    }

    fn removed_paths(&self) -> impl Iterator<Item = &str> {
        self.actions.iter().filter_map(|a| a.as_remove()).map(|f| f.path.as_str())
    }

    fn app_ids(&self) -> impl Iterator<Item = &str> {
        self.actions.iter().filter_map(|a| match a {
            Action::Txn(t) => Some(t.app_id.as_str()),
            _ => None,
        })
    }
}

/// Everything about the in-flight transaction a conflict check needs:
/// the snapshot it was derived from, the paths it read (for
/// `ConcurrentAppend`/`ConcurrentDeleteRead`), and the actions it has
/// staged (for `ConcurrentDeleteDelete` and the metadata/transaction-id
/// checks).
pub struct TransactionInfo<'a> {
    pub read_snapshot: &'a Snapshot,
    pub read_files: HashSet<String>,
    pub staged_actions: &'a [Action],
}

impl<'a> TransactionInfo<'a> {
    pub fn new(read_snapshot: &'a Snapshot, read_files: HashSet<String>, staged_actions: &'a [Action]) -> Self {
        TransactionInfo {
            read_snapshot,
            read_files,
            staged_actions,
        }
    }

    fn changes_metadata(&self) -> bool {
        self.staged_actions.iter().any(|a| matches!(a, Action::Metadata(_)))
    }

    fn staged_add_or_remove_paths(&self) -> HashSet<&str> {
        self.staged_actions
            .iter()
            .filter_map(|a| a.as_add().map(|f| f.path.as_str()).or_else(|| a.as_remove().map(|f| f.path.as_str())))
            .collect()
    }

    fn staged_app_ids(&self) -> HashSet<&str> {
        self.staged_actions
            .iter()
            .filter_map(|a| match a {
                Action::Txn(t) => Some(t.app_id.as_str()),
                _ => None,
            })
            .collect()
    }

    fn append_only(&self) -> bool {
        self.read_snapshot
            .metadata()
            .map(|m| TableConfig::new(m).append_only())
            .unwrap_or(false)
    }
}

/// Runs the ordered conflict checks between one
/// `TransactionInfo` and one `WinningCommitSummary`.
pub struct ConflictChecker<'a> {
    transaction: TransactionInfo<'a>,
    winner: WinningCommitSummary,
}

impl<'a> ConflictChecker<'a> {
    pub fn new(transaction: TransactionInfo<'a>, winner: WinningCommitSummary) -> Self {
        ConflictChecker { transaction, winner }
    }

    pub fn check_conflicts(&self) -> Result<(), ConflictError> {
        self.check_protocol_changed()?;
        self.check_metadata_changed()?;
        self.check_append_only()?;
        self.check_concurrent_file_updates()?;
        self.check_transaction_reuse()?;
        Ok(())
    }

    fn check_protocol_changed(&self) -> Result<(), ConflictError> {
        if self.winner.changes_protocol() {
            return Err(ConflictError::ProtocolChanged {
                winner_version: self.winner.version,
            });
        }
        Ok(())
    }

    fn check_metadata_changed(&self) -> Result<(), ConflictError> {
        if self.winner.changes_metadata() && self.transaction.changes_metadata() {
            return Err(ConflictError::MetadataChanged {
                winner_version: self.winner.version,
            });
        }
        Ok(())
    }

    fn check_append_only(&self) -> Result<(), ConflictError> {
        if !self.transaction.append_only() {
            return Ok(());
        }
        let txn_has_data_changing_remove = self
            .transaction
            .staged_actions
            .iter()
            .any(|a| matches!(a, Action::Remove(r) if r.data_change));
        if self.winner.has_data_changing_remove() || txn_has_data_changing_remove {
            return Err(ConflictError::AppendOnlyViolation {
                winner_version: self.winner.version,
            });
        }
        Ok(())
    }

    fn check_concurrent_file_updates(&self) -> Result<(), ConflictError> {
        for path in self.winner.added_paths() {
            if self.transaction.read_files.contains(path) {
                return Err(ConflictError::ConcurrentAppend {
                    winner_version: self.winner.version,
                    path: path.to_string(),
                });
            }
        }
        let staged = self.transaction.staged_add_or_remove_paths();
        for path in self.winner.removed_paths() {
            if self.transaction.read_files.contains(path) {
                return Err(ConflictError::ConcurrentDeleteRead {
                    winner_version: self.winner.version,
                    path: path.to_string(),
                });
            }
            if staged.contains(path) {
                return Err(ConflictError::ConcurrentDeleteDelete {
                    winner_version: self.winner.version,
                    path: path.to_string(),
                });
            }
        }
        Ok(())
    }

    fn check_transaction_reuse(&self) -> Result<(), ConflictError> {
        let staged_app_ids = self.transaction.staged_app_ids();
        for app_id in self.winner.app_ids() {
            if staged_app_ids.contains(app_id) {
                return Err(ConflictError::ConcurrentTransaction {
                    winner_version: self.winner.version,
                    app_id: app_id.to_string(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::{AddFile, Metadata, Protocol, RemoveFile, State};

    fn snapshot_with_config(configuration: std::collections::HashMap<String, Option<String>>) -> Snapshot {
        let mut state = State::new(0);
        state.protocol = Some(Protocol::new(1, 2));
        state.metadata = Some(Metadata::new("{}", vec![]).with_configuration(configuration));
        Snapshot::new(0, state)
    }

    #[test]
    fn protocol_change_wins_over_everything() {
        let snapshot = snapshot_with_config(Default::default());
        let txn = TransactionInfo::new(&snapshot, Default::default(), &[]);
        let winner = WinningCommitSummary::new(1, vec![Action::Protocol(Protocol::new(2, 5))]);
        let checker = ConflictChecker::new(txn, winner);
        assert_eq!(
            checker.check_conflicts(),
            Err(ConflictError::ProtocolChanged { winner_version: 1 })
        );
    }

    #[test]
    fn concurrent_append_to_read_path_conflicts() {
        let snapshot = snapshot_with_config(Default::default());
        let mut read_files = std::collections::HashSet::new();
        read_files.insert("a.parquet".to_string());
        let txn = TransactionInfo::new(&snapshot, read_files, &[]);
        let winner = WinningCommitSummary::new(1, vec![Action::Add(AddFile::new("a.parquet", 1, 0, true))]);
        let checker = ConflictChecker::new(txn, winner);
        assert_eq!(
            checker.check_conflicts(),
            Err(ConflictError::ConcurrentAppend {
                winner_version: 1,
                path: "a.parquet".to_string()
            })
        );
    }

    #[test]
    fn disjoint_appends_do_not_conflict() {
        let snapshot = snapshot_with_config(Default::default());
        let txn_actions = vec![Action::Add(AddFile::new("b.parquet", 1, 0, true))];
        let txn = TransactionInfo::new(&snapshot, Default::default(), &txn_actions);
        let winner = WinningCommitSummary::new(1, vec![Action::Add(AddFile::new("a.parquet", 1, 0, true))]);
        let checker = ConflictChecker::new(txn, winner);
        assert_eq!(checker.check_conflicts(), Ok(()));
    }

    #[test]
    fn concurrent_delete_delete_conflicts() {
        let snapshot = snapshot_with_config(Default::default());
        let txn_actions = vec![Action::Remove(RemoveFile::new("a.parquet", 5, false))];
        let txn = TransactionInfo::new(&snapshot, Default::default(), &txn_actions);
        let winner = WinningCommitSummary::new(1, vec![Action::Remove(RemoveFile::new("a.parquet", 5, false))]);
        let checker = ConflictChecker::new(txn, winner);
        assert_eq!(
            checker.check_conflicts(),
            Err(ConflictError::ConcurrentDeleteDelete {
                winner_version: 1,
                path: "a.parquet".to_string()
            })
        );
    }

    #[test]
    fn append_only_rejects_data_changing_remove() {
        let mut config = std::collections::HashMap::new();
        config.insert("delta.appendOnly".to_string(), Some("true".to_string()));
        let snapshot = snapshot_with_config(config);
        let txn = TransactionInfo::new(&snapshot, Default::default(), &[]);
        let winner = WinningCommitSummary::new(1, vec![Action::Remove(RemoveFile::new("a.parquet", 5, true))]);
        let checker = ConflictChecker::new(txn, winner);
        assert_eq!(
            checker.check_conflicts(),
            Err(ConflictError::AppendOnlyViolation { winner_version: 1 })
        );
    }

    #[test]
    fn transaction_id_reuse_conflicts() {
        let snapshot = snapshot_with_config(Default::default());
        let txn_actions = vec![Action::Txn(crate::kernel::Transaction::new("app-1", 3))];
        let txn = TransactionInfo::new(&snapshot, Default::default(), &txn_actions);
        let winner = WinningCommitSummary::new(1, vec![Action::Txn(crate::kernel::Transaction::new("app-1", 2))]);
        let checker = ConflictChecker::new(txn, winner);
        assert_eq!(
            checker.check_conflicts(),
            Err(ConflictError::ConcurrentTransaction {
                winner_version: 1,
                app_id: "app-1".to_string()
            })
        );
    }
}
