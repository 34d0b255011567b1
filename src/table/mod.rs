//! The top-level table handle (spec.md §4.5, §5): wraps a [`LogStore`]
//! and a [`HistoryManager`], caches the latest materialised [`Snapshot`]
//! behind a lock, and exposes `update()` to compare-and-rebuild it.

pub mod config;
pub mod history;

use std::sync::{Arc, RwLock};

use object_store::path::Path;

pub use config::TableConfig;
pub use history::{HistoryManager, VersionLog};

use crate::clock::{Clock, SystemClock};
use crate::errors::{DeltaLogError, DeltaResult};
use crate::kernel::Snapshot;
use crate::logstore::{LogStoreRef, DELTA_LOG_DIR};

/// Owns the cached "current" view of a table and knows how to refresh
/// it. This is the handle a caller opens once per table and shares
/// across readers/writers (spec.md §5 "shared resources").
#[derive(Debug)]
pub struct DeltaLog {
    log_store: LogStoreRef,
    history: HistoryManager,
    clock: Arc<dyn Clock>,
    cached: RwLock<Arc<Snapshot>>,
}

impl DeltaLog {
    /// Opens a table by replaying it to its latest committed version.
    /// Fails if the log directory has no commits at all — callers
    /// creating a brand new table should go through
    /// [`crate::transaction::CommitBuilder`]'s genesis commit instead.
    pub async fn open(log_store: LogStoreRef) -> DeltaResult<Self> {
        Self::open_with_clock(log_store, Arc::new(SystemClock)).await
    }

    pub async fn open_with_clock(log_store: LogStoreRef, clock: Arc<dyn Clock>) -> DeltaResult<Self> {
        let history = HistoryManager::new(log_store.clone());
        let latest_version = latest_commit_version(log_store.as_ref()).await?;
        let retention_cutoff = config::default_retention_cutoff(clock.as_ref());
        let snapshot = history.get_snapshot_at(latest_version, retention_cutoff).await?;
        Ok(DeltaLog {
            log_store,
            history,
            clock,
            cached: RwLock::new(Arc::new(snapshot)),
        })
    }

    /// Construct a handle around an already-materialised snapshot,
    /// skipping the initial replay. Used by the transaction layer after a
    /// successful commit, and by tests.
    pub fn from_snapshot(log_store: LogStoreRef, clock: Arc<dyn Clock>, snapshot: Snapshot) -> Self {
        DeltaLog {
            history: HistoryManager::new(log_store.clone()),
            log_store,
            clock,
            cached: RwLock::new(Arc::new(snapshot)),
        }
    }

    pub fn log_store(&self) -> &LogStoreRef {
        &self.log_store
    }

    pub fn history(&self) -> &HistoryManager {
        &self.history
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// The cached snapshot as of the last `open`/`update`/`set_snapshot`.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.cached
            .read()
            .expect("DeltaLog snapshot lock poisoned")
            .clone()
    }

    /// Installs `snapshot` as the cached pointer unconditionally. Used by
    /// the transaction layer right after a commit succeeds, since it
    /// already knows the exact post-commit state and shouldn't pay for a
    /// redundant `update()`.
    pub fn set_snapshot(&self, snapshot: Snapshot) {
        *self.cached.write().expect("DeltaLog snapshot lock poisoned") = Arc::new(snapshot);
    }

    /// Compare-and-rebuild: if the log has commits newer than the cached
    /// snapshot, fold them on top of it (via `Snapshot::advance`) and
    /// swap the pointer. Concurrent callers may both observe staleness
    /// and both rebuild; the cached pointer simply ends up holding
    /// whichever finished last, since both converge to the same state
    /// for the same target version.
    pub async fn update(&self) -> DeltaResult<Arc<Snapshot>> {
        let current = self.snapshot();
        let latest_version = latest_commit_version(self.log_store.as_ref()).await?;
        if latest_version <= current.version() {
            return Ok(current);
        }

        let changes = self.history.get_changes(current.version() + 1).await?;
        let mut next = (*current).clone();
        for log in changes {
            if log.version > latest_version {
                break;
            }
            next = next.advance(log.version, &log.actions);
        }
        let updated = Arc::new(next);
        *self.cached.write().expect("DeltaLog snapshot lock poisoned") = updated.clone();
        Ok(updated)
    }
}

async fn latest_commit_version(log_store: &dyn crate::logstore::LogStore) -> DeltaResult<i64> {
    let files = log_store.list_from(&Path::from(DELTA_LOG_DIR)).await?;
    files
        .iter()
        .filter_map(|f| history::commit_version(&f.location))
        .max()
        .ok_or_else(|| DeltaLogError::InvalidTableLocation("log directory has no commits".to_string()))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use object_store::memory::InMemory;

    use super::*;
    use crate::clock::FixedClock;
    use crate::kernel::{Action, AddFile, Metadata, Protocol};
    use crate::logstore::{commit_uri_from_version, Backend, DefaultLogStore};

    fn store() -> LogStoreRef {
        Arc::new(DefaultLogStore::new(
            Arc::new(InMemory::new()),
            Path::from(""),
            "memory://",
            Backend::Memory,
        ))
    }

    async fn write_commit(log_store: &LogStoreRef, version: i64, actions: &[Action]) {
        let body = actions
            .iter()
            .map(|a| a.to_json().unwrap())
            .collect::<Vec<_>>()
            .join("\n");
        log_store
            .write(&commit_uri_from_version(version), bytes::Bytes::from(body), false)
            .await
            .unwrap();
    }

    fn genesis_actions() -> Vec<Action> {
        vec![
            Action::Protocol(Protocol::new(1, 2)),
            Action::Metadata(Metadata::new("{}", vec![])),
            Action::Add(AddFile::new("a.parquet", 1, 0, true)),
        ]
    }

    #[tokio::test]
    async fn open_replays_to_latest_version() {
        let log_store = store();
        write_commit(&log_store, 0, &genesis_actions()).await;
        write_commit(&log_store, 1, &[Action::Add(AddFile::new("b.parquet", 1, 0, true))]).await;

        let table = DeltaLog::open_with_clock(log_store, Arc::new(FixedClock(0))).await.unwrap();
        assert_eq!(table.snapshot().version(), 1);
        assert_eq!(table.snapshot().num_of_files(), 2);
    }

    #[tokio::test]
    async fn update_is_noop_when_already_current() {
        let log_store = store();
        write_commit(&log_store, 0, &genesis_actions()).await;
        let table = DeltaLog::open_with_clock(log_store, Arc::new(FixedClock(0))).await.unwrap();
        let updated = table.update().await.unwrap();
        assert_eq!(updated.version(), 0);
    }

    #[tokio::test]
    async fn update_picks_up_new_commits() {
        let log_store = store();
        write_commit(&log_store, 0, &genesis_actions()).await;
        let table = DeltaLog::open_with_clock(log_store.clone(), Arc::new(FixedClock(0))).await.unwrap();
        assert_eq!(table.snapshot().version(), 0);

        write_commit(&log_store, 1, &[Action::Add(AddFile::new("b.parquet", 1, 0, true))]).await;
        let updated = table.update().await.unwrap();
        assert_eq!(updated.version(), 1);
        assert_eq!(updated.num_of_files(), 2);
    }
}
