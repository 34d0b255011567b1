//! Folds a reverse-chronological stream of action batches into a
//! [`State`], per the rules in spec.md §4.3.
//!
//! The caller feeds batches newest-version-first (the tail of JSON delta
//! files, then the checkpoint for the latest version at or below the
//! target). Within a batch, actions must be in file order. `LogReplay`
//! tracks `added`/`removed` path sets across the *whole* fold, not per
//! batch, so a path mentioned at two different versions is only ever
//! applied once — at the newest version that mentions it.

use std::collections::HashSet;

use crate::errors::{DeltaLogError, DeltaResult};
use crate::kernel::actions::Action;
use crate::kernel::state::{AppTransaction, State};

/// Accumulates `added`/`removed` path sets across however many batches
/// are fed to it, then yields the resulting [`State`].
#[derive(Debug, Default)]
pub struct LogReplay {
    added: HashSet<String>,
    removed: HashSet<String>,
    seen_protocol: bool,
    seen_metadata: bool,
    seen_txn_app_ids: HashSet<String>,
    seen_domains: HashSet<String>,
    state: State,
}

impl LogReplay {
    pub fn new(min_file_retention_ts: i64) -> Self {
        LogReplay {
            state: State::new(min_file_retention_ts),
            ..Default::default()
        }
    }

    /// Seed the fold from a prior materialised state (e.g. the state at
    /// a checkpoint) rather than starting empty.
    pub fn seeded(mut seed: State) -> Self {
        let mut replay = LogReplay {
            seen_protocol: seed.protocol.is_some(),
            seen_metadata: seed.metadata.is_some(),
            seen_txn_app_ids: seed.set_transactions.keys().cloned().collect(),
            seen_domains: seed.domain_metadata.keys().cloned().collect(),
            added: seed.active_files.keys().cloned().collect(),
            removed: seed.tombstones.keys().cloned().collect(),
            state: State::default(),
        };
        std::mem::swap(&mut replay.state, &mut seed);
        replay
    }

    /// Fold one batch (already in file order) into the accumulator.
    pub fn apply_batch(&mut self, actions: impl IntoIterator<Item = Action>) {
        for action in actions {
            self.apply_one(action);
        }
    }

    fn apply_one(&mut self, action: Action) {
        match action {
            Action::Protocol(p) => {
                if !self.seen_protocol {
                    self.seen_protocol = true;
                    self.state.protocol = Some(p);
                }
            }
            Action::Metadata(m) => {
                if !self.seen_metadata {
                    self.seen_metadata = true;
                    self.state.metadata = Some(m);
                }
            }
            Action::Add(add) => {
                let already_handled = self.removed.contains(&add.path) || self.added.contains(&add.path);
                self.added.insert(add.path.clone());
                if !already_handled {
                    self.state.active_files.insert(add.path.clone(), add);
                }
            }
            Action::Remove(remove) => {
                let already_handled = self.removed.contains(&remove.path);
                self.removed.insert(remove.path.clone());
                if !already_handled && !self.added.contains(&remove.path) {
                    if remove.is_retained(self.state.min_file_retention_ts) {
                        self.state.tombstones.insert(remove.path.clone(), remove);
                    }
                }
            }
            Action::Txn(txn) => {
                if self.seen_txn_app_ids.insert(txn.app_id.clone()) {
                    self.state.set_transactions.insert(
                        txn.app_id,
                        AppTransaction {
                            version: txn.version,
                            last_updated: txn.last_updated,
                        },
                    );
                }
            }
            Action::DomainMetadata(dm) => {
                if self.seen_domains.insert(dm.domain.clone()) && !dm.removed {
                    self.state.domain_metadata.insert(dm.domain.clone(), dm);
                }
            }
            Action::CommitInfo(_) | Action::Cdc(_) | Action::Unknown { .. } => {}
        }
    }

    /// Consume the accumulator, requiring that both a `Protocol` and a
    /// `Metadata` were observed somewhere in the fold (spec.md §4.3).
    pub fn finish(self, version: i64) -> DeltaResult<State> {
        if !self.state.is_complete() {
            return Err(DeltaLogError::MissingProtocolOrMetadata(version));
        }
        Ok(self.state)
    }
}

/// Fold `batches` (newest-first, each already in file order) into a
/// `State`, failing if the result never observed a `Protocol` and
/// `Metadata`.
pub fn replay_to_state(
    version: i64,
    min_file_retention_ts: i64,
    batches: impl IntoIterator<Item = Vec<Action>>,
) -> DeltaResult<State> {
    let mut replay = LogReplay::new(min_file_retention_ts);
    for batch in batches {
        replay.apply_batch(batch);
    }
    replay.finish(version)
}

impl State {
    /// Apply one commit's actions (in canonical/file order, from a
    /// *newer* version than this state) directly on top of this state.
    /// This is the forward-direction counterpart to [`LogReplay`]: since
    /// there's exactly one newer batch at a time, the newest-wins rules
    /// collapse to a plain overwrite, which is what lets
    /// `snapshot(v)` built from scratch and `snapshot(v)` built as
    /// `snapshot(v-1)` plus this commit agree (spec.md §8).
    pub fn apply_commit(&mut self, actions: &[Action]) {
        for action in actions {
            match action {
                Action::Protocol(p) => self.protocol = Some(p.clone()),
                Action::Metadata(m) => self.metadata = Some(m.clone()),
                Action::Add(add) => {
                    self.tombstones.remove(&add.path);
                    self.active_files.insert(add.path.clone(), add.clone());
                }
                Action::Remove(remove) => {
                    self.active_files.remove(&remove.path);
                    if remove.is_retained(self.min_file_retention_ts) {
                        self.tombstones.insert(remove.path.clone(), remove.clone());
                    } else {
                        self.tombstones.remove(&remove.path);
                    }
                }
                Action::Txn(txn) => {
                    self.set_transactions.insert(
                        txn.app_id.clone(),
                        AppTransaction {
                            version: txn.version,
                            last_updated: txn.last_updated,
                        },
                    );
                }
                Action::DomainMetadata(dm) => {
                    if dm.removed {
                        self.domain_metadata.remove(&dm.domain);
                    } else {
                        self.domain_metadata.insert(dm.domain.clone(), dm.clone());
                    }
                }
                Action::CommitInfo(_) | Action::Cdc(_) | Action::Unknown { .. } => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::{AddFile, Metadata, Protocol, RemoveFile};

    fn genesis_batch() -> Vec<Action> {
        vec![
            Action::Protocol(Protocol::new(1, 2)),
            Action::Metadata(Metadata::new("{}", vec![])),
            Action::Add(AddFile::new("a.parquet", 100, 1700000000000, true)),
        ]
    }

    #[test]
    fn genesis_replay_produces_single_active_file() {
        let state = replay_to_state(0, 0, [genesis_batch()]).unwrap();
        assert_eq!(state.active_files.len(), 1);
        assert!(state.active_files.contains_key("a.parquet"));
    }

    #[test]
    fn missing_protocol_or_metadata_fails() {
        let batch = vec![Action::Add(AddFile::new("a.parquet", 1, 0, true))];
        let err = replay_to_state(0, 0, [batch]).unwrap_err();
        assert!(matches!(err, DeltaLogError::MissingProtocolOrMetadata(0)));
    }

    #[test]
    fn newer_remove_wins_over_older_add_in_backward_fold() {
        // newest-first: v1 removes a.parquet, v0 (genesis) added it.
        let v1 = vec![Action::Remove(RemoveFile::new("a.parquet", 1700000001000, true))];
        let v0 = genesis_batch();
        let state = replay_to_state(1, 0, [v1, v0]).unwrap();
        assert!(!state.active_files.contains_key("a.parquet"));
        assert!(state.tombstones.contains_key("a.parquet"));
    }

    #[test]
    fn expired_tombstone_is_dropped() {
        let v1 = vec![Action::Remove(RemoveFile::new("a.parquet", 100, true))];
        let v0 = genesis_batch();
        // retention cutoff is after the tombstone's deletion timestamp
        let state = replay_to_state(1, 1_000, [v1, v0]).unwrap();
        assert!(!state.tombstones.contains_key("a.parquet"));
    }

    #[test]
    fn incremental_apply_matches_from_scratch_replay() {
        let mut from_scratch_batches = vec![genesis_batch()];
        let newer = vec![Action::Add(AddFile::new("b.parquet", 50, 1700000002000, true))];
        from_scratch_batches.insert(0, newer.clone());
        let from_scratch = replay_to_state(1, 0, from_scratch_batches).unwrap();

        let mut incremental = replay_to_state(0, 0, [genesis_batch()]).unwrap();
        incremental.apply_commit(&newer);

        assert_eq!(from_scratch.active_files.len(), incremental.active_files.len());
        assert!(incremental.active_files.contains_key("a.parquet"));
        assert!(incremental.active_files.contains_key("b.parquet"));
    }
}
