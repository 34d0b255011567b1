//! Checkpoint writer and reader (spec.md §4.8).
//!
//! Checkpoint rows are plain JSON action objects bridged through
//! `arrow-json` into Arrow `RecordBatch`es and out to Parquet, then back
//! the same way on read. This keeps the checkpoint codec sharing the
//! exact same `Action::to_value`/`from_value` logic the commit-file
//! codec uses, rather than hand-maintaining a second, parallel mapping
//! from Rust structs to Arrow columns.

use std::io::Cursor;
use std::sync::Arc;

use bytes::Bytes;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{DeltaLogError, DeltaResult};
use crate::kernel::{Action, Snapshot};
use crate::logstore::{checkpoint_part_uri_from_version, checkpoint_uri_from_version, last_checkpoint_uri, LogStore};
use crate::table::config::TableConfig;

/// The number of checkpoint rows above which the writer splits the
/// output across multiple `part-i-of-n` files rather than one. Chosen to
/// keep any single Parquet file from growing unbounded on very large
/// tables; not part of the wire format, just this writer's policy.
const DEFAULT_CHECKPOINT_PART_ROWS: usize = 50_000;

/// The contents of `_delta_log/_last_checkpoint`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    pub version: i64,
    pub size: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parts: Option<u32>,
}

/// Materialise `snapshot` as a checkpoint at its own version and write it
/// (plus the `_last_checkpoint` pointer) to `log_store`. `now_millis` is
/// the cutoff basis for retained-tombstone filtering; callers pass the
/// commit timestamp of the version being checkpointed.
#[tracing::instrument(skip(log_store, snapshot), fields(version = snapshot.version()))]
pub async fn write_checkpoint(
    log_store: &dyn LogStore,
    snapshot: &Snapshot,
    now_millis: i64,
) -> DeltaResult<CheckpointMetadata> {
    let config = snapshot
        .metadata()
        .map(TableConfig::new)
        .unwrap_or_else(|| TableConfig::new(snapshot_metadata_placeholder()));
    let retention_cutoff = now_millis.saturating_sub(config.deleted_file_retention_duration().as_millis() as i64);

    let actions = checkpoint_actions(snapshot, retention_cutoff);
    let row_count = actions.len() as i64;
    let batches = actions_to_record_batches(&actions)?;

    let version = snapshot.version();
    let num_parts = if actions.len() <= DEFAULT_CHECKPOINT_PART_ROWS || batches.is_empty() {
        1
    } else {
        actions.len().div_ceil(DEFAULT_CHECKPOINT_PART_ROWS) as u32
    };

    if num_parts == 1 {
        let bytes = record_batches_to_parquet(&batches)?;
        log_store.write(&checkpoint_uri_from_version(version), bytes, true).await?;
    } else {
        let schema = batches
            .first()
            .map(|b| b.schema())
            .ok_or_else(|| DeltaLogError::InvalidAction("checkpoint has no rows to split".to_string()))?;
        let chunk_size = actions.len().div_ceil(num_parts as usize).max(1);
        for (i, chunk) in actions.chunks(chunk_size).enumerate() {
            let part_batches = actions_to_record_batches_with_schema(chunk, schema.clone())?;
            let bytes = record_batches_to_parquet(&part_batches)?;
            let path = checkpoint_part_uri_from_version(version, i as u32 + 1, num_parts);
            log_store.write(&path, bytes, true).await?;
        }
    }

    let meta = CheckpointMetadata {
        version,
        size: row_count,
        parts: if num_parts > 1 { Some(num_parts) } else { None },
    };
    let payload = Bytes::from(serde_json::to_vec(&meta)?);
    log_store.write(&last_checkpoint_uri(), payload, true).await?;

    tracing::debug!(version, rows = row_count, parts = ?meta.parts, "wrote checkpoint");

    if config.enable_expired_log_cleanup() {
        let cutoff = now_millis.saturating_sub(config.log_retention_duration().as_millis() as i64);
        expire_old_log_files(log_store, cutoff).await;
    }

    Ok(meta)
}

/// A `Metadata` with empty configuration, used only to source defaults
/// when a snapshot somehow has no metadata yet (pre-genesis; in practice
/// the transaction layer never checkpoints before the first commit).
fn snapshot_metadata_placeholder() -> &'static crate::kernel::Metadata {
    use std::sync::OnceLock;
    static PLACEHOLDER: OnceLock<crate::kernel::Metadata> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| crate::kernel::Metadata::new("{}", vec![]))
}

fn checkpoint_actions(snapshot: &Snapshot, retention_cutoff: i64) -> Vec<Action> {
    let state = snapshot.state();
    let mut actions = Vec::with_capacity(state.active_files.len() + state.tombstones.len() + 2);
    if let Some(protocol) = &state.protocol {
        actions.push(Action::Protocol(protocol.clone()));
    }
    if let Some(metadata) = &state.metadata {
        actions.push(Action::Metadata(metadata.clone()));
    }
    for (app_id, txn) in &state.set_transactions {
        actions.push(Action::Txn(crate::kernel::Transaction {
            app_id: app_id.clone(),
            version: txn.version,
            last_updated: txn.last_updated,
        }));
    }
    for add in state.active_files.values() {
        actions.push(Action::Add(add.clone()));
    }
    for remove in state.tombstones.values() {
        if remove.is_retained(retention_cutoff) {
            actions.push(Action::Remove(remove.clone()));
        }
    }
    for dm in state.domain_metadata.values() {
        actions.push(Action::DomainMetadata(dm.clone()));
    }
    actions
}

fn actions_to_record_batches(actions: &[Action]) -> DeltaResult<Vec<arrow_array::RecordBatch>> {
    if actions.is_empty() {
        return Ok(Vec::new());
    }
    let ndjson = actions_to_ndjson(actions)?;
    let cursor = Cursor::new(ndjson.as_bytes());
    let (schema, _) = arrow_json::reader::infer_json_schema_from_seekable(cursor, None)?;
    actions_to_record_batches_with_schema(actions, Arc::new(schema))
}

fn actions_to_record_batches_with_schema(
    actions: &[Action],
    schema: arrow_schema::SchemaRef,
) -> DeltaResult<Vec<arrow_array::RecordBatch>> {
    if actions.is_empty() {
        return Ok(Vec::new());
    }
    let ndjson = actions_to_ndjson(actions)?;
    let cursor = Cursor::new(ndjson.as_bytes());
    let reader = arrow_json::ReaderBuilder::new(schema).build(cursor)?;
    let mut batches = Vec::new();
    for batch in reader {
        batches.push(batch?);
    }
    Ok(batches)
}

fn actions_to_ndjson(actions: &[Action]) -> DeltaResult<String> {
    let mut out = String::new();
    for action in actions {
        out.push_str(&serde_json::to_string(&action.to_value()?)?);
        out.push('\n');
    }
    Ok(out)
}

fn record_batches_to_parquet(batches: &[arrow_array::RecordBatch]) -> DeltaResult<Bytes> {
    let schema = batches
        .first()
        .map(|b| b.schema())
        .ok_or_else(|| DeltaLogError::InvalidAction("no rows to write to checkpoint".to_string()))?;
    let mut buffer = Vec::new();
    {
        let mut writer = ArrowWriter::try_new(&mut buffer, schema, None)?;
        for batch in batches {
            writer.write(batch)?;
        }
        writer.close()?;
    }
    Ok(Bytes::from(buffer))
}

/// Read every row of a (possibly multi-part) checkpoint back into
/// `Action`s, in no particular order — replay only cares about set
/// membership, not file order, once a checkpoint is the replay seed.
pub async fn read_checkpoint(log_store: &dyn LogStore, meta: &CheckpointMetadata) -> DeltaResult<Vec<Action>> {
    let paths = match meta.parts {
        None => vec![checkpoint_uri_from_version(meta.version)],
        Some(parts) => (1..=parts)
            .map(|part| checkpoint_part_uri_from_version(meta.version, part, parts))
            .collect(),
    };

    let mut actions = Vec::new();
    for path in paths {
        let bytes = log_store
            .object_store()
            .get(&path)
            .await
            .map_err(|e| DeltaLogError::from_object_store_write(path.as_ref(), e))?
            .bytes()
            .await
            .map_err(|e| DeltaLogError::from_object_store_write(path.as_ref(), e))?;
        actions.extend(parquet_bytes_to_actions(bytes)?);
    }
    Ok(actions)
}

fn parquet_bytes_to_actions(bytes: Bytes) -> DeltaResult<Vec<Action>> {
    let builder = ParquetRecordBatchReaderBuilder::try_new(bytes)?;
    let reader = builder.build()?;
    let mut actions = Vec::new();
    for batch in reader {
        let batch = batch?;
        // `record_batches_to_json_rows` is deprecated upstream; go through
        // the same line-delimited writer the corpus uses to turn Arrow
        // batches back into JSON, then parse each line.
        let mut writer = arrow_json::LineDelimitedWriter::new(Vec::new());
        writer.write_batches(&[&batch])?;
        writer.finish()?;
        let ndjson = writer.into_inner();
        for line in ndjson.split(|&b| b == b'\n') {
            if line.is_empty() {
                continue;
            }
            let value: Value = serde_json::from_slice(line)?;
            actions.push(Action::from_value(value)?);
        }
    }
    Ok(actions)
}

/// Read `_last_checkpoint`, tolerating its absence (spec.md §4.4 step 1).
pub async fn read_last_checkpoint_pointer(log_store: &dyn LogStore) -> DeltaResult<Option<CheckpointMetadata>> {
    match log_store.read_lines(&last_checkpoint_uri()).await {
        Ok(lines) => {
            let Some(first) = lines.first() else {
                return Ok(None);
            };
            Ok(Some(serde_json::from_str(first)?))
        }
        Err(DeltaLogError::FileNotFound(_)) => Ok(None),
        Err(other) => Err(other),
    }
}

/// Best-effort deletion of delta/checkpoint files older than `cutoff_millis`
/// (spec.md §4.8 step 5). Errors are logged and swallowed; this never
/// fails a checkpoint write.
async fn expire_old_log_files(log_store: &dyn LogStore, cutoff_millis: i64) {
    let prefix = object_store::path::Path::from(crate::logstore::DELTA_LOG_DIR);
    let files = match log_store.list_from(&prefix).await {
        Ok(files) => files,
        Err(e) => {
            tracing::warn!(error = %e, "log cleanup: failed to list log directory");
            return;
        }
    };
    for file in files {
        if file.location.as_ref().ends_with("_last_checkpoint") {
            continue;
        }
        if file.modification_time >= cutoff_millis {
            continue;
        }
        if let Err(e) = log_store.delete(&file.location).await {
            tracing::warn!(path = %file.location, error = %e, "log cleanup: failed to delete expired log file");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::{AddFile, Metadata, Protocol, State};
    use crate::logstore::{Backend, DefaultLogStore};
    use object_store::memory::InMemory;

    fn store() -> DefaultLogStore {
        DefaultLogStore::new(
            Arc::new(InMemory::new()),
            object_store::path::Path::from(""),
            "memory://",
            Backend::Memory,
        )
    }

    fn sample_snapshot() -> Snapshot {
        let mut state = State::new(0);
        state.protocol = Some(Protocol::new(1, 2));
        state.metadata = Some(Metadata::new("{}", vec![]));
        state.active_files.insert(
            "a.parquet".to_string(),
            AddFile::new("a.parquet", 100, 1_700_000_000_000, true),
        );
        Snapshot::new(0, state)
    }

    #[tokio::test]
    async fn round_trips_checkpoint_through_parquet() {
        let log_store = store();
        let snapshot = sample_snapshot();
        let meta = write_checkpoint(&log_store, &snapshot, 1_700_000_000_000).await.unwrap();
        assert_eq!(meta.version, 0);
        assert_eq!(meta.parts, None);

        let actions = read_checkpoint(&log_store, &meta).await.unwrap();
        assert!(actions.iter().any(|a| matches!(a, Action::Protocol(_))));
        assert!(actions.iter().any(|a| matches!(a, Action::Metadata(_))));
        assert!(actions.iter().any(|a| a.as_add().map(|f| f.path == "a.parquet").unwrap_or(false)));
    }

    #[tokio::test]
    async fn last_checkpoint_pointer_round_trips() {
        let log_store = store();
        let snapshot = sample_snapshot();
        write_checkpoint(&log_store, &snapshot, 1_700_000_000_000).await.unwrap();
        let pointer = read_last_checkpoint_pointer(&log_store).await.unwrap().unwrap();
        assert_eq!(pointer.version, 0);
    }

    #[tokio::test]
    async fn missing_last_checkpoint_pointer_is_none() {
        let log_store = store();
        assert!(read_last_checkpoint_pointer(&log_store).await.unwrap().is_none());
    }
}
