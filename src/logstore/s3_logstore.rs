//! [`LogStore`] for S3-compatible backends that lack a conditional PUT.
//!
//! S3 PUT is atomic once it completes, so `is_partial_write_visible` is
//! `false`, but without `If-None-Match` there is no way to ask the
//! backend itself to refuse an overwrite. This store serialises writes
//! through a process-local mutex and does a read-before-write existence
//! check. **This only protects against races between writers inside this
//! process** — multiple processes (or machines) writing to the same
//! table concurrently can still both succeed, each silently clobbering
//! the other's commit. Spec.md §9 documents this as an accepted
//! precondition rather than something this crate can close without an
//! external coordinator (e.g. a lock table); callers that need real
//! multi-writer safety must bring one.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::TryStreamExt;
use object_store::path::Path;
use object_store::ObjectStore;
use tokio::sync::Mutex;

use crate::errors::{DeltaLogError, DeltaResult};
use crate::logstore::{split_lines, FileMeta, LogStore, DELTA_LOG_DIR};

#[derive(Debug)]
pub struct S3LogStore {
    store: Arc<dyn ObjectStore>,
    root: Path,
    root_display: String,
    write_lock: Mutex<()>,
}

impl S3LogStore {
    pub fn new(store: Arc<dyn ObjectStore>, root: Path, root_display: impl Into<String>) -> Self {
        S3LogStore {
            store,
            root,
            root_display: root_display.into(),
            write_lock: Mutex::new(()),
        }
    }
}

#[async_trait]
impl LogStore for S3LogStore {
    async fn read_lines(&self, path: &Path) -> DeltaResult<Vec<String>> {
        match self.store.get(path).await {
            Ok(result) => {
                let bytes = result.bytes().await?;
                split_lines(&bytes)
            }
            Err(object_store::Error::NotFound { .. }) => {
                Err(DeltaLogError::FileNotFound(path.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn list_from(&self, prefix: &Path) -> DeltaResult<Vec<FileMeta>> {
        let log_dir = Path::from(DELTA_LOG_DIR);
        let mut stream = self.store.list(Some(&log_dir));
        let mut out = Vec::new();
        while let Some(meta) = stream.try_next().await? {
            if meta.location.as_ref() >= prefix.as_ref() {
                out.push(FileMeta {
                    location: meta.location,
                    size: meta.size as u64,
                    modification_time: meta.last_modified.timestamp_millis(),
                });
            }
        }
        out.sort_by(|a, b| a.location.as_ref().cmp(b.location.as_ref()));
        Ok(out)
    }

    async fn write(&self, path: &Path, payload: Bytes, overwrite: bool) -> DeltaResult<()> {
        if overwrite {
            self.store.put(path, payload.into()).await?;
            return Ok(());
        }

        // Hold the process-local lock across the existence check and the
        // put: without it two tasks in this process could both observe
        // "not found" and both succeed.
        let _guard = self.write_lock.lock().await;
        match self.store.head(path).await {
            Ok(_) => return Err(DeltaLogError::FileAlreadyExists(path.to_string())),
            Err(object_store::Error::NotFound { .. }) => {}
            Err(e) => return Err(e.into()),
        }
        self.store.put(path, payload.into()).await?;
        Ok(())
    }

    async fn delete(&self, path: &Path) -> DeltaResult<()> {
        match self.store.delete(path).await {
            Ok(()) => Ok(()),
            Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn resolve_path_on_physical_store(&self, path: &Path) -> String {
        format!("{}/{}", self.root_display.trim_end_matches('/'), path)
    }

    fn is_partial_write_visible(&self) -> bool {
        false
    }

    fn root(&self) -> &Path {
        &self.root
    }

    fn object_store(&self) -> Arc<dyn ObjectStore> {
        self.store.clone()
    }

    fn name(&self) -> &'static str {
        "S3LogStore"
    }
}
