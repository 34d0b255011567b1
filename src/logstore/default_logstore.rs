//! [`LogStore`] for backends that expose a genuine conditional-write
//! primitive through `object_store`'s `PutMode::Create`: the local
//! filesystem (`O_CREAT|O_EXCL`, staged via a temp file + rename
//! internally), Azure Blob (`If-None-Match: *`), and GCS
//! (`x-goog-if-generation-match: 0`). All three get the same wrapper;
//! what differs is which `object_store` builder produced the backing
//! store and what `is_partial_write_visible`/`name` report.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::TryStreamExt;
use object_store::path::Path;
use object_store::{ObjectStore, PutMode, PutOptions};

use crate::errors::{DeltaLogError, DeltaResult};
use crate::logstore::{split_lines, FileMeta, LogStore, DELTA_LOG_DIR};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Local,
    Azure,
    Gcs,
    Memory,
}

impl Backend {
    fn partial_write_visible(self) -> bool {
        // Local staging still exposes the temp file mid-write to anyone
        // listing the directory; the conditional object_store backends
        // publish atomically once the PUT completes.
        matches!(self, Backend::Local)
    }

    fn name(self) -> &'static str {
        match self {
            Backend::Local => "LocalLogStore",
            Backend::Azure => "AzureLogStore",
            Backend::Gcs => "GcsLogStore",
            Backend::Memory => "MemoryLogStore",
        }
    }
}

#[derive(Debug)]
pub struct DefaultLogStore {
    store: Arc<dyn ObjectStore>,
    root: Path,
    root_display: String,
    backend: Backend,
}

impl DefaultLogStore {
    pub fn new(store: Arc<dyn ObjectStore>, root: Path, root_display: impl Into<String>, backend: Backend) -> Self {
        DefaultLogStore {
            store,
            root,
            root_display: root_display.into(),
            backend,
        }
    }
}

#[async_trait]
impl LogStore for DefaultLogStore {
    async fn read_lines(&self, path: &Path) -> DeltaResult<Vec<String>> {
        match self.store.get(path).await {
            Ok(result) => {
                let bytes = result
                    .bytes()
                    .await
                    .map_err(|e| DeltaLogError::from_object_store_write(path.as_ref(), e))?;
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
        let mode = if overwrite {
            PutMode::Overwrite
        } else {
            PutMode::Create
        };
        let opts = PutOptions::from(mode);
        match self.store.put_opts(path, payload.into(), opts).await {
            Ok(_) => Ok(()),
            Err(object_store::Error::AlreadyExists { .. }) => {
                Err(DeltaLogError::FileAlreadyExists(path.to_string()))
            }
            Err(e) => Err(e.into()),
        }
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
        self.backend.partial_write_visible()
    }

    fn root(&self) -> &Path {
        &self.root
    }

    fn object_store(&self) -> Arc<dyn ObjectStore> {
        self.store.clone()
    }

    fn name(&self) -> &'static str {
        self.backend.name()
    }
}

#[cfg(test)]
mod tests {
    use object_store::memory::InMemory;

    use super::*;

    fn store() -> DefaultLogStore {
        DefaultLogStore::new(Arc::new(InMemory::new()), Path::from(""), "memory://", Backend::Memory)
    }

    #[tokio::test]
    async fn exists_is_true_for_non_utf8_object() {
        // A Parquet checkpoint's footer/statistics routinely contain
        // bytes >= 0x80; `exists` must not decode the body as UTF-8 to
        // answer existence (see `LogStore::exists`'s default impl).
        let log_store = store();
        let path = object_store::path::Path::from("_delta_log/00000000000000000000.checkpoint.parquet");
        log_store.write(&path, Bytes::from_static(&[0xff, 0xfe, 0x00, 0x80]), false).await.unwrap();
        assert!(log_store.exists(&path).await.unwrap());
    }

    #[tokio::test]
    async fn exists_is_false_for_missing_object() {
        let log_store = store();
        let path = object_store::path::Path::from("_delta_log/_last_checkpoint");
        assert!(!log_store.exists(&path).await.unwrap());
    }
}
