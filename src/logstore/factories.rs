//! Built-in [`LogStoreFactory`](crate::logstore::registry::LogStoreFactory)
//! implementations, one per URL scheme `LogStoreRegistry::with_builtin_schemes`
//! wires up.

use std::collections::HashMap;
use std::sync::Arc;

use object_store::memory::InMemory;
use url::Url;

use crate::errors::{DeltaLogError, DeltaResult};
use crate::logstore::default_logstore::Backend;
use crate::logstore::registry::root_path_from_url;
use crate::logstore::{DefaultLogStore, LogStoreRef};

pub(crate) fn local_factory(location: &Url, _options: &HashMap<String, String>) -> DeltaResult<LogStoreRef> {
    let path = location
        .to_file_path()
        .map_err(|_| DeltaLogError::InvalidTableLocation(location.to_string()))?;
    let store = object_store::local::LocalFileSystem::new_with_prefix(&path)
        .map_err(|e| DeltaLogError::InvalidTableLocation(e.to_string()))?;
    Ok(Arc::new(DefaultLogStore::new(
        Arc::new(store),
        object_store::path::Path::from(""),
        path.display().to_string(),
        Backend::Local,
    )))
}

pub(crate) fn memory_factory(location: &Url, _options: &HashMap<String, String>) -> DeltaResult<LogStoreRef> {
    Ok(Arc::new(DefaultLogStore::new(
        Arc::new(InMemory::new()),
        root_path_from_url(location),
        location.to_string(),
        Backend::Memory,
    )))
}

#[cfg(feature = "azure")]
pub(crate) fn azure_factory(location: &Url, options: &HashMap<String, String>) -> DeltaResult<LogStoreRef> {
    use object_store::azure::MicrosoftAzureBuilder;

    let mut builder = MicrosoftAzureBuilder::new().with_url(location.to_string());
    for (key, value) in options {
        let config_key: object_store::azure::AzureConfigKey = key.parse().map_err(|_| {
            DeltaLogError::InvalidTableLocation(format!("unknown azure config key {key}"))
        })?;
        builder = builder.with_config(config_key, value);
    }
    let store = builder
        .build()
        .map_err(|e| DeltaLogError::InvalidTableLocation(e.to_string()))?;
    Ok(Arc::new(DefaultLogStore::new(
        Arc::new(store),
        root_path_from_url(location),
        location.to_string(),
        Backend::Azure,
    )))
}

#[cfg(feature = "aws")]
pub(crate) fn s3_factory(location: &Url, options: &HashMap<String, String>) -> DeltaResult<LogStoreRef> {
    use object_store::aws::AmazonS3Builder;
    use crate::logstore::S3LogStore;

    let mut builder = AmazonS3Builder::new().with_url(location.to_string());
    for (key, value) in options {
        let config_key: object_store::aws::AmazonS3ConfigKey = key.parse().map_err(|_| {
            DeltaLogError::InvalidTableLocation(format!("unknown s3 config key {key}"))
        })?;
        builder = builder.with_config(config_key, value);
    }
    let store = builder
        .build()
        .map_err(|e| DeltaLogError::InvalidTableLocation(e.to_string()))?;
    Ok(Arc::new(S3LogStore::new(
        Arc::new(store),
        root_path_from_url(location),
        location.to_string(),
    )))
}

#[cfg(feature = "gcp")]
pub(crate) fn gcs_factory(location: &Url, options: &HashMap<String, String>) -> DeltaResult<LogStoreRef> {
    use object_store::gcp::GoogleCloudStorageBuilder;

    let mut builder = GoogleCloudStorageBuilder::new().with_url(location.to_string());
    for (key, value) in options {
        let config_key: object_store::gcp::GoogleConfigKey = key.parse().map_err(|_| {
            DeltaLogError::InvalidTableLocation(format!("unknown gcs config key {key}"))
        })?;
        builder = builder.with_config(config_key, value);
    }
    let store = builder
        .build()
        .map_err(|e| DeltaLogError::InvalidTableLocation(e.to_string()))?;
    Ok(Arc::new(DefaultLogStore::new(
        Arc::new(store),
        root_path_from_url(location),
        location.to_string(),
        Backend::Gcs,
    )))
}
