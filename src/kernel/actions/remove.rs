//! `RemoveFile` action: tombstones a data file that was previously live.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::extras::{deserialize_with_extras, serialize_with_extras};

/// Tombstones a data file. Must reference a path that was live at the
/// point this action is replayed.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoveFile {
    pub path: String,
    pub deletion_timestamp: Option<i64>,
    pub data_change: bool,
    pub extended_file_metadata: Option<bool>,
    pub partition_values: Option<HashMap<String, Option<String>>>,
    pub size: Option<i64>,
    pub tags: Option<HashMap<String, String>>,
    pub base_row_id: Option<i64>,
    pub default_row_commit_version: Option<i64>,
    pub deletion_vector: Option<Value>,
    pub extras: Map<String, Value>,
}

impl RemoveFile {
    pub fn new(path: impl Into<String>, deletion_timestamp: i64, data_change: bool) -> Self {
        RemoveFile {
            path: path.into(),
            deletion_timestamp: Some(deletion_timestamp),
            data_change,
            extended_file_metadata: None,
            partition_values: None,
            size: None,
            tags: None,
            base_row_id: None,
            default_row_commit_version: None,
            deletion_vector: None,
            extras: Map::new(),
        }
    }

    /// `true` if this tombstone is still inside a retention window ending
    /// at `cutoff_millis` (exclusive of anything older).
    pub fn is_retained(&self, cutoff_millis: i64) -> bool {
        self.deletion_timestamp.unwrap_or(0) >= cutoff_millis
    }
}

const REMOVE_FILE_FIELDS: &[&str] = &[
    "path",
    "deletionTimestamp",
    "dataChange",
    "extendedFileMetadata",
    "partitionValues",
    "size",
    "tags",
    "baseRowId",
    "defaultRowCommitVersion",
    "deletionVector",
];

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoveFileWire {
    path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    deletion_timestamp: Option<i64>,
    #[serde(default)]
    data_change: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    extended_file_metadata: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    partition_values: Option<HashMap<String, Option<String>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    size: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tags: Option<HashMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    base_row_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    default_row_commit_version: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    deletion_vector: Option<Value>,
}

impl<'de> Deserialize<'de> for RemoveFile {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let (wire, extras): (RemoveFileWire, _) =
            deserialize_with_extras(deserializer, REMOVE_FILE_FIELDS)?;
        Ok(RemoveFile {
            path: wire.path,
            deletion_timestamp: wire.deletion_timestamp,
            data_change: wire.data_change,
            extended_file_metadata: wire.extended_file_metadata,
            partition_values: wire.partition_values,
            size: wire.size,
            tags: wire.tags,
            base_row_id: wire.base_row_id,
            default_row_commit_version: wire.default_row_commit_version,
            deletion_vector: wire.deletion_vector,
            extras,
        })
    }
}

impl Serialize for RemoveFile {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let wire = RemoveFileWire {
            path: self.path.clone(),
            deletion_timestamp: self.deletion_timestamp,
            data_change: self.data_change,
            extended_file_metadata: self.extended_file_metadata,
            partition_values: self.partition_values.clone(),
            size: self.size,
            tags: self.tags.clone(),
            base_row_id: self.base_row_id,
            default_row_commit_version: self.default_row_commit_version,
            deletion_vector: self.deletion_vector.clone(),
        };
        serialize_with_extras(&wire, &self.extras, serializer)
    }
}
