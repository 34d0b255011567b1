//! `AddFile` action: introduces a data file into the table's live set.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::extras::{deserialize_with_extras, serialize_with_extras};

/// Introduces a data file. `path` must be unique among files considered
/// live at the point this action is replayed.
#[derive(Debug, Clone, PartialEq)]
pub struct AddFile {
    pub path: String,
    pub partition_values: HashMap<String, Option<String>>,
    pub size: i64,
    pub modification_time: i64,
    pub data_change: bool,
    pub stats: Option<String>,
    pub tags: Option<HashMap<String, String>>,
    /// Row-tracking passthrough; never interpreted by this crate.
    pub base_row_id: Option<i64>,
    pub default_row_commit_version: Option<i64>,
    /// Deletion-vector descriptor passthrough; never interpreted by this
    /// crate (see spec Non-goals).
    pub deletion_vector: Option<Value>,
    pub extras: Map<String, Value>,
}

impl AddFile {
    pub fn new(path: impl Into<String>, size: i64, modification_time: i64, data_change: bool) -> Self {
        AddFile {
            path: path.into(),
            partition_values: HashMap::new(),
            size,
            modification_time,
            data_change,
            stats: None,
            tags: None,
            base_row_id: None,
            default_row_commit_version: None,
            deletion_vector: None,
            extras: Map::new(),
        }
    }

    pub fn with_partition_values(mut self, values: HashMap<String, Option<String>>) -> Self {
        self.partition_values = values;
        self
    }

    pub fn with_stats(mut self, stats: impl Into<String>) -> Self {
        self.stats = Some(stats.into());
        self
    }
}

const ADD_FILE_FIELDS: &[&str] = &[
    "path",
    "partitionValues",
    "size",
    "modificationTime",
    "dataChange",
    "stats",
    "tags",
    "baseRowId",
    "defaultRowCommitVersion",
    "deletionVector",
];

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddFileWire {
    path: String,
    #[serde(default)]
    partition_values: HashMap<String, Option<String>>,
    size: i64,
    modification_time: i64,
    #[serde(default)]
    data_change: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    stats: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tags: Option<HashMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    base_row_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    default_row_commit_version: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    deletion_vector: Option<Value>,
}

impl<'de> Deserialize<'de> for AddFile {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let (wire, extras): (AddFileWire, _) =
            deserialize_with_extras(deserializer, ADD_FILE_FIELDS)?;
        Ok(AddFile {
            path: wire.path,
            partition_values: wire.partition_values,
            size: wire.size,
            modification_time: wire.modification_time,
            data_change: wire.data_change,
            stats: wire.stats,
            tags: wire.tags,
            base_row_id: wire.base_row_id,
            default_row_commit_version: wire.default_row_commit_version,
            deletion_vector: wire.deletion_vector,
            extras,
        })
    }
}

impl Serialize for AddFile {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let wire = AddFileWire {
            path: self.path.clone(),
            partition_values: self.partition_values.clone(),
            size: self.size,
            modification_time: self.modification_time,
            data_change: self.data_change,
            stats: self.stats.clone(),
            tags: self.tags.clone(),
            base_row_id: self.base_row_id,
            default_row_commit_version: self.default_row_commit_version,
            deletion_vector: self.deletion_vector.clone(),
        };
        serialize_with_extras(&wire, &self.extras, serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preserves_deletion_vector_passthrough() {
        let json = r#"{"path":"p","dataChange":true,"partitionValues":{},"size":1,"modificationTime":0,"deletionVector":{"storageType":"u","pathOrInlineDv":"zzz","sizeInBytes":7,"cardinality":1}}"#;
        let add: AddFile = serde_json::from_str(json).unwrap();
        assert_eq!(
            add.deletion_vector,
            Some(serde_json::json!({
                "storageType": "u",
                "pathOrInlineDv": "zzz",
                "sizeInBytes": 7,
                "cardinality": 1
            }))
        );
        let back = serde_json::to_value(&add).unwrap();
        assert_eq!(
            back["deletionVector"],
            serde_json::json!({
                "storageType": "u",
                "pathOrInlineDv": "zzz",
                "sizeInBytes": 7,
                "cardinality": 1
            })
        );
    }
}
