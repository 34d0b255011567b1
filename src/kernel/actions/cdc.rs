//! `AddCDCFile` action: a change-data-capture file. Never contributes to
//! the table's live file set or tombstones.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::extras::{deserialize_with_extras, serialize_with_extras};

#[derive(Debug, Clone, PartialEq)]
pub struct AddCDCFile {
    pub path: String,
    pub partition_values: HashMap<String, Option<String>>,
    pub size: i64,
    pub tags: Option<HashMap<String, String>>,
    pub extras: Map<String, Value>,
}

const ADD_CDC_FILE_FIELDS: &[&str] = &["path", "partitionValues", "size", "tags"];

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddCDCFileWire {
    path: String,
    #[serde(default)]
    partition_values: HashMap<String, Option<String>>,
    size: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    tags: Option<HashMap<String, String>>,
}

impl<'de> Deserialize<'de> for AddCDCFile {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let (wire, extras): (AddCDCFileWire, _) =
            deserialize_with_extras(deserializer, ADD_CDC_FILE_FIELDS)?;
        Ok(AddCDCFile {
            path: wire.path,
            partition_values: wire.partition_values,
            size: wire.size,
            tags: wire.tags,
            extras,
        })
    }
}

impl Serialize for AddCDCFile {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let wire = AddCDCFileWire {
            path: self.path.clone(),
            partition_values: self.partition_values.clone(),
            size: self.size,
            tags: self.tags.clone(),
        };
        serialize_with_extras(&wire, &self.extras, serializer)
    }
}
