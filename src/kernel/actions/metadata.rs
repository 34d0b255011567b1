//! `Metadata` action: the table's schema, partitioning and configuration.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::extras::{deserialize_with_extras, serialize_with_extras};

/// The on-disk format of a table's data files. Only `parquet` is written
/// by this crate, but the field is preserved for round-trip fidelity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Format {
    pub provider: String,
    #[serde(default)]
    pub options: HashMap<String, String>,
}

impl Default for Format {
    fn default() -> Self {
        Format {
            provider: "parquet".to_string(),
            options: HashMap::new(),
        }
    }
}

/// Table-level metadata. `id` is stable for the table's lifetime; a new
/// `Metadata` action is only written when something about schema,
/// partitioning or configuration actually changes.
#[derive(Debug, Clone, PartialEq)]
pub struct Metadata {
    pub id: String,
    pub name: Option<String>,
    pub description: Option<String>,
    pub format: Format,
    pub schema_string: String,
    pub partition_columns: Vec<String>,
    pub configuration: HashMap<String, Option<String>>,
    pub created_time: Option<i64>,
    pub extras: Map<String, Value>,
}

impl Metadata {
    pub fn new(schema_string: impl Into<String>, partition_columns: Vec<String>) -> Self {
        Metadata {
            id: Uuid::new_v4().to_string(),
            name: None,
            description: None,
            format: Format::default(),
            schema_string: schema_string.into(),
            partition_columns,
            configuration: HashMap::new(),
            created_time: None,
            extras: Map::new(),
        }
    }

    pub fn with_created_time(mut self, millis: i64) -> Self {
        self.created_time = Some(millis);
        self
    }

    pub fn with_configuration(mut self, configuration: HashMap<String, Option<String>>) -> Self {
        self.configuration = configuration;
        self
    }

    /// Looks up a configuration key, treating `"key" -> None` the same as
    /// the key being absent.
    pub fn configuration_value(&self, key: &str) -> Option<&str> {
        self.configuration.get(key).and_then(|v| v.as_deref())
    }
}

const METADATA_FIELDS: &[&str] = &[
    "id",
    "name",
    "description",
    "format",
    "schemaString",
    "partitionColumns",
    "configuration",
    "createdTime",
];

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MetadataWire {
    id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    format: Format,
    schema_string: String,
    #[serde(default)]
    partition_columns: Vec<String>,
    #[serde(default)]
    configuration: HashMap<String, Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    created_time: Option<i64>,
}

impl<'de> Deserialize<'de> for Metadata {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let (wire, extras): (MetadataWire, _) =
            deserialize_with_extras(deserializer, METADATA_FIELDS)?;
        Ok(Metadata {
            id: wire.id,
            name: wire.name,
            description: wire.description,
            format: wire.format,
            schema_string: wire.schema_string,
            partition_columns: wire.partition_columns,
            configuration: wire.configuration,
            created_time: wire.created_time,
            extras,
        })
    }
}

impl Serialize for Metadata {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let wire = MetadataWire {
            id: self.id.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            format: self.format.clone(),
            schema_string: self.schema_string.clone(),
            partition_columns: self.partition_columns.clone(),
            configuration: self.configuration.clone(),
            created_time: self.created_time,
        };
        serialize_with_extras(&wire, &self.extras, serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_preserves_extras() {
        let json = r#"{"id":"t1","format":{"provider":"parquet","options":{}},"schemaString":"{}","partitionColumns":[],"configuration":{},"newField":42}"#;
        let m: Metadata = serde_json::from_str(json).unwrap();
        assert_eq!(m.extras.get("newField").unwrap(), &serde_json::json!(42));
        let back = serde_json::to_value(&m).unwrap();
        assert_eq!(back["newField"], serde_json::json!(42));
        assert_eq!(back["id"], serde_json::json!("t1"));
    }
}
