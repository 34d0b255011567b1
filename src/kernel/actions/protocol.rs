//! `Protocol` action: minimum reader/writer versions and, from writer
//! version 7 / reader version 3 onward, explicit feature name lists.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::extras::{deserialize_with_extras, serialize_with_extras};

/// Highest reader protocol this crate knows how to replay.
pub const SUPPORTED_READER_VERSION: i32 = 3;
/// Highest writer protocol this crate knows how to commit against.
pub const SUPPORTED_WRITER_VERSION: i32 = 7;

/// Reader feature names this crate tolerates on read. Anything outside
/// this list is still replayed (readers never reject on unknown
/// features), but a writer must not claim to support it.
pub const KNOWN_READER_FEATURES: &[&str] = &["columnMapping", "deletionVectors", "timestampNtz", "v2Checkpoint"];

/// Writer feature names this crate will allow a transaction to declare.
pub const KNOWN_WRITER_FEATURES: &[&str] = &[
    "appendOnly",
    "invariants",
    "checkConstraints",
    "changeDataFeed",
    "columnMapping",
    "generatedColumns",
    "deletionVectors",
    "domainMetadata",
    "timestampNtz",
];

/// Minimum reader/writer versions (and, above v3/v7, named features)
/// required to interact with the table.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Protocol {
    pub min_reader_version: i32,
    pub min_writer_version: i32,
    pub reader_features: Option<HashSet<String>>,
    pub writer_features: Option<HashSet<String>>,
    pub extras: Map<String, Value>,
}

impl Protocol {
    pub fn new(min_reader_version: i32, min_writer_version: i32) -> Self {
        Self {
            min_reader_version,
            min_writer_version,
            reader_features: None,
            writer_features: None,
            extras: Map::new(),
        }
    }

    pub fn with_reader_features(
        mut self,
        features: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.reader_features = Some(features.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_writer_features(
        mut self,
        features: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.writer_features = Some(features.into_iter().map(Into::into).collect());
        self
    }

    /// Writer features this protocol names that aren't in
    /// [`KNOWN_WRITER_FEATURES`]. A writer gate should reject on a
    /// non-empty result; a reader never does.
    pub fn unknown_writer_features(&self) -> Vec<String> {
        self.writer_features
            .iter()
            .flatten()
            .filter(|f| !KNOWN_WRITER_FEATURES.contains(&f.as_str()))
            .cloned()
            .collect()
    }

    pub fn unknown_reader_features(&self) -> Vec<String> {
        self.reader_features
            .iter()
            .flatten()
            .filter(|f| !KNOWN_READER_FEATURES.contains(&f.as_str()))
            .cloned()
            .collect()
    }
}

const PROTOCOL_FIELDS: &[&str] = &[
    "minReaderVersion",
    "minWriterVersion",
    "readerFeatures",
    "writerFeatures",
];

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProtocolWire {
    min_reader_version: i32,
    min_writer_version: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    reader_features: Option<HashSet<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    writer_features: Option<HashSet<String>>,
}

impl<'de> Deserialize<'de> for Protocol {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let (wire, extras): (ProtocolWire, _) =
            deserialize_with_extras(deserializer, PROTOCOL_FIELDS)?;
        Ok(Protocol {
            min_reader_version: wire.min_reader_version,
            min_writer_version: wire.min_writer_version,
            reader_features: wire.reader_features,
            writer_features: wire.writer_features,
            extras,
        })
    }
}

impl Serialize for Protocol {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let wire = ProtocolWire {
            min_reader_version: self.min_reader_version,
            min_writer_version: self.min_writer_version,
            reader_features: self.reader_features.clone(),
            writer_features: self.writer_features.clone(),
        };
        serialize_with_extras(&wire, &self.extras, serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_with_unknown_feature() {
        let json = r#"{"minReaderVersion":3,"minWriterVersion":7,"readerFeatures":["deletionVectors"],"writerFeatures":["deletionVectors"],"somethingNew":{"a":1}}"#;
        let p: Protocol = serde_json::from_str(json).unwrap();
        assert_eq!(p.extras.get("somethingNew").unwrap(), &serde_json::json!({"a": 1}));
        let back = serde_json::to_value(&p).unwrap();
        assert_eq!(back["somethingNew"], serde_json::json!({"a": 1}));
        assert_eq!(back["minReaderVersion"], 3);
    }

    #[test]
    fn unknown_writer_feature_is_flagged() {
        let p = Protocol::new(1, 7).with_writer_features(["madeUpFeature"]);
        assert_eq!(p.unknown_writer_features(), vec!["madeUpFeature".to_string()]);
    }
}
