//! `CommitInfo` action: free-form, informational metadata about the
//! operation that produced a commit. Never part of materialised state.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::extras::{deserialize_with_extras, serialize_with_extras};

/// `CommitInfo` has two conventional fields, `timestamp` and `operation`;
/// everything else in the object is carried as free-form `info`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CommitInfo {
    pub timestamp: Option<i64>,
    pub operation: Option<String>,
    pub info: Map<String, Value>,
}

impl CommitInfo {
    pub fn new(operation: impl Into<String>) -> Self {
        CommitInfo {
            timestamp: None,
            operation: Some(operation.into()),
            info: Map::new(),
        }
    }

    pub fn with_timestamp(mut self, millis: i64) -> Self {
        self.timestamp = Some(millis);
        self
    }
}

const COMMIT_INFO_FIELDS: &[&str] = &["timestamp", "operation"];

#[derive(Serialize, Deserialize, Default)]
struct CommitInfoWire {
    #[serde(skip_serializing_if = "Option::is_none")]
    timestamp: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    operation: Option<String>,
}

impl<'de> Deserialize<'de> for CommitInfo {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let (wire, info): (CommitInfoWire, _) =
            deserialize_with_extras(deserializer, COMMIT_INFO_FIELDS)?;
        Ok(CommitInfo {
            timestamp: wire.timestamp,
            operation: wire.operation,
            info,
        })
    }
}

impl Serialize for CommitInfo {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let wire = CommitInfoWire {
            timestamp: self.timestamp,
            operation: self.operation.clone(),
        };
        serialize_with_extras(&wire, &self.info, serializer)
    }
}
