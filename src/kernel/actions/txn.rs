//! `SetTransaction` action: records the last version an application-level
//! idempotency key (`appId`) has successfully written up to.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::extras::{deserialize_with_extras, serialize_with_extras};

#[derive(Debug, Clone, PartialEq)]
pub struct Transaction {
    pub app_id: String,
    pub version: i64,
    pub last_updated: Option<i64>,
    pub extras: Map<String, Value>,
}

impl Transaction {
    pub fn new(app_id: impl Into<String>, version: i64) -> Self {
        Transaction {
            app_id: app_id.into(),
            version,
            last_updated: None,
            extras: Map::new(),
        }
    }
}

const TXN_FIELDS: &[&str] = &["appId", "version", "lastUpdated"];

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransactionWire {
    app_id: String,
    version: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_updated: Option<i64>,
}

impl<'de> Deserialize<'de> for Transaction {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let (wire, extras): (TransactionWire, _) = deserialize_with_extras(deserializer, TXN_FIELDS)?;
        Ok(Transaction {
            app_id: wire.app_id,
            version: wire.version,
            last_updated: wire.last_updated,
            extras,
        })
    }
}

impl Serialize for Transaction {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let wire = TransactionWire {
            app_id: self.app_id.clone(),
            version: self.version,
            last_updated: self.last_updated,
        };
        serialize_with_extras(&wire, &self.extras, serializer)
    }
}
