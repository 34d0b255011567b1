//! `DomainMetadata` action: an opaque configuration blob scoped to a
//! named domain, with at most one live entry per domain.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use super::extras::{deserialize_with_extras, serialize_with_extras};

#[derive(Debug, Clone, PartialEq)]
pub struct DomainMetadata {
    pub domain: String,
    pub configuration: Map<String, Value>,
    pub removed: bool,
    pub extras: Map<String, Value>,
}

impl DomainMetadata {
    pub fn new(domain: impl Into<String>, configuration: Map<String, Value>) -> Self {
        DomainMetadata {
            domain: domain.into(),
            configuration,
            removed: false,
            extras: Map::new(),
        }
    }

    pub fn tombstone(domain: impl Into<String>) -> Self {
        DomainMetadata {
            domain: domain.into(),
            configuration: Map::new(),
            removed: true,
            extras: Map::new(),
        }
    }
}

const DOMAIN_METADATA_FIELDS: &[&str] = &["domain", "configuration", "removed"];

/// `configuration` appears in the wild as either a structured JSON object
/// or as a string containing embedded JSON. This crate accepts both on
/// read and always emits the structured form (spec.md §9 Open Question,
/// resolved).
fn deserialize_configuration<'de, D>(deserializer: D) -> Result<Map<String, Value>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Value::deserialize(deserializer)?;
    match raw {
        Value::Object(m) => Ok(m),
        Value::String(s) if s.is_empty() => Ok(Map::new()),
        Value::String(s) => {
            let parsed: Value = serde_json::from_str(&s).map_err(serde::de::Error::custom)?;
            match parsed {
                Value::Object(m) => Ok(m),
                _ => Err(serde::de::Error::custom(
                    "domainMetadata.configuration string did not decode to a JSON object",
                )),
            }
        }
        Value::Null => Ok(Map::new()),
        other => Err(serde::de::Error::custom(format!(
            "unexpected domainMetadata.configuration shape: {other}"
        ))),
    }
}

#[derive(Serialize, Deserialize)]
struct DomainMetadataWire {
    domain: String,
    #[serde(deserialize_with = "deserialize_configuration")]
    configuration: Map<String, Value>,
    #[serde(default)]
    removed: bool,
}

impl<'de> Deserialize<'de> for DomainMetadata {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let (wire, extras): (DomainMetadataWire, _) =
            deserialize_with_extras(deserializer, DOMAIN_METADATA_FIELDS)?;
        Ok(DomainMetadata {
            domain: wire.domain,
            configuration: wire.configuration,
            removed: wire.removed,
            extras,
        })
    }
}

impl Serialize for DomainMetadata {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let wire = DomainMetadataWire {
            domain: self.domain.clone(),
            configuration: self.configuration.clone(),
            removed: self.removed,
        };
        serialize_with_extras(&wire, &self.extras, serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_string_encoded_configuration_and_emits_structured() {
        let json = r#"{"domain":"delta.rowTracking","configuration":"{\"enabled\":true}","removed":false}"#;
        let dm: DomainMetadata = serde_json::from_str(json).unwrap();
        assert_eq!(dm.configuration.get("enabled"), Some(&Value::Bool(true)));
        let back = serde_json::to_value(&dm).unwrap();
        assert_eq!(back["configuration"], serde_json::json!({"enabled": true}));
    }
}
