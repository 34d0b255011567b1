//! Shared machinery for the "extras" round-trip every action variant
//! carries: unrecognised JSON fields are captured verbatim on read and
//! re-emitted on write, without ever being allowed to shadow a field the
//! variant actually understands.
//!
//! Each variant keeps a small `...Wire` struct (plain serde derive, known
//! fields only) alongside its public struct. The public struct's
//! `Deserialize`/`Serialize` impls route through [`deserialize_with_extras`]
//! and [`serialize_with_extras`] rather than `#[serde(flatten)]`: flatten's
//! serialize path merges the extras map in after the struct's own fields,
//! which for `serde_json::Map` means a colliding key from extras wins over
//! the known field. Routing through an explicit merge keeps known fields
//! authoritative by construction.

use serde::de::{self, DeserializeOwned};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};

/// Deserialize `W`'s known fields from `deserializer`, returning them
/// alongside whatever top-level keys `W` doesn't declare.
pub(crate) fn deserialize_with_extras<'de, D, W>(
    deserializer: D,
    fields: &[&str],
) -> Result<(W, Map<String, Value>), D::Error>
where
    D: de::Deserializer<'de>,
    W: DeserializeOwned,
{
    let raw = Value::deserialize(deserializer)?;
    let obj = match raw {
        Value::Object(m) => m,
        other => {
            return Err(de::Error::custom(format!(
                "expected a JSON object for this action, got {other}"
            )))
        }
    };
    let known: W = serde_json::from_value(Value::Object(obj.clone())).map_err(de::Error::custom)?;
    let mut extras = obj;
    for f in fields {
        extras.remove(*f);
    }
    Ok((known, extras))
}

/// Serialize `known` and merge `extras` in under it, known fields always
/// winning on key collision.
pub(crate) fn serialize_with_extras<S, W>(
    known: &W,
    extras: &Map<String, Value>,
    serializer: S,
) -> Result<S::Ok, S::Error>
where
    S: Serializer,
    W: Serialize,
{
    let mut obj = match serde_json::to_value(known).map_err(serde::ser::Error::custom)? {
        Value::Object(m) => m,
        _ => Map::new(),
    };
    for (k, v) in extras {
        obj.entry(k.clone()).or_insert_with(|| v.clone());
    }
    Value::Object(obj).serialize(serializer)
}
