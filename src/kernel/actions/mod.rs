//! Tagged action variants: the union of every record type that can
//! appear in a commit line or checkpoint row.
//!
//! The discriminant is the single top-level JSON key present on the
//! line (`add`, `remove`, `metaData`, ...). An unrecognised key decodes
//! to [`Action::Unknown`] so readers can tolerate log formats newer than
//! this crate without losing the line on replay.

mod add;
mod cdc;
mod commit_info;
mod domain_metadata;
mod extras;
mod metadata;
mod protocol;
mod remove;
mod txn;

pub use add::AddFile;
pub use cdc::AddCDCFile;
pub use commit_info::CommitInfo;
pub use domain_metadata::DomainMetadata;
pub use metadata::{Format, Metadata};
pub use protocol::{Protocol, KNOWN_READER_FEATURES, KNOWN_WRITER_FEATURES, SUPPORTED_READER_VERSION, SUPPORTED_WRITER_VERSION};
pub use remove::RemoveFile;
pub use txn::Transaction;

use serde_json::Value;

use crate::errors::{DeltaLogError, DeltaResult};

/// One line of a commit file, or one row of a checkpoint.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Metadata(Metadata),
    Protocol(Protocol),
    Add(AddFile),
    Remove(RemoveFile),
    Cdc(AddCDCFile),
    Txn(Transaction),
    CommitInfo(CommitInfo),
    DomainMetadata(DomainMetadata),
    /// A top-level key this crate doesn't recognise. Readers tolerate
    /// it; strict writers refuse to emit it (see `Action::to_json`).
    Unknown {
        name: String,
        payload: Value,
    },
}

impl Action {
    /// The canonical top-level JSON key for this action, used both to
    /// decode and to assemble the commit-line object.
    pub fn type_name(&self) -> &str {
        match self {
            Action::Metadata(_) => "metaData",
            Action::Protocol(_) => "protocol",
            Action::Add(_) => "add",
            Action::Remove(_) => "remove",
            Action::Cdc(_) => "cdc",
            Action::Txn(_) => "txn",
            Action::CommitInfo(_) => "commitInfo",
            Action::DomainMetadata(_) => "domainMetadata",
            Action::Unknown { name, .. } => name,
        }
    }

    /// Decode a single commit line (or checkpoint row already flattened
    /// to JSON) into an `Action`. The line must be a JSON object with
    /// exactly one recognised top-level key; any other single-key object
    /// decodes to `Unknown` rather than failing, per spec.md §4.2.
    pub fn from_json(line: &str) -> DeltaResult<Self> {
        let value: Value = serde_json::from_str(line)?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> DeltaResult<Self> {
        let obj = match value {
            Value::Object(obj) => obj,
            other => {
                return Err(DeltaLogError::InvalidAction(format!(
                    "expected a JSON object with one action key, got {other}"
                )))
            }
        };
        let (key, payload) = obj
            .into_iter()
            .next()
            .ok_or_else(|| DeltaLogError::InvalidAction("empty action line".to_string()))?;

        Ok(match key.as_str() {
            "metaData" => Action::Metadata(serde_json::from_value(payload)?),
            "protocol" => Action::Protocol(serde_json::from_value(payload)?),
            "add" => Action::Add(serde_json::from_value(payload)?),
            "remove" => Action::Remove(serde_json::from_value(payload)?),
            "cdc" => Action::Cdc(serde_json::from_value(payload)?),
            "txn" => Action::Txn(serde_json::from_value(payload)?),
            "commitInfo" => Action::CommitInfo(serde_json::from_value(payload)?),
            "domainMetadata" => Action::DomainMetadata(serde_json::from_value(payload)?),
            other => Action::Unknown {
                name: other.to_string(),
                payload,
            },
        })
    }

    /// Encode this action back to its single-key JSON line. Returns
    /// `InvalidAction` for `Unknown`, since strict writers must never
    /// re-emit an action type they don't understand (spec.md §4.2).
    pub fn to_json(&self) -> DeltaResult<String> {
        if let Action::Unknown { name, .. } = self {
            return Err(DeltaLogError::InvalidAction(format!(
                "refusing to write back an unrecognised action type: {name}"
            )));
        }
        Ok(serde_json::to_string(&self.to_value()?)?)
    }

    pub fn to_value(&self) -> DeltaResult<Value> {
        let payload = match self {
            Action::Metadata(m) => serde_json::to_value(m)?,
            Action::Protocol(p) => serde_json::to_value(p)?,
            Action::Add(a) => serde_json::to_value(a)?,
            Action::Remove(r) => serde_json::to_value(r)?,
            Action::Cdc(c) => serde_json::to_value(c)?,
            Action::Txn(t) => serde_json::to_value(t)?,
            Action::CommitInfo(c) => serde_json::to_value(c)?,
            Action::DomainMetadata(d) => serde_json::to_value(d)?,
            Action::Unknown { payload, .. } => payload.clone(),
        };
        let mut obj = serde_json::Map::with_capacity(1);
        obj.insert(self.type_name().to_string(), payload);
        Ok(Value::Object(obj))
    }

    pub fn as_add(&self) -> Option<&AddFile> {
        match self {
            Action::Add(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_remove(&self) -> Option<&RemoveFile> {
        match self {
            Action::Remove(r) => Some(r),
            _ => None,
        }
    }
}

impl From<Metadata> for Action {
    fn from(v: Metadata) -> Self {
        Action::Metadata(v)
    }
}
impl From<Protocol> for Action {
    fn from(v: Protocol) -> Self {
        Action::Protocol(v)
    }
}
impl From<AddFile> for Action {
    fn from(v: AddFile) -> Self {
        Action::Add(v)
    }
}
impl From<RemoveFile> for Action {
    fn from(v: RemoveFile) -> Self {
        Action::Remove(v)
    }
}
impl From<AddCDCFile> for Action {
    fn from(v: AddCDCFile) -> Self {
        Action::Cdc(v)
    }
}
impl From<Transaction> for Action {
    fn from(v: Transaction) -> Self {
        Action::Txn(v)
    }
}
impl From<CommitInfo> for Action {
    fn from(v: CommitInfo) -> Self {
        Action::CommitInfo(v)
    }
}
impl From<DomainMetadata> for Action {
    fn from(v: DomainMetadata) -> Self {
        Action::DomainMetadata(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_top_level_key_is_tolerated_on_read() {
        let action = Action::from_json(r#"{"checksum":{"a":1}}"#).unwrap();
        assert!(matches!(action, Action::Unknown { .. }));
        assert_eq!(action.type_name(), "checksum");
        assert!(action.to_json().is_err());
    }

    #[test]
    fn add_round_trips_through_from_json_to_json() {
        let line = r#"{"add":{"path":"a.parquet","partitionValues":{},"size":100,"modificationTime":1700000000000,"dataChange":true}}"#;
        let action = Action::from_json(line).unwrap();
        let add = action.as_add().unwrap();
        assert_eq!(add.path, "a.parquet");
        let back = Action::from_json(&action.to_json().unwrap()).unwrap();
        assert_eq!(action, back);
    }
}
