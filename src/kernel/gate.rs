//! Protocol version gating (spec.md §4.9). Checked before materialising
//! a snapshot (read gate) or opening a transaction (write gate).

use crate::kernel::actions::{Protocol, SUPPORTED_READER_VERSION, SUPPORTED_WRITER_VERSION};

#[derive(thiserror::Error, Debug)]
pub enum ProtocolGateError {
    #[error(
        "table requires reader version {required}, this crate supports up to {supported}"
    )]
    UnsupportedReaderVersion { required: i32, supported: i32 },

    #[error(
        "table requires writer version {required}, this crate supports up to {supported}"
    )]
    UnsupportedWriterVersion { required: i32, supported: i32 },

    #[error("table requires reader features this crate doesn't know: {0:?}")]
    UnsupportedReaderFeatures(Vec<String>),

    #[error("table requires writer features this crate doesn't know: {0:?}")]
    UnsupportedWriterFeatures(Vec<String>),
}

/// Passes if there is no protocol yet (pre-genesis), or the table's
/// reader requirement is within what this crate supports. Readers never
/// reject on an unknown reader/writer *feature name* — those are
/// preserved verbatim and only matter to a writer.
pub fn assert_protocol_read(protocol: Option<&Protocol>) -> Result<(), ProtocolGateError> {
    let Some(protocol) = protocol else {
        return Ok(());
    };
    if protocol.min_reader_version > SUPPORTED_READER_VERSION {
        return Err(ProtocolGateError::UnsupportedReaderVersion {
            required: protocol.min_reader_version,
            supported: SUPPORTED_READER_VERSION,
        });
    }
    Ok(())
}

/// Passes only if the table's writer requirement is within what this
/// crate supports, and it names no reader or writer features outside
/// the known allow-lists. Unlike `assert_protocol_read`, the write gate
/// does reject on an unknown *reader* feature too — spec.md §4.9 says
/// features beyond the allow-list "cause reject on write, but never on
/// read", and a writer claiming a reader feature this crate doesn't
/// know would produce a table future readers can't trust either.
pub fn assert_protocol_write(protocol: &Protocol) -> Result<(), ProtocolGateError> {
    if protocol.min_writer_version > SUPPORTED_WRITER_VERSION {
        return Err(ProtocolGateError::UnsupportedWriterVersion {
            required: protocol.min_writer_version,
            supported: SUPPORTED_WRITER_VERSION,
        });
    }
    let unknown_reader = protocol.unknown_reader_features();
    if !unknown_reader.is_empty() {
        return Err(ProtocolGateError::UnsupportedReaderFeatures(unknown_reader));
    }
    let unknown_writer = protocol.unknown_writer_features();
    if !unknown_writer.is_empty() {
        return Err(ProtocolGateError::UnsupportedWriterFeatures(unknown_writer));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_gate_passes_on_no_protocol() {
        assert!(assert_protocol_read(None).is_ok());
    }

    #[test]
    fn read_gate_rejects_future_reader_version() {
        let p = Protocol::new(99, 2);
        assert!(matches!(
            assert_protocol_read(Some(&p)),
            Err(ProtocolGateError::UnsupportedReaderVersion { .. })
        ));
    }

    #[test]
    fn write_gate_rejects_unknown_feature() {
        let p = Protocol::new(1, 7).with_writer_features(["notARealFeature"]);
        assert!(matches!(
            assert_protocol_write(&p),
            Err(ProtocolGateError::UnsupportedWriterFeatures(_))
        ));
    }

    #[test]
    fn write_gate_rejects_unknown_reader_feature() {
        let p = Protocol::new(3, 7).with_reader_features(["notARealFeature"]);
        assert!(matches!(
            assert_protocol_write(&p),
            Err(ProtocolGateError::UnsupportedReaderFeatures(_))
        ));
    }
}
