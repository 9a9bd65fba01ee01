//! JSON payload carried on the input and output topics
//!
//! On the wire every message is one record with optional fields:
//!
//! ```text
//! { "type": "data"|"resize", "data": string, "rows": u16, "cols": u16, "error": string }
//! ```
//!
//! Older input producers send `"size"` instead of `"resize"`; both are
//! accepted.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::message::{SessionMessage, TerminalSize};

/// Wire value of the `type` field for data messages
pub const TYPE_DATA: &str = "data";
/// Wire value of the `type` field for resize messages
pub const TYPE_RESIZE: &str = "resize";
/// Legacy spelling of [`TYPE_RESIZE`]
pub const TYPE_SIZE: &str = "size";

/// Optional-field record as it appears in a topic payload
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WirePayload {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rows: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cols: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WirePayload {
    /// Decode an input topic payload.
    ///
    /// Returns `Ok(None)` for records with an empty or missing `type`,
    /// which are no-ops.
    pub fn decode(payload: &[u8]) -> Result<Option<SessionMessage>, ProtocolError> {
        let record: WirePayload = serde_json::from_slice(payload)?;
        record.into_message()
    }

    /// Convert the record into a session message
    pub fn into_message(self) -> Result<Option<SessionMessage>, ProtocolError> {
        match self.kind.as_deref().unwrap_or_default() {
            "" => Ok(None),
            TYPE_DATA => Ok(Some(SessionMessage::Data(Bytes::from(
                self.data.unwrap_or_default(),
            )))),
            TYPE_RESIZE | TYPE_SIZE => {
                let rows = self.rows.unwrap_or_default();
                let cols = self.cols.unwrap_or_default();
                if rows == 0 || cols == 0 {
                    return Err(ProtocolError::InvalidResize { rows, cols });
                }
                Ok(Some(SessionMessage::Resize(TerminalSize::new(rows, cols))))
            }
            other => Err(ProtocolError::UnknownMessageType(other.to_string())),
        }
    }

    /// Output record for a chunk of terminal text
    pub fn output(text: impl Into<String>) -> Self {
        Self {
            kind: Some(TYPE_DATA.to_string()),
            data: Some(text.into()),
            ..Default::default()
        }
    }

    /// Build the record for a message.
    ///
    /// Data bytes are transcribed lossily; use [`crate::Utf8Transcoder`]
    /// and [`WirePayload::output`] for a stream of chunks.
    pub fn from_message(message: &SessionMessage) -> Self {
        match message {
            SessionMessage::Data(bytes) => Self::output(String::from_utf8_lossy(bytes)),
            SessionMessage::Resize(size) => Self {
                kind: Some(TYPE_RESIZE.to_string()),
                rows: Some(size.rows),
                cols: Some(size.cols),
                ..Default::default()
            },
            SessionMessage::Fault { error, recovery } => Self {
                data: Some(recovery.clone()),
                error: Some(error.clone()),
                ..Default::default()
            },
        }
    }

    /// Serialize to JSON bytes
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        Ok(serde_json::to_vec(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_data() {
        let msg = WirePayload::decode(br#"{"type":"data","data":"ls\n"}"#).unwrap();
        assert_eq!(msg, Some(SessionMessage::data(&b"ls\n"[..])));
    }

    #[test]
    fn test_decode_resize_and_legacy_size() {
        let expected = Some(SessionMessage::resize(40, 120));
        assert_eq!(
            WirePayload::decode(br#"{"type":"resize","rows":40,"cols":120}"#).unwrap(),
            expected
        );
        assert_eq!(
            WirePayload::decode(br#"{"type":"size","rows":40,"cols":120}"#).unwrap(),
            expected
        );
    }

    #[test]
    fn test_decode_empty_type_is_noop() {
        assert_eq!(WirePayload::decode(br#"{}"#).unwrap(), None);
        assert_eq!(WirePayload::decode(br#"{"type":"","data":"x"}"#).unwrap(), None);
    }

    #[test]
    fn test_decode_rejects_unknown_type() {
        let err = WirePayload::decode(br#"{"type":"exec","data":"rm"}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownMessageType(ref t) if t == "exec"));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(
            WirePayload::decode(b"not json"),
            Err(ProtocolError::Malformed(_))
        ));
    }

    #[test]
    fn test_decode_rejects_zero_dimensions() {
        let err = WirePayload::decode(br#"{"type":"resize","rows":40}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidResize { rows: 40, cols: 0 }));
    }

    #[test]
    fn test_encode_output_omits_unset_fields() {
        let json = WirePayload::output("hi").encode().unwrap();
        assert_eq!(json, br#"{"type":"data","data":"hi"}"#);
    }

    #[test]
    fn test_encode_fault() {
        let payload = WirePayload::from_message(&SessionMessage::fault("eof", "reset tty"));
        let json = String::from_utf8(payload.encode().unwrap()).unwrap();
        assert_eq!(json, r#"{"data":"reset tty","error":"eof"}"#);
    }
}
