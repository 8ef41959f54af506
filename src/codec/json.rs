//! JSON line codec using `serde_json`.
//!
//! Every record is a single-line JSON object followed by `\n`. `serde_json`
//! escapes control characters inside strings, so an encoded record never
//! contains a raw newline before its terminator.
//!
//! # Example
//!
//! ```
//! use cellwire_client::codec::{Command, JsonCodec};
//!
//! let line = JsonCodec::encode_command(&Command::SelectCell { cell: "B2".into() }).unwrap();
//! assert_eq!(line, "{\"requestType\":\"selectCell\",\"cellName\":\"B2\"}\n");
//! ```

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::message::{Command, InboundMessage};
use crate::error::Result;
use crate::protocol::RECORD_TERMINATOR;

/// JSON codec for protocol records.
pub struct JsonCodec;

impl JsonCodec {
    /// Encode a value as one newline-terminated record.
    ///
    /// # Errors
    ///
    /// Returns error if the value cannot be serialized.
    pub fn encode<T: Serialize>(value: &T) -> Result<String> {
        let mut line = serde_json::to_string(value)?;
        line.push(RECORD_TERMINATOR);
        Ok(line)
    }

    /// Decode one record (without its terminator).
    ///
    /// # Errors
    ///
    /// Returns error if the record is not valid JSON for `T`.
    pub fn decode<T: DeserializeOwned>(record: &str) -> Result<T> {
        Ok(serde_json::from_str(record)?)
    }

    /// Encode an outbound command.
    ///
    /// # Errors
    ///
    /// Returns `EmbeddedNewline` if a field holds a newline.
    pub fn encode_command(command: &Command) -> Result<String> {
        command.validate()?;
        tracing::trace!(request = command.request_type(), "Encoding request");
        Self::encode(command)
    }

    /// Decode an inbound record.
    ///
    /// Malformed JSON and unknown `messageType`s yield `None`; they are
    /// never errors.
    pub fn decode_message(record: &str) -> Option<InboundMessage> {
        match Self::decode(record) {
            Ok(message) => Some(message),
            Err(e) => {
                tracing::trace!(record, "Dropping undecodable record: {}", e);
                None
            }
        }
    }

    /// Encode a server-side message (used by servers and test peers).
    pub fn encode_message(message: &InboundMessage) -> Result<String> {
        Self::encode(message)
    }

    /// Decode a client request (used by servers and test peers).
    pub fn decode_command(record: &str) -> Option<Command> {
        match Self::decode(record) {
            Ok(command) => Some(command),
            Err(e) => {
                tracing::trace!(record, "Dropping undecodable request: {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn test_encode_edit_cell() {
        let line = JsonCodec::encode_command(&Command::EditCell {
            cell: "A1".into(),
            contents: "5".into(),
        })
        .unwrap();

        assert!(line.ends_with('\n'));
        assert_eq!(line.matches('\n').count(), 1);

        let value: Value = serde_json::from_str(line.trim_end()).unwrap();
        assert_eq!(value["requestType"], "editCell");
        assert_eq!(value["cellName"], "A1");
        assert_eq!(value["contents"], "5");
    }

    #[test]
    fn test_edit_cell_decodes_back() {
        let original = Command::EditCell {
            cell: "A1".into(),
            contents: "5".into(),
        };
        let line = JsonCodec::encode_command(&original).unwrap();
        let decoded = JsonCodec::decode_command(line.trim_end()).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_encode_undo_and_revert() {
        assert_eq!(
            JsonCodec::encode_command(&Command::Undo).unwrap(),
            "{\"requestType\":\"undo\"}\n"
        );
        assert_eq!(
            JsonCodec::encode_command(&Command::RevertCell { cell: "C3".into() }).unwrap(),
            "{\"requestType\":\"revertCell\",\"cellName\":\"C3\"}\n"
        );
    }

    #[test]
    fn test_contents_with_quotes_are_escaped() {
        let line = JsonCodec::encode_command(&Command::EditCell {
            cell: "A1".into(),
            contents: "say \"hi\"".into(),
        })
        .unwrap();
        let value: Value = serde_json::from_str(line.trim_end()).unwrap();
        assert_eq!(value["contents"], "say \"hi\"");
    }

    #[test]
    fn test_encode_rejects_newline() {
        let result = JsonCodec::encode_command(&Command::EditCell {
            cell: "A1".into(),
            contents: "a\nb".into(),
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_decode_cell_updated() {
        let message = JsonCodec::decode_message(
            r#"{"messageType":"cellUpdated","cellName":"B2","contents":"7"}"#,
        );
        assert_eq!(
            message,
            Some(InboundMessage::CellUpdated {
                cell: "B2".into(),
                contents: "7".into()
            })
        );
    }

    #[test]
    fn test_decode_cell_selected() {
        let message = JsonCodec::decode_message(
            r#"{"messageType":"cellSelected","cellName":"C9","selector":3,"selectorName":"bob"}"#,
        );
        assert_eq!(
            message,
            Some(InboundMessage::CellSelected {
                cell: "C9".into(),
                selector_name: "bob".into(),
                selector_id: 3,
            })
        );
    }

    #[test]
    fn test_decode_selector_as_string() {
        let message =
            JsonCodec::decode_message(r#"{"messageType":"disconnected","selector":"12"}"#);
        assert_eq!(message, Some(InboundMessage::ClientLeft { id: 12 }));
    }

    #[test]
    fn test_decode_request_and_server_errors() {
        assert_eq!(
            JsonCodec::decode_message(
                r#"{"messageType":"requestError","cellName":"A1","message":"circular"}"#
            ),
            Some(InboundMessage::RequestRejected {
                cell: "A1".into(),
                reason: "circular".into()
            })
        );
        assert_eq!(
            JsonCodec::decode_message(r#"{"messageType":"serverError","message":"bye"}"#),
            Some(InboundMessage::FatalServerError {
                reason: "bye".into()
            })
        );
    }

    #[test]
    fn test_decode_ignores_extra_fields() {
        let message = JsonCodec::decode_message(
            r#"{"messageType":"cellUpdated","cellName":"A1","contents":"x","extra":[1,2]}"#,
        );
        assert!(message.is_some());
    }

    #[test]
    fn test_malformed_and_unknown_are_dropped() {
        assert_eq!(JsonCodec::decode_message("not json"), None);
        assert_eq!(JsonCodec::decode_message("{\"messageType\":"), None);
        assert_eq!(
            JsonCodec::decode_message(r#"{"messageType":"somethingNew","cellName":"A1"}"#),
            None
        );
        assert_eq!(JsonCodec::decode_message(r#"{"cellName":"A1"}"#), None);
        assert_eq!(
            JsonCodec::decode_message(r#"{"messageType":"disconnected"}"#),
            None
        );
        assert_eq!(JsonCodec::decode_message(""), None);
    }

    #[test]
    fn test_encode_message_for_peers() {
        let line = JsonCodec::encode_message(&InboundMessage::ClientLeft { id: 4 }).unwrap();
        assert_eq!(line, "{\"messageType\":\"disconnected\",\"selector\":4}\n");
        assert_eq!(
            JsonCodec::decode_message(line.trim_end()),
            Some(InboundMessage::ClientLeft { id: 4 })
        );
    }
}
