//! Typed wire messages.
//!
//! Inbound records carry a `messageType` discriminator, outbound records a
//! `requestType` discriminator. Field names follow the server's JSON schema;
//! the acting user's id always travels in `selector`.

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::Result;
use crate::protocol::{ensure_single_line, ClientId};

/// A message pushed by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "messageType")]
pub enum InboundMessage {
    /// A cell's contents changed.
    #[serde(rename = "cellUpdated")]
    CellUpdated {
        #[serde(rename = "cellName")]
        cell: String,
        #[serde(default)]
        contents: String,
    },

    /// Some client moved its selection.
    #[serde(rename = "cellSelected")]
    CellSelected {
        #[serde(rename = "cellName")]
        cell: String,
        #[serde(rename = "selectorName", default)]
        selector_name: String,
        #[serde(rename = "selector", deserialize_with = "lenient_client_id")]
        selector_id: ClientId,
    },

    /// Another client left the spreadsheet.
    #[serde(rename = "disconnected")]
    ClientLeft {
        #[serde(rename = "selector", deserialize_with = "lenient_client_id")]
        id: ClientId,
    },

    /// The server refused one of our requests.
    #[serde(rename = "requestError")]
    RequestRejected {
        #[serde(rename = "cellName")]
        cell: String,
        #[serde(rename = "message", default)]
        reason: String,
    },

    /// The server is dropping this client.
    #[serde(rename = "serverError")]
    FatalServerError {
        #[serde(rename = "message", default)]
        reason: String,
    },
}

impl InboundMessage {
    /// Whether this message ends the session.
    #[inline]
    pub fn is_fatal(&self) -> bool {
        matches!(self, InboundMessage::FatalServerError { .. })
    }
}

/// A request sent to the server. Fire-and-forget.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "requestType", rename_all = "camelCase")]
pub enum Command {
    EditCell {
        #[serde(rename = "cellName")]
        cell: String,
        contents: String,
    },
    RevertCell {
        #[serde(rename = "cellName")]
        cell: String,
    },
    SelectCell {
        #[serde(rename = "cellName")]
        cell: String,
    },
    Undo,
}

impl Command {
    /// Wire name of the request type.
    pub fn request_type(&self) -> &'static str {
        match self {
            Command::EditCell { .. } => "editCell",
            Command::RevertCell { .. } => "revertCell",
            Command::SelectCell { .. } => "selectCell",
            Command::Undo => "undo",
        }
    }

    /// Reject payloads with embedded newlines.
    pub fn validate(&self) -> Result<()> {
        match self {
            Command::EditCell { cell, contents } => {
                ensure_single_line("cell name", cell)?;
                ensure_single_line("cell contents", contents)
            }
            Command::RevertCell { cell } | Command::SelectCell { cell } => {
                ensure_single_line("cell name", cell)
            }
            Command::Undo => Ok(()),
        }
    }
}

/// Accept the id either as a JSON number or as a numeric string.
fn lenient_client_id<'de, D>(deserializer: D) -> std::result::Result<ClientId, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Number(ClientId),
        Text(String),
    }

    match RawId::deserialize(deserializer)? {
        RawId::Number(id) => Ok(id),
        RawId::Text(text) => text.trim().parse().map_err(serde::de::Error::custom),
    }
}
