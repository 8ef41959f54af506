//! Events published to collaborators (grid, document, formula engine).

use crate::codec::InboundMessage;
use crate::protocol::ClientId;

/// Reason reported when the local user ends the session.
pub const USER_DISCONNECTED: &str = "user disconnected";

/// Something collaborators should react to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// The connect attempt failed; the client is `Disconnected` again.
    ConnectionFailed { reason: String },

    /// Logged in; these spreadsheets can be opened.
    Connected { spreadsheets: Vec<String> },

    /// The server accepted the spreadsheet choice and assigned this client an id.
    IdAssigned { id: ClientId },

    /// A cell's contents changed.
    CellUpdated { cell: String, contents: String },

    /// A client (possibly this one) selected a cell.
    CellSelected {
        cell: String,
        selector_name: String,
        selector_id: ClientId,
    },

    /// Another client left the spreadsheet.
    ClientLeft { id: ClientId },

    /// The server refused an edit or revert.
    ChangeRejected { cell: String, reason: String },

    /// The session ended. Published once per session.
    Disconnected { reason: String },
}

impl From<InboundMessage> for ClientEvent {
    fn from(message: InboundMessage) -> Self {
        match message {
            InboundMessage::CellUpdated { cell, contents } => {
                ClientEvent::CellUpdated { cell, contents }
            }
            InboundMessage::CellSelected {
                cell,
                selector_name,
                selector_id,
            } => ClientEvent::CellSelected {
                cell,
                selector_name,
                selector_id,
            },
            InboundMessage::ClientLeft { id } => ClientEvent::ClientLeft { id },
            InboundMessage::RequestRejected { cell, reason } => {
                ClientEvent::ChangeRejected { cell, reason }
            }
            InboundMessage::FatalServerError { reason } => ClientEvent::Disconnected { reason },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_error_maps_to_change_rejected() {
        let event = ClientEvent::from(InboundMessage::RequestRejected {
            cell: "A1".into(),
            reason: "circular dependency".into(),
        });
        assert_eq!(
            event,
            ClientEvent::ChangeRejected {
                cell: "A1".into(),
                reason: "circular dependency".into()
            }
        );
    }

    #[test]
    fn test_server_error_maps_to_disconnected() {
        let event = ClientEvent::from(InboundMessage::FatalServerError {
            reason: "server shutting down".into(),
        });
        assert_eq!(
            event,
            ClientEvent::Disconnected {
                reason: "server shutting down".into()
            }
        );
    }
}
