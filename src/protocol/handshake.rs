//! Handshake framing rules.
//!
//! The handshake is plain newline-delimited text, not JSON:
//!
//! ```text
//! client -> server   <username>\n
//! server -> client   <sheet>\n <sheet>\n ... \n        (roster, blank-line terminated)
//! client -> server   <sheet>\n
//! server -> client   {json}\n ... <client id>\n         (pre-existing state, then the id)
//! ```

use crate::error::{CellwireError, Result};

use super::line_buffer::{LineBuffer, RECORD_TERMINATOR};

/// Port the reference server listens on.
pub const DEFAULT_PORT: u16 = 1100;

/// Id the server assigns to each joined client.
pub type ClientId = i32;

/// Reject strings that would break line framing on the wire.
///
/// `field` names the offending argument in the error.
pub fn ensure_single_line(field: &'static str, value: &str) -> Result<()> {
    if value.contains(RECORD_TERMINATOR) {
        return Err(CellwireError::EmbeddedNewline { field });
    }
    Ok(())
}

/// Build the single record sent for the username and spreadsheet steps.
pub fn handshake_line(field: &'static str, value: &str) -> Result<String> {
    ensure_single_line(field, value)?;
    let mut line = String::with_capacity(value.len() + 1);
    line.push_str(value);
    line.push(RECORD_TERMINATOR);
    Ok(line)
}

/// Whether the roster has fully arrived.
///
/// The server ends the roster with an empty line, so the accumulated text
/// must end in `"\n\n"`. A blank line that is followed by more text does not
/// complete the roster.
pub fn roster_complete(buffer: &LineBuffer) -> bool {
    buffer.ends_with_blank_line()
}

/// Drain a complete roster from the buffer, dropping blank entries.
pub fn take_roster(buffer: &mut LineBuffer) -> Vec<String> {
    buffer
        .extract_frames()
        .into_iter()
        .filter(|name| !name.is_empty())
        .collect()
}

/// Parse the record carrying this client's id.
///
/// The id line holds nothing but a decimal integer; surrounding whitespace
/// (such as a stray `\r`) is tolerated.
pub fn parse_client_id(record: &str) -> Option<ClientId> {
    let trimmed = record.trim();
    if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit() || b == b'-') {
        return None;
    }
    match trimmed.parse() {
        Ok(id) => Some(id),
        Err(e) => {
            tracing::warn!(record = trimmed, "Id line is not a valid client id: {}", e);
            None
        }
    }
}

/// Split `host` or `host:port` into its parts.
///
/// A trailing `:port` is honoured only when it parses as a port number and
/// the host part itself holds no colon (so IPv6 literals are left alone).
pub fn split_host_port(address: &str, default_port: u16) -> (&str, u16) {
    if let Some((host, port)) = address.rsplit_once(':') {
        if !host.contains(':') {
            if let Ok(port) = port.parse() {
                return (host, port);
            }
        }
    }
    (address, default_port)
}
