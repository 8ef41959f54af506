//! Protocol module - line framing and handshake rules.
//!
//! This module implements the text protocol shared by both handshake and
//! steady state:
//! - Line buffer for accumulating partial reads and extracting records
//! - Handshake helpers (roster completion, id line, wire-string guard)

mod handshake;
mod line_buffer;

pub use handshake::{
    ensure_single_line, handshake_line, parse_client_id, roster_complete, split_host_port,
    take_roster, ClientId, DEFAULT_PORT,
};
pub use line_buffer::{LineBuffer, RECORD_TERMINATOR};
