//! Codec module - JSON records for the steady-state protocol.
//!
//! - [`JsonCodec`] - encodes/decodes newline-terminated JSON records
//! - [`Command`] - outbound requests (`requestType` discriminator)
//! - [`InboundMessage`] - server messages (`messageType` discriminator)
//!
//! # Design
//!
//! The codec is a marker struct with static methods. Decoding inbound
//! records never fails loudly: anything that is not a recognised message
//! is dropped.
//!
//! # Example
//!
//! ```
//! use cellwire_client::codec::{InboundMessage, JsonCodec};
//!
//! let record = r#"{"messageType":"cellUpdated","cellName":"B2","contents":"7"}"#;
//! assert_eq!(
//!     JsonCodec::decode_message(record),
//!     Some(InboundMessage::CellUpdated { cell: "B2".into(), contents: "7".into() })
//! );
//! assert_eq!(JsonCodec::decode_message("garbage"), None);
//! ```

mod json;
mod message;

pub use json::JsonCodec;
pub use message::{Command, InboundMessage};
