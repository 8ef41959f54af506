//! # cellwire-client
//!
//! Network core for a collaborative spreadsheet editor.
//!
//! The client talks to a spreadsheet server over TCP using a line-oriented
//! text protocol: a plain-text handshake (username, spreadsheet roster,
//! spreadsheet choice, assigned id) followed by newline-terminated JSON
//! records in both directions.
//!
//! ## Architecture
//!
//! - **Transport** ([`transport`]): TCP sockets with one completion callback each
//! - **Framing** ([`protocol`]): line buffer and handshake rules
//! - **Session** ([`session`]): pure state machine that emits actions
//! - **Codec** ([`codec`]): JSON records for commands and server messages
//!
//! ## Example
//!
//! ```ignore
//! use cellwire_client::{ClientBuilder, ClientEvent};
//!
//! #[tokio::main]
//! async fn main() {
//!     let (client, mut events) = ClientBuilder::new().build().unwrap();
//!     client.connect("localhost:1100", "alice").unwrap();
//!
//!     while let Some(event) = events.recv().await {
//!         if let ClientEvent::Connected { spreadsheets } = &event {
//!             client.choose_spreadsheet(&spreadsheets[0]).unwrap();
//!         }
//!         println!("{event:?}");
//!     }
//! }
//! ```

pub mod codec;
pub mod error;
pub mod protocol;
pub mod session;
pub mod transport;

mod client;
mod writer;

pub use client::{ClientBuilder, ClientConfig, ClientEvents, SpreadsheetClient};
pub use codec::{Command, InboundMessage};
pub use error::{CellwireError, Result};
pub use session::{ClientEvent, ConnectionPhase};
