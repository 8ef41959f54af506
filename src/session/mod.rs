//! Session module - the connection state machine and the events it publishes.
//!
//! [`Machine`] owns the protocol rules and emits [`ClientAction`]s; the
//! client carries those actions out against real sockets.

mod event;
mod machine;

pub use event::{ClientEvent, USER_DISCONNECTED};
pub use machine::{AttemptId, ClientAction, ConnectionPhase, Machine};
