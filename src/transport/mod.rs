//! Transport module - TCP sockets with a single-callback contract.
//!
//! Provides:
//! - [`connect_to_server`] - client side, with a connect timeout
//! - [`start_listening`] - server side accept loop
//! - [`SocketState`] - the connection handle (receive, send, close)

mod listener;
mod socket;

pub use listener::{start_listening, ListenerHandle};
pub use socket::{
    connect_to_server, network_action, ConnectionId, NetworkAction, SocketConfig, SocketState,
    DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_CHUNK_SIZE,
};
