//! Accept loop for the server side of the transport.
//!
//! Each accepted connection is wrapped in a [`SocketState`] and handed to
//! the callback once. The loop keeps accepting until accepting fails or the
//! listener is stopped; either way the callback receives one final
//! error-flagged handle and the loop exits.

use std::net::{Ipv4Addr, SocketAddr};

use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::socket::{NetworkAction, SocketConfig, SocketState};
use crate::error::Result;

/// Error message delivered when the listener is stopped.
const LISTENER_STOPPED: &str = "Listener stopped";

/// A running accept loop.
///
/// Dropping the handle stops the loop, the same as calling [`stop`](Self::stop).
pub struct ListenerHandle {
    local_addr: SocketAddr,
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ListenerHandle {
    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting. The callback receives one error-flagged handle.
    pub fn stop(&self) {
        self.stop.send_replace(true);
    }

    /// Stop and wait for the accept loop to finish.
    pub async fn shutdown(self) {
        self.stop();
        let _ = self.task.await;
    }
}

/// Bind `0.0.0.0:port` and start accepting on a spawned task.
///
/// Pass port 0 to let the OS pick one; see [`ListenerHandle::local_addr`].
///
/// # Errors
///
/// Returns an I/O error if the port cannot be bound.
pub async fn start_listening(
    action: NetworkAction,
    port: u16,
    config: SocketConfig,
) -> Result<ListenerHandle> {
    let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).await?;
    let local_addr = listener.local_addr()?;
    let (stop, stop_rx) = watch::channel(false);

    tracing::debug!(%local_addr, "Listening");
    let task = tokio::spawn(accept_loop(listener, action, config, stop_rx));

    Ok(ListenerHandle {
        local_addr,
        stop,
        task,
    })
}

async fn accept_loop(
    listener: TcpListener,
    action: NetworkAction,
    config: SocketConfig,
    mut stop: watch::Receiver<bool>,
) {
    loop {
        let accepted = tokio::select! {
            result = listener.accept() => result.map_err(|e| e.to_string()),
            _ = stop.wait_for(|stopped| *stopped) => Err(LISTENER_STOPPED.to_string()),
        };

        match accepted {
            Ok((stream, peer)) => {
                if let Err(e) = stream.set_nodelay(true) {
                    tracing::debug!(%peer, "Could not disable Nagle: {}", e);
                }
                tracing::debug!(%peer, "Accepted connection");
                SocketState::from_stream(stream, action.clone(), &config).dispatch();
            }
            Err(reason) => {
                tracing::debug!("Accept loop ending: {}", reason);
                SocketState::failed(action, reason).dispatch();
                return;
            }
        }
    }
}
